pub mod endpoints;

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{BackendError, BackendResult};
use crate::secrets::{SecretStore, ACCESS_TOKEN_KEY};

/// HTTP client wrapper for the identity backend REST API.
///
/// Every request carries the access token currently held in the secret
/// store as a bearer token.
#[derive(Clone)]
pub struct BackendHttpClient {
    client: Client,
    base_url: Url,
    secrets: Arc<dyn SecretStore>,
}

/// Error body shape returned by the backend.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    identifier: Option<String>,
}

impl BackendHttpClient {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        secrets: Arc<dyn SecretStore>,
    ) -> BackendResult<Self> {
        let client = Client::builder().timeout(request_timeout).build()?;
        // A trailing slash makes `Url::join` append instead of replace.
        let base_url = Url::parse(&format!("{}/", base_url.trim_end_matches('/')))?;
        Ok(Self {
            client,
            base_url,
            secrets,
        })
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    fn request(&self, method: Method, path: &str) -> BackendResult<RequestBuilder> {
        let url = self.base_url.join(path.trim_start_matches('/'))?;
        let mut builder = self.client.request(method, url);
        // An unreadable store means no bearer; the backend answers 401.
        if let Ok(Some(token)) = self.secrets.get(ACCESS_TOKEN_KEY) {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    /// GET a JSON resource.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let resp = self.request(Method::GET, path)?.send().await?;
        Self::decode(resp).await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> BackendResult<T> {
        let resp = self.request(Method::POST, path)?.json(body).send().await?;
        Self::decode(resp).await
    }

    /// POST without a body, ignoring any response payload.
    pub async fn post_empty(&self, path: &str) -> BackendResult<()> {
        let resp = self.request(Method::POST, path)?.send().await?;
        Self::check(resp).await.map(|_| ())
    }

    /// POST without a body and decode the JSON response.
    pub async fn post_no_body<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let resp = self.request(Method::POST, path)?.send().await?;
        Self::decode(resp).await
    }

    /// PATCH a JSON body and decode the JSON response.
    pub async fn patch<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> BackendResult<T> {
        let resp = self.request(Method::PATCH, path)?.json(body).send().await?;
        Self::decode(resp).await
    }

    /// DELETE a resource.
    pub async fn delete(&self, path: &str) -> BackendResult<()> {
        let resp = self.request(Method::DELETE, path)?.send().await?;
        Self::check(resp).await.map(|_| ())
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> BackendResult<T> {
        let resp = Self::check(resp).await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(BackendError::Json)
    }

    /// Map non-success statuses onto [`BackendError`].
    async fn check(resp: Response) -> BackendResult<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let text = resp.text().await.unwrap_or_default();
        let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();
        let message = body
            .message
            .or(body.error)
            .unwrap_or_else(|| text.clone());

        Err(match status {
            StatusCode::UNAUTHORIZED => BackendError::Unauthorized(message),
            StatusCode::CONFLICT => BackendError::Conflict {
                identifier: body.identifier,
                message,
            },
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => BackendError::Timeout,
            _ => BackendError::Http {
                status: status.as_u16(),
                message,
            },
        })
    }
}

impl std::fmt::Debug for BackendHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHttpClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

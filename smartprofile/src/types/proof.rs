use std::fmt;

use serde::{Deserialize, Serialize};

use super::enums::{AccountType, SocialProvider};

/// Credential produced by an external provider flow, validated superficially
/// before it is sent to the backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LinkProof {
    /// Sign-In With Ethereum message and signature.
    #[serde(rename_all = "camelCase")]
    Wallet {
        address: String,
        message: String,
        signature: String,
        #[serde(default)]
        chain_id: Option<u64>,
    },
    #[serde(rename = "oauth", rename_all = "camelCase")]
    OAuth {
        provider: SocialProvider,
        access_token: String,
        #[serde(default)]
        id_token: Option<String>,
        #[serde(default)]
        handle: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Passkey {
        credential_id: String,
        attestation: String,
        #[serde(default)]
        client_data: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    EmailCode { email: String, code: String },
}

impl LinkProof {
    pub fn account_type(&self) -> AccountType {
        match self {
            LinkProof::Wallet { .. } => AccountType::Wallet,
            LinkProof::OAuth { provider, .. } => AccountType::Social(*provider),
            LinkProof::Passkey { .. } => AccountType::Passkey,
            LinkProof::EmailCode { .. } => AccountType::Email,
        }
    }

    /// Identifier the resulting account will carry, when the proof names it.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            LinkProof::Wallet { address, .. } => Some(address),
            LinkProof::OAuth { handle, .. } => handle.as_deref(),
            LinkProof::Passkey { credential_id, .. } => Some(credential_id),
            LinkProof::EmailCode { email, .. } => Some(email),
        }
    }

    /// Shape checks only; cryptographic verification belongs to the backend.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            LinkProof::Wallet {
                address,
                message,
                signature,
                ..
            } => {
                if !is_evm_address(address) {
                    return Err(format!("malformed wallet address: {address}"));
                }
                require("SIWE message", message)?;
                let sig = signature.strip_prefix("0x").unwrap_or(signature);
                if sig.is_empty() || hex::decode(sig).is_err() {
                    return Err("signature must be hex encoded".into());
                }
                Ok(())
            }
            LinkProof::OAuth { access_token, .. } => require("access token", access_token),
            LinkProof::Passkey {
                credential_id,
                attestation,
                ..
            } => {
                require("credential id", credential_id)?;
                require("attestation", attestation)
            }
            LinkProof::EmailCode { email, code } => {
                let (local, domain) = email
                    .split_once('@')
                    .ok_or_else(|| format!("malformed email: {email}"))?;
                if local.is_empty() || !domain.contains('.') {
                    return Err(format!("malformed email: {email}"));
                }
                if code.len() < 4 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err("verification code is malformed".into());
                }
                Ok(())
            }
        }
    }
}

fn require(what: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{what} is empty"))
    } else {
        Ok(())
    }
}

fn is_evm_address(address: &str) -> bool {
    address
        .strip_prefix("0x")
        .is_some_and(|hex_part| hex_part.len() == 40 && hex::decode(hex_part).is_ok())
}

// Proofs carry bearer material; keep it out of logs.
impl fmt::Debug for LinkProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkProof::Wallet { address, chain_id, .. } => f
                .debug_struct("Wallet")
                .field("address", address)
                .field("chain_id", chain_id)
                .finish_non_exhaustive(),
            LinkProof::OAuth { provider, handle, .. } => f
                .debug_struct("OAuth")
                .field("provider", provider)
                .field("handle", handle)
                .finish_non_exhaustive(),
            LinkProof::Passkey { credential_id, .. } => f
                .debug_struct("Passkey")
                .field("credential_id", credential_id)
                .finish_non_exhaustive(),
            LinkProof::EmailCode { email, .. } => f
                .debug_struct("EmailCode")
                .field("email", email)
                .finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(address: &str, signature: &str) -> LinkProof {
        LinkProof::Wallet {
            address: address.into(),
            message: "example.com wants you to sign in".into(),
            signature: signature.into(),
            chain_id: Some(1),
        }
    }

    #[test]
    fn test_wallet_proof_validation() {
        let addr = "0x52908400098527886E0F7030069857D2E4169EE7";
        assert!(wallet(addr, "0xdeadbeef").validate().is_ok());
        assert!(wallet("52908400098527886E0F7030069857D2E4169EE7", "0xdeadbeef")
            .validate()
            .is_err());
        assert!(wallet(addr, "0x").validate().is_err());
        assert!(wallet(addr, "not-hex").validate().is_err());
    }

    #[test]
    fn test_email_code_validation() {
        let ok = LinkProof::EmailCode {
            email: "alice@example.com".into(),
            code: "482913".into(),
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.account_type(), AccountType::Email);

        let bad_email = LinkProof::EmailCode {
            email: "alice".into(),
            code: "482913".into(),
        };
        assert!(bad_email.validate().is_err());

        let bad_code = LinkProof::EmailCode {
            email: "alice@example.com".into(),
            code: "12".into(),
        };
        assert!(bad_code.validate().is_err());
    }

    #[test]
    fn test_oauth_and_passkey_require_material() {
        let oauth = LinkProof::OAuth {
            provider: SocialProvider::Github,
            access_token: "  ".into(),
            id_token: None,
            handle: Some("octocat".into()),
        };
        assert!(oauth.validate().is_err());
        assert_eq!(oauth.account_type(), AccountType::Social(SocialProvider::Github));

        let passkey = LinkProof::Passkey {
            credential_id: "cred-1".into(),
            attestation: "o2NmbXRkbm9uZQ".into(),
            client_data: None,
        };
        assert!(passkey.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let oauth = LinkProof::OAuth {
            provider: SocialProvider::Google,
            access_token: "ya29.secret".into(),
            id_token: None,
            handle: None,
        };
        assert!(!format!("{oauth:?}").contains("ya29.secret"));
    }

    #[test]
    fn test_proof_wire_format() {
        let json = serde_json::to_value(LinkProof::EmailCode {
            email: "a@b.io".into(),
            code: "1234".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "emailCode");
        assert_eq!(json["email"], "a@b.io");
    }
}

//! Device-side first-round message generation.

use ed25519_dalek::{Signer, SigningKey};

use crate::types::{CloudKeyBundle, KeyShareRecord, P1Message};

/// Produces the device party's P1 messages for a handshake.
pub trait P1MessageGenerator: Send + Sync {
    fn keygen_messages(
        &self,
        profile_id: &str,
        cloud: &CloudKeyBundle,
    ) -> Result<Vec<P1Message>, String>;

    fn sign_messages(
        &self,
        profile_id: &str,
        key_share: &KeyShareRecord,
        message: &[u8],
    ) -> Result<Vec<P1Message>, String>;
}

/// Development generator: commits to the request context with a fresh
/// ephemeral ed25519 key.
///
/// Round 1 carries the ephemeral public key, round 2 the signature over the
/// context. It exercises the handshake plumbing; it is not a threshold
/// scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519P1Generator;

impl Ed25519P1Generator {
    fn commit(context: &[u8]) -> Vec<P1Message> {
        let ephemeral = SigningKey::generate(&mut rand::rngs::OsRng);
        let signature = ephemeral.sign(context);
        vec![
            P1Message {
                round: 1,
                payload: hex::encode(ephemeral.verifying_key().to_bytes()),
            },
            P1Message {
                round: 2,
                payload: hex::encode(signature.to_bytes()),
            },
        ]
    }
}

impl P1MessageGenerator for Ed25519P1Generator {
    fn keygen_messages(
        &self,
        profile_id: &str,
        cloud: &CloudKeyBundle,
    ) -> Result<Vec<P1Message>, String> {
        let cloud_key = cloud.public_key.strip_prefix("0x").unwrap_or(&cloud.public_key);
        let cloud_key =
            hex::decode(cloud_key).map_err(|e| format!("cloud public key is not hex: {e}"))?;
        if cloud_key.is_empty() {
            return Err("cloud public key is empty".into());
        }

        let mut context = b"keygen:".to_vec();
        context.extend_from_slice(profile_id.as_bytes());
        context.extend_from_slice(&cloud_key);
        Ok(Self::commit(&context))
    }

    fn sign_messages(
        &self,
        profile_id: &str,
        key_share: &KeyShareRecord,
        message: &[u8],
    ) -> Result<Vec<P1Message>, String> {
        if message.is_empty() {
            return Err("message is empty".into());
        }
        let mut context = b"sign:".to_vec();
        context.extend_from_slice(profile_id.as_bytes());
        context.extend_from_slice(key_share.key_share_ref.as_bytes());
        context.extend_from_slice(message);
        Ok(Self::commit(&context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    fn bundle(key: &str) -> CloudKeyBundle {
        CloudKeyBundle {
            public_key: key.into(),
            key_id: None,
        }
    }

    #[test]
    fn test_keygen_commitment_verifies() {
        let cloud = bundle("0x02a1b2c3");
        let messages = Ed25519P1Generator
            .keygen_messages("profile-A", &cloud)
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].round, 1);

        let pk: [u8; 32] = hex::decode(&messages[0].payload).unwrap().try_into().unwrap();
        let sig: [u8; 64] = hex::decode(&messages[1].payload).unwrap().try_into().unwrap();
        let verifying_key = VerifyingKey::from_bytes(&pk).unwrap();

        let mut context = b"keygen:profile-A".to_vec();
        context.extend_from_slice(&[0x02, 0xa1, 0xb2, 0xc3]);
        verifying_key
            .verify(&context, &Signature::from_bytes(&sig))
            .expect("commitment should verify");
    }

    #[test]
    fn test_keygen_rejects_bad_cloud_key() {
        assert!(Ed25519P1Generator
            .keygen_messages("p", &bundle("zz-not-hex"))
            .is_err());
        assert!(Ed25519P1Generator.keygen_messages("p", &bundle("0x")).is_err());
    }

    #[test]
    fn test_ephemeral_keys_differ_per_call() {
        let cloud = bundle("abcd");
        let a = Ed25519P1Generator.keygen_messages("p", &cloud).unwrap();
        let b = Ed25519P1Generator.keygen_messages("p", &cloud).unwrap();
        assert_ne!(a[0].payload, b[0].payload);
    }
}

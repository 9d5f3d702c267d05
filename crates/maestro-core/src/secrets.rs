// Sealed secrets attached to tasks.
//
// Secrets travel as public-key sealed boxes: clients seal against the
// orchestrator's public key, and only the worker holding the process-wide
// private key (`SECRETS_SK_KEY`) can recover the plaintext.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use crypto_box::SecretKey;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{MaestroError, Result};

const KEY_SIZE: usize = 32;

/// A token/ciphertext pair as carried on a task.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SealedSecret {
    pub token: String,
    /// Base64-encoded sealed-box ciphertext.
    pub secret: String,
}

/// A secret after unsealing, only ever held in worker memory.
#[derive(Debug, Clone)]
pub struct UnsealedSecret {
    pub token: String,
    pub secret: String,
}

impl SealedSecret {
    /// Unseal the ciphertext with the base64-encoded 32-byte private key.
    pub fn unseal(&self, sk_base64: &str) -> Result<UnsealedSecret> {
        let sk_bytes = BASE64
            .decode(sk_base64)
            .map_err(|e| MaestroError::config(format!("invalid SECRETS_SK_KEY: {e}")))?;
        let sk_bytes: [u8; KEY_SIZE] = sk_bytes.try_into().map_err(|_| {
            MaestroError::config(format!("SECRETS_SK_KEY must decode to {KEY_SIZE} bytes"))
        })?;
        let secret_key = SecretKey::from(sk_bytes);

        let ciphertext = BASE64.decode(&self.secret).map_err(|e| {
            MaestroError::validation(format!("secret `{}` is not valid base64: {e}", self.token))
        })?;

        let plaintext = secret_key.unseal(&ciphertext).map_err(|_| {
            MaestroError::validation(format!("could not unseal secret `{}`", self.token))
        })?;

        Ok(UnsealedSecret {
            token: self.token.clone(),
            secret: String::from_utf8(plaintext).map_err(|e| {
                MaestroError::validation(format!("secret `{}` is not utf-8: {e}", self.token))
            })?,
        })
    }
}

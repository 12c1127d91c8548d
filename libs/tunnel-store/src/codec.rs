//! Encoding of the values we hand to the backing store.
//!
//! Every value is wrapped in an envelope that names the key it belongs to and carries a SHA256 digest
//! of the payload. This lets us tell a corrupted value apart from an absent one.

use anyhow::{Context as _, anyhow};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest as _, Sha256};

use crate::{Key, PersistenceError};

const VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u32,
    key: Key,
    sha256: String,
    payload: String,
}

pub(crate) fn encode<T>(key: Key, value: &T) -> Result<Vec<u8>, PersistenceError>
where
    T: Serialize,
{
    let payload = serde_json::to_string(value)
        .with_context(|| format!("Failed to serialize value for `{key}`"))
        .map_err(PersistenceError::io)?;

    let envelope = Envelope {
        version: VERSION,
        key,
        sha256: digest(&payload),
        payload,
    };

    serde_json::to_vec(&envelope)
        .context("Failed to serialize envelope")
        .map_err(PersistenceError::io)
}

pub(crate) fn decode<T>(key: Key, bytes: &[u8]) -> Result<T, PersistenceError>
where
    T: DeserializeOwned,
{
    let envelope = serde_json::from_slice::<Envelope>(bytes)
        .with_context(|| format!("Value of `{key}` is not a valid envelope"))
        .map_err(PersistenceError::corruption)?;

    if envelope.version != VERSION {
        return Err(PersistenceError::corruption(anyhow!(
            "Value of `{key}` has unknown version {}",
            envelope.version
        )));
    }

    if envelope.key != key {
        return Err(PersistenceError::corruption(anyhow!(
            "Value stored under `{key}` belongs to `{}`",
            envelope.key
        )));
    }

    if envelope.sha256 != digest(&envelope.payload) {
        return Err(PersistenceError::corruption(anyhow!(
            "Digest mismatch for value of `{key}`"
        )));
    }

    serde_json::from_str(&envelope.payload)
        .with_context(|| format!("Failed to deserialize value of `{key}`"))
        .map_err(PersistenceError::corruption)
}

fn digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

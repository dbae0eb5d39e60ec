//! Versioned encoding for learner state kept in the key-value store.
//!
//! State is written as `{"version": N, "data": ...}`. Reads never fail: a
//! missing key, a store error, a version mismatch or a corrupt payload all
//! yield the default state so the engine falls back to exploration. Writes
//! that fail are logged and dropped.

use crate::error::{Result, StoreError};
use crate::store::Store;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const KEY_BANDIT: &str = "jitai.bandit.arms";
pub const KEY_TIMING: &str = "jitai.timing.patterns";
pub const KEY_ROLLOUT: &str = "jitai.rollout.state";
pub const KEY_BURDEN_TREND: &str = "jitai.burden.trend";
pub const KEY_ENABLED: &str = "jitai.enabled";
pub const KEY_SNOOZE_UNTIL: &str = "jitai.snooze_until_ms";
pub const KEY_UNINSTALLED: &str = "jitai.uninstalled_apps";

/// State that knows its own schema version.
pub trait VersionedState: Serialize + DeserializeOwned + Default {
    const VERSION: u32;
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    data: &'a T,
}

#[derive(Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// Encodes `state` inside the versioned envelope.
pub fn encode<T: VersionedState>(state: &T) -> Result<String> {
    Ok(serde_json::to_string(&EnvelopeRef {
        version: T::VERSION,
        data: state,
    })?)
}

/// Decodes an envelope, rejecting other schema versions.
pub fn decode<T: VersionedState>(raw: &str) -> Result<T> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_str(raw)?;
    if envelope.version != T::VERSION {
        return Err(StoreError::Version {
            found: envelope.version,
            expected: T::VERSION,
        });
    }
    Ok(serde_json::from_value(envelope.data)?)
}

/// Loads state, substituting the default for anything unreadable.
pub fn load_or_default<T: VersionedState>(store: &dyn Store, key: &str) -> T {
    match store.get(key) {
        Ok(Some(raw)) => decode(&raw).unwrap_or_else(|err| {
            warn!(key, error = %err, "corrupt persisted state, using defaults");
            T::default()
        }),
        Ok(None) => T::default(),
        Err(err) => {
            warn!(key, error = %err, "state read failed, using defaults");
            T::default()
        }
    }
}

/// Persists state; a failed write is logged and the update dropped.
pub fn save_or_log<T: VersionedState>(store: &dyn Store, key: &str, state: &T) -> bool {
    let written = encode(state).and_then(|raw| store.set(key, &raw));
    match written {
        Ok(()) => true,
        Err(err) => {
            warn!(key, error = %err, "state write failed, dropping update");
            false
        }
    }
}

/// Reads a plain JSON value stored without an envelope.
pub fn read_json<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Option<T> {
    match store.get(key) {
        Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
        Ok(None) => None,
        Err(err) => {
            warn!(key, error = %err, "value read failed");
            None
        }
    }
}

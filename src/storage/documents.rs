use serde::{de::DeserializeOwned, Serialize};
use tracing::warn;

use crate::error::StoreError;

use super::kv::KeyValueStore;

pub const SETTINGS_KEY: &str = "settings";
pub const RULES_KEY: &str = "trackedRules";
pub const STATS_PREFIX: &str = "stats:";
pub const CURRENT_SESSION_KEY: &str = "currentSession";
pub const LAST_NOTIFICATION_KEY: &str = "lastNotification";

/// Reads a single typed document. A document that no longer matches its type is logged and
/// reported as absent so that callers fall back to defaults instead of failing forever.
pub async fn read_document<T: DeserializeOwned>(
    store: &impl KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    let mut values = store.get(&[key.to_owned()]).await?;
    let Some(value) = values.remove(key) else {
        return Ok(None);
    };
    match serde_json::from_value(value) {
        Ok(v) => Ok(Some(v)),
        Err(e) => {
            warn!("Document {key} has an unexpected shape, ignoring it: {e}");
            Ok(None)
        }
    }
}

pub async fn write_document<T: Serialize>(
    store: &impl KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    store
        .set(vec![(key.to_owned(), serde_json::to_value(value)?)])
        .await
}

pub async fn remove_document(store: &impl KeyValueStore, key: &str) -> Result<(), StoreError> {
    store.remove(&[key.to_owned()]).await.map(|_| ())
}

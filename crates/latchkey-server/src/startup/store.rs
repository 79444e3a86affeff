//! Store adapter selection

use std::sync::Arc;

use latchkey_store::{MemoryStore, RedisStore, StoreAdapter};
use tracing::info;

use crate::config::{Configuration, StoreKind};

/// Connect the store adapter named by `latchkey.store.type`
pub async fn connect_store(configuration: &Configuration) -> anyhow::Result<Arc<dyn StoreAdapter>> {
    let store: Arc<dyn StoreAdapter> = match configuration.store_kind()? {
        StoreKind::Memory => Arc::new(MemoryStore::new().with_check_and_act()),
        StoreKind::Redis { url } => Arc::new(RedisStore::connect(&url).await?),
    };

    info!(
        store = store.name(),
        check_and_act = store.supports_check_and_act(),
        "Lease store ready"
    );
    Ok(store)
}

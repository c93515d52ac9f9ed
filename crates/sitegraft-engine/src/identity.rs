//! The identity mapper: the idempotency backbone.
//!
//! Every write decision consults [`IdentityMapper::find_local`] first; a
//! link recorded by [`IdentityMapper::record_link`] is what prevents
//! duplicate creation across repeated runs over the same source range.
//!
//! One mapper instance lives per run, shared behind `Arc`. Positive
//! lookups memoize (the local lookup may itself be a remote call);
//! negative lookups do not — a parallel worker may create the entity
//! mid-run, and the store index must be the authority. A fresh mapper per
//! run means the memo never substitutes for a fresh lookup at the start
//! of a new run.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::trace;

use sitegraft_core::{ContentStore, EntityKind, Result};

type Key = (i64, u32, EntityKind);

/// Maintains the `(source_id, source_tenant) -> local_id` correspondence
/// for every entity kind.
pub struct IdentityMapper {
    store: Arc<dyn ContentStore>,
    memo: Mutex<HashMap<Key, i64>>,
}

impl IdentityMapper {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            memo: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the local id for a source identity, if one exists.
    pub async fn find_local(
        &self,
        source_id: i64,
        tenant: u32,
        kind: EntityKind,
    ) -> Result<Option<i64>> {
        if source_id <= 0 {
            return Ok(None);
        }

        let key = (source_id, tenant, kind);
        if let Some(local_id) = self.memo.lock().await.get(&key) {
            trace!(
                subsystem = "engine",
                component = "identity",
                op = "find_local",
                source_id,
                tenant,
                kind = %kind,
                local_id,
                "Memo hit"
            );
            return Ok(Some(*local_id));
        }

        let found = self.store.find_by_source(kind, source_id, tenant).await?;
        if let Some(local_id) = found {
            self.memo.lock().await.insert(key, local_id);
        }
        Ok(found)
    }

    /// Record a committed link. Serializes concurrent recorders through
    /// the memo lock; the store's source-key index is updated by the
    /// entity write itself (identity meta keys), so this is memo-only.
    pub async fn record_link(&self, source_id: i64, tenant: u32, kind: EntityKind, local_id: i64) {
        if source_id <= 0 || local_id <= 0 {
            return;
        }
        self.memo
            .lock()
            .await
            .insert((source_id, tenant, kind), local_id);
    }
}

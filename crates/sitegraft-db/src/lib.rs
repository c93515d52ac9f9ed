//! # sitegraft-db
//!
//! Remote MySQL source layer for the sitegraft migration engine.
//!
//! This crate provides:
//! - Connection pool management from an encrypted credential record
//! - Tenant-aware physical table name resolution
//! - Parameterized entry/term/user/attachment fetch queries
//! - A [`MySqlRemote`] facade implementing the engine's `RemoteSource` seam

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::mysql::MySqlPool;

use sitegraft_core::{
    FetchFilter, MetaValue, RemoteSource, Result, SourceAttachment, SourceRow, SourceUser,
    TermNode, TermSelection, TermsByTaxonomy, UserSelection,
};

pub mod attachments;
pub mod pool;
pub mod query;
pub mod tables;
pub mod terms;
pub mod users;

pub use attachments::{AttachmentQuery, META_ATTACHED_FILE, META_ATTACHMENT_MANIFEST};
pub use pool::{connect, connect_with_config, PoolConfig};
pub use query::EntryQuery;
pub use tables::{Table, TenantTables};
pub use terms::TermQuery;
pub use users::UserQuery;

/// Escape LIKE wildcard characters (`%`, `_`, `\`) in user input so a
/// free-text search matches literally.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

/// `?,?,...` placeholder list for an IN clause.
pub(crate) fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n.saturating_mul(2));
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

/// Facade over the per-entity fetchers, implementing the engine's remote
/// seam. One instance per run, built from a connected pool and the
/// credential record's table settings.
pub struct MySqlRemote {
    entries: EntryQuery,
    terms: TermQuery,
    users: UserQuery,
    attachments: AttachmentQuery,
}

impl MySqlRemote {
    pub fn new(pool: MySqlPool, tables: TenantTables) -> Self {
        Self {
            entries: EntryQuery::new(pool.clone(), tables.clone()),
            terms: TermQuery::new(pool.clone(), tables.clone()),
            users: UserQuery::new(pool.clone(), tables.clone()),
            attachments: AttachmentQuery::new(pool, tables),
        }
    }
}

#[async_trait]
impl RemoteSource for MySqlRemote {
    async fn fetch_entries(&self, filter: &FetchFilter) -> Result<Vec<SourceRow>> {
        self.entries.fetch_rows(filter).await
    }

    async fn fetch_entry_terms(
        &self,
        entry_ids: &[i64],
        tenant: Option<u32>,
        taxonomies: &[String],
        force_base_prefix: bool,
    ) -> Result<HashMap<i64, TermsByTaxonomy>> {
        self.terms
            .fetch_entry_terms(entry_ids, tenant, taxonomies, force_base_prefix)
            .await
    }

    async fn fetch_term_ids(&self, selection: &TermSelection) -> Result<Vec<i64>> {
        self.terms.fetch_term_ids(selection).await
    }

    async fn fetch_terms(&self, ids: &[i64], selection: &TermSelection) -> Result<Vec<TermNode>> {
        self.terms.fetch_terms(ids, selection).await
    }

    async fn fetch_user_ids(&self, selection: &UserSelection) -> Result<Vec<i64>> {
        self.users.fetch_user_ids(selection).await
    }

    async fn fetch_users(&self, ids: &[i64]) -> Result<Vec<SourceUser>> {
        self.users.fetch_users(ids).await
    }

    async fn fetch_user_meta(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<(String, MetaValue)>>> {
        self.users.fetch_user_meta(ids).await
    }

    async fn fetch_attachments(
        &self,
        ids: &[i64],
        tenant: Option<u32>,
        force_base_prefix: bool,
    ) -> Result<Vec<SourceAttachment>> {
        self.attachments
            .fetch_attachments(ids, tenant, force_base_prefix)
            .await
    }

    async fn fetch_attachment_url(&self, id: i64, tenant: Option<u32>) -> Result<Option<String>> {
        self.attachments.fetch_attachment_url(id, tenant).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%"), "50\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(0), "");
        assert_eq!(placeholders(1), "?");
        assert_eq!(placeholders(3), "?,?,?");
    }
}

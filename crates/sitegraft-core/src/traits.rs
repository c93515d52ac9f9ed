//! Trait seams for external collaborators.
//!
//! The engine never talks to a concrete database or store directly: the
//! remote source, the local content store, the downloader, the media
//! probe, and the host key-value persistence are all injected through
//! these traits, so every importer can be exercised against in-memory
//! implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::Result;
use crate::filter::FetchFilter;
use crate::meta::MetaValue;
use crate::models::{
    AttachmentWrite, EntityKind, EntryDraft, SourceAttachment, SourceRow, SourceUser, TermNode,
    TermWrite, TermsByTaxonomy, UserWrite,
};

/// Selection of remote term candidates.
#[derive(Debug, Clone, Default)]
pub struct TermSelection {
    pub tenant: Option<u32>,
    /// Taxonomies to import; empty imports all.
    pub taxonomies: Vec<String>,
    pub include_ids: Vec<i64>,
    pub exclude_ids: Vec<i64>,
    pub force_base_prefix: bool,
}

/// Selection of remote users.
#[derive(Debug, Clone, Default)]
pub struct UserSelection {
    pub tenant: Option<u32>,
    pub include_ids: Vec<i64>,
    pub exclude_ids: Vec<i64>,
    pub force_base_prefix: bool,
}

/// Read access to the remote relational source.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch a page of entry rows, metadata attached per the filter.
    async fn fetch_entries(&self, filter: &FetchFilter) -> Result<Vec<SourceRow>>;

    /// Terms assigned to the given entries, grouped per entry and taxonomy.
    async fn fetch_entry_terms(
        &self,
        entry_ids: &[i64],
        tenant: Option<u32>,
        taxonomies: &[String],
        force_base_prefix: bool,
    ) -> Result<HashMap<i64, TermsByTaxonomy>>;

    /// Candidate term ids matching a selection, ordered `parent ASC, id ASC`.
    async fn fetch_term_ids(&self, selection: &TermSelection) -> Result<Vec<i64>>;

    /// Full term nodes (meta included) for a chunk of ids, in the same
    /// parent-first order.
    async fn fetch_terms(&self, ids: &[i64], selection: &TermSelection) -> Result<Vec<TermNode>>;

    /// Candidate user ids matching a selection, ascending.
    async fn fetch_user_ids(&self, selection: &UserSelection) -> Result<Vec<i64>>;

    /// User rows for a chunk of ids.
    async fn fetch_users(&self, ids: &[i64]) -> Result<Vec<SourceUser>>;

    /// User metadata for a chunk of ids, in storage order.
    async fn fetch_user_meta(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<(String, MetaValue)>>>;

    /// Attachment rows (file path, mime, manifest, URL) for a set of ids.
    async fn fetch_attachments(
        &self,
        ids: &[i64],
        tenant: Option<u32>,
        force_base_prefix: bool,
    ) -> Result<Vec<SourceAttachment>>;

    /// Public URL of a single attachment, if it exists remotely.
    async fn fetch_attachment_url(&self, id: i64, tenant: Option<u32>) -> Result<Option<String>>;
}

/// Write/lookup access to the local content store.
///
/// `find_by_source` is the source-key index backing the identity mapper;
/// it must reflect committed writes immediately (per-row commits, not a
/// batched transaction).
#[async_trait]
pub trait ContentStore: Send + Sync {
    // Identity index
    async fn find_by_source(
        &self,
        kind: EntityKind,
        source_id: i64,
        tenant: u32,
    ) -> Result<Option<i64>>;

    // Entries
    async fn create_entry(&self, draft: &EntryDraft) -> Result<i64>;
    async fn update_entry(&self, local_id: i64, draft: &EntryDraft) -> Result<()>;
    async fn set_entry_body(&self, local_id: i64, body: &str) -> Result<()>;
    async fn entry_kind(&self, local_id: i64) -> Result<Option<String>>;
    async fn set_entry_meta(&self, local_id: i64, key: &str, value: &MetaValue) -> Result<()>;
    /// Re-apply source modification timestamps after a write.
    async fn set_modified_times(
        &self,
        local_id: i64,
        local: Option<NaiveDateTime>,
        utc: Option<DateTime<Utc>>,
    ) -> Result<()>;

    // Terms
    async fn taxonomy_exists(&self, taxonomy: &str) -> Result<bool>;
    /// Taxonomies registered for an entry kind.
    async fn taxonomies_for_kind(&self, kind: &str) -> Result<Vec<String>>;
    async fn find_term_by_slug(&self, taxonomy: &str, slug: &str) -> Result<Option<i64>>;
    async fn find_term_by_name(&self, taxonomy: &str, name: &str) -> Result<Option<i64>>;
    async fn create_term(&self, term: &TermWrite) -> Result<i64>;
    async fn update_term(&self, local_id: i64, term: &TermWrite) -> Result<()>;
    async fn set_term_meta(&self, local_id: i64, key: &str, value: &MetaValue) -> Result<()>;
    /// Assign terms to an entry; `append` keeps existing assignments.
    async fn assign_terms(
        &self,
        entry_id: i64,
        taxonomy: &str,
        term_ids: &[i64],
        append: bool,
    ) -> Result<()>;
    async fn remove_terms(&self, entry_id: i64, taxonomy: &str, term_ids: &[i64]) -> Result<()>;

    // Users
    async fn find_user_by_login(&self, login: &str) -> Result<Option<i64>>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<i64>>;
    async fn create_user(&self, user: &UserWrite) -> Result<i64>;
    /// Refresh an existing account. An empty `login`/`secret` leaves the
    /// stored value untouched (imports never rotate local credentials).
    async fn update_user(&self, local_id: i64, user: &UserWrite) -> Result<()>;
    async fn set_user_meta(&self, local_id: i64, key: &str, value: &MetaValue) -> Result<()>;

    // Attachments
    async fn find_attachment_by_path(&self, logical_path: &str) -> Result<Option<i64>>;
    async fn register_attachment(&self, attachment: &AttachmentWrite) -> Result<i64>;
    async fn set_attachment_meta(&self, attachment_id: i64, key: &str, value: &MetaValue)
        -> Result<()>;
    async fn set_featured_attachment(&self, entry_id: i64, attachment_id: i64) -> Result<()>;
}

/// Blocking "download to temp file" primitive with a bounded timeout.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download_to_temp(&self, url: &str, timeout: Duration) -> Result<PathBuf>;
}

/// Locates a physical media file among tenant-prefix candidate variants.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// First candidate path that exists, if any.
    async fn locate(&self, candidates: &[String]) -> Result<Option<PathBuf>>;
}

/// Simple key-value persistence supplied by the host (credential blob,
/// run-id counter).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn put_raw(&self, key: &str, value: &str) -> Result<()>;
}

/// Pre-write hook: may mutate the in-flight draft.
pub type PreHook = Arc<dyn Fn(&mut EntryDraft, &SourceRow) -> Result<()> + Send + Sync>;

/// Post-write hook: `(local_id, row, was_update)`.
pub type PostHook = Arc<dyn Fn(i64, &SourceRow, bool) -> Result<()> + Send + Sync>;

/// Post-resolution hook for term imports: `(node, local_id, is_new)`.
pub type TermPostHook = Arc<dyn Fn(&TermNode, i64, bool) -> Result<()> + Send + Sync>;

/// Filesystem-backed media probe rooted at a library base directory.
#[derive(Debug)]
pub struct FsMediaProbe {
    base: PathBuf,
}

impl FsMediaProbe {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The library root this probe searches under.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        self.base.join(relative.trim_start_matches('/'))
    }
}

#[async_trait]
impl MediaProbe for FsMediaProbe {
    async fn locate(&self, candidates: &[String]) -> Result<Option<PathBuf>> {
        for candidate in candidates {
            let path = self.resolve(candidate);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

//! Data model for migration runs.
//!
//! Rows fetched from the remote source are immutable for the duration of a
//! chunk; write payloads (`*Draft`/`*Write`) are what hooks mutate and the
//! content store consumes; summaries are created at run start, mutated
//! throughout, and returned to the caller.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::meta::MetaValue;

/// Meta key carrying the remote id of an imported entity.
pub const META_SOURCE_ID: &str = "_sitegraft_source_id";
/// Meta key carrying the remote tenant of an imported entity.
pub const META_SOURCE_TENANT: &str = "_sitegraft_source_tenant";
/// Meta key carrying the snapshot of all remote metadata at import time.
pub const META_SOURCE_META: &str = "_sitegraft_source_meta";
/// Meta key carrying the remote URL an attachment was resolved from.
pub const META_SOURCE_URL: &str = "_sitegraft_source_url";
/// Meta key carrying the run id of the last invocation that touched an entity.
pub const META_RUN_ID: &str = "_sitegraft_run_id";
/// Meta key carrying the unix time of the last import touch.
pub const META_LAST_UPDATED: &str = "_sitegraft_last_updated";

/// The two identity keys are reserved: arbitrary source metadata of the
/// same name must never overwrite them.
pub const RESERVED_META_KEYS: [&str; 2] = [META_SOURCE_ID, META_SOURCE_TENANT];

/// Entity kinds tracked by the identity mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Entry,
    Term,
    User,
    Attachment,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Entry => "entry",
            EntityKind::Term => "term",
            EntityKind::User => "user",
            EntityKind::Attachment => "attachment",
        };
        f.write_str(s)
    }
}

/// Durable correspondence between a remote entity and its local id.
///
/// For a given `(source_id, source_tenant, kind)` there is at most one
/// `local_id`; links are created on first successful write and never
/// deleted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityLink {
    pub source_id: i64,
    pub source_tenant: u32,
    pub local_id: i64,
    pub kind: EntityKind,
}

/// Policy governing whether an import may create, update, or both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Only create; already-mapped rows are left untouched.
    Insert,
    /// Only refresh; unmapped rows are never created.
    Update,
    /// Create or refresh as needed.
    #[default]
    Upsert,
}

impl WriteMode {
    /// Parse the textual form; anything unknown is a config error.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(WriteMode::Insert),
            "update" => Some(WriteMode::Update),
            "upsert" => Some(WriteMode::Upsert),
            _ => None,
        }
    }
}

/// An entry row fetched from the remote store, metadata attached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRow {
    pub source_id: i64,
    pub tenant: u32,
    pub kind: String,
    pub status: String,
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub slug: String,
    pub created_at: Option<NaiveDateTime>,
    pub created_at_utc: Option<DateTime<Utc>>,
    pub modified_at: Option<NaiveDateTime>,
    pub modified_at_utc: Option<DateTime<Utc>>,
    pub parent_source_id: i64,
    pub author_source_id: i64,
    /// Ordered key → value bag; repeated keys collapse into lists.
    pub metadata: BTreeMap<String, MetaValue>,
}

/// A user row fetched from the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUser {
    pub source_id: i64,
    pub login: String,
    pub email: String,
    pub display_name: String,
    pub nice_name: String,
    pub url: String,
    pub registered_at: Option<NaiveDateTime>,
    /// Opaque legacy credential hash; carried as metadata, never applied
    /// to the local credential slot.
    pub secret_hash: String,
    pub status: i32,
}

/// An attachment row fetched from the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttachment {
    pub source_id: i64,
    pub title: String,
    pub mime: String,
    pub created_at: Option<NaiveDateTime>,
    /// Relative storage path as recorded by the source (tenant-prefixed
    /// form for tenant > 1).
    pub file_path: String,
    /// Derived-size manifest as stored by the source (decoded meta).
    pub manifest: Option<MetaValue>,
    /// Public URL of the original resource.
    pub source_url: String,
}

/// A taxonomy term candidate from the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermNode {
    pub source_term_id: i64,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_source_id: i64,
    pub taxonomy: String,
    pub meta: Vec<(String, MetaValue)>,
}

impl TermNode {
    /// Slug is the dedup key; derive it from the name when absent.
    pub fn effective_slug(&self) -> String {
        if self.slug.is_empty() {
            slugify(&self.name)
        } else {
            self.slug.clone()
        }
    }
}

/// A lightweight term reference attached to an entry (per-row assignment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermRef {
    pub source_term_id: i64,
    pub name: String,
    pub slug: String,
}

/// Terms grouped by taxonomy for one entry.
pub type TermsByTaxonomy = BTreeMap<String, Vec<TermRef>>;

/// A reference to a binary resource discovered in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    /// Explicit foreign-key-style reference, when known.
    pub source_attachment_id: Option<i64>,
    /// Tenant-normalized relative path — the dedup key.
    pub logical_path: String,
    /// The URL as observed in content or metadata.
    pub original_url: String,
}

/// Write payload for a local entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryDraft {
    pub title: String,
    pub body: String,
    pub excerpt: String,
    pub status: String,
    pub kind: String,
    pub slug: String,
    pub created_at: Option<NaiveDateTime>,
    pub created_at_utc: Option<DateTime<Utc>>,
    pub author_local_id: i64,
    pub meta: Vec<(String, MetaValue)>,
}

/// Write payload for a local term.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermWrite {
    pub taxonomy: String,
    pub name: String,
    pub slug: String,
    pub description: String,
    pub parent_local_id: i64,
}

/// Write payload for a local user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserWrite {
    pub login: String,
    pub email: String,
    pub display_name: String,
    pub nice_name: String,
    pub url: String,
    pub registered_at: Option<NaiveDateTime>,
    /// Fresh random secret for created accounts; empty on updates.
    pub secret: String,
}

/// Write payload for a local attachment registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentWrite {
    pub title: String,
    pub mime: String,
    pub logical_path: String,
    pub source_url: String,
    pub created_at: Option<NaiveDateTime>,
    /// Local filesystem path of the file being registered (pre-existing
    /// library file or freshly downloaded temp file).
    pub local_file: std::path::PathBuf,
    pub parent_entry_id: Option<i64>,
}

/// Per-invocation counters for an entry import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: u64,
    pub found: u64,
    pub imported: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: Vec<String>,
    /// source_id → local_id (0 in dry runs).
    pub map: BTreeMap<i64, i64>,
    pub attachments: AttachmentSummary,
    /// Set when the run was aborted by cancellation; everything committed
    /// before the abort stands.
    pub cancelled: bool,
}

/// Per-invocation counters for a term import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermImportSummary {
    pub run_id: u64,
    pub found: u64,
    pub imported: u64,
    pub updated: u64,
    /// source term id → error messages for that term.
    pub errors: BTreeMap<i64, Vec<String>>,
    pub map: BTreeMap<i64, i64>,
}

/// Per-invocation counters for a user import.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserImportSummary {
    pub run_id: u64,
    pub found: u64,
    pub imported: u64,
    pub updated: u64,
    pub errors: BTreeMap<i64, Vec<String>>,
    pub map: BTreeMap<i64, i64>,
}

/// Per-invocation counters for attachment resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttachmentSummary {
    pub discovered: u64,
    pub registered: u64,
    pub reused: u64,
    pub rewritten: u64,
    pub thumbnails_set: u64,
    /// Unresolvable references: `(source attachment id if known, path or URL)`.
    pub missing: Vec<(Option<i64>, String)>,
    pub errors: Vec<String>,
}

/// Derive a slug from free text: lowercase, alphanumerics kept, runs of
/// anything else collapsed to single hyphens.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            for lc in c.to_lowercase() {
                out.push(lc);
            }
        } else {
            pending_hyphen = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_mode_parse() {
        assert_eq!(WriteMode::parse("insert"), Some(WriteMode::Insert));
        assert_eq!(WriteMode::parse("update"), Some(WriteMode::Update));
        assert_eq!(WriteMode::parse("upsert"), Some(WriteMode::Upsert));
        assert_eq!(WriteMode::parse("replace"), None);
        assert_eq!(WriteMode::parse(""), None);
    }

    #[test]
    fn test_write_mode_default_is_upsert() {
        assert_eq!(WriteMode::default(), WriteMode::Upsert);
    }

    #[test]
    fn test_entity_kind_display() {
        assert_eq!(EntityKind::Entry.to_string(), "entry");
        assert_eq!(EntityKind::Attachment.to_string(), "attachment");
    }

    #[test]
    fn test_slugify_basic() {
        assert_eq!(slugify("Hello World"), "hello-world");
        assert_eq!(slugify("  Multiple   spaces  "), "multiple-spaces");
        assert_eq!(slugify("Caf\u{e9} & Bar"), "caf\u{e9}-bar");
    }

    #[test]
    fn test_slugify_edges() {
        assert_eq!(slugify(""), "");
        assert_eq!(slugify("---"), "");
        assert_eq!(slugify("a"), "a");
    }

    #[test]
    fn test_effective_slug_falls_back_to_name() {
        let node = TermNode {
            source_term_id: 1,
            name: "Local News".to_string(),
            slug: String::new(),
            description: String::new(),
            parent_source_id: 0,
            taxonomy: "category".to_string(),
            meta: Vec::new(),
        };
        assert_eq!(node.effective_slug(), "local-news");

        let with_slug = TermNode {
            slug: "noticias".to_string(),
            ..node
        };
        assert_eq!(with_slug.effective_slug(), "noticias");
    }

    #[test]
    fn test_reserved_meta_keys() {
        assert!(RESERVED_META_KEYS.contains(&META_SOURCE_ID));
        assert!(RESERVED_META_KEYS.contains(&META_SOURCE_TENANT));
        assert!(!RESERVED_META_KEYS.contains(&META_SOURCE_META));
    }

    #[test]
    fn test_run_summary_default() {
        let summary = RunSummary::default();
        assert_eq!(summary.found, 0);
        assert_eq!(summary.imported, 0);
        assert!(summary.map.is_empty());
        assert!(!summary.cancelled);
    }
}

//! # sitegraft-engine
//!
//! Importers and run orchestration for the sitegraft migration engine:
//! the identity mapper (idempotency backbone), the hierarchical term
//! importer, the attachment resolver, the user importer, and the entry
//! importer that drives end-to-end runs.
//!
//! Every component takes its collaborators (remote source, content store,
//! downloader, media probe, key-value persistence) as injected trait
//! objects; see `sitegraft_core::traits`.

pub mod credentials;
pub mod identity;
pub mod import;
pub mod media;
pub mod run;
pub mod terms;
pub mod testing;
pub mod transport;
pub mod users;

pub use credentials::{CredentialStore, CREDENTIALS_KEY};
pub use identity::IdentityMapper;
pub use import::{
    named_terms, AttachmentImportOptions, Importer, RunOptions, DEFAULT_CHUNK, META_LAST_EDITOR,
};
pub use media::{
    build_url_map, extract_image_urls, logical_path_from_url, normalize_logical_path,
    rewrite_content, AttachmentResolver, MediaConfig, ResolvedMedia,
};
pub use run::{RunCounter, RUN_COUNTER_KEY};
pub use terms::{TermImportOptions, TermImporter, DEFAULT_TERM_CHUNK};
pub use transport::HttpDownloader;
pub use users::{
    normalize_user_meta_for_target, UserImportOptions, UserImporter, DEFAULT_USER_CHUNK,
    META_SOURCE_SECRET_HASH,
};

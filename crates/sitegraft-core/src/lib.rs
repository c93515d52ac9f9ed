//! # sitegraft-core
//!
//! Core types, traits, and abstractions for the sitegraft migration engine.
//!
//! This crate provides the data model, the fetch filter, the loosely-typed
//! metadata value union, and the trait seams (remote source, content store,
//! downloader, key-value persistence) that the other sitegraft crates
//! depend on.

pub mod error;
pub mod filter;
pub mod logging;
pub mod meta;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use filter::{
    FetchFilter, Order, OrderBy, TaxRelation, TaxonomyClause, TermField, TimeBound, ANY_STATUSES,
    STATUS_ANY, WRITABLE_STATUSES,
};
pub use meta::{decode_meta, MetaValue};
pub use models::*;
pub use traits::{
    ContentStore, Downloader, FsMediaProbe, KeyValueStore, MediaProbe, PostHook, PreHook,
    RemoteSource, TermPostHook, TermSelection, UserSelection,
};

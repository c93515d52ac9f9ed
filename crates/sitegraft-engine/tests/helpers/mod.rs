//! Shared fixtures for the engine integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};

use sitegraft_core::{
    ContentStore, EntryDraft, MetaValue, SourceAttachment, SourceRow, META_SOURCE_ID,
    META_SOURCE_TENANT,
};
use sitegraft_engine::testing::{FakeDownloader, MemoryKv, MemoryRemote, MemoryStore, StaticProbe};
use sitegraft_engine::Importer;

/// An article row with sane defaults and a deterministic modified stamp.
pub fn article_row(id: i64, tenant: u32) -> SourceRow {
    SourceRow {
        source_id: id,
        tenant,
        kind: "article".to_string(),
        status: "published".to_string(),
        title: format!("Article {id}"),
        body: format!("<p>Body of {id}</p>"),
        excerpt: String::new(),
        slug: format!("article-{id}"),
        created_at: None,
        created_at_utc: Some(Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()),
        modified_at: None,
        modified_at_utc: Some(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
        parent_source_id: 0,
        author_source_id: 0,
        metadata: BTreeMap::new(),
    }
}

pub fn attachment(id: i64, file_path: &str, url: &str) -> SourceAttachment {
    SourceAttachment {
        source_id: id,
        title: String::new(),
        mime: "image/jpeg".to_string(),
        created_at: None,
        file_path: file_path.to_string(),
        manifest: None,
        source_url: url.to_string(),
    }
}

/// Seed the store with an entry already linked to `(source_id, tenant)`.
pub async fn seed_mapped_entry(store: &MemoryStore, source_id: i64, tenant: u32) -> i64 {
    let local = store
        .create_entry(&EntryDraft {
            title: format!("Existing {source_id}"),
            kind: "article".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    store
        .set_entry_meta(local, META_SOURCE_ID, &MetaValue::from(source_id))
        .await
        .unwrap();
    store
        .set_entry_meta(
            local,
            META_SOURCE_TENANT,
            &MetaValue::scalar(tenant.to_string()),
        )
        .await
        .unwrap();
    local
}

/// Importer wired to in-memory fixtures.
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub downloader: Arc<FakeDownloader>,
    pub importer: Importer,
}

pub fn fixture(remote: MemoryRemote, store: Arc<MemoryStore>) -> Fixture {
    fixture_with_media(remote, store, StaticProbe::default(), FakeDownloader::default())
}

pub fn fixture_with_media(
    remote: MemoryRemote,
    store: Arc<MemoryStore>,
    probe: StaticProbe,
    downloader: FakeDownloader,
) -> Fixture {
    let downloader = Arc::new(downloader);
    let importer = Importer::new(
        Arc::new(remote),
        store.clone(),
        downloader.clone(),
        Arc::new(probe),
        Arc::new(MemoryKv::new()),
    );
    Fixture {
        store,
        downloader,
        importer,
    }
}

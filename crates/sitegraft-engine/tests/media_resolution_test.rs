//! Attachment dedup, registration, URL rewriting, and featured-resource
//! wiring through full import runs.

mod helpers;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use helpers::{article_row, attachment, fixture_with_media};
use sitegraft_core::{ContentStore, FetchFilter, MetaValue};
use sitegraft_engine::testing::{FakeDownloader, MemoryRemote, MemoryStore, StaticProbe};
use sitegraft_engine::{AttachmentImportOptions, MediaConfig, RunOptions};

fn media_config() -> MediaConfig {
    MediaConfig {
        old_base_url: "http://old.example/uploads".to_string(),
        new_base_url: "https://new.example/wp-content/uploads".to_string(),
        ..Default::default()
    }
}

fn filter(tenant: u32) -> FetchFilter {
    FetchFilter {
        tenant: Some(tenant),
        kinds: vec!["article".to_string()],
        statuses: vec!["published".to_string()],
        limit: 50,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_same_file_by_id_and_url_resolves_once() {
    let store = Arc::new(MemoryStore::new());

    // Row 1 references the file by explicit id; row 2 embeds its URL.
    let mut row1 = article_row(1, 3);
    row1.metadata
        .insert("_featured_id".to_string(), MetaValue::scalar("500"));
    let mut row2 = article_row(2, 3);
    row2.body = r#"<img src="http://old.example/uploads/sites/3/2024/photo.jpg">"#.to_string();

    let mut remote = MemoryRemote::new();
    remote.rows = vec![row1, row2];
    remote.attachments = vec![attachment(
        500,
        "sites/3/2024/photo.jpg",
        "http://old.example/uploads/sites/3/2024/photo.jpg",
    )];

    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::with(&["sites/3/2024/photo.jpg"]),
        FakeDownloader::default(),
    );

    let summary = fx
        .importer
        .run_import(&RunOptions {
            filter: filter(3),
            media: media_config(),
            ..Default::default()
        })
        .await
        .unwrap();

    // One physical resource, one registration, one reuse.
    assert_eq!(summary.attachments.registered, 1);
    assert_eq!(summary.attachments.reused, 1);
    assert_eq!(fx.store.attachments_registered.load(Ordering::SeqCst), 1);

    let local = fx
        .store
        .find_attachment_by_path("2024/photo.jpg")
        .await
        .unwrap()
        .expect("registered under the logical path");
    assert_eq!(fx.store.attachment(local).unwrap().logical_path, "2024/photo.jpg");
}

#[tokio::test]
async fn test_repeated_run_reuses_registered_attachment() {
    let store = Arc::new(MemoryStore::new());
    let mut row = article_row(1, 3);
    row.metadata
        .insert("_featured_id".to_string(), MetaValue::scalar("500"));

    let mut remote = MemoryRemote::new();
    remote.rows = vec![row];
    remote.attachments = vec![attachment(
        500,
        "sites/3/2024/photo.jpg",
        "http://old.example/uploads/sites/3/2024/photo.jpg",
    )];

    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::with(&["sites/3/2024/photo.jpg"]),
        FakeDownloader::default(),
    );

    let opts = RunOptions {
        filter: filter(3),
        media: media_config(),
        ..Default::default()
    };
    let first = fx.importer.run_import(&opts).await.unwrap();
    let second = fx.importer.run_import(&opts).await.unwrap();

    assert_eq!(first.attachments.registered, 1);
    assert_eq!(second.attachments.registered, 0);
    assert_eq!(second.attachments.reused, 1);
    assert_eq!(fx.store.attachments_registered.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_url_rewrite_covers_every_legacy_shape() {
    let store = Arc::new(MemoryStore::new());
    let mut row = article_row(1, 3);
    row.body = concat!(
        r#"<img src="http://old.example/sites/3/uploads/x.jpg">"#,
        r#"<img src="//old.example/sites/3/uploads/x.jpg">"#,
        r#"<img src="http://old.example/uploads/x.jpg">"#,
    )
    .to_string();

    let mut remote = MemoryRemote::new();
    remote.rows = vec![row];

    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::with(&["x.jpg"]),
        FakeDownloader::default(),
    );

    let summary = fx
        .importer
        .run_import(&RunOptions {
            filter: filter(3),
            media: media_config(),
            ..Default::default()
        })
        .await
        .unwrap();

    let local = summary.map[&1];
    let body = fx.store.entry(local).unwrap().body;
    assert!(!body.contains("old.example"));
    assert_eq!(
        body.matches("https://new.example/wp-content/uploads/x.jpg")
            .count(),
        3
    );
    assert_eq!(summary.attachments.rewritten, 1);
}

#[tokio::test]
async fn test_missing_file_reported_not_fatal() {
    let store = Arc::new(MemoryStore::new());
    let mut row = article_row(1, 3);
    row.metadata
        .insert("_featured_id".to_string(), MetaValue::scalar("500"));

    let mut remote = MemoryRemote::new();
    remote.rows = vec![row];
    remote.attachments = vec![attachment(500, "sites/3/2024/gone.jpg", "")];

    // Neither the probe nor the downloader can produce the file.
    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::default(),
        FakeDownloader::default(),
    );

    let summary = fx
        .importer
        .run_import(&RunOptions {
            filter: filter(3),
            media: media_config(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.imported, 1);
    assert_eq!(summary.attachments.registered, 0);
    assert_eq!(summary.attachments.missing.len(), 1);
    assert_eq!(summary.attachments.missing[0].0, Some(500));
}

#[tokio::test]
async fn test_download_fallback_when_file_not_in_library() {
    let store = Arc::new(MemoryStore::new());
    let mut row = article_row(1, 3);
    row.metadata
        .insert("_featured_id".to_string(), MetaValue::scalar("500"));

    let url = "http://old.example/uploads/sites/3/2024/photo.jpg";
    let mut remote = MemoryRemote::new();
    remote.rows = vec![row];
    remote.attachments = vec![attachment(500, "sites/3/2024/photo.jpg", url)];

    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::default(),
        FakeDownloader::with(&[url]),
    );

    let summary = fx
        .importer
        .run_import(&RunOptions {
            filter: filter(3),
            media: media_config(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.attachments.registered, 1);
    assert_eq!(fx.downloader.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_featured_resource_set_on_entry() {
    let store = Arc::new(MemoryStore::new());
    let mut row = article_row(1, 3);
    row.metadata
        .insert("_featured_id".to_string(), MetaValue::scalar("500"));

    let mut remote = MemoryRemote::new();
    remote.rows = vec![row];
    remote.attachments = vec![attachment(
        500,
        "sites/3/2024/photo.jpg",
        "http://old.example/uploads/sites/3/2024/photo.jpg",
    )];

    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::with(&["sites/3/2024/photo.jpg"]),
        FakeDownloader::default(),
    );

    let summary = fx
        .importer
        .run_import(&RunOptions {
            filter: filter(3),
            media: media_config(),
            ..Default::default()
        })
        .await
        .unwrap();

    let local = summary.map[&1];
    let attachment_local = fx
        .store
        .find_attachment_by_path("2024/photo.jpg")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fx.store.featured(local), Some(attachment_local));
    assert_eq!(summary.attachments.thumbnails_set, 1);
}

#[tokio::test]
async fn test_media_disabled_leaves_content_alone() {
    let store = Arc::new(MemoryStore::new());
    let mut row = article_row(1, 3);
    row.body = r#"<img src="http://old.example/uploads/x.jpg">"#.to_string();

    let mut remote = MemoryRemote::new();
    remote.rows = vec![row];

    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::with(&["x.jpg"]),
        FakeDownloader::default(),
    );

    let summary = fx
        .importer
        .run_import(&RunOptions {
            filter: filter(3),
            with_media: false,
            media: media_config(),
            ..Default::default()
        })
        .await
        .unwrap();

    let local = summary.map[&1];
    assert!(fx.store.entry(local).unwrap().body.contains("old.example"));
    assert_eq!(summary.attachments.discovered, 0);
}

#[tokio::test]
async fn test_standalone_attachment_import() {
    let store = Arc::new(MemoryStore::new());
    let mut remote = MemoryRemote::new();
    remote.attachments = vec![
        attachment(
            500,
            "sites/3/2024/a.jpg",
            "http://old.example/uploads/sites/3/2024/a.jpg",
        ),
        attachment(
            501,
            "sites/3/2024/b.jpg",
            "http://old.example/uploads/sites/3/2024/b.jpg",
        ),
    ];

    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::with(&["sites/3/2024/a.jpg", "sites/3/2024/b.jpg"]),
        FakeDownloader::default(),
    );

    let summary = fx
        .importer
        .import_attachments(&AttachmentImportOptions {
            tenant: 3,
            ids: vec![500, 501, 999],
            media: media_config(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.registered, 2);
    assert_eq!(summary.missing.len(), 1);
    assert_eq!(summary.missing[0].0, Some(999));
}

#[tokio::test]
async fn test_dry_run_registers_nothing_but_resolves() {
    let store = Arc::new(MemoryStore::new());
    let mut row = article_row(1, 3);
    row.metadata
        .insert("_featured_id".to_string(), MetaValue::scalar("500"));

    let mut remote = MemoryRemote::new();
    remote.rows = vec![row];
    remote.attachments = vec![attachment(
        500,
        "sites/3/2024/photo.jpg",
        "http://old.example/uploads/sites/3/2024/photo.jpg",
    )];

    let fx = fixture_with_media(
        remote,
        store,
        StaticProbe::with(&["sites/3/2024/photo.jpg"]),
        FakeDownloader::default(),
    );

    let summary = fx
        .importer
        .run_import(&RunOptions {
            filter: filter(3),
            media: media_config(),
            dry_run: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(summary.attachments.discovered, 1);
    assert_eq!(summary.attachments.registered, 0);
    assert_eq!(fx.store.attachments_registered.load(Ordering::SeqCst), 0);
}

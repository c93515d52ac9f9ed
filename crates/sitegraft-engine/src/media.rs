//! Attachment discovery, dedup, registration, and URL rewriting.
//!
//! The dedup invariant: one physical resource maps to one local resource,
//! regardless of how many rows reference it or whether they reference it
//! by numeric id or by embedded URL. The **logical path** — the
//! tenant-normalized relative file path — is the dedup key.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use sitegraft_core::{
    AttachmentRef, AttachmentSummary, AttachmentWrite, ContentStore, Downloader, EntityKind,
    MediaProbe, MetaValue, RemoteSource, Result, SourceAttachment, SourceRow, META_RUN_ID,
    META_SOURCE_ID, META_SOURCE_TENANT, META_SOURCE_URL,
};

use crate::identity::IdentityMapper;

/// Default bounded transfer timeout for one attachment download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Media resolution settings for one run.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Base URL the legacy source serves media from.
    pub old_base_url: String,
    /// Base URL of the local media library.
    pub new_base_url: String,
    /// Metadata keys carrying explicit attachment id references.
    pub featured_keys: Vec<String>,
    /// Add a tenant-scoped filename disambiguator when importing into a
    /// shared single-tenant target.
    pub scope_filenames: bool,
    /// Transfer timeout for one download.
    pub download_timeout: Duration,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            old_base_url: String::new(),
            new_base_url: String::new(),
            featured_keys: vec!["_featured_id".to_string()],
            scope_filenames: false,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
        }
    }
}

/// Outcome of resolving one batch.
#[derive(Debug, Default)]
pub struct ResolvedMedia {
    /// source attachment id → local attachment id.
    pub map: BTreeMap<i64, i64>,
    /// Ordered substitution table for the content rewrite pass.
    pub url_map: Vec<(String, String)>,
    pub summary: AttachmentSummary,
}

fn src_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\ssrc=["']([^"']+\.(?:png|jpe?g|gif|webp|svg))["']"#)
            .expect("valid regex")
    })
}

fn srcset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)\ssrcset=["']([^"']+)["']"#).expect("valid regex"))
}

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)<a[^>]+href=["']([^"']+\.(?:png|jpe?g|gif|webp|svg))["']"#)
            .expect("valid regex")
    })
}

fn image_ext_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\.(png|jpe?g|gif|webp|svg)(\?.*)?$").expect("valid regex")
    })
}

/// Extract image-like URLs from rich-text content: `src`, `srcset`
/// entries, and anchor `href`s pointing at image files.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut push = |u: &str| {
        let u = u.trim();
        if !u.is_empty() && seen.insert(u.to_string()) {
            urls.push(u.to_string());
        }
    };

    for cap in src_regex().captures_iter(html) {
        push(&cap[1]);
    }

    for cap in srcset_regex().captures_iter(html) {
        for entry in cap[1].split(',') {
            if let Some(url) = entry.trim().split_whitespace().next() {
                if image_ext_regex().is_match(url) {
                    push(url);
                }
            }
        }
    }

    for cap in href_regex().captures_iter(html) {
        push(&cap[1]);
    }

    urls
}

/// Normalize a tenant-prefixed legacy path into the tenant-neutral layout.
///
/// Strips a leading `sites/<tenant>/` segment; optionally re-adds a
/// tenant-scoped filename disambiguator (`x.jpg` → `x-s3.jpg`) so two
/// tenants' same-named files cannot collide in a shared target.
pub fn normalize_logical_path(path: &str, tenant: u32, scope_filenames: bool) -> String {
    let mut p = path.trim_start_matches('/').to_string();

    let tenant_prefix = format!("sites/{tenant}/");
    if let Some(rest) = p.strip_prefix(&tenant_prefix) {
        p = rest.to_string();
    }

    if scope_filenames && tenant > 1 {
        if let Some(dot) = p.rfind('.') {
            let slash = p.rfind('/').map_or(0, |i| i + 1);
            if dot > slash {
                p = format!("{}-s{}{}", &p[..dot], tenant, &p[dot..]);
            }
        }
    }

    p
}

/// Derive the logical path from a media URL: everything after the
/// `uploads/` segment, tenant-normalized.
pub fn logical_path_from_url(url: &str, tenant: u32, scope_filenames: bool) -> Option<String> {
    let path = url.splitn(2, '?').next().unwrap_or(url);
    let rel = path.split_once("uploads/").map(|(_, rest)| rest)?;
    if rel.is_empty() {
        return None;
    }
    Some(normalize_logical_path(rel, tenant, scope_filenames))
}

fn protocol_relative(url: &str) -> Option<String> {
    url.strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .map(|rest| format!("//{rest}"))
}

/// Build the URL substitution table for one old-base/new-base pair.
///
/// Covers absolute and protocol-relative variants of both the
/// tenant-suffixed (`origin/sites/<t>/path`) and tenant-neutral old-base
/// forms, so a single substitution pass rewrites every observed legacy
/// URL shape.
pub fn build_url_map(old_base: &str, new_base: &str, tenant: u32) -> Vec<(String, String)> {
    let old = old_base.trim_end_matches('/');
    let new = new_base.trim_end_matches('/');

    if old.is_empty() || new.is_empty() || old == new {
        return Vec::new();
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut push = |key: String| {
        if !pairs.iter().any(|(k, _)| k == &key) {
            pairs.push((key, new.to_string()));
        }
    };

    if tenant > 1 {
        // The tenant variant inserts the sites segment after the origin.
        let tenant_form = match old.find("://").map(|i| i + 3) {
            Some(host_start) => match old[host_start..].find('/') {
                Some(path_at) => {
                    let split = host_start + path_at;
                    format!("{}/sites/{}{}", &old[..split], tenant, &old[split..])
                }
                None => format!("{old}/sites/{tenant}"),
            },
            None => format!("{old}/sites/{tenant}"),
        };
        if let Some(rel) = protocol_relative(&tenant_form) {
            push(rel);
        }
        push(tenant_form);
    }

    if let Some(rel) = protocol_relative(old) {
        push(rel);
    }
    push(old.to_string());

    pairs
}

/// Single-pass, longest-match-first string substitution over content.
pub fn rewrite_content(html: &str, map: &[(String, String)]) -> String {
    if html.is_empty() || map.is_empty() {
        return html.to_string();
    }

    let mut keys: Vec<&(String, String)> = map.iter().filter(|(k, _)| !k.is_empty()).collect();
    keys.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = String::with_capacity(html.len());
    let mut i = 0;
    'outer: while i < html.len() {
        let rest = &html[i..];
        for (key, value) in &keys {
            if rest.starts_with(key.as_str()) {
                out.push_str(value);
                i += key.len();
                continue 'outer;
            }
        }
        let ch = rest.chars().next().expect("in-bounds char");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn mime_from_path(path: &str) -> &'static str {
    let lower = path.to_ascii_lowercase();
    match lower.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

fn title_from_path(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(name)
        .to_string()
}

/// Discovers, deduplicates, and registers binary resources for a batch.
pub struct AttachmentResolver {
    remote: Arc<dyn RemoteSource>,
    store: Arc<dyn ContentStore>,
    mapper: Arc<IdentityMapper>,
    downloader: Arc<dyn Downloader>,
    probe: Arc<dyn MediaProbe>,
    config: MediaConfig,
}

impl AttachmentResolver {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: Arc<dyn ContentStore>,
        mapper: Arc<IdentityMapper>,
        downloader: Arc<dyn Downloader>,
        probe: Arc<dyn MediaProbe>,
        config: MediaConfig,
    ) -> Self {
        Self {
            remote,
            store,
            mapper,
            downloader,
            probe,
            config,
        }
    }

    /// Scan a batch for attachment references: explicit id references in
    /// the configured metadata keys, path-like metadata values, and URLs
    /// embedded in rich-text bodies.
    pub fn discover(&self, rows: &[SourceRow], tenant: u32) -> Vec<AttachmentRef> {
        let mut refs: Vec<AttachmentRef> = Vec::new();
        let mut seen_ids: HashSet<i64> = HashSet::new();
        let mut seen_paths: HashSet<String> = HashSet::new();

        for row in rows {
            for key in &self.config.featured_keys {
                if let Some(id) = row.metadata.get(key).and_then(|v| v.first_scalar()) {
                    if let Ok(id) = id.trim().parse::<i64>() {
                        if id > 0 && seen_ids.insert(id) {
                            refs.push(AttachmentRef {
                                source_attachment_id: Some(id),
                                logical_path: String::new(),
                                original_url: String::new(),
                            });
                        }
                    }
                }
            }

            for value in row.metadata.values() {
                if let Some(text) = value.as_str() {
                    if text.contains("uploads/") && image_ext_regex().is_match(text) {
                        if let Some(logical) = logical_path_from_url(
                            text,
                            tenant,
                            self.config.scope_filenames,
                        ) {
                            if seen_paths.insert(logical.clone()) {
                                refs.push(AttachmentRef {
                                    source_attachment_id: None,
                                    logical_path: logical,
                                    original_url: text.to_string(),
                                });
                            }
                        }
                    }
                }
            }

            for url in extract_image_urls(&row.body) {
                if let Some(logical) =
                    logical_path_from_url(&url, tenant, self.config.scope_filenames)
                {
                    if seen_paths.insert(logical.clone()) {
                        refs.push(AttachmentRef {
                            source_attachment_id: None,
                            logical_path: logical,
                            original_url: url,
                        });
                    }
                }
            }
        }

        refs
    }

    /// Resolve a batch: dedup against the local library, register what is
    /// new, and produce the URL substitution table.
    pub async fn resolve(
        &self,
        rows: &[SourceRow],
        tenant: u32,
        dry_run: bool,
        run_id: u64,
    ) -> Result<ResolvedMedia> {
        let mut out = ResolvedMedia {
            url_map: build_url_map(&self.config.old_base_url, &self.config.new_base_url, tenant),
            ..Default::default()
        };

        let refs = self.discover(rows, tenant);
        out.summary.discovered = refs.len() as u64;
        if refs.is_empty() {
            return Ok(out);
        }

        let id_refs: Vec<i64> = refs.iter().filter_map(|r| r.source_attachment_id).collect();
        self.resolve_id_refs(&id_refs, tenant, dry_run, run_id, &mut out)
            .await?;

        // Path/URL references.
        for r in refs.iter().filter(|r| r.source_attachment_id.is_none()) {
            match self.resolve_path_ref(r, dry_run, &mut out).await {
                Ok(()) => {}
                Err(e) => {
                    out.summary
                        .errors
                        .push(format!("attachment {}: {e}", r.logical_path));
                }
            }
        }

        debug!(
            subsystem = "engine",
            component = "media",
            op = "resolve",
            discovered = out.summary.discovered,
            registered = out.summary.registered,
            reused = out.summary.reused,
            missing = out.summary.missing.len(),
            "Resolved attachment batch"
        );
        Ok(out)
    }

    /// Resolve an explicit set of source attachment ids, skipping content
    /// discovery. Backs the standalone attachment import operation.
    pub async fn resolve_ids(
        &self,
        ids: &[i64],
        tenant: u32,
        dry_run: bool,
        run_id: u64,
    ) -> Result<ResolvedMedia> {
        let mut out = ResolvedMedia {
            url_map: build_url_map(&self.config.old_base_url, &self.config.new_base_url, tenant),
            ..Default::default()
        };
        out.summary.discovered = ids.len() as u64;
        self.resolve_id_refs(ids, tenant, dry_run, run_id, &mut out)
            .await?;
        Ok(out)
    }

    /// Resolve numeric-id references: identity index first, then remote
    /// fetch and registration for the rest.
    async fn resolve_id_refs(
        &self,
        ids: &[i64],
        tenant: u32,
        dry_run: bool,
        run_id: u64,
        out: &mut ResolvedMedia,
    ) -> Result<()> {
        let mut unmapped: Vec<i64> = Vec::new();
        for id in ids {
            match self
                .mapper
                .find_local(*id, tenant, EntityKind::Attachment)
                .await?
            {
                Some(local) => {
                    out.map.insert(*id, local);
                    out.summary.reused += 1;
                }
                None => unmapped.push(*id),
            }
        }

        if unmapped.is_empty() {
            return Ok(());
        }

        let remote_rows = self
            .remote
            .fetch_attachments(&unmapped, Some(tenant), false)
            .await?;
        let fetched: HashSet<i64> = remote_rows.iter().map(|a| a.source_id).collect();
        for id in &unmapped {
            if !fetched.contains(id) {
                out.summary
                    .missing
                    .push((Some(*id), format!("attachment {id} not found remotely")));
            }
        }

        for attachment in &remote_rows {
            if let Err(e) = self
                .resolve_remote_attachment(attachment, tenant, dry_run, run_id, out)
                .await
            {
                warn!(
                    subsystem = "engine",
                    component = "media",
                    source_id = attachment.source_id,
                    error = %e,
                    "Attachment resolution failed"
                );
                out.summary
                    .errors
                    .push(format!("attachment {}: {e}", attachment.source_id));
            }
        }
        Ok(())
    }

    /// Candidate physical locations for a file: the path as recorded, the
    /// tenant-prefixed variant, and the tenant-neutral logical path.
    fn path_candidates(&self, recorded: &str, logical: &str, tenant: u32) -> Vec<String> {
        let mut candidates = vec![recorded.trim_start_matches('/').to_string()];
        if tenant > 1 {
            candidates.push(format!("sites/{tenant}/{logical}"));
        }
        candidates.push(logical.to_string());

        let mut seen = HashSet::new();
        candidates.retain(|c| !c.is_empty() && seen.insert(c.clone()));
        candidates
    }

    async fn resolve_remote_attachment(
        &self,
        attachment: &SourceAttachment,
        tenant: u32,
        dry_run: bool,
        run_id: u64,
        out: &mut ResolvedMedia,
    ) -> Result<()> {
        let recorded = if attachment.file_path.is_empty() {
            logical_path_from_url(&attachment.source_url, tenant, false).unwrap_or_default()
        } else {
            attachment.file_path.clone()
        };
        if recorded.is_empty() {
            out.summary.missing.push((
                Some(attachment.source_id),
                "no recorded file path".to_string(),
            ));
            return Ok(());
        }

        let logical =
            normalize_logical_path(&recorded, tenant, self.config.scope_filenames);

        // Dedup: an existing resource at the logical path wins.
        if let Some(local) = self.store.find_attachment_by_path(&logical).await? {
            out.map.insert(attachment.source_id, local);
            out.summary.reused += 1;
            self.push_rewrite(&attachment.source_url, &logical, out);
            if !dry_run {
                self.stamp_attachment(local, Some(attachment), tenant, run_id)
                    .await?;
            }
            self.mapper
                .record_link(attachment.source_id, tenant, EntityKind::Attachment, local)
                .await;
            return Ok(());
        }

        if dry_run {
            self.push_rewrite(&attachment.source_url, &logical, out);
            return Ok(());
        }

        let candidates = self.path_candidates(&recorded, &logical, tenant);
        let local_file = match self.probe.locate(&candidates).await? {
            Some(path) => path,
            None if !attachment.source_url.is_empty() => {
                match self
                    .downloader
                    .download_to_temp(&attachment.source_url, self.config.download_timeout)
                    .await
                {
                    Ok(path) => path,
                    Err(e) => {
                        out.summary.missing.push((
                            Some(attachment.source_id),
                            format!("{recorded} ({e})"),
                        ));
                        return Ok(());
                    }
                }
            }
            None => {
                out.summary
                    .missing
                    .push((Some(attachment.source_id), recorded.clone()));
                return Ok(());
            }
        };

        let write = AttachmentWrite {
            title: if attachment.title.is_empty() {
                title_from_path(&logical)
            } else {
                attachment.title.clone()
            },
            mime: if attachment.mime.is_empty() {
                mime_from_path(&logical).to_string()
            } else {
                attachment.mime.clone()
            },
            logical_path: logical.clone(),
            source_url: attachment.source_url.clone(),
            created_at: attachment.created_at,
            local_file,
            parent_entry_id: None,
        };

        let local = self.store.register_attachment(&write).await?;
        out.summary.registered += 1;
        out.map.insert(attachment.source_id, local);
        self.push_rewrite(&attachment.source_url, &logical, out);
        self.stamp_attachment(local, Some(attachment), tenant, run_id)
            .await?;
        self.mapper
            .record_link(attachment.source_id, tenant, EntityKind::Attachment, local)
            .await;
        Ok(())
    }

    async fn resolve_path_ref(
        &self,
        r: &AttachmentRef,
        dry_run: bool,
        out: &mut ResolvedMedia,
    ) -> Result<()> {
        if self
            .store
            .find_attachment_by_path(&r.logical_path)
            .await?
            .is_some()
        {
            out.summary.reused += 1;
            self.push_rewrite(&r.original_url, &r.logical_path, out);
            return Ok(());
        }

        if dry_run {
            self.push_rewrite(&r.original_url, &r.logical_path, out);
            return Ok(());
        }

        let candidates = vec![r.logical_path.clone()];
        let local_file = match self.probe.locate(&candidates).await? {
            Some(path) => path,
            None if !r.original_url.is_empty() => {
                match self
                    .downloader
                    .download_to_temp(&r.original_url, self.config.download_timeout)
                    .await
                {
                    Ok(path) => path,
                    Err(_) => {
                        out.summary.missing.push((None, r.original_url.clone()));
                        return Ok(());
                    }
                }
            }
            None => {
                out.summary.missing.push((None, r.logical_path.clone()));
                return Ok(());
            }
        };

        let write = AttachmentWrite {
            title: title_from_path(&r.logical_path),
            mime: mime_from_path(&r.logical_path).to_string(),
            logical_path: r.logical_path.clone(),
            source_url: r.original_url.clone(),
            created_at: None,
            local_file,
            parent_entry_id: None,
        };
        let local = self.store.register_attachment(&write).await?;
        out.summary.registered += 1;
        if !r.original_url.is_empty() {
            self.store
                .set_attachment_meta(local, META_SOURCE_URL, &MetaValue::scalar(&r.original_url))
                .await?;
        }
        self.push_rewrite(&r.original_url, &r.logical_path, out);
        Ok(())
    }

    /// Identity and audit metadata for a registered/reused attachment.
    async fn stamp_attachment(
        &self,
        local: i64,
        attachment: Option<&SourceAttachment>,
        tenant: u32,
        run_id: u64,
    ) -> Result<()> {
        if let Some(a) = attachment {
            self.store
                .set_attachment_meta(local, META_SOURCE_ID, &MetaValue::from(a.source_id))
                .await?;
            self.store
                .set_attachment_meta(
                    local,
                    META_SOURCE_TENANT,
                    &MetaValue::scalar(tenant.to_string()),
                )
                .await?;
            if !a.source_url.is_empty() {
                self.store
                    .set_attachment_meta(local, META_SOURCE_URL, &MetaValue::scalar(&a.source_url))
                    .await?;
            }
        }
        if run_id > 0 {
            self.store
                .set_attachment_meta(local, META_RUN_ID, &MetaValue::scalar(run_id.to_string()))
                .await?;
        }
        Ok(())
    }

    /// Per-resource rewrite entry: the observed URL maps to its new-base
    /// form (covers resources whose old URL does not share the old base).
    fn push_rewrite(&self, original_url: &str, logical: &str, out: &mut ResolvedMedia) {
        if original_url.is_empty() || self.config.new_base_url.is_empty() {
            return;
        }
        let new_url = format!(
            "{}/{}",
            self.config.new_base_url.trim_end_matches('/'),
            logical
        );
        if new_url != original_url && !out.url_map.iter().any(|(k, _)| k == original_url) {
            out.url_map.push((original_url.to_string(), new_url));
        }
    }
}

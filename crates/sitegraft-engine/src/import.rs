//! Entry importer and run orchestration.
//!
//! Per-row state machine: fetched → (pre-hook) → create/update/skip by
//! write mode → terms resolved → attachments resolved → content rewritten
//! → (post-hook) → mapped. A single row's failure never aborts the run;
//! only connection and configuration failures do. Mappings commit per
//! row, so cancellation mid-chunk is always consistent.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sitegraft_core::{
    slugify, ContentStore, Downloader, EntityKind, EntryDraft, Error, FetchFilter, KeyValueStore,
    MediaProbe, MetaValue, PostHook, PreHook, RemoteSource, Result, RunSummary, SourceRow,
    TermRef, TermsByTaxonomy, WriteMode, AttachmentSummary, META_LAST_UPDATED, META_RUN_ID,
    META_SOURCE_ID, META_SOURCE_META, META_SOURCE_TENANT, RESERVED_META_KEYS, WRITABLE_STATUSES,
};

use crate::identity::IdentityMapper;
use crate::media::{rewrite_content, AttachmentResolver, MediaConfig};
use crate::run::RunCounter;
use crate::terms::{TermImportOptions, TermImporter};
use crate::users::{UserImportOptions, UserImporter};

/// Default page size for the chunked fetch loop.
pub const DEFAULT_CHUNK: u32 = 200;

/// Source meta key naming the last remote editor (remapped to a local
/// user id on import).
pub const META_LAST_EDITOR: &str = "_last_editor";

/// Options for one entry import run.
#[derive(Clone)]
pub struct RunOptions {
    /// Fetch filter; its `tenant` is the run's tenant and its `limit` the
    /// total row cap.
    pub filter: FetchFilter,
    pub write_mode: WriteMode,
    pub dry_run: bool,
    /// Resolve attachments and rewrite content.
    pub with_media: bool,
    /// Mirror remote term assignments onto imported entries.
    pub assign_terms: bool,
    /// Remap author/editor references through the identity mapper.
    pub map_users: bool,
    /// Page size for the chunk loop; 0 uses the default.
    pub chunk: u32,
    /// Metadata written to every imported entry after the entity write.
    pub meta_ops: Vec<(String, MetaValue)>,
    /// Terms appended per taxonomy.
    pub term_add: BTreeMap<String, Vec<String>>,
    /// Terms replacing the taxonomy's assignments.
    pub term_set: BTreeMap<String, Vec<String>>,
    /// Terms removed per taxonomy.
    pub term_remove: BTreeMap<String, Vec<String>>,
    pub pre_hook: Option<PreHook>,
    pub post_hook: Option<PostHook>,
    pub media: MediaConfig,
    /// Reuse an externally-allocated run id instead of taking the next.
    pub run_id_override: Option<u64>,
    /// Prefixes for tenant-scoped user meta normalization.
    pub remote_prefix: String,
    pub local_prefix: String,
    /// Checked at chunk and row boundaries; committed rows stand.
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            filter: FetchFilter::default(),
            write_mode: WriteMode::Upsert,
            dry_run: false,
            with_media: true,
            assign_terms: true,
            map_users: true,
            chunk: 0,
            meta_ops: Vec::new(),
            term_add: BTreeMap::new(),
            term_set: BTreeMap::new(),
            term_remove: BTreeMap::new(),
            pre_hook: None,
            post_hook: None,
            media: MediaConfig::default(),
            run_id_override: None,
            remote_prefix: "site_".to_string(),
            local_prefix: "site_".to_string(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Options for the standalone attachment import operation.
#[derive(Debug, Clone, Default)]
pub struct AttachmentImportOptions {
    pub tenant: u32,
    pub ids: Vec<i64>,
    pub dry_run: bool,
    pub run_id_override: Option<u64>,
    pub media: MediaConfig,
}

/// A row that reached the written state within the current chunk.
struct ProcessedRow {
    index: usize,
    local_id: i64,
    is_update: bool,
    body: String,
}

/// Drives end-to-end runs against injected remote/store/transport seams.
pub struct Importer {
    remote: Arc<dyn RemoteSource>,
    store: Arc<dyn ContentStore>,
    downloader: Arc<dyn Downloader>,
    probe: Arc<dyn MediaProbe>,
    counter: RunCounter,
}

impl Importer {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: Arc<dyn ContentStore>,
        downloader: Arc<dyn Downloader>,
        probe: Arc<dyn MediaProbe>,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            remote,
            store,
            downloader,
            probe,
            counter: RunCounter::new(kv),
        }
    }

    async fn allocate_run_id(&self, dry_run: bool, overridden: Option<u64>) -> Result<u64> {
        if dry_run {
            return Ok(0);
        }
        match overridden {
            Some(id) => Ok(id),
            None => self.counter.next().await,
        }
    }

    /// The top-level entry point: fetch → map → resolve → rewrite →
    /// summarize.
    pub async fn run_import(&self, opts: &RunOptions) -> Result<RunSummary> {
        opts.filter.validate()?;
        let start = Instant::now();

        let run_id = self
            .allocate_run_id(opts.dry_run, opts.run_id_override)
            .await?;
        let tenant = opts.filter.tenant.unwrap_or(1);

        // Fresh mapper per run: the memo never outlives an invocation.
        let mapper = Arc::new(IdentityMapper::new(self.store.clone()));
        let term_importer =
            TermImporter::new(self.remote.clone(), self.store.clone(), mapper.clone());
        let user_importer =
            UserImporter::new(self.remote.clone(), self.store.clone(), mapper.clone());
        let resolver = AttachmentResolver::new(
            self.remote.clone(),
            self.store.clone(),
            mapper.clone(),
            self.downloader.clone(),
            self.probe.clone(),
            opts.media.clone(),
        );

        let mut summary = RunSummary {
            run_id,
            ..Default::default()
        };

        let chunk = if opts.chunk == 0 { DEFAULT_CHUNK } else { opts.chunk };
        let total_cap = opts.filter.limit;
        let mut fetched: u32 = 0;

        'chunks: while fetched < total_cap {
            if opts.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let mut page_filter = opts.filter.clone();
            page_filter.limit = (total_cap - fetched).min(chunk);
            page_filter.offset = opts.filter.offset + fetched;

            let rows = match self.remote.fetch_entries(&page_filter).await {
                Ok(rows) => rows,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // Prior chunks' commits stand.
                    summary.errors.push(format!("fetch: {e}"));
                    break;
                }
            };
            if rows.is_empty() {
                break;
            }
            summary.found += rows.len() as u64;

            let entry_terms = if opts.assign_terms {
                let ids: Vec<i64> = rows.iter().map(|r| r.source_id).collect();
                match self
                    .remote
                    .fetch_entry_terms(&ids, Some(tenant), &[], opts.filter.force_base_prefix)
                    .await
                {
                    Ok(map) => map,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        summary.errors.push(format!("terms fetch: {e}"));
                        Default::default()
                    }
                }
            } else {
                Default::default()
            };

            let mut processed: Vec<ProcessedRow> = Vec::new();
            for (index, row) in rows.iter().enumerate() {
                if opts.cancel.is_cancelled() {
                    summary.cancelled = true;
                    break 'chunks;
                }

                let row_terms = entry_terms.get(&row.source_id);
                match self
                    .process_row(
                        row,
                        row_terms,
                        opts,
                        run_id,
                        &mapper,
                        &term_importer,
                        &user_importer,
                        &mut summary,
                    )
                    .await
                {
                    Ok(Some((local_id, is_update, body))) => processed.push(ProcessedRow {
                        index,
                        local_id,
                        is_update,
                        body,
                    }),
                    Ok(None) => {}
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(
                            subsystem = "engine",
                            component = "import",
                            source_id = row.source_id,
                            error = %e,
                            "Row failed; continuing"
                        );
                        summary.errors.push(format!("row {}: {e}", row.source_id));
                        summary.skipped += 1;
                    }
                }
            }

            // Dry runs still exercise the resolution path (lookups only).
            if opts.with_media && (!processed.is_empty() || opts.dry_run) {
                self.resolve_chunk_media(
                    &resolver, &rows, &mut processed, tenant, opts, run_id, &mut summary,
                )
                .await?;
            }

            if let Some(hook) = &opts.post_hook {
                for p in &processed {
                    if let Err(e) = hook(p.local_id, &rows[p.index], p.is_update) {
                        summary
                            .errors
                            .push(format!("post hook ({}): {e}", rows[p.index].source_id));
                    }
                }
            }

            let page_len = rows.len() as u32;
            fetched += page_len;
            if page_len < page_filter.limit {
                break;
            }
        }

        info!(
            subsystem = "engine",
            component = "import",
            op = "run_import",
            tenant,
            run_id,
            found = summary.found,
            imported = summary.imported,
            updated = summary.updated,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            cancelled = summary.cancelled,
            duration_ms = start.elapsed().as_millis() as u64,
            "Import run finished"
        );
        Ok(summary)
    }

    /// Resolve attachments for one chunk, rewrite bodies, set featured
    /// resources, and fold the counters into the run summary.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_chunk_media(
        &self,
        resolver: &AttachmentResolver,
        rows: &[SourceRow],
        processed: &mut [ProcessedRow],
        tenant: u32,
        opts: &RunOptions,
        run_id: u64,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let resolved = match resolver.resolve(rows, tenant, opts.dry_run, run_id).await {
            Ok(resolved) => resolved,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                summary.errors.push(format!("media: {e}"));
                return Ok(());
            }
        };

        merge_attachment_summaries(&mut summary.attachments, resolved.summary);

        for p in processed.iter_mut() {
            let rewritten = rewrite_content(&p.body, &resolved.url_map);
            if rewritten != p.body {
                if !opts.dry_run {
                    if let Err(e) = self.store.set_entry_body(p.local_id, &rewritten).await {
                        summary
                            .errors
                            .push(format!("rewrite ({}): {e}", rows[p.index].source_id));
                        continue;
                    }
                }
                p.body = rewritten;
                summary.attachments.rewritten += 1;
            }

            if opts.dry_run {
                continue;
            }

            // Featured resource from the explicit reference keys.
            for key in &opts.media.featured_keys {
                let featured = rows[p.index]
                    .metadata
                    .get(key)
                    .and_then(|v| v.first_scalar())
                    .and_then(|s| s.trim().parse::<i64>().ok());
                if let Some(remote_id) = featured {
                    if let Some(local_attachment) = resolved.map.get(&remote_id) {
                        self.store
                            .set_featured_attachment(p.local_id, *local_attachment)
                            .await?;
                        summary.attachments.thumbnails_set += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns `(local_id, is_update, body_as_written)` for rows that were
    /// written, `None` for skips and dry runs.
    #[allow(clippy::too_many_arguments)]
    async fn process_row(
        &self,
        row: &SourceRow,
        row_terms: Option<&TermsByTaxonomy>,
        opts: &RunOptions,
        run_id: u64,
        mapper: &Arc<IdentityMapper>,
        term_importer: &TermImporter,
        user_importer: &UserImporter,
        summary: &mut RunSummary,
    ) -> Result<Option<(i64, bool, String)>> {
        let tenant = row.tenant;
        let existing = mapper
            .find_local(row.source_id, tenant, EntityKind::Entry)
            .await?;

        // Write-mode gate.
        match (existing, opts.write_mode) {
            (Some(_), WriteMode::Insert) | (None, WriteMode::Update) => {
                summary.skipped += 1;
                return Ok(None);
            }
            _ => {}
        }

        if opts.dry_run {
            summary.skipped += 1;
            summary.map.insert(row.source_id, 0);
            return Ok(None);
        }

        let author_local = if opts.map_users && row.author_source_id > 0 {
            mapper
                .find_local(row.author_source_id, tenant, EntityKind::User)
                .await?
                .unwrap_or(0)
        } else {
            0
        };

        let mut draft = build_draft(row, author_local);

        if let Some(hook) = &opts.pre_hook {
            if let Err(e) = hook(&mut draft, row) {
                summary
                    .errors
                    .push(format!("pre hook ({}): {e}", row.source_id));
            }
        }

        let (local, is_update) = match existing {
            Some(local) => {
                self.store.update_entry(local, &draft).await?;
                summary.updated += 1;
                (local, true)
            }
            None => {
                let local = self.store.create_entry(&draft).await?;
                summary.imported += 1;
                (local, false)
            }
        };

        // Identity keys after the entity write, so nothing in the draft
        // can shadow them.
        self.store
            .set_entry_meta(local, META_SOURCE_ID, &MetaValue::from(row.source_id))
            .await?;
        self.store
            .set_entry_meta(
                local,
                META_SOURCE_TENANT,
                &MetaValue::scalar(tenant.to_string()),
            )
            .await?;
        if run_id > 0 {
            self.store
                .set_entry_meta(local, META_RUN_ID, &MetaValue::scalar(run_id.to_string()))
                .await?;
        }

        // Last-editor remap, importing the user on demand.
        if opts.map_users {
            if let Some(remote_uid) = row
                .metadata
                .get(META_LAST_EDITOR)
                .and_then(|v| v.first_scalar())
                .and_then(|s| s.trim().parse::<i64>().ok())
            {
                let user_opts = UserImportOptions {
                    tenant,
                    run_id,
                    remote_prefix: opts.remote_prefix.clone(),
                    local_prefix: opts.local_prefix.clone(),
                    ..Default::default()
                };
                let local_uid = match mapper
                    .find_local(remote_uid, tenant, EntityKind::User)
                    .await?
                {
                    Some(uid) => Some(uid),
                    None => user_importer.import_user(remote_uid, &user_opts).await?,
                };
                if let Some(uid) = local_uid {
                    self.store
                        .set_entry_meta(local, META_LAST_EDITOR, &MetaValue::from(uid))
                        .await?;
                }
            }
        }

        // Term assignment mirrored from the remote, then explicit ops.
        if opts.assign_terms {
            if let Some(terms) = row_terms {
                if let Err(e) = term_importer
                    .assign_entry_terms(local, &draft.kind, terms, false)
                    .await
                {
                    summary
                        .errors
                        .push(format!("terms ({}): {e}", row.source_id));
                }
            }
        }
        self.apply_term_ops(local, opts, summary, row.source_id).await;

        for (key, value) in &opts.meta_ops {
            self.store.set_entry_meta(local, key, value).await?;
        }

        // The local store reflects source modification time, not import time.
        if row.modified_at.is_some() || row.modified_at_utc.is_some() {
            self.store
                .set_modified_times(local, row.modified_at, row.modified_at_utc)
                .await?;
        }

        summary.map.insert(row.source_id, local);
        mapper
            .record_link(row.source_id, tenant, EntityKind::Entry, local)
            .await;

        Ok(Some((local, is_update, draft.body)))
    }

    /// Explicit add/set/remove taxonomy operations from the options.
    async fn apply_term_ops(
        &self,
        local: i64,
        opts: &RunOptions,
        summary: &mut RunSummary,
        source_id: i64,
    ) {
        for (taxonomy, names, append) in opts
            .term_add
            .iter()
            .map(|(t, n)| (t, n, true))
            .chain(opts.term_set.iter().map(|(t, n)| (t, n, false)))
        {
            if let Err(e) = self
                .ensure_and_assign_names(local, taxonomy, names, append)
                .await
            {
                summary
                    .errors
                    .push(format!("term op ({source_id}, {taxonomy}): {e}"));
            }
        }

        for (taxonomy, names) in &opts.term_remove {
            if let Err(e) = self.remove_names(local, taxonomy, names).await {
                summary
                    .errors
                    .push(format!("term op ({source_id}, {taxonomy}): {e}"));
            }
        }
    }

    async fn ensure_and_assign_names(
        &self,
        entry_id: i64,
        taxonomy: &str,
        names: &[String],
        append: bool,
    ) -> Result<()> {
        if !self.store.taxonomy_exists(taxonomy).await? {
            return Err(Error::Internal(format!("unknown taxonomy '{taxonomy}'")));
        }

        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            let slug = slugify(name);
            let local = match self.store.find_term_by_slug(taxonomy, &slug).await? {
                Some(local) => local,
                None => {
                    self.store
                        .create_term(&sitegraft_core::TermWrite {
                            taxonomy: taxonomy.to_string(),
                            name: name.clone(),
                            slug,
                            description: String::new(),
                            parent_local_id: 0,
                        })
                        .await?
                }
            };
            if !ids.contains(&local) {
                ids.push(local);
            }
        }

        if !ids.is_empty() {
            self.store
                .assign_terms(entry_id, taxonomy, &ids, append)
                .await?;
        }
        Ok(())
    }

    async fn remove_names(&self, entry_id: i64, taxonomy: &str, names: &[String]) -> Result<()> {
        let mut ids = Vec::new();
        for name in names {
            if let Some(local) = self
                .store
                .find_term_by_slug(taxonomy, &slugify(name))
                .await?
            {
                ids.push(local);
            }
        }
        if !ids.is_empty() {
            self.store.remove_terms(entry_id, taxonomy, &ids).await?;
        }
        Ok(())
    }

    /// Standalone term import (same chunked shape, usable independently).
    pub async fn import_terms(
        &self,
        opts: &TermImportOptions,
    ) -> Result<sitegraft_core::TermImportSummary> {
        let mut opts = opts.clone();
        if opts.run_id == 0 {
            opts.run_id = self.allocate_run_id(opts.dry_run, None).await?;
        }
        let mapper = Arc::new(IdentityMapper::new(self.store.clone()));
        TermImporter::new(self.remote.clone(), self.store.clone(), mapper)
            .import_terms(&opts)
            .await
    }

    /// Standalone user import.
    pub async fn import_users(
        &self,
        opts: &UserImportOptions,
    ) -> Result<sitegraft_core::UserImportSummary> {
        let mut opts = opts.clone();
        if opts.run_id == 0 {
            opts.run_id = self.allocate_run_id(opts.dry_run, None).await?;
        }
        let mapper = Arc::new(IdentityMapper::new(self.store.clone()));
        UserImporter::new(self.remote.clone(), self.store.clone(), mapper)
            .import_users(&opts)
            .await
    }

    /// Standalone attachment import for an explicit id set.
    pub async fn import_attachments(
        &self,
        opts: &AttachmentImportOptions,
    ) -> Result<AttachmentSummary> {
        let run_id = self
            .allocate_run_id(opts.dry_run, opts.run_id_override)
            .await?;
        let mapper = Arc::new(IdentityMapper::new(self.store.clone()));
        let resolver = AttachmentResolver::new(
            self.remote.clone(),
            self.store.clone(),
            mapper,
            self.downloader.clone(),
            self.probe.clone(),
            opts.media.clone(),
        );
        let resolved = resolver
            .resolve_ids(&opts.ids, opts.tenant, opts.dry_run, run_id)
            .await?;
        Ok(resolved.summary)
    }
}

/// Build the local write payload for one source row.
fn build_draft(row: &SourceRow, author_local: i64) -> EntryDraft {
    let title = if row.title.is_empty() {
        "Untitled".to_string()
    } else {
        row.title.clone()
    };

    let slug = if !row.slug.is_empty() {
        row.slug.clone()
    } else {
        let derived = slugify(&title);
        if derived.is_empty() {
            row.source_id.to_string()
        } else {
            derived
        }
    };

    let status = if WRITABLE_STATUSES.contains(&row.status.as_str()) {
        row.status.clone()
    } else {
        "published".to_string()
    };

    // Source metadata propagates minus the reserved identity keys, plus a
    // full snapshot and the import stamp.
    let mut meta: Vec<(String, MetaValue)> = row
        .metadata
        .iter()
        .filter(|(k, _)| !RESERVED_META_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let mut snapshot: BTreeMap<String, MetaValue> = row.metadata.clone();
    snapshot.insert("kind".to_string(), MetaValue::scalar(&row.kind));
    meta.push((META_SOURCE_META.to_string(), MetaValue::Map(snapshot)));
    meta.push((
        META_LAST_UPDATED.to_string(),
        MetaValue::scalar(chrono::Utc::now().timestamp().to_string()),
    ));

    EntryDraft {
        title,
        body: row.body.clone(),
        excerpt: row.excerpt.clone(),
        status,
        kind: row.kind.clone(),
        slug,
        created_at: row.created_at,
        created_at_utc: row.created_at_utc,
        author_local_id: author_local,
        meta,
    }
}

fn merge_attachment_summaries(into: &mut AttachmentSummary, from: AttachmentSummary) {
    into.discovered += from.discovered;
    into.registered += from.registered;
    into.reused += from.reused;
    into.missing.extend(from.missing);
    into.errors.extend(from.errors);
}

/// Build a terms-by-taxonomy map from plain term names (hook helpers and
/// host adapters).
pub fn named_terms(taxonomy: &str, names: &[&str]) -> TermsByTaxonomy {
    let mut map = TermsByTaxonomy::new();
    map.insert(
        taxonomy.to_string(),
        names
            .iter()
            .map(|name| TermRef {
                source_term_id: 0,
                name: name.to_string(),
                slug: String::new(),
            })
            .collect(),
    );
    map
}

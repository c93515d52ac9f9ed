//! Hierarchical taxonomy term import and per-entry term assignment.
//!
//! Import order is parent-before-child, derived from the source's own
//! parent chain (candidate pages arrive `parent ASC, id ASC`), but
//! correctness does not depend on it: each term resolves its parent
//! through the run map, then the identity index, and only then degrades
//! to a root term — loudly, not silently.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use sitegraft_core::{
    ContentStore, EntityKind, MetaValue, RemoteSource, Result, TermImportSummary, TermNode,
    TermPostHook, TermSelection, TermWrite, TermsByTaxonomy, META_RUN_ID, META_SOURCE_ID,
    META_SOURCE_TENANT, RESERVED_META_KEYS,
};

use crate::identity::IdentityMapper;

/// Default candidate chunk size.
pub const DEFAULT_TERM_CHUNK: usize = 500;

/// Options for one term import invocation.
#[derive(Clone, Default)]
pub struct TermImportOptions {
    pub tenant: u32,
    /// Taxonomies to import; empty imports all.
    pub taxonomies: Vec<String>,
    pub include_ids: Vec<i64>,
    pub exclude_ids: Vec<i64>,
    /// Candidate chunk size; 0 uses the default.
    pub chunk: usize,
    pub dry_run: bool,
    pub run_id: u64,
    pub force_base_prefix: bool,
    pub post_hook: Option<TermPostHook>,
}

impl TermImportOptions {
    fn selection(&self) -> TermSelection {
        TermSelection {
            tenant: Some(self.tenant),
            taxonomies: self.taxonomies.clone(),
            include_ids: self.include_ids.clone(),
            exclude_ids: self.exclude_ids.clone(),
            force_base_prefix: self.force_base_prefix,
        }
    }
}

/// Imports taxonomy trees preserving parent ordering, with meta
/// propagation and slug-based dedup.
pub struct TermImporter {
    remote: Arc<dyn RemoteSource>,
    store: Arc<dyn ContentStore>,
    mapper: Arc<IdentityMapper>,
}

impl TermImporter {
    pub fn new(
        remote: Arc<dyn RemoteSource>,
        store: Arc<dyn ContentStore>,
        mapper: Arc<IdentityMapper>,
    ) -> Self {
        Self {
            remote,
            store,
            mapper,
        }
    }

    /// Import every term matching the options; one term's failure never
    /// aborts the batch.
    pub async fn import_terms(&self, opts: &TermImportOptions) -> Result<TermImportSummary> {
        let start = Instant::now();
        let mut summary = TermImportSummary {
            run_id: opts.run_id,
            ..Default::default()
        };

        let selection = opts.selection();
        let ids = self.remote.fetch_term_ids(&selection).await?;
        summary.found = ids.len() as u64;
        if ids.is_empty() {
            return Ok(summary);
        }

        let chunk = if opts.chunk == 0 {
            DEFAULT_TERM_CHUNK
        } else {
            opts.chunk
        };

        for page in ids.chunks(chunk) {
            let nodes = self.remote.fetch_terms(page, &selection).await?;
            for node in &nodes {
                self.import_one(node, opts, &mut summary).await;
            }
        }

        info!(
            subsystem = "engine",
            component = "terms",
            op = "import_terms",
            tenant = opts.tenant,
            run_id = opts.run_id,
            found = summary.found,
            imported = summary.imported,
            updated = summary.updated,
            duration_ms = start.elapsed().as_millis() as u64,
            "Term import finished"
        );
        Ok(summary)
    }

    async fn import_one(
        &self,
        node: &TermNode,
        opts: &TermImportOptions,
        summary: &mut TermImportSummary,
    ) {
        let rid = node.source_term_id;
        if let Err(e) = self.try_import_one(node, opts, summary).await {
            summary.errors.entry(rid).or_default().push(e.to_string());
        }
    }

    async fn try_import_one(
        &self,
        node: &TermNode,
        opts: &TermImportOptions,
        summary: &mut TermImportSummary,
    ) -> Result<()> {
        let rid = node.source_term_id;

        if !self.store.taxonomy_exists(&node.taxonomy).await? {
            summary.errors.entry(rid).or_default().push(format!(
                "taxonomy '{}' does not exist locally",
                node.taxonomy
            ));
            return Ok(());
        }

        let slug = node.effective_slug();

        if opts.dry_run {
            if let Some(local) = self.store.find_term_by_slug(&node.taxonomy, &slug).await? {
                summary.map.insert(rid, local);
            }
            return Ok(());
        }

        // Parent resolution: run map first, identity index second, root
        // (with a surfaced warning) last.
        let parent_local = if node.parent_source_id > 0 {
            match summary.map.get(&node.parent_source_id).copied() {
                Some(local) => local,
                None => match self
                    .mapper
                    .find_local(node.parent_source_id, opts.tenant, EntityKind::Term)
                    .await?
                {
                    Some(local) => local,
                    None => {
                        warn!(
                            subsystem = "engine",
                            component = "terms",
                            source_id = rid,
                            parent_source_id = node.parent_source_id,
                            taxonomy = %node.taxonomy,
                            "Parent term unresolved; importing as root"
                        );
                        summary.errors.entry(rid).or_default().push(format!(
                            "parent {} unresolved; imported as root",
                            node.parent_source_id
                        ));
                        0
                    }
                },
            }
        } else {
            0
        };

        // Slug is the natural dedup key; name is the fallback.
        let existing = match self.store.find_term_by_slug(&node.taxonomy, &slug).await? {
            Some(local) => Some(local),
            None => {
                self.store
                    .find_term_by_name(&node.taxonomy, &node.name)
                    .await?
            }
        };

        let write = TermWrite {
            taxonomy: node.taxonomy.clone(),
            name: node.name.clone(),
            slug: slug.clone(),
            description: node.description.clone(),
            parent_local_id: parent_local,
        };

        let (local, is_new) = match existing {
            Some(local) => {
                self.store.update_term(local, &write).await?;
                summary.updated += 1;
                (local, false)
            }
            None => {
                let local = self.store.create_term(&write).await?;
                summary.imported += 1;
                (local, true)
            }
        };

        // Propagate source meta, reserved identity keys excluded...
        for (key, value) in &node.meta {
            if key.is_empty() || RESERVED_META_KEYS.contains(&key.as_str()) {
                continue;
            }
            self.store.set_term_meta(local, key, value).await?;
        }

        // ...then (re-)write the identity keys last so arbitrary source
        // metadata of the same name never wins.
        self.store
            .set_term_meta(local, META_SOURCE_ID, &MetaValue::from(rid))
            .await?;
        self.store
            .set_term_meta(
                local,
                META_SOURCE_TENANT,
                &MetaValue::scalar(opts.tenant.to_string()),
            )
            .await?;
        if opts.run_id > 0 {
            self.store
                .set_term_meta(local, META_RUN_ID, &MetaValue::scalar(opts.run_id.to_string()))
                .await?;
        }

        summary.map.insert(rid, local);
        self.mapper
            .record_link(rid, opts.tenant, EntityKind::Term, local)
            .await;

        if let Some(hook) = &opts.post_hook {
            if let Err(e) = hook(node, local, is_new) {
                summary
                    .errors
                    .entry(rid)
                    .or_default()
                    .push(format!("post hook: {e}"));
            }
        }

        Ok(())
    }

    /// Ensure-and-assign terms for one imported entry: taxonomy must be
    /// registered for the entry's kind; terms are resolved by slug and
    /// created on demand.
    pub async fn assign_entry_terms(
        &self,
        entry_id: i64,
        kind: &str,
        terms_by_taxonomy: &TermsByTaxonomy,
        append: bool,
    ) -> Result<()> {
        if terms_by_taxonomy.is_empty() {
            return Ok(());
        }

        let allowed = self.store.taxonomies_for_kind(kind).await?;

        for (taxonomy, term_list) in terms_by_taxonomy {
            if !allowed.contains(taxonomy) || !self.store.taxonomy_exists(taxonomy).await? {
                continue;
            }

            let mut to_set: Vec<i64> = Vec::new();
            for term in term_list {
                let slug = if term.slug.is_empty() {
                    sitegraft_core::slugify(&term.name)
                } else {
                    term.slug.clone()
                };

                let local = match self.store.find_term_by_slug(taxonomy, &slug).await? {
                    Some(local) => local,
                    None => {
                        self.store
                            .create_term(&TermWrite {
                                taxonomy: taxonomy.clone(),
                                name: term.name.clone(),
                                slug,
                                description: String::new(),
                                parent_local_id: 0,
                            })
                            .await?
                    }
                };
                if !to_set.contains(&local) {
                    to_set.push(local);
                }
            }

            if !to_set.is_empty() {
                self.store
                    .assign_terms(entry_id, taxonomy, &to_set, append)
                    .await?;
            }
        }
        Ok(())
    }
}

//! Remote taxonomy term fetchers.
//!
//! Candidate pages are ordered `parent ASC, id ASC` so no child page can
//! precede all of its possible ancestors — an ordering hint only; the
//! importer's idempotent parent lookup is what guarantees correctness.

use std::collections::HashMap;
use std::time::Instant;

use sqlx::mysql::MySqlPool;
use sqlx::Row;
use tracing::debug;

use sitegraft_core::{
    decode_meta, Error, MetaValue, Result, TermNode, TermRef, TermSelection, TermsByTaxonomy,
};

use crate::query::{bind_all, Bind};
use crate::tables::{Table, TenantTables};
use crate::placeholders;

/// Term fetcher bound to one pool and table resolver.
pub struct TermQuery {
    pool: MySqlPool,
    tables: TenantTables,
}

impl TermQuery {
    pub fn new(pool: MySqlPool, tables: TenantTables) -> Self {
        Self { pool, tables }
    }

    fn term_tables(&self, selection: &TermSelection) -> (String, String, String) {
        let tenant = selection.tenant;
        let force = selection.force_base_prefix;
        (
            self.tables.resolve(Table::Terms, tenant, force),
            self.tables.resolve(Table::TermTaxonomy, tenant, force),
            self.tables.resolve(Table::TermMeta, tenant, force),
        )
    }

    /// Candidate term ids for a selection, parent-first.
    pub async fn fetch_term_ids(&self, selection: &TermSelection) -> Result<Vec<i64>> {
        let (t_terms, t_tax, _) = self.term_tables(selection);

        let mut sql = format!(
            "SELECT DISTINCT t.id, tt.parent FROM {t_terms} t \
             JOIN {t_tax} tt ON tt.term_id = t.id"
        );

        let mut conditions: Vec<String> = Vec::new();
        let mut binds: Vec<Bind> = Vec::new();

        if !selection.taxonomies.is_empty() {
            conditions.push(format!(
                "tt.taxonomy IN ({})",
                placeholders(selection.taxonomies.len())
            ));
            binds.extend(selection.taxonomies.iter().cloned().map(Bind::Str));
        }

        if !selection.include_ids.is_empty() {
            conditions.push(format!(
                "t.id IN ({})",
                placeholders(selection.include_ids.len())
            ));
            binds.extend(selection.include_ids.iter().copied().map(Bind::I64));
        }

        if !selection.exclude_ids.is_empty() {
            conditions.push(format!(
                "t.id NOT IN ({})",
                placeholders(selection.exclude_ids.len())
            ));
            binds.extend(selection.exclude_ids.iter().copied().map(Bind::I64));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        sql.push_str(" ORDER BY tt.parent ASC, t.id ASC");

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut seen = std::collections::HashSet::new();
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            if seen.insert(id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Full nodes (meta attached) for a chunk of term ids, parent-first.
    pub async fn fetch_terms(
        &self,
        ids: &[i64],
        selection: &TermSelection,
    ) -> Result<Vec<TermNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let (t_terms, t_tax, t_meta) = self.term_tables(selection);

        let sql = format!(
            "SELECT t.id, t.name, t.slug, tt.taxonomy, tt.description, tt.parent \
             FROM {t_terms} t \
             JOIN {t_tax} tt ON tt.term_id = t.id \
             WHERE t.id IN ({}) \
             ORDER BY tt.parent ASC, t.id ASC",
            placeholders(ids.len())
        );
        let binds: Vec<Bind> = ids.iter().copied().map(Bind::I64).collect();

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let meta_sql = format!(
            "SELECT term_id, meta_key, meta_value FROM {t_meta} \
             WHERE term_id IN ({}) ORDER BY id ASC",
            placeholders(ids.len())
        );
        let meta_rows = bind_all(sqlx::query(&meta_sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut meta_by_term: HashMap<i64, Vec<(String, MetaValue)>> = HashMap::new();
        for row in &meta_rows {
            let term_id: i64 = row.try_get("term_id")?;
            let key: String = row.try_get("meta_key")?;
            let raw: String = row.try_get("meta_value")?;
            meta_by_term
                .entry(term_id)
                .or_default()
                .push((key, decode_meta(&raw)));
        }

        let mut nodes = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            nodes.push(TermNode {
                source_term_id: id,
                name: row.try_get("name")?,
                slug: row.try_get("slug")?,
                description: row.try_get("description")?,
                parent_source_id: row.try_get("parent")?,
                taxonomy: row.try_get("taxonomy")?,
                meta: meta_by_term.remove(&id).unwrap_or_default(),
            });
        }

        debug!(
            subsystem = "db",
            component = "term_query",
            op = "fetch_terms",
            row_count = nodes.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetched term chunk"
        );
        Ok(nodes)
    }

    /// Terms assigned to a set of entries, grouped per entry and taxonomy.
    pub async fn fetch_entry_terms(
        &self,
        entry_ids: &[i64],
        tenant: Option<u32>,
        taxonomies: &[String],
        force_base_prefix: bool,
    ) -> Result<HashMap<i64, TermsByTaxonomy>> {
        if entry_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let t_terms = self.tables.resolve(Table::Terms, tenant, force_base_prefix);
        let t_tax = self
            .tables
            .resolve(Table::TermTaxonomy, tenant, force_base_prefix);
        let t_rel = self
            .tables
            .resolve(Table::TermRelationships, tenant, force_base_prefix);

        let mut sql = format!(
            "SELECT tr.object_id AS entry_id, tt.taxonomy, t.id AS term_id, t.name, t.slug \
             FROM {t_tax} tt \
             JOIN {t_rel} tr ON tr.term_taxonomy_id = tt.term_taxonomy_id \
             JOIN {t_terms} t ON t.id = tt.term_id \
             WHERE tr.object_id IN ({})",
            placeholders(entry_ids.len())
        );
        let mut binds: Vec<Bind> = entry_ids.iter().copied().map(Bind::I64).collect();

        if !taxonomies.is_empty() {
            sql.push_str(&format!(
                " AND tt.taxonomy IN ({})",
                placeholders(taxonomies.len())
            ));
            binds.extend(taxonomies.iter().cloned().map(Bind::Str));
        }

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut out: HashMap<i64, TermsByTaxonomy> = HashMap::new();
        for row in &rows {
            let entry_id: i64 = row.try_get("entry_id")?;
            let taxonomy: String = row.try_get("taxonomy")?;
            out.entry(entry_id)
                .or_default()
                .entry(taxonomy)
                .or_default()
                .push(TermRef {
                    source_term_id: row.try_get("term_id")?,
                    name: row.try_get("name")?,
                    slug: row.try_get("slug")?,
                });
        }
        Ok(out)
    }
}

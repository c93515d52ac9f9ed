//! Parameterized entry fetch queries against the remote source.
//!
//! SQL text only ever receives resolved table names and allow-listed
//! column identifiers; every filter value travels as a bound parameter.
//! Entries and their metadata are fetched in two round trips and joined
//! in memory to bound the query count.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{NaiveDateTime, TimeZone, Utc};
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlRow};
use sqlx::{query::Query, MySql, Row};
use tracing::debug;

use sitegraft_core::{decode_meta, Error, FetchFilter, MetaValue, Result, SourceRow, TermField};

use crate::tables::{Table, TenantTables};
use crate::{escape_like, placeholders};

/// A value bound into a parameterized query.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Bind {
    Str(String),
    I64(i64),
    DateTime(NaiveDateTime),
}

pub(crate) fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    binds: &[Bind],
) -> Query<'q, MySql, MySqlArguments> {
    for bind in binds {
        query = match bind {
            Bind::Str(s) => query.bind(s.clone()),
            Bind::I64(n) => query.bind(*n),
            Bind::DateTime(dt) => query.bind(*dt),
        };
    }
    query
}

/// Build the entry SELECT plus its bind list. Pure; exercised directly by
/// tests without a live connection.
pub(crate) fn build_entry_sql(
    filter: &FetchFilter,
    tables: &TenantTables,
) -> Result<(String, Vec<Bind>)> {
    filter.validate()?;

    let tenant = filter.tenant;
    let force = filter.force_base_prefix;
    let entries = tables.resolve(Table::Entries, tenant, force);

    let mut sql = format!(
        "SELECT e.id, e.kind, e.status, e.title, e.body, e.excerpt, e.slug, \
         e.created_at, e.created_at_utc, e.modified_at, e.modified_at_utc, \
         e.parent_id, e.author_id FROM {entries} e"
    );

    let mut conditions: Vec<String> = Vec::new();
    let mut binds: Vec<Bind> = Vec::new();

    if !filter.kinds.is_empty() {
        conditions.push(format!("e.kind IN ({})", placeholders(filter.kinds.len())));
        binds.extend(filter.kinds.iter().cloned().map(Bind::Str));
    }

    let statuses = filter.expanded_statuses();
    if !statuses.is_empty() {
        conditions.push(format!("e.status IN ({})", placeholders(statuses.len())));
        binds.extend(statuses.into_iter().map(Bind::Str));
    }

    if !filter.include_ids.is_empty() {
        conditions.push(format!(
            "e.id IN ({})",
            placeholders(filter.include_ids.len())
        ));
        binds.extend(filter.include_ids.iter().copied().map(Bind::I64));
    }

    if !filter.exclude_ids.is_empty() {
        conditions.push(format!(
            "e.id NOT IN ({})",
            placeholders(filter.exclude_ids.len())
        ));
        binds.extend(filter.exclude_ids.iter().copied().map(Bind::I64));
    }

    if let Some(bound) = &filter.modified_after {
        conditions.push("e.modified_at_utc >= ?".to_string());
        binds.push(Bind::DateTime(bound.to_utc()?.naive_utc()));
    }

    if let Some(bound) = &filter.modified_before {
        conditions.push("e.modified_at_utc <= ?".to_string());
        binds.push(Bind::DateTime(bound.to_utc()?.naive_utc()));
    }

    if let Some(id) = filter.id_gte {
        conditions.push("e.id >= ?".to_string());
        binds.push(Bind::I64(id));
    }

    if let Some(id) = filter.id_lte {
        conditions.push("e.id <= ?".to_string());
        binds.push(Bind::I64(id));
    }

    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let like = format!("%{}%", escape_like(search));
        conditions.push("(e.title LIKE ? OR e.body LIKE ?)".to_string());
        binds.push(Bind::Str(like.clone()));
        binds.push(Bind::Str(like));
    }

    if !filter.tax_clauses.is_empty() {
        let tr = tables.resolve(Table::TermRelationships, tenant, force);
        let tt = tables.resolve(Table::TermTaxonomy, tenant, force);
        let t = tables.resolve(Table::Terms, tenant, force);

        let mut clause_sql: Vec<String> = Vec::new();
        for clause in &filter.tax_clauses {
            clause_sql.push(format!(
                "EXISTS (SELECT 1 FROM {tr} tr \
                 JOIN {tt} tt ON tt.term_taxonomy_id = tr.term_taxonomy_id \
                 JOIN {t} t ON t.id = tt.term_id \
                 WHERE tr.object_id = e.id AND tt.taxonomy = ? AND {col} IN ({ph}))",
                col = clause.field.column(),
                ph = placeholders(clause.terms.len()),
            ));
            binds.push(Bind::Str(clause.taxonomy.clone()));
            if clause.field == TermField::Id {
                for term in &clause.terms {
                    let id: i64 = term.parse().map_err(|_| {
                        Error::Config(format!("non-numeric term id in taxonomy filter: {term}"))
                    })?;
                    binds.push(Bind::I64(id));
                }
            } else {
                binds.extend(clause.terms.iter().cloned().map(Bind::Str));
            }
        }

        let joiner = match filter.tax_relation {
            sitegraft_core::TaxRelation::And => " AND ",
            sitegraft_core::TaxRelation::Or => " OR ",
        };
        conditions.push(format!("({})", clause_sql.join(joiner)));
    }

    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }

    let (order_by, order) = filter.effective_order();
    sql.push_str(&format!(
        " ORDER BY {} {}, e.id ASC",
        order_by.column(),
        order.sql()
    ));

    sql.push_str(" LIMIT ? OFFSET ?");
    binds.push(Bind::I64(i64::from(filter.limit)));
    binds.push(Bind::I64(i64::from(filter.offset)));

    Ok((sql, binds))
}

/// Build the metadata SELECT for a page of entry ids.
pub(crate) fn build_meta_sql(
    entry_ids: &[i64],
    meta_keys: &[String],
    meta_table: &str,
) -> (String, Vec<Bind>) {
    let mut sql = format!(
        "SELECT entry_id, meta_key, meta_value FROM {meta_table} \
         WHERE entry_id IN ({})",
        placeholders(entry_ids.len())
    );
    let mut binds: Vec<Bind> = entry_ids.iter().copied().map(Bind::I64).collect();

    if !meta_keys.is_empty() {
        sql.push_str(&format!(" AND meta_key IN ({})", placeholders(meta_keys.len())));
        binds.extend(meta_keys.iter().cloned().map(Bind::Str));
    }

    sql.push_str(" ORDER BY id ASC");
    (sql, binds)
}

/// Merge a metadata row into a bag; a repeated key collapses into a list.
pub(crate) fn merge_meta(bag: &mut BTreeMap<String, MetaValue>, key: String, value: MetaValue) {
    match bag.remove(&key) {
        None => {
            bag.insert(key, value);
        }
        Some(MetaValue::List(mut items)) => {
            items.push(value);
            bag.insert(key, MetaValue::List(items));
        }
        Some(existing) => {
            bag.insert(key, MetaValue::List(vec![existing, value]));
        }
    }
}

fn row_to_source(row: &MySqlRow, tenant: u32) -> Result<SourceRow> {
    let created_utc: Option<NaiveDateTime> = row.try_get("created_at_utc")?;
    let modified_utc: Option<NaiveDateTime> = row.try_get("modified_at_utc")?;

    Ok(SourceRow {
        source_id: row.try_get("id")?,
        tenant,
        kind: row.try_get("kind")?,
        status: row.try_get("status")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        excerpt: row.try_get("excerpt")?,
        slug: row.try_get("slug")?,
        created_at: row.try_get("created_at")?,
        created_at_utc: created_utc.map(|dt| Utc.from_utc_datetime(&dt)),
        modified_at: row.try_get("modified_at")?,
        modified_at_utc: modified_utc.map(|dt| Utc.from_utc_datetime(&dt)),
        parent_source_id: row.try_get("parent_id")?,
        author_source_id: row.try_get("author_id")?,
        metadata: BTreeMap::new(),
    })
}

/// Entry fetcher bound to one pool and table resolver.
pub struct EntryQuery {
    pool: MySqlPool,
    tables: TenantTables,
}

impl EntryQuery {
    pub fn new(pool: MySqlPool, tables: TenantTables) -> Self {
        Self { pool, tables }
    }

    /// Fetch a page of rows per the filter, metadata attached when asked.
    pub async fn fetch_rows(&self, filter: &FetchFilter) -> Result<Vec<SourceRow>> {
        let start = Instant::now();
        let (sql, binds) = build_entry_sql(filter, &self.tables)?;

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let tenant = filter.tenant.unwrap_or(1);
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(row_to_source(row, tenant)?);
        }

        if filter.with_meta && !out.is_empty() {
            self.attach_meta(&mut out, filter).await?;
        }

        debug!(
            subsystem = "db",
            component = "entry_query",
            op = "fetch_rows",
            row_count = out.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Fetched entry page"
        );
        Ok(out)
    }

    /// Second round trip: metadata for the page, merged in memory.
    async fn attach_meta(&self, rows: &mut [SourceRow], filter: &FetchFilter) -> Result<()> {
        let meta_table =
            self.tables
                .resolve(Table::EntryMeta, filter.tenant, filter.force_base_prefix);
        let ids: Vec<i64> = rows.iter().map(|r| r.source_id).collect();
        let (sql, binds) = build_meta_sql(&ids, &filter.meta_keys, &meta_table);

        let meta_rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut by_entry: BTreeMap<i64, BTreeMap<String, MetaValue>> = BTreeMap::new();
        for row in &meta_rows {
            let entry_id: i64 = row.try_get("entry_id")?;
            let key: String = row.try_get("meta_key")?;
            let raw: String = row.try_get("meta_value")?;
            merge_meta(by_entry.entry(entry_id).or_default(), key, decode_meta(&raw));
        }

        for row in rows.iter_mut() {
            if let Some(bag) = by_entry.remove(&row.source_id) {
                row.metadata = bag;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegraft_core::{Order, OrderBy, TaxRelation, TaxonomyClause, TimeBound};

    fn tables() -> TenantTables {
        TenantTables::new("site_", true)
    }

    fn count_placeholders(sql: &str) -> usize {
        sql.matches('?').count()
    }

    #[test]
    fn test_default_filter_sql_shape() {
        let (sql, binds) = build_entry_sql(&FetchFilter::default(), &tables()).unwrap();

        assert!(sql.starts_with("SELECT e.id, e.kind"));
        assert!(sql.contains("FROM site_entries e"));
        assert!(sql.contains("e.kind IN (?)"));
        assert!(sql.contains("e.status IN (?)"));
        assert!(sql.ends_with("LIMIT ? OFFSET ?"));
        assert!(sql.contains("ORDER BY e.created_at DESC, e.id ASC"));
        assert_eq!(count_placeholders(&sql), binds.len());
    }

    #[test]
    fn test_tenant_resolves_table_names() {
        let filter = FetchFilter {
            tenant: Some(3),
            ..Default::default()
        };
        let (sql, _) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("FROM site_3_entries e"));
    }

    #[test]
    fn test_force_base_prefix() {
        let filter = FetchFilter {
            tenant: Some(3),
            force_base_prefix: true,
            ..Default::default()
        };
        let (sql, _) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("FROM site_entries e"));
    }

    #[test]
    fn test_status_any_expands_in_binds() {
        let filter = FetchFilter {
            statuses: vec!["any".to_string()],
            ..Default::default()
        };
        let (sql, binds) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("e.status IN (?,?,?,?,?)"));
        assert!(binds.contains(&Bind::Str("published".to_string())));
        assert!(binds.contains(&Bind::Str("private".to_string())));
    }

    #[test]
    fn test_include_exclude_ids() {
        let filter = FetchFilter {
            include_ids: vec![1, 2, 3],
            exclude_ids: vec![9],
            ..Default::default()
        };
        let (sql, binds) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("e.id IN (?,?,?)"));
        assert!(sql.contains("e.id NOT IN (?)"));
        assert!(binds.contains(&Bind::I64(9)));
    }

    #[test]
    fn test_modified_bound_binds_utc_and_flips_order() {
        let filter = FetchFilter {
            modified_after: Some(TimeBound::Text("2024-01-01T00:00:00Z".to_string())),
            ..Default::default()
        };
        let (sql, binds) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("e.modified_at_utc >= ?"));
        assert!(sql.contains("ORDER BY e.modified_at_utc ASC, e.id ASC"));

        let expected = NaiveDateTime::parse_from_str("2024-01-01 00:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        assert!(binds.contains(&Bind::DateTime(expected)));
    }

    #[test]
    fn test_id_range() {
        let filter = FetchFilter {
            id_gte: Some(100),
            id_lte: Some(200),
            ..Default::default()
        };
        let (sql, _) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("e.id >= ?"));
        assert!(sql.contains("e.id <= ?"));
    }

    #[test]
    fn test_search_is_like_escaped() {
        let filter = FetchFilter {
            search: Some("50%_done".to_string()),
            ..Default::default()
        };
        let (sql, binds) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("(e.title LIKE ? OR e.body LIKE ?)"));
        assert!(binds.contains(&Bind::Str("%50\\%\\_done%".to_string())));
    }

    #[test]
    fn test_tax_clause_joins_resolved_tables() {
        let filter = FetchFilter {
            tenant: Some(3),
            tax_clauses: vec![TaxonomyClause {
                taxonomy: "category".to_string(),
                field: TermField::Slug,
                terms: vec!["news".to_string(), "sports".to_string()],
            }],
            ..Default::default()
        };
        let (sql, binds) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("site_3_term_relationships tr"));
        assert!(sql.contains("site_3_term_taxonomy tt"));
        assert!(sql.contains("t.slug IN (?,?)"));
        assert!(binds.contains(&Bind::Str("category".to_string())));
        assert_eq!(count_placeholders(&sql), binds.len());
    }

    #[test]
    fn test_multiple_tax_clauses_or_relation() {
        let clause = |tax: &str| TaxonomyClause {
            taxonomy: tax.to_string(),
            field: TermField::Slug,
            terms: vec!["x".to_string()],
        };
        let filter = FetchFilter {
            tax_clauses: vec![clause("category"), clause("tag")],
            tax_relation: TaxRelation::Or,
            ..Default::default()
        };
        let (sql, _) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains(") OR EXISTS ("));
    }

    #[test]
    fn test_tax_clause_id_field_requires_numeric_terms() {
        let filter = FetchFilter {
            tax_clauses: vec![TaxonomyClause {
                taxonomy: "category".to_string(),
                field: TermField::Id,
                terms: vec!["12".to_string(), "abc".to_string()],
            }],
            ..Default::default()
        };
        assert!(matches!(
            build_entry_sql(&filter, &tables()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_explicit_order_applies() {
        let filter = FetchFilter {
            order_by: Some(OrderBy::Id),
            order: Some(Order::Asc),
            ..Default::default()
        };
        let (sql, _) = build_entry_sql(&filter, &tables()).unwrap();
        assert!(sql.contains("ORDER BY e.id ASC, e.id ASC"));
    }

    #[test]
    fn test_limit_offset_bound_last() {
        let filter = FetchFilter {
            limit: 50,
            offset: 100,
            ..Default::default()
        };
        let (_, binds) = build_entry_sql(&filter, &tables()).unwrap();
        assert_eq!(&binds[binds.len() - 2..], &[Bind::I64(50), Bind::I64(100)]);
    }

    #[test]
    fn test_meta_sql_with_key_filter() {
        let (sql, binds) = build_meta_sql(
            &[1, 2],
            &["_featured_id".to_string()],
            "site_entry_meta",
        );
        assert!(sql.contains("FROM site_entry_meta"));
        assert!(sql.contains("entry_id IN (?,?)"));
        assert!(sql.contains("meta_key IN (?)"));
        assert_eq!(binds.len(), 3);
    }

    #[test]
    fn test_merge_meta_collapses_repeats_into_list() {
        let mut bag = BTreeMap::new();
        merge_meta(&mut bag, "k".to_string(), MetaValue::scalar("a"));
        assert_eq!(bag.get("k"), Some(&MetaValue::scalar("a")));

        merge_meta(&mut bag, "k".to_string(), MetaValue::scalar("b"));
        assert_eq!(
            bag.get("k"),
            Some(&MetaValue::List(vec![
                MetaValue::scalar("a"),
                MetaValue::scalar("b")
            ]))
        );

        merge_meta(&mut bag, "k".to_string(), MetaValue::scalar("c"));
        let MetaValue::List(items) = bag.get("k").unwrap() else {
            panic!("expected list");
        };
        assert_eq!(items.len(), 3);
    }
}

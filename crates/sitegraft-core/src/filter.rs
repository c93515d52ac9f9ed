//! Typed fetch filter for the remote query builder.
//!
//! Every value in the filter is bound as a query parameter downstream;
//! identifier-shaped fields (ordering columns, taxonomy match fields) are
//! validated against allow-lists here so the query builder never inlines
//! unchecked input.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Status sentinel expanding to every publishable status.
pub const STATUS_ANY: &str = "any";

/// The fixed status set `any` expands to.
pub const ANY_STATUSES: [&str; 5] = ["published", "pending", "draft", "scheduled", "private"];

/// Statuses an imported entry may carry locally; anything else degrades to
/// `published` at write time.
pub const WRITABLE_STATUSES: [&str; 4] = ["published", "draft", "pending", "private"];

/// Ordering columns the remote query accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBy {
    Id,
    #[default]
    CreatedAt,
    ModifiedAt,
    Title,
}

impl OrderBy {
    /// Parse an ordering column, rejecting anything off the allow-list.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "id" => Some(OrderBy::Id),
            "created_at" => Some(OrderBy::CreatedAt),
            "modified_at" => Some(OrderBy::ModifiedAt),
            "title" => Some(OrderBy::Title),
            _ => None,
        }
    }

    /// The physical column, qualified for the entries table alias.
    pub fn column(&self) -> &'static str {
        match self {
            OrderBy::Id => "e.id",
            OrderBy::CreatedAt => "e.created_at",
            OrderBy::ModifiedAt => "e.modified_at_utc",
            OrderBy::Title => "e.title",
        }
    }
}

/// Sort direction; anything that is not `asc` is `desc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Order {
    Asc,
    #[default]
    Desc,
}

impl Order {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            Order::Asc
        } else {
            Order::Desc
        }
    }

    pub fn sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// A modified-time bound: epoch seconds or a formatted timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeBound {
    Epoch(i64),
    Text(String),
}

impl TimeBound {
    /// Normalize to UTC. Text accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`
    /// (assumed UTC), or a bare date.
    pub fn to_utc(&self) -> Result<DateTime<Utc>> {
        match self {
            TimeBound::Epoch(secs) => Utc
                .timestamp_opt(*secs, 0)
                .single()
                .ok_or_else(|| Error::Config(format!("timestamp out of range: {secs}"))),
            TimeBound::Text(s) => {
                let s = s.trim();
                if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                    return Ok(dt.with_timezone(&Utc));
                }
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                    return Ok(Utc.from_utc_datetime(&naive));
                }
                if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    let naive = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
                    return Ok(Utc.from_utc_datetime(&naive));
                }
                Err(Error::Config(format!("unparseable time bound: {s}")))
            }
        }
    }
}

/// Field a taxonomy clause matches terms by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermField {
    #[default]
    Slug,
    Name,
    Id,
}

impl TermField {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "slug" => Some(TermField::Slug),
            "name" => Some(TermField::Name),
            "id" => Some(TermField::Id),
            _ => None,
        }
    }

    /// The physical column, qualified for the terms table alias.
    pub fn column(&self) -> &'static str {
        match self {
            TermField::Slug => "t.slug",
            TermField::Name => "t.name",
            TermField::Id => "t.id",
        }
    }
}

/// One taxonomy constraint: entries carrying any of `terms` in `taxonomy`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyClause {
    pub taxonomy: String,
    pub field: TermField,
    pub terms: Vec<String>,
}

/// How multiple taxonomy clauses combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaxRelation {
    #[default]
    And,
    Or,
}

impl TaxRelation {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("or") {
            TaxRelation::Or
        } else {
            TaxRelation::And
        }
    }
}

/// Parameterized filter for one remote fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchFilter {
    /// Remote tenant to read from; `None` targets the base schema.
    pub tenant: Option<u32>,
    /// Entry kinds; empty means the default kind set by the caller.
    pub kinds: Vec<String>,
    /// Statuses; the [`STATUS_ANY`] sentinel expands to [`ANY_STATUSES`].
    pub statuses: Vec<String>,
    pub include_ids: Vec<i64>,
    pub exclude_ids: Vec<i64>,
    pub modified_after: Option<TimeBound>,
    pub modified_before: Option<TimeBound>,
    pub id_gte: Option<i64>,
    pub id_lte: Option<i64>,
    /// Free-text search over title and body, escaped for literal matching.
    pub search: Option<String>,
    pub tax_clauses: Vec<TaxonomyClause>,
    pub tax_relation: TaxRelation,
    /// Explicit ordering; when unset the default depends on whether a
    /// modified bound is present (see [`FetchFilter::effective_order`]).
    pub order_by: Option<OrderBy>,
    pub order: Option<Order>,
    pub limit: u32,
    pub offset: u32,
    /// Attach metadata rows to results (second round trip).
    pub with_meta: bool,
    /// Restrict attached metadata to these keys; empty fetches all.
    pub meta_keys: Vec<String>,
    /// Resolve against base-prefix tables regardless of tenant.
    pub force_base_prefix: bool,
}

impl Default for FetchFilter {
    fn default() -> Self {
        Self {
            tenant: None,
            kinds: vec!["article".to_string()],
            statuses: vec!["published".to_string()],
            include_ids: Vec::new(),
            exclude_ids: Vec::new(),
            modified_after: None,
            modified_before: None,
            id_gte: None,
            id_lte: None,
            search: None,
            tax_clauses: Vec::new(),
            tax_relation: TaxRelation::And,
            order_by: None,
            order: None,
            limit: 10,
            offset: 0,
            with_meta: true,
            meta_keys: Vec::new(),
            force_base_prefix: false,
        }
    }
}

impl FetchFilter {
    /// Statuses with the `any` sentinel expanded.
    pub fn expanded_statuses(&self) -> Vec<String> {
        if self.statuses.iter().any(|s| s == STATUS_ANY) {
            ANY_STATUSES.iter().map(|s| s.to_string()).collect()
        } else {
            self.statuses.clone()
        }
    }

    /// Whether any modified-time bound is present.
    pub fn has_modified_bound(&self) -> bool {
        self.modified_after.is_some() || self.modified_before.is_some()
    }

    /// Effective ordering: explicit settings win; otherwise a modified
    /// bound flips the default to `modified_at ASC` so incremental syncs
    /// walk forward through change time, else `created_at DESC`.
    pub fn effective_order(&self) -> (OrderBy, Order) {
        match (self.order_by, self.order) {
            (Some(by), order) => (by, order.unwrap_or_default()),
            (None, _) if self.has_modified_bound() => (OrderBy::ModifiedAt, Order::Asc),
            (None, order) => (OrderBy::CreatedAt, order.unwrap_or_default()),
        }
    }

    /// Validate the parts the query builder will rely on.
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::Config("fetch limit must be positive".to_string()));
        }
        for clause in &self.tax_clauses {
            if clause.taxonomy.is_empty() {
                return Err(Error::Config("taxonomy clause with empty taxonomy".to_string()));
            }
            if clause.terms.is_empty() {
                return Err(Error::Config(format!(
                    "taxonomy clause for '{}' has no terms",
                    clause.taxonomy
                )));
            }
        }
        if let Some(bound) = &self.modified_after {
            bound.to_utc()?;
        }
        if let Some(bound) = &self.modified_before {
            bound.to_utc()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_any_expansion() {
        let filter = FetchFilter {
            statuses: vec![STATUS_ANY.to_string()],
            ..Default::default()
        };
        assert_eq!(filter.expanded_statuses(), ANY_STATUSES.to_vec());
    }

    #[test]
    fn test_status_list_passes_through() {
        let filter = FetchFilter {
            statuses: vec!["draft".to_string(), "published".to_string()],
            ..Default::default()
        };
        assert_eq!(filter.expanded_statuses(), vec!["draft", "published"]);
    }

    #[test]
    fn test_order_default_without_modified_bound() {
        let filter = FetchFilter::default();
        assert_eq!(filter.effective_order(), (OrderBy::CreatedAt, Order::Desc));
    }

    #[test]
    fn test_order_default_flips_under_modified_filter() {
        let filter = FetchFilter {
            modified_after: Some(TimeBound::Text("2024-01-01 00:00:00".to_string())),
            ..Default::default()
        };
        assert_eq!(filter.effective_order(), (OrderBy::ModifiedAt, Order::Asc));
    }

    #[test]
    fn test_explicit_order_wins() {
        let filter = FetchFilter {
            modified_after: Some(TimeBound::Epoch(0)),
            order_by: Some(OrderBy::Id),
            order: Some(Order::Desc),
            ..Default::default()
        };
        assert_eq!(filter.effective_order(), (OrderBy::Id, Order::Desc));
    }

    #[test]
    fn test_time_bound_epoch() {
        let bound = TimeBound::Epoch(1_700_000_000);
        assert_eq!(bound.to_utc().unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_time_bound_rfc3339() {
        let bound = TimeBound::Text("2024-01-01T00:00:00Z".to_string());
        let dt = bound.to_utc().unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_time_bound_datetime_text() {
        let bound = TimeBound::Text("2024-06-15 12:30:00".to_string());
        assert_eq!(bound.to_utc().unwrap().timestamp(), 1_718_454_600);
    }

    #[test]
    fn test_time_bound_bare_date() {
        let bound = TimeBound::Text("2024-01-01".to_string());
        assert_eq!(
            bound.to_utc().unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_time_bound_garbage_is_config_error() {
        let bound = TimeBound::Text("yesterday-ish".to_string());
        assert!(matches!(bound.to_utc(), Err(Error::Config(_))));
    }

    #[test]
    fn test_order_by_allow_list() {
        assert_eq!(OrderBy::parse("id"), Some(OrderBy::Id));
        assert_eq!(OrderBy::parse("modified_at"), Some(OrderBy::ModifiedAt));
        assert_eq!(OrderBy::parse("body"), None);
        assert_eq!(OrderBy::parse("id; DROP TABLE entries"), None);
    }

    #[test]
    fn test_term_field_allow_list() {
        assert_eq!(TermField::parse("slug"), Some(TermField::Slug));
        assert_eq!(TermField::parse("guid"), None);
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let filter = FetchFilter {
            limit: 0,
            ..Default::default()
        };
        assert!(matches!(filter.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_empty_tax_clause() {
        let filter = FetchFilter {
            tax_clauses: vec![TaxonomyClause {
                taxonomy: "category".to_string(),
                field: TermField::Slug,
                terms: Vec::new(),
            }],
            ..Default::default()
        };
        assert!(matches!(filter.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_checks_time_bounds_before_io() {
        let filter = FetchFilter {
            modified_after: Some(TimeBound::Text("bogus".to_string())),
            ..Default::default()
        };
        assert!(matches!(filter.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_accepts_default() {
        assert!(FetchFilter::default().validate().is_ok());
    }
}

//! Tenant-aware physical table name resolution.
//!
//! The remote schema follows a multi-tenant prefixing convention: tenant 1
//! (or a single-tenant installation) lives under the base prefix
//! (`site_entries`), every other tenant under a numbered prefix
//! (`site_3_entries`). The users tables are shared across tenants and are
//! always base-prefixed.

use sitegraft_crypto::CredentialRecord;

/// Logical tables of the remote schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Entries,
    EntryMeta,
    Terms,
    TermTaxonomy,
    TermRelationships,
    TermMeta,
    Users,
    UserMeta,
    Options,
}

impl Table {
    /// Suffix of the physical name.
    pub fn logical(&self) -> &'static str {
        match self {
            Table::Entries => "entries",
            Table::EntryMeta => "entry_meta",
            Table::Terms => "terms",
            Table::TermTaxonomy => "term_taxonomy",
            Table::TermRelationships => "term_relationships",
            Table::TermMeta => "term_meta",
            Table::Users => "users",
            Table::UserMeta => "user_meta",
            Table::Options => "options",
        }
    }

    /// Users and user metadata are shared across tenants.
    pub fn tenant_scoped(&self) -> bool {
        !matches!(self, Table::Users | Table::UserMeta)
    }
}

/// Resolver from logical table names to physical, tenant-qualified names.
///
/// Pure and infallible: unresolvable inputs degrade to the base-schema
/// form; callers validate tenant existence independently.
#[derive(Debug, Clone)]
pub struct TenantTables {
    prefix: String,
    multi_tenant: bool,
}

impl TenantTables {
    pub fn new(prefix: impl Into<String>, multi_tenant: bool) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: if prefix.is_empty() {
                "site_".to_string()
            } else {
                prefix
            },
            multi_tenant,
        }
    }

    pub fn from_record(record: &CredentialRecord) -> Self {
        Self::new(record.table_prefix.clone(), record.multi_tenant)
    }

    /// The base table prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve a logical table for a tenant.
    ///
    /// Base form for: no tenant, tenant 1, single-tenant installations,
    /// `force_base`, or tables that are not tenant-scoped.
    pub fn resolve(&self, table: Table, tenant: Option<u32>, force_base: bool) -> String {
        let base = || format!("{}{}", self.prefix, table.logical());

        if force_base || !self.multi_tenant || !table.tenant_scoped() {
            return base();
        }

        match tenant {
            None | Some(0) | Some(1) => base(),
            Some(id) => format!("{}{}_{}", self.prefix, id, table.logical()),
        }
    }

    /// The tenant-scoped meta key carrying a user's membership in a tenant
    /// (used to filter shared users by tenant).
    pub fn tenant_capability_key(&self, tenant: u32) -> String {
        format!("{}{}_capabilities", self.prefix, tenant)
    }
}

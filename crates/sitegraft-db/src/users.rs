//! Remote user fetchers.
//!
//! The users tables are shared across tenants; membership in a tenant is
//! carried by a tenant-scoped capability meta key, which is what the id
//! query joins on for tenant > 1.

use std::collections::HashMap;

use sqlx::mysql::MySqlPool;
use sqlx::Row;

use sitegraft_core::{decode_meta, Error, MetaValue, Result, SourceUser, UserSelection};

use crate::query::{bind_all, Bind};
use crate::tables::{Table, TenantTables};
use crate::placeholders;

/// User fetcher bound to one pool and table resolver.
pub struct UserQuery {
    pool: MySqlPool,
    tables: TenantTables,
}

impl UserQuery {
    pub fn new(pool: MySqlPool, tables: TenantTables) -> Self {
        Self { pool, tables }
    }

    /// Candidate user ids for a selection, ascending.
    pub async fn fetch_user_ids(&self, selection: &UserSelection) -> Result<Vec<i64>> {
        let t_users = self.tables.resolve(Table::Users, None, false);
        let t_meta = self.tables.resolve(Table::UserMeta, None, false);

        let mut sql = format!("SELECT DISTINCT u.id FROM {t_users} u");
        let mut binds: Vec<Bind> = Vec::new();

        // Shared users table: tenant membership rides on the capability key.
        if let Some(tenant) = selection.tenant.filter(|t| *t > 1) {
            if !selection.force_base_prefix {
                sql.push_str(&format!(
                    " INNER JOIN {t_meta} um ON um.user_id = u.id AND um.meta_key = ?"
                ));
                binds.push(Bind::Str(self.tables.tenant_capability_key(tenant)));
            }
        }

        let mut conditions: Vec<String> = Vec::new();

        if !selection.include_ids.is_empty() {
            conditions.push(format!(
                "u.id IN ({})",
                placeholders(selection.include_ids.len())
            ));
            binds.extend(selection.include_ids.iter().copied().map(Bind::I64));
        }

        if !selection.exclude_ids.is_empty() {
            conditions.push(format!(
                "u.id NOT IN ({})",
                placeholders(selection.exclude_ids.len())
            ));
            binds.extend(selection.exclude_ids.iter().copied().map(Bind::I64));
        }

        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        sql.push_str(" ORDER BY u.id ASC");

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(Error::Database))
            .collect()
    }

    /// User rows for a chunk of ids.
    pub async fn fetch_users(&self, ids: &[i64]) -> Result<Vec<SourceUser>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let t_users = self.tables.resolve(Table::Users, None, false);
        let sql = format!(
            "SELECT u.id, u.login, u.email, u.display_name, u.nice_name, u.url, \
             u.registered_at, u.secret_hash, u.status \
             FROM {t_users} u WHERE u.id IN ({}) ORDER BY u.id ASC",
            placeholders(ids.len())
        );
        let binds: Vec<Bind> = ids.iter().copied().map(Bind::I64).collect();

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(SourceUser {
                source_id: row.try_get("id")?,
                login: row.try_get("login")?,
                email: row.try_get("email")?,
                display_name: row.try_get("display_name")?,
                nice_name: row.try_get("nice_name")?,
                url: row.try_get("url")?,
                registered_at: row.try_get("registered_at")?,
                secret_hash: row.try_get("secret_hash")?,
                status: row.try_get("status")?,
            });
        }
        Ok(out)
    }

    /// User metadata for a chunk of ids, in storage order per user.
    pub async fn fetch_user_meta(
        &self,
        ids: &[i64],
    ) -> Result<HashMap<i64, Vec<(String, MetaValue)>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let t_meta = self.tables.resolve(Table::UserMeta, None, false);
        let sql = format!(
            "SELECT um.user_id, um.meta_key, um.meta_value FROM {t_meta} um \
             WHERE um.user_id IN ({}) ORDER BY um.id ASC",
            placeholders(ids.len())
        );
        let binds: Vec<Bind> = ids.iter().copied().map(Bind::I64).collect();

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut out: HashMap<i64, Vec<(String, MetaValue)>> = HashMap::new();
        for row in &rows {
            let user_id: i64 = row.try_get("user_id")?;
            let key: String = row.try_get("meta_key")?;
            let raw: String = row.try_get("meta_value")?;
            out.entry(user_id).or_default().push((key, decode_meta(&raw)));
        }
        Ok(out)
    }
}

//! Remote attachment metadata fetchers.
//!
//! Attachments live in the entries table under the `attachment` kind;
//! their relative storage path and derived-size manifest ride on entry
//! metadata.

use std::collections::HashMap;

use sqlx::mysql::MySqlPool;
use sqlx::Row;

use sitegraft_core::{decode_meta, Error, MetaValue, Result, SourceAttachment};

use crate::query::{bind_all, Bind};
use crate::tables::{Table, TenantTables};
use crate::placeholders;

/// Meta key holding an attachment's relative storage path.
pub const META_ATTACHED_FILE: &str = "_attached_file";

/// Meta key holding an attachment's derived-size manifest.
pub const META_ATTACHMENT_MANIFEST: &str = "_attachment_manifest";

/// Attachment fetcher bound to one pool and table resolver.
pub struct AttachmentQuery {
    pool: MySqlPool,
    tables: TenantTables,
}

impl AttachmentQuery {
    pub fn new(pool: MySqlPool, tables: TenantTables) -> Self {
        Self { pool, tables }
    }

    /// Attachment rows (path, mime, manifest, URL) for a set of ids.
    pub async fn fetch_attachments(
        &self,
        ids: &[i64],
        tenant: Option<u32>,
        force_base_prefix: bool,
    ) -> Result<Vec<SourceAttachment>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let t_entries = self.tables.resolve(Table::Entries, tenant, force_base_prefix);
        let t_meta = self
            .tables
            .resolve(Table::EntryMeta, tenant, force_base_prefix);

        let sql = format!(
            "SELECT e.id, e.title, e.mime, e.created_at, e.link \
             FROM {t_entries} e \
             WHERE e.id IN ({}) AND e.kind = 'attachment'",
            placeholders(ids.len())
        );
        let binds: Vec<Bind> = ids.iter().copied().map(Bind::I64).collect();

        let rows = bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let meta_sql = format!(
            "SELECT entry_id, meta_key, meta_value FROM {t_meta} \
             WHERE entry_id IN ({}) AND meta_key IN (?,?)",
            placeholders(ids.len())
        );
        let mut meta_binds = binds.clone();
        meta_binds.push(Bind::Str(META_ATTACHED_FILE.to_string()));
        meta_binds.push(Bind::Str(META_ATTACHMENT_MANIFEST.to_string()));

        let meta_rows = bind_all(sqlx::query(&meta_sql), &meta_binds)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut files: HashMap<i64, String> = HashMap::new();
        let mut manifests: HashMap<i64, MetaValue> = HashMap::new();
        for row in &meta_rows {
            let entry_id: i64 = row.try_get("entry_id")?;
            let key: String = row.try_get("meta_key")?;
            let raw: String = row.try_get("meta_value")?;
            match key.as_str() {
                META_ATTACHED_FILE => {
                    files.insert(entry_id, raw);
                }
                META_ATTACHMENT_MANIFEST => {
                    manifests.insert(entry_id, decode_meta(&raw));
                }
                _ => {}
            }
        }

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.try_get("id")?;
            out.push(SourceAttachment {
                source_id: id,
                title: row.try_get("title")?,
                mime: row.try_get("mime")?,
                created_at: row.try_get("created_at")?,
                file_path: files.remove(&id).unwrap_or_default(),
                manifest: manifests.remove(&id),
                source_url: row.try_get("link")?,
            });
        }
        Ok(out)
    }

    /// Public URL of a single remote attachment, if present.
    pub async fn fetch_attachment_url(
        &self,
        id: i64,
        tenant: Option<u32>,
    ) -> Result<Option<String>> {
        let t_entries = self.tables.resolve(Table::Entries, tenant, false);
        let sql = format!(
            "SELECT e.link FROM {t_entries} e \
             WHERE e.id = ? AND e.kind = 'attachment' LIMIT 1"
        );

        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        match row {
            Some(row) => Ok(Some(row.try_get("link")?)),
            None => Ok(None),
        }
    }
}

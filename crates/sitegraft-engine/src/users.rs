//! Remote user import.
//!
//! Users are shared across tenants on the remote side; membership in a
//! tenant is established by the tenant-scoped capability meta key, which
//! the remote id query filters on. Locally, accounts are matched by login
//! first and email second; created accounts get a collision-suffixed login
//! and a fresh random secret — the legacy credential hash is carried as
//! metadata, never applied to the local credential slot.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use rand::{distributions::Alphanumeric, Rng};
use tracing::info;

use sitegraft_core::{
    ContentStore, EntityKind, MetaValue, RemoteSource, Result, SourceUser, UserImportSummary,
    UserSelection, UserWrite, META_LAST_UPDATED, META_RUN_ID, META_SOURCE_ID, META_SOURCE_META,
    META_SOURCE_TENANT, RESERVED_META_KEYS,
};

use crate::identity::IdentityMapper;

/// Meta key carrying the legacy credential hash of an imported user.
pub const META_SOURCE_SECRET_HASH: &str = "_sitegraft_source_secret_hash";

/// Default user chunk size.
pub const DEFAULT_USER_CHUNK: usize = 500;

/// Options for one user import invocation.
#[derive(Debug, Clone)]
pub struct UserImportOptions {
    pub tenant: u32,
    pub include_ids: Vec<i64>,
    pub exclude_ids: Vec<i64>,
    /// Chunk size; 0 uses the default.
    pub chunk: usize,
    pub dry_run: bool,
    pub run_id: u64,
    pub force_base_prefix: bool,
    /// Logins never imported (e.g. the migration service account).
    pub skip_logins: Vec<String>,
    /// Table prefix of the remote installation (tenant meta-key detection).
    pub remote_prefix: String,
    /// Table prefix of the local installation (tenant meta-key mirroring).
    pub local_prefix: String,
}

impl Default for UserImportOptions {
    fn default() -> Self {
        Self {
            tenant: 1,
            include_ids: Vec::new(),
            exclude_ids: Vec::new(),
            chunk: 0,
            dry_run: false,
            run_id: 0,
            force_base_prefix: false,
            skip_logins: Vec::new(),
            remote_prefix: "site_".to_string(),
            local_prefix: "site_".to_string(),
        }
    }
}

/// Mirror tenant-scoped meta keys to the local prefix variant when
/// importing from tenant > 1 into a single-tenant target. All original
/// keys are preserved; the mirrored variant is added alongside.
pub fn normalize_user_meta_for_target(
    metas: &[(String, MetaValue)],
    local_prefix: &str,
    tenant: u32,
    remote_prefix: &str,
) -> Vec<(String, MetaValue)> {
    if tenant <= 1 {
        return metas.to_vec();
    }

    let tenant_prefix = format!("{remote_prefix}{tenant}_");
    let mut out = Vec::with_capacity(metas.len());

    for (key, value) in metas {
        out.push((key.clone(), value.clone()));
        if let Some(rest) = key.strip_prefix(&tenant_prefix) {
            out.push((format!("{local_prefix}{rest}"), value.clone()));
        }
    }

    out
}

fn random_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(24)
        .map(char::from)
        .collect()
}

/// Collapse repeated meta keys into a snapshot bag (repeats become lists).
fn snapshot_meta(metas: &[(String, MetaValue)]) -> BTreeMap<String, MetaValue> {
    let mut bag: BTreeMap<String, MetaValue> = BTreeMap::new();
    for (key, value) in metas {
        match bag.remove(key) {
            None => {
                bag.insert(key.clone(), value.clone());
            }
            Some(MetaValue::List(mut items)) => {
                items.push(value.clone());
                bag.insert(key.clone(), MetaValue::List(items));
            }
            Some(existing) => {
                bag.insert(key.clone(), MetaValue::List(vec![existing, value.clone()]));
            }
        }
    }
    bag
}

/// Imports remote users, batch or single.
pub struct UserImporter {
    remote: Arc<dyn RemoteSource>,
    store: Arc<dyn ContentStore>,
    mapper: Arc<IdentityMapper>,
}

impl UserImporter {
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

    /// Import every user matching the options; one user's failure never
    /// aborts the batch.
    pub async fn import_users(&self, opts: &UserImportOptions) -> Result<UserImportSummary> {
        let start = Instant::now();
        let mut summary = UserImportSummary {
            run_id: opts.run_id,
            ..Default::default()
        };

        let selection = UserSelection {
            tenant: Some(opts.tenant),
            include_ids: opts.include_ids.clone(),
            exclude_ids: opts.exclude_ids.clone(),
            force_base_prefix: opts.force_base_prefix,
        };
        let ids = self.remote.fetch_user_ids(&selection).await?;
        summary.found = ids.len() as u64;
        if ids.is_empty() {
            return Ok(summary);
        }

        let chunk = if opts.chunk == 0 {
            DEFAULT_USER_CHUNK
        } else {
            opts.chunk
        };

        for page in ids.chunks(chunk) {
            let users = self.remote.fetch_users(page).await?;
            let mut meta = self.remote.fetch_user_meta(page).await?;

            for user in &users {
                if opts.skip_logins.contains(&user.login) {
                    continue;
                }
                let metas = meta.remove(&user.source_id).unwrap_or_default();
                match self.import_one(user, &metas, opts).await {
                    Ok(Some((local, is_new))) => {
                        summary.map.insert(user.source_id, local);
                        if is_new {
                            summary.imported += 1;
                        } else {
                            summary.updated += 1;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        summary
                            .errors
                            .entry(user.source_id)
                            .or_default()
                            .push(e.to_string());
                    }
                }
            }
        }

        info!(
            subsystem = "engine",
            component = "users",
            op = "import_users",
            tenant = opts.tenant,
            run_id = opts.run_id,
            found = summary.found,
            imported = summary.imported,
            updated = summary.updated,
            duration_ms = start.elapsed().as_millis() as u64,
            "User import finished"
        );
        Ok(summary)
    }

    /// Import a single remote user; `Ok(None)` when it does not exist
    /// remotely or the run is dry and the user is unmapped.
    pub async fn import_user(
        &self,
        source_user_id: i64,
        opts: &UserImportOptions,
    ) -> Result<Option<i64>> {
        let users = self.remote.fetch_users(&[source_user_id]).await?;
        let Some(user) = users.first() else {
            return Ok(None);
        };

        let mut meta = self.remote.fetch_user_meta(&[source_user_id]).await?;
        let metas = meta.remove(&source_user_id).unwrap_or_default();

        Ok(self
            .import_one(user, &metas, opts)
            .await?
            .map(|(local, _)| local))
    }

    /// Returns `(local_id, is_new)`, or `None` in dry runs.
    async fn import_one(
        &self,
        user: &SourceUser,
        metas: &[(String, MetaValue)],
        opts: &UserImportOptions,
    ) -> Result<Option<(i64, bool)>> {
        // Login is the primary match; email catches renamed accounts.
        let mut target = self.store.find_user_by_login(&user.login).await?;
        if target.is_none() && !user.email.is_empty() {
            target = self.store.find_user_by_email(&user.email).await?;
        }

        if opts.dry_run {
            return Ok(None);
        }

        let (local, is_new) = match target {
            Some(local) => {
                // Refresh display fields only; the local login and secret
                // are left untouched.
                self.store
                    .update_user(
                        local,
                        &UserWrite {
                            login: String::new(),
                            email: user.email.clone(),
                            display_name: user.display_name.clone(),
                            nice_name: user.nice_name.clone(),
                            url: user.url.clone(),
                            registered_at: user.registered_at,
                            secret: String::new(),
                        },
                    )
                    .await?;
                (local, false)
            }
            None => {
                let mut candidate = user.login.clone();
                let mut suffix = 1;
                while self.store.find_user_by_login(&candidate).await?.is_some() {
                    candidate = format!("{}_{}", user.login, suffix);
                    suffix += 1;
                }

                let local = self
                    .store
                    .create_user(&UserWrite {
                        login: candidate,
                        email: user.email.clone(),
                        display_name: user.display_name.clone(),
                        nice_name: user.nice_name.clone(),
                        url: user.url.clone(),
                        registered_at: user.registered_at,
                        secret: random_secret(),
                    })
                    .await?;
                (local, true)
            }
        };

        let normalized = normalize_user_meta_for_target(
            metas,
            &opts.local_prefix,
            opts.tenant,
            &opts.remote_prefix,
        );
        for (key, value) in &normalized {
            if key.is_empty() || RESERVED_META_KEYS.contains(&key.as_str()) {
                continue;
            }
            self.store.set_user_meta(local, key, value).await?;
        }

        // Identity and audit keys written last.
        self.store
            .set_user_meta(local, META_SOURCE_ID, &MetaValue::from(user.source_id))
            .await?;
        self.store
            .set_user_meta(
                local,
                META_SOURCE_TENANT,
                &MetaValue::scalar(opts.tenant.to_string()),
            )
            .await?;
        self.store
            .set_user_meta(
                local,
                META_SOURCE_META,
                &MetaValue::Map(snapshot_meta(metas)),
            )
            .await?;
        if !user.secret_hash.is_empty() {
            self.store
                .set_user_meta(
                    local,
                    META_SOURCE_SECRET_HASH,
                    &MetaValue::scalar(&user.secret_hash),
                )
                .await?;
        }
        self.store
            .set_user_meta(
                local,
                META_LAST_UPDATED,
                &MetaValue::scalar(chrono::Utc::now().timestamp().to_string()),
            )
            .await?;
        if opts.run_id > 0 {
            self.store
                .set_user_meta(local, META_RUN_ID, &MetaValue::scalar(opts.run_id.to_string()))
                .await?;
        }

        self.mapper
            .record_link(user.source_id, opts.tenant, EntityKind::User, local)
            .await;
        Ok(Some((local, is_new)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryRemote, MemoryStore};
    use std::sync::atomic::Ordering;

    fn user(id: i64, login: &str, email: &str) -> SourceUser {
        SourceUser {
            source_id: id,
            login: login.to_string(),
            email: email.to_string(),
            display_name: format!("User {login}"),
            nice_name: login.to_string(),
            url: String::new(),
            registered_at: None,
            secret_hash: "phpass$abc".to_string(),
            status: 0,
        }
    }

    fn importer(remote: Arc<MemoryRemote>, store: Arc<MemoryStore>) -> UserImporter {
        let mapper = Arc::new(IdentityMapper::new(store.clone()));
        UserImporter::new(remote, store, mapper)
    }

    #[tokio::test]
    async fn test_import_creates_user_with_identity_meta() {
        let store = Arc::new(MemoryStore::new());
        let mut remote = MemoryRemote::new();
        remote.users = vec![user(7, "alice", "alice@example.org")];
        let importer = importer(Arc::new(remote), store.clone());

        let summary = importer
            .import_users(&UserImportOptions {
                tenant: 3,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(summary.found, 1);
        assert_eq!(summary.imported, 1);
        let local = summary.map[&7];
        assert_eq!(store.user(local).unwrap().login, "alice");
        assert_eq!(
            store.user_meta(local, META_SOURCE_ID),
            Some(MetaValue::scalar("7"))
        );
        assert_eq!(
            store.user_meta(local, META_SOURCE_TENANT),
            Some(MetaValue::scalar("3"))
        );
        assert_eq!(
            store.user_meta(local, META_SOURCE_SECRET_HASH),
            Some(MetaValue::scalar("phpass$abc"))
        );
        // A fresh random secret, never the legacy hash.
        assert_ne!(store.user(local).unwrap().secret, "phpass$abc");
        assert!(!store.user(local).unwrap().secret.is_empty());
    }

    #[tokio::test]
    async fn test_second_run_updates_not_creates() {
        let store = Arc::new(MemoryStore::new());
        let mut remote = MemoryRemote::new();
        remote.users = vec![user(7, "alice", "alice@example.org")];
        let remote = Arc::new(remote);

        let opts = UserImportOptions {
            tenant: 1,
            ..Default::default()
        };

        let first = importer(remote.clone(), store.clone())
            .import_users(&opts)
            .await
            .unwrap();
        let second = importer(remote, store.clone())
            .import_users(&opts)
            .await
            .unwrap();

        assert_eq!(first.imported, 1);
        assert_eq!(second.imported, 0);
        assert_eq!(second.updated, 1);
        assert_eq!(first.map, second.map);
        assert_eq!(store.users_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_login_match_updates_existing_account() {
        let store = Arc::new(MemoryStore::new());
        // A pre-existing local account already owns the login.
        let seeded = store.seed_user(UserWrite {
            login: "alice".to_string(),
            email: "other@example.org".to_string(),
            ..Default::default()
        });

        let mut remote = MemoryRemote::new();
        remote.users = vec![user(7, "alice", "alice@example.org")];
        let importer = importer(Arc::new(remote), store.clone());

        let summary = importer
            .import_users(&UserImportOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.updated, 1);
        assert_eq!(summary.imported, 0);
        assert_eq!(summary.map[&7], seeded);
        // The account's stored login survives the update.
        assert_eq!(store.user(seeded).unwrap().login, "alice");
    }

    #[tokio::test]
    async fn test_email_match_avoids_duplicate_account() {
        let store = Arc::new(MemoryStore::new());
        store.seed_user(UserWrite {
            login: "a.silva".to_string(),
            email: "alice@example.org".to_string(),
            ..Default::default()
        });

        let mut remote = MemoryRemote::new();
        remote.users = vec![user(7, "alice", "alice@example.org")];
        let importer = importer(Arc::new(remote), store.clone());

        let summary = importer
            .import_users(&UserImportOptions::default())
            .await
            .unwrap();

        assert_eq!(summary.imported, 0);
        assert_eq!(summary.updated, 1);
        assert_eq!(store.users_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tenant_meta_keys_are_mirrored() {
        let metas = vec![
            (
                "site_3_capabilities".to_string(),
                MetaValue::scalar("a:1:{s:6:\"editor\";b:1;}"),
            ),
            ("nickname".to_string(), MetaValue::scalar("ali")),
        ];
        let out = normalize_user_meta_for_target(&metas, "local_", 3, "site_");

        let keys: Vec<&str> = out.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"site_3_capabilities"));
        assert!(keys.contains(&"local_capabilities"));
        assert!(keys.contains(&"nickname"));
        assert!(!keys.contains(&"local_nickname"));
    }

    #[tokio::test]
    async fn test_tenant_one_meta_passthrough() {
        let metas = vec![("nickname".to_string(), MetaValue::scalar("ali"))];
        assert_eq!(
            normalize_user_meta_for_target(&metas, "local_", 1, "site_"),
            metas
        );
    }

    #[tokio::test]
    async fn test_poisoned_identity_meta_cannot_win() {
        let store = Arc::new(MemoryStore::new());
        let mut remote = MemoryRemote::new();
        remote.users = vec![user(7, "alice", "alice@example.org")];
        remote.user_meta.insert(
            7,
            vec![(META_SOURCE_ID.to_string(), MetaValue::scalar("9999"))],
        );
        let importer = importer(Arc::new(remote), store.clone());

        let summary = importer
            .import_users(&UserImportOptions::default())
            .await
            .unwrap();
        let local = summary.map[&7];
        assert_eq!(
            store.user_meta(local, META_SOURCE_ID),
            Some(MetaValue::scalar("7"))
        );
    }

    #[tokio::test]
    async fn test_skip_logins() {
        let store = Arc::new(MemoryStore::new());
        let mut remote = MemoryRemote::new();
        remote.users = vec![user(1, "migrator", ""), user(2, "bob", "bob@example.org")];
        let importer = importer(Arc::new(remote), store.clone());

        let summary = importer
            .import_users(&UserImportOptions {
                skip_logins: vec!["migrator".to_string()],
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(summary.found, 2);
        assert_eq!(summary.imported, 1);
        assert!(!summary.map.contains_key(&1));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let mut remote = MemoryRemote::new();
        remote.users = vec![user(7, "alice", "alice@example.org")];
        let importer = importer(Arc::new(remote), store.clone());

        let summary = importer
            .import_users(&UserImportOptions {
                dry_run: true,
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(summary.found, 1);
        assert_eq!(summary.imported, 0);
        assert_eq!(store.users_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_import_single_user() {
        let store = Arc::new(MemoryStore::new());
        let mut remote = MemoryRemote::new();
        remote.users = vec![user(7, "alice", "alice@example.org")];
        let importer = importer(Arc::new(remote), store.clone());

        let local = importer
            .import_user(7, &UserImportOptions::default())
            .await
            .unwrap();
        assert!(local.is_some());

        let absent = importer
            .import_user(999, &UserImportOptions::default())
            .await
            .unwrap();
        assert!(absent.is_none());
    }
}

//! In-memory fixtures for exercising importers without a database.
//!
//! Always compiled (not `#[cfg(test)]`) so integration tests under
//! `tests/` can use the same store/remote doubles as unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};

use sitegraft_core::{
    AttachmentWrite, ContentStore, Downloader, EntityKind, EntryDraft, Error, FetchFilter,
    KeyValueStore, MediaProbe, MetaValue, RemoteSource, Result, SourceAttachment, SourceRow,
    SourceUser, TermNode, TermSelection, TermWrite, TermsByTaxonomy, UserSelection, UserWrite,
    META_SOURCE_ID, META_SOURCE_TENANT,
};

#[derive(Default)]
struct StoreData {
    next_id: i64,
    entries: HashMap<i64, EntryDraft>,
    entry_meta: HashMap<i64, BTreeMap<String, MetaValue>>,
    terms: HashMap<i64, TermWrite>,
    term_meta: HashMap<i64, BTreeMap<String, MetaValue>>,
    users: HashMap<i64, UserWrite>,
    user_meta: HashMap<i64, BTreeMap<String, MetaValue>>,
    attachments: HashMap<i64, AttachmentWrite>,
    attachment_meta: HashMap<i64, BTreeMap<String, MetaValue>>,
    attachments_by_path: HashMap<String, i64>,
    assignments: HashMap<(i64, String), Vec<i64>>,
    featured: HashMap<i64, i64>,
    taxonomies: HashSet<String>,
    kind_taxonomies: HashMap<String, Vec<String>>,
    modified_times: HashMap<i64, (Option<NaiveDateTime>, Option<DateTime<Utc>>)>,
}

impl StoreData {
    fn alloc(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn meta_for(&self, kind: EntityKind) -> &HashMap<i64, BTreeMap<String, MetaValue>> {
        match kind {
            EntityKind::Entry => &self.entry_meta,
            EntityKind::Term => &self.term_meta,
            EntityKind::User => &self.user_meta,
            EntityKind::Attachment => &self.attachment_meta,
        }
    }
}

/// In-memory content store with call counters.
#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<StoreData>,
    /// Source-index lookups performed (memoization checks).
    pub source_lookups: AtomicU64,
    /// Entries created / updated.
    pub entries_created: AtomicU64,
    pub entries_updated: AtomicU64,
    /// Terms created / updated.
    pub terms_created: AtomicU64,
    pub terms_updated: AtomicU64,
    /// Users created / updated.
    pub users_created: AtomicU64,
    pub users_updated: AtomicU64,
    /// Attachments registered.
    pub attachments_registered: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        let store = Self::default();
        store.data.lock().unwrap().next_id = 1000;
        store
    }

    pub fn add_taxonomy(&self, taxonomy: &str) {
        self.data
            .lock()
            .unwrap()
            .taxonomies
            .insert(taxonomy.to_string());
    }

    pub fn set_kind_taxonomies(&self, kind: &str, taxonomies: &[&str]) {
        self.data.lock().unwrap().kind_taxonomies.insert(
            kind.to_string(),
            taxonomies.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn entry(&self, id: i64) -> Option<EntryDraft> {
        self.data.lock().unwrap().entries.get(&id).cloned()
    }

    pub fn entry_meta(&self, id: i64, key: &str) -> Option<MetaValue> {
        self.data
            .lock()
            .unwrap()
            .entry_meta
            .get(&id)
            .and_then(|m| m.get(key).cloned())
    }

    pub fn term(&self, id: i64) -> Option<TermWrite> {
        self.data.lock().unwrap().terms.get(&id).cloned()
    }

    pub fn term_meta(&self, id: i64, key: &str) -> Option<MetaValue> {
        self.data
            .lock()
            .unwrap()
            .term_meta
            .get(&id)
            .and_then(|m| m.get(key).cloned())
    }

    pub fn user(&self, id: i64) -> Option<UserWrite> {
        self.data.lock().unwrap().users.get(&id).cloned()
    }

    pub fn user_meta(&self, id: i64, key: &str) -> Option<MetaValue> {
        self.data
            .lock()
            .unwrap()
            .user_meta
            .get(&id)
            .and_then(|m| m.get(key).cloned())
    }

    pub fn attachment(&self, id: i64) -> Option<AttachmentWrite> {
        self.data.lock().unwrap().attachments.get(&id).cloned()
    }

    pub fn attachment_meta(&self, id: i64, key: &str) -> Option<MetaValue> {
        self.data
            .lock()
            .unwrap()
            .attachment_meta
            .get(&id)
            .and_then(|m| m.get(key).cloned())
    }

    pub fn assignments(&self, entry_id: i64, taxonomy: &str) -> Vec<i64> {
        self.data
            .lock()
            .unwrap()
            .assignments
            .get(&(entry_id, taxonomy.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn featured(&self, entry_id: i64) -> Option<i64> {
        self.data.lock().unwrap().featured.get(&entry_id).copied()
    }

    pub fn modified_times(
        &self,
        entry_id: i64,
    ) -> Option<(Option<NaiveDateTime>, Option<DateTime<Utc>>)> {
        self.data
            .lock()
            .unwrap()
            .modified_times
            .get(&entry_id)
            .cloned()
    }

    /// Seed an already-migrated user (for collision tests).
    pub fn seed_user(&self, user: UserWrite) -> i64 {
        let mut data = self.data.lock().unwrap();
        let id = data.alloc();
        data.users.insert(id, user);
        id
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn find_by_source(
        &self,
        kind: EntityKind,
        source_id: i64,
        tenant: u32,
    ) -> Result<Option<i64>> {
        self.source_lookups.fetch_add(1, Ordering::SeqCst);
        let data = self.data.lock().unwrap();
        let wanted_id = MetaValue::scalar(source_id.to_string());
        let wanted_tenant = MetaValue::scalar(tenant.to_string());
        let found = data.meta_for(kind).iter().find_map(|(local_id, meta)| {
            (meta.get(META_SOURCE_ID) == Some(&wanted_id)
                && meta.get(META_SOURCE_TENANT) == Some(&wanted_tenant))
            .then_some(*local_id)
        });
        Ok(found)
    }

    async fn create_entry(&self, draft: &EntryDraft) -> Result<i64> {
        self.entries_created.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        let id = data.alloc();
        data.entries.insert(id, draft.clone());
        let meta: BTreeMap<String, MetaValue> = draft.meta.iter().cloned().collect();
        data.entry_meta.insert(id, meta);
        Ok(id)
    }

    async fn update_entry(&self, local_id: i64, draft: &EntryDraft) -> Result<()> {
        self.entries_updated.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        if !data.entries.contains_key(&local_id) {
            return Err(Error::Internal(format!("no such entry {local_id}")));
        }
        data.entries.insert(local_id, draft.clone());
        let bag = data.entry_meta.entry(local_id).or_default();
        for (key, value) in &draft.meta {
            bag.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn set_entry_body(&self, local_id: i64, body: &str) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        match data.entries.get_mut(&local_id) {
            Some(entry) => {
                entry.body = body.to_string();
                Ok(())
            }
            None => Err(Error::Internal(format!("no such entry {local_id}"))),
        }
    }

    async fn entry_kind(&self, local_id: i64) -> Result<Option<String>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .entries
            .get(&local_id)
            .map(|e| e.kind.clone()))
    }

    async fn set_entry_meta(&self, local_id: i64, key: &str, value: &MetaValue) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .entry_meta
            .entry(local_id)
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn set_modified_times(
        &self,
        local_id: i64,
        local: Option<NaiveDateTime>,
        utc: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .modified_times
            .insert(local_id, (local, utc));
        Ok(())
    }

    async fn taxonomy_exists(&self, taxonomy: &str) -> Result<bool> {
        Ok(self.data.lock().unwrap().taxonomies.contains(taxonomy))
    }

    async fn taxonomies_for_kind(&self, kind: &str) -> Result<Vec<String>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .kind_taxonomies
            .get(kind)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_term_by_slug(&self, taxonomy: &str, slug: &str) -> Result<Option<i64>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .terms
            .iter()
            .find_map(|(id, t)| (t.taxonomy == taxonomy && t.slug == slug).then_some(*id)))
    }

    async fn find_term_by_name(&self, taxonomy: &str, name: &str) -> Result<Option<i64>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .terms
            .iter()
            .find_map(|(id, t)| (t.taxonomy == taxonomy && t.name == name).then_some(*id)))
    }

    async fn create_term(&self, term: &TermWrite) -> Result<i64> {
        self.terms_created.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        let id = data.alloc();
        data.terms.insert(id, term.clone());
        Ok(id)
    }

    async fn update_term(&self, local_id: i64, term: &TermWrite) -> Result<()> {
        self.terms_updated.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        if !data.terms.contains_key(&local_id) {
            return Err(Error::Internal(format!("no such term {local_id}")));
        }
        data.terms.insert(local_id, term.clone());
        Ok(())
    }

    async fn set_term_meta(&self, local_id: i64, key: &str, value: &MetaValue) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .term_meta
            .entry(local_id)
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn assign_terms(
        &self,
        entry_id: i64,
        taxonomy: &str,
        term_ids: &[i64],
        append: bool,
    ) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let slot = data
            .assignments
            .entry((entry_id, taxonomy.to_string()))
            .or_default();
        if !append {
            slot.clear();
        }
        for id in term_ids {
            if !slot.contains(id) {
                slot.push(*id);
            }
        }
        Ok(())
    }

    async fn remove_terms(&self, entry_id: i64, taxonomy: &str, term_ids: &[i64]) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        if let Some(slot) = data.assignments.get_mut(&(entry_id, taxonomy.to_string())) {
            slot.retain(|id| !term_ids.contains(id));
        }
        Ok(())
    }

    async fn find_user_by_login(&self, login: &str) -> Result<Option<i64>> {
        let data = self.data.lock().unwrap();
        Ok(data
            .users
            .iter()
            .find_map(|(id, u)| (u.login == login).then_some(*id)))
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<i64>> {
        if email.is_empty() {
            return Ok(None);
        }
        let data = self.data.lock().unwrap();
        Ok(data
            .users
            .iter()
            .find_map(|(id, u)| (u.email == email).then_some(*id)))
    }

    async fn create_user(&self, user: &UserWrite) -> Result<i64> {
        self.users_created.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        let id = data.alloc();
        data.users.insert(id, user.clone());
        Ok(id)
    }

    async fn update_user(&self, local_id: i64, user: &UserWrite) -> Result<()> {
        self.users_updated.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        let Some(existing) = data.users.get_mut(&local_id) else {
            return Err(Error::Internal(format!("no such user {local_id}")));
        };
        // Empty login/secret leave the stored values untouched.
        if !user.login.is_empty() {
            existing.login = user.login.clone();
        }
        if !user.secret.is_empty() {
            existing.secret = user.secret.clone();
        }
        existing.email = user.email.clone();
        existing.display_name = user.display_name.clone();
        existing.nice_name = user.nice_name.clone();
        existing.url = user.url.clone();
        existing.registered_at = user.registered_at;
        Ok(())
    }

    async fn set_user_meta(&self, local_id: i64, key: &str, value: &MetaValue) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .user_meta
            .entry(local_id)
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn find_attachment_by_path(&self, logical_path: &str) -> Result<Option<i64>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .attachments_by_path
            .get(logical_path)
            .copied())
    }

    async fn register_attachment(&self, attachment: &AttachmentWrite) -> Result<i64> {
        self.attachments_registered.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock().unwrap();
        let id = data.alloc();
        data.attachments.insert(id, attachment.clone());
        data.attachments_by_path
            .insert(attachment.logical_path.clone(), id);
        Ok(id)
    }

    async fn set_attachment_meta(
        &self,
        attachment_id: i64,
        key: &str,
        value: &MetaValue,
    ) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .attachment_meta
            .entry(attachment_id)
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn set_featured_attachment(&self, entry_id: i64, attachment_id: i64) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .featured
            .insert(entry_id, attachment_id);
        Ok(())
    }
}

/// In-memory remote source backed by fixed fixture data.
#[derive(Default)]
pub struct MemoryRemote {
    pub rows: Vec<SourceRow>,
    pub entry_terms: HashMap<i64, TermsByTaxonomy>,
    pub term_nodes: Vec<TermNode>,
    pub users: Vec<SourceUser>,
    pub user_meta: HashMap<i64, Vec<(String, MetaValue)>>,
    pub attachments: Vec<SourceAttachment>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteSource for MemoryRemote {
    async fn fetch_entries(&self, filter: &FetchFilter) -> Result<Vec<SourceRow>> {
        let statuses = filter.expanded_statuses();
        let mut rows: Vec<SourceRow> = self
            .rows
            .iter()
            .filter(|r| filter.kinds.is_empty() || filter.kinds.contains(&r.kind))
            .filter(|r| statuses.is_empty() || statuses.contains(&r.status))
            .filter(|r| filter.include_ids.is_empty() || filter.include_ids.contains(&r.source_id))
            .filter(|r| !filter.exclude_ids.contains(&r.source_id))
            .filter(|r| match &filter.modified_after {
                None => true,
                Some(bound) => match (bound.to_utc(), r.modified_at_utc) {
                    (Ok(min), Some(modified)) => modified >= min,
                    _ => false,
                },
            })
            .filter(|r| filter.id_gte.map_or(true, |min| r.source_id >= min))
            .filter(|r| filter.id_lte.map_or(true, |max| r.source_id <= max))
            .cloned()
            .collect();

        rows.sort_by_key(|r| r.source_id);
        let start = filter.offset as usize;
        let end = (start + filter.limit as usize).min(rows.len());
        Ok(if start >= rows.len() {
            Vec::new()
        } else {
            rows[start..end].to_vec()
        })
    }

    async fn fetch_entry_terms(
        &self,
        entry_ids: &[i64],
        _tenant: Option<u32>,
        _taxonomies: &[String],
        _force_base_prefix: bool,
    ) -> Result<HashMap<i64, TermsByTaxonomy>> {
        Ok(self
            .entry_terms
            .iter()
            .filter(|(id, _)| entry_ids.contains(id))
            .map(|(id, terms)| (*id, terms.clone()))
            .collect())
    }

    async fn fetch_term_ids(&self, selection: &TermSelection) -> Result<Vec<i64>> {
        let mut nodes: Vec<&TermNode> = self
            .term_nodes
            .iter()
            .filter(|n| selection.taxonomies.is_empty() || selection.taxonomies.contains(&n.taxonomy))
            .filter(|n| {
                selection.include_ids.is_empty()
                    || selection.include_ids.contains(&n.source_term_id)
            })
            .filter(|n| !selection.exclude_ids.contains(&n.source_term_id))
            .collect();
        nodes.sort_by_key(|n| (n.parent_source_id, n.source_term_id));
        Ok(nodes.iter().map(|n| n.source_term_id).collect())
    }

    async fn fetch_terms(&self, ids: &[i64], _selection: &TermSelection) -> Result<Vec<TermNode>> {
        let mut nodes: Vec<TermNode> = self
            .term_nodes
            .iter()
            .filter(|n| ids.contains(&n.source_term_id))
            .cloned()
            .collect();
        nodes.sort_by_key(|n| (n.parent_source_id, n.source_term_id));
        Ok(nodes)
    }

    async fn fetch_user_ids(&self, selection: &UserSelection) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .users
            .iter()
            .map(|u| u.source_id)
            .filter(|id| selection.include_ids.is_empty() || selection.include_ids.contains(id))
            .filter(|id| !selection.exclude_ids.contains(id))
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn fetch_users(&self, ids: &[i64]) -> Result<Vec<SourceUser>> {
        Ok(self
            .users
            .iter()
            .filter(|u| ids.contains(&u.source_id))
            .cloned()
            .collect())
    }

    async fn fetch_user_meta(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<(String, MetaValue)>>> {
        Ok(self
            .user_meta
            .iter()
            .filter(|(id, _)| ids.contains(id))
            .map(|(id, meta)| (*id, meta.clone()))
            .collect())
    }

    async fn fetch_attachments(
        &self,
        ids: &[i64],
        _tenant: Option<u32>,
        _force_base_prefix: bool,
    ) -> Result<Vec<SourceAttachment>> {
        Ok(self
            .attachments
            .iter()
            .filter(|a| ids.contains(&a.source_id))
            .cloned()
            .collect())
    }

    async fn fetch_attachment_url(&self, id: i64, _tenant: Option<u32>) -> Result<Option<String>> {
        Ok(self
            .attachments
            .iter()
            .find(|a| a.source_id == id)
            .map(|a| a.source_url.clone()))
    }
}

/// In-memory key-value persistence.
#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKv {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }

    async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Probe that "finds" a fixed set of relative paths.
#[derive(Default)]
pub struct StaticProbe {
    pub present: HashSet<String>,
}

impl StaticProbe {
    pub fn with(paths: &[&str]) -> Self {
        Self {
            present: paths.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl MediaProbe for StaticProbe {
    async fn locate(&self, candidates: &[String]) -> Result<Option<PathBuf>> {
        Ok(candidates
            .iter()
            .find(|c| self.present.contains(*c))
            .map(|c| PathBuf::from(format!("/library/{c}"))))
    }
}

/// Downloader double: serves configured URLs from a temp file, errors on
/// everything else.
#[derive(Default)]
pub struct FakeDownloader {
    pub served: HashSet<String>,
    pub downloads: AtomicU64,
}

impl FakeDownloader {
    pub fn with(urls: &[&str]) -> Self {
        Self {
            served: urls.iter().map(|s| s.to_string()).collect(),
            downloads: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download_to_temp(&self, url: &str, _timeout: Duration) -> Result<PathBuf> {
        if self.served.contains(url) {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(PathBuf::from(format!(
                "/tmp/sitegraft-fake-{}",
                self.downloads.load(Ordering::SeqCst)
            )))
        } else {
            Err(Error::Request(format!("unserved url: {url}")))
        }
    }
}

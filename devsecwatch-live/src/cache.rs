/**
 * NOTIFICATION CACHE - client-side copy of the user's notifications
 *
 * ROLE:
 * Single owner of the cached notification list. Every trigger (initial load,
 * push event, user action) goes through `refresh`, `mark_read` or
 * `mark_all_read`, so the unread count always equals the number of unread
 * entries in the list.
 *
 * RECONCILIATION:
 * - refresh replaces the list wholesale with server truth (ids deduplicated)
 * - mark-read / mark-all-read flip locally first, then write through
 * - a failed write-through triggers a refresh instead of a rollback
 * - writes still in flight are re-applied on top of a refresh that lands
 *   before them, so the optimistic state does not flicker back
 */

use crate::api::ScanBackend;
use crate::credentials::CredentialSource;
use crate::error::{LiveError, Result};
use crate::models::Notification;
use crate::state::{new_state, with_state, Shared};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What the presentation layer reads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationSnapshot {
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    pub loading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    MarkRead(i64),
    MarkAllRead,
}

/// Optimistic write whose write-through has not answered yet.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub id: Uuid,
    pub kind: WriteKind,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    notifications: Vec<Notification>,
    unread_count: usize,
    loading: bool,
    pending: Vec<PendingWrite>,
}

impl CacheState {
    fn recount(&mut self) {
        self.unread_count = self.notifications.iter().filter(|n| !n.read).count();
    }

    fn apply(&mut self, kind: WriteKind) -> bool {
        let changed = match kind {
            WriteKind::MarkRead(id) => match self.notifications.iter_mut().find(|n| n.id == id) {
                Some(n) if !n.read => {
                    n.read = true;
                    true
                }
                _ => false,
            },
            WriteKind::MarkAllRead => {
                let mut changed = false;
                for n in self.notifications.iter_mut().filter(|n| !n.read) {
                    n.read = true;
                    changed = true;
                }
                changed
            }
        };
        self.recount();
        changed
    }

    fn replace(&mut self, fetched: Vec<Notification>) {
        let mut seen = HashSet::with_capacity(fetched.len());
        self.notifications = fetched.into_iter().filter(|n| seen.insert(n.id)).collect();
        let pending: Vec<WriteKind> = self.pending.iter().map(|p| p.kind).collect();
        for kind in pending {
            self.apply(kind);
        }
        self.recount();
    }

    fn finish(&mut self, write: Uuid) {
        self.pending.retain(|p| p.id != write);
    }

    fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            notifications: self.notifications.clone(),
            unread_count: self.unread_count,
            loading: self.loading,
        }
    }
}

pub struct NotificationCache {
    backend: Arc<dyn ScanBackend>,
    credentials: Arc<dyn CredentialSource>,
    state: Shared<CacheState>,
    snapshots: watch::Sender<NotificationSnapshot>,
}

impl NotificationCache {
    pub fn new(backend: Arc<dyn ScanBackend>, credentials: Arc<dyn CredentialSource>) -> Self {
        let (snapshots, _) = watch::channel(NotificationSnapshot::default());
        Self { backend, credentials, state: new_state(CacheState::default()), snapshots }
    }

    /// Receives a snapshot after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.state.lock().snapshot()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().notifications.clone()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().unread_count
    }

    pub fn pending_writes(&self) -> Vec<PendingWrite> {
        self.state.lock().pending.clone()
    }

    /// Forgets everything, used when the identity goes away.
    pub fn clear(&self) {
        *self.state.lock() = CacheState::default();
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.state.lock().snapshot();
        self.snapshots.send_replace(snapshot);
    }

    fn token(&self) -> Result<String> {
        self.credentials.access_token().ok_or(LiveError::MissingCredential)
    }

    /// Pulls the full list and replaces the cache. On any failure the previous
    /// list is kept; the error is returned for callers that care and logged.
    pub async fn refresh(&self) -> Result<usize> {
        let token = match self.token() {
            Ok(token) => token,
            Err(e) => {
                debug!("skipping notification refresh: {e}");
                return Err(e);
            }
        };

        self.state.lock().loading = true;
        self.publish();

        let fetched = self.backend.list_notifications(&token).await;

        let result = with_state(&self.state, |state| -> Result<usize> {
            state.loading = false;
            let list = fetched?;
            state.replace(list);
            Ok(state.notifications.len())
        });
        self.publish();

        match &result {
            Ok(count) => debug!(count, unread = self.unread_count(), "notifications refreshed"),
            Err(e) => warn!("failed to fetch notifications: {e}"),
        }
        result
    }

    pub async fn mark_read(&self, id: i64) -> Result<()> {
        self.write_through(WriteKind::MarkRead(id)).await
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        self.write_through(WriteKind::MarkAllRead).await
    }

    async fn write_through(&self, kind: WriteKind) -> Result<()> {
        let token = self.token().map_err(|e| {
            debug!(?kind, "skipping write-through: {e}");
            e
        })?;

        let write = PendingWrite { id: Uuid::new_v4(), kind, started_at: Utc::now() };
        let write_id = write.id;
        with_state(&self.state, |state| {
            state.apply(kind);
            state.pending.push(write);
        });
        self.publish();

        let outcome = match kind {
            WriteKind::MarkRead(id) => self.backend.mark_read(&token, id).await,
            WriteKind::MarkAllRead => self.backend.mark_all_read(&token).await,
        };
        self.state.lock().finish(write_id);

        if let Err(e) = outcome {
            warn!(?kind, "write-through failed, resynchronising: {e}");
            // Best effort; refresh logs its own failure.
            let _ = self.refresh().await;
            return Err(e);
        }
        if kind == WriteKind::MarkAllRead {
            info!("all notifications marked read");
        }
        Ok(())
    }

    /// Compares the server's unread counter with the cached one and refreshes
    /// when they disagree. Returns whether they agreed.
    pub async fn verify_unread(&self) -> Result<bool> {
        let token = self.token()?;
        let server = self.backend.unread_count(&token).await?;
        let local = self.unread_count() as u64;
        if server == local {
            return Ok(true);
        }
        warn!(server, local, "unread count diverged, refreshing");
        self.refresh().await?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::testing::{notification, FakeBackend};

    fn cache_with(backend: Arc<FakeBackend>) -> NotificationCache {
        NotificationCache::new(backend, Arc::new(StaticCredentials::new("tok")))
    }

    fn assert_consistent(cache: &NotificationCache) {
        let snap = cache.snapshot();
        let derived = snap.notifications.iter().filter(|n| !n.read).count();
        assert_eq!(snap.unread_count, derived);
    }

    #[tokio::test]
    async fn refresh_replaces_wholesale() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false)]);
        backend.push_list(vec![notification(1, true), notification(2, false)]);
        let cache = cache_with(backend.clone());

        cache.refresh().await.unwrap();
        assert_eq!(cache.unread_count(), 1);

        cache.refresh().await.unwrap();
        let ids: Vec<i64> = cache.notifications().iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(cache.unread_count(), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn refresh_drops_duplicate_ids() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(3, false), notification(3, true), notification(4, false)]);
        let cache = cache_with(backend);

        assert_eq!(cache.refresh().await.unwrap(), 2);
        assert_eq!(cache.unread_count(), 2);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_list() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false)]);
        let cache = cache_with(backend.clone());
        cache.refresh().await.unwrap();

        backend.fail_next_list();
        assert!(cache.refresh().await.is_err());
        assert_eq!(cache.notifications().len(), 1);
        assert_eq!(cache.unread_count(), 1);
        assert!(!cache.snapshot().loading);
    }

    #[tokio::test]
    async fn no_credential_means_no_call() {
        let backend = Arc::new(FakeBackend::default());
        let cache = NotificationCache::new(backend.clone(), Arc::new(StaticCredentials::empty()));

        assert!(matches!(cache.refresh().await, Err(LiveError::MissingCredential)));
        assert!(matches!(cache.mark_all_read().await, Err(LiveError::MissingCredential)));
        assert_eq!(backend.calls().len(), 0);
    }

    #[tokio::test]
    async fn mark_read_is_optimistic_and_writes_through() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false), notification(2, false)]);
        let cache = cache_with(backend.clone());
        cache.refresh().await.unwrap();

        cache.mark_read(2).await.unwrap();
        assert_eq!(cache.unread_count(), 1);
        assert!(cache.notifications().iter().find(|n| n.id == 2).unwrap().read);
        assert!(backend.calls().contains(&"mark_read:2".to_string()));
        assert!(cache.pending_writes().is_empty());

        // already read: count does not move again
        cache.mark_read(2).await.unwrap();
        assert_eq!(cache.unread_count(), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn failed_write_resynchronises_with_server() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false)]);
        backend.push_list(vec![notification(1, false)]);
        let cache = cache_with(backend.clone());
        cache.refresh().await.unwrap();

        backend.fail_next_write();
        assert!(cache.mark_read(1).await.is_err());
        // server still says unread, and the cache follows it
        assert_eq!(cache.unread_count(), 1);
        assert_eq!(backend.count("list"), 2);
        assert!(cache.pending_writes().is_empty());
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn mark_all_read_issues_one_call() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false), notification(2, false), notification(3, true)]);
        let cache = cache_with(backend.clone());
        cache.refresh().await.unwrap();

        cache.mark_all_read().await.unwrap();
        assert!(cache.notifications().iter().all(|n| n.read));
        assert_eq!(cache.unread_count(), 0);
        assert_eq!(backend.count("mark_all_read"), 1);
        assert_consistent(&cache);
    }

    #[tokio::test]
    async fn subscribers_see_every_mutation() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false)]);
        let cache = cache_with(backend);
        let mut rx = cache.subscribe();

        cache.refresh().await.unwrap();
        assert_eq!(rx.borrow_and_update().unread_count, 1);

        cache.mark_all_read().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().unread_count, 0);
    }

    #[tokio::test]
    async fn refresh_reapplies_pending_writes() {
        let mut state = CacheState::default();
        state.pending.push(PendingWrite {
            id: Uuid::new_v4(),
            kind: WriteKind::MarkRead(1),
            started_at: Utc::now(),
        });
        state.replace(vec![notification(1, false), notification(2, false)]);
        assert!(state.notifications[0].read);
        assert_eq!(state.unread_count, 1);
    }

    #[tokio::test]
    async fn clear_empties_and_publishes() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false)]);
        let cache = cache_with(backend);
        cache.refresh().await.unwrap();
        let mut rx = cache.subscribe();

        cache.clear();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), NotificationSnapshot::default());
        assert_eq!(cache.unread_count(), 0);
    }

    #[tokio::test]
    async fn verify_unread_refreshes_on_divergence() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false)]);
        backend.push_list(vec![notification(1, false), notification(2, false)]);
        let cache = cache_with(backend.clone());
        cache.refresh().await.unwrap();

        backend.set_unread(1);
        assert!(cache.verify_unread().await.unwrap());

        backend.set_unread(2);
        assert!(!cache.verify_unread().await.unwrap());
        assert_eq!(cache.unread_count(), 2);
    }
}

//! Identity-bound session context.
//!
//! A `LiveSession` owns the push connection and the notification cache of
//! whoever is signed in. `sync_identity` is called whenever the credential
//! may have changed (startup, login, logout, token rotation).

use crate::api::{HttpBackend, ScanBackend};
use crate::cache::{NotificationCache, NotificationSnapshot};
use crate::config::LiveConfig;
use crate::connection::{ConnectionManager, ConnectionStatus};
use crate::credentials::{current_identity, CredentialSource};
use crate::error::Result;
use crate::models::{Identity, Scan};
use crate::poller::{PollHandle, StatusPoller};
use crate::sink::PresentationSink;
use crate::subscription::{ScanUpdateHook, SubscriptionHandler};
use crate::transport::{PushConnector, WsConnector};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Collaborators a session is wired from.
pub struct SessionParts {
    pub backend: Arc<dyn ScanBackend>,
    pub credentials: Arc<dyn CredentialSource>,
    pub connector: Arc<dyn PushConnector>,
    pub sink: Arc<dyn PresentationSink>,
    pub on_scan_update: Option<ScanUpdateHook>,
}

pub struct LiveSession {
    credentials: Arc<dyn CredentialSource>,
    cache: Arc<NotificationCache>,
    connection: ConnectionManager,
    poller: StatusPoller,
}

impl LiveSession {
    pub fn new(config: &LiveConfig, parts: SessionParts) -> Result<Self> {
        let cache = Arc::new(NotificationCache::new(parts.backend.clone(), parts.credentials.clone()));
        let mut handler = SubscriptionHandler::new(cache.clone(), parts.sink.clone(), &config.toast);
        if let Some(hook) = parts.on_scan_update {
            handler = handler.on_scan_update(move |event| hook(event));
        }
        let connection = ConnectionManager::new(config, parts.connector, handler, parts.sink)?;
        let poller = StatusPoller::new(parts.backend, parts.credentials.clone(), &config.poll);
        Ok(Self { credentials: parts.credentials, cache, connection, poller })
    }

    /// Session against the configured HTTP backend and WebSocket endpoint.
    pub fn over_http(
        config: &LiveConfig,
        credentials: Arc<dyn CredentialSource>,
        sink: Arc<dyn PresentationSink>,
    ) -> Result<Self> {
        let backend = Arc::new(HttpBackend::new(config.api_url.clone())?);
        Self::new(
            config,
            SessionParts {
                backend,
                credentials,
                connector: Arc::new(WsConnector),
                sink,
                on_scan_update: None,
            },
        )
    }

    /// Re-reads the credential and aligns the connection with it: connects
    /// and loads notifications for a new identity, tears everything down
    /// when the identity is gone. Returns the identity now in effect.
    pub async fn sync_identity(&self) -> Option<Identity> {
        match current_identity(self.credentials.as_ref()) {
            Some(identity) => {
                if self.connection.connect(identity.as_str()) {
                    debug!(%identity, "loading notifications for new identity");
                    // a failed load is logged by the cache, the next event retries
                    let _ = self.cache.refresh().await;
                }
                Some(identity)
            }
            None => {
                if let Some(previous) = self.connection.identity() {
                    info!(%previous, "identity gone, closing live session");
                    self.connection.disconnect().await;
                    self.cache.clear();
                }
                None
            }
        }
    }

    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
    }

    /// Polls one scan until it is terminal; cancel the handle on teardown.
    pub fn poll_scan<F>(&self, scan_id: i64, on_terminal: F) -> PollHandle
    where
        F: FnOnce(Scan) + Send + 'static,
    {
        self.poller.poll(scan_id, on_terminal)
    }

    pub fn cache(&self) -> &Arc<NotificationCache> {
        &self.cache
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.cache.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.cache.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe_status()
    }

    pub fn unread_count(&self) -> usize {
        self.cache.unread_count()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub async fn mark_read(&self, id: i64) -> Result<()> {
        self.cache.mark_read(id).await
    }

    pub async fn mark_all_read(&self) -> Result<()> {
        self.cache.mark_all_read().await
    }
}

//! Handles scan-status events arriving on the user queue.

use crate::cache::NotificationCache;
use crate::config::ToastConf;
use crate::models::{ScanStatus, ScanStatusEvent};
use crate::sink::{PresentationSink, Toast, ToastKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Caller hook run after each accepted event, e.g. to re-pull the scan a
/// page is showing.
pub type ScanUpdateHook = Arc<dyn Fn(&ScanStatusEvent) + Send + Sync>;

#[derive(Clone)]
pub struct SubscriptionHandler {
    cache: Arc<NotificationCache>,
    sink: Arc<dyn PresentationSink>,
    toast_duration: Duration,
    on_scan_update: Option<ScanUpdateHook>,
}

impl SubscriptionHandler {
    pub fn new(
        cache: Arc<NotificationCache>,
        sink: Arc<dyn PresentationSink>,
        toast: &ToastConf,
    ) -> Self {
        Self {
            cache,
            sink,
            toast_duration: Duration::from_millis(toast.event_ms),
            on_scan_update: None,
        }
    }

    pub fn on_scan_update(mut self, hook: impl Fn(&ScanStatusEvent) + Send + Sync + 'static) -> Self {
        self.on_scan_update = Some(Arc::new(hook));
        self
    }

    pub fn cache(&self) -> &Arc<NotificationCache> {
        &self.cache
    }

    /// Decodes a MESSAGE body. Anything that is not a well-formed event is
    /// logged and dropped.
    pub fn decode(body: &[u8]) -> Option<ScanStatusEvent> {
        match serde_json::from_slice::<ScanStatusEvent>(body) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(
                    "dropping malformed scan event ({e}): {}",
                    String::from_utf8_lossy(body).chars().take(200).collect::<String>()
                );
                None
            }
        }
    }

    pub fn toast_for(&self, event: &ScanStatusEvent) -> Toast {
        let repo = event.repo_name();
        let (kind, message) = match event.status {
            ScanStatus::Completed if event.total_vulnerabilities == 0 => {
                (ToastKind::Success, format!("{repo} scan complete - No vulnerabilities!"))
            }
            ScanStatus::Completed => (
                ToastKind::Warning,
                format!("{repo} scan complete - {} issues found", event.total_vulnerabilities),
            ),
            ScanStatus::Failed => (ToastKind::Error, format!("{repo} scan failed")),
            _ => (ToastKind::Info, event.message.clone()),
        };
        Toast::new(kind, message, self.toast_duration)
    }

    /// Entry point for raw MESSAGE bodies. Returns the event when it was
    /// accepted.
    pub async fn handle_message(&self, body: &[u8]) -> Option<ScanStatusEvent> {
        let event = Self::decode(body)?;
        self.handle_event(&event).await;
        Some(event)
    }

    pub async fn handle_event(&self, event: &ScanStatusEvent) {
        debug!(scan_id = event.scan_id, status = ?event.status, "scan event received");
        self.sink.toast(self.toast_for(event));
        // refresh failures are logged by the cache and leave it as it was
        let _ = self.cache.refresh().await;
        if let Some(hook) = &self.on_scan_update {
            hook(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::sink::ChannelSink;
    use crate::testing::{notification, FakeBackend};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn handler(backend: Arc<FakeBackend>) -> (SubscriptionHandler, UnboundedReceiver<Toast>) {
        let cache = Arc::new(NotificationCache::new(backend, Arc::new(StaticCredentials::new("tok"))));
        let (sink, rx) = ChannelSink::new();
        (SubscriptionHandler::new(cache, Arc::new(sink), &ToastConf::default()), rx)
    }

    fn event(status: &str, total: u32) -> Vec<u8> {
        serde_json::json!({
            "scanId": 42,
            "repoUrl": "https://github.com/acme/payments-api",
            "status": status,
            "totalVulnerabilities": total,
            "criticalCount": 0,
            "highCount": total,
            "message": format!("Scan {}", status.to_lowercase()),
            "timestamp": "2026-01-12T10:00:00"
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn classifies_by_status() {
        let (h, _rx) = handler(Arc::new(FakeBackend::default()));
        let decode = |b: Vec<u8>| SubscriptionHandler::decode(&b).unwrap();

        let clean = h.toast_for(&decode(event("COMPLETED", 0)));
        assert_eq!(clean.kind, ToastKind::Success);
        assert_eq!(clean.message, "payments-api scan complete - No vulnerabilities!");
        assert_eq!(clean.duration, Duration::from_secs(5));

        let dirty = h.toast_for(&decode(event("COMPLETED", 7)));
        assert_eq!(dirty.kind, ToastKind::Warning);
        assert_eq!(dirty.message, "payments-api scan complete - 7 issues found");

        let failed = h.toast_for(&decode(event("FAILED", 0)));
        assert_eq!(failed.kind, ToastKind::Error);
        assert_eq!(failed.message, "payments-api scan failed");

        let running = h.toast_for(&decode(event("PROCESSING", 0)));
        assert_eq!(running.kind, ToastKind::Info);
        assert_eq!(running.message, "Scan processing");

        let odd = h.toast_for(&decode(event("PAUSED", 0)));
        assert_eq!(odd.kind, ToastKind::Info);
    }

    #[tokio::test]
    async fn event_refreshes_cache_once() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false)]);
        backend.push_list(vec![notification(1, true), notification(2, false)]);
        let (h, mut rx) = handler(backend.clone());
        h.cache().refresh().await.unwrap();

        assert!(h.handle_message(&event("COMPLETED", 3)).await.is_some());

        assert_eq!(backend.count("list"), 2);
        assert_eq!(h.cache().unread_count(), 1);
        assert_eq!(h.cache().notifications().len(), 2);
        assert_eq!(rx.recv().await.unwrap().kind, ToastKind::Warning);
    }

    #[tokio::test]
    async fn malformed_messages_change_nothing() {
        let backend = Arc::new(FakeBackend::default());
        backend.push_list(vec![notification(1, false)]);
        let (h, mut rx) = handler(backend.clone());
        h.cache().refresh().await.unwrap();
        let before = h.cache().snapshot();

        let bodies: [&[u8]; 4] =
            [b"not json", b"{}", b"[1,2]", br#"{"scanId":"x","status":"COMPLETED"}"#];
        for body in bodies {
            assert!(h.handle_message(body).await.is_none());
        }

        assert_eq!(h.cache().snapshot(), before);
        assert_eq!(backend.count("list"), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn hook_runs_after_refresh() {
        let backend = Arc::new(FakeBackend::default());
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let (h, _rx) = handler(backend.clone());
        let h = h.on_scan_update(move |event| {
            assert_eq!(event.scan_id, 42);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        h.handle_message(&event("QUEUED", 0)).await;
        h.handle_message(&event("QUEUED", 0)).await;

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(backend.count("list"), 2);
    }
}

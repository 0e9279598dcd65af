/*!
Test harness wiring a `LiveSession` to the in-process doubles.

```ignore
let h = TestHarness::new();
h.connect_as("alice").await;
h.wait_until("subscribed", |h| h.session.is_connected()).await?;
h.push_event("alice", &ScanEventBuilder::new(1).completed(0));
```
*/

use crate::backend::MockBackend;
use crate::broker::MockBroker;
use crate::builders::{access_token, ScanEventBuilder};
use crate::sink::RecordingSink;
use anyhow::Result;
use devsecwatch_live::{
    Identity, LiveConfig, LiveSession, ScanStatusEvent, SessionParts, StaticCredentials,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub struct TestHarness {
    pub broker: MockBroker,
    pub backend: Arc<MockBackend>,
    pub sink: Arc<RecordingSink>,
    pub credentials: Arc<StaticCredentials>,
    pub config: LiveConfig,
    pub session: LiveSession,
    scan_updates: Arc<Mutex<Vec<i64>>>,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    pub fn new() -> Self {
        Self::build(MockBroker::new(), Arc::new(MockBackend::new()), LiveConfig::default())
    }

    pub fn with_backend(backend: MockBackend) -> Self {
        Self::build(MockBroker::new(), Arc::new(backend), LiveConfig::default())
    }

    pub fn build(broker: MockBroker, backend: Arc<MockBackend>, config: LiveConfig) -> Self {
        env_logger::try_init().ok();

        let sink = Arc::new(RecordingSink::new());
        let credentials = Arc::new(StaticCredentials::empty());
        let scan_updates = Arc::new(Mutex::new(Vec::new()));
        let updates = scan_updates.clone();
        let session = LiveSession::new(
            &config,
            SessionParts {
                backend: backend.clone(),
                credentials: credentials.clone(),
                connector: Arc::new(broker.clone()),
                sink: sink.clone(),
                on_scan_update: Some(Arc::new(move |event: &ScanStatusEvent| {
                    updates.lock().push(event.scan_id)
                })),
            },
        )
        .unwrap_or_else(|e| panic!("default test config must build a session: {e}"));

        Self { broker, backend, sink, credentials, config, session, scan_updates }
    }

    pub fn sign_in(&self, sub: &str) {
        self.credentials.set(access_token(sub));
    }

    pub fn sign_out(&self) {
        self.credentials.clear();
    }

    /// Signs in and lets the session pick the identity up.
    pub async fn connect_as(&self, sub: &str) -> Option<Identity> {
        self.sign_in(sub);
        self.session.sync_identity().await
    }

    /// Publishes an event on the queue of `identity`. Returns deliveries.
    pub fn push_event(&self, identity: &str, event: &ScanEventBuilder) -> usize {
        self.push_raw(identity, event.to_bytes())
    }

    pub fn push_raw(&self, identity: &str, body: impl Into<Vec<u8>>) -> usize {
        let Some(identity) = Identity::new(identity) else { return 0 };
        self.broker.publish(&identity.channel(), body)
    }

    /// Scan ids seen by the scan-update hook.
    pub fn scan_updates(&self) -> Vec<i64> {
        self.scan_updates.lock().clone()
    }

    /// Polls `cond` every 10ms of tokio time, up to 30s.
    pub async fn wait_until(&self, what: &str, cond: impl Fn(&Self) -> bool) -> Result<()> {
        for _ in 0..3_000 {
            if cond(self) {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        log::warn!("[harness] timed out waiting for {what}");
        anyhow::bail!("timed out waiting for {what}")
    }

    /// Lets spawned tasks drain their queues.
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

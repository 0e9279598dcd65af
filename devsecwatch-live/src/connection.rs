/**
 * CONNECTION MANAGER - the one push connection of an identity
 *
 * LIFECYCLE:
 * connect(identity) spawns a session task that loops over
 *   open socket -> CONNECT -> CONNECTED -> SUBSCRIBE user queue -> read loop
 * and, when any step fails, reports the error, waits the fixed reconnect
 * delay and starts over. disconnect() stops the task and waits for it.
 *
 * GUARANTEES:
 * - at most one session task per manager; a second connect() for the same
 *   identity is a no-op, a different identity replaces the old session
 * - every session carries a generation number; a session that has been
 *   replaced or stopped can no longer change the status or raise toasts
 * - heart-beats are negotiated with the broker; silence longer than twice
 *   the expected interval counts as a dead connection
 * - MESSAGE bodies are handed to a separate consumer task, so a slow refresh
 *   never holds up heart-beats, the silence watchdog or a stop request
 */

use crate::config::{LiveConfig, PushConf, ToastConf};
use crate::error::{LiveError, Result};
use crate::models::Identity;
use crate::sink::{PresentationSink, Toast, ToastKind};
use crate::stomp::{Command, Frame, Heartbeat, Inbound, Negotiated};
use crate::subscription::SubscriptionHandler;
use crate::transport::{FrameLink, PushConnector};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

struct Inner {
    endpoint: Url,
    host: String,
    push: PushConf,
    toast: ToastConf,
    connector: Arc<dyn PushConnector>,
    handler: SubscriptionHandler,
    sink: Arc<dyn PresentationSink>,
    status: watch::Sender<ConnectionStatus>,
    generation: AtomicU64,
}

struct ActiveSession {
    identity: Identity,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

enum SessionEnd {
    Stopped,
    Failed(LiveError),
}

pub struct ConnectionManager {
    inner: Arc<Inner>,
    active: Mutex<Option<ActiveSession>>,
}

impl ConnectionManager {
    pub fn new(
        config: &LiveConfig,
        connector: Arc<dyn PushConnector>,
        handler: SubscriptionHandler,
        sink: Arc<dyn PresentationSink>,
    ) -> Result<Self> {
        let endpoint = config.push_endpoint()?;
        let host = endpoint.host_str().unwrap_or("localhost").to_string();
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                host,
                push: config.push.clone(),
                toast: config.toast.clone(),
                connector,
                handler,
                sink,
                status,
                generation: AtomicU64::new(0),
            }),
            active: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Starts the push session for `identity`. Returns `false` when nothing
    /// was started: blank identity, or a session for the same identity is
    /// already established or being established.
    pub fn connect(&self, identity: &str) -> bool {
        let Some(identity) = Identity::new(identity) else {
            debug!("no identity, not connecting");
            return false;
        };

        let mut active = self.active.lock();
        if let Some(current) = active.as_ref() {
            if current.identity == identity && !current.task.is_finished() {
                debug!(%identity, "push session already running");
                return false;
            }
        }
        if let Some(previous) = active.take() {
            info!(from = %previous.identity, to = %identity, "identity changed, replacing push session");
            // the replaced task exits on its own after sending DISCONNECT
            let _ = previous.stop.send(true);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop, stop_rx) = watch::channel(false);
        let inner = self.inner.clone();
        let task_identity = identity.clone();
        let task = tokio::spawn(async move {
            inner.run(generation, task_identity, stop_rx).await;
        });
        info!(%identity, endpoint = %self.inner.endpoint, "push session started");
        *active = Some(ActiveSession { identity, stop, task });
        true
    }

    /// Stops the session, unsubscribing and closing the socket. No-op when
    /// nothing is running.
    pub async fn disconnect(&self) {
        let Some(session) = self.active.lock().take() else {
            return;
        };
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let _ = session.stop.send(true);
        if let Err(e) = session.task.await {
            warn!("push session task ended abnormally: {e}");
        }
        self.inner.status.send_replace(ConnectionStatus::Disconnected);
        info!(identity = %session.identity, "push session stopped");
    }

    pub fn identity(&self) -> Option<Identity> {
        self.active.lock().as_ref().map(|s| s.identity.clone())
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }
}

impl Inner {
    /// Applies `status` only if `generation` is still the live session.
    fn set_status(&self, generation: u64, status: ConnectionStatus) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        self.status.send_replace(status);
        true
    }

    fn client_heartbeat(&self) -> Heartbeat {
        Heartbeat::new(self.push.heartbeat_outgoing_ms, self.push.heartbeat_incoming_ms)
    }

    async fn run(&self, generation: u64, identity: Identity, mut stop: watch::Receiver<bool>) {
        let events = spawn_event_consumer(self.handler.clone(), stop.clone());
        loop {
            self.set_status(generation, ConnectionStatus::Connecting);
            match self.session(generation, &identity, &mut stop, &events).await {
                SessionEnd::Stopped => return,
                SessionEnd::Failed(e) => {
                    warn!(%identity, "push session lost: {e}");
                    if self.set_status(generation, ConnectionStatus::Disconnected) {
                        self.sink.toast(Toast::new(
                            ToastKind::Error,
                            "Notification connection error",
                            Duration::from_millis(self.toast.error_ms),
                        ));
                    }
                }
            }

            let delay = self.push.reconnect_delay();
            debug!(%identity, ?delay, "reconnecting after delay");
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = stop_requested(&mut stop) => return,
            }
        }
    }

    async fn open(&self) -> Result<(Box<dyn FrameLink>, Negotiated)> {
        let mut link = self.connector.open(&self.endpoint).await?;
        let client = self.client_heartbeat();
        link.send(&Frame::connect(&self.host, client)).await?;
        loop {
            match link.recv().await {
                None => return Err(LiveError::Closed),
                Some(Err(e)) => return Err(e),
                Some(Ok(Inbound::Heartbeat)) => continue,
                Some(Ok(Inbound::Frame(frame))) => match frame.command {
                    Command::Connected => {
                        let server = match frame.get("heart-beat") {
                            Some(value) => Heartbeat::from_header(value)?,
                            None => Heartbeat::default(),
                        };
                        debug!(version = ?frame.get("version"), ?server, "stomp session established");
                        return Ok((link, client.negotiate(server)));
                    }
                    Command::Error => return Err(error_frame(&frame)),
                    other => debug!(command = %other, "ignoring frame before CONNECTED"),
                },
            }
        }
    }

    async fn session(
        &self,
        generation: u64,
        identity: &Identity,
        stop: &mut watch::Receiver<bool>,
        events: &mpsc::UnboundedSender<Vec<u8>>,
    ) -> SessionEnd {
        let opened = tokio::select! {
            opened = time::timeout(self.push.connect_timeout(), self.open()) => opened,
            _ = stop_requested(stop) => return SessionEnd::Stopped,
        };
        let (mut link, negotiated) = match opened {
            Ok(Ok(opened)) => opened,
            Ok(Err(e)) => return SessionEnd::Failed(e),
            Err(_) => return SessionEnd::Failed(LiveError::Transport("connect timed out".into())),
        };

        let sub_id = format!("sub-{}", Uuid::new_v4());
        let channel = identity.channel();
        if let Err(e) = link.send(&Frame::subscribe(&sub_id, &channel)).await {
            return SessionEnd::Failed(e);
        }
        if self.set_status(generation, ConnectionStatus::Connected) {
            info!(%identity, %channel, "live updates active");
            self.sink.toast(Toast::new(
                ToastKind::Success,
                format!("Real-time updates active for {identity}"),
                Duration::from_millis(self.toast.connected_ms),
            ));
        }

        let mut beats = negotiated.send_every.map(|every| {
            let mut interval = time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let silence_limit = negotiated.expect_every.map(|every| every * 2);
        let mut last_seen = Instant::now();

        loop {
            let deadline = silence_limit.map(|limit| last_seen + limit);
            tokio::select! {
                _ = stop_requested(stop) => {
                    let _ = link.send(&Frame::unsubscribe(&sub_id)).await;
                    let _ = link.send(&Frame::disconnect()).await;
                    link.close().await;
                    return SessionEnd::Stopped;
                }
                inbound = link.recv() => {
                    last_seen = Instant::now();
                    match inbound {
                        None => return SessionEnd::Failed(LiveError::Closed),
                        Some(Err(LiveError::Protocol(msg))) => warn!("skipping unreadable frame: {msg}"),
                        Some(Err(e)) => return SessionEnd::Failed(e),
                        Some(Ok(Inbound::Heartbeat)) => trace!("heart-beat received"),
                        Some(Ok(Inbound::Frame(frame))) => match frame.command {
                            Command::Message => {
                                if events.send(frame.body).is_err() {
                                    warn!("event consumer gone, dropping message");
                                }
                            }
                            Command::Error => return SessionEnd::Failed(error_frame(&frame)),
                            other => debug!(command = %other, "ignoring frame"),
                        },
                    }
                }
                _ = next_beat(&mut beats) => {
                    if let Err(e) = link.send_heartbeat().await {
                        return SessionEnd::Failed(e);
                    }
                }
                _ = sleep_until(deadline) => {
                    return SessionEnd::Failed(LiveError::Transport("heart-beat timeout".into()));
                }
            }
        }
    }
}

/// Resolves once a stop was requested or the manager went away. The watch
/// guard is released before the caller awaits anything else.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|s| *s).await;
}

/// Handles MESSAGE bodies one at a time, in arrival order. The task outlives
/// reconnects of its session and ends when the session loop drops the sender.
/// Bodies still queued once a stop is requested are discarded.
fn spawn_event_consumer(
    handler: SubscriptionHandler,
    stop: watch::Receiver<bool>,
) -> mpsc::UnboundedSender<Vec<u8>> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
    tokio::spawn(async move {
        while let Some(body) = rx.recv().await {
            if *stop.borrow() {
                debug!("session stopped, discarding queued scan events");
                break;
            }
            handler.handle_message(&body).await;
        }
    });
    tx
}

fn error_frame(frame: &Frame) -> LiveError {
    let message = frame
        .get("message")
        .map(str::to_string)
        .or_else(|| frame.body_text().map(str::to_string))
        .unwrap_or_else(|| "broker sent ERROR".into());
    LiveError::Protocol(message)
}

async fn next_beat(beats: &mut Option<Interval>) {
    match beats {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NotificationCache;
    use crate::credentials::StaticCredentials;
    use crate::sink::ChannelSink;
    use crate::testing::{FakeBackend, RefusingConnector};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn manager(
        connector: Arc<RefusingConnector>,
    ) -> (ConnectionManager, UnboundedReceiver<Toast>) {
        let config = LiveConfig::default();
        let cache = Arc::new(NotificationCache::new(
            Arc::new(FakeBackend::default()),
            Arc::new(StaticCredentials::new("tok")),
        ));
        let (sink, rx) = ChannelSink::new();
        let sink: Arc<dyn PresentationSink> = Arc::new(sink);
        let handler = SubscriptionHandler::new(cache, sink.clone(), &config.toast);
        (ConnectionManager::new(&config, connector, handler, sink).unwrap(), rx)
    }

    #[tokio::test]
    async fn blank_identity_never_connects() {
        let connector = Arc::new(RefusingConnector::default());
        let (mgr, _rx) = manager(connector.clone());

        assert!(!mgr.connect(""));
        assert!(!mgr.connect("   "));
        assert!(mgr.identity().is_none());
        assert_eq!(mgr.status(), ConnectionStatus::Disconnected);
        assert_eq!(mgr.endpoint().as_str(), "ws://localhost:8080/ws/websocket");
    }

    #[tokio::test(start_paused = true)]
    async fn failures_retry_at_fixed_delay() {
        let connector = Arc::new(RefusingConnector::default());
        let (mgr, mut rx) = manager(connector.clone());

        assert!(mgr.connect("alice"));
        assert!(!mgr.connect("alice"));
        time::sleep(Duration::from_millis(12_500)).await;

        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 3);
        for pair in attempts.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_secs(5));
        }
        let toast = rx.recv().await.unwrap();
        assert_eq!(toast.kind, ToastKind::Error);
        assert_eq!(toast.message, "Notification connection error");
        assert_eq!(toast.duration, Duration::from_secs(5));
        assert!(!mgr.is_connected());

        mgr.disconnect().await;
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts().len(), 3);
        assert!(mgr.identity().is_none());
    }

    #[test]
    fn session_loop_can_be_spawned() {
        fn assert_send<T: Send>(_: &T) {}
        let (mgr, _rx) = manager(Arc::new(RefusingConnector::default()));
        let (_stop, stop_rx) = watch::channel(false);
        let identity = Identity::new("alice").unwrap();
        let run = mgr.inner.run(1, identity, stop_rx);
        assert_send(&run);
    }

    #[tokio::test]
    async fn disconnect_without_session_is_noop() {
        let (mgr, _rx) = manager(Arc::new(RefusingConnector::default()));
        mgr.disconnect().await;
        mgr.disconnect().await;
        assert_eq!(mgr.status(), ConnectionStatus::Disconnected);
    }
}

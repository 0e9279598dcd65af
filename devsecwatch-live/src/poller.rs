//! Scan status poller.
//!
//! Pulls one scan until it reaches a terminal status, waiting longer after
//! each non-terminal answer (the last delay of the schedule repeats) and a
//! fixed delay after a failed pull. One request is in flight at a time.
//! States: `Polling -> Done` on a terminal status, `Polling -> Cancelled` on
//! [`PollHandle::cancel`]; both are final.

use crate::api::ScanBackend;
use crate::config::PollConf;
use crate::credentials::CredentialSource;
use crate::models::Scan;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling,
    Done,
    Cancelled,
}

#[derive(Clone)]
pub struct StatusPoller {
    backend: Arc<dyn ScanBackend>,
    credentials: Arc<dyn CredentialSource>,
    schedule: Vec<Duration>,
    retry_delay: Duration,
}

impl StatusPoller {
    pub fn new(
        backend: Arc<dyn ScanBackend>,
        credentials: Arc<dyn CredentialSource>,
        conf: &PollConf,
    ) -> Self {
        let mut schedule = conf.schedule();
        if schedule.is_empty() {
            schedule.push(conf.retry_delay());
        }
        Self { backend, credentials, schedule, retry_delay: conf.retry_delay() }
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        self.schedule[attempt.min(self.schedule.len() - 1)]
    }

    /// Starts polling `scan_id`. The first pull goes out immediately;
    /// `on_terminal` runs once with the terminal scan record.
    pub fn poll<F>(&self, scan_id: i64, on_terminal: F) -> PollHandle
    where
        F: FnOnce(Scan) + Send + 'static,
    {
        let (state, _) = watch::channel(PollState::Polling);
        let state = Arc::new(state);
        let poller = self.clone();
        let task_state = state.clone();
        let task = tokio::spawn(async move {
            poller.run(scan_id, task_state, on_terminal).await;
        });
        PollHandle { scan_id, state, task }
    }

    async fn run<F>(self, scan_id: i64, state: Arc<watch::Sender<PollState>>, on_terminal: F)
    where
        F: FnOnce(Scan),
    {
        let mut stop = state.subscribe();
        let mut attempt = 0usize;
        loop {
            let Some(token) = self.credentials.access_token() else {
                debug!(scan_id, "no credential, skipping scan pull");
                tokio::select! {
                    _ = tokio::time::sleep(self.retry_delay) => {}
                    _ = stop.wait_for(|s| *s != PollState::Polling) => return,
                }
                continue;
            };
            let pulled = tokio::select! {
                pulled = self.backend.get_scan(&token, scan_id) => pulled,
                _ = stop.wait_for(|s| *s != PollState::Polling) => return,
            };

            let delay = match pulled {
                Ok(scan) if scan.status.is_terminal() => {
                    let finished = state.send_if_modified(|s| {
                        if *s == PollState::Polling {
                            *s = PollState::Done;
                            true
                        } else {
                            false
                        }
                    });
                    if finished {
                        info!(scan_id, status = ?scan.status, "scan reached terminal status");
                        on_terminal(scan);
                    }
                    return;
                }
                Ok(scan) => {
                    let delay = self.delay_for(attempt);
                    attempt += 1;
                    debug!(scan_id, status = ?scan.status, ?delay, "scan still running");
                    delay
                }
                Err(e) => {
                    warn!(scan_id, "scan status pull failed, retrying: {e}");
                    self.retry_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.wait_for(|s| *s != PollState::Polling) => return,
            }
        }
    }
}

/// Caller's grip on a running poll. Dropping it leaves the poll running;
/// call [`cancel`](Self::cancel) on teardown.
#[derive(Debug)]
pub struct PollHandle {
    scan_id: i64,
    state: Arc<watch::Sender<PollState>>,
    task: JoinHandle<()>,
}

impl PollHandle {
    pub fn scan_id(&self) -> i64 {
        self.scan_id
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    /// Stops scheduling pulls. No-op once the poll is done.
    pub fn cancel(&self) {
        let cancelled = self.state.send_if_modified(|s| {
            if *s == PollState::Polling {
                *s = PollState::Cancelled;
                true
            } else {
                false
            }
        });
        if cancelled {
            debug!(scan_id = self.scan_id, "scan poll cancelled");
        }
    }

    /// Waits for the poll to leave `Polling` and returns the final state.
    pub async fn finished(&self) -> PollState {
        let mut rx = self.state.subscribe();
        let settled = rx.wait_for(|s| *s != PollState::Polling).await.map(|state| *state);
        settled.unwrap_or(PollState::Cancelled)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

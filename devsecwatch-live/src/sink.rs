use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Warning,
    Error,
    Info,
}

/// Transient signal for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub kind: ToastKind,
    pub message: String,
    #[serde(with = "millis")]
    pub duration: Duration,
}

impl Toast {
    pub fn new(kind: ToastKind, message: impl Into<String>, duration: Duration) -> Self {
        Self { kind, message: message.into(), duration }
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

/// Where toasts go. Implementations must not block: they are called from
/// inside the push session loop.
pub trait PresentationSink: Send + Sync {
    fn toast(&self, toast: Toast);
}

/// Logs toasts, for headless use.
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl PresentationSink for TracingSink {
    fn toast(&self, toast: Toast) {
        match toast.kind {
            ToastKind::Error => error!(target: "devsecwatch_live::toast", "{}", toast.message),
            ToastKind::Warning => warn!(target: "devsecwatch_live::toast", "{}", toast.message),
            ToastKind::Success | ToastKind::Info => {
                info!(target: "devsecwatch_live::toast", "{}", toast.message)
            }
        }
    }
}

/// Forwards toasts to a UI task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Toast>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Toast>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl PresentationSink for ChannelSink {
    fn toast(&self, toast: Toast) {
        // receiver gone means nobody is rendering anymore
        let _ = self.tx.send(toast);
    }
}

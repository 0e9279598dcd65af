/**
 * DEVSECWATCH LIVE - live notification & scan-status coordinator
 *
 * ROLE: keeps a signed-in user's view of DevSecWatch current. A STOMP push
 * channel delivers scan-status events for the user, each event refreshes
 * the notification cache, and a status poller follows single scans to
 * completion independently of push delivery.
 *
 * FLOW: credential -> identity -> ConnectionManager -> SubscriptionHandler
 *       -> PresentationSink toast + NotificationCache refresh
 */

pub mod api;
pub mod cache;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod models;
pub mod poller;
pub mod session;
pub mod sink;
pub mod state;
pub mod stomp;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod testing;

pub use api::{HttpBackend, ScanBackend};
pub use cache::{NotificationCache, NotificationSnapshot};
pub use config::{load_config, load_config_from, LiveConfig};
pub use connection::{ConnectionManager, ConnectionStatus};
pub use credentials::{CredentialSource, FileCredentials, StaticCredentials};
pub use error::{LiveError, Result};
pub use models::{Identity, Notification, NotificationKind, Scan, ScanStatus, ScanStatusEvent};
pub use poller::{PollHandle, PollState, StatusPoller};
pub use session::{LiveSession, SessionParts};
pub use sink::{ChannelSink, PresentationSink, Toast, ToastKind, TracingSink};
pub use subscription::SubscriptionHandler;
pub use transport::{FrameLink, PushConnector, WsConnector};

/*!
# DevSecWatch DevKit - test doubles for the live coordinator

- `MockBroker`: in-process STOMP endpoint behind the push transport seam
- `MockBackend`: scripted REST backend recording calls
- `RecordingSink`: keeps every toast
- `ScanEventBuilder` and record builders for payloads
- `TestHarness`: a `LiveSession` wired to all of the above
*/

pub mod backend;
pub mod broker;
pub mod builders;
pub mod sink;
pub mod test_utils;

pub use backend::{BackendCall, MockBackend};
pub use broker::MockBroker;
pub use builders::{access_token, notification, scan, ScanEventBuilder};
pub use sink::RecordingSink;
pub use test_utils::TestHarness;

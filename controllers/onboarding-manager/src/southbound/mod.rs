//! Device-facing onboarding service
//!
//! - `identity.rs` - maps a device's claimed UUID/serial to one Host
//! - `session.rs` - per-connection state machine of the onboarding stream
//! - `nodes.rs` - operator registration of devices
//! - `zero_touch.rs` - automatic Instance creation after onboarding
//! - `http.rs` - axum routes, WebSocket transport and probes

pub mod api;
pub mod http;
pub mod identity;
pub mod nodes;
pub mod session;
pub mod zero_touch;

pub use http::{serve, AppState};
pub use nodes::NodeService;
pub use zero_touch::ZeroTouch;

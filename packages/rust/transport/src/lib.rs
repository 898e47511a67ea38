//! Realtime session transport.
//!
//! A single long-lived duplex connection carries numbered request/response
//! exchanges and unsolicited push notifications. The session reconnects on
//! its own with a bounded backoff schedule.

pub mod backoff;
pub mod frame;
pub mod session;
pub mod socket;

pub use backoff::ReconnectPolicy;
pub use frame::{Inbound, PushNotification, Response, STATUS_OK, decode_frame, encode_request, query};
pub use session::{KEEPALIVE_INTERVAL, SessionEvent, SessionHandle, SessionState};
pub use socket::{Connector, Socket, SocketEvent, WsConnector};

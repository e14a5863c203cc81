//! Wire envelopes and bus messages shared by gateway bundles.
//!
//! - [`Request`] / [`Response`]: the RPC envelopes clients exchange with a
//!   bundle over HTTP or WebSocket.
//! - [`AuthLevel`]: the graduated trust model commands are gated on.
//! - [`messages`]: subject-tagged bus messages for push fan-out and
//!   cross-bundle WebSocket delivery.

pub mod auth;
pub mod error;
pub mod messages;
pub mod request;
pub mod response;

pub use auth::AuthLevel;
pub use error::{Error, ErrorCode, Result};
pub use messages::{PushCommand, PushMessage, WebsocketPush};
pub use request::Request;
pub use response::{Response, ResponseType, Status};

/// Upper bound on items per result page and on recipients per fan-out
/// message.
pub const MAX_RESULT_LIMIT: usize = 100;

//! Command services.
//!
//! Each service receives its collaborators at construction and registers
//! its commands in a [`CommandTable`](crate::dispatch::CommandTable).

pub mod notification;
pub mod place;
pub mod post;
pub mod session;
pub mod system;

pub use notification::NotificationService;
pub use place::PlaceService;
pub use post::PostService;
pub use session::SessionService;
pub use system::SystemService;

use crate::error::GatewayError;
use common::{ErrorCode, Request, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// Decode typed arguments, answering `Invalid` on mismatch.
pub(crate) fn parse_args<T: DeserializeOwned>(request: &Request, response: &mut Response) -> Option<T> {
    match request.data_as::<T>() {
        Ok(args) => Some(args),
        Err(e) => {
            debug!("Invalid arguments for {}: {}", request.command, e);
            response.error(ErrorCode::Invalid, &["data"]);
            None
        }
    }
}

/// Answer `Unknown` for a persistence failure.
pub(crate) fn model_error(response: &mut Response, command: &str, error: GatewayError) {
    warn!("Model call failed in {}: {:?}", command, error);
    response.error(ErrorCode::Unknown, &[]);
}

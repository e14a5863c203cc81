//! Error taxonomy surfaced to clients and decode errors for the envelopes.

use thiserror::Error;

/// Error codes carried in `data.err_code` of an error response.
///
/// The numeric values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Unexpected internal failure.
    Unknown = 0,
    /// Authenticated but forbidden.
    Access = 1,
    /// The command or resource is not available on this gateway.
    Unavailable = 2,
    /// Field present but malformed or out of range.
    Invalid = 3,
    /// Required field missing.
    Incomplete = 4,
    /// Uniqueness violation.
    Duplicate = 5,
    /// Quota or size cap exceeded.
    Limit = 6,
    /// The request was abandoned before a reply was produced.
    Timeout = 7,
    /// Session invalid or expired.
    Session = 8,
}

impl ErrorCode {
    /// Numeric wire value.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Parse a wire value.
    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Self::Unknown,
            1 => Self::Access,
            2 => Self::Unavailable,
            3 => Self::Invalid,
            4 => Self::Incomplete,
            5 => Self::Duplicate,
            6 => Self::Limit,
            7 => Self::Timeout,
            8 => Self::Session,
            _ => return None,
        })
    }
}

/// Errors raised while decoding envelopes and bus messages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed command: {0:?}")]
    MalformedCommand(String),
}

pub type Result<T> = std::result::Result<T, Error>;

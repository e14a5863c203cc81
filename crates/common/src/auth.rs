//! Graduated trust levels for callers.

use serde::{Deserialize, Serialize};

/// Trust tier of a caller, computed per request.
///
/// Variants are declared lowest to highest, so the derived ordering is the
/// authorization ordering: a command runs only when
/// `caller >= command.min_auth_level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLevel {
    Unauthorized,
    AppLevel1,
    AppLevel2,
    AppLevel3,
    User,
    AdminUser,
}

impl AuthLevel {
    /// Map an application token scope to its level.
    ///
    /// Scopes outside `1..=3` grant nothing.
    pub fn from_app_scope(scope: u8) -> Self {
        match scope {
            1 => Self::AppLevel1,
            2 => Self::AppLevel2,
            3 => Self::AppLevel3,
            _ => Self::Unauthorized,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::AppLevel1 => "app_level_1",
            Self::AppLevel2 => "app_level_2",
            Self::AppLevel3 => "app_level_3",
            Self::User => "user",
            Self::AdminUser => "admin_user",
        }
    }
}

impl Default for AuthLevel {
    fn default() -> Self {
        Self::Unauthorized
    }
}

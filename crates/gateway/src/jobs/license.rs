//! License manager.

use super::Job;
use crate::error::Result;
use crate::flags::FlagStore;
use crate::model::{License, Model};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Flags derived from the stored license.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LicenseState {
    pub expired: bool,
    pub slow_mode: Option<u8>,
}

/// Derive the license flags at `now`. Time elapsed since expiry selects the
/// slow-mode tier: up to 30 days tier 0, up to 60 tier 1, beyond that tier 2.
pub fn license_flags(now: DateTime<Utc>, license: Option<&License>) -> LicenseState {
    let Some(license) = license else {
        return LicenseState::default();
    };
    if now <= license.expires_at {
        return LicenseState::default();
    }
    let elapsed = now - license.expires_at;
    let tier = if elapsed <= Duration::days(30) {
        0
    } else if elapsed <= Duration::days(60) {
        1
    } else {
        2
    };
    LicenseState {
        expired: true,
        slow_mode: Some(tier),
    }
}

pub struct LicenseJob {
    model: Arc<dyn Model>,
    flags: Arc<FlagStore>,
}

impl LicenseJob {
    pub fn new(model: Arc<dyn Model>, flags: Arc<FlagStore>) -> Self {
        Self { model, flags }
    }

    /// Recompute the flags from scratch.
    pub async fn refresh(&self, now: DateTime<Utc>) -> Result<LicenseState> {
        let license = self.model.get_license().await?;
        if license.is_none() {
            warn!("No license stored, clearing license flags");
        }
        let state = license_flags(now, license.as_ref());

        let current = self.flags.load();
        if current.license_expired != state.expired || current.license_slow_mode != state.slow_mode {
            info!(
                "License flags changed: expired={} slow_mode={:?}",
                state.expired, state.slow_mode
            );
        }
        self.flags.set_license(state.expired, state.slow_mode);
        Ok(state)
    }
}

#[async_trait]
impl Job for LicenseJob {
    fn name(&self) -> &'static str {
        "license"
    }

    async fn run(&self) -> Result<()> {
        self.refresh(Utc::now()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::days(i64::from(day))
    }

    fn license() -> License {
        License { expires_at: at(0) }
    }

    #[test]
    fn test_tiers() {
        let l = license();
        assert_eq!(license_flags(at(0), Some(&l)), LicenseState::default());
        assert_eq!(
            license_flags(at(0) - Duration::days(5), Some(&l)),
            LicenseState::default()
        );
        assert_eq!(license_flags(at(1), Some(&l)).slow_mode, Some(0));
        assert_eq!(license_flags(at(30), Some(&l)).slow_mode, Some(0));
        assert_eq!(license_flags(at(31), Some(&l)).slow_mode, Some(1));
        assert_eq!(license_flags(at(60), Some(&l)).slow_mode, Some(1));
        assert_eq!(license_flags(at(61), Some(&l)).slow_mode, Some(2));
        // Partial days count.
        let late = at(30) + Duration::hours(23);
        assert_eq!(license_flags(late, Some(&l)).slow_mode, Some(1));
        let late = at(60) + Duration::seconds(1);
        assert_eq!(license_flags(late, Some(&l)).slow_mode, Some(2));
        assert!(license_flags(at(400), Some(&l)).expired);
        assert_eq!(license_flags(at(400), None), LicenseState::default());
    }

    #[test]
    fn test_pure_across_ticks() {
        let l = license();
        let first = license_flags(at(45), Some(&l));
        // A missed tick in between changes nothing.
        let _ = license_flags(at(10), Some(&l));
        let second = license_flags(at(45), Some(&l));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_refresh_sets_and_clears_flags() {
        let model = Arc::new(MemoryModel::new());
        let flags = Arc::new(FlagStore::new());
        let job = LicenseJob::new(model.clone(), flags.clone());

        model.set_license(license()).await.unwrap();
        job.refresh(at(45)).await.unwrap();
        assert!(flags.load().license_expired);
        assert_eq!(flags.load().license_slow_mode, Some(1));

        model.set_license(License { expires_at: at(100) }).await.unwrap();
        job.refresh(at(45)).await.unwrap();
        assert!(!flags.load().license_expired);
        assert_eq!(flags.load().license_slow_mode, None);
    }
}

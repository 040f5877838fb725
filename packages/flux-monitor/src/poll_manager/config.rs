use std::{str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_HIBERNATION_POLL_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_MIN_RETRY_BACKOFF: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_RETRY_BACKOFF: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MINIMUM_POLLING_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollManagerConfig {
    pub poll_ticker_interval: Duration,
    pub poll_ticker_disabled: bool,
    pub idle_timer_period: Duration,
    pub idle_timer_disabled: bool,
    pub hibernation_poll_period: Duration,
    pub min_retry_backoff_duration: Duration,
    pub max_retry_backoff_duration: Duration,
    pub drumbeat_enabled: bool,
    /// Cron expression with a seconds field, evaluated in UTC
    pub drumbeat_schedule: Option<String>,
    pub drumbeat_random_delay: Duration,
    /// Floor for `poll_ticker_interval` while the poll ticker is enabled
    pub minimum_polling_interval: Duration,
}

impl Default for PollManagerConfig {
    fn default() -> Self {
        Self {
            poll_ticker_interval: Duration::from_secs(60),
            poll_ticker_disabled: false,
            idle_timer_period: Duration::from_secs(60 * 60),
            idle_timer_disabled: false,
            hibernation_poll_period: DEFAULT_HIBERNATION_POLL_PERIOD,
            min_retry_backoff_duration: DEFAULT_MIN_RETRY_BACKOFF,
            max_retry_backoff_duration: DEFAULT_MAX_RETRY_BACKOFF,
            drumbeat_enabled: false,
            drumbeat_schedule: None,
            drumbeat_random_delay: Duration::ZERO,
            minimum_polling_interval: DEFAULT_MINIMUM_POLLING_INTERVAL,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollManagerError {
    #[error("poll interval {interval:?} is shorter than the minimum of {minimum:?}")]
    PollIntervalTooShort { interval: Duration, minimum: Duration },
    #[error("{0} must be greater than zero")]
    ZeroPeriod(&'static str),
    #[error("invalid retry backoff: min {min:?}, max {max:?}")]
    InvalidRetryBackoff { min: Duration, max: Duration },
    #[error("drumbeat is enabled but no schedule is set")]
    MissingDrumbeatSchedule,
    #[error("invalid drumbeat schedule '{expression}': {reason}")]
    InvalidDrumbeatSchedule { expression: String, reason: String },
}

impl PollManagerConfig {
    /// Checks every timer setting and parses the drumbeat schedule if enabled
    pub fn validate(&self) -> Result<Option<cron::Schedule>, PollManagerError> {
        if !self.poll_ticker_disabled {
            if self.poll_ticker_interval.is_zero() {
                return Err(PollManagerError::ZeroPeriod("poll_ticker_interval"));
            }
            if self.poll_ticker_interval < self.minimum_polling_interval {
                return Err(PollManagerError::PollIntervalTooShort {
                    interval: self.poll_ticker_interval,
                    minimum: self.minimum_polling_interval,
                });
            }
        }

        if !self.idle_timer_disabled && self.idle_timer_period.is_zero() {
            return Err(PollManagerError::ZeroPeriod("idle_timer_period"));
        }

        if self.hibernation_poll_period.is_zero() {
            return Err(PollManagerError::ZeroPeriod("hibernation_poll_period"));
        }

        if self.min_retry_backoff_duration.is_zero()
            || self.min_retry_backoff_duration > self.max_retry_backoff_duration
        {
            return Err(PollManagerError::InvalidRetryBackoff {
                min: self.min_retry_backoff_duration,
                max: self.max_retry_backoff_duration,
            });
        }

        if !self.drumbeat_enabled {
            return Ok(None);
        }

        let expression = self
            .drumbeat_schedule
            .as_deref()
            .ok_or(PollManagerError::MissingDrumbeatSchedule)?;

        cron::Schedule::from_str(expression)
            .map(Some)
            .map_err(|e| PollManagerError::InvalidDrumbeatSchedule {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(matches!(PollManagerConfig::default().validate(), Ok(None)));
    }

    #[test]
    fn poll_interval_floor() {
        let config = PollManagerConfig {
            poll_ticker_interval: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            PollManagerError::PollIntervalTooShort {
                interval: Duration::from_secs(5),
                minimum: DEFAULT_MINIMUM_POLLING_INTERVAL,
            }
        );

        // irrelevant once the ticker is off
        let config = PollManagerConfig {
            poll_ticker_disabled: true,
            ..config
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn retry_bounds_must_be_ordered() {
        let config = PollManagerConfig {
            min_retry_backoff_duration: Duration::from_secs(10),
            max_retry_backoff_duration: Duration::from_secs(5),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PollManagerError::InvalidRetryBackoff { .. })
        ));

        let config = PollManagerConfig {
            min_retry_backoff_duration: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn drumbeat_schedule_is_parsed() {
        let mut config = PollManagerConfig {
            drumbeat_enabled: true,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err(),
            PollManagerError::MissingDrumbeatSchedule
        );

        config.drumbeat_schedule = Some("not a schedule".to_string());
        assert!(matches!(
            config.validate(),
            Err(PollManagerError::InvalidDrumbeatSchedule { .. })
        ));

        config.drumbeat_schedule = Some("0 */5 * * * *".to_string());
        assert!(config.validate().unwrap().is_some());
    }
}

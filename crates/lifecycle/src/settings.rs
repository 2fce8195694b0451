//! Runtime settings derived from the loaded configuration.

use std::time::Duration;

use cgn_core::{Config, EngineSettings, RetrySettings, StatusTag};
use cgn_workflow::{EngineConfig, RetryPolicy};

use crate::orchestrations::Delays;

/// Knobs the lifecycle service reads at trigger time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub delays: Delays,
    pub notifiable_statuses: Vec<StatusTag>,
    pub eyca_age_limit: u32,
}

impl LifecycleSettings {
    pub fn from_engine_settings(settings: &EngineSettings) -> Self {
        Self {
            delays: Delays {
                notification: Duration::from_millis(settings.notification_delay_ms),
                error_notification: Duration::from_millis(settings.error_notification_delay_ms),
            },
            notifiable_statuses: settings.notifiable_statuses.clone(),
            eyca_age_limit: settings.eyca_age_limit,
        }
    }

    /// Whether reaching `target` is announced to the holder.
    pub fn is_notifiable(&self, target: StatusTag) -> bool {
        self.notifiable_statuses.contains(&target)
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_engine_settings(&EngineSettings::default())
    }
}

pub fn retry_policy(settings: &RetrySettings) -> RetryPolicy {
    RetryPolicy::new(
        settings.first_interval_ms,
        settings.backoff_coefficient,
        settings.max_attempts,
    )
    .with_max_interval_ms(settings.max_interval_ms)
}

pub fn engine_config(config: &Config) -> EngineConfig {
    EngineConfig {
        max_concurrent: config.engine.max_concurrent,
        retry: retry_policy(&config.retry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_notify_activation_and_revocation() {
        let settings = LifecycleSettings::default();
        assert!(settings.is_notifiable(StatusTag::Activated));
        assert!(settings.is_notifiable(StatusTag::Revoked));
        assert!(!settings.is_notifiable(StatusTag::Expired));
        assert_eq!(settings.delays.notification, Duration::from_secs(2));
    }

    #[test]
    fn test_engine_config_from_config() {
        let mut config = Config::default();
        config.engine.max_concurrent = 8;
        config.retry.max_attempts = 3;

        let engine = engine_config(&config);
        assert_eq!(engine.max_concurrent, 8);
        assert_eq!(engine.retry.max_attempts, 3);
        assert_eq!(engine.retry.max_interval_ms, 30_000);
    }
}

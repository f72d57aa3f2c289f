use std::time::Duration;

use crate::definition::Profile;
use crate::error::ReconcilerError;

pub const DEFAULT_MARKER_TAG: &str = "create-cloudwatch-alarm";
pub const DEFAULT_NAME_TAG: &str = "application-name";
pub const DEFAULT_TYPE_TAG: &str = "application-type";
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 10;
const DEFAULT_STORE_MAX_ATTEMPTS: u32 = 3;

/// Deployment-time settings, read once at cold start.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub table_name: String,
    pub topic_arn: Option<String>,
    pub log_level: String,
    pub marker_tag: String,
    pub name_tag: String,
    pub type_tag: String,
    pub default_profile: Profile,
    pub call_timeout: Duration,
    pub store_max_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, ReconcilerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ReconcilerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let or = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let table_name = get("DYNAMODB_TABLE_NAME")
            .ok_or_else(|| ReconcilerError::Config("DYNAMODB_TABLE_NAME is not set".to_string()))?;

        let call_timeout = match get("CALL_TIMEOUT_SECS") {
            Some(value) => value
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| {
                    ReconcilerError::Config(format!("CALL_TIMEOUT_SECS {:?} is invalid", value))
                })?,
            None => Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        };

        let store_max_attempts = match get("STORE_MAX_ATTEMPTS") {
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|attempts| *attempts > 0)
                .ok_or_else(|| {
                    ReconcilerError::Config(format!("STORE_MAX_ATTEMPTS {:?} is invalid", value))
                })?,
            None => DEFAULT_STORE_MAX_ATTEMPTS,
        };

        Ok(Config {
            table_name,
            topic_arn: get("SNS_TOPIC_ARN"),
            log_level: or("LOGLEVEL", "info").to_lowercase(),
            marker_tag: or("MARKER_TAG", DEFAULT_MARKER_TAG),
            name_tag: or("APPLICATION_NAME_TAG", DEFAULT_NAME_TAG),
            type_tag: or("APPLICATION_TYPE_TAG", DEFAULT_TYPE_TAG),
            default_profile: Profile::new(
                or("DEFAULT_APPLICATION_NAME", "app"),
                or("DEFAULT_APPLICATION_TYPE", "dev"),
            ),
            call_timeout,
            store_max_attempts,
        })
    }

    /// Alarm actions attached to every alarm.
    pub fn alarm_actions(&self) -> Vec<String> {
        self.topic_arn.iter().cloned().collect()
    }
}

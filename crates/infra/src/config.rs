//! Configuration of the per-tenant event log actors.
//!
//! Values come from `EVENTLOG_*` environment variables (durations in milliseconds)
//! with safe defaults; invalid values are logged and ignored.

use std::time::Duration;

use eventlog_events::MAX_CATCHUP_PAGE_SIZE;

pub const CATCHUP_PAGE_SIZE_ENV: &str = "EVENTLOG_CATCHUP_PAGE_SIZE";
pub const SUBSCRIPTION_ACK_TIMEOUT_ENV: &str = "EVENTLOG_SUBSCRIPTION_ACK_TIMEOUT_MS";
pub const DELIVERY_RETRY_DELAY_ENV: &str = "EVENTLOG_DELIVERY_RETRY_DELAY_MS";
pub const FETCH_RETRY_DELAY_ENV: &str = "EVENTLOG_FETCH_RETRY_DELAY_MS";
pub const STARTUP_RETRY_DELAY_ENV: &str = "EVENTLOG_STARTUP_RETRY_DELAY_MS";
pub const STREAM_BUFFER_SIZE_ENV: &str = "EVENTLOG_STREAM_BUFFER_SIZE";

/// Event log configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogConfig {
    /// Events fetched per catch-up page (capped at [`MAX_CATCHUP_PAGE_SIZE`])
    pub catchup_page_size: usize,
    /// How long a subscription waits for its target to acknowledge a batch
    pub subscription_ack_timeout: Duration,
    /// Pause before re-delivering a batch that was not acknowledged
    pub delivery_retry_delay: Duration,
    /// Pause before retrying a failed catch-up fetch
    pub fetch_retry_delay: Duration,
    /// Pause before retrying the committer's startup read
    pub startup_retry_delay: Duration,
    /// Batches buffered between a stream subscription and its consumer
    pub stream_buffer_size: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            catchup_page_size: MAX_CATCHUP_PAGE_SIZE,
            subscription_ack_timeout: Duration::from_secs(5),
            delivery_retry_delay: Duration::from_secs(1),
            fetch_retry_delay: Duration::from_millis(500),
            startup_retry_delay: Duration::from_secs(1),
            stream_buffer_size: 64,
        }
    }
}

impl EventLogConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup (environment, file, test map).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            catchup_page_size: parse_usize(&lookup, CATCHUP_PAGE_SIZE_ENV)
                .map(|n| n.clamp(1, MAX_CATCHUP_PAGE_SIZE))
                .unwrap_or(defaults.catchup_page_size),
            subscription_ack_timeout: parse_millis(&lookup, SUBSCRIPTION_ACK_TIMEOUT_ENV)
                .unwrap_or(defaults.subscription_ack_timeout),
            delivery_retry_delay: parse_millis(&lookup, DELIVERY_RETRY_DELAY_ENV)
                .unwrap_or(defaults.delivery_retry_delay),
            fetch_retry_delay: parse_millis(&lookup, FETCH_RETRY_DELAY_ENV)
                .unwrap_or(defaults.fetch_retry_delay),
            startup_retry_delay: parse_millis(&lookup, STARTUP_RETRY_DELAY_ENV)
                .unwrap_or(defaults.startup_retry_delay),
            stream_buffer_size: parse_usize(&lookup, STREAM_BUFFER_SIZE_ENV)
                .map(|n| n.max(1))
                .unwrap_or(defaults.stream_buffer_size),
        }
    }

    pub fn with_catchup_page_size(mut self, size: usize) -> Self {
        self.catchup_page_size = size.clamp(1, MAX_CATCHUP_PAGE_SIZE);
        self
    }

    pub fn with_subscription_ack_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_ack_timeout = timeout;
        self
    }

    pub fn with_delivery_retry_delay(mut self, delay: Duration) -> Self {
        self.delivery_retry_delay = delay;
        self
    }

    pub fn with_fetch_retry_delay(mut self, delay: Duration) -> Self {
        self.fetch_retry_delay = delay;
        self
    }

    pub fn with_startup_retry_delay(mut self, delay: Duration) -> Self {
        self.startup_retry_delay = delay;
        self
    }

    pub fn with_stream_buffer_size(mut self, size: usize) -> Self {
        self.stream_buffer_size = size.max(1);
        self
    }
}

fn parse_usize<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, value = %raw, error = %err, "ignoring invalid configuration value");
            None
        }
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(err) => {
            tracing::warn!(key, value = %raw, error = %err, "ignoring invalid configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_values_use_defaults() {
        assert_eq!(EventLogConfig::from_lookup(|_| None), EventLogConfig::default());
    }

    #[test]
    fn values_are_read_and_clamped() {
        let config = EventLogConfig::from_lookup(lookup_from(&[
            (CATCHUP_PAGE_SIZE_ENV, "5000"),
            (SUBSCRIPTION_ACK_TIMEOUT_ENV, "250"),
            (STREAM_BUFFER_SIZE_ENV, "0"),
        ]));

        assert_eq!(config.catchup_page_size, MAX_CATCHUP_PAGE_SIZE);
        assert_eq!(config.subscription_ack_timeout, Duration::from_millis(250));
        assert_eq!(config.stream_buffer_size, 1);
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = EventLogConfig::from_lookup(lookup_from(&[
            (FETCH_RETRY_DELAY_ENV, "soon"),
            (CATCHUP_PAGE_SIZE_ENV, "-3"),
        ]));

        assert_eq!(config.fetch_retry_delay, EventLogConfig::default().fetch_retry_delay);
        assert_eq!(config.catchup_page_size, MAX_CATCHUP_PAGE_SIZE);
    }
}

//! Retry policies
//!
//! Decides whether a failed request is repeated and how long to wait first.
//! Attempt tracking lives in an explicit [`RetryState`] owned by the caller.

use bbs_core::RetrySettings;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (0 means no retries)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any computed delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub rate: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_secs(settings.max_delay_seconds),
            rate: settings.rate,
        }
    }
}

impl RetryConfig {
    /// Create a config with no retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_rate(mut self, rate: u32) -> Self {
        self.rate = rate;
        self
    }
}

/// Connection-level failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportErrorKind {
    /// Interrupted I/O, including connect and read timeouts.
    Interrupted,
    UnknownHost,
    ConnectionRefused,
    ConnectionClosed,
    NoRouteToHost,
    Tls,
    Other,
}

impl TransportErrorKind {
    /// Failures a retry cannot fix: configuration or network problems.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupted => "interrupted",
            Self::UnknownHost => "unknown_host",
            Self::ConnectionRefused => "connection_refused",
            Self::ConnectionClosed => "connection_closed",
            Self::NoRouteToHost => "no_route_to_host",
            Self::Tls => "tls",
            Self::Other => "io",
        }
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one attempt that did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// A response arrived with this status.
    Status(u16),
    /// No response; the connection failed.
    Transport(TransportErrorKind),
}

/// Everything the policy looks at for one decision.
#[derive(Debug, Clone, Copy)]
pub struct RetryContext<'a> {
    /// Upper-case HTTP method.
    pub method: &'a str,
    /// Caller asserts that repeating this request is safe (POST only).
    pub idempotent: bool,
    pub failure: Failure,
    pub cancelled: bool,
    pub state: &'a RetryState,
}

/// Per-request retry bookkeeping.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    first_attempt_at: Instant,
}

impl RetryState {
    pub fn new() -> Self {
        Self {
            attempt: 0,
            first_attempt_at: Instant::now(),
        }
    }

    /// Number of failed attempts so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Count one more failure and return the new attempt number.
    pub fn record_failure(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.first_attempt_at = Instant::now();
    }

    pub fn elapsed(&self) -> Duration {
        self.first_attempt_at.elapsed()
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn default_config() -> Self {
        Self::new(RetryConfig::default())
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Methods that are safe to repeat.
    pub fn is_idempotent(method: &str, marked_idempotent: bool) -> bool {
        match method {
            "GET" | "HEAD" | "PUT" | "DELETE" | "OPTIONS" => true,
            "POST" => marked_idempotent,
            _ => false,
        }
    }

    /// Statuses that signal a transient server-side condition.
    pub fn is_retryable_status(status: u16) -> bool {
        matches!(status, 429 | 503)
    }

    pub fn should_retry(&self, context: &RetryContext<'_>) -> bool {
        if context.cancelled {
            return false;
        }
        if context.state.attempt() >= self.config.max_retries {
            return false;
        }
        if !Self::is_idempotent(context.method, context.idempotent) {
            return false;
        }
        match context.failure {
            Failure::Status(status) => Self::is_retryable_status(status),
            Failure::Transport(kind) => !kind.is_fatal(),
        }
    }

    /// Backoff for a given attempt: zero before any failure, then
    /// `initial * rate^(attempt - 1)` capped at the maximum.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let factor = (self.config.rate as u64).checked_pow(attempt - 1);
        let initial_ms = self.config.initial_delay.as_millis() as u64;
        let delay = factor
            .and_then(|f| initial_ms.checked_mul(f))
            .map(Duration::from_millis)
            .unwrap_or(self.config.max_delay);

        delay.min(self.config.max_delay)
    }

    /// Delay before the next attempt. A positive server-supplied
    /// `Retry-After` wins over the computed backoff.
    pub fn next_delay(&self, state: &RetryState, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(delay) if delay > Duration::ZERO => delay,
            _ => self.delay_for_attempt(state.attempt()),
        }
    }
}

/// Parse a `Retry-After` value given either as seconds or as an HTTP-date.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - now).to_std().ok()
}

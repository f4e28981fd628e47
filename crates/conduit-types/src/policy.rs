//! Per-call failure policy.

use serde::{Deserialize, Deserializer, Serialize};

/// How a failed call is surfaced to the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorMode {
    /// Propagate the first failure (default).
    #[default]
    FailFast,
    /// Return an envelope carrying the error instead of failing the call.
    AllowPartial,
    /// Try a fallback path, otherwise propagate.
    BestEffort,
}

impl ErrorMode {
    /// Parse a mode name. Anything unrecognised is `FailFast`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "allow_partial" => ErrorMode::AllowPartial,
            "best_effort" => ErrorMode::BestEffort,
            _ => ErrorMode::FailFast,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorMode::FailFast => "fail_fast",
            ErrorMode::AllowPartial => "allow_partial",
            ErrorMode::BestEffort => "best_effort",
        }
    }
}

// Unknown or non-string modes deny by default instead of rejecting the envelope.
impl<'de> Deserialize<'de> for ErrorMode {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<serde_json::Value>::deserialize(d)?;
        Ok(raw
            .as_ref()
            .and_then(|v| v.as_str())
            .map(ErrorMode::parse)
            .unwrap_or_default())
    }
}

impl std::fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure policy for one call. Resolved once at adapter entry and read-only after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPolicy {
    #[serde(default)]
    pub mode: ErrorMode,
    /// Retries after the first attempt (retryable kinds only).
    #[serde(default)]
    pub retry_count: u32,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Compensate completed sequential workflow steps on failure.
    #[serde(default)]
    pub rollback_on_failure: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self {
            mode: ErrorMode::FailFast,
            retry_count: 0,
            timeout_ms: default_timeout_ms(),
            rollback_on_failure: false,
        }
    }
}

impl ErrorPolicy {
    pub fn fail_fast() -> Self {
        Self::default()
    }

    pub fn allow_partial() -> Self {
        Self {
            mode: ErrorMode::AllowPartial,
            ..Self::default()
        }
    }

    pub fn best_effort() -> Self {
        Self {
            mode: ErrorMode::BestEffort,
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_rollback(mut self, rollback_on_failure: bool) -> Self {
        self.rollback_on_failure = rollback_on_failure;
        self
    }

    /// The envelope's own policy wins; otherwise the process-wide default.
    pub fn resolve(requested: Option<&ErrorPolicy>, default: &ErrorPolicy) -> ErrorPolicy {
        requested.cloned().unwrap_or_else(|| default.clone())
    }
}

use std::{fmt, str::FromStr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimitSpecError {
    #[error("invalid limit spec {spec:?}: {reason}")]
    InvalidLimitSpec { spec: String, reason: &'static str },
}

/// A quota of `requests` per `period_secs`, written as `"<N> per <unit>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub requests: u32,
    pub period_secs: u64,
}

impl RateLimit {
    pub const fn new(requests: u32, period_secs: u64) -> Self {
        Self {
            requests,
            period_secs,
        }
    }
}

impl FromStr for RateLimit {
    type Err = LimitSpecError;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| LimitSpecError::InvalidLimitSpec {
            spec: spec.to_string(),
            reason,
        };

        let lowered = spec.to_lowercase();
        let parts: Vec<&str> = lowered.split_whitespace().collect();
        let [count, separator, unit] = parts.as_slice() else {
            return Err(invalid("expected three words"));
        };
        if *separator != "per" {
            return Err(invalid("second word must be \"per\""));
        }

        let requests = count
            .parse::<u32>()
            .map_err(|_| invalid("count is not a non-negative integer"))?;
        let period_secs = match *unit {
            "second" => 1,
            "minute" => 60,
            "hour" => 3_600,
            "day" => 86_400,
            _ => return Err(invalid("unit must be second, minute, hour or day")),
        };

        Ok(Self::new(requests, period_secs))
    }
}

impl fmt::Display for RateLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.period_secs {
            1 => "second",
            60 => "minute",
            3_600 => "hour",
            86_400 => "day",
            other => return write!(f, "{} per {}s", self.requests, other),
        };
        write!(f, "{} per {}", self.requests, unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `remaining` is unknown when the check failed open or limiting is off.
    Allow { remaining: Option<u32> },
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

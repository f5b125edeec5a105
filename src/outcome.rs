//! Probe verdicts and final per-handle outcomes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

/// What a single probe concluded.
///
/// `Unknown` is an intermediate state; the combiner always turns it into a
/// decisive [`Availability`] before an outcome is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Verdict {
    /// The handle can be registered.
    Available(String),
    /// The handle belongs to someone, or the service refuses it.
    Taken(String),
    /// The probe could not tell.
    Unknown(ProbeError),
}

impl Verdict {
    /// `Available` or `Taken`.
    #[must_use]
    pub fn is_decisive(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// The terminal answer for a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// The handle can be registered.
    Available,
    /// The handle cannot be registered.
    Taken,
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "available"),
            Self::Taken => write!(f, "taken"),
        }
    }
}

/// Which step produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// The structured check endpoint.
    Primary,
    /// The profile-page heuristic.
    Secondary,
    /// Rejected by the syntax rules before any request.
    Validation,
    /// The check itself failed.
    Error,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
            Self::Validation => write!(f, "validation"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// The bucket an outcome is counted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Decisively available.
    Available,
    /// Decisively taken.
    Unavailable,
    /// Invalid handle or failed check.
    Error,
}

/// The single result recorded for one submitted handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// The canonical handle, or the raw input when it did not validate.
    pub name: String,
    /// Terminal availability. Error outcomes report `Taken`.
    pub availability: Availability,
    /// Human-readable reason.
    pub detail: String,
    /// Which step decided.
    pub method: Method,
    /// When the outcome was produced.
    pub timestamp: DateTime<Utc>,
}

impl CheckOutcome {
    /// A decisive outcome from one of the probes.
    pub fn decided(
        name: impl Into<String>,
        availability: Availability,
        detail: impl Into<String>,
        method: Method,
    ) -> Self {
        Self {
            name: name.into(),
            availability,
            detail: detail.into(),
            method,
            timestamp: Utc::now(),
        }
    }

    /// A handle rejected by the syntax rules.
    pub fn invalid(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::decided(name, Availability::Taken, detail, Method::Validation)
    }

    /// A check that failed outright.
    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::decided(name, Availability::Taken, detail, Method::Error)
    }

    /// The bucket this outcome belongs in.
    #[must_use]
    pub fn classification(&self) -> Classification {
        match (self.method, self.availability) {
            (Method::Validation | Method::Error, _) => Classification::Error,
            (_, Availability::Available) => Classification::Available,
            (_, Availability::Taken) => Classification::Unavailable,
        }
    }
}

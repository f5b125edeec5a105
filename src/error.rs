//! Failure taxonomy shared by the probes.

use thiserror::Error;

use crate::validate::InvalidName;

/// A transport-level fault reported by a [`Transport`](crate::session::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The upstream proxy refused, dropped or could not reach the target.
    #[error("proxy failure: {0}")]
    Proxy(String),
    /// The request ran past its timeout.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Any other connection or I/O failure.
    #[error("network failure: {0}")]
    Network(String),
}

impl TransportError {
    /// Whether the fault happened at the proxy layer.
    #[must_use]
    pub fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }
}

/// Why a probe could not reach a decisive answer.
///
/// Carried by [`Verdict::Unknown`](crate::outcome::Verdict::Unknown); only
/// ever an intermediate state, never a final outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProbeError {
    /// The handle breaks the syntax rules; no request was made.
    #[error("invalid format: {0}")]
    Validation(#[from] InvalidName),
    /// Connection, timeout or proxy fault.
    #[error(transparent)]
    Network(#[from] TransportError),
    /// A status or body shape the probe does not recognize.
    #[error("unrecognized response: {0}")]
    Protocol(String),
    /// The service answered with an explicit throttling status.
    #[error("rate limited (HTTP {0})")]
    RateLimited(u16),
    /// The anti-forgery token could not be obtained.
    #[error("token unavailable")]
    TokenUnavailable,
    /// Every attempt was consumed without a decisive answer.
    #[error("{what} exhausted after {attempts} attempts{}", last_suffix(.last))]
    ExhaustedRetries {
        /// Which probe gave up.
        what: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt, if any attempt was made.
        last: Option<Box<ProbeError>>,
    },
}

impl ProbeError {
    /// The failure behind an exhausted probe, or `self` for anything else.
    #[must_use]
    pub fn last_failure(&self) -> &ProbeError {
        match self {
            Self::ExhaustedRetries {
                last: Some(last), ..
            } => last.last_failure(),
            other => other,
        }
    }
}

fn last_suffix(last: &Option<Box<ProbeError>>) -> String {
    last.as_ref()
        .map(|err| format!(" (last: {err})"))
        .unwrap_or_default()
}

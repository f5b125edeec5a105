//! The structured check endpoint, with bounded retries.
//!
//! Each attempt fetches a fresh anti-forgery token, submits the handle and
//! turns the reply into a [`Signal`]. What happens next is decided by
//! [`RetryMachine`], which knows nothing about HTTP and is tested on its
//! own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, warn};
use serde::Deserialize;

use crate::check::Probe;
use crate::config::{DelayRange, Endpoints, RetryPolicy};
use crate::error::{ProbeError, TransportError};
use crate::outcome::Verdict;
use crate::session::{Reply, Transport};
use crate::validate::CandidateName;

/// Cookie carrying the anti-forgery token.
pub const TOKEN_COOKIE: &str = "csrftoken";

/// What one attempt against the check endpoint produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    /// A decisive answer.
    Decided(Verdict),
    /// A reply the probe cannot read; try again straight away.
    Unrecognized(String),
    /// The service is throttling (403/429); back off before retrying.
    Blocked(u16),
    /// No reply at all.
    Failed(TransportError),
}

/// Which backoff range to sleep for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// After throttling.
    Blocked,
    /// After a transport fault.
    Network,
}

/// Where a probe currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    /// About to make attempt number `attempt` (1-based).
    Attempting {
        /// Attempt about to be made.
        attempt: u32,
    },
    /// Waiting after attempt `attempt` before the next one.
    Backoff {
        /// Attempt that just failed.
        attempt: u32,
        /// Range to sleep for.
        kind: BackoffKind,
    },
    /// A decisive verdict was reached.
    Decided(Verdict),
    /// Gave up.
    Exhausted(ProbeError),
}

/// Retry bookkeeping for one handle.
#[derive(Debug, Clone)]
pub struct RetryMachine {
    state: ProbeState,
    max_attempts: u32,
    last: Option<ProbeError>,
}

impl RetryMachine {
    /// A machine allowing `max_attempts` attempts.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        let state = if max_attempts == 0 {
            ProbeState::Exhausted(ProbeError::ExhaustedRetries {
                what: "primary",
                attempts: 0,
                last: None,
            })
        } else {
            ProbeState::Attempting { attempt: 1 }
        };
        Self {
            state,
            max_attempts,
            last: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &ProbeState {
        &self.state
    }

    fn attempt(&self) -> u32 {
        match self.state {
            ProbeState::Attempting { attempt } | ProbeState::Backoff { attempt, .. } => attempt,
            _ => self.max_attempts,
        }
    }

    fn has_more(&self) -> bool {
        self.attempt() < self.max_attempts
    }

    fn exhausted(&mut self) -> ProbeState {
        ProbeState::Exhausted(ProbeError::ExhaustedRetries {
            what: "primary",
            attempts: self.max_attempts,
            last: self.last.take().map(Box::new),
        })
    }

    /// The token could not be fetched. Returns whether the attempt should
    /// go ahead without it; on the last attempt the probe gives up instead.
    pub fn token_missing(&mut self) -> bool {
        if !matches!(self.state, ProbeState::Attempting { .. }) {
            return false;
        }
        if self.has_more() {
            return true;
        }
        self.state = ProbeState::Exhausted(ProbeError::TokenUnavailable);
        false
    }

    /// Feed the result of the current attempt.
    pub fn record(&mut self, signal: Signal) -> &ProbeState {
        let ProbeState::Attempting { attempt } = self.state else {
            return &self.state;
        };
        let next = match signal {
            Signal::Decided(Verdict::Unknown(reason)) => {
                self.last = Some(reason);
                ProbeState::Attempting {
                    attempt: attempt + 1,
                }
            }
            Signal::Decided(verdict) => {
                self.state = ProbeState::Decided(verdict);
                return &self.state;
            }
            Signal::Unrecognized(reason) => {
                self.last = Some(ProbeError::Protocol(reason));
                ProbeState::Attempting {
                    attempt: attempt + 1,
                }
            }
            Signal::Blocked(status) => {
                self.last = Some(ProbeError::RateLimited(status));
                ProbeState::Backoff {
                    attempt,
                    kind: BackoffKind::Blocked,
                }
            }
            Signal::Failed(err) => {
                self.last = Some(err.into());
                ProbeState::Backoff {
                    attempt,
                    kind: BackoffKind::Network,
                }
            }
        };
        self.state = if self.has_more() {
            next
        } else {
            self.exhausted()
        };
        &self.state
    }

    /// Leave a backoff for the next attempt.
    pub fn resume(&mut self) {
        if let ProbeState::Backoff { attempt, .. } = self.state {
            self.state = ProbeState::Attempting {
                attempt: attempt + 1,
            };
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    available: Option<bool>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

/// Read a reply from the check endpoint.
pub fn classify_reply(reply: &Reply) -> Signal {
    match reply.status {
        200 => match serde_json::from_str::<CheckResponse>(&reply.body) {
            Ok(CheckResponse {
                available: Some(true),
                ..
            }) => Signal::Decided(Verdict::Available("available (api)".into())),
            Ok(CheckResponse { errors, .. })
                if errors.as_ref().and_then(|e| e.get("username")).is_some() =>
            {
                Signal::Decided(Verdict::Taken("taken (api error)".into()))
            }
            Ok(CheckResponse {
                available: Some(false),
                ..
            }) => Signal::Decided(Verdict::Taken("taken (api)".into())),
            Ok(_) => Signal::Unrecognized(format!("unclear api response: {}", snippet(&reply.body))),
            Err(_) => Signal::Unrecognized(format!("non-JSON api response: {}", snippet(&reply.body))),
        },
        400 => Signal::Decided(Verdict::Taken("taken (400 - invalid/unavailable)".into())),
        403 | 429 => Signal::Blocked(reply.status),
        status => Signal::Unrecognized(format!("unexpected api status {status}")),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(100).collect()
}

/// Asks the check endpoint, retrying through throttling and faults.
pub struct PrimaryProbe {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    retry: RetryPolicy,
    timeout: Duration,
}

impl fmt::Debug for PrimaryProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryProbe")
            .field("endpoints", &self.endpoints)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PrimaryProbe {
    /// A probe with the default retry policy.
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints, timeout: Duration) -> Self {
        Self {
            transport,
            endpoints,
            retry: RetryPolicy::default(),
            timeout,
        }
    }

    /// Use a different retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn fetch_token(&self) -> Result<Option<String>, TransportError> {
        let reply = self
            .transport
            .get(&self.endpoints.landing(), &[], self.timeout)?;
        Ok(reply.cookie(TOKEN_COOKIE).map(str::to_string))
    }

    fn submit(&self, name: &CandidateName, token: Option<&str>) -> Signal {
        let referer = self.endpoints.signup_referer();
        let cookie = token.map(|t| format!("{TOKEN_COOKIE}={t}"));
        let mut headers = vec![
            ("X-Requested-With", "XMLHttpRequest"),
            ("X-Instagram-AJAX", "1"),
            ("Referer", referer.as_str()),
            ("Origin", self.endpoints.base()),
            ("Accept", "*/*"),
            ("Sec-Fetch-Dest", "empty"),
            ("Sec-Fetch-Mode", "cors"),
            ("Sec-Fetch-Site", "same-origin"),
        ];
        if let (Some(token), Some(cookie)) = (token, cookie.as_deref()) {
            headers.push(("X-CSRFToken", token));
            headers.push(("Cookie", cookie));
        }

        match self.transport.post_form(
            &self.endpoints.check(),
            &headers,
            &[("username", name.as_str())],
            self.timeout,
        ) {
            Ok(reply) => classify_reply(&reply),
            Err(e) => Signal::Failed(e),
        }
    }

    fn backoff(&self, kind: BackoffKind) -> DelayRange {
        match kind {
            BackoffKind::Blocked => self.retry.blocked_backoff,
            BackoffKind::Network => self.retry.network_backoff,
        }
    }
}

impl Probe for PrimaryProbe {
    fn probe(&self, name: &CandidateName) -> Verdict {
        let mut machine = RetryMachine::new(self.retry.max_attempts);
        loop {
            match machine.state().clone() {
                ProbeState::Attempting { attempt } => {
                    let signal = match self.fetch_token() {
                        Ok(Some(token)) => {
                            debug!("token for {name}: {token}");
                            self.submit(name, Some(&token))
                        }
                        Ok(None) => {
                            warn!("token missing for {name}, attempt {attempt}");
                            if !machine.token_missing() {
                                continue;
                            }
                            self.submit(name, None)
                        }
                        Err(e) => Signal::Failed(e),
                    };
                    match &signal {
                        Signal::Decided(verdict) => {
                            debug!("api verdict for {name} (attempt {attempt}): {verdict:?}");
                        }
                        Signal::Unrecognized(reason) => warn!("{name}: {reason}"),
                        Signal::Blocked(status) => {
                            warn!("api blocked for {name}: HTTP {status}");
                        }
                        Signal::Failed(e) if e.is_proxy() => {
                            error!("proxy error for {name}: {e}");
                            self.transport.clear_proxy();
                        }
                        Signal::Failed(e) => {
                            error!("api error for {name} (attempt {attempt}): {e}");
                        }
                    }
                    machine.record(signal);
                }
                ProbeState::Backoff { kind, .. } => {
                    self.backoff(kind).pause();
                    machine.resume();
                }
                ProbeState::Decided(verdict) => return verdict,
                ProbeState::Exhausted(reason) => return Verdict::Unknown(reason),
            }
        }
    }
}

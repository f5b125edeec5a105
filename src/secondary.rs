//! Profile-page heuristic used when the structured endpoint gives no answer.
//!
//! The page markers drift whenever the service changes its markup, so they
//! live in a [`MarkerSet`] that callers can replace (for instance from a
//! JSON file) instead of in the matching code.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::check::Probe;
use crate::config::Endpoints;
use crate::error::{ProbeError, TransportError};
use crate::outcome::Verdict;
use crate::session::{Reply, Transport};
use crate::validate::CandidateName;

/// Replaced by the candidate handle inside any marker.
pub const NAME_PLACEHOLDER: &str = "{name}";

/// What an ambiguous profile page is taken to mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AmbiguityPolicy {
    /// Treat the page as free. Known source of false positives.
    #[default]
    AssumeAvailable,
    /// Treat the page as owned.
    AssumeTaken,
}

/// Substrings searched for in the lower-cased profile page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSet {
    /// Any of these suggests the profile exists.
    pub ownership: Vec<String>,
    /// Any of these means the page is a not-found page.
    pub not_found: Vec<String>,
    /// Groups of markers; a group whose markers are all present looks like
    /// an embedded user object.
    pub user_shapes: Vec<Vec<String>>,
}

impl Default for MarkerSet {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            ownership: owned(&[
                "\"username\":\"{name}\"",
                "\"id\":\"",
                "\"edge_owner_to_timeline_media\":{",
                "\"biography\":",
                "\"profile_pic_url\":",
            ]),
            not_found: owned(&[
                "sorry, this page isn't available",
                "the link you followed may be broken",
                "page not found",
                "\"graphql\":{\"user\":null}",
                "this page isn't available",
            ]),
            user_shapes: vec![
                owned(&["\"user\":{\"id\""]),
                owned(&["\"username\"", "\"full_name\""]),
            ],
        }
    }
}

impl MarkerSet {
    /// Parse a marker set from JSON. Missing lists fall back to the defaults.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Decide what a 200 profile page says about `name`.
    pub fn classify(&self, name: &str, body: &str, policy: AmbiguityPolicy) -> Verdict {
        let content = body.to_lowercase();
        let name = name.to_lowercase();
        let found = |marker: &String| content.contains(&marker.replace(NAME_PLACEHOLDER, &name));

        let owned = self.ownership.iter().any(found);
        let missing = self.not_found.iter().any(found);

        if owned && !missing {
            return Verdict::Taken("taken (profile)".into());
        }
        if missing {
            return Verdict::Available("available (not found page)".into());
        }
        if self
            .user_shapes
            .iter()
            .any(|group| !group.is_empty() && group.iter().all(found))
        {
            return Verdict::Taken("taken (embedded user object)".into());
        }
        match policy {
            AmbiguityPolicy::AssumeAvailable => Verdict::Available("available (unclear page)".into()),
            AmbiguityPolicy::AssumeTaken => Verdict::Taken("taken (unclear page)".into()),
        }
    }
}

/// Fetches the public profile page and reads it.
pub struct SecondaryProbe {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    markers: MarkerSet,
    policy: AmbiguityPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for SecondaryProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryProbe")
            .field("endpoints", &self.endpoints)
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SecondaryProbe {
    /// A probe with default markers and policy.
    pub fn new(transport: Arc<dyn Transport>, endpoints: Endpoints, timeout: Duration) -> Self {
        Self {
            transport,
            endpoints,
            markers: MarkerSet::default(),
            policy: AmbiguityPolicy::default(),
            timeout,
        }
    }

    /// Use a different marker set.
    #[must_use]
    pub fn with_markers(mut self, markers: MarkerSet) -> Self {
        self.markers = markers;
        self
    }

    /// Use a different ambiguity policy.
    #[must_use]
    pub fn with_policy(mut self, policy: AmbiguityPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl SecondaryProbe {
    // A proxy fault demotes the shared session, then the page is asked for
    // once more over the direct route.
    fn fetch(&self, url: &str) -> Result<Reply, TransportError> {
        match self.transport.get(url, &[], self.timeout) {
            Err(e) if e.is_proxy() => {
                warn!("proxy error on profile page: {e}");
                self.transport.clear_proxy();
                self.transport.get(url, &[], self.timeout)
            }
            other => other,
        }
    }
}

impl Probe for SecondaryProbe {
    fn probe(&self, name: &CandidateName) -> Verdict {
        let url = self.endpoints.profile(name.as_str());
        match self.fetch(&url) {
            Ok(reply) if reply.status == 404 => {
                Verdict::Available("available (404 profile)".into())
            }
            Ok(reply) if reply.status == 200 => {
                let verdict = self.markers.classify(name.as_str(), &reply.body, self.policy);
                info!("{name}: profile page says {verdict:?}");
                verdict
            }
            Ok(reply) => Verdict::Unknown(ProbeError::Protocol(format!(
                "HTTP {} (profile)",
                reply.status
            ))),
            Err(e) => {
                error!("network error for {name} on profile page: {e}");
                Verdict::Unknown(e.into())
            }
        }
    }
}

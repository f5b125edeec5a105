//! The shared HTTP identity every probe goes through.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use rand::seq::IndexedRandom;
use thiserror::Error;
use ureq::{Agent, Proxy};

use crate::config::{ConfigError, validate_proxy};
use crate::error::TransportError;

/// Browser identities; one is picked per session.
pub const USER_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
];

const BROWSER_HEADERS: [(&str, &str); 13] = [
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    ("DNT", "1"),
    ("Connection", "keep-alive"),
    ("Upgrade-Insecure-Requests", "1"),
    ("Sec-Fetch-Dest", "document"),
    ("Sec-Fetch-Mode", "navigate"),
    ("Sec-Fetch-Site", "none"),
    ("Sec-Fetch-User", "?1"),
    ("Cache-Control", "max-age=0"),
    (
        "Sec-Ch-Ua",
        "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
    ),
    ("Sec-Ch-Ua-Mobile", "?0"),
    ("Sec-Ch-Ua-Platform", "\"Windows\""),
];

/// A response as the probes see it. Every status is a reply, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reply {
    /// HTTP status code.
    pub status: u16,
    /// Decoded body text.
    pub body: String,
    /// `(name, value)` pairs from `Set-Cookie` headers.
    pub cookies: Vec<(String, String)>,
}

impl Reply {
    /// A reply with a status and body and no cookies.
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            cookies: Vec::new(),
        }
    }

    /// Attach a cookie.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.push((name.into(), value.into()));
        self
    }

    /// Value of the first cookie called `name`.
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// The I/O seam the probes are written against.
///
/// [`Session`] is the real implementation; tests substitute scripted ones.
pub trait Transport: Send + Sync {
    /// Issue a GET.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no response was received.
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Reply, TransportError>;

    /// Issue a form-encoded POST.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no response was received.
    fn post_form(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Reply, TransportError>;

    /// Stop routing through the upstream proxy. Idempotent.
    fn clear_proxy(&self);
}

/// Failure to set up a [`Session`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SessionError {
    /// Scheme not accepted.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The HTTP client rejected the proxy URL.
    #[error("cannot use proxy `{proxy}`: {source}")]
    Proxy {
        /// The proxy URL.
        proxy: String,
        /// Client error.
        #[source]
        source: Box<ureq::Error>,
    },
}

#[derive(Debug)]
struct Route {
    agent: Agent,
    proxy: Option<String>,
}

/// One browser-shaped client identity, shared by all workers of a run.
///
/// The proxy slot is the only mutable part and only ever goes from
/// `Some` to `None`.
#[derive(Debug)]
pub struct Session {
    route: RwLock<Route>,
    user_agent: &'static str,
}

impl Session {
    /// A direct session with a random user agent.
    #[must_use]
    pub fn direct() -> Self {
        Self {
            route: RwLock::new(Route {
                agent: build_agent(None),
                proxy: None,
            }),
            user_agent: pick_user_agent(),
        }
    }

    /// A session that routes through `proxy` when given.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] when the proxy URL is unusable.
    pub fn new(proxy: Option<&str>) -> Result<Self, SessionError> {
        let Some(url) = proxy else {
            info!("no proxy - using direct connection");
            return Ok(Self::direct());
        };
        validate_proxy(url)?;
        let parsed = Proxy::new(url).map_err(|e| SessionError::Proxy {
            proxy: url.to_string(),
            source: Box::new(e),
        })?;
        info!("proxy configured: {url}");
        Ok(Self {
            route: RwLock::new(Route {
                agent: build_agent(Some(parsed)),
                proxy: Some(url.to_string()),
            }),
            user_agent: pick_user_agent(),
        })
    }

    /// The user agent picked for this session.
    #[must_use]
    pub fn user_agent(&self) -> &'static str {
        self.user_agent
    }

    /// The proxy currently in use.
    #[must_use]
    pub fn proxy(&self) -> Option<String> {
        self.route
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .proxy
            .clone()
    }

    fn snapshot(&self) -> (Agent, bool) {
        let route = self.route.read().unwrap_or_else(PoisonError::into_inner);
        (route.agent.clone(), route.proxy.is_some())
    }

    fn headers<'a>(&'a self, extra: &[(&'a str, &'a str)]) -> Vec<(&'a str, &'a str)> {
        let mut headers: Vec<(&str, &str)> = BROWSER_HEADERS
            .iter()
            .copied()
            .filter(|(name, _)| !extra.iter().any(|(n, _)| n.eq_ignore_ascii_case(name)))
            .collect();
        headers.push(("User-Agent", self.user_agent));
        headers.extend_from_slice(extra);
        headers
    }
}

impl Transport for Session {
    fn get(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Reply, TransportError> {
        let (agent, proxied) = self.snapshot();
        let mut request = agent
            .get(url)
            .config()
            .timeout_global(Some(timeout))
            .build();
        for (name, value) in self.headers(headers) {
            request = request.header(name, value);
        }
        debug!("GET {url}");
        let response = request.call().map_err(|e| classify(e, proxied))?;
        read_reply(response, proxied)
    }

    fn post_form(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        form: &[(&str, &str)],
        timeout: Duration,
    ) -> Result<Reply, TransportError> {
        let (agent, proxied) = self.snapshot();
        let mut request = agent
            .post(url)
            .config()
            .timeout_global(Some(timeout))
            .build();
        for (name, value) in self.headers(headers) {
            request = request.header(name, value);
        }
        debug!("POST {url}");
        let response = request
            .send_form(form.iter().copied())
            .map_err(|e| classify(e, proxied))?;
        read_reply(response, proxied)
    }

    fn clear_proxy(&self) {
        let mut route = self.route.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(proxy) = route.proxy.take() {
            warn!("dropping proxy {proxy}, continuing with direct connection");
            route.agent = build_agent(None);
        }
    }
}

fn pick_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

fn build_agent(proxy: Option<Proxy>) -> Agent {
    let config = Agent::config_builder()
        .http_status_as_error(false)
        .proxy(proxy)
        .build();
    Agent::new_with_config(config)
}

fn read_reply(
    mut response: ureq::http::Response<ureq::Body>,
    proxied: bool,
) -> Result<Reply, TransportError> {
    let status = response.status().as_u16();
    let cookies = response
        .headers()
        .get_all("set-cookie")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(parse_set_cookie)
        .collect();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(|e| classify(e, proxied))?;
    Ok(Reply {
        status,
        body,
        cookies,
    })
}

/// `name=value` from a `Set-Cookie` header, attributes dropped.
fn parse_set_cookie(header: &str) -> Option<(String, String)> {
    let pair = header.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

// Connection-level faults while a proxy is configured are blamed on the proxy.
fn classify(err: ureq::Error, proxied: bool) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout(err.to_string()),
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::InvalidProxyUrl => {
            TransportError::Proxy(err.to_string())
        }
        ureq::Error::Io(_) | ureq::Error::ConnectionFailed | ureq::Error::HostNotFound
            if proxied =>
        {
            TransportError::Proxy(err.to_string())
        }
        other => TransportError::Network(other.to_string()),
    }
}

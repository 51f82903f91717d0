//! HTTP client for Steam's mobile web flow.
//!
//! Steam only serves the mobile enrollment flow to requests that look like
//! the official Android app: the user agent, referer, and session cookies
//! below are all load-bearing. The client keeps one cookie jar for its whole
//! lifetime, which matches the per-enrollment cookie discipline of the
//! protocol.

use std::sync::Arc;
use std::time::Duration;

use http::Method;
use http::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE, REFERER};
use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{Instrument, debug, info_span};
use url::Url;

use crate::error::{Error, Result};

/// Steam serves the mobile flow only to this browser signature.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 4.4.4; en-us; Nexus 4 Build/JOP40D) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/42.0.2307.2 Mobile Safari/537.36";

pub(crate) const COMMUNITY_BASE: &str = "https://steamcommunity.com";
pub(crate) const API_BASE: &str = "https://api.steampowered.com";

const ACCEPT_VALUE: &str =
    "application/json, text/javascript, text/html, application/xml, text/xml, */*";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded; charset=UTF-8";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Base URLs for the two Steam hosts the protocol talks to. Overridable so
/// tests can point the client at a local mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub community: String,
    pub api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            community: COMMUNITY_BASE.to_string(),
            api: API_BASE.to_string(),
        }
    }
}

/// Mobile-web HTTP client with the Steam session cookie jar.
#[derive(Debug, Clone)]
pub struct MobileClient {
    client: reqwest::Client,
}

impl MobileClient {
    /// Build a client with a fresh cookie jar seeded with the mobile session
    /// cookies Steam expects.
    ///
    /// # Errors
    /// Returns `Error::Transport` if the underlying client cannot be built.
    pub fn new() -> Result<Self> {
        let jar = Arc::new(Jar::default());
        if let Ok(community) = Url::parse(COMMUNITY_BASE) {
            jar.add_cookie_str("mobileClientVersion=0 (2.1.3)", &community);
            jar.add_cookie_str("mobileClient=android", &community);
            jar.add_cookie_str("Steam_Language=english", &community);
        }

        let mut headers = HeaderMap::new();
        headers.insert(REFERER, HeaderValue::from_static("https://steamcommunity.com/mobilelogin"));
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .user_agent(MOBILE_USER_AGENT)
            .default_headers(headers)
            .cookie_provider(jar)
            .gzip(true)
            .deflate(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// `GET` with the form pairs appended to the query string.
    ///
    /// # Errors
    /// Returns `Error::Transport` on any HTTP failure or non-2xx status.
    pub async fn get(&self, url: &str, form: &[(&str, &str)]) -> Result<String> {
        self.send(Method::GET, url, form).await
    }

    /// `POST` with a `application/x-www-form-urlencoded; charset=UTF-8` body.
    ///
    /// # Errors
    /// Returns `Error::Transport` on any HTTP failure or non-2xx status.
    pub async fn post(&self, url: &str, form: &[(&str, &str)]) -> Result<String> {
        self.send(Method::POST, url, form).await
    }

    async fn send(&self, method: Method, url: &str, form: &[(&str, &str)]) -> Result<String> {
        let span = info_span!("steam.request", http.method = %method, url = %url);
        async move {
            let request = if method == Method::GET {
                self.client.get(url).query(form)
            } else {
                let body = serde_urlencoded::to_string(form)
                    .map_err(|e| Error::Transport(format!("form encoding failed: {e}")))?;
                self.client
                    .request(method, url)
                    .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                    .body(body)
            };

            let response = request.send().await?.error_for_status()?;
            let body = response.text().await?;
            debug!(bytes = body.len(), "response received");
            Ok(body)
        }
        .instrument(span)
        .await
    }
}

/// Read a JSON field that Steam serves either as a string or a bare number.
pub(crate) fn json_string(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numeric JSON field, tolerating Steam's habit of quoting numbers.
pub(crate) fn json_i64(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

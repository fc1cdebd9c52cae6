//! Mutable authentication state: cookie jar, bearer token and display identity.

use crate::GarminError;
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use secrecy::SecretString;
use std::net::IpAddr;
use std::sync::Arc;

pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";
pub const MOBILE_USER_AGENT: &str = "GCM-iOS-5.7.2.1";

/// Prefix of SSO cookies that must be visible to every Garmin subdomain.
const SSO_COOKIE_PREFIX: &str = "GARMIN-SSO";

pub struct Session {
    jar: Arc<Jar>,
    http: reqwest::Client,
    bearer_token: Option<SecretString>,
    display_name: Option<String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("bearer", &self.bearer_token.is_some())
            .field("display_name", &self.display_name)
            .finish_non_exhaustive()
    }
}

fn build_http(jar: Arc<Jar>) -> Result<reqwest::Client, GarminError> {
    Ok(reqwest::Client::builder()
        .cookie_provider(jar)
        .gzip(true)
        .build()?)
}

impl Session {
    pub fn new() -> Result<Self, GarminError> {
        let jar = Arc::new(Jar::default());
        Ok(Self {
            http: build_http(jar.clone())?,
            jar,
            bearer_token: None,
            display_name: None,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Drop every cookie. The jar is replaced, so the client is rebuilt with it.
    pub fn clear_cookies(&mut self) -> Result<(), GarminError> {
        let jar = Arc::new(Jar::default());
        self.http = build_http(jar.clone())?;
        self.jar = jar;
        Ok(())
    }

    /// Store a cookie for `url`'s host, or for `domain` when given.
    ///
    /// IP hosts only accept host-only cookies, so `domain` is ignored for them.
    pub fn add_cookie(&self, url: &Url, name: &str, value: &str, domain: Option<&str>) {
        let mut cookie = format!("{name}={value}; Path=/");
        if let Some(domain) = domain.filter(|_| !is_ip_host(url)) {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        self.jar.add_cookie_str(&cookie, url);
    }

    /// `Cookie` header value the jar would send to `url`.
    pub fn cookie_header(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|v| v.to_str().ok().map(str::to_owned))
    }

    pub fn bearer_token(&self) -> Option<&SecretString> {
        self.bearer_token.as_ref()
    }

    pub fn set_bearer_token(&mut self, token: Option<SecretString>) {
        self.bearer_token = token;
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn set_display_name(&mut self, name: Option<String>) {
        self.display_name = name;
    }
}

fn is_ip_host(url: &Url) -> bool {
    url.host_str()
        .map(|h| h.trim_matches(|c| c == '[' || c == ']'))
        .is_some_and(|h| h.parse::<IpAddr>().is_ok())
}

/// Domain attribute for a manually supplied cookie on `host`.
///
/// `GARMIN-SSO*` cookies go to the parent domain (`connect.garmin.com` gives
/// `.garmin.com`); everything else stays on the host. `None` for IP hosts.
pub fn cookie_domain(host: &str, name: &str) -> Option<String> {
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }
    if name.starts_with(SSO_COOKIE_PREFIX) {
        let labels: Vec<&str> = host.split('.').collect();
        if labels.len() > 2 {
            return Some(format!(".{}", labels[1..].join(".")));
        }
    }
    Some(host.to_string())
}

//! Authentication strategy chain.
//!
//! Strategies are tried in [`AuthStrategy::ORDER`]; the first one that ends
//! with a resolved display identity wins. Only interactive login can fail the
//! whole chain.

use crate::GarminError;
use crate::bundle::{self, BundleCookie, looks_like_jwt};
use crate::http_client::ReqwestGarminClient;
use crate::observability::record_auth_strategy;
use crate::parsers::extract_display_name;
use crate::refresh::{TOKEN_ENV_KEY, persist_token};
use crate::session::{BROWSER_USER_AGENT, cookie_domain};
use regex::Regex;
use reqwest::Url;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

const SOCIAL_PROFILE_PATH: &str = "/userprofile-service/socialProfile";
const USER_SETTINGS_PATH: &str = "/userprofile-service/userprofile/user-settings";
const INVALID_CREDENTIALS_MARKER: &str = "Invalid user name or password";
const SESSION_COOKIE_NAMES: [&str; 2] = ["SESSION", "session"];

static TICKET_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"response_url\s*=\s*['"]([^'"]+ticket=([^'"]+))['"]"#).ok());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStrategy {
    CredentialBundle,
    SessionCookie,
    ScriptedRefresh,
    InteractiveLogin,
}

impl AuthStrategy {
    pub const ORDER: [AuthStrategy; 4] = [
        AuthStrategy::CredentialBundle,
        AuthStrategy::SessionCookie,
        AuthStrategy::ScriptedRefresh,
        AuthStrategy::InteractiveLogin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuthStrategy::CredentialBundle => "credential_bundle",
            AuthStrategy::SessionCookie => "session_cookie",
            AuthStrategy::ScriptedRefresh => "scripted_refresh",
            AuthStrategy::InteractiveLogin => "interactive_login",
        }
    }
}

/// Service-ticket URL embedded in an SSO login response, made absolute
/// against `connect_url`.
pub fn extract_ticket_url(body: &str, connect_url: &str) -> Option<String> {
    let caps = TICKET_PATTERN.as_ref()?.captures(body)?;
    let url = caps.get(1)?.as_str().replace("\\/", "/");
    if url.starts_with("http") {
        return Some(url);
    }
    let sep = if url.starts_with('/') { "" } else { "/" };
    Some(format!("{connect_url}{sep}{url}"))
}

/// Split a manual cookie string into `(name, value)` pairs. A string with no
/// `=` is a bare session value set under both conventional names.
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    if !raw.contains('=') {
        return SESSION_COOKIE_NAMES
            .iter()
            .map(|name| (name.to_string(), raw.trim().to_string()))
            .collect();
    }
    raw.split(';')
        .filter_map(|part| part.trim().split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .filter(|(name, _)| !name.is_empty())
        .collect()
}

impl ReqwestGarminClient {
    /// Run the strategy chain. Returns the display identity, which may be
    /// `None` after a successful interactive login whose profile lookup failed.
    pub async fn establish_session(&mut self) -> Result<Option<String>, GarminError> {
        for strategy in AuthStrategy::ORDER {
            let applied = match strategy {
                AuthStrategy::CredentialBundle => {
                    let Some(token) = self.config.garth_token.as_ref().map(|t| t.expose_secret().to_string())
                    else {
                        continue;
                    };
                    self.apply_credential_bundle(&token).await
                }
                AuthStrategy::SessionCookie => {
                    let Some(raw) = self.config.session_cookie.clone() else {
                        continue;
                    };
                    self.apply_session_cookie(&raw).await
                }
                AuthStrategy::ScriptedRefresh => {
                    if self.refresher.is_none() || self.session.display_name().is_some() {
                        continue;
                    }
                    info!("No valid profile found yet. Attempting token refresh via script...");
                    self.refresh_credentials().await
                }
                AuthStrategy::InteractiveLogin => {
                    if !self.config.is_configured() {
                        record_auth_strategy(strategy.as_str(), false);
                        return Err(GarminError::Config(
                            "interactive login requires GARMIN_USERNAME and GARMIN_PASSWORD".into(),
                        ));
                    }
                    let result = self.interactive_login().await;
                    record_auth_strategy(strategy.as_str(), result.is_ok());
                    result?;
                    return Ok(self.session.display_name().map(str::to_owned));
                }
            };
            record_auth_strategy(strategy.as_str(), applied);
            if applied {
                info!(strategy = strategy.as_str(), "Garmin session established");
                return Ok(self.session.display_name().map(str::to_owned));
            }
            debug!(strategy = strategy.as_str(), "authentication strategy did not succeed");
        }
        Err(GarminError::Config("no authentication strategy succeeded".into()))
    }

    /// Apply a bare JWT or base64 bundle; true only when identity resolves
    /// with it. On failure the bearer token is dropped again.
    pub async fn apply_credential_bundle(&mut self, input: &str) -> bool {
        let input = input.trim();
        if input.is_empty() {
            return false;
        }
        if looks_like_jwt(input) {
            info!("Applying direct OAuth2 JWT...");
            return self.adopt_bearer_token(input, &[]).await;
        }
        match bundle::decode(input) {
            Ok(Some(bundle)) => {
                info!(
                    cookies = bundle.cookies().len(),
                    "Applying credential bundle..."
                );
                self.adopt_bearer_token(bundle.access_token(), bundle.cookies()).await
            }
            Ok(None) => {
                warn!("Credential bundle has no usable access token");
                false
            }
            Err(e) => {
                warn!("Could not decode credential bundle: {}", e);
                false
            }
        }
    }

    async fn adopt_bearer_token(&mut self, token: &str, cookies: &[BundleCookie]) -> bool {
        self.session.set_bearer_token(Some(SecretString::new(token.into())));
        if let Err(e) = self.session.clear_cookies() {
            warn!("Could not reset cookie jar: {}", e);
        }
        for cookie in cookies {
            let host = cookie.domain.trim_start_matches('.');
            match Url::parse(&format!("https://{host}/")) {
                Ok(url) => self.session.add_cookie(&url, &cookie.name, &cookie.value, Some(&cookie.domain)),
                Err(e) => debug!("Skipping bundle cookie for {}: {}", cookie.domain, e),
            }
        }
        if self.resolve_identity().await {
            return true;
        }
        self.session.set_bearer_token(None);
        false
    }

    async fn apply_session_cookie(&mut self, raw: &str) -> bool {
        info!("Applying manual Garmin cookies...");
        let web = match Url::parse(&self.config.endpoints.connect_url) {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid Garmin web host: {}", e);
                return false;
            }
        };
        let host = web.host_str().unwrap_or_default().to_string();
        for (name, value) in parse_cookie_string(raw) {
            let domain = cookie_domain(&host, &name);
            self.session.add_cookie(&web, &name, &value, domain.as_deref());
            debug!("Applied cookie: {}", name);
        }
        self.resolve_identity().await
    }

    /// Look up the display identity. Uses single-attempt requests so a 401
    /// here never re-enters the refresh path.
    pub(crate) async fn resolve_identity(&mut self) -> bool {
        let body = match self.send_get(SOCIAL_PROFILE_PATH).await {
            Ok(body) => body,
            Err(e) => {
                info!("Social profile failed ({}), trying user-settings fallback...", e);
                match self.send_get(USER_SETTINGS_PATH).await {
                    Ok(body) => body,
                    Err(e) => {
                        warn!("Could not fetch display name: {}", e);
                        return false;
                    }
                }
            }
        };
        let root: Value = match serde_json::from_str(&body) {
            Ok(root) => root,
            Err(e) => {
                warn!("Could not parse profile response: {}", e);
                return false;
            }
        };
        match extract_display_name(&root) {
            Some(name) => {
                info!("Resolved Garmin display name: {}", name);
                self.session.set_display_name(Some(name));
                true
            }
            None => {
                warn!("Could not find display name in response.");
                false
            }
        }
    }

    /// Run the refresher (with credentials, then resuming), apply its output
    /// and persist it to the credential file.
    pub async fn refresh_credentials(&mut self) -> bool {
        let Some(refresher) = self.refresher.clone() else {
            warn!("Token refresh routine not configured.");
            return false;
        };

        let mut output = None;
        if let Some(credentials) = self.config.credentials() {
            info!("Refreshing Garmin token with credentials...");
            output = refresher.refresh(Some(&credentials)).await;
        }
        if output.is_none() {
            info!("Credentials-based refresh failed, trying to resume existing session...");
            output = refresher.refresh(None).await;
        }
        let Some(output) = output else {
            warn!("Token refresh produced no credential");
            return false;
        };
        if !self.apply_credential_bundle(&output).await {
            warn!("Refreshed credential could not be applied");
            return false;
        }

        match persist_token(&self.config.env_file, TOKEN_ENV_KEY, &output).await {
            Ok(true) => {}
            Ok(false) => debug!(
                path = %self.config.env_file.display(),
                "credential file missing, refreshed token not persisted"
            ),
            Err(e) => warn!("Could not update credential file: {}", e),
        }
        info!("Successfully applied refreshed token/bundle.");
        true
    }

    async fn interactive_login(&mut self) -> Result<(), GarminError> {
        let Some(credentials) = self.config.credentials() else {
            return Err(GarminError::Config("missing login credentials".into()));
        };
        info!("Logging in to Garmin Connect...");
        let endpoints = self.config.endpoints.clone();
        let http = self.session.http().clone();

        browse(http.get(endpoints.web_entry())).await?;

        let sso = endpoints.sso_signin_url()?;
        browse(http.get(sso.clone())).await?;

        let form = [
            ("username", credentials.username.as_str()),
            ("password", credentials.password.expose_secret()),
            ("embed", "true"),
            ("_eventId", "submit"),
        ];
        let body = browse(
            http.post(sso.clone())
                .header(REFERER, sso.as_str())
                .header(USER_AGENT, BROWSER_USER_AGENT)
                .form(&form),
        )
        .await?;

        let Some(ticket_url) = extract_ticket_url(&body, &endpoints.connect_url) else {
            if body.contains(INVALID_CREDENTIALS_MARKER) {
                return Err(GarminError::InvalidCredentials);
            }
            return Err(GarminError::LoginBlocked);
        };
        info!("Login successful, ticket URL received.");

        info!("Exchanging ticket for session...");
        browse(
            http.get(&ticket_url)
                .header(
                    ACCEPT,
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
                )
                .header(ACCEPT_LANGUAGE, "en-US,en;q=0.9")
                .header(REFERER, format!("{}/", endpoints.sso_url))
                .header(USER_AGENT, BROWSER_USER_AGENT),
        )
        .await?;
        browse(http.get(format!("{}/", endpoints.web_entry()))).await?;

        info!("Garmin session established.");
        if !self.resolve_identity().await {
            warn!("Continuing without display name; identity-scoped endpoints will be skipped");
        }
        Ok(())
    }
}

/// Send a browser-style request and return its body, failing on non-success.
async fn browse(request: reqwest::RequestBuilder) -> Result<String, GarminError> {
    let resp = request.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(GarminError::Status {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or_default().to_string(),
            url: resp.url().to_string(),
        });
    }
    Ok(resp.text().await?)
}

use crate::GarminError;
use crate::refresh::Credentials;
use crate::series::DEFAULT_BUCKET_MINUTES;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONNECT_URL: &str = "https://connect.garmin.com";
pub const DEFAULT_CONNECT_API_URL: &str = "https://connectapi.garmin.com";
pub const DEFAULT_SSO_URL: &str = "https://sso.garmin.com";
pub const DEFAULT_INTERPRETER: &str = "python3";
pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 120;

/// Hosts the client talks to. Overridable so tests can point everything at a mock server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// Web host serving the cookie-session API proxy.
    pub connect_url: String,
    /// Dedicated bearer-token API host.
    pub api_url: String,
    /// SSO host used by interactive login.
    pub sso_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            connect_url: DEFAULT_CONNECT_URL.into(),
            api_url: DEFAULT_CONNECT_API_URL.into(),
            sso_url: DEFAULT_SSO_URL.into(),
        }
    }
}

impl Endpoints {
    pub fn new(connect_url: &str, api_url: &str, sso_url: &str) -> Self {
        Self {
            connect_url: connect_url.trim_end_matches('/').to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            sso_url: sso_url.trim_end_matches('/').to_string(),
        }
    }

    /// Point all three hosts at the same base URL.
    pub fn single(base_url: &str) -> Self {
        Self::new(base_url, base_url, base_url)
    }

    /// Web entry point visited to seed cookies.
    pub fn web_entry(&self) -> String {
        format!("{}/modern", self.connect_url)
    }

    pub fn proxy_base(&self) -> String {
        format!("{}/modern/proxy", self.connect_url)
    }

    pub fn sso_signin(&self) -> String {
        format!("{}/sso/signin", self.sso_url)
    }

    pub fn api_host(&self) -> Option<String> {
        host_of(&self.api_url)
    }

    /// SSO sign-in URL carrying the embedded-widget parameters.
    pub fn sso_signin_url(&self) -> Result<reqwest::Url, GarminError> {
        let service = self.web_entry();
        let gauth_host = format!("{}/sso", self.sso_url);
        let params: [(&str, &str); 26] = [
            ("service", &service),
            ("webhost", &self.connect_url),
            ("source", &service),
            ("redirectAfterAccountLoginUrl", &service),
            ("redirectAfterAccountCreationUrl", &service),
            ("gauthHost", &gauth_host),
            ("locale", "en_US"),
            ("id", "gauth-widget"),
            ("clientId", "GarminConnect"),
            ("rememberMeShown", "true"),
            ("rememberMeChecked", "false"),
            ("createAccountShown", "true"),
            ("openCreateAccount", "false"),
            ("displayNameShown", "false"),
            ("consumeServiceTicket", "false"),
            ("initialFocus", "true"),
            ("embedWidget", "false"),
            ("generateExtraServiceTicket", "true"),
            ("generateTwoFactorTicket", "false"),
            ("generateNoServiceTicket", "false"),
            ("globalOptInShown", "true"),
            ("globalOptInChecked", "false"),
            ("mobile", "false"),
            ("connectLegalTerms", "true"),
            ("locationPromptShown", "true"),
            ("showPassword", "true"),
        ];
        reqwest::Url::parse_with_params(&self.sso_signin(), params)
            .map_err(|e| GarminError::Config(format!("invalid SSO url: {e}")))
    }
}

fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}

#[derive(Clone, Debug)]
pub struct Config {
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Manual cookie string, either `name=value; ...` pairs or a bare session value.
    pub session_cookie: Option<String>,
    /// Manual credential bundle (bare JWT or base64 JSON).
    pub garth_token: Option<SecretString>,
    /// External refresh script; the refresh bridge is disabled when unset.
    pub token_script: Option<PathBuf>,
    pub interpreter: String,
    pub refresh_timeout: Duration,
    /// Key=value file the refreshed bundle is persisted to.
    pub env_file: PathBuf,
    pub bucket_minutes: u32,
    pub endpoints: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            session_cookie: None,
            garth_token: None,
            token_script: None,
            interpreter: DEFAULT_INTERPRETER.into(),
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            env_file: PathBuf::from(DEFAULT_ENV_FILE),
            bucket_minutes: DEFAULT_BUCKET_MINUTES,
            endpoints: Endpoints::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, GarminError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Testable helper that reads configuration values using the provided
    /// function instead of the process environment.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, GarminError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut read = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let garth_token = read("GARMIN_GARTH_TOKEN")
            .map(|v| v.chars().filter(|c| !c.is_whitespace()).collect::<String>());
        let refresh_timeout = match read("GARMIN_REFRESH_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(parse_number("GARMIN_REFRESH_TIMEOUT_SECS", &v)?),
            None => Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
        };
        let bucket_minutes = match read("GARMIN_WELLNESS_BUCKET_MINUTES") {
            Some(v) => parse_number("GARMIN_WELLNESS_BUCKET_MINUTES", &v)?,
            None => DEFAULT_BUCKET_MINUTES,
        };
        if bucket_minutes == 0 {
            return Err(GarminError::Config(
                "GARMIN_WELLNESS_BUCKET_MINUTES must be positive".into(),
            ));
        }
        let endpoints = Endpoints::new(
            &read("GARMIN_CONNECT_URL").unwrap_or_else(|| DEFAULT_CONNECT_URL.into()),
            &read("GARMIN_CONNECT_API_URL").unwrap_or_else(|| DEFAULT_CONNECT_API_URL.into()),
            &read("GARMIN_SSO_URL").unwrap_or_else(|| DEFAULT_SSO_URL.into()),
        );

        Ok(Self {
            username: read("GARMIN_USERNAME").map(|v| v.trim().to_string()),
            password: read("GARMIN_PASSWORD").map(|v| SecretString::new(v.into())),
            session_cookie: read("GARMIN_SESSION_COOKIE").map(|v| v.trim().to_string()),
            garth_token: garth_token.map(|v| SecretString::new(v.into())),
            token_script: read("GARMIN_TOKEN_SCRIPT").map(PathBuf::from),
            interpreter: read("GARMIN_PYTHON_PATH").unwrap_or_else(|| DEFAULT_INTERPRETER.into()),
            refresh_timeout,
            env_file: read("GARMIN_ENV_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_FILE)),
            bucket_minutes,
            endpoints,
        })
    }

    /// True when both username and password are present.
    pub fn is_configured(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    pub fn credentials(&self) -> Option<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, GarminError> {
    value
        .trim()
        .parse()
        .map_err(|_| GarminError::Config(format!("{key} is not a valid number: {value}")))
}

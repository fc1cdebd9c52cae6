//! HTTP client implementation for Garmin Connect.
//!
//! This module provides a reqwest-based implementation of the [`GarminClient`](crate::GarminClient) trait.
//! Requests go either through the web host's cookie-session proxy or, once a
//! bearer token is known, to the dedicated API host.

use crate::config::Config;
use crate::observability::{record_reauth, record_request, record_request_failure};
use crate::parsers::{
    apply_daily_summary, apply_resting_hr_fallback, apply_sleep, apply_weight_range, extract_hrv,
    needs_resting_hr_fallback, parse_body_battery,
};
use crate::refresh::{CredentialRefresher, ScriptRefresher};
use crate::series::{SeriesKind, WellnessBuckets, parse_series};
use crate::session::{BROWSER_USER_AGENT, MOBILE_USER_AGENT, Session};
use crate::{DailyMetrics, GarminClient, GarminError, WellnessSample};
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use reqwest::header::{ACCEPT, USER_AGENT};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PROXY_PREFIX: &str = "/modern/proxy";
const DEFAULT_DI_BACKEND: &str = "connectapi.garmin.com";

/// Client for Garmin Connect using reqwest.
pub struct ReqwestGarminClient {
    pub(crate) config: Config,
    pub(crate) session: Session,
    pub(crate) refresher: Option<Arc<dyn CredentialRefresher>>,
}

impl std::fmt::Debug for ReqwestGarminClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReqwestGarminClient")
            .field("endpoints", &self.config.endpoints)
            .field("session", &self.session)
            .field("refresher", &self.refresher.is_some())
            .finish()
    }
}

impl ReqwestGarminClient {
    /// Create a new client. A [`ScriptRefresher`] is wired in when the
    /// configuration names a refresh script.
    pub fn new(config: Config) -> Result<Self, GarminError> {
        let refresher = ScriptRefresher::from_config(&config)
            .map(|r| Arc::new(r) as Arc<dyn CredentialRefresher>);
        Ok(Self {
            session: Session::new()?,
            config,
            refresher,
        })
    }

    /// Replace the credential refresher (e.g. with an in-process implementation).
    pub fn with_refresher(mut self, refresher: Arc<dyn CredentialRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn display_name(&self) -> Option<&str> {
        self.session.display_name()
    }

    pub fn set_display_name(&mut self, name: Option<String>) {
        self.session.set_display_name(name);
    }

    pub fn set_bearer_token(&mut self, token: Option<SecretString>) {
        self.session.set_bearer_token(token);
    }

    /// Absolute URL for `path` in the current authentication mode.
    pub fn resolve_url(&self, path: &str) -> String {
        let endpoints = &self.config.endpoints;
        let absolute = path.starts_with("http");
        if self.session.bearer_token().is_some() {
            let url = if absolute {
                path.to_string()
            } else {
                format!("{}{}", endpoints.api_url, with_leading_slash(path))
            };
            url.replace(&endpoints.proxy_base(), &endpoints.api_url)
        } else if absolute {
            path.to_string()
        } else {
            let path = with_leading_slash(path);
            let prefix = if path.starts_with(PROXY_PREFIX) { "" } else { PROXY_PREFIX };
            format!("{}{}{}", endpoints.connect_url, prefix, path)
        }
    }

    /// One authenticated GET, no re-authentication.
    pub(crate) async fn send_get(&self, path: &str) -> Result<String, GarminError> {
        let url = self.resolve_url(path);
        let http = self.session.http();
        let request = match self.session.bearer_token() {
            Some(token) => {
                record_request("bearer");
                http.get(&url)
                    .bearer_auth(token.expose_secret().trim())
                    .header(USER_AGENT, MOBILE_USER_AGENT)
                    .header(ACCEPT, "application/json")
            }
            None => {
                record_request("cookie");
                let backend = self
                    .config
                    .endpoints
                    .api_host()
                    .unwrap_or_else(|| DEFAULT_DI_BACKEND.to_string());
                http.get(&url)
                    .header(USER_AGENT, BROWSER_USER_AGENT)
                    .header("di-backend", backend)
                    .header("NK", "NT")
                    .header("X-Requested-With", "XMLHttpRequest")
                    .header(ACCEPT, "application/json, text/plain, */*")
            }
        };

        let resp = request
            .send()
            .await
            .inspect_err(|_| record_request_failure(None))?;
        let status = resp.status();
        if !status.is_success() {
            record_request_failure(Some(status.as_u16()));
            return Err(GarminError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                url,
            });
        }
        Ok(resp.text().await?)
    }

    /// GET `path`; a 401 triggers one credential refresh and one retry when
    /// `allow_retry` is set and a refresher is configured.
    pub async fn execute(&mut self, path: &str, allow_retry: bool) -> Result<String, GarminError> {
        let err = match self.send_get(path).await {
            Ok(body) => return Ok(body),
            Err(e) => e,
        };
        if allow_retry && err.is_unauthorized() && self.refresher.is_some() {
            info!("Request to {} failed with 401, attempting token refresh...", path);
            let refreshed = self.refresh_credentials().await;
            record_reauth(refreshed);
            if refreshed {
                return self
                    .send_get(path)
                    .await
                    .inspect_err(|e| error!("Error executing request to {}: {}", path, e));
            }
        }
        error!("Error executing request to {}: {}", path, err);
        Err(err)
    }

    /// [`execute`](Self::execute) with retry enabled, parsed as JSON. An empty
    /// body reads as `null`.
    pub async fn fetch_json(&mut self, path: &str) -> Result<Value, GarminError> {
        let body = self.execute(path, true).await?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_optional(&mut self, what: &str, date: NaiveDate, path: &str) -> Option<Value> {
        match self.fetch_json(path).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Could not fetch {} for {}: {}", what, date, e);
                None
            }
        }
    }

    /// Every daily metric for `date`. Each endpoint is fetched independently;
    /// a failing one leaves its fields unset.
    pub async fn get_metrics_for_date(&mut self, date: NaiveDate) -> DailyMetrics {
        let mut metrics = DailyMetrics::new(date);
        let identity = self.session.display_name().map(str::to_owned);

        let path = format!("/wellness-service/wellness/bodyBattery/reports/daily?startDate={date}&endDate={date}");
        if let Some(root) = self.fetch_optional("body battery", date, &path).await {
            let range = parse_body_battery(&root);
            metrics.body_battery_lowest = range.lowest;
            metrics.body_battery_highest = range.highest;
        }

        if let Some(id) = &identity {
            let path = format!("/usersummary-service/usersummary/daily/{id}?calendarDate={date}");
            if let Some(root) = self.fetch_optional("daily summary", date, &path).await {
                apply_daily_summary(&mut metrics, &root);
            }
        }

        let path = format!("/weight-service/weight/dateRange?startDate={date}&endDate={date}");
        if let Some(root) = self.fetch_optional("weight", date, &path).await {
            apply_weight_range(&mut metrics, &root);
        }

        if let Some(id) = &identity {
            let path = format!("/wellness-service/wellness/dailySleepData/{id}?date={date}&nonSleepBufferMinutes=60");
            if let Some(root) = self.fetch_optional("sleep", date, &path).await {
                apply_sleep(&mut metrics, &root);
            }

            if needs_resting_hr_fallback(&metrics) {
                let path =
                    format!("/userstats-service/wellness/daily/{id}?fromDate={date}&untilDate={date}&metricId=60");
                if let Some(root) = self.fetch_optional("resting HR stats", date, &path).await {
                    apply_resting_hr_fallback(&mut metrics, &root);
                }
            }
        }

        if let Some(root) = self.fetch_optional("HRV", date, &format!("/hrv-service/hrv/{date}")).await {
            metrics.hrv = extract_hrv(&root);
            if metrics.hrv.is_none() {
                debug!("No HRV value found for {}", date);
            }
        }

        metrics
    }

    /// Bucketed stress and heart-rate samples for `date`, in local time.
    pub async fn get_wellness_samples_for_date(&mut self, date: NaiveDate) -> Vec<WellnessSample> {
        let mut buckets = WellnessBuckets::new(self.config.bucket_minutes);

        let path = format!("/wellness-service/wellness/dailyStress/{date}");
        if let Some(root) = self.fetch_optional("stress series", date, &path).await {
            buckets.extend(SeriesKind::Stress, parse_series(&root, date, SeriesKind::Stress, &Local));
        }

        let identity = self.session.display_name().map(str::to_owned);
        match identity {
            Some(id) => {
                let path = format!("/wellness-service/wellness/dailyHeartRate/{id}?date={date}");
                if let Some(root) = self.fetch_optional("heart rate series", date, &path).await {
                    buckets.extend(
                        SeriesKind::HeartRate,
                        parse_series(&root, date, SeriesKind::HeartRate, &Local),
                    );
                }
            }
            None => debug!("Skipping heart rate series for {}: display name missing", date),
        }

        buckets.into_samples(Local).collect()
    }
}

fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

/// `days` dates ending today, newest first.
fn last_days(days: u32) -> impl Iterator<Item = NaiveDate> {
    let today = Local::now().date_naive();
    (0..days).filter_map(move |offset| today.checked_sub_days(chrono::Days::new(u64::from(offset))))
}

#[async_trait]
impl GarminClient for ReqwestGarminClient {
    async fn establish(&mut self) -> Result<Option<String>, GarminError> {
        self.establish_session().await
    }

    async fn get_metrics_for_last_days(&mut self, days: u32) -> Result<Vec<DailyMetrics>, GarminError> {
        let mut all = Vec::with_capacity(days as usize);
        for date in last_days(days) {
            info!("Fetching Garmin metrics for {}", date);
            all.push(self.get_metrics_for_date(date).await);
        }
        Ok(all)
    }

    async fn get_wellness_samples_for_last_days(&mut self, days: u32) -> Result<Vec<WellnessSample>, GarminError> {
        let mut all = Vec::new();
        for date in last_days(days) {
            let samples = self.get_wellness_samples_for_date(date).await;
            debug!("{} wellness samples for {}", samples.len(), date);
            all.extend(samples);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoints;

    fn client() -> ReqwestGarminClient {
        ReqwestGarminClient::new(Config::default()).unwrap()
    }

    #[test]
    fn cookie_mode_adds_proxy_prefix_once() {
        let c = client();
        assert_eq!(
            c.resolve_url("/hrv-service/hrv/2025-01-01"),
            "https://connect.garmin.com/modern/proxy/hrv-service/hrv/2025-01-01"
        );
        assert_eq!(
            c.resolve_url("/modern/proxy/userprofile-service/socialProfile"),
            "https://connect.garmin.com/modern/proxy/userprofile-service/socialProfile"
        );
        assert_eq!(
            c.resolve_url("userprofile-service/socialProfile"),
            "https://connect.garmin.com/modern/proxy/userprofile-service/socialProfile"
        );
    }

    #[test]
    fn bearer_mode_targets_api_host() {
        let mut c = client();
        c.set_bearer_token(Some(SecretString::new("tok".into())));
        assert_eq!(
            c.resolve_url("/hrv-service/hrv/2025-01-01"),
            "https://connectapi.garmin.com/hrv-service/hrv/2025-01-01"
        );
        assert_eq!(
            c.resolve_url("https://connect.garmin.com/modern/proxy/weight-service/x"),
            "https://connectapi.garmin.com/weight-service/x"
        );
    }

    #[test]
    fn single_host_rewrite_strips_proxy_prefix() {
        let config = Config {
            endpoints: Endpoints::single("http://127.0.0.1:9"),
            ..Config::default()
        };
        let mut c = ReqwestGarminClient::new(config).unwrap();
        c.set_bearer_token(Some(SecretString::new("tok".into())));
        assert_eq!(c.resolve_url("/modern/proxy/a"), "http://127.0.0.1:9/a");
    }

    #[test]
    fn last_days_counts_back_from_today() {
        let dates: Vec<_> = last_days(3).collect();
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], Local::now().date_naive());
        assert!(dates[0] > dates[1] && dates[1] > dates[2]);
        assert_eq!(last_days(0).count(), 0);
    }

    #[test]
    fn refresher_follows_configuration() {
        assert!(client().refresher.is_none());
        let config = Config {
            token_script: Some("refresh.py".into()),
            ..Config::default()
        };
        assert!(ReqwestGarminClient::new(config).unwrap().refresher.is_some());
    }
}

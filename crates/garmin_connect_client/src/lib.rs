//! Garmin Connect session management and wellness-data extraction.
//!
//! The [`GarminClient`] trait is the surface consumed by sync/export layers;
//! [`http_client::ReqwestGarminClient`] is the reqwest-based implementation.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use thiserror::Error;

pub mod auth;
pub mod bundle;
pub mod config;
pub mod http_client;
pub mod json_walk;
pub mod observability;
pub mod parsers;
pub mod refresh;
pub mod series;
pub mod session;
pub mod utils;

#[derive(Debug, Error)]
pub enum GarminError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request to {url} failed: {status} {reason}")]
    Status {
        status: u16,
        reason: String,
        url: String,
    },
    #[error("Garmin login failed: invalid user name or password")]
    InvalidCredentials,
    #[error("Garmin login failed: no service ticket in response (possible CAPTCHA or security block)")]
    LoginBlocked,
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

impl GarminError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            GarminError::Status { status, .. } => Some(*status),
            GarminError::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }
}

/// Daily wellness summary for one calendar date.
///
/// Every field is optional: `None` means Garmin had nothing for that date,
/// never zero.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DailyMetrics {
    pub date: NaiveDate,
    pub body_battery_highest: Option<i64>,
    pub body_battery_lowest: Option<i64>,
    pub weight_kg: Option<f64>,
    pub vo2_max: Option<f64>,
    pub resting_heart_rate: Option<i64>,
    pub hrv: Option<f64>,
    pub sleep_score: Option<i64>,
    pub sleep_duration_hours: Option<f64>,
}

impl DailyMetrics {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            body_battery_highest: None,
            body_battery_lowest: None,
            weight_kg: None,
            vo2_max: None,
            resting_heart_rate: None,
            hrv: None,
            sleep_score: None,
            sleep_duration_hours: None,
        }
    }
}

/// One averaged bucket of stress and heart-rate readings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WellnessSample {
    /// Local calendar date of the bucket start (may differ from the requested date).
    pub date: NaiveDate,
    /// Local start time of the bucket.
    pub timestamp: NaiveDateTime,
    pub stress: Option<u32>,
    pub heart_rate: Option<u32>,
}

#[async_trait]
pub trait GarminClient: Send {
    /// Authenticate, returning the resolved display identifier.
    ///
    /// `Ok(None)` means a session exists but the identity could not be
    /// resolved; identity-scoped endpoints are then skipped.
    async fn establish(&mut self) -> Result<Option<String>, GarminError>;

    /// Metrics for `days` calendar days ending today, newest first.
    async fn get_metrics_for_last_days(
        &mut self,
        days: u32,
    ) -> Result<Vec<DailyMetrics>, GarminError>;

    /// Bucketed stress/heart-rate samples for `days` calendar days ending today.
    async fn get_wellness_samples_for_last_days(
        &mut self,
        days: u32,
    ) -> Result<Vec<WellnessSample>, GarminError>;
}

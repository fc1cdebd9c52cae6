#![allow(dead_code)]

use async_trait::async_trait;
use garmin_connect_client::config::{Config, Endpoints};
use garmin_connect_client::refresh::{CredentialRefresher, Credentials};
use std::sync::Mutex;

pub const JWT: &str = "eyJhbGciOiJub25lIn0.eyJzdWIiOiJydW5uZXIifQ.sig";

/// Config with every host pointed at `base`.
pub fn config_for(base: &str) -> Config {
    Config {
        endpoints: Endpoints::single(base),
        env_file: std::env::temp_dir().join("garmin-connect-client-tests-missing.env"),
        ..Config::default()
    }
}

/// In-process refresher that records whether credentials were passed.
#[derive(Default)]
pub struct FakeRefresher {
    pub with_credentials: Option<String>,
    pub resume: Option<String>,
    pub calls: Mutex<Vec<bool>>,
}

impl FakeRefresher {
    pub fn resuming(output: &str) -> Self {
        Self {
            resume: Some(output.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialRefresher for FakeRefresher {
    async fn refresh(&self, credentials: Option<&Credentials>) -> Option<String> {
        self.calls.lock().unwrap().push(credentials.is_some());
        if credentials.is_some() {
            self.with_credentials.clone()
        } else {
            self.resume.clone()
        }
    }
}

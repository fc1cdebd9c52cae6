//! Token refresh bridge.
//!
//! Garmin has no public login API, so a fresh credential bundle is obtained
//! from an external routine. [`CredentialRefresher`] is the narrow seam the
//! session code depends on; [`ScriptRefresher`] runs `<interpreter> <script>`
//! and scrapes its output for marker lines.

use crate::config::Config;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

pub const BUNDLE_MARKER: &str = "Garth Bundle:";
pub const ACCESS_TOKEN_MARKER: &str = "OAuth2 Access Token:";
/// Key under which the bundle is persisted in the credential file.
pub const TOKEN_ENV_KEY: &str = "GARMIN_GARTH_TOKEN";

const CREDENTIAL_ENV_VARS: [&str; 4] = ["GARMIN_EMAIL", "EMAIL", "GARMIN_PASSWORD", "PASSWORD"];

#[derive(Clone, Debug)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Produce a raw credential bundle or bearer token.
    ///
    /// `None` credentials ask the routine to resume whatever session it has
    /// cached. Failures are reported as `None`.
    async fn refresh(&self, credentials: Option<&Credentials>) -> Option<String>;
}

/// Marker values seen in refresh output. A bundle beats a bare token.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RefreshOutput {
    pub bundle: Option<String>,
    pub access_token: Option<String>,
}

impl RefreshOutput {
    pub fn scan_line(&mut self, line: &str) {
        if let Some(value) = marker_value(line, BUNDLE_MARKER) {
            self.bundle = Some(value);
        } else if let Some(value) = marker_value(line, ACCESS_TOKEN_MARKER) {
            self.access_token = Some(value);
        }
    }

    pub fn scan<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut output = Self::default();
        for line in lines {
            output.scan_line(line);
        }
        output
    }

    pub fn into_result(self) -> Option<String> {
        self.bundle.or(self.access_token)
    }
}

fn marker_value(line: &str, marker: &str) -> Option<String> {
    let (_, rest) = line.split_once(marker)?;
    let value = rest.split(marker).next().unwrap_or(rest).trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Runs the configured refresh script as a subprocess.
#[derive(Clone, Debug)]
pub struct ScriptRefresher {
    interpreter: String,
    script: PathBuf,
    timeout: Duration,
}

impl ScriptRefresher {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout,
        }
    }

    /// Build from configuration; `None` when no refresh script is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .token_script
            .as_ref()
            .map(|script| Self::new(config.interpreter.clone(), script.clone(), config.refresh_timeout))
    }

    async fn run(&self, credentials: Option<&Credentials>) -> io::Result<RefreshOutput> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg(&self.script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        match credentials {
            Some(c) => {
                let password = c.password.expose_secret();
                cmd.env("GARMIN_EMAIL", &c.username)
                    .env("EMAIL", &c.username)
                    .env("GARMIN_PASSWORD", password)
                    .env("PASSWORD", password);
            }
            None => {
                for var in CREDENTIAL_ENV_VARS {
                    cmd.env_remove(var);
                }
            }
        }

        let mut child = cmd.spawn()?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let drain = async {
            let output = scan_merged(stdout, stderr).await;
            let status = child.wait().await;
            (output, status)
        };
        let outcome = tokio::time::timeout(self.timeout, drain).await;

        match outcome {
            Ok((output, status)) => {
                // Exit status is informational only; markers decide success.
                debug!(status = ?status, "refresh script finished");
                output
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "refresh script timed out, killing it"
                );
                if let Err(e) = child.kill().await {
                    warn!("could not kill refresh script: {}", e);
                }
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "refresh script timed out",
                ))
            }
        }
    }
}

#[async_trait]
impl CredentialRefresher for ScriptRefresher {
    async fn refresh(&self, credentials: Option<&Credentials>) -> Option<String> {
        match self.run(credentials).await {
            Ok(output) => output.into_result(),
            Err(e) => {
                error!(
                    script = %self.script.display(),
                    "error running token refresh script: {}", e
                );
                None
            }
        }
    }
}

/// Scan both output streams as one, in the order lines arrive.
async fn scan_merged<O, E>(stdout: Option<O>, stderr: Option<E>) -> io::Result<RefreshOutput>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
        return Err(io::Error::other("refresh script output was not captured"));
    };
    let mut out = BufReader::new(stdout).lines();
    let mut err = BufReader::new(stderr).lines();
    let (mut out_done, mut err_done) = (false, false);
    let mut output = RefreshOutput::default();
    loop {
        tokio::select! {
            line = out.next_line(), if !out_done => match line? {
                Some(line) => output.scan_line(&line),
                None => out_done = true,
            },
            line = err.next_line(), if !err_done => match line? {
                Some(line) => output.scan_line(&line),
                None => err_done = true,
            },
            else => break,
        }
    }
    Ok(output)
}

/// Write `key=value` into the credential file at `path`.
///
/// Returns `Ok(false)` without touching anything when the file does not exist.
pub async fn persist_token(path: &Path, key: &str, value: &str) -> io::Result<bool> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(false);
    }
    let contents = tokio::fs::read_to_string(path).await?;
    tokio::fs::write(path, rewrite_env_line(&contents, key, value)).await?;
    info!(path = %path.display(), "updated credential file with new {}", key);
    Ok(true)
}

/// Replace the `key=` line(s) of a key=value file, or append one.
/// Every other line, including its line ending, is kept byte-for-byte.
pub fn rewrite_env_line(contents: &str, key: &str, value: &str) -> String {
    let prefix = format!("{key}=");
    let mut found = false;
    let mut out = String::with_capacity(contents.len() + prefix.len() + value.len() + 1);
    for line in contents.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        if body.trim_start().starts_with(&prefix) {
            out.push_str(&prefix);
            out.push_str(value);
            out.push_str(ending);
            found = true;
        } else {
            out.push_str(line);
        }
    }
    if !found {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&prefix);
        out.push_str(value);
        out.push('\n');
    }
    out
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

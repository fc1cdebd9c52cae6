//! Credential bundle decoding.
//!
//! A bundle is what the refresh routine prints and what users paste into
//! `GARMIN_GARTH_TOKEN`: a bare JWT, a base64 JSON array
//! `[session-meta, {access_token, ..}, {domain: {cookie: {value, ..}}}]`, or a
//! base64 JSON object with `access_token`. Decoding is speculative; callers
//! treat every failure as "bundle unusable".

use base64::Engine as _;
use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use serde_json::Value;
use thiserror::Error;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

/// Prefix of a base64url-encoded JWT header (`{"`).
const JWT_PREFIX: &str = "eyJ";

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("bundle is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleCookie {
    /// Cookie domain, always with a leading dot.
    pub domain: String,
    pub name: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CredentialBundle {
    /// Array form: token plus cookies to replay.
    Session {
        access_token: String,
        cookies: Vec<BundleCookie>,
    },
    /// Object form: token only.
    Token { access_token: String },
}

impl CredentialBundle {
    pub fn access_token(&self) -> &str {
        match self {
            CredentialBundle::Session { access_token, .. } => access_token,
            CredentialBundle::Token { access_token } => access_token,
        }
    }

    pub fn cookies(&self) -> &[BundleCookie] {
        match self {
            CredentialBundle::Session { cookies, .. } => cookies,
            CredentialBundle::Token { .. } => &[],
        }
    }
}

pub fn looks_like_jwt(input: &str) -> bool {
    input.starts_with(JWT_PREFIX) && input.contains('.')
}

/// Decode a base64 bundle.
///
/// `Ok(None)` means the payload decoded but has no usable access token.
pub fn decode(input: &str) -> Result<Option<CredentialBundle>, BundleError> {
    let input = input.trim();
    let bytes = match STANDARD_LENIENT.decode(input) {
        Ok(bytes) => bytes,
        Err(_) => URL_SAFE_LENIENT.decode(input)?,
    };
    let root: Value = serde_json::from_slice(&bytes)?;
    Ok(from_json(&root))
}

fn from_json(root: &Value) -> Option<CredentialBundle> {
    match root {
        Value::Array(items) if items.len() >= 2 => {
            let access_token = access_token_of(&items[1])?;
            let cookies = items.get(2).map(cookies_of).unwrap_or_default();
            Some(CredentialBundle::Session {
                access_token,
                cookies,
            })
        }
        Value::Object(_) => access_token_of(root).map(|access_token| CredentialBundle::Token { access_token }),
        _ => None,
    }
}

fn access_token_of(node: &Value) -> Option<String> {
    scalar_text(node.get("access_token")?).map(|t| t.trim().to_string())
}

fn cookies_of(domains: &Value) -> Vec<BundleCookie> {
    let Some(domains) = domains.as_object() else {
        return Vec::new();
    };
    let mut cookies = Vec::new();
    for (domain, jar) in domains {
        let Some(jar) = jar.as_object() else {
            continue;
        };
        let domain = if domain.starts_with('.') {
            domain.clone()
        } else {
            format!(".{domain}")
        };
        for (name, data) in jar {
            if let Some(value) = data.get("value").and_then(scalar_text) {
                cookies.push(BundleCookie {
                    domain: domain.clone(),
                    name: name.clone(),
                    value,
                });
            }
        }
    }
    cookies
}

fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
    use serde_json::json;

    #[test]
    fn jwt_detection_requires_prefix_and_dot() {
        assert!(looks_like_jwt("eyJhbGciOiJIUzI1NiJ9.payload.sig"));
        assert!(!looks_like_jwt("eyJhbGciOiJIUzI1NiJ9"));
        assert!(!looks_like_jwt("abc.def"));
    }

    #[test]
    fn decodes_array_bundle_with_cookies() {
        let payload = json!([
            {"oauth_token": "legacy"},
            {"access_token": " tok-123 ", "expires_in": 3600},
            {"garmin.com": {"GARMIN-SSO": {"value": "sso"}, "broken": {"path": "/"}},
             ".connect.garmin.com": {"SESSIONID": {"value": "sid"}}}
        ]);
        let encoded = STANDARD.encode(payload.to_string());
        let bundle = decode(&encoded).unwrap().unwrap();
        assert_eq!(bundle.access_token(), "tok-123");
        let mut cookies = bundle.cookies().to_vec();
        cookies.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            cookies,
            vec![
                BundleCookie {
                    domain: ".garmin.com".into(),
                    name: "GARMIN-SSO".into(),
                    value: "sso".into()
                },
                BundleCookie {
                    domain: ".connect.garmin.com".into(),
                    name: "SESSIONID".into(),
                    value: "sid".into()
                },
            ]
        );
    }

    #[test]
    fn decodes_object_bundle_with_url_safe_alphabet() {
        // A run of `~` always produces a 6-bit group of 62 (`+` vs `-`).
        let payload = json!({"access_token": "tok", "note": "~~~~~~"});
        let encoded = URL_SAFE_NO_PAD.encode(payload.to_string());
        assert!(encoded.contains('-'));
        let bundle = decode(&encoded).unwrap().unwrap();
        assert_eq!(
            bundle,
            CredentialBundle::Token {
                access_token: "tok".into()
            }
        );
    }

    #[test]
    fn array_without_access_token_is_unusable() {
        let encoded = STANDARD.encode(json!([{}, {"refresh_token": "r"}]).to_string());
        assert_eq!(decode(&encoded).unwrap(), None);
        let short = STANDARD.encode(json!([{"access_token": "x"}]).to_string());
        assert_eq!(decode(&short).unwrap(), None);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(matches!(decode("not base64!"), Err(BundleError::Base64(_))));
        let not_json = STANDARD.encode("plain text");
        assert!(matches!(decode(&not_json), Err(BundleError::Json(_))));
    }
}

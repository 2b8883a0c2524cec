//! Handshake credential verification.
//!
//! Both headers are untrusted input; every failure collapses to a 401 with
//! no detail leaked to the caller. The reasons below exist for server-side
//! logging only.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::directory::{DeviceDirectory, DirectoryError};
use crate::infrastructure::crypto::device_uid;

#[derive(Debug, Error)]
pub enum AuthFailure {
    #[error("missing User-Agent or Authorization header")]
    MissingHeaders,

    #[error("malformed authorization header")]
    MalformedAuthorization,

    #[error("malformed user-agent header")]
    MalformedUserAgent,

    #[error("unknown device credentials")]
    UnknownDevice,

    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Credential pair extracted from the transport header. Used once during the
/// handshake, never persisted.
#[derive(Debug, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// The authenticated identity a session is built around.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Derived hash of the username; broker queue name and insert key
    pub uid: String,
    pub username: String,
    pub device_type: String,
}

impl DeviceIdentity {
    pub fn new(username: String, device_type: String) -> Self {
        let uid = device_uid(&username);
        Self {
            uid,
            username,
            device_type,
        }
    }
}

/// Decode a scheme-prefixed base64 `username:password` header value.
///
/// The decoded text must split into exactly two non-empty parts.
pub fn parse_basic_auth(header: &str) -> Option<BasicCredentials> {
    let encoded = header.split(' ').next_back()?;
    let decoded = BASE64.decode(encoded).ok()?;
    let text = String::from_utf8(decoded).ok()?;

    let parts: Vec<&str> = text.split(':').collect();
    match parts.as_slice() {
        [username, password] if !username.is_empty() && !password.is_empty() => {
            Some(BasicCredentials {
                username: (*username).to_string(),
                password: (*password).to_string(),
            })
        }
        _ => None,
    }
}

/// Extract the device type: the leading slash-delimited segment of the
/// User-Agent value. Empty means the header is unusable.
pub fn parse_device_type(header: &str) -> Option<String> {
    let leading = header.split('/').next()?;
    if leading.is_empty() {
        None
    } else {
        Some(leading.to_string())
    }
}

/// Validates upgrade-request headers against the device directory.
pub struct CredentialVerifier {
    directory: Arc<dyn DeviceDirectory>,
}

impl CredentialVerifier {
    pub fn new(directory: Arc<dyn DeviceDirectory>) -> Self {
        Self { directory }
    }

    pub async fn verify(&self, headers: &HeaderMap) -> Result<DeviceIdentity, AuthFailure> {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthFailure::MissingHeaders)?;
        let authorization = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthFailure::MissingHeaders)?;

        let credentials =
            parse_basic_auth(authorization).ok_or(AuthFailure::MalformedAuthorization)?;
        let device_type = parse_device_type(user_agent).ok_or(AuthFailure::MalformedUserAgent)?;

        let record = self
            .directory
            .lookup(&credentials.username, &credentials.password)
            .await?
            .ok_or(AuthFailure::UnknownDevice)?;

        Ok(DeviceIdentity::new(record.username, device_type))
    }
}

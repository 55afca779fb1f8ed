//! Authentication utilities for the broker API

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::common::errors::{CoordinatorError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Session tokens issued by the broker on login
///
/// Both tokens must accompany every authenticated request and expire
/// together; a 401 on any call means the session must be recreated.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    /// Client session token
    pub cst: String,
    /// Account security token
    pub security_token: String,
}

/// Generate HMAC-SHA256 signature for API requests
///
/// # Arguments
/// * `secret` - account password / API secret
/// * `timestamp` - Unix timestamp in seconds
/// * `method` - HTTP method (GET, POST, etc.)
/// * `request_path` - API endpoint path
/// * `body` - Request body (empty string for GET requests)
pub fn sign_request(
    secret: &str,
    timestamp: i64,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String> {
    // Message to sign: timestamp + method + path + body
    let message = format!(
        "{}{}{}{}",
        timestamp,
        method.to_uppercase(),
        request_path,
        body
    );

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| CoordinatorError::Authentication(format!("Failed to create HMAC: {}", e)))?;
    mac.update(message.as_bytes());
    let result = mac.finalize();

    Ok(BASE64.encode(result.into_bytes()))
}

/// Headers attached to an authenticated broker request
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub api_key: String,
    pub cst: String,
    pub security_token: String,
    pub signature: String,
    pub timestamp: i64,
}

impl AuthHeaders {
    /// Build headers for one request from the credential and live session
    pub fn build(
        api_key: &str,
        secret: &str,
        tokens: &SessionTokens,
        method: &str,
        request_path: &str,
        body: &str,
    ) -> Result<Self> {
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign_request(secret, timestamp, method, request_path, body)?;

        Ok(Self {
            api_key: api_key.to_string(),
            cst: tokens.cst.clone(),
            security_token: tokens.security_token.clone(),
            signature,
            timestamp,
        })
    }

    /// Add authentication headers to a reqwest RequestBuilder
    pub fn apply_to_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("X-CAP-API-KEY", &self.api_key)
            .header("CST", &self.cst)
            .header("X-SECURITY-TOKEN", &self.security_token)
            .header("X-SIGNATURE", &self.signature)
            .header("X-TIMESTAMP", self.timestamp.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_request_format() {
        let result = sign_request("test_secret_key", 1234567890, "GET", "/test/path", "");

        assert!(result.is_ok());
        let signature = result.unwrap();

        // Verify it's valid base64
        assert!(BASE64.decode(&signature).is_ok());
    }

    #[test]
    fn test_sign_request_is_deterministic() {
        let a = sign_request("secret", 1700000000, "POST", "/positions", "{}").unwrap();
        let b = sign_request("secret", 1700000000, "POST", "/positions", "{}").unwrap();
        assert_eq!(a, b);

        let different_body = sign_request("secret", 1700000000, "POST", "/positions", "{\"a\":1}")
            .unwrap();
        assert_ne!(a, different_body);
    }

    #[test]
    fn test_build_auth_headers() {
        let tokens = SessionTokens {
            cst: "cst_token".to_string(),
            security_token: "sec_token".to_string(),
        };
        let headers =
            AuthHeaders::build("test_api_key", "secret", &tokens, "GET", "/markets", "").unwrap();

        assert_eq!(headers.api_key, "test_api_key");
        assert_eq!(headers.cst, "cst_token");
        assert_eq!(headers.security_token, "sec_token");
        assert!(!headers.signature.is_empty());
    }
}

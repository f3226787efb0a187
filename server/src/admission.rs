//! One-shot admission check gating websocket upgrades
//!
//! The gate is consulted exactly once per connection attempt, before the
//! transport upgrade. A failure is terminal for that attempt: no retry,
//! no actor, no registration. The verification service itself is an
//! external collaborator; we only speak its form-POST/JSON contract.

use log::warn;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_VERIFY_ENDPOINT: &str =
    "https://challenges.cloudflare.com/turnstile/v0/siteverify";

const VERIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("missing admission token")]
    MissingToken,
    #[error("verification rejected: {0:?}")]
    Rejected(Vec<String>),
    #[error("verification request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Wire shape of the verification service's JSON reply.
#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Admission capability handed to the upgrade handler.
pub enum Gate {
    /// No secret configured: every connection is admitted. Used by tests
    /// and local development.
    Open,
    /// Token verification against a Turnstile-style endpoint.
    Turnstile {
        secret: String,
        endpoint: String,
        client: reqwest::Client,
    },
}

impl Gate {
    /// Builds the gate from the configured secret, if any.
    pub fn from_secret(secret: Option<String>) -> Self {
        match secret {
            Some(secret) => Gate::Turnstile {
                secret,
                endpoint: DEFAULT_VERIFY_ENDPOINT.to_string(),
                client: reqwest::Client::new(),
            },
            None => Gate::Open,
        }
    }

    /// Verifies one connection attempt. `token` comes from the upgrade
    /// request's query string; `remote_addr` identifies the caller for
    /// the verification service.
    pub async fn verify(
        &self,
        token: Option<&str>,
        remote_addr: &str,
    ) -> Result<(), AdmissionError> {
        let Gate::Turnstile {
            secret,
            endpoint,
            client,
        } = self
        else {
            return Ok(());
        };

        let token = token.ok_or(AdmissionError::MissingToken)?;

        let mut form = vec![("secret", secret.as_str()), ("response", token)];
        if !remote_addr.is_empty() {
            form.push(("remoteip", remote_addr));
        }

        let response: VerifyResponse = client
            .post(endpoint)
            .form(&form)
            .timeout(VERIFY_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        if response.success {
            Ok(())
        } else {
            warn!(
                "admission rejected for {}: {:?}",
                remote_addr, response.error_codes
            );
            Err(AdmissionError::Rejected(response.error_codes))
        }
    }
}

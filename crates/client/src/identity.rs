//! Phone verification through the Identity Toolkit REST API.
//!
//! `accounts:sendVerificationCode` exchanges a phone number and the widget's
//! challenge token for an opaque `sessionInfo`, which becomes the ticket.
//! `accounts:signInWithPhoneNumber` trades that ticket and the code for an ID
//! token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use nearbux_core::config::VerificationConfig;
use nearbux_core::domain::{OtpCode, PhoneNumber};
use nearbux_core::errors::{ExecutionError, NetworkError, ProviderError};
use nearbux_core::verification::{
    IdentityToken, VerificationProvider, VerificationTicket, WidgetHandle,
};

pub struct IdentityToolkitProvider {
    client: Client,
    base_url: String,
    api_key: SecretString,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeRequest<'a> {
    phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    recaptcha_token: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendCodeResponse {
    session_info: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    session_info: &'a str,
    code: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl IdentityToolkitProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, api_key, timeout })
    }

    /// Builds the provider when the configuration selects it and carries a key.
    pub fn from_config(
        config: &VerificationConfig,
        timeout: Duration,
    ) -> Result<Option<Self>, reqwest::Error> {
        match &config.api_key {
            Some(api_key) => Self::new(config.base_url.clone(), api_key.clone(), timeout).map(Some),
            None => Ok(None),
        }
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, ExecutionError>
    where
        B: Serialize + Sync,
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}/v1/accounts:{method}", self.base_url);
        let response = self
            .client
            .post(url)
            .query(&[("key", self.api_key.expose_secret())])
            .json(body)
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            let raw = response.text().await.unwrap_or_default();
            let code = serde_json::from_str::<ErrorEnvelope>(&raw)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("HTTP_{}", status.as_u16()));
            warn!(
                event_name = "verification.provider.rejected",
                method,
                status = status.as_u16(),
                code = %code,
                "verification provider rejected call"
            );
            return Err(provider_error(&code).into());
        }

        response
            .json::<T>()
            .await
            .map_err(|error| ProviderError::with_code("INVALID_RESPONSE", error.to_string()).into())
    }

    fn transport_error(&self, error: reqwest::Error) -> ExecutionError {
        if error.is_timeout() {
            let after_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
            return ExecutionError::Timeout { after_ms };
        }
        NetworkError(error.to_string()).into()
    }
}

/// Maps provider error codes to the message shown inline on the step.
fn provider_error(raw: &str) -> ProviderError {
    // Codes may carry a detail suffix: `INVALID_PHONE_NUMBER : TOO_SHORT`.
    let code = raw.split(':').next().unwrap_or(raw).trim().to_string();
    let message = match code.as_str() {
        "INVALID_CODE" => "invalid code",
        "SESSION_EXPIRED" | "CODE_EXPIRED" => "code expired, request a new one",
        "INVALID_SESSION_INFO" | "MISSING_SESSION_INFO" => "verification session is invalid",
        "INVALID_PHONE_NUMBER" | "MISSING_PHONE_NUMBER" => "invalid phone number",
        "TOO_MANY_ATTEMPTS_TRY_LATER" | "QUOTA_EXCEEDED" => "too many attempts, try again later",
        "CAPTCHA_CHECK_FAILED" | "MISSING_RECAPTCHA_TOKEN" => "reCAPTCHA check failed",
        _ => "verification failed",
    };
    ProviderError::with_code(code, message)
}

#[async_trait]
impl VerificationProvider for IdentityToolkitProvider {
    async fn request_code(
        &self,
        phone: &PhoneNumber,
        widget: &WidgetHandle,
    ) -> Result<VerificationTicket, ExecutionError> {
        let request = SendCodeRequest {
            phone_number: phone.formatted(),
            recaptcha_token: widget.challenge_token.as_deref(),
        };
        let response: SendCodeResponse = self.call("sendVerificationCode", &request).await?;
        info!(
            event_name = "verification.code.sent",
            attempt = widget.attempt,
            "verification code sent"
        );
        Ok(VerificationTicket(response.session_info))
    }

    async fn confirm_code(
        &self,
        ticket: &VerificationTicket,
        code: &OtpCode,
    ) -> Result<IdentityToken, ExecutionError> {
        let request = SignInRequest { session_info: &ticket.0, code: code.as_str() };
        let response: SignInResponse = self.call("signInWithPhoneNumber", &request).await?;
        Ok(IdentityToken::new(response.id_token))
    }
}

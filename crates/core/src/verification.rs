//! Phone verification collaborator.
//!
//! The provider is an opaque asynchronous capability with two calls: request a
//! one-time code for a phone number, then confirm that code against the ticket
//! the request returned. Providers that gate code requests behind a client
//! challenge widget receive a [`WidgetHandle`]; the widget itself is a scoped
//! resource held through a [`WidgetLease`] and cleared on every exit path.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{OtpCode, PhoneNumber};
use crate::errors::{ExecutionError, ProviderError};

/// How long a console-issued code stays confirmable.
pub const CODE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationTicket(pub String);

/// Proof of a confirmed phone number. Sent to the backend as a bearer token.
#[derive(Clone)]
pub struct IdentityToken(SecretString);

impl IdentityToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl PartialEq for IdentityToken {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for IdentityToken {}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityToken(<redacted>)")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WidgetHandle {
    pub container_id: String,
    pub attempt: u32,
    pub challenge_token: Option<String>,
}

impl WidgetHandle {
    /// Attaches the token a client-side challenge produced for this attempt.
    /// A blank token leaves the handle unchanged.
    pub fn with_challenge(mut self, token: Option<&str>) -> Self {
        if let Some(token) = token.map(str::trim).filter(|token| !token.is_empty()) {
            self.challenge_token = Some(token.to_string());
        }
        self
    }
}

pub trait VerificationWidget: Send + Sync {
    fn handle(&self) -> WidgetHandle;
    fn clear(&mut self);
}

pub trait WidgetFactory: Send + Sync {
    fn create(
        &self,
        container_id: &str,
        attempt: u32,
    ) -> Result<Box<dyn VerificationWidget>, ProviderError>;
}

/// Owns one widget for one flow attempt. Dropping the lease clears the widget.
pub struct WidgetLease {
    widget: Option<Box<dyn VerificationWidget>>,
}

impl WidgetLease {
    pub fn acquire(
        factory: &dyn WidgetFactory,
        container_id: &str,
        attempt: u32,
    ) -> Result<Self, ProviderError> {
        let widget = factory.create(container_id, attempt)?;
        debug!(
            event_name = "verification.widget.acquired",
            container_id,
            attempt,
            "verification widget acquired"
        );
        Ok(Self { widget: Some(widget) })
    }

    pub fn handle(&self) -> Option<WidgetHandle> {
        self.widget.as_ref().map(|widget| widget.handle())
    }
}

impl Drop for WidgetLease {
    fn drop(&mut self) {
        if let Some(mut widget) = self.widget.take() {
            let handle = widget.handle();
            widget.clear();
            debug!(
                event_name = "verification.widget.released",
                container_id = %handle.container_id,
                attempt = handle.attempt,
                "verification widget released"
            );
        }
    }
}

/// Rejections carry a [`ProviderError`]; transport failures surface as
/// network or timeout errors like any other collaborator.
#[async_trait]
pub trait VerificationProvider: Send + Sync {
    async fn request_code(
        &self,
        phone: &PhoneNumber,
        widget: &WidgetHandle,
    ) -> Result<VerificationTicket, ExecutionError>;

    async fn confirm_code(
        &self,
        ticket: &VerificationTicket,
        code: &OtpCode,
    ) -> Result<IdentityToken, ExecutionError>;
}

/// Widget factory for providers that need no client challenge.
#[derive(Clone, Debug, Default)]
pub struct HeadlessWidgetFactory;

struct HeadlessWidget {
    handle: WidgetHandle,
}

impl VerificationWidget for HeadlessWidget {
    fn handle(&self) -> WidgetHandle {
        self.handle.clone()
    }

    fn clear(&mut self) {}
}

impl WidgetFactory for HeadlessWidgetFactory {
    fn create(
        &self,
        container_id: &str,
        attempt: u32,
    ) -> Result<Box<dyn VerificationWidget>, ProviderError> {
        Ok(Box::new(HeadlessWidget {
            handle: WidgetHandle {
                container_id: container_id.to_string(),
                attempt,
                challenge_token: None,
            },
        }))
    }
}

#[derive(Clone, Debug)]
struct PendingCode {
    phone: PhoneNumber,
    code: String,
    issued_at: Instant,
}

/// Development provider: issues random codes and writes them to the log.
///
/// Holds at most one outstanding code per phone number. A new request
/// replaces the earlier ticket, and codes older than the TTL are dropped.
pub struct ConsoleVerificationProvider {
    pending: Mutex<HashMap<String, PendingCode>>,
    code_ttl: Duration,
}

impl Default for ConsoleVerificationProvider {
    fn default() -> Self {
        Self::with_code_ttl(CODE_TTL)
    }
}

impl ConsoleVerificationProvider {
    pub fn with_code_ttl(code_ttl: Duration) -> Self {
        Self { pending: Mutex::new(HashMap::new()), code_ttl }
    }

    /// Code issued for a ticket that has not been confirmed yet.
    pub fn issued_code(&self, ticket: &VerificationTicket) -> Option<String> {
        self.lock().get(&ticket.0).map(|entry| entry.code.clone())
    }

    /// Outstanding tickets, expired ones included until the next request.
    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingCode>> {
        match self.pending.lock() {
            Ok(pending) => pending,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl VerificationProvider for ConsoleVerificationProvider {
    async fn request_code(
        &self,
        phone: &PhoneNumber,
        widget: &WidgetHandle,
    ) -> Result<VerificationTicket, ExecutionError> {
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let ticket = VerificationTicket(Uuid::new_v4().to_string());

        info!(
            event_name = "verification.console.code_issued",
            phone = %phone,
            container_id = %widget.container_id,
            code = %code,
            "verification code issued"
        );

        let now = Instant::now();
        let mut pending = self.lock();
        pending.retain(|_, entry| {
            entry.phone != *phone && now.duration_since(entry.issued_at) < self.code_ttl
        });
        pending.insert(
            ticket.0.clone(),
            PendingCode { phone: phone.clone(), code, issued_at: now },
        );
        Ok(ticket)
    }

    async fn confirm_code(
        &self,
        ticket: &VerificationTicket,
        code: &OtpCode,
    ) -> Result<IdentityToken, ExecutionError> {
        let expired = || ProviderError::with_code("SESSION_EXPIRED", "verification code expired");
        let mut pending = self.lock();

        let Some(entry) = pending.get(&ticket.0) else {
            return Err(expired().into());
        };
        if entry.issued_at.elapsed() >= self.code_ttl {
            pending.remove(&ticket.0);
            return Err(expired().into());
        }
        if entry.code != code.as_str() {
            return Err(ProviderError::with_code("INVALID_CODE", "invalid code").into());
        }

        let phone = entry.phone.clone();
        pending.remove(&ticket.0);
        Ok(IdentityToken::new(format!("console.{}.{}", phone.national(), Uuid::new_v4())))
    }
}

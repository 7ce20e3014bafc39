//! Persistence backend collaborator.
//!
//! Flat request/response operations against the REST backend. Request bodies
//! are typed records serialized with the backend's camelCase field names; the
//! backend answers non-2xx with a `{message}` body that surfaces verbatim.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    AccountDetails, Audience, ImageAttachment, Location, Password, PhoneNumber, PromotionDraft,
    PromotionId, ShopContext, ShopId, Username,
};
use crate::errors::{ExecutionError, ServerError};
use crate::verification::IdentityToken;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub name: String,
    pub username: String,
    pub password: String,
    pub phone_number: String,
}

impl RegistrationRequest {
    pub fn new(account: &AccountDetails, phone: &PhoneNumber) -> Self {
        Self {
            name: account.name.as_str().to_string(),
            username: account.username.as_str().to_string(),
            password: account.password.expose().to_string(),
            phone_number: phone.formatted(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub phone_number: String,
    pub area: String,
    pub pin_code: String,
}

impl LocationUpdate {
    pub fn new(phone: &PhoneNumber, location: &Location) -> Self {
        Self {
            phone_number: phone.formatted(),
            area: location.area.as_str().to_string(),
            pin_code: location.pin_code.as_str().to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordUpdate {
    pub phone_number: String,
    pub new_password: String,
}

impl PasswordUpdate {
    pub fn new(phone: &PhoneNumber, password: &Password) -> Self {
        Self { phone_number: phone.formatted(), new_password: password.expose().to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionRequest {
    pub title: String,
    pub message: String,
    pub shop_id: i64,
    pub shop_keeper_id: i64,
}

impl PromotionRequest {
    pub fn new(shop: &ShopContext, draft: &PromotionDraft) -> Self {
        Self {
            title: draft.title.clone(),
            message: draft.message.clone(),
            shop_id: shop.shop_id.0,
            shop_keeper_id: shop.owner_id.0,
        }
    }
}

/// Username and phone pair checked before a signup form asks for a code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    pub username: String,
    pub phone_number: String,
}

impl AvailabilityQuery {
    pub fn new(username: &Username, phone: &PhoneNumber) -> Self {
        Self { username: username.as_str().to_string(), phone_number: phone.formatted() }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    #[serde(default)]
    pub username_exists: bool,
    #[serde(default)]
    pub phone_exists: bool,
}

impl Availability {
    pub fn is_available(&self) -> bool {
        !self.username_exists && !self.phone_exists
    }

    /// Inline message for the first conflict, matching the signup form wording.
    pub fn conflict_message(&self) -> Option<&'static str> {
        if self.username_exists {
            Some("username already taken")
        } else if self.phone_exists {
            Some("phone number already registered")
        } else {
            None
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionStatus {
    pub active: bool,
}

#[async_trait]
pub trait BackendGateway: Send + Sync {
    async fn check_availability(
        &self,
        audience: Audience,
        query: &AvailabilityQuery,
    ) -> Result<Availability, ExecutionError>;

    async fn register(
        &self,
        audience: Audience,
        request: &RegistrationRequest,
        identity: &IdentityToken,
    ) -> Result<(), ExecutionError>;

    async fn update_location(&self, request: &LocationUpdate) -> Result<(), ExecutionError>;

    async fn update_password(
        &self,
        request: &PasswordUpdate,
        identity: &IdentityToken,
    ) -> Result<(), ExecutionError>;

    async fn promotion_status(&self, shop: ShopId) -> Result<PromotionStatus, ExecutionError>;

    /// Creates the promotion record and returns its id. The image is sent
    /// separately so a failed upload can be retried without a second record.
    async fn create_promotion(
        &self,
        request: &PromotionRequest,
    ) -> Result<PromotionId, ExecutionError>;

    async fn attach_promotion_image(
        &self,
        id: PromotionId,
        image: &ImageAttachment,
    ) -> Result<(), ExecutionError>;
}

#[derive(Clone, Debug)]
struct StoredAccount {
    username: String,
    password: String,
    location: Option<(String, String)>,
}

#[derive(Default)]
struct BackendLedger {
    accounts: HashMap<(Audience, String), StoredAccount>,
    promotions: HashMap<ShopId, PromotionId>,
    images: HashMap<PromotionId, String>,
    next_promotion_id: i64,
}

/// In-process stand-in for the REST backend, enforcing its uniqueness rules.
#[derive(Default)]
pub struct InMemoryBackend {
    ledger: Mutex<BackendLedger>,
    calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn with_account(audience: Audience, phone: &PhoneNumber, username: &str) -> Self {
        let backend = Self::default();
        backend.lock().accounts.insert(
            (audience, phone.formatted()),
            StoredAccount {
                username: username.to_string(),
                password: String::new(),
                location: None,
            },
        );
        backend
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn password_matches(
        &self,
        audience: Audience,
        phone: &PhoneNumber,
        candidate: &str,
    ) -> bool {
        self.lock()
            .accounts
            .get(&(audience, phone.formatted()))
            .map(|account| account.password == candidate)
            .unwrap_or(false)
    }

    pub fn location_of(&self, phone: &PhoneNumber) -> Option<(String, String)> {
        self.lock()
            .accounts
            .get(&(Audience::Customer, phone.formatted()))
            .and_then(|account| account.location.clone())
    }

    pub fn active_promotion(&self, shop: ShopId) -> Option<PromotionId> {
        self.lock().promotions.get(&shop).copied()
    }

    /// File name of the image attached to a promotion, if any.
    pub fn promotion_image(&self, id: PromotionId) -> Option<String> {
        self.lock().images.get(&id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendLedger> {
        match self.ledger.lock() {
            Ok(ledger) => ledger,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

fn require_identity(identity: &IdentityToken) -> Result<(), ExecutionError> {
    if identity.expose().trim().is_empty() {
        return Err(ServerError::new(401, "No token provided").into());
    }
    Ok(())
}

#[async_trait]
impl BackendGateway for InMemoryBackend {
    async fn check_availability(
        &self,
        audience: Audience,
        query: &AvailabilityQuery,
    ) -> Result<Availability, ExecutionError> {
        self.record_call();
        let ledger = self.lock();
        let username_exists = ledger.accounts.iter().any(|((owner, _), account)| {
            *owner == audience && account.username == query.username
        });
        let phone_exists = ledger.accounts.contains_key(&(audience, query.phone_number.clone()));
        Ok(Availability { username_exists, phone_exists })
    }

    async fn register(
        &self,
        audience: Audience,
        request: &RegistrationRequest,
        identity: &IdentityToken,
    ) -> Result<(), ExecutionError> {
        self.record_call();
        require_identity(identity)?;

        let mut ledger = self.lock();
        if ledger.accounts.contains_key(&(audience, request.phone_number.clone())) {
            return Err(ServerError::new(400, "phone number already registered").into());
        }
        let taken = ledger
            .accounts
            .iter()
            .any(|((owner, _), account)| {
                *owner == audience && account.username == request.username
            });
        if taken {
            return Err(ServerError::new(400, "username already taken").into());
        }

        ledger.accounts.insert(
            (audience, request.phone_number.clone()),
            StoredAccount {
                username: request.username.clone(),
                password: request.password.clone(),
                location: None,
            },
        );
        Ok(())
    }

    async fn update_location(&self, request: &LocationUpdate) -> Result<(), ExecutionError> {
        self.record_call();

        let mut ledger = self.lock();
        let Some(account) =
            ledger.accounts.get_mut(&(Audience::Customer, request.phone_number.clone()))
        else {
            return Err(ServerError::new(400, "User not found with this phone number.").into());
        };
        account.location = Some((request.area.clone(), request.pin_code.clone()));
        Ok(())
    }

    async fn update_password(
        &self,
        request: &PasswordUpdate,
        identity: &IdentityToken,
    ) -> Result<(), ExecutionError> {
        self.record_call();
        require_identity(identity)?;

        let mut ledger = self.lock();
        let Some(account) =
            ledger.accounts.get_mut(&(Audience::Shop, request.phone_number.clone()))
        else {
            let message = "no shop account is registered for this number";
            return Err(ServerError::new(404, message).into());
        };
        account.password = request.new_password.clone();
        Ok(())
    }

    async fn promotion_status(&self, shop: ShopId) -> Result<PromotionStatus, ExecutionError> {
        self.record_call();
        Ok(PromotionStatus { active: self.lock().promotions.contains_key(&shop) })
    }

    async fn create_promotion(
        &self,
        request: &PromotionRequest,
    ) -> Result<PromotionId, ExecutionError> {
        self.record_call();

        let mut ledger = self.lock();
        let shop = ShopId(request.shop_id);
        if ledger.promotions.contains_key(&shop) {
            return Err(ServerError::new(400, "shop already has an active promotion").into());
        }
        ledger.next_promotion_id += 1;
        let id = PromotionId(ledger.next_promotion_id);
        ledger.promotions.insert(shop, id);
        Ok(id)
    }

    async fn attach_promotion_image(
        &self,
        id: PromotionId,
        image: &ImageAttachment,
    ) -> Result<(), ExecutionError> {
        self.record_call();
        if image.bytes.is_empty() {
            return Err(ServerError::new(400, "No image file provided").into());
        }

        let mut ledger = self.lock();
        if !ledger.promotions.values().any(|existing| *existing == id) {
            return Err(ServerError::new(404, "promotion not found").into());
        }
        ledger.images.insert(id, image.file_name.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AvailabilityQuery, BackendGateway, InMemoryBackend, RegistrationRequest};
    use crate::domain::{AccountDetails, Audience, PhoneNumber, Username};
    use crate::errors::{ExecutionError, ServerError};
    use crate::verification::IdentityToken;

    fn request(username: &str, phone: &str) -> RegistrationRequest {
        RegistrationRequest::new(
            &AccountDetails::parse("Asha Stores", username, "longenough").expect("account"),
            &PhoneNumber::parse(phone).expect("phone"),
        )
    }

    #[test]
    fn registration_body_uses_backend_field_names() {
        let body = serde_json::to_value(request("asha", "9876543210")).expect("serialize");
        assert_eq!(body["phoneNumber"], "+919876543210");
        assert_eq!(body["username"], "asha");
    }

    #[tokio::test]
    async fn availability_is_scoped_to_the_audience() {
        let phone = PhoneNumber::parse("9876543210").expect("phone");
        let backend = InMemoryBackend::with_account(Audience::Shop, &phone, "asha");
        let query = AvailabilityQuery::new(&Username::parse("asha").expect("username"), &phone);

        let shop = backend.check_availability(Audience::Shop, &query).await.expect("shop");
        assert!(shop.username_exists && shop.phone_exists);
        assert_eq!(shop.conflict_message(), Some("username already taken"));

        let customer =
            backend.check_availability(Audience::Customer, &query).await.expect("customer");
        assert!(customer.is_available());
        assert_eq!(customer.conflict_message(), None);
    }

    #[tokio::test]
    async fn duplicate_phone_and_username_are_rejected() {
        let backend = InMemoryBackend::default();
        let token = IdentityToken::new("token");

        let first = request("asha", "9876543210");
        backend.register(Audience::Shop, &first, &token).await.expect("first");

        let error = backend
            .register(Audience::Shop, &request("other", "9876543210"), &token)
            .await
            .expect_err("duplicate phone");
        assert_eq!(
            error,
            ExecutionError::Server(ServerError::new(400, "phone number already registered"))
        );

        let error = backend
            .register(Audience::Shop, &request("asha", "9123456780"), &token)
            .await
            .expect_err("duplicate username");
        assert_eq!(error.to_string(), "username already taken");

        backend
            .register(Audience::Customer, &request("asha", "9876543210"), &token)
            .await
            .expect("customer accounts are a separate namespace");
        assert_eq!(backend.calls(), 4);
    }

    #[tokio::test]
    async fn writes_without_identity_are_unauthorized() {
        let backend = InMemoryBackend::default();
        let error = backend
            .register(Audience::Shop, &request("asha", "9876543210"), &IdentityToken::new(" "))
            .await
            .expect_err("missing identity");
        assert!(matches!(error, ExecutionError::Server(ServerError { status: 401, .. })));
    }
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{
    BackendGateway, LocationUpdate, PasswordUpdate, PromotionRequest, RegistrationRequest,
};
use crate::domain::PhoneNumber;
use crate::errors::{
    ExecutionError, ProviderError, SequencerError, ServerError, StepFailure, ValidationError,
};
use crate::flows::definitions::FlowDefinition;
use crate::flows::states::{FlowContext, FlowState, Step, StepInput, StepOutcome, ValidInput};
use crate::payment::PaymentGateway;
use crate::verification::{IdentityToken, VerificationProvider, WidgetHandle};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone)]
pub struct Collaborators {
    pub verification: Arc<dyn VerificationProvider>,
    pub backend: Arc<dyn BackendGateway>,
    pub payments: Arc<dyn PaymentGateway>,
}

/// Validates, executes and applies one step at a time for a single flow.
///
/// `validate`, `advance` and `restart` are pure. `execute` performs exactly
/// one collaborator call, bounded by the configured timeout.
pub struct Sequencer<F> {
    flow: F,
    collaborators: Collaborators,
    call_timeout: Duration,
}

impl<F> Sequencer<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F, collaborators: Collaborators, call_timeout: Duration) -> Self {
        Self { flow, collaborators, call_timeout }
    }

    pub fn flow(&self) -> &F {
        &self.flow
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn initial_state(&self, context: FlowContext) -> FlowState {
        self.flow.initial_state(context)
    }

    pub fn validate(&self, step: Step, input: &StepInput) -> Result<ValidInput, ValidationError> {
        self.flow.validate(step, input)
    }

    pub async fn execute(
        &self,
        step: Step,
        input: ValidInput,
        state: &FlowState,
        widget: Option<&WidgetHandle>,
    ) -> Result<StepOutcome, ExecutionError> {
        let collaborators = &self.collaborators;
        match (step, input) {
            (Step::PhoneEntry, ValidInput::Phone(phone)) => {
                let Some(widget) = widget else {
                    return Err(ProviderError::with_code(
                        "WIDGET_NOT_READY",
                        "verification widget is not ready",
                    )
                    .into());
                };
                let ticket = self
                    .bounded(collaborators.verification.request_code(&phone, widget))
                    .await??;
                Ok(StepOutcome::CodeSent { phone, ticket })
            }
            (Step::OtpEntry, ValidInput::Code(code)) => {
                let Some(ticket) = state.ticket.as_ref() else {
                    return Err(precondition("request a verification code first"));
                };
                let identity =
                    self.bounded(collaborators.verification.confirm_code(ticket, &code)).await??;
                Ok(StepOutcome::CodeConfirmed { identity })
            }
            (Step::CredentialEntry, ValidInput::Account(account)) => {
                let (phone, identity) = verified(state)?;
                let Some(audience) = self.flow.audience() else {
                    return Err(precondition("this flow does not register accounts"));
                };
                let request = RegistrationRequest::new(&account, phone);
                self.bounded(collaborators.backend.register(audience, &request, identity)).await??;
                Ok(StepOutcome::AccountRegistered { username: account.username })
            }
            (Step::LocationEntry, ValidInput::Location(location)) => {
                let Some(phone) = state.collected.phone.as_ref() else {
                    return Err(precondition("phone number has not been verified"));
                };
                let request = LocationUpdate::new(phone, &location);
                self.bounded(collaborators.backend.update_location(&request)).await??;
                Ok(StepOutcome::LocationSaved { location })
            }
            (Step::NewCredential, ValidInput::NewPassword(credential)) => {
                let (phone, identity) = verified(state)?;
                let request = PasswordUpdate::new(phone, &credential);
                self.bounded(collaborators.backend.update_password(&request, identity)).await??;
                Ok(StepOutcome::PasswordUpdated { credential })
            }
            (Step::Compose, ValidInput::Promotion(draft)) => {
                let Some(shop) = state.context.shop else {
                    return Err(precondition("sign in as a shop owner to create a promotion"));
                };
                let status =
                    self.bounded(collaborators.backend.promotion_status(shop.shop_id)).await??;
                if status.active {
                    let message = "shop already has an active promotion";
                    return Err(ServerError::new(409, message).into());
                }
                Ok(StepOutcome::PromotionDrafted { draft })
            }
            (Step::Payment, ValidInput::Payment(receipt)) => {
                if state.collected.promotion.is_none() {
                    return Err(precondition("compose the promotion before paying"));
                }
                let confirmation =
                    self.bounded(collaborators.payments.confirm_payment(&receipt)).await??;
                Ok(StepOutcome::PaymentConfirmed { confirmation })
            }
            (Step::Publish, ValidInput::Confirm) => {
                let (Some(shop), Some(draft)) =
                    (state.context.shop.as_ref(), state.collected.promotion.as_ref())
                else {
                    return Err(precondition("compose the promotion before publishing"));
                };
                if state.collected.payment.is_none() {
                    return Err(precondition("promotion fee has not been paid"));
                }
                let request = PromotionRequest::new(shop, draft);
                let id = self.bounded(collaborators.backend.create_promotion(&request)).await??;
                Ok(StepOutcome::PromotionPublished { id })
            }
            (Step::AttachImage, ValidInput::Confirm) => {
                let (Some(id), Some(draft)) =
                    (state.collected.published, state.collected.promotion.as_ref())
                else {
                    return Err(precondition("publish the promotion before attaching its image"));
                };
                self.bounded(collaborators.backend.attach_promotion_image(id, &draft.image))
                    .await??;
                Ok(StepOutcome::ImageAttached { id })
            }
            (step, _) => Err(precondition(format!("{step} cannot run with this input"))),
        }
    }

    /// Applies a step result. Success moves one step forward; failure keeps
    /// the step and records the message.
    pub fn advance(
        &self,
        state: &FlowState,
        result: Result<StepOutcome, StepFailure>,
    ) -> FlowState {
        let mut next = state.clone();
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(failure) => {
                next.error = Some(failure.to_string());
                return next;
            }
        };

        if state.step.is_terminal() || outcome.step() != state.step {
            next.error = Some(SequencerError::StepMismatch.to_string());
            return next;
        }

        match outcome {
            StepOutcome::CodeSent { phone, ticket } => {
                next.collected.phone = Some(phone);
                next.ticket = Some(ticket);
                next.identity = None;
            }
            StepOutcome::CodeConfirmed { identity } => {
                next.ticket = None;
                next.identity = Some(identity);
            }
            StepOutcome::AccountRegistered { username } => next.collected.username = Some(username),
            StepOutcome::LocationSaved { location } => next.collected.location = Some(location),
            StepOutcome::PasswordUpdated { credential } => {
                next.collected.credential = Some(credential)
            }
            StepOutcome::PromotionDrafted { draft } => next.collected.promotion = Some(draft),
            StepOutcome::PaymentConfirmed { confirmation } => {
                next.collected.payment = Some(confirmation)
            }
            StepOutcome::PromotionPublished { id } => next.collected.published = Some(id),
            StepOutcome::ImageAttached { .. } => next.collected.image_attached = true,
        }

        next.step = self.flow.next_step(state.step).unwrap_or(Step::Done);
        next.error = None;
        next
    }

    /// Back to the first step. Keeps only the caller-supplied context.
    pub fn restart(&self, state: &FlowState) -> FlowState {
        self.flow.initial_state(state.context)
    }

    async fn bounded<T>(&self, call: impl Future<Output = T>) -> Result<T, ExecutionError> {
        tokio::time::timeout(self.call_timeout, call).await.map_err(|_| ExecutionError::Timeout {
            after_ms: u64::try_from(self.call_timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }
}

fn precondition(message: impl Into<String>) -> ExecutionError {
    ExecutionError::Precondition(message.into())
}

fn verified(state: &FlowState) -> Result<(&PhoneNumber, &IdentityToken), ExecutionError> {
    match (state.collected.phone.as_ref(), state.identity.as_ref()) {
        (Some(phone), Some(identity)) => Ok((phone, identity)),
        _ => Err(precondition("phone number has not been verified")),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use secrecy::SecretString;

    use super::{Collaborators, Sequencer};
    use crate::backend::{
        Availability, AvailabilityQuery, BackendGateway, InMemoryBackend, LocationUpdate,
        PasswordUpdate, PromotionRequest, PromotionStatus, RegistrationRequest,
    };
    use crate::domain::{
        Audience, ImageAttachment, OtpCode, OwnerId, PhoneNumber, PromotionId, ShopContext,
        ShopId,
    };
    use crate::errors::{ExecutionError, ProviderError, ServerError, StepFailure, ValidationError};
    use crate::flows::definitions::{
        BusinessSignupFlow, CustomerSignupFlow, FlowDefinition, PasswordResetFlow, PromotionFlow,
    };
    use crate::flows::states::{FlowContext, FlowState, Step, StepInput, StepOutcome};
    use crate::payment::{sign_receipt, PromotionFee, RazorpaySignatureVerifier};
    use crate::verification::{
        IdentityToken, VerificationProvider, VerificationTicket, WidgetHandle,
    };

    /// Verification double with scripted answers that counts every call.
    #[derive(Default)]
    struct ScriptedVerification {
        calls: AtomicUsize,
        confirm_error: Mutex<Option<ProviderError>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl VerificationProvider for ScriptedVerification {
        async fn request_code(
            &self,
            _phone: &PhoneNumber,
            _widget: &WidgetHandle,
        ) -> Result<VerificationTicket, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(VerificationTicket("T1".to_string()))
        }

        async fn confirm_code(
            &self,
            _ticket: &VerificationTicket,
            _code: &OtpCode,
        ) -> Result<IdentityToken, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.confirm_error.lock().expect("script lock").clone();
            match scripted {
                Some(error) => Err(error.into()),
                None => Ok(IdentityToken::new("id-token")),
            }
        }
    }

    const SECRET: &str = "merchant-secret";

    fn collaborators(
        verification: Arc<ScriptedVerification>,
        backend: Arc<InMemoryBackend>,
    ) -> Collaborators {
        Collaborators {
            verification,
            backend,
            payments: Arc::new(RazorpaySignatureVerifier::new(
                "rzp_test",
                SecretString::from(SECRET.to_string()),
                PromotionFee::default(),
            )),
        }
    }

    fn sequencer<F: FlowDefinition>(
        flow: F,
        verification: &Arc<ScriptedVerification>,
        backend: &Arc<InMemoryBackend>,
    ) -> Sequencer<F> {
        Sequencer::new(
            flow,
            collaborators(Arc::clone(verification), Arc::clone(backend)),
            Duration::from_secs(15),
        )
    }

    fn widget() -> WidgetHandle {
        WidgetHandle {
            container_id: "recaptcha-container".to_string(),
            attempt: 1,
            challenge_token: None,
        }
    }

    async fn step<F: FlowDefinition>(
        sequencer: &Sequencer<F>,
        state: &FlowState,
        input: StepInput,
    ) -> FlowState {
        let result = match sequencer.validate(state.step, &input) {
            Ok(valid) => sequencer
                .execute(state.step, valid, state, Some(&widget()))
                .await
                .map_err(StepFailure::from),
            Err(error) => Err(StepFailure::from(error)),
        };
        sequencer.advance(state, result)
    }

    fn phone(raw: &str) -> StepInput {
        StepInput::Phone { phone_number: raw.to_string(), challenge_token: None }
    }

    fn code(raw: &str) -> StepInput {
        StepInput::Code { code: raw.to_string() }
    }

    #[tokio::test]
    async fn phone_entry_advances_to_otp_entry_with_ticket() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(PasswordResetFlow, &verification, &backend);

        let state = sequencer.initial_state(FlowContext::default());
        let next = step(&sequencer, &state, phone("9876543210")).await;

        assert_eq!(next.step, Step::OtpEntry);
        assert_eq!(next.ticket, Some(VerificationTicket("T1".to_string())));
        assert_eq!(next.error, None);
        assert_eq!(
            next.collected.phone.as_ref().map(PhoneNumber::formatted).as_deref(),
            Some("+919876543210")
        );
    }

    #[tokio::test]
    async fn short_code_fails_locally_without_calling_the_provider() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(PasswordResetFlow, &verification, &backend);

        let state = step(
            &sequencer,
            &sequencer.initial_state(FlowContext::default()),
            phone("9876543210"),
        )
        .await;
        let calls_before = verification.calls.load(Ordering::SeqCst);

        assert_eq!(
            sequencer.validate(Step::OtpEntry, &code("12345")),
            Err(ValidationError::new("code", "expected 6 digits"))
        );
        let next = step(&sequencer, &state, code("12345")).await;

        assert_eq!(next.step, Step::OtpEntry);
        assert_eq!(next.error.as_deref(), Some("expected 6 digits"));
        assert_eq!(verification.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn empty_and_malformed_phone_never_reach_the_provider() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(BusinessSignupFlow, &verification, &backend);
        let state = sequencer.initial_state(FlowContext::default());

        for raw in ["", "12345", "98765432101"] {
            let next = step(&sequencer, &state, phone(raw)).await;
            assert_eq!(next.step, Step::PhoneEntry);
            assert!(next.error.is_some());
        }
        assert_eq!(verification.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejected_code_keeps_otp_entry_with_provider_message() {
        let verification = Arc::new(ScriptedVerification::default());
        *verification.confirm_error.lock().expect("script lock") =
            Some(ProviderError::with_code("INVALID_CODE", "invalid code"));
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(PasswordResetFlow, &verification, &backend);

        let state = step(
            &sequencer,
            &sequencer.initial_state(FlowContext::default()),
            phone("9876543210"),
        )
        .await;
        let next = step(&sequencer, &state, code("123456")).await;

        assert_eq!(next.step, Step::OtpEntry);
        assert_eq!(next.error.as_deref(), Some("invalid code"));
        assert_eq!(next.ticket, state.ticket);
    }

    #[tokio::test]
    async fn password_reset_runs_to_done() {
        let verification = Arc::new(ScriptedVerification::default());
        let reset_phone = PhoneNumber::parse("9876543210").expect("phone");
        let backend = Arc::new(InMemoryBackend::with_account(Audience::Shop, &reset_phone, "asha"));
        let sequencer = sequencer(PasswordResetFlow, &verification, &backend);

        let mut state = sequencer.initial_state(FlowContext::default());
        state = step(&sequencer, &state, phone("9876543210")).await;
        state = step(&sequencer, &state, code("123456")).await;
        assert_eq!(state.step, Step::NewCredential);
        assert_eq!(state.ticket, None);

        state = step(
            &sequencer,
            &state,
            StepInput::NewPassword {
                password: "freshpass1".to_string(),
                confirm_password: "freshpass1".to_string(),
            },
        )
        .await;

        assert_eq!(state.step, Step::Done);
        assert!(backend.password_matches(Audience::Shop, &reset_phone, "freshpass1"));
    }

    #[tokio::test]
    async fn duplicate_signup_surfaces_the_server_message() {
        let verification = Arc::new(ScriptedVerification::default());
        let existing = PhoneNumber::parse("9876543210").expect("phone");
        let backend =
            Arc::new(InMemoryBackend::with_account(Audience::Customer, &existing, "taken"));
        let sequencer = sequencer(CustomerSignupFlow, &verification, &backend);

        let mut state = sequencer.initial_state(FlowContext::default());
        state = step(&sequencer, &state, phone("9876543210")).await;
        state = step(&sequencer, &state, code("123456")).await;
        state = step(
            &sequencer,
            &state,
            StepInput::Account {
                name: "Ravi Kumar".to_string(),
                username: "ravi".to_string(),
                password: "longenough".to_string(),
            },
        )
        .await;

        assert_eq!(state.step, Step::CredentialEntry);
        assert_eq!(state.error.as_deref(), Some("phone number already registered"));
    }

    #[tokio::test]
    async fn promotion_flow_checks_status_pays_and_publishes() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(PromotionFlow, &verification, &backend);
        let shop = ShopContext { shop_id: ShopId(7), owner_id: OwnerId(3) };

        let mut state = sequencer.initial_state(FlowContext { shop: Some(shop) });
        state = step(
            &sequencer,
            &state,
            StepInput::Promotion {
                title: "Diwali sale".to_string(),
                message: "20% off all sweets".to_string(),
                image: ImageAttachment {
                    file_name: "banner.png".to_string(),
                    content_type: "image/png".to_string(),
                    bytes: vec![1, 2, 3],
                },
            },
        )
        .await;
        assert_eq!(state.step, Step::Payment);

        let secret = SecretString::from(SECRET.to_string());
        let signature = sign_receipt(&secret, "order_9", "pay_9").expect("signature");
        state = step(
            &sequencer,
            &state,
            StepInput::Payment {
                order_id: "order_9".to_string(),
                payment_id: "pay_9".to_string(),
                signature,
            },
        )
        .await;
        assert_eq!(state.step, Step::Publish);

        state = step(&sequencer, &state, StepInput::Confirm).await;
        assert_eq!(state.step, Step::AttachImage);
        assert_eq!(backend.active_promotion(ShopId(7)), state.collected.published);

        state = step(&sequencer, &state, StepInput::Confirm).await;
        assert_eq!(state.step, Step::Done);
        assert!(state.collected.image_attached);
        let published = state.collected.published.expect("promotion id");
        assert_eq!(backend.promotion_image(published).as_deref(), Some("banner.png"));
    }

    /// Backend whose first image uploads fail, counting record creations.
    struct FlakyUploads {
        inner: InMemoryBackend,
        failing_uploads: AtomicUsize,
        created: AtomicUsize,
    }

    #[async_trait]
    impl BackendGateway for FlakyUploads {
        async fn check_availability(
            &self,
            audience: Audience,
            query: &AvailabilityQuery,
        ) -> Result<Availability, ExecutionError> {
            self.inner.check_availability(audience, query).await
        }

        async fn register(
            &self,
            audience: Audience,
            request: &RegistrationRequest,
            identity: &IdentityToken,
        ) -> Result<(), ExecutionError> {
            self.inner.register(audience, request, identity).await
        }

        async fn update_location(&self, request: &LocationUpdate) -> Result<(), ExecutionError> {
            self.inner.update_location(request).await
        }

        async fn update_password(
            &self,
            request: &PasswordUpdate,
            identity: &IdentityToken,
        ) -> Result<(), ExecutionError> {
            self.inner.update_password(request, identity).await
        }

        async fn promotion_status(&self, shop: ShopId) -> Result<PromotionStatus, ExecutionError> {
            self.inner.promotion_status(shop).await
        }

        async fn create_promotion(
            &self,
            request: &PromotionRequest,
        ) -> Result<PromotionId, ExecutionError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            self.inner.create_promotion(request).await
        }

        async fn attach_promotion_image(
            &self,
            id: PromotionId,
            image: &ImageAttachment,
        ) -> Result<(), ExecutionError> {
            let remaining = self.failing_uploads.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_uploads.store(remaining - 1, Ordering::SeqCst);
                return Err(ServerError::new(500, "disk full").into());
            }
            self.inner.attach_promotion_image(id, image).await
        }
    }

    #[tokio::test]
    async fn failed_image_upload_retries_without_creating_a_second_promotion() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(FlakyUploads {
            inner: InMemoryBackend::default(),
            failing_uploads: AtomicUsize::new(1),
            created: AtomicUsize::new(0),
        });
        let sequencer = Sequencer::new(
            PromotionFlow,
            Collaborators {
                verification,
                backend: Arc::clone(&backend) as Arc<dyn BackendGateway>,
                payments: Arc::new(RazorpaySignatureVerifier::new(
                    "rzp_test",
                    SecretString::from(SECRET.to_string()),
                    PromotionFee::default(),
                )),
            },
            Duration::from_secs(15),
        );
        let shop = ShopContext { shop_id: ShopId(7), owner_id: OwnerId(3) };

        let mut state = sequencer.initial_state(FlowContext { shop: Some(shop) });
        state = step(
            &sequencer,
            &state,
            StepInput::Promotion {
                title: "Diwali sale".to_string(),
                message: "20% off all sweets".to_string(),
                image: ImageAttachment {
                    file_name: "banner.png".to_string(),
                    content_type: "image/png".to_string(),
                    bytes: vec![1, 2, 3],
                },
            },
        )
        .await;
        let signature = sign_receipt(&SecretString::from(SECRET.to_string()), "order_9", "pay_9")
            .expect("signature");
        state = step(
            &sequencer,
            &state,
            StepInput::Payment {
                order_id: "order_9".to_string(),
                payment_id: "pay_9".to_string(),
                signature,
            },
        )
        .await;
        state = step(&sequencer, &state, StepInput::Confirm).await;
        assert_eq!(state.step, Step::AttachImage);

        state = step(&sequencer, &state, StepInput::Confirm).await;
        assert_eq!(state.step, Step::AttachImage);
        assert_eq!(state.error.as_deref(), Some("disk full"));

        state = step(&sequencer, &state, StepInput::Confirm).await;
        assert_eq!(state.step, Step::Done);
        assert_eq!(backend.created.load(Ordering::SeqCst), 1);
        assert_eq!(backend.inner.active_promotion(ShopId(7)), state.collected.published);
    }

    #[tokio::test]
    async fn compose_is_rejected_when_a_promotion_is_active() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let shop = ShopContext { shop_id: ShopId(7), owner_id: OwnerId(3) };
        let image = ImageAttachment {
            file_name: "banner.png".to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![1],
        };
        backend
            .create_promotion(&PromotionRequest {
                title: "Earlier".to_string(),
                message: "Still running".to_string(),
                shop_id: 7,
                shop_keeper_id: 3,
            })
            .await
            .expect("seed promotion");
        let sequencer = sequencer(PromotionFlow, &verification, &backend);

        let state = sequencer.initial_state(FlowContext { shop: Some(shop) });
        let next = step(
            &sequencer,
            &state,
            StepInput::Promotion {
                title: "Sale".to_string(),
                message: "Now on".to_string(),
                image,
            },
        )
        .await;

        assert_eq!(next.step, Step::Compose);
        assert_eq!(next.error.as_deref(), Some("shop already has an active promotion"));
    }

    #[tokio::test]
    async fn missing_shop_context_is_a_precondition_failure() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(PromotionFlow, &verification, &backend);
        let state = sequencer.initial_state(FlowContext::default());
        let valid = sequencer
            .validate(
                Step::Compose,
                &StepInput::Promotion {
                    title: "Sale".to_string(),
                    message: "Now on".to_string(),
                    image: ImageAttachment {
                        file_name: "banner.png".to_string(),
                        content_type: "image/png".to_string(),
                        bytes: vec![1],
                    },
                },
            )
            .expect("valid draft");

        let error =
            sequencer.execute(Step::Compose, valid, &state, None).await.expect_err("no shop");
        assert!(matches!(error, ExecutionError::Precondition(_)));
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_provider_is_reported_as_timeout() {
        let verification = Arc::new(ScriptedVerification {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = Sequencer::new(
            PasswordResetFlow,
            collaborators(Arc::clone(&verification), backend),
            Duration::from_secs(15),
        );

        let state = sequencer.initial_state(FlowContext::default());
        let next = step(&sequencer, &state, phone("9876543210")).await;

        assert_eq!(next.step, Step::PhoneEntry);
        assert_eq!(next.error.as_deref(), Some("request timed out after 15000 ms"));
    }

    #[tokio::test]
    async fn restart_returns_the_initial_state_from_any_step() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(PasswordResetFlow, &verification, &backend);
        let initial = sequencer.initial_state(FlowContext::default());

        let mut state = initial.clone();
        let mut seen = vec![state.clone()];
        state = step(&sequencer, &state, phone("9876543210")).await;
        seen.push(state.clone());
        state = step(&sequencer, &state, code("123456")).await;
        seen.push(state.clone());
        let mut failed = state.clone();
        failed.error = Some("boom".to_string());
        seen.push(failed);

        for state in &seen {
            let restarted = sequencer.restart(state);
            assert_eq!(restarted, initial);
            assert_eq!(sequencer.restart(&restarted), restarted);
        }
    }

    #[test]
    fn advance_is_deterministic_and_never_skips() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(CustomerSignupFlow, &verification, &backend);
        let state = sequencer.initial_state(FlowContext::default());
        let outcome = StepOutcome::CodeSent {
            phone: PhoneNumber::parse("9876543210").expect("phone"),
            ticket: VerificationTicket("T1".to_string()),
        };

        let first = sequencer.advance(&state, Ok(outcome.clone()));
        let second = sequencer.advance(&state, Ok(outcome.clone()));
        assert_eq!(first, second);
        assert_eq!(
            sequencer.flow().step_index(first.step),
            sequencer.flow().step_index(state.step).map(|index| index + 1)
        );

        let replayed = sequencer.advance(&first, Ok(outcome));
        assert_eq!(replayed.step, Step::OtpEntry);
        assert_eq!(
            replayed.error.as_deref(),
            Some("step outcome does not belong to the current step")
        );
    }

    #[test]
    fn failure_keeps_the_step_and_the_ticket() {
        let verification = Arc::new(ScriptedVerification::default());
        let backend = Arc::new(InMemoryBackend::default());
        let sequencer = sequencer(BusinessSignupFlow, &verification, &backend);
        let mut state = sequencer.initial_state(FlowContext::default());
        state.step = Step::OtpEntry;
        state.ticket = Some(VerificationTicket("T1".to_string()));

        let next = sequencer.advance(
            &state,
            Err(StepFailure::from(ExecutionError::from(ProviderError::new(
                "verification code expired",
            )))),
        );
        assert_eq!(next.step, Step::OtpEntry);
        assert_eq!(next.ticket, state.ticket);
        assert_eq!(next.error.as_deref(), Some("verification code expired"));
    }
}

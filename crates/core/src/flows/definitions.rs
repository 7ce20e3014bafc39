//! The four guarded flows and their per-step validation.
//!
//! A flow is a fixed, ordered list of steps ending in [`Step::Done`]. Moving
//! forward is only ever by one position; the only backward edge is a restart
//! to the first step.

use crate::domain::{
    AccountDetails, Audience, Location, OtpCode, Password, PaymentReceipt, PhoneNumber,
    PromotionDraft,
};
use crate::errors::ValidationError;
use crate::flows::states::{FlowContext, FlowKind, FlowState, Redirect, Step, StepInput, ValidInput};

pub trait FlowDefinition: Send + Sync {
    fn kind(&self) -> FlowKind;

    /// Ordered steps, terminal step last.
    fn steps(&self) -> &'static [Step];

    fn redirect(&self) -> Redirect;

    /// Account family written by the credential step, if the flow has one.
    fn audience(&self) -> Option<Audience> {
        None
    }

    fn first_step(&self) -> Step {
        self.steps().first().copied().unwrap_or(Step::Done)
    }

    fn initial_state(&self, context: FlowContext) -> FlowState {
        FlowState::new(self.kind(), self.first_step(), context)
    }

    fn step_index(&self, step: Step) -> Option<usize> {
        self.steps().iter().position(|candidate| *candidate == step)
    }

    fn next_step(&self, current: Step) -> Option<Step> {
        let index = self.step_index(current)?;
        self.steps().get(index + 1).copied()
    }

    fn uses_verification(&self) -> bool {
        self.steps().contains(&Step::PhoneEntry)
    }

    fn validate(&self, step: Step, input: &StepInput) -> Result<ValidInput, ValidationError> {
        if self.step_index(step).is_none() {
            return Err(ValidationError::new(
                "step",
                format!("{step} is not a step of the {} flow", self.kind()),
            ));
        }
        validate_step(step, input)
    }
}

impl<T: FlowDefinition + ?Sized> FlowDefinition for Box<T> {
    fn kind(&self) -> FlowKind {
        (**self).kind()
    }

    fn steps(&self) -> &'static [Step] {
        (**self).steps()
    }

    fn redirect(&self) -> Redirect {
        (**self).redirect()
    }

    fn audience(&self) -> Option<Audience> {
        (**self).audience()
    }

    fn validate(&self, step: Step, input: &StepInput) -> Result<ValidInput, ValidationError> {
        (**self).validate(step, input)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BusinessSignupFlow;

impl FlowDefinition for BusinessSignupFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::BusinessSignup
    }

    fn steps(&self) -> &'static [Step] {
        &[Step::PhoneEntry, Step::OtpEntry, Step::CredentialEntry, Step::Done]
    }

    fn redirect(&self) -> Redirect {
        Redirect::new("/Businessman_shopinfo", 2_000)
    }

    fn audience(&self) -> Option<Audience> {
        Some(Audience::Shop)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CustomerSignupFlow;

impl FlowDefinition for CustomerSignupFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::CustomerSignup
    }

    fn steps(&self) -> &'static [Step] {
        &[Step::PhoneEntry, Step::OtpEntry, Step::CredentialEntry, Step::LocationEntry, Step::Done]
    }

    fn redirect(&self) -> Redirect {
        Redirect::new("/User_home", 2_000)
    }

    fn audience(&self) -> Option<Audience> {
        Some(Audience::Customer)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PasswordResetFlow;

impl FlowDefinition for PasswordResetFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::PasswordReset
    }

    fn steps(&self) -> &'static [Step] {
        &[Step::PhoneEntry, Step::OtpEntry, Step::NewCredential, Step::Done]
    }

    fn redirect(&self) -> Redirect {
        Redirect::new("/Businessman_signin", 3_000)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PromotionFlow;

impl FlowDefinition for PromotionFlow {
    fn kind(&self) -> FlowKind {
        FlowKind::Promotion
    }

    fn steps(&self) -> &'static [Step] {
        &[Step::Compose, Step::Payment, Step::Publish, Step::AttachImage, Step::Done]
    }

    fn redirect(&self) -> Redirect {
        Redirect::new("/Businessman_Home", 2_000)
    }
}

pub fn definition_for(kind: FlowKind) -> Box<dyn FlowDefinition> {
    match kind {
        FlowKind::BusinessSignup => Box::new(BusinessSignupFlow),
        FlowKind::CustomerSignup => Box::new(CustomerSignupFlow),
        FlowKind::PasswordReset => Box::new(PasswordResetFlow),
        FlowKind::Promotion => Box::new(PromotionFlow),
    }
}

/// Pure format checks for one step. Never performs I/O.
pub fn validate_step(step: Step, input: &StepInput) -> Result<ValidInput, ValidationError> {
    match (step, input) {
        (Step::PhoneEntry, StepInput::Phone { phone_number, .. }) => {
            PhoneNumber::parse(phone_number).map(ValidInput::Phone)
        }
        (Step::OtpEntry, StepInput::Code { code }) => OtpCode::parse(code).map(ValidInput::Code),
        (Step::CredentialEntry, StepInput::Account { name, username, password }) => {
            AccountDetails::parse(name, username, password).map(ValidInput::Account)
        }
        (Step::LocationEntry, StepInput::Location { area, pin_code }) => {
            Location::parse(area, pin_code).map(ValidInput::Location)
        }
        (Step::NewCredential, StepInput::NewPassword { password, confirm_password }) => {
            Password::parse_confirmed(password, confirm_password).map(ValidInput::NewPassword)
        }
        (Step::Compose, StepInput::Promotion { title, message, image }) => {
            PromotionDraft::parse(title, message, image.clone()).map(ValidInput::Promotion)
        }
        (Step::Payment, StepInput::Payment { order_id, payment_id, signature }) => {
            PaymentReceipt::parse(order_id, payment_id, signature).map(ValidInput::Payment)
        }
        (Step::Publish | Step::AttachImage, StepInput::Confirm) => Ok(ValidInput::Confirm),
        (Step::Done, _) => Err(ValidationError::new("step", "flow is already complete")),
        (step, input) => Err(ValidationError::new(
            "type",
            format!("{step} does not accept `{}` input", input.kind()),
        )),
    }
}

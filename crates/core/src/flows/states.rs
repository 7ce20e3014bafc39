use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{
    AccountDetails, ImageAttachment, Location, OtpCode, Password, PaymentReceipt, PhoneNumber,
    PromotionDraft, PromotionId, ShopContext, Username,
};
use crate::payment::PaymentConfirmation;
use crate::verification::{IdentityToken, VerificationTicket};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    BusinessSignup,
    CustomerSignup,
    PasswordReset,
    Promotion,
}

impl FlowKind {
    pub const ALL: [FlowKind; 4] =
        [Self::BusinessSignup, Self::CustomerSignup, Self::PasswordReset, Self::Promotion];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BusinessSignup => "business_signup",
            Self::CustomerSignup => "customer_signup",
            Self::PasswordReset => "password_reset",
            Self::Promotion => "promotion",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown flow kind `{value}`"))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Step {
    PhoneEntry,
    OtpEntry,
    CredentialEntry,
    LocationEntry,
    NewCredential,
    Compose,
    Payment,
    Publish,
    AttachImage,
    Done,
}

impl Step {
    pub const ALL: [Step; 10] = [
        Self::PhoneEntry,
        Self::OtpEntry,
        Self::CredentialEntry,
        Self::LocationEntry,
        Self::NewCredential,
        Self::Compose,
        Self::Payment,
        Self::Publish,
        Self::AttachImage,
        Self::Done,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PhoneEntry => "PhoneEntry",
            Self::OtpEntry => "OtpEntry",
            Self::CredentialEntry => "CredentialEntry",
            Self::LocationEntry => "LocationEntry",
            Self::NewCredential => "NewCredential",
            Self::Compose => "Compose",
            Self::Payment => "Payment",
            Self::Publish => "Publish",
            Self::AttachImage => "AttachImage",
            Self::Done => "Done",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Done
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Step {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|step| step.as_str() == value)
            .ok_or_else(|| format!("unknown step `{value}`"))
    }
}

/// Caller-supplied facts a flow needs but never collects itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowContext {
    pub shop: Option<ShopContext>,
}

/// Input gathered by completed steps.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectedInput {
    pub phone: Option<PhoneNumber>,
    pub username: Option<Username>,
    pub credential: Option<Password>,
    pub location: Option<Location>,
    pub promotion: Option<PromotionDraft>,
    pub payment: Option<PaymentConfirmation>,
    pub published: Option<PromotionId>,
    pub image_attached: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowState {
    pub flow: FlowKind,
    pub step: Step,
    pub context: FlowContext,
    pub collected: CollectedInput,
    pub ticket: Option<VerificationTicket>,
    pub identity: Option<IdentityToken>,
    pub error: Option<String>,
}

impl FlowState {
    pub fn new(flow: FlowKind, step: Step, context: FlowContext) -> Self {
        Self {
            flow,
            step,
            context,
            collected: CollectedInput::default(),
            ticket: None,
            identity: None,
            error: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.step.is_terminal()
    }
}

/// Raw per-step input as submitted by a client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepInput {
    Phone {
        phone_number: String,
        /// Token the client's challenge widget produced for this attempt.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        challenge_token: Option<String>,
    },
    Code { code: String },
    Account { name: String, username: String, password: String },
    Location { area: String, pin_code: String },
    NewPassword { password: String, confirm_password: String },
    Promotion { title: String, message: String, image: ImageAttachment },
    Payment { order_id: String, payment_id: String, signature: String },
    Confirm,
}

impl StepInput {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Phone { .. } => "phone",
            Self::Code { .. } => "code",
            Self::Account { .. } => "account",
            Self::Location { .. } => "location",
            Self::NewPassword { .. } => "new_password",
            Self::Promotion { .. } => "promotion",
            Self::Payment { .. } => "payment",
            Self::Confirm => "confirm",
        }
    }

    pub fn challenge_token(&self) -> Option<&str> {
        match self {
            Self::Phone { challenge_token, .. } => challenge_token.as_deref(),
            _ => None,
        }
    }
}

/// Input that passed local validation for a specific step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidInput {
    Phone(PhoneNumber),
    Code(OtpCode),
    Account(AccountDetails),
    Location(Location),
    NewPassword(Password),
    Promotion(PromotionDraft),
    Payment(PaymentReceipt),
    Confirm,
}

/// Result of a step's single collaborator call, ready to be applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    CodeSent { phone: PhoneNumber, ticket: VerificationTicket },
    CodeConfirmed { identity: IdentityToken },
    AccountRegistered { username: Username },
    LocationSaved { location: Location },
    PasswordUpdated { credential: Password },
    PromotionDrafted { draft: PromotionDraft },
    PaymentConfirmed { confirmation: PaymentConfirmation },
    PromotionPublished { id: PromotionId },
    ImageAttached { id: PromotionId },
}

impl StepOutcome {
    /// The step this outcome completes.
    pub fn step(&self) -> Step {
        match self {
            Self::CodeSent { .. } => Step::PhoneEntry,
            Self::CodeConfirmed { .. } => Step::OtpEntry,
            Self::AccountRegistered { .. } => Step::CredentialEntry,
            Self::LocationSaved { .. } => Step::LocationEntry,
            Self::PasswordUpdated { .. } => Step::NewCredential,
            Self::PromotionDrafted { .. } => Step::Compose,
            Self::PaymentConfirmed { .. } => Step::Payment,
            Self::PromotionPublished { .. } => Step::Publish,
            Self::ImageAttached { .. } => Step::AttachImage,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub target: String,
    pub delay_ms: u64,
}

impl Redirect {
    pub fn new(target: impl Into<String>, delay_ms: u64) -> Self {
        Self { target: target.into(), delay_ms }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum FlowSignal {
    Complete { redirect: Redirect },
}

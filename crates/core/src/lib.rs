pub mod audit;
pub mod backend;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod payment;
pub mod verification;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use backend::{
    Availability, AvailabilityQuery, BackendGateway, InMemoryBackend, LocationUpdate,
    PasswordUpdate, PromotionRequest, PromotionStatus, RegistrationRequest,
};
pub use domain::{
    AccountDetails, Audience, ImageAttachment, Location, OtpCode, OwnerId, Password,
    PaymentReceipt, PhoneNumber, PromotionDraft, PromotionId, ShopContext, ShopId, Username,
};
pub use errors::{
    ApplicationError, DomainError, ExecutionError, InterfaceError, NetworkError, ProviderError,
    SequencerError, ServerError, StepFailure, ValidationError,
};
pub use flows::{
    definition_for, FlowContext, FlowDefinition, FlowKind, FlowRuntime, FlowSession, FlowSignal,
    FlowSnapshot, FlowState, FlowView, Redirect, Sequencer, Step, StepInput, StepOutcome,
    SubmitReport,
};
pub use payment::{PaymentConfirmation, PaymentGateway, PromotionFee, RazorpaySignatureVerifier};
pub use verification::{
    ConsoleVerificationProvider, HeadlessWidgetFactory, IdentityToken, VerificationProvider,
    VerificationTicket, WidgetFactory, WidgetHandle,
};

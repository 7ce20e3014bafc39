pub mod definitions;
pub mod engine;
pub mod session;
pub mod snapshot;
pub mod states;

pub use definitions::{
    definition_for, validate_step, BusinessSignupFlow, CustomerSignupFlow, FlowDefinition,
    PasswordResetFlow, PromotionFlow,
};
pub use engine::{Collaborators, Sequencer, DEFAULT_CALL_TIMEOUT};
pub use session::{
    navigate_after, FlowRuntime, FlowSession, FlowView, Navigator, SubmitReport,
};
pub use snapshot::FlowSnapshot;
pub use states::{
    CollectedInput, FlowContext, FlowKind, FlowSignal, FlowState, Redirect, Step, StepInput,
    StepOutcome, ValidInput,
};

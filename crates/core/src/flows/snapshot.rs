use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{PhoneNumber, ShopContext};
use crate::flows::definitions::FlowDefinition;
use crate::flows::states::{FlowContext, FlowKind, FlowState, Step};
use crate::verification::IdentityToken;

/// Short-lived identifiers kept between page loads so a verified user can
/// skip the steps they already passed. Verification tickets are never kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub session_id: String,
    pub flow: FlowKind,
    pub step: Step,
    pub phone: Option<PhoneNumber>,
    pub identity: Option<IdentityToken>,
    pub shop: Option<ShopContext>,
    pub updated_at: DateTime<Utc>,
}

impl FlowSnapshot {
    pub fn capture(session_id: impl Into<String>, state: &FlowState) -> Self {
        Self {
            session_id: session_id.into(),
            flow: state.flow,
            step: state.step,
            phone: state.collected.phone.clone(),
            identity: state.identity.clone(),
            shop: state.context.shop,
            updated_at: Utc::now(),
        }
    }

    /// True once the snapshot is at least `ttl` old at `now`. The stored
    /// identity token is not trusted past that point.
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.updated_at) >= ttl,
            Err(_) => false,
        }
    }

    /// Rebuilds the state a reload should land on, or `None` when the snapshot
    /// belongs to another flow.
    ///
    /// A confirmed identity resumes at the step reached, as long as that step
    /// lies past code entry. A bare phone number resumes at phone entry with
    /// the number kept. Anything else starts over.
    pub fn resume<F>(&self, flow: &F, context: FlowContext) -> Option<FlowState>
    where
        F: FlowDefinition + ?Sized,
    {
        if self.flow != flow.kind() {
            return None;
        }

        let context = FlowContext { shop: context.shop.or(self.shop) };
        let mut state = flow.initial_state(context);
        if !flow.uses_verification() || self.step.is_terminal() {
            return Some(state);
        }

        let reached = flow.step_index(self.step);
        let past_code_entry = match (reached, flow.step_index(Step::OtpEntry)) {
            (Some(reached), Some(otp)) => reached > otp,
            _ => false,
        };

        match (&self.phone, &self.identity) {
            (Some(phone), Some(identity)) if past_code_entry => {
                state.step = self.step;
                state.collected.phone = Some(phone.clone());
                state.identity = Some(identity.clone());
            }
            (Some(phone), _) => state.collected.phone = Some(phone.clone()),
            (None, _) => {}
        }
        Some(state)
    }
}

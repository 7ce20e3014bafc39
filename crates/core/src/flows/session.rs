//! One live flow instance per user session.
//!
//! [`FlowSession`] owns a [`FlowState`] and serializes work on it: a second
//! submit while one is pending is refused, and a response that lands after a
//! restart or close is dropped instead of being applied.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::errors::{SequencerError, StepFailure};
use crate::flows::definitions::{definition_for, FlowDefinition};
use crate::flows::engine::{Collaborators, Sequencer};
use crate::flows::snapshot::FlowSnapshot;
use crate::flows::states::{
    FlowContext, FlowKind, FlowSignal, FlowState, Redirect, Step, StepInput,
};
use crate::verification::{WidgetFactory, WidgetHandle, WidgetLease};

const ACTOR: &str = "flow-session";

/// Everything needed to open flow sessions.
#[derive(Clone)]
pub struct FlowRuntime {
    pub collaborators: Collaborators,
    pub widgets: Arc<dyn WidgetFactory>,
    pub widget_container: String,
    pub call_timeout: Duration,
    /// Snapshots older than this start a fresh flow instead of resuming.
    pub snapshot_ttl: Duration,
    pub audit: Arc<dyn AuditSink>,
}

impl FlowRuntime {
    pub fn start(&self, session_id: &str, kind: FlowKind, context: FlowContext) -> FlowSession {
        let sequencer = self.sequencer(kind);
        let state = sequencer.initial_state(context);
        FlowSession::new(session_id, sequencer, state, self)
    }

    /// Opens a session positioned by a stored snapshot. Falls back to a fresh
    /// start when the snapshot is for another flow or has expired.
    pub fn resume(
        &self,
        session_id: &str,
        kind: FlowKind,
        context: FlowContext,
        snapshot: &FlowSnapshot,
    ) -> FlowSession {
        let sequencer = self.sequencer(kind);
        let state = if self.is_expired(snapshot) {
            info!(
                event_name = "flow.snapshot.expired",
                session_id,
                flow = %kind,
                updated_at = %snapshot.updated_at,
                "stored snapshot expired; starting fresh"
            );
            sequencer.initial_state(context)
        } else {
            snapshot
                .resume(sequencer.flow(), context)
                .unwrap_or_else(|| sequencer.initial_state(context))
        };
        FlowSession::new(session_id, sequencer, state, self)
    }

    pub fn is_expired(&self, snapshot: &FlowSnapshot) -> bool {
        snapshot.is_expired(self.snapshot_ttl, Utc::now())
    }

    fn sequencer(&self, kind: FlowKind) -> Sequencer<Box<dyn FlowDefinition>> {
        Sequencer::new(definition_for(kind), self.collaborators.clone(), self.call_timeout)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitReport {
    pub state: FlowState,
    /// Present only on the submit that entered the terminal step.
    pub signal: Option<FlowSignal>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FlowView {
    pub flow: FlowKind,
    pub step: Step,
    pub step_index: usize,
    pub error: Option<String>,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<Redirect>,
}

impl FlowView {
    pub fn new<F: FlowDefinition + ?Sized>(flow: &F, state: &FlowState) -> Self {
        let completed = state.is_complete();
        Self {
            flow: state.flow,
            step: state.step,
            step_index: flow.step_index(state.step).unwrap_or_default(),
            error: state.error.clone(),
            completed,
            redirect: completed.then(|| flow.redirect()),
        }
    }
}

struct SessionInner {
    state: FlowState,
    generation: u64,
    in_flight: Option<u64>,
    closed: bool,
    completed: bool,
    widget: Option<WidgetLease>,
    widget_attempts: u32,
}

pub struct FlowSession {
    session_id: String,
    sequencer: Sequencer<Box<dyn FlowDefinition>>,
    widgets: Arc<dyn WidgetFactory>,
    widget_container: String,
    audit: Arc<dyn AuditSink>,
    inner: Mutex<SessionInner>,
}

impl FlowSession {
    fn new(
        session_id: &str,
        sequencer: Sequencer<Box<dyn FlowDefinition>>,
        state: FlowState,
        runtime: &FlowRuntime,
    ) -> Self {
        let completed = state.is_complete();
        let session = Self {
            session_id: session_id.to_string(),
            sequencer,
            widgets: Arc::clone(&runtime.widgets),
            widget_container: runtime.widget_container.clone(),
            audit: Arc::clone(&runtime.audit),
            inner: Mutex::new(SessionInner {
                state,
                generation: 0,
                in_flight: None,
                closed: false,
                completed,
                widget: None,
                widget_attempts: 0,
            }),
        };
        {
            let mut inner = session.lock();
            session.ensure_widget(&mut inner);
        }
        session
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn kind(&self) -> FlowKind {
        self.sequencer.flow().kind()
    }

    pub fn state(&self) -> FlowState {
        self.lock().state.clone()
    }

    pub fn view(&self) -> FlowView {
        FlowView::new(self.sequencer.flow(), &self.lock().state)
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot::capture(self.session_id.clone(), &self.lock().state)
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    /// Handle of the widget currently held for this attempt, if any.
    pub fn widget_handle(&self) -> Option<WidgetHandle> {
        self.lock().widget.as_ref().and_then(WidgetLease::handle)
    }

    /// Validates, executes and applies one step.
    ///
    /// Step failures are not errors here: they come back inside the report
    /// with `state.error` set. Errors are reserved for misuse of the session.
    pub async fn submit(
        &self,
        input: StepInput,
        correlation_id: &str,
    ) -> Result<SubmitReport, SequencerError> {
        let (generation, state, widget) = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(SequencerError::Closed);
            }
            if inner.completed || inner.state.is_complete() {
                return Err(SequencerError::Finished);
            }
            if inner.in_flight.is_some() {
                return Err(SequencerError::Busy);
            }
            let generation = inner.generation;
            inner.in_flight = Some(generation);
            let widget = if inner.state.step == Step::PhoneEntry {
                self.ensure_widget(&mut inner);
                inner
                    .widget
                    .as_ref()
                    .and_then(WidgetLease::handle)
                    .map(|handle| handle.with_challenge(input.challenge_token()))
            } else {
                None
            };
            (generation, inner.state.clone(), widget)
        };
        let _in_flight = InFlight { session: self, generation };

        let step = state.step;
        let result = match self.sequencer.validate(step, &input) {
            Ok(valid) => self
                .sequencer
                .execute(step, valid, &state, widget.as_ref())
                .await
                .map_err(StepFailure::from),
            Err(error) => Err(StepFailure::from(error)),
        };
        let call_failed = matches!(result, Err(StepFailure::Execution(_)));

        let applied = {
            let mut inner = self.lock();
            if inner.closed || inner.generation != generation {
                None
            } else {
                let next = self.sequencer.advance(&inner.state, result);
                inner.state = next.clone();

                if step == Step::PhoneEntry {
                    if call_failed {
                        inner.widget = None;
                        self.ensure_widget(&mut inner);
                    } else if next.step != Step::PhoneEntry {
                        inner.widget = None;
                    }
                }

                let signal = if next.is_complete() && !inner.completed {
                    inner.completed = true;
                    Some(FlowSignal::Complete { redirect: self.sequencer.flow().redirect() })
                } else {
                    None
                };
                Some(SubmitReport { state: next, signal })
            }
        };

        let context = self.audit_context(correlation_id);
        let Some(report) = applied else {
            debug!(
                event_name = "flow.stale_response_ignored",
                correlation_id,
                session_id = %self.session_id,
                flow = %self.kind(),
                step = %step,
                "response arrived after restart or close"
            );
            self.audit.emit(
                AuditEvent::new(
                    &context,
                    "flow.stale_response_ignored",
                    AuditCategory::Flow,
                    AuditOutcome::Ignored,
                )
                .with_metadata("step", step.as_str()),
            );
            return Err(SequencerError::Superseded);
        };

        match &report.state.error {
            Some(error) => self.audit.emit(
                AuditEvent::new(
                    &context,
                    "flow.step_rejected",
                    AuditCategory::for_step(step),
                    AuditOutcome::Rejected,
                )
                .with_metadata("step", step.as_str())
                .with_metadata("error", error.clone()),
            ),
            None => self.audit.emit(
                AuditEvent::new(
                    &context,
                    "flow.step_advanced",
                    AuditCategory::for_step(step),
                    AuditOutcome::Success,
                )
                .with_metadata("from", step.as_str())
                .with_metadata("to", report.state.step.as_str()),
            ),
        }
        if let Some(FlowSignal::Complete { redirect }) = &report.signal {
            self.audit.emit(
                AuditEvent::new(
                    &context,
                    "flow.completed",
                    AuditCategory::Flow,
                    AuditOutcome::Success,
                )
                .with_metadata("redirect", redirect.target.clone())
                .with_metadata("delay_ms", redirect.delay_ms.to_string()),
            );
        }

        Ok(report)
    }

    /// Back to the first step with a fresh widget. Always legal on an open
    /// session; any call still in flight is orphaned.
    pub fn restart(&self, correlation_id: &str) -> Result<FlowState, SequencerError> {
        let (from, state) = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(SequencerError::Closed);
            }
            let from = inner.state.step;
            inner.state = self.sequencer.restart(&inner.state);
            inner.generation += 1;
            inner.in_flight = None;
            inner.completed = false;
            inner.widget = None;
            self.ensure_widget(&mut inner);
            (from, inner.state.clone())
        };

        self.audit.emit(
            AuditEvent::new(
                &self.audit_context(correlation_id),
                "flow.restarted",
                AuditCategory::Flow,
                AuditOutcome::Success,
            )
            .with_metadata("from", from.as_str()),
        );
        Ok(state)
    }

    /// Discards the session. Late responses are ignored and the widget is released.
    pub fn close(&self, correlation_id: &str) {
        let step = {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            inner.generation += 1;
            inner.in_flight = None;
            inner.widget = None;
            inner.state.step
        };

        self.audit.emit(
            AuditEvent::new(
                &self.audit_context(correlation_id),
                "flow.closed",
                AuditCategory::Flow,
                AuditOutcome::Success,
            )
            .with_metadata("step", step.as_str()),
        );
    }

    fn ensure_widget(&self, inner: &mut SessionInner) {
        if inner.closed || inner.widget.is_some() || inner.state.step != Step::PhoneEntry {
            return;
        }
        inner.widget_attempts += 1;
        match WidgetLease::acquire(
            self.widgets.as_ref(),
            &self.widget_container,
            inner.widget_attempts,
        ) {
            Ok(lease) => inner.widget = Some(lease),
            Err(error) => warn!(
                event_name = "verification.widget.unavailable",
                session_id = %self.session_id,
                attempt = inner.widget_attempts,
                error = %error,
                "verification widget could not be created"
            ),
        }
    }

    fn audit_context(&self, correlation_id: &str) -> AuditContext {
        AuditContext::new(self.session_id.clone(), Some(self.kind()), correlation_id, ACTOR)
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Clears the in-flight mark when a submit finishes or is dropped, unless a
/// restart or close already handed the session to a newer generation.
struct InFlight<'a> {
    session: &'a FlowSession,
    generation: u64,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let mut inner = self.session.lock();
        if inner.in_flight == Some(self.generation) {
            inner.in_flight = None;
        }
    }
}

/// Performs the navigation a completed flow asks for.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, target: &str);
}

/// Waits out the redirect delay, then navigates.
pub async fn navigate_after(navigator: &dyn Navigator, signal: &FlowSignal) {
    let FlowSignal::Complete { redirect } = signal;
    tokio::time::sleep(redirect.delay()).await;
    navigator.navigate(&redirect.target).await;
}

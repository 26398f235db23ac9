//! Per-call listener state machine.
//!
//! One [`CallListener`] exists per active RPC invocation. The transport
//! feeds it message/completion/error events in arrival order; the listener
//! dispatches them to the bound callbacks and enforces the terminal-state
//! discipline: exactly one completion or error per call, after which every
//! further event is an observable no-op.
//!
//! # State machine
//!
//! `NEW` (constructed, no messages yet) → `ACTIVE` (messages delivered) →
//! `COMPLETED` | `ERRORED` (absorbing). Transitions are a single
//! compare-exchange on an atomic state word; no wider critical section is
//! held across callback invocations.
//!
//! # Thread safety
//!
//! A listener is exclusively owned by its call's execution unit, but it is
//! `Send + Sync` and its transitions are atomic, so delivery may hop
//! threads between events.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use crate::error::CallError;
use crate::handler::{CallContext, CallbackTable};
use crate::message::Message;
use crate::method::MethodKind;

/// Lifecycle states of a [`CallListener`].
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerState {
    /// Constructed, no message delivered yet.
    New = 0,
    /// At least one message delivered, completion pending.
    Active = 1,
    /// Completed normally. Absorbing.
    Completed = 2,
    /// Terminated by the error path. Absorbing.
    Errored = 3,
}

impl ListenerState {
    fn from_u8(val: u8) -> ListenerState {
        match val {
            0 => ListenerState::New,
            1 => ListenerState::Active,
            2 => ListenerState::Completed,
            _ => ListenerState::Errored,
        }
    }

    /// Whether this state is absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(self, ListenerState::Completed | ListenerState::Errored)
    }
}

/// Per-active-call state machine receiving ordered events from the
/// transport and dispatching them to the bound callbacks.
///
/// Created by a [`ServerCallHandler`](crate::ServerCallHandler) for exactly
/// one call; never persisted or reused across calls.
pub struct CallListener {
    ctx: CallContext,
    callbacks: Arc<CallbackTable>,
    state: AtomicU8,
    messages_seen: AtomicU32,
    /// Inbound message budget: `Some(1)` for single-request shapes,
    /// `None` (unbounded) for client-streaming shapes.
    message_budget: Option<u32>,
}

impl CallListener {
    /// Create a listener for one call over the given callback table.
    pub fn new(ctx: CallContext, kind: MethodKind, callbacks: Arc<CallbackTable>) -> Self {
        let message_budget = if kind.client_streams() { None } else { Some(1) };
        CallListener {
            ctx,
            callbacks,
            state: AtomicU8::new(ListenerState::New as u8),
            messages_seen: AtomicU32::new(0),
            message_budget,
        }
    }

    /// The context of the call this listener serves.
    pub fn context(&self) -> &CallContext {
        &self.ctx
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ListenerState {
        ListenerState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the call has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Deliver one inbound message.
    ///
    /// Legal in `NEW` or `ACTIVE`. Dispatches the on-message callback and
    /// moves `NEW` → `ACTIVE`. A message beyond the shape's budget (e.g. a
    /// second message on a unary call) is a protocol violation: it is
    /// routed to the error path, never to on-message.
    pub fn on_message(&self, message: Message) {
        if self.is_terminal() {
            self.note_late_event("message");
            return;
        }

        let seen = self.messages_seen.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(budget) = self.message_budget
            && seen > budget
        {
            self.fail(CallError::protocol_violation(format!(
                "{} call {} accepts {} inbound message(s), got {}",
                self.ctx.kind(),
                self.ctx.full_method_name(),
                budget,
                seen
            )));
            return;
        }

        let _ = self.state.compare_exchange(
            ListenerState::New as u8,
            ListenerState::Active as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );

        if let Some(on_message) = &self.callbacks.on_message {
            if let Err(err) = on_message(&self.ctx, message) {
                self.fail(CallError::callback_failure(format!(
                    "on-message callback failed: {}",
                    err
                )));
            }
        }
    }

    /// Deliver normal end-of-call.
    ///
    /// Legal in `ACTIVE`, or in `NEW` for a zero-message stream.
    /// Dispatches the on-complete callback exactly once, then moves to
    /// `COMPLETED`. On an already-terminal listener this is an observable
    /// no-op.
    pub fn on_complete(&self) {
        if !self.transition_terminal(ListenerState::Completed) {
            self.note_late_event("complete");
            return;
        }

        if let Some(on_complete) = &self.callbacks.on_complete {
            if let Err(err) = on_complete(&self.ctx) {
                // The call is already terminal; a failing on-complete
                // cannot re-terminate it. Same swallow policy as a failing
                // on-error callback.
                tracing::warn!(
                    call_id = self.ctx.call_id(),
                    method = self.ctx.full_method_name(),
                    error = %err,
                    "on-complete callback failed after completion; swallowed"
                );
            }
        }
    }

    /// Deliver the error path.
    ///
    /// Legal from any non-terminal state. Dispatches the on-error callback
    /// exactly once, then moves to `ERRORED`. Cancellation is modeled as an
    /// error event with a cancellation code. On an already-terminal
    /// listener this is an observable no-op.
    pub fn on_error(&self, error: CallError) {
        if !self.transition_terminal(ListenerState::Errored) {
            self.note_late_event("error");
            return;
        }
        self.dispatch_error(&error);
    }

    /// Internal error path for protocol violations and callback failures.
    fn fail(&self, error: CallError) {
        if !self.transition_terminal(ListenerState::Errored) {
            // Lost the race against a concurrent terminal event.
            self.note_late_event("internal-error");
            return;
        }
        self.dispatch_error(&error);
    }

    fn dispatch_error(&self, error: &CallError) {
        tracing::debug!(
            call_id = self.ctx.call_id(),
            method = self.ctx.full_method_name(),
            code = %error.code(),
            "call errored"
        );
        if let Some(on_error) = &self.callbacks.on_error {
            if let Err(nested) = on_error(&self.ctx, error) {
                tracing::warn!(
                    call_id = self.ctx.call_id(),
                    method = self.ctx.full_method_name(),
                    error = %nested,
                    "on-error callback failed; swallowed"
                );
            }
        }
    }

    /// Move to a terminal state. Returns false if the listener was already
    /// terminal; exactly one caller wins per call.
    fn transition_terminal(&self, to: ListenerState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if ListenerState::from_u8(current).is_terminal() {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    fn note_late_event(&self, event: &str) {
        tracing::debug!(
            call_id = self.ctx.call_id(),
            method = self.ctx.full_method_name(),
            state = ?self.state(),
            event,
            "event delivered to terminal listener; ignored"
        );
    }
}

impl std::fmt::Debug for CallListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallListener")
            .field("ctx", &self.ctx)
            .field("state", &self.state())
            .field("message_budget", &self.message_budget)
            .finish()
    }
}

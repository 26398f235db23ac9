//! Call dispatch: binds the frozen registry to a transport's event feed.
//!
//! The transport resolves each inbound call through [`CallDispatcher`]:
//! `start_call` looks up the method, asks the bound handler for a
//! listener, and spawns one task per call that drains a per-call event
//! queue into the listener in arrival order. Calls are independent: a
//! failing call terminates its own listener and nothing else.
//!
//! Cancellation (peer disconnect, deadline) is not a separate state
//! machine; it is delivered as an error-kind event via [`CallDispatcher::cancel`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{CallError, ErrorCode};
use crate::handler::CallContext;
use crate::listener::CallListener;
use crate::message::Message;
use crate::registry::ServicesRegistry;

/// Default per-call event queue capacity.
const DEFAULT_QUEUE_DEPTH: usize = 64;

/// One transport event for a single active call.
///
/// These are the only three event types the transport may deliver.
#[derive(Debug)]
pub enum CallEvent {
    /// An inbound message.
    Message(Message),
    /// End of input: the call completes normally.
    Complete,
    /// The call fails, including transport-reported cancellation.
    Error(CallError),
}

type ActiveCalls = Arc<Mutex<HashMap<u64, mpsc::Sender<CallEvent>>>>;

/// Routes inbound calls and their events to per-call listeners.
///
/// One independent tokio task runs per active call; the only shared data
/// is the frozen registry (read-only, no locking) and the active-call
/// table, whose mutex guards map access only and is never held across an
/// await or a callback.
///
/// Methods that spawn (`start_call`) must run inside a tokio runtime.
pub struct CallDispatcher {
    registry: Arc<ServicesRegistry>,
    active: ActiveCalls,
    queue_depth: usize,
}

impl CallDispatcher {
    /// Create a dispatcher over a frozen registry.
    pub fn new(registry: Arc<ServicesRegistry>) -> Self {
        Self::with_queue_depth(registry, DEFAULT_QUEUE_DEPTH)
    }

    /// Create a dispatcher with a custom per-call event queue capacity.
    pub fn with_queue_depth(registry: Arc<ServicesRegistry>, queue_depth: usize) -> Self {
        CallDispatcher {
            registry,
            active: Arc::new(Mutex::new(HashMap::new())),
            queue_depth: queue_depth.max(1),
        }
    }

    /// The registry this dispatcher routes against.
    pub fn registry(&self) -> &Arc<ServicesRegistry> {
        &self.registry
    }

    /// Number of currently active calls.
    pub fn active_calls(&self) -> usize {
        self.active.lock().len()
    }

    /// Whether the given call is still active.
    pub fn is_active(&self, call_id: u64) -> bool {
        self.active.lock().contains_key(&call_id)
    }

    /// Begin one inbound call.
    ///
    /// Resolves the fully-qualified method name, invokes the bound
    /// handler's `start_call` exactly once, and spawns the per-call event
    /// task. On error the call never starts, no task is spawned, and no
    /// callback has been invoked; the transport should report the error to
    /// the originator.
    pub fn start_call(&self, call_id: u64, full_method_name: &str) -> Result<(), CallError> {
        let def = self
            .registry
            .lookup(full_method_name)
            .ok_or_else(|| CallError::unimplemented(full_method_name))?;

        // Reserve the call id before invoking the handler, so a duplicate
        // id never reaches user code and no lock is held across it.
        let (tx, rx) = mpsc::channel(self.queue_depth);
        {
            let mut active = self.active.lock();
            if active.contains_key(&call_id) {
                return Err(CallError::protocol_violation(format!(
                    "call id {} is already active",
                    call_id
                )));
            }
            active.insert(call_id, tx);
        }

        let ctx = CallContext::new(
            call_id,
            def.descriptor().full_method_name_arc(),
            def.descriptor().kind(),
        );
        let listener = match def.start_call(ctx) {
            Ok(listener) => listener,
            Err(err) => {
                self.active.lock().remove(&call_id);
                return Err(err);
            }
        };

        tracing::trace!(call_id, method = full_method_name, "call started");
        tokio::spawn(drive_call(call_id, listener, rx, self.active.clone()));
        Ok(())
    }

    /// Deliver one event to an active call.
    ///
    /// Events for unknown or already-finished calls are dropped as
    /// observable no-ops: the race between a terminal event and a late
    /// transport frame is normal. A full event queue surfaces as
    /// `ResourceExhausted` so the transport can apply backpressure.
    pub fn deliver(&self, call_id: u64, event: CallEvent) -> Result<(), CallError> {
        let tx = match self.active.lock().get(&call_id) {
            Some(tx) => tx.clone(),
            None => {
                tracing::debug!(call_id, ?event, "event for unknown or finished call; dropped");
                return Ok(());
            }
        };

        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => Err(CallError::new(
                ErrorCode::ResourceExhausted,
                format!("event queue full for call {}: {:?}", call_id, event),
            )),
            Err(TrySendError::Closed(event)) => {
                tracing::debug!(call_id, ?event, "event for finished call; dropped");
                Ok(())
            }
        }
    }

    /// Cancel an active call.
    ///
    /// Routed as an error-kind event; the terminal-state rule then applies
    /// identically to any other error.
    pub fn cancel(&self, call_id: u64, reason: impl Into<String>) -> Result<(), CallError> {
        self.deliver(call_id, CallEvent::Error(CallError::cancelled(reason)))
    }
}

impl std::fmt::Debug for CallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDispatcher")
            .field("services", &self.registry.service_count())
            .field("active_calls", &self.active_calls())
            .field("queue_depth", &self.queue_depth)
            .finish()
    }
}

/// Per-call task: drain the event queue into the listener in arrival
/// order until a terminal event lands, then retire the call.
async fn drive_call(
    call_id: u64,
    listener: CallListener,
    mut rx: mpsc::Receiver<CallEvent>,
    active: ActiveCalls,
) {
    while let Some(event) = rx.recv().await {
        match event {
            CallEvent::Message(message) => listener.on_message(message),
            CallEvent::Complete => listener.on_complete(),
            CallEvent::Error(error) => listener.on_error(error),
        }
        if listener.is_terminal() {
            break;
        }
    }

    active.lock().remove(&call_id);
    tracing::trace!(
        call_id,
        method = listener.context().full_method_name(),
        state = ?listener.state(),
        "call retired"
    );
}

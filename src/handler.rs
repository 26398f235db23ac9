//! Call handlers: the capability that turns an inbound call into a
//! per-call listener.
//!
//! A [`ServerCallHandler`] is bound to one method at registration time and
//! invoked exactly once per inbound call, after name resolution. The
//! standard implementation, [`CallbackHandler`], builds listeners over a
//! fixed [`CallbackTable`]; custom handlers can construct listeners (or
//! refuse calls) however they like.

use std::fmt;
use std::sync::Arc;

use crate::error::{CallError, RegistryError};
use crate::listener::CallListener;
use crate::message::Message;
use crate::method::MethodKind;

/// Identifies which user callback a call event is routed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackRole {
    /// Invoked once per inbound message.
    OnMessage,
    /// Invoked when the call completes normally.
    OnComplete,
    /// Invoked when the call errors (protocol violation, callback
    /// failure, or cancellation).
    OnError,
}

impl fmt::Display for CallbackRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallbackRole::OnMessage => "on-message",
            CallbackRole::OnComplete => "on-complete",
            CallbackRole::OnError => "on-error",
        };
        write!(f, "{}", name)
    }
}

/// User target for inbound messages.
pub type MessageCallback = dyn Fn(&CallContext, Message) -> Result<(), CallError> + Send + Sync;

/// User target for normal completion.
pub type CompleteCallback = dyn Fn(&CallContext) -> Result<(), CallError> + Send + Sync;

/// User target for the error path. A failure returned from this callback
/// is logged and swallowed; it never propagates past the listener.
pub type ErrorCallback = dyn Fn(&CallContext, &CallError) -> Result<(), CallError> + Send + Sync;

/// Per-method table binding callback roles to user targets.
///
/// Populated once when the method is bound, read-only thereafter. Every
/// role is optional: an event for an absent role is a silent no-op for
/// that role only.
#[derive(Clone, Default)]
pub struct CallbackTable {
    pub(crate) on_message: Option<Arc<MessageCallback>>,
    pub(crate) on_complete: Option<Arc<CompleteCallback>>,
    pub(crate) on_error: Option<Arc<ErrorCallback>>,
}

impl CallbackTable {
    /// Start building a callback table.
    pub fn builder() -> CallbackTableBuilder {
        CallbackTableBuilder {
            table: CallbackTable::default(),
        }
    }

    /// Whether a target is bound for the given role.
    pub fn has(&self, role: CallbackRole) -> bool {
        match role {
            CallbackRole::OnMessage => self.on_message.is_some(),
            CallbackRole::OnComplete => self.on_complete.is_some(),
            CallbackRole::OnError => self.on_error.is_some(),
        }
    }
}

impl fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTable")
            .field("on_message", &self.on_message.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Builder for [`CallbackTable`].
pub struct CallbackTableBuilder {
    table: CallbackTable,
}

impl CallbackTableBuilder {
    /// Bind the on-message target.
    pub fn on_message(
        mut self,
        callback: impl Fn(&CallContext, Message) -> Result<(), CallError> + Send + Sync + 'static,
    ) -> Self {
        self.table.on_message = Some(Arc::new(callback));
        self
    }

    /// Bind the on-complete target.
    pub fn on_complete(
        mut self,
        callback: impl Fn(&CallContext) -> Result<(), CallError> + Send + Sync + 'static,
    ) -> Self {
        self.table.on_complete = Some(Arc::new(callback));
        self
    }

    /// Bind the on-error target.
    pub fn on_error(
        mut self,
        callback: impl Fn(&CallContext, &CallError) -> Result<(), CallError>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        self.table.on_error = Some(Arc::new(callback));
        self
    }

    /// Freeze the table.
    pub fn build(self) -> CallbackTable {
        self.table
    }
}

/// Per-call context handed to the handler and to every callback.
#[derive(Clone, Debug)]
pub struct CallContext {
    call_id: u64,
    full_method_name: Arc<str>,
    kind: MethodKind,
}

impl CallContext {
    /// Create a context for one inbound call.
    pub fn new(call_id: u64, full_method_name: impl Into<Arc<str>>, kind: MethodKind) -> Self {
        CallContext {
            call_id,
            full_method_name: full_method_name.into(),
            kind,
        }
    }

    /// Transport-assigned identifier for this call.
    pub fn call_id(&self) -> u64 {
        self.call_id
    }

    /// Fully-qualified name of the invoked method.
    pub fn full_method_name(&self) -> &str {
        &self.full_method_name
    }

    /// Call shape of the invoked method.
    pub fn kind(&self) -> MethodKind {
        self.kind
    }
}

/// Capability bound to one method: given a call context, produce a
/// per-call listener.
///
/// `start_call` is invoked exactly once per inbound call, after successful
/// name resolution. If it fails, the call never starts: the transport
/// reports the error to the originator and no callback is invoked.
pub trait ServerCallHandler: Send + Sync {
    /// Begin one inbound call.
    fn start_call(&self, ctx: CallContext) -> Result<CallListener, CallError>;
}

/// Standard [`ServerCallHandler`]: builds listeners over a fixed callback
/// table.
pub struct CallbackHandler {
    kind: MethodKind,
    callbacks: Arc<CallbackTable>,
}

impl CallbackHandler {
    /// Bind a callback table to a call shape.
    ///
    /// Client-streaming shapes expect a stream of inbound messages, so an
    /// on-message target is required for them; for other shapes and roles
    /// an absent callback is tolerated.
    pub fn new(kind: MethodKind, callbacks: CallbackTable) -> Result<Self, RegistryError> {
        if kind.client_streams() && !callbacks.has(CallbackRole::OnMessage) {
            return Err(RegistryError::MissingOnMessage(kind));
        }
        Ok(CallbackHandler {
            kind,
            callbacks: Arc::new(callbacks),
        })
    }

    /// The call shape this handler serves.
    pub fn kind(&self) -> MethodKind {
        self.kind
    }
}

impl ServerCallHandler for CallbackHandler {
    fn start_call(&self, ctx: CallContext) -> Result<CallListener, CallError> {
        Ok(CallListener::new(ctx, self.kind, self.callbacks.clone()))
    }
}

impl fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("kind", &self.kind)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_report_bound_targets() {
        let table = CallbackTable::builder()
            .on_message(|_, _| Ok(()))
            .build();

        assert!(table.has(CallbackRole::OnMessage));
        assert!(!table.has(CallbackRole::OnComplete));
        assert!(!table.has(CallbackRole::OnError));
    }

    #[test]
    fn client_streaming_requires_on_message() {
        let err = CallbackHandler::new(MethodKind::ClientStreaming, CallbackTable::default())
            .err()
            .unwrap();
        assert_eq!(
            err,
            RegistryError::MissingOnMessage(MethodKind::ClientStreaming)
        );

        // Unary tolerates a fully absent table.
        assert!(CallbackHandler::new(MethodKind::Unary, CallbackTable::default()).is_ok());
    }

    #[test]
    fn handler_starts_listener() {
        let handler = CallbackHandler::new(
            MethodKind::Unary,
            CallbackTable::builder().on_message(|_, _| Ok(())).build(),
        )
        .unwrap();

        let ctx = CallContext::new(7, "pkg.Greeter/SayHello", MethodKind::Unary);
        let listener = handler.start_call(ctx).unwrap();
        assert_eq!(listener.context().call_id(), 7);
        assert_eq!(listener.context().full_method_name(), "pkg.Greeter/SayHello");
    }
}

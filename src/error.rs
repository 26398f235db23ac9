use std::fmt;

use crate::method::MethodKind;

/// Status codes carried by call-time errors.
///
/// Values follow the gRPC status numbering so they can be forwarded to a
/// peer unchanged.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The call was cancelled (peer disconnect, deadline, explicit cancel).
    Cancelled = 1,
    /// The client supplied an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the call completed.
    DeadlineExceeded = 4,
    /// A per-call resource (e.g. the event queue) is exhausted.
    ResourceExhausted = 8,
    /// The call is in a state where the operation is not allowed.
    FailedPrecondition = 9,
    /// No handler is bound for the requested method.
    Unimplemented = 12,
    /// Internal failure, e.g. a user callback failed.
    Internal = 13,
    /// The call target is currently unavailable.
    Unavailable = 14,
}

impl ErrorCode {
    /// Convert from a u32 wire value.
    /// Returns None if the value doesn't match a known code.
    pub fn from_u32(val: u32) -> Option<Self> {
        Some(match val {
            1 => ErrorCode::Cancelled,
            3 => ErrorCode::InvalidArgument,
            4 => ErrorCode::DeadlineExceeded,
            8 => ErrorCode::ResourceExhausted,
            9 => ErrorCode::FailedPrecondition,
            12 => ErrorCode::Unimplemented,
            13 => ErrorCode::Internal,
            14 => ErrorCode::Unavailable,
            _ => return None,
        })
    }

    /// Convert to u32 for wire transmission.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::DeadlineExceeded => "deadline exceeded",
            ErrorCode::ResourceExhausted => "resource exhausted",
            ErrorCode::FailedPrecondition => "failed precondition",
            ErrorCode::Unimplemented => "unimplemented",
            ErrorCode::Internal => "internal",
            ErrorCode::Unavailable => "unavailable",
        };
        write!(f, "{}", name)
    }
}

/// Error type for registry construction.
///
/// These are fatal configuration errors: they surface synchronously during
/// `add_method`/`build`, before the service accepts any traffic. A registry
/// is never left partially usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Service name is empty.
    EmptyServiceName,
    /// Fully-qualified method name is not `"<service>/<method>"` with both
    /// halves non-empty and exactly one separator.
    MalformedMethodName(String),
    /// A method's service prefix disagrees with the builder's service name.
    ServiceNameMismatch {
        /// The builder's (or descriptor's) service name.
        expected: String,
        /// The service prefix extracted from the method name.
        actual: String,
        /// The offending fully-qualified method name.
        method: String,
    },
    /// A method with the same fully-qualified name was already added.
    DuplicateMethod(String),
    /// A descriptor entry has no corresponding bound method.
    UnboundDescriptorMethod(String),
    /// A bound method does not appear in the supplied descriptor.
    UnknownMethodBinding(String),
    /// Two services with the same name were merged into one registry.
    DuplicateService(String),
    /// A client-streaming binding has no on-message callback.
    MissingOnMessage(MethodKind),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::EmptyServiceName => write!(f, "service name cannot be empty"),
            RegistryError::MalformedMethodName(name) => write!(
                f,
                "malformed method name {:?}: expected \"<service>/<method>\" with exactly one '/' \
                 and both halves non-empty",
                name
            ),
            RegistryError::ServiceNameMismatch {
                expected,
                actual,
                method,
            } => write!(
                f,
                "method name must be prefixed with the service name and separated with '/': \
                 expected service name '{}', actual service name '{}' \
                 (fully-qualified method name '{}')",
                expected, actual, method
            ),
            RegistryError::DuplicateMethod(name) => {
                write!(f, "method by the same name already registered: {}", name)
            }
            RegistryError::UnboundDescriptorMethod(name) => {
                write!(f, "no method bound for descriptor entry {}", name)
            }
            RegistryError::UnknownMethodBinding(name) => {
                write!(f, "no entry in descriptor matching bound method {}", name)
            }
            RegistryError::DuplicateService(name) => {
                write!(f, "service by the same name already registered: {}", name)
            }
            RegistryError::MissingOnMessage(kind) => write!(
                f,
                "{} methods require an on-message callback",
                kind
            ),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Error delivered on a single call's error path.
///
/// A `CallError` never escapes the dispatch engine: protocol violations,
/// user-callback failures, and transport-reported cancellations all become
/// exactly one `on_error` delivery for that call. Sibling calls and the
/// host process are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    code: ErrorCode,
    message: String,
}

impl CallError {
    /// Create a call error with an explicit status code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        CallError {
            code,
            message: message.into(),
        }
    }

    /// The call was cancelled by the peer, a deadline, or the host.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        CallError::new(ErrorCode::Cancelled, reason)
    }

    /// The transport delivered an event sequence the call shape forbids.
    pub fn protocol_violation(detail: impl Into<String>) -> Self {
        CallError::new(ErrorCode::FailedPrecondition, detail)
    }

    /// A user callback failed while handling an event.
    pub fn callback_failure(detail: impl Into<String>) -> Self {
        CallError::new(ErrorCode::Internal, detail)
    }

    /// No handler is bound for the requested method name.
    pub fn unimplemented(method: impl fmt::Display) -> Self {
        CallError::new(
            ErrorCode::Unimplemented,
            format!("no handler registered for method {}", method),
        )
    }

    /// The call's deadline expired; routed like any other cancellation.
    pub fn deadline_exceeded(detail: impl Into<String>) -> Self {
        CallError::new(ErrorCode::DeadlineExceeded, detail)
    }

    /// Status code for this error.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable detail.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CallError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_roundtrip() {
        for code in [
            ErrorCode::Cancelled,
            ErrorCode::InvalidArgument,
            ErrorCode::DeadlineExceeded,
            ErrorCode::ResourceExhausted,
            ErrorCode::FailedPrecondition,
            ErrorCode::Unimplemented,
            ErrorCode::Internal,
            ErrorCode::Unavailable,
        ] {
            assert_eq!(ErrorCode::from_u32(code.as_u32()), Some(code));
        }

        assert_eq!(ErrorCode::from_u32(999), None);
    }

    #[test]
    fn error_code_values_match_grpc() {
        assert_eq!(ErrorCode::Cancelled as u32, 1);
        assert_eq!(ErrorCode::DeadlineExceeded as u32, 4);
        assert_eq!(ErrorCode::Unimplemented as u32, 12);
        assert_eq!(ErrorCode::Internal as u32, 13);
    }

    #[test]
    fn mismatch_message_names_both_services() {
        let err = RegistryError::ServiceNameMismatch {
            expected: "pkg.Greeter".into(),
            actual: "pkg.Other".into(),
            method: "pkg.Other/Op".into(),
        };
        let s = err.to_string();
        assert!(s.contains("pkg.Greeter"));
        assert!(s.contains("pkg.Other"));
        assert!(s.contains("pkg.Other/Op"));
    }

    #[test]
    fn duplicate_method_message_names_method() {
        let err = RegistryError::DuplicateMethod("pkg.Greeter/SayHello".into());
        assert!(err.to_string().contains("pkg.Greeter/SayHello"));
    }

    #[test]
    fn call_error_display() {
        let err = CallError::cancelled("peer disconnected");
        let s = err.to_string();
        assert!(s.contains("cancelled"));
        assert!(s.contains("peer disconnected"));

        assert_eq!(
            CallError::unimplemented("pkg.Greeter/Missing").code(),
            ErrorCode::Unimplemented
        );
    }
}

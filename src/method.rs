//! Method identity: fully-qualified names and call shapes.

use std::fmt;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::message::Marshaller;

/// RPC method kind (streaming semantics).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Unary RPC: single request, single response.
    Unary = 0,
    /// Client streaming: multiple requests, single response.
    ClientStreaming = 1,
    /// Server streaming: single request, multiple responses.
    ServerStreaming = 2,
    /// Bidirectional streaming: multiple requests and responses.
    BidiStreaming = 3,
}

impl MethodKind {
    /// Convert from u32 wire value.
    pub fn from_u32(val: u32) -> Option<Self> {
        match val {
            0 => Some(MethodKind::Unary),
            1 => Some(MethodKind::ClientStreaming),
            2 => Some(MethodKind::ServerStreaming),
            3 => Some(MethodKind::BidiStreaming),
            _ => None,
        }
    }

    /// Convert to u32 for wire transmission.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Whether the client sends a stream of request messages.
    ///
    /// Non-streaming shapes accept exactly one inbound message per call.
    pub fn client_streams(self) -> bool {
        matches!(self, MethodKind::ClientStreaming | MethodKind::BidiStreaming)
    }

    /// Whether the server sends a stream of response messages.
    pub fn server_streams(self) -> bool {
        matches!(self, MethodKind::ServerStreaming | MethodKind::BidiStreaming)
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MethodKind::Unary => "unary",
            MethodKind::ClientStreaming => "client-streaming",
            MethodKind::ServerStreaming => "server-streaming",
            MethodKind::BidiStreaming => "bidi-streaming",
        };
        write!(f, "{}", name)
    }
}

/// Split a fully-qualified method name into service and method halves.
///
/// The wire contract is `"<fully.qualified.ServiceName>/<MethodName>"`,
/// split on the first `/`. Both halves must be non-empty, and the method
/// half must not itself contain a separator.
pub(crate) fn split_full_method_name(full: &str) -> Result<(&str, &str), RegistryError> {
    match full.split_once('/') {
        Some((service, method))
            if !service.is_empty() && !method.is_empty() && !method.contains('/') =>
        {
            Ok((service, method))
        }
        _ => Err(RegistryError::MalformedMethodName(full.to_string())),
    }
}

/// Extract the service-name prefix from a fully-qualified method name.
///
/// E.g. `"pkg.Greeter/SayHello"` yields `"pkg.Greeter"`. Fails with a
/// naming error if the separator is missing or either half is empty.
pub fn extract_service_name(full_method_name: &str) -> Result<&str, RegistryError> {
    split_full_method_name(full_method_name).map(|(service, _)| service)
}

/// Immutable identity and marshalling contract for one RPC method.
///
/// A descriptor names the method (`"<service>/<method>"`), classifies its
/// call shape, and carries one [`Marshaller`] per direction. Descriptors
/// are cheap to clone and shared by reference across all calls to the
/// method.
#[derive(Clone)]
pub struct MethodDescriptor {
    full_method_name: Arc<str>,
    kind: MethodKind,
    request_marshaller: Arc<dyn Marshaller>,
    response_marshaller: Arc<dyn Marshaller>,
}

impl MethodDescriptor {
    /// Create a descriptor, validating the fully-qualified name.
    pub fn new(
        full_method_name: impl Into<String>,
        kind: MethodKind,
        request_marshaller: Arc<dyn Marshaller>,
        response_marshaller: Arc<dyn Marshaller>,
    ) -> Result<Self, RegistryError> {
        let full_method_name = full_method_name.into();
        split_full_method_name(&full_method_name)?;
        Ok(MethodDescriptor {
            full_method_name: full_method_name.into(),
            kind,
            request_marshaller,
            response_marshaller,
        })
    }

    /// The fully-qualified name, e.g. `"pkg.Greeter/SayHello"`.
    pub fn full_method_name(&self) -> &str {
        &self.full_method_name
    }

    /// The service-name prefix of the fully-qualified name.
    pub fn service_name(&self) -> &str {
        // Validated at construction; the separator is always present.
        self.full_method_name
            .split_once('/')
            .map(|(service, _)| service)
            .unwrap_or("")
    }

    /// The bare method name, without the service prefix.
    pub fn method_name(&self) -> &str {
        self.full_method_name
            .split_once('/')
            .map(|(_, method)| method)
            .unwrap_or("")
    }

    /// Call shape of this method.
    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    /// Marshaller for inbound request messages.
    pub fn request_marshaller(&self) -> &Arc<dyn Marshaller> {
        &self.request_marshaller
    }

    /// Marshaller for outbound response messages.
    pub fn response_marshaller(&self) -> &Arc<dyn Marshaller> {
        &self.response_marshaller
    }

    pub(crate) fn full_method_name_arc(&self) -> Arc<str> {
        self.full_method_name.clone()
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("full_method_name", &self.full_method_name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IdentityMarshaller;

    fn descriptor(name: &str, kind: MethodKind) -> Result<MethodDescriptor, RegistryError> {
        MethodDescriptor::new(
            name,
            kind,
            Arc::new(IdentityMarshaller),
            Arc::new(IdentityMarshaller),
        )
    }

    #[test]
    fn extract_service_name_splits_on_separator() {
        assert_eq!(
            extract_service_name("pkg.Greeter/SayHello").unwrap(),
            "pkg.Greeter"
        );
    }

    #[test]
    fn malformed_names_rejected() {
        for bad in ["", "NoSeparator", "/Method", "pkg.Greeter/", "a/b/c", "/"] {
            assert_eq!(
                extract_service_name(bad),
                Err(RegistryError::MalformedMethodName(bad.to_string())),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn descriptor_accessors() {
        let desc = descriptor("pkg.Greeter/SayHello", MethodKind::Unary).unwrap();
        assert_eq!(desc.full_method_name(), "pkg.Greeter/SayHello");
        assert_eq!(desc.service_name(), "pkg.Greeter");
        assert_eq!(desc.method_name(), "SayHello");
        assert_eq!(desc.kind(), MethodKind::Unary);
    }

    #[test]
    fn descriptor_rejects_malformed_name() {
        assert!(descriptor("NoSeparator", MethodKind::Unary).is_err());
    }

    #[test]
    fn method_kind_roundtrip() {
        for kind in [
            MethodKind::Unary,
            MethodKind::ClientStreaming,
            MethodKind::ServerStreaming,
            MethodKind::BidiStreaming,
        ] {
            assert_eq!(MethodKind::from_u32(kind.as_u32()), Some(kind));
        }

        assert_eq!(MethodKind::from_u32(999), None);
    }

    #[test]
    fn streaming_classification() {
        assert!(!MethodKind::Unary.client_streams());
        assert!(!MethodKind::ServerStreaming.client_streams());
        assert!(MethodKind::ClientStreaming.client_streams());
        assert!(MethodKind::BidiStreaming.client_streams());

        assert!(MethodKind::ServerStreaming.server_streams());
        assert!(MethodKind::BidiStreaming.server_streams());
        assert!(!MethodKind::Unary.server_streams());
    }
}

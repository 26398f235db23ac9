//! Service descriptors: named, validated method collections.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::method::MethodDescriptor;

#[derive(Debug)]
struct ServiceDescriptorInner {
    name: String,
    methods: Vec<MethodDescriptor>,
}

/// Immutable named collection of [`MethodDescriptor`]s.
///
/// Constructed once at registration time and shared by cheap clone across
/// all calls to the service. Every contained method's service prefix must
/// equal the descriptor's name, and method names are unique within the
/// sequence; both are checked at construction.
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    inner: Arc<ServiceDescriptorInner>,
}

impl ServiceDescriptor {
    /// Create a descriptor over the given methods, in the given order.
    pub fn new(
        name: impl Into<String>,
        methods: Vec<MethodDescriptor>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if name.is_empty() {
            return Err(RegistryError::EmptyServiceName);
        }

        let mut seen = HashSet::with_capacity(methods.len());
        for method in &methods {
            if method.service_name() != name {
                return Err(RegistryError::ServiceNameMismatch {
                    expected: name,
                    actual: method.service_name().to_string(),
                    method: method.full_method_name().to_string(),
                });
            }
            if !seen.insert(method.full_method_name().to_string()) {
                return Err(RegistryError::DuplicateMethod(
                    method.full_method_name().to_string(),
                ));
            }
        }

        Ok(ServiceDescriptor {
            inner: Arc::new(ServiceDescriptorInner { name, methods }),
        })
    }

    /// Service name, e.g. `"pkg.Greeter"`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Method descriptors in declaration order.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.inner.methods
    }

    /// Number of declared methods.
    pub fn method_count(&self) -> usize {
        self.inner.methods.len()
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} methods)",
            self.inner.name,
            self.inner.methods.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IdentityMarshaller;
    use crate::method::MethodKind;

    fn method(name: &str) -> MethodDescriptor {
        MethodDescriptor::new(
            name,
            MethodKind::Unary,
            Arc::new(IdentityMarshaller),
            Arc::new(IdentityMarshaller),
        )
        .unwrap()
    }

    #[test]
    fn valid_descriptor() {
        let desc = ServiceDescriptor::new(
            "pkg.Greeter",
            vec![method("pkg.Greeter/SayHello"), method("pkg.Greeter/Wave")],
        )
        .unwrap();

        assert_eq!(desc.name(), "pkg.Greeter");
        assert_eq!(desc.method_count(), 2);
        assert_eq!(desc.methods()[0].method_name(), "SayHello");
        assert_eq!(desc.methods()[1].method_name(), "Wave");
    }

    #[test]
    fn empty_name_rejected() {
        assert_eq!(
            ServiceDescriptor::new("", vec![]).err(),
            Some(RegistryError::EmptyServiceName)
        );
    }

    #[test]
    fn prefix_mismatch_rejected() {
        let err = ServiceDescriptor::new("pkg.Greeter", vec![method("pkg.Other/Op")])
            .err()
            .unwrap();
        match err {
            RegistryError::ServiceNameMismatch {
                expected, actual, ..
            } => {
                assert_eq!(expected, "pkg.Greeter");
                assert_eq!(actual, "pkg.Other");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn duplicate_method_rejected() {
        let err = ServiceDescriptor::new(
            "pkg.Greeter",
            vec![method("pkg.Greeter/SayHello"), method("pkg.Greeter/SayHello")],
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            RegistryError::DuplicateMethod("pkg.Greeter/SayHello".into())
        );
    }

    #[test]
    fn zero_method_descriptor_is_legal() {
        let desc = ServiceDescriptor::new("pkg.Empty", vec![]).unwrap();
        assert_eq!(desc.method_count(), 0);
    }
}

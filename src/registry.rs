//! Service registries: frozen method-name-to-handler tables.
//!
//! A [`ServerServiceDefinition`] is built in two phases: a
//! [`ServiceDefinitionBuilder`]
//! accumulates method bindings (rejecting duplicates eagerly), then
//! `build()` validates them against a service descriptor — either derived
//! from the accumulated methods or supplied up front — and freezes an
//! immutable lookup table. The frozen table's key set always equals the
//! descriptor's method-name set exactly; the fixed-descriptor path checks
//! the bijection at freeze time, the derived path produces it trivially.
//!
//! [`ServicesRegistry`] merges many frozen definitions into the single
//! process-wide table the transport resolves inbound calls against.
//!
//! # Thread safety
//!
//! Builders are single-owner setup objects with no concurrency guarantees;
//! `build()` consumes them. Frozen definitions and registries are
//! immutable and safely shared across calls without locking.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{CallError, RegistryError};
use crate::handler::{CallContext, ServerCallHandler};
use crate::listener::CallListener;
use crate::method::MethodDescriptor;
use crate::service::ServiceDescriptor;

/// Binds one [`MethodDescriptor`] to one [`ServerCallHandler`].
#[derive(Clone)]
pub struct ServerMethodDefinition {
    descriptor: MethodDescriptor,
    handler: Arc<dyn ServerCallHandler>,
}

impl ServerMethodDefinition {
    /// Pair a method descriptor with the handler serving it.
    pub fn new(descriptor: MethodDescriptor, handler: Arc<dyn ServerCallHandler>) -> Self {
        ServerMethodDefinition {
            descriptor,
            handler,
        }
    }

    /// The bound method's descriptor.
    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    /// The handler serving this method.
    pub fn handler(&self) -> &Arc<dyn ServerCallHandler> {
        &self.handler
    }

    /// Begin one inbound call on this method.
    pub fn start_call(&self, ctx: CallContext) -> Result<CallListener, CallError> {
        self.handler.start_call(ctx)
    }
}

impl fmt::Debug for ServerMethodDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerMethodDefinition")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Where the frozen definition's descriptor comes from.
enum DescriptorMode {
    /// Synthesize the descriptor from the accumulated methods at freeze
    /// time, in insertion order.
    Derive { service_name: String },
    /// Validate the accumulated methods against this descriptor.
    Fixed(ServiceDescriptor),
}

impl DescriptorMode {
    fn service_name(&self) -> &str {
        match self {
            DescriptorMode::Derive { service_name } => service_name,
            DescriptorMode::Fixed(descriptor) => descriptor.name(),
        }
    }
}

/// Two-phase builder for [`ServerServiceDefinition`].
///
/// Accumulates method bindings, then validates and freezes. Duplicate
/// names are rejected at `add_method` time; the descriptor bijection is
/// checked at `build()`, the first point where it becomes checkable.
/// Building consumes the builder; a builder is a single-use value.
pub struct ServiceDefinitionBuilder {
    mode: DescriptorMode,
    methods: Vec<ServerMethodDefinition>,
    names: HashMap<String, usize>,
}

impl ServiceDefinitionBuilder {
    fn new(mode: DescriptorMode) -> Self {
        ServiceDefinitionBuilder {
            mode,
            methods: Vec::new(),
            names: HashMap::new(),
        }
    }

    /// The service name bindings are validated against.
    pub fn service_name(&self) -> &str {
        self.mode.service_name()
    }

    /// Add a method binding.
    ///
    /// Fails if the method's service prefix differs from the builder's
    /// service name, or if a method with the same fully-qualified name was
    /// already added.
    pub fn add_method(
        &mut self,
        descriptor: MethodDescriptor,
        handler: Arc<dyn ServerCallHandler>,
    ) -> Result<&mut Self, RegistryError> {
        let expected = self.mode.service_name();
        if descriptor.service_name() != expected {
            return Err(RegistryError::ServiceNameMismatch {
                expected: expected.to_string(),
                actual: descriptor.service_name().to_string(),
                method: descriptor.full_method_name().to_string(),
            });
        }

        let name = descriptor.full_method_name().to_string();
        if self.names.contains_key(&name) {
            return Err(RegistryError::DuplicateMethod(name));
        }

        self.names.insert(name, self.methods.len());
        self.methods
            .push(ServerMethodDefinition::new(descriptor, handler));
        Ok(self)
    }

    /// Validate and freeze into an immutable definition.
    ///
    /// In derive mode the descriptor is synthesized from the accumulated
    /// methods in insertion order; a zero-method service is a legal,
    /// degenerate outcome. In fixed mode every descriptor entry must have
    /// a binding and every binding a descriptor entry; the first violation
    /// found is named in the error.
    pub fn build(self) -> Result<ServerServiceDefinition, RegistryError> {
        let descriptor = match self.mode {
            DescriptorMode::Derive { service_name } => {
                let descriptors = self
                    .methods
                    .iter()
                    .map(|def| def.descriptor().clone())
                    .collect();
                ServiceDescriptor::new(service_name, descriptors)?
            }
            DescriptorMode::Fixed(descriptor) => {
                let mut unmatched: HashSet<&str> = self
                    .methods
                    .iter()
                    .map(|def| def.descriptor().full_method_name())
                    .collect();
                for declared in descriptor.methods() {
                    if !unmatched.remove(declared.full_method_name()) {
                        return Err(RegistryError::UnboundDescriptorMethod(
                            declared.full_method_name().to_string(),
                        ));
                    }
                }
                if let Some(extra) = unmatched.iter().next() {
                    return Err(RegistryError::UnknownMethodBinding(extra.to_string()));
                }
                descriptor
            }
        };

        let methods = self
            .methods
            .into_iter()
            .map(|def| (def.descriptor().full_method_name().to_string(), def))
            .collect();

        Ok(ServerServiceDefinition {
            inner: Arc::new(DefinitionInner {
                descriptor,
                methods,
            }),
        })
    }
}

#[derive(Debug)]
struct DefinitionInner {
    descriptor: ServiceDescriptor,
    methods: HashMap<String, ServerMethodDefinition>,
}

/// Immutable definition of one service: a descriptor plus the frozen
/// mapping from fully-qualified method name to binding.
///
/// The mapping's key set equals the descriptor's method-name set exactly
/// (guaranteed by [`ServiceDefinitionBuilder::build`]). Cheap to clone; lookups are
/// lock-free concurrent reads.
#[derive(Clone, Debug)]
pub struct ServerServiceDefinition {
    inner: Arc<DefinitionInner>,
}

impl ServerServiceDefinition {
    /// Start a builder that derives its descriptor from the methods added.
    pub fn builder(service_name: impl Into<String>) -> Result<ServiceDefinitionBuilder, RegistryError> {
        let service_name = service_name.into();
        if service_name.is_empty() {
            return Err(RegistryError::EmptyServiceName);
        }
        Ok(ServiceDefinitionBuilder::new(DescriptorMode::Derive { service_name }))
    }

    /// Start a builder that validates methods against an existing
    /// descriptor at freeze time.
    pub fn builder_from_descriptor(descriptor: ServiceDescriptor) -> ServiceDefinitionBuilder {
        ServiceDefinitionBuilder::new(DescriptorMode::Fixed(descriptor))
    }

    /// The descriptor of this service.
    pub fn service_descriptor(&self) -> &ServiceDescriptor {
        &self.inner.descriptor
    }

    /// The service name.
    pub fn service_name(&self) -> &str {
        self.inner.descriptor.name()
    }

    /// Look up a binding by fully-qualified method name.
    ///
    /// A missing name is a normal routing outcome, not an error.
    pub fn method(&self, full_method_name: &str) -> Option<&ServerMethodDefinition> {
        self.inner.methods.get(full_method_name)
    }

    /// All bindings, in no particular order. Callers that need declaration
    /// order should walk the descriptor's method sequence instead.
    pub fn methods(&self) -> impl Iterator<Item = &ServerMethodDefinition> {
        self.inner.methods.values()
    }

    /// Number of bound methods.
    pub fn method_count(&self) -> usize {
        self.inner.methods.len()
    }
}

/// Process-wide frozen lookup table over many services.
///
/// Built once at startup from every registered service definition, then
/// shared read-only with every call; immutability is the concurrency
/// strategy, so lookups take no lock.
#[derive(Debug, Default)]
pub struct ServicesRegistry {
    services: HashMap<String, ServerServiceDefinition>,
    methods: HashMap<String, ServerMethodDefinition>,
}

impl ServicesRegistry {
    /// Merge frozen service definitions into one routing table.
    ///
    /// Fails if two definitions share a service name.
    pub fn from_services(
        services: impl IntoIterator<Item = ServerServiceDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut by_service = HashMap::new();
        let mut by_method = HashMap::new();

        for service in services {
            let name = service.service_name().to_string();
            if by_service.contains_key(&name) {
                return Err(RegistryError::DuplicateService(name));
            }
            for def in service.methods() {
                by_method.insert(def.descriptor().full_method_name().to_string(), def.clone());
            }
            by_service.insert(name, service);
        }

        Ok(ServicesRegistry {
            services: by_service,
            methods: by_method,
        })
    }

    /// Resolve a fully-qualified method name to its binding.
    pub fn lookup(&self, full_method_name: &str) -> Option<&ServerMethodDefinition> {
        self.methods.get(full_method_name)
    }

    /// Look up one service's definition by name.
    pub fn service(&self, service_name: &str) -> Option<&ServerServiceDefinition> {
        self.services.get(service_name)
    }

    /// All registered service definitions, in no particular order.
    pub fn services(&self) -> impl Iterator<Item = &ServerServiceDefinition> {
        self.services.values()
    }

    /// Number of registered services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    /// Number of routable methods across all services.
    pub fn method_count(&self) -> usize {
        self.methods.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{CallbackHandler, CallbackTable};
    use crate::message::IdentityMarshaller;
    use crate::method::MethodKind;

    fn method(name: &str, kind: MethodKind) -> MethodDescriptor {
        MethodDescriptor::new(
            name,
            kind,
            Arc::new(IdentityMarshaller),
            Arc::new(IdentityMarshaller),
        )
        .unwrap()
    }

    fn noop_handler(kind: MethodKind) -> Arc<dyn ServerCallHandler> {
        Arc::new(CallbackHandler::new(kind, CallbackTable::default()).unwrap())
    }

    fn greeter() -> ServerServiceDefinition {
        let mut builder = ServerServiceDefinition::builder("pkg.Greeter").unwrap();
        builder
            .add_method(
                method("pkg.Greeter/SayHello", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn build_and_lookup() {
        let service = greeter();

        assert_eq!(service.service_name(), "pkg.Greeter");
        assert_eq!(service.method_count(), 1);
        assert!(service.method("pkg.Greeter/SayHello").is_some());
        assert!(service.method("pkg.Greeter/Missing").is_none());
        assert_eq!(service.service_descriptor().method_count(), 1);
    }

    #[test]
    fn empty_service_name_rejected() {
        assert_eq!(
            ServerServiceDefinition::builder("").err(),
            Some(RegistryError::EmptyServiceName)
        );
    }

    #[test]
    fn foreign_prefix_rejected_with_both_names() {
        let mut builder = ServerServiceDefinition::builder("pkg.Greeter").unwrap();
        let err = builder
            .add_method(
                method("pkg.Other/Op", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .err()
            .unwrap();

        let message = err.to_string();
        assert!(message.contains("pkg.Greeter"));
        assert!(message.contains("pkg.Other"));
    }

    #[test]
    fn duplicate_binding_rejected_before_build() {
        let mut builder = ServerServiceDefinition::builder("pkg.Greeter").unwrap();
        builder
            .add_method(
                method("pkg.Greeter/SayHello", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap();
        let err = builder
            .add_method(
                method("pkg.Greeter/SayHello", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .err()
            .unwrap();
        assert_eq!(
            err,
            RegistryError::DuplicateMethod("pkg.Greeter/SayHello".into())
        );
    }

    #[test]
    fn derived_descriptor_preserves_insertion_order() {
        let mut builder = ServerServiceDefinition::builder("pkg.Greeter").unwrap();
        builder
            .add_method(
                method("pkg.Greeter/Wave", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap()
            .add_method(
                method("pkg.Greeter/SayHello", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap();
        let service = builder.build().unwrap();

        let names: Vec<&str> = service
            .service_descriptor()
            .methods()
            .iter()
            .map(|m| m.method_name())
            .collect();
        assert_eq!(names, vec!["Wave", "SayHello"]);
    }

    #[test]
    fn zero_method_service_is_legal_in_derive_mode() {
        let service = ServerServiceDefinition::builder("pkg.Empty")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(service.method_count(), 0);
        assert_eq!(service.service_descriptor().method_count(), 0);
    }

    #[test]
    fn fixed_descriptor_happy_path() {
        let descriptor = ServiceDescriptor::new(
            "pkg.Greeter",
            vec![
                method("pkg.Greeter/SayHello", MethodKind::Unary),
                method("pkg.Greeter/Chat", MethodKind::BidiStreaming),
            ],
        )
        .unwrap();

        let mut builder = ServerServiceDefinition::builder_from_descriptor(descriptor);
        builder
            .add_method(
                method("pkg.Greeter/SayHello", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap()
            .add_method(
                method("pkg.Greeter/Chat", MethodKind::BidiStreaming),
                Arc::new(
                    CallbackHandler::new(
                        MethodKind::BidiStreaming,
                        CallbackTable::builder().on_message(|_, _| Ok(())).build(),
                    )
                    .unwrap(),
                ),
            )
            .unwrap();

        let service = builder.build().unwrap();
        assert_eq!(service.method_count(), 2);
        assert!(service.method("pkg.Greeter/Chat").is_some());
    }

    #[test]
    fn fixed_descriptor_missing_binding_names_first_unbound() {
        let descriptor = ServiceDescriptor::new(
            "pkg.Greeter",
            vec![
                method("pkg.Greeter/SayHello", MethodKind::Unary),
                method("pkg.Greeter/Wave", MethodKind::Unary),
            ],
        )
        .unwrap();

        let mut builder = ServerServiceDefinition::builder_from_descriptor(descriptor);
        builder
            .add_method(
                method("pkg.Greeter/Wave", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap();

        let err = builder.build().err().unwrap();
        assert_eq!(
            err,
            RegistryError::UnboundDescriptorMethod("pkg.Greeter/SayHello".into())
        );
    }

    #[test]
    fn fixed_descriptor_extra_binding_named() {
        let descriptor =
            ServiceDescriptor::new("pkg.Greeter", vec![method("pkg.Greeter/SayHello", MethodKind::Unary)])
                .unwrap();

        let mut builder = ServerServiceDefinition::builder_from_descriptor(descriptor);
        builder
            .add_method(
                method("pkg.Greeter/SayHello", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap()
            .add_method(
                method("pkg.Greeter/Wave", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap();

        let err = builder.build().err().unwrap();
        assert_eq!(
            err,
            RegistryError::UnknownMethodBinding("pkg.Greeter/Wave".into())
        );
    }

    #[test]
    fn registry_merges_and_routes_across_services() {
        let mut other = ServerServiceDefinition::builder("pkg.Other").unwrap();
        other
            .add_method(
                method("pkg.Other/Op", MethodKind::Unary),
                noop_handler(MethodKind::Unary),
            )
            .unwrap();

        let registry =
            ServicesRegistry::from_services([greeter(), other.build().unwrap()]).unwrap();

        assert_eq!(registry.service_count(), 2);
        assert_eq!(registry.method_count(), 2);
        assert!(registry.lookup("pkg.Greeter/SayHello").is_some());
        assert!(registry.lookup("pkg.Other/Op").is_some());
        assert!(registry.lookup("pkg.Other/Missing").is_none());
        assert!(registry.service("pkg.Greeter").is_some());
    }

    #[test]
    fn registry_rejects_duplicate_service() {
        let err = ServicesRegistry::from_services([greeter(), greeter()])
            .err()
            .unwrap();
        assert_eq!(err, RegistryError::DuplicateService("pkg.Greeter".into()));
    }
}

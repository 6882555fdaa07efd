//! Catalogue of capability providers.
//!
//! Providers are registered explicitly. Two providers may share a name (and
//! even a version) as long as their implementation labels differ; the
//! resolver decides between them.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::blackboard::Blackboard;
use crate::capability::{Capability, CapabilityRef, Descriptor, Version};
use crate::error::ResolutionError;
use crate::telemetry::TelemetryAgent;

type Factory = Arc<dyn Fn(Descriptor) -> CapabilityRef + Send + Sync>;

/// A registered capability implementation: its descriptor and a
/// no-argument factory.
#[derive(Clone)]
pub struct Provider {
    descriptor: Descriptor,
    factory: Factory,
}

impl Provider {
    /// Starts describing a provider of `name` at `version`.
    #[must_use]
    pub fn builder(name: impl Into<String>, version: Version) -> ProviderBuilder {
        ProviderBuilder {
            name: name.into(),
            version,
            implementation: None,
            description: String::new(),
        }
    }

    /// What this provider creates.
    #[must_use]
    pub const fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Creates a fresh instance in the `Created` state.
    #[must_use]
    pub fn instantiate(&self) -> CapabilityRef {
        (self.factory)(self.descriptor.clone())
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Provider`].
#[derive(Debug)]
pub struct ProviderBuilder {
    name: String,
    version: Version,
    implementation: Option<String>,
    description: String,
}

impl ProviderBuilder {
    /// Label distinguishing this implementation; defaults to the capability type name.
    #[must_use]
    pub fn implementation(mut self, implementation: impl Into<String>) -> Self {
        self.implementation = Some(implementation.into());
        self
    }

    /// Free text shown in listings.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Finishes the provider with the factory that creates instances.
    #[must_use]
    pub fn factory<T, F>(self, factory: F) -> Provider
    where
        T: Capability,
        F: Fn() -> T + Send + Sync + 'static,
    {
        let implementation = self.implementation.unwrap_or_else(|| {
            let full = std::any::type_name::<T>();
            full.rsplit("::").next().unwrap_or(full).to_string()
        });
        Provider {
            descriptor: Descriptor {
                name: self.name,
                version: self.version,
                implementation,
                description: self.description,
            },
            factory: Arc::new(move |descriptor| CapabilityRef::new(descriptor, factory())),
        }
    }
}

/// The set of providers a session resolves capabilities from.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    providers: Vec<Provider>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the framework's own capabilities: the Blackboard
    /// and the telemetry agent.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self {
            providers: vec![Blackboard::provider(), TelemetryAgent::provider()],
        }
    }

    /// Adds a provider.
    ///
    /// # Errors
    ///
    /// Returns `ResolutionError::DuplicateProvider` if a provider with the
    /// same name, version and implementation label is already registered.
    pub fn register(&mut self, provider: Provider) -> Result<(), ResolutionError> {
        let d = provider.descriptor();
        if self.providers.iter().any(|p| p.descriptor.name == d.name
            && p.descriptor.version == d.version
            && p.descriptor.implementation == d.implementation)
        {
            return Err(ResolutionError::DuplicateProvider {
                name: d.name.clone(),
                version: d.version.to_string(),
                implementation: d.implementation.clone(),
            });
        }
        debug!(capability = %d, "registered provider");
        self.providers.push(provider);
        Ok(())
    }

    /// Builder-style [`Registry::register`].
    ///
    /// # Errors
    ///
    /// Same as [`Registry::register`].
    pub fn with(mut self, provider: Provider) -> Result<Self, ResolutionError> {
        self.register(provider)?;
        Ok(self)
    }

    /// Providers registered under `name`, in registration order.
    pub fn candidates<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Provider> + 'a {
        self.providers.iter().filter(move |p| p.descriptor.name == name)
    }

    /// Every registered provider, in registration order.
    #[must_use]
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    /// Every registered descriptor, in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.providers.iter().map(Provider::descriptor)
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

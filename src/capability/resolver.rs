//! Resolution of capability requirements into wired instances.
//!
//! A resolver serves one resolution session, which is the construction of a
//! single entity. Instances are memoized by capability name, so every
//! requester inside the entity shares one instance per name.

use std::collections::HashMap;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace};

use crate::capability::{CapabilityConfig, CapabilityRef, CapabilitySpec, Provider, Registry};
use crate::error::{ResolutionError, TickworkResult};

/// Resolves capability specs against a [`Registry`] for one entity.
pub struct Resolver<'r> {
    registry: &'r Registry,
    settings: HashMap<String, serde_json::Value>,
    rng: ChaCha8Rng,
    resolved: HashMap<String, CapabilityRef>,
    order: Vec<CapabilityRef>,
    stack: Vec<String>,
}

impl<'r> Resolver<'r> {
    /// Creates a resolver whose capability seeds derive from `seed`.
    #[must_use]
    pub fn new(registry: &'r Registry, seed: u64) -> Self {
        Self {
            registry,
            settings: HashMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            resolved: HashMap::new(),
            order: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Per-capability settings, keyed by capability name.
    #[must_use]
    pub fn with_settings(mut self, settings: HashMap<String, serde_json::Value>) -> Self {
        self.settings = settings;
        self
    }

    /// Picks the provider for `spec`: the highest satisfying version.
    ///
    /// # Errors
    ///
    /// Returns `CapabilityNotFound` if nothing satisfies `spec`, and
    /// `AmbiguousCapability` if several implementations tie at the highest
    /// satisfying version.
    pub fn select(&self, spec: &CapabilitySpec) -> Result<&'r Provider, ResolutionError> {
        let registry: &'r Registry = self.registry;
        let mut best: Vec<&'r Provider> = Vec::new();
        for provider in registry.providers().iter().filter(|p| p.descriptor().name == spec.name) {
            let version = provider.descriptor().version;
            if !spec.is_satisfied_by(&version) {
                continue;
            }
            let top = best.first().map(|p| p.descriptor().version);
            match top {
                Some(top) if version < top => {}
                Some(top) if version == top => best.push(provider),
                _ => best = vec![provider],
            }
        }

        match best.as_slice() {
            [] => Err(ResolutionError::CapabilityNotFound {
                spec: spec.to_string(),
            }),
            [only] => Ok(*only),
            several => Err(ResolutionError::AmbiguousCapability {
                spec: spec.to_string(),
                candidates: several
                    .iter()
                    .map(|p| p.descriptor().implementation.clone())
                    .collect(),
            }),
        }
    }

    /// Resolves `spec` and, recursively, everything it requires.
    ///
    /// The returned instance is configured but not yet initialized.
    ///
    /// # Errors
    ///
    /// Returns `CircularDependency` when a capability (transitively)
    /// requires itself, `VersionConflict` when the instance already
    /// resolved under this name does not satisfy `spec`, and any selection,
    /// injection or configuration error.
    pub fn resolve(&mut self, spec: &CapabilitySpec) -> TickworkResult<CapabilityRef> {
        if let Some(pos) = self.stack.iter().position(|name| *name == spec.name) {
            let mut cycle = self.stack[pos..].to_vec();
            cycle.push(spec.name.clone());
            return Err(ResolutionError::CircularDependency { cycle }.into());
        }

        if let Some(existing) = self.resolved.get(&spec.name) {
            if !spec.is_satisfied_by(&existing.version()) {
                return Err(ResolutionError::VersionConflict {
                    name: spec.name.clone(),
                    resolved: existing.version().to_string(),
                    requested: spec.to_string(),
                }
                .into());
            }
            trace!(capability = %spec.name, "reusing resolved instance");
            return Ok(existing.clone());
        }

        let provider = self.select(spec)?;
        let instance = provider.instantiate();
        debug!(capability = %provider.descriptor(), requested = %spec, "resolved capability");

        self.stack.push(spec.name.clone());
        let wired = self.wire(&instance);
        self.stack.pop();
        wired?;

        let config = CapabilityConfig::new(
            self.rng.next_u64(),
            self.settings.get(&spec.name).cloned().unwrap_or_default(),
        );
        instance.configure(&config)?;

        self.resolved.insert(spec.name.clone(), instance.clone());
        self.order.push(instance.clone());
        Ok(instance)
    }

    fn wire(&mut self, instance: &CapabilityRef) -> TickworkResult<()> {
        for requirement in instance.requirements() {
            let collaborator = self.resolve(&requirement.spec)?;
            instance.inject(&requirement.slot, &collaborator)?;
        }
        Ok(())
    }

    /// Instances resolved so far, collaborators before their requesters.
    #[must_use]
    pub fn resolved(&self) -> &[CapabilityRef] {
        &self.order
    }

    /// Consumes the resolver, returning its instances in resolution order.
    #[must_use]
    pub fn into_resolved(self) -> Vec<CapabilityRef> {
        self.order
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::capability::{Capability, Requirement, Version};
    use crate::error::{TickworkError, TickworkResult};
    use crate::message::PayloadType;

    #[derive(Debug, Default)]
    struct Leaf {
        seed: Option<u64>,
    }

    impl Capability for Leaf {
        fn configure(&mut self, config: &CapabilityConfig) -> TickworkResult<()> {
            self.seed = Some(config.seed);
            Ok(())
        }

        fn handled_payloads(&self) -> Vec<PayloadType> {
            Vec::new()
        }
    }

    #[derive(Debug)]
    struct Needs {
        wants: Vec<(&'static str, CapabilitySpec)>,
        got: Vec<Arc<Mutex<Leaf>>>,
    }

    impl Capability for Needs {
        fn requirements(&self) -> Vec<Requirement> {
            self.wants
                .iter()
                .map(|(slot, spec)| Requirement::new(*slot, spec.clone()))
                .collect()
        }

        fn inject(&mut self, slot: &str, collaborator: &CapabilityRef) -> TickworkResult<()> {
            if let Some(leaf) = collaborator.downcast::<Leaf>() {
                self.got.push(leaf);
                return Ok(());
            }
            if collaborator.downcast::<Self>().is_some() {
                return Ok(());
            }
            Err(TickworkError::internal(format!("slot '{slot}' expects Leaf")))
        }

        fn handled_payloads(&self) -> Vec<PayloadType> {
            Vec::new()
        }
    }

    fn leaf_spec() -> CapabilitySpec {
        CapabilitySpec::at_least("Leaf", Version::new(1, 0, 0))
    }

    fn needs(name: &str, wants: Vec<(&'static str, CapabilitySpec)>) -> Provider {
        Provider::builder(name, Version::new(1, 0, 0)).factory(move || Needs {
            wants: wants.clone(),
            got: Vec::new(),
        })
    }

    fn registry() -> Registry {
        Registry::new()
            .with(Provider::builder("Leaf", Version::new(1, 0, 0)).factory(Leaf::default))
            .unwrap()
            .with(Provider::builder("Leaf", Version::new(1, 4, 2)).factory(Leaf::default))
            .unwrap()
            .with(Provider::builder("Leaf", Version::new(2, 0, 0)).factory(Leaf::default))
            .unwrap()
    }

    #[test]
    fn test_selects_highest_compatible() {
        let registry = registry();
        let resolver = Resolver::new(&registry, 1);
        let picked = resolver.select(&leaf_spec()).unwrap();
        assert_eq!(picked.descriptor().version, Version::new(1, 4, 2));

        let exact = CapabilitySpec::exactly("Leaf", Version::new(1, 0, 0));
        assert_eq!(resolver.select(&exact).unwrap().descriptor().version, Version::new(1, 0, 0));
    }

    #[test]
    fn test_not_found_names_spec() {
        let registry = registry();
        let resolver = Resolver::new(&registry, 1);
        let err = resolver
            .select(&CapabilitySpec::at_least("Leaf", Version::new(3, 0, 0)))
            .unwrap_err();
        assert!(matches!(err, ResolutionError::CapabilityNotFound { ref spec } if spec.contains("Leaf")));
    }

    #[test]
    fn test_tie_is_ambiguous() {
        let registry = Registry::new()
            .with(Provider::builder("Leaf", Version::new(1, 0, 0)).implementation("a").factory(Leaf::default))
            .unwrap()
            .with(Provider::builder("Leaf", Version::new(1, 0, 0)).implementation("b").factory(Leaf::default))
            .unwrap();
        let resolver = Resolver::new(&registry, 1);
        let err = resolver.select(&leaf_spec()).unwrap_err();
        assert!(matches!(err, ResolutionError::AmbiguousCapability { ref candidates, .. } if candidates.len() == 2));
    }

    #[test]
    fn test_shared_instance_within_session() {
        let registry = registry()
            .with(needs("A", vec![("leaf", leaf_spec())]))
            .unwrap()
            .with(needs(
                "B",
                vec![("leaf", CapabilitySpec::at_least("Leaf", Version::new(1, 2, 0)))],
            ))
            .unwrap();
        let mut resolver = Resolver::new(&registry, 1);
        let a = resolver
            .resolve(&CapabilitySpec::at_least("A", Version::new(1, 0, 0)))
            .unwrap();
        let b = resolver
            .resolve(&CapabilitySpec::at_least("B", Version::new(1, 0, 0)))
            .unwrap();

        let a_leaf = a.with_typed(|n: &mut Needs| Arc::clone(&n.got[0])).unwrap();
        let b_leaf = b.with_typed(|n: &mut Needs| Arc::clone(&n.got[0])).unwrap();
        assert!(Arc::ptr_eq(&a_leaf, &b_leaf));

        let names: Vec<&str> = resolver.resolved().iter().map(CapabilityRef::name).collect();
        assert_eq!(names, vec!["Leaf", "A", "B"]);
    }

    #[test]
    fn test_memoized_instance_must_satisfy_later_spec() {
        let registry = registry();
        let mut resolver = Resolver::new(&registry, 1);
        resolver
            .resolve(&CapabilitySpec::exactly("Leaf", Version::new(1, 0, 0)))
            .unwrap();
        let err = resolver
            .resolve(&CapabilitySpec::at_least("Leaf", Version::new(1, 2, 0)))
            .unwrap_err();
        assert!(matches!(err, TickworkError::Resolution(ResolutionError::VersionConflict { .. })));
    }

    #[test]
    fn test_cycle_detected() {
        let a_needs_b = vec![("b", CapabilitySpec::at_least("B", Version::new(1, 0, 0)))];
        let b_needs_a = vec![("a", CapabilitySpec::at_least("A", Version::new(1, 0, 0)))];
        let registry = Registry::new()
            .with(needs("A", a_needs_b))
            .unwrap()
            .with(needs("B", b_needs_a))
            .unwrap();
        let mut resolver = Resolver::new(&registry, 1);
        let err = resolver
            .resolve(&CapabilitySpec::at_least("A", Version::new(1, 0, 0)))
            .unwrap_err();
        match err {
            TickworkError::Resolution(ResolutionError::CircularDependency { cycle }) => {
                assert_eq!(cycle, vec!["A", "B", "A"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_seeds_are_deterministic() {
        let registry = registry();
        let seed_of = |seed: u64| {
            let mut resolver = Resolver::new(&registry, seed);
            let leaf = resolver.resolve(&leaf_spec()).unwrap();
            leaf.with_typed(|l: &mut Leaf| l.seed).unwrap()
        };
        assert_eq!(seed_of(42), seed_of(42));
        assert_ne!(seed_of(42), seed_of(43));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let registry = registry();
        for _ in 0..3 {
            let mut resolver = Resolver::new(&registry, 0);
            let leaf = resolver.resolve(&leaf_spec()).unwrap();
            assert_eq!(leaf.version(), Version::new(1, 4, 2));
            let again = resolver.resolve(&leaf_spec()).unwrap();
            assert!(CapabilityRef::ptr_eq(&leaf, &again));
        }
    }
}

//! Workload factory registry.
//!
//! Trace readers and other collaborators describe workloads as
//! [`WorkloadSpec`] values; the registry turns them into consumers by kind
//! name. The host program populates the table explicitly.
//!
//! # Example
//!
//! ```
//! use dcsim::registry::{create_default_registry, WorkloadSpec};
//!
//! let registry = create_default_registry();
//! let spec = WorkloadSpec::new("work").with_attr("work", "1000").with_attr("utilization", "0.5");
//!
//! let consumer = registry.create(&spec).unwrap();
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::KernelConfig;
use crate::consumer::{BoundedWork, ResourceConsumer, TraceFragment, TraceReplay};
use crate::error::RegistryError;

/// A boxed consumer as produced by the registry.
pub type BoxedConsumer = Box<dyn ResourceConsumer>;

/// Type alias for consumer factory functions.
pub type ConsumerFactory = Arc<dyn Fn(&WorkloadSpec) -> Result<BoxedConsumer, RegistryError> + Send + Sync>;

/// Declarative description of a workload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    /// Registered kind name
    pub kind: String,

    /// Custom attributes as key-value pairs
    #[serde(default)]
    pub attrs: HashMap<String, String>,

    /// Usage fragments, for trace-driven kinds
    #[serde(default)]
    pub fragments: Vec<TraceFragment>,
}

impl WorkloadSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Adds an attribute.
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    /// Sets the usage fragments.
    pub fn with_fragments(mut self, fragments: impl IntoIterator<Item = TraceFragment>) -> Self {
        self.fragments = fragments.into_iter().collect();
        self
    }

    /// Parses an attribute, `None` if it is absent.
    pub fn attr<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, RegistryError> {
        match self.attrs.get(name) {
            None => Ok(None),
            Some(value) => value.parse().map(Some).map_err(|_| RegistryError::InvalidAttr {
                attr: name.to_string(),
                value: value.clone(),
            }),
        }
    }

    /// Parses a required attribute.
    pub fn required_attr<T: std::str::FromStr>(&self, name: &str) -> Result<T, RegistryError> {
        self.attr(name)?.ok_or_else(|| RegistryError::MissingAttr {
            kind: self.kind.clone(),
            attr: name.to_string(),
        })
    }
}

/// A registry of workload factories, keyed by kind name.
#[derive(Default)]
pub struct ConsumerRegistry {
    factories: HashMap<String, ConsumerFactory>,
}

impl ConsumerRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `kind`, replacing any previous one.
    ///
    /// # Arguments
    /// * `kind` - The kind name to register
    /// * `factory` - A function building a consumer from a spec
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&WorkloadSpec) -> Result<BoxedConsumer, RegistryError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
    }

    /// Builds the consumer described by `spec`.
    pub fn create(&self, spec: &WorkloadSpec) -> Result<BoxedConsumer, RegistryError> {
        match self.factories.get(&spec.kind) {
            Some(factory) => factory(spec),
            None => Err(RegistryError::UnknownKind(spec.kind.clone())),
        }
    }

    /// Returns true if a kind is registered.
    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Returns the number of registered kinds.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Returns an iterator over registered kind names.
    pub fn kinds(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }

    /// Unregisters a kind.
    pub fn unregister(&mut self, kind: &str) -> bool {
        self.factories.remove(kind).is_some()
    }
}

impl std::fmt::Debug for ConsumerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerRegistry")
            .field("registered_kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Creates a registry with the built-in kinds and default settings.
///
/// Includes:
/// - `trace` - [`TraceReplay`] of the workload's fragments
/// - `work` - [`BoundedWork`] with attributes `work` and `utilization` (default 1.0)
pub fn create_default_registry() -> ConsumerRegistry {
    create_registry(&KernelConfig::default())
}

/// Creates a registry with the built-in kinds; bounded workloads default to
/// the configured utilization cap.
pub fn create_registry(config: &KernelConfig) -> ConsumerRegistry {
    let utilization_cap = config.utilization_cap;
    let mut registry = ConsumerRegistry::new();

    registry.register("trace", |spec| {
        let replay = TraceReplay::try_new(spec.fragments.iter().copied()).map_err(|err| RegistryError::InvalidAttr {
            attr: "fragments".to_string(),
            value: err.to_string(),
        })?;
        Ok(Box::new(replay) as BoxedConsumer)
    });

    registry.register("work", move |spec| {
        let work: f64 = spec.required_attr("work")?;
        let utilization = spec.attr("utilization")?.unwrap_or(utilization_cap);
        let workload = BoundedWork::try_new(work, utilization).map_err(|err| RegistryError::InvalidAttr {
            attr: "work".to_string(),
            value: err.to_string(),
        })?;
        Ok(Box::new(workload) as BoxedConsumer)
    });

    registry
}

//! Capability registry.

use super::{CapabilityId, CapabilityKind, DataCapability, InferenceCapability};
use crate::errors::CapabilityError;
use std::collections::HashMap;
use std::sync::Arc;

/// Maps capability names to typed implementations.
///
/// Data and inference capabilities live in separate maps, so looking a name
/// up under the wrong kind is reported as a mismatch rather than a miss.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    data: HashMap<String, Arc<dyn DataCapability>>,
    inference: HashMap<String, Arc<dyn InferenceCapability>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

impl CapabilityRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a data capability under its own name.
    pub fn register_data(&mut self, capability: Arc<dyn DataCapability>) {
        self.data.insert(capability.name().to_string(), capability);
    }

    /// Registers an inference capability under its own name.
    pub fn register_inference(&mut self, capability: Arc<dyn InferenceCapability>) {
        self.inference
            .insert(capability.name().to_string(), capability);
    }

    /// Builder form of [`Self::register_data`].
    #[must_use]
    pub fn with_data(mut self, capability: Arc<dyn DataCapability>) -> Self {
        self.register_data(capability);
        self
    }

    /// Builder form of [`Self::register_inference`].
    #[must_use]
    pub fn with_inference(mut self, capability: Arc<dyn InferenceCapability>) -> Self {
        self.register_inference(capability);
        self
    }

    /// Looks up a data capability.
    pub fn data(&self, name: &str) -> Result<Arc<dyn DataCapability>, CapabilityError> {
        if let Some(capability) = self.data.get(name) {
            return Ok(Arc::clone(capability));
        }
        if self.inference.contains_key(name) {
            return Err(CapabilityError::KindMismatch {
                name: name.to_string(),
                expected: CapabilityKind::Data.to_string(),
            });
        }
        Err(CapabilityError::not_found(name))
    }

    /// Looks up an inference capability.
    pub fn inference(&self, name: &str) -> Result<Arc<dyn InferenceCapability>, CapabilityError> {
        if let Some(capability) = self.inference.get(name) {
            return Ok(Arc::clone(capability));
        }
        if self.data.contains_key(name) {
            return Err(CapabilityError::KindMismatch {
                name: name.to_string(),
                expected: CapabilityKind::Inference.to_string(),
            });
        }
        Err(CapabilityError::not_found(name))
    }

    /// Checks that an id resolves with the right kind.
    pub fn resolve(&self, id: &CapabilityId) -> Result<(), CapabilityError> {
        match id.kind {
            CapabilityKind::Data => self.data(&id.name).map(|_| ()),
            CapabilityKind::Inference => self.inference(&id.name).map(|_| ()),
        }
    }

    /// Returns true if the id resolves.
    #[must_use]
    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.resolve(id).is_ok()
    }

    /// Lists all registered ids, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<CapabilityId> {
        let mut ids: Vec<CapabilityId> = self
            .data
            .keys()
            .map(CapabilityId::data)
            .chain(self.inference.keys().map(CapabilityId::inference))
            .collect();
        ids.sort();
        ids
    }

    /// Returns the number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() + self.inference.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

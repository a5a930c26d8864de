use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    capability::{Capability, CapabilityUnit},
    error::{FlowError, Result},
};

/// Immutable mapping from capability to unit, built once at startup
pub struct CapabilityRegistry {
    units: HashMap<Capability, Arc<dyn CapabilityUnit>>,
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Get the unit serving a capability
    pub fn unit(&self, capability: Capability) -> Option<Arc<dyn CapabilityUnit>> {
        self.units.get(&capability).cloned()
    }

    pub fn capabilities(&self) -> impl Iterator<Item = Capability> + '_ {
        self.units.keys().copied()
    }
}

/// Builder for creating registries
pub struct RegistryBuilder {
    units: HashMap<Capability, Arc<dyn CapabilityUnit>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            units: HashMap::new(),
        }
    }

    /// Register a unit under the capability it reports. A later registration
    /// for the same capability replaces the earlier one.
    pub fn register(mut self, unit: Arc<dyn CapabilityUnit>) -> Self {
        self.units.insert(unit.capability(), unit);
        self
    }

    /// Build the registry, requiring a unit for every capability so dispatch
    /// never fails on lookup
    pub fn build(self) -> Result<CapabilityRegistry> {
        if let Some(missing) = Capability::ALL
            .into_iter()
            .find(|c| !self.units.contains_key(c))
        {
            return Err(FlowError::MissingCapability(missing));
        }
        Ok(CapabilityRegistry { units: self.units })
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

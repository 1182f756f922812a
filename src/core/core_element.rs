//! Core elements (logical task signatures) and their implementations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{SchedulerError, SchedulerResult};
use crate::core::resources::ResourceDescription;

/// Identifier of a registered core element.
pub type CoreId = u32;

/// Identifier of an implementation within its core element.
pub type ImplementationId = u32;

/// Which worker variant can run an implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationKind {
    /// Runs on method workers, consuming raw compute units.
    Method,
    /// Invokes a remote service; consumes only a task slot.
    Service,
}

/// A concrete, resource-typed realization of a core element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Owning core element.
    pub core_id: CoreId,
    /// Position within the core element's implementation list.
    pub id: ImplementationId,
    /// Human readable signature, e.g. `matmul(FILE_T,FILE_T)`.
    pub signature: String,
    /// Worker variant required.
    pub kind: ImplementationKind,
    /// Resources consumed while running.
    pub requirements: ResourceDescription,
}

impl Implementation {
    /// Method implementation with the given requirement.
    pub fn method(
        core_id: CoreId,
        id: ImplementationId,
        signature: impl Into<String>,
        requirements: ResourceDescription,
    ) -> Self {
        Self {
            core_id,
            id,
            signature: signature.into(),
            kind: ImplementationKind::Method,
            requirements,
        }
    }

    /// Service implementation; services consume no raw units.
    pub fn service(core_id: CoreId, id: ImplementationId, signature: impl Into<String>) -> Self {
        Self {
            core_id,
            id,
            signature: signature.into(),
            kind: ImplementationKind::Service,
            requirements: ResourceDescription::empty(),
        }
    }
}

/// A logical task signature owning one or more implementations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreElement {
    /// Registry-assigned id.
    pub id: CoreId,
    /// Declared signature.
    pub signature: String,
    /// Registered implementations, indexed by [`ImplementationId`].
    pub implementations: Vec<Implementation>,
}

/// Registry of core elements, indexed by id and by signature.
#[derive(Debug, Default, Clone)]
pub struct CoreRegistry {
    elements: Vec<CoreElement>,
    by_signature: HashMap<String, CoreId>,
}

impl CoreRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a core element, returning the existing id if the signature is known.
    pub fn register_core_element(&mut self, signature: impl Into<String>) -> CoreId {
        let signature = signature.into();
        if let Some(id) = self.by_signature.get(&signature) {
            return *id;
        }
        let id = CoreId::try_from(self.elements.len()).unwrap_or(CoreId::MAX);
        self.elements.push(CoreElement {
            id,
            signature: signature.clone(),
            implementations: Vec::new(),
        });
        self.by_signature.insert(signature, id);
        id
    }

    /// Append implementations to a core element. Implementation ids are reassigned to
    /// their position so that lookups by id are stable. An implementation identical in
    /// signature, kind and requirements to a registered one is skipped. Returns the
    /// number of implementations added.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownCoreElement`] if `core_id` is not registered.
    pub fn register_implementations(
        &mut self,
        core_id: CoreId,
        implementations: impl IntoIterator<Item = Implementation>,
    ) -> SchedulerResult<usize> {
        let element = self
            .elements
            .get_mut(core_id as usize)
            .ok_or(SchedulerError::UnknownCoreElement(core_id))?;
        let mut added = 0;
        for mut implementation in implementations {
            let known = element.implementations.iter().any(|i| {
                i.signature == implementation.signature
                    && i.kind == implementation.kind
                    && i.requirements == implementation.requirements
            });
            if known {
                continue;
            }
            implementation.core_id = core_id;
            implementation.id =
                ImplementationId::try_from(element.implementations.len()).unwrap_or(u32::MAX);
            element.implementations.push(implementation);
            added += 1;
        }
        Ok(added)
    }

    /// Look up a core element.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownCoreElement`] if `core_id` is not registered.
    pub fn core(&self, core_id: CoreId) -> SchedulerResult<&CoreElement> {
        self.elements
            .get(core_id as usize)
            .ok_or(SchedulerError::UnknownCoreElement(core_id))
    }

    /// Implementations registered for a core element.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::UnknownCoreElement`] if `core_id` is not registered.
    pub fn implementations(&self, core_id: CoreId) -> SchedulerResult<&[Implementation]> {
        Ok(&self.core(core_id)?.implementations)
    }

    /// A single implementation by id.
    #[must_use]
    pub fn implementation(
        &self,
        core_id: CoreId,
        implementation_id: ImplementationId,
    ) -> Option<&Implementation> {
        self.elements
            .get(core_id as usize)
            .and_then(|e| e.implementations.get(implementation_id as usize))
    }

    /// Core id registered for a signature.
    #[must_use]
    pub fn core_id(&self, signature: &str) -> Option<CoreId> {
        self.by_signature.get(signature).copied()
    }

    /// Number of registered core elements.
    #[must_use]
    pub fn core_count(&self) -> usize {
        self.elements.len()
    }
}

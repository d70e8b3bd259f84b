//! # Resource Inventory
//!
//! Desired resources per `(cluster, namespace, kind)`, filled by the populator.
//! A slot must be initialised before resources of that kind can be added,
//! which limits each SaaS file to the kinds it declares as managed.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::InventoryError;

/// One desired resource and the target that rendered it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DesiredResource {
    pub name: String,
    pub owner: String,
    pub body: serde_json::Value,
}

type SlotKey = (String, String, String);

#[derive(Debug, Default)]
pub struct ResourceInventory {
    slots: BTreeMap<SlotKey, BTreeMap<String, DesiredResource>>,
    errors: Vec<InventoryError>,
}

impl ResourceInventory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow resources of `kind` in the namespace
    pub fn initialize_resource_type(&mut self, cluster: &str, namespace: &str, kind: &str) {
        self.slots
            .entry((cluster.to_string(), namespace.to_string(), kind.to_string()))
            .or_default();
    }

    /// Add a rendered resource.
    ///
    /// Fails when the kind is not initialised for the namespace or when
    /// another owner already desires the same resource.
    pub fn add_desired(
        &mut self,
        cluster: &str,
        namespace: &str,
        body: serde_json::Value,
        owner: &str,
    ) -> Result<(), InventoryError> {
        let kind = body
            .get("kind")
            .and_then(serde_json::Value::as_str)
            .ok_or(InventoryError::Malformed)?
            .to_string();
        let name = body
            .pointer("/metadata/name")
            .and_then(serde_json::Value::as_str)
            .ok_or(InventoryError::Malformed)?
            .to_string();

        let slot = self
            .slots
            .get_mut(&(cluster.to_string(), namespace.to_string(), kind.clone()))
            .ok_or_else(|| InventoryError::NotInitialized {
                cluster: cluster.to_string(),
                namespace: namespace.to_string(),
                kind: kind.clone(),
            })?;

        if slot.contains_key(&name) {
            return Err(InventoryError::Duplicate {
                cluster: cluster.to_string(),
                namespace: namespace.to_string(),
                kind,
                name,
            });
        }
        slot.insert(
            name.clone(),
            DesiredResource {
                name,
                owner: owner.to_string(),
                body,
            },
        );
        Ok(())
    }

    pub fn register_error(&mut self, error: InventoryError) {
        self.errors.push(error);
    }

    #[must_use]
    pub fn has_error_registered(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[InventoryError] {
        &self.errors
    }

    /// Desired resources of one kind in a namespace, ordered by name
    pub fn desired(
        &self,
        cluster: &str,
        namespace: &str,
        kind: &str,
    ) -> impl Iterator<Item = &DesiredResource> {
        self.slots
            .get(&(cluster.to_string(), namespace.to_string(), kind.to_string()))
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Total number of desired resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.values().map(BTreeMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

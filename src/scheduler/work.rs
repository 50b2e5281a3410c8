//! Pluggable work units
//!
//! A work unit scrapes one target for one keyword. Units are registered under
//! the target name they serve and resolved once per work item.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{NewPendingItem, WorkItem};
use crate::storage::ResultRepository;

/// Everything a unit needs to know about the item it runs for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkParameters {
    pub keyword: String,
    pub target: String,
    pub category: String,
    pub definitions: Vec<String>,
}

impl From<&WorkItem> for WorkParameters {
    fn from(item: &WorkItem) -> Self {
        Self {
            keyword: item.key.keyword.clone(),
            target: item.key.target.clone(),
            category: item.category.clone(),
            definitions: item.definitions.iter().cloned().collect(),
        }
    }
}

#[async_trait]
pub trait WorkUnit: Send + Sync {
    /// Target name this unit serves
    fn name(&self) -> &str;

    /// Scrape the target for the keyword
    async fn execute(&self, params: &WorkParameters) -> Result<Vec<NewPendingItem>>;

    /// Store what `execute` produced, returns the number of new results
    fn persist(&self, items: &[NewPendingItem], results: &dyn ResultRepository) -> Result<usize> {
        Ok(results.append(items)?)
    }
}

/// Target name -> work unit
#[derive(Default, Clone)]
pub struct WorkUnitRegistry {
    units: HashMap<String, Arc<dyn WorkUnit>>,
}

impl WorkUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit under its own name, returning any unit it replaces
    pub fn register(&mut self, unit: Arc<dyn WorkUnit>) -> Option<Arc<dyn WorkUnit>> {
        self.units.insert(unit.name().to_string(), unit)
    }

    pub fn resolve(&self, target: &str) -> Option<Arc<dyn WorkUnit>> {
        self.units.get(target).cloned()
    }

    /// Registered target names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.units.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::WorkKey;
    use std::collections::BTreeSet;

    struct Named(&'static str);

    #[async_trait]
    impl WorkUnit for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _params: &WorkParameters) -> Result<Vec<NewPendingItem>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_registry_resolves_by_target() {
        let mut registry = WorkUnitRegistry::new();
        assert!(registry.register(Arc::new(Named("siteB"))).is_none());
        assert!(registry.register(Arc::new(Named("siteA"))).is_none());
        assert!(registry.register(Arc::new(Named("siteA"))).is_some());

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["siteA", "siteB"]);
        assert!(registry.resolve("siteA").is_some());
        assert!(registry.resolve("siteC").is_none());
    }

    #[test]
    fn test_parameters_from_item() {
        let item = WorkItem {
            key: WorkKey::new("steel", "siteA"),
            definitions: BTreeSet::from(["b".to_string(), "a".to_string()]),
            category: "metals".into(),
        };
        let params = WorkParameters::from(&item);
        assert_eq!(params.keyword, "steel");
        assert_eq!(params.definitions, vec!["a", "b"]);
    }
}

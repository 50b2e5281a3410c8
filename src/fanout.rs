//! Work-pool synchronization
//!
//! Every [`WorkDefinition`] names some keywords and some targets. The pool
//! holds one [`WorkItem`] per distinct `(keyword, target)` across all
//! definitions, remembering which definitions asked for it. The category of a
//! shared item is the category of the first definition that produced it.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{WorkDefinition, WorkItem, WorkKey};
use crate::scheduler::error::SchedulerError;
use crate::storage::{SharedDefinitionRepository, SharedWorkPoolRepository};

/// Counts from one synchronization pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncReport {
    /// Definitions read
    pub definitions: usize,
    /// Distinct keyword x target combinations after merging
    pub combinations: usize,
    /// Distinct work items written
    pub written: usize,
}

/// Expand definitions into work items, one per distinct key, in first-seen
/// order.
pub fn expand_definitions(definitions: &[WorkDefinition]) -> Vec<WorkItem> {
    let mut items: Vec<WorkItem> = Vec::new();
    let mut index: HashMap<WorkKey, usize> = HashMap::new();

    for definition in definitions {
        for raw_keyword in &definition.keywords {
            let keyword = raw_keyword.trim();
            if keyword.is_empty() {
                debug!(definition = %definition.name, "Skipping blank keyword");
                continue;
            }

            for raw_target in &definition.targets {
                let target = raw_target.trim();
                if target.is_empty() {
                    debug!(definition = %definition.name, "Skipping blank target");
                    continue;
                }

                let key = WorkKey::new(keyword, target);
                match index.get(&key) {
                    Some(&position) => {
                        items[position].definitions.insert(definition.name.clone());
                    }
                    None => {
                        index.insert(key.clone(), items.len());
                        items.push(WorkItem {
                            key,
                            definitions: [definition.name.clone()].into_iter().collect(),
                            category: definition.category.clone(),
                        });
                    }
                }
            }
        }
    }

    items
}

/// Rebuilds the work pool from the current definitions
pub struct PoolSynchronizer {
    definitions: SharedDefinitionRepository,
    pool: SharedWorkPoolRepository,
}

impl PoolSynchronizer {
    pub fn new(definitions: SharedDefinitionRepository, pool: SharedWorkPoolRepository) -> Self {
        Self { definitions, pool }
    }

    /// Read, expand and replace the pool in one go.
    ///
    /// On failure the previous pool is left in place.
    pub fn synchronize(&self) -> Result<SyncReport> {
        let definitions = self
            .definitions
            .definitions()
            .map_err(|e| SchedulerError::sync_failed(format!("{e:#}")))?;

        let items = expand_definitions(&definitions);

        let written = self
            .pool
            .replace_pool(&items)
            .map_err(|e| SchedulerError::sync_failed(format!("{e:#}")))?;

        let report = SyncReport {
            definitions: definitions.len(),
            combinations: items.len(),
            written,
        };

        info!(
            definitions = report.definitions,
            combinations = report.combinations,
            written = report.written,
            "Work pool synchronized"
        );

        Ok(report)
    }
}

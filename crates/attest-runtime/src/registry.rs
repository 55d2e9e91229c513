//! Story id to gate resolution.
//!
//! Gates are registered up front or produced by a [`GateLoader`] from a
//! story's gate file. Resolution covers every story of a PRD before any of
//! them runs, so a missing gate is a configuration error, not a failed story.

use std::collections::BTreeMap;
use std::sync::Arc;

use attest_core::{Authority, ConfigError, Prd, Story};

use crate::gate::Gate;

/// Produces gates for stories without a registered one.
pub trait GateLoader: Send + Sync {
    /// Build the gate for `story`; `authority` is the policy that applies to it.
    fn load(
        &self,
        story: &Story,
        authority: Option<Authority>,
    ) -> Result<Arc<dyn Gate>, ConfigError>;
}

/// Gates resolved for one PRD, keyed by story id.
pub type ResolvedGates = BTreeMap<String, Arc<dyn Gate>>;

#[derive(Default)]
pub struct GateRegistry {
    gates: BTreeMap<String, Arc<dyn Gate>>,
    loader: Option<Arc<dyn GateLoader>>,
}

impl GateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the gate for a story id, replacing any previous one.
    pub fn register(&mut self, story_id: impl Into<String>, gate: Arc<dyn Gate>) {
        self.gates.insert(story_id.into(), gate);
    }

    /// Fallback for stories without a registered gate.
    pub fn with_loader(mut self, loader: Arc<dyn GateLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn has_gate(&self, story_id: &str) -> bool {
        self.gates.contains_key(story_id)
    }

    pub fn registered_ids(&self) -> Vec<&str> {
        self.gates.keys().map(String::as_str).collect()
    }

    /// Resolve a gate for every story of `prd`.
    pub fn resolve(&self, prd: &Prd) -> Result<ResolvedGates, ConfigError> {
        let mut resolved = BTreeMap::new();
        for story in &prd.stories {
            let gate = match (self.gates.get(&story.id), &self.loader) {
                (Some(gate), _) => Arc::clone(gate),
                (None, Some(loader)) => loader.load(story, prd.authority_for(story))?,
                (None, None) => {
                    return Err(ConfigError::MissingGate {
                        story: story.id.clone(),
                        gate_file: story.gate_file.clone(),
                    })
                }
            };
            resolved.insert(story.id.clone(), gate);
        }
        Ok(resolved)
    }
}

impl std::fmt::Debug for GateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GateRegistry")
            .field("gates", &self.registered_ids())
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine configuration.

/// Tunables for an [`ElementTree`](crate::ElementTree).
///
/// ```rust
/// use trellis_ui::{ElementTree, TreeConfig};
/// use trellis_property::PropertyRegistry;
///
/// let config = TreeConfig::default().with_max_trigger_passes(4);
/// let tree = ElementTree::with_config(PropertyRegistry::new(), config);
/// assert_eq!(tree.config().max_trigger_passes, 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeConfig {
    /// How many times one trigger may re-evaluate after its own transition
    /// before the evaluator gives up and logs a warning.
    pub max_trigger_passes: u32,
    /// Emit a `trace` event for every slot write.
    pub trace_slot_writes: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_trigger_passes: 16,
            trace_slot_writes: false,
        }
    }
}

impl TreeConfig {
    /// Sets [`TreeConfig::max_trigger_passes`]; clamped to at least one.
    #[must_use]
    pub fn with_max_trigger_passes(mut self, passes: u32) -> Self {
        self.max_trigger_passes = passes.max(1);
        self
    }

    /// Sets [`TreeConfig::trace_slot_writes`].
    #[must_use]
    pub fn with_trace_slot_writes(mut self, enabled: bool) -> Self {
        self.trace_slot_writes = enabled;
        self
    }
}

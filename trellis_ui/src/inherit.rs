// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Inheritance cascade.
//!
//! A child's Inherited slot mirrors its parent's effective value for every
//! inheritable property whose parent value does not come from the default.
//! The slot is written even when a higher layer overrides it, so removing the
//! override later reveals the right value; the cascade itself only continues
//! below children whose effective value actually changed.

use trellis_property::{Layer, PropertyId, ValueSource};

use crate::element::ElementId;
use crate::tree::{ElementTree, SlotWrite};

impl ElementTree {
    /// Re-seeds every inheritable property of `child` from its current parent,
    /// or clears them when it has none.
    pub(crate) fn seed_inherited(&self, child: ElementId) {
        let parent = self.parent(child);
        let inheritable: Vec<PropertyId> = self.inner.registry.inheritable().collect();
        for property in inheritable {
            self.inherit_from(parent, child, property);
        }
    }

    /// Pushes `parent`'s effective `property` into each child.
    pub(crate) fn cascade(&self, parent: ElementId, property: PropertyId) {
        let children = self.children(parent);
        for child in children {
            self.inherit_from(Some(parent), child, property);
        }
    }

    fn inherit_from(&self, parent: Option<ElementId>, child: ElementId, property: PropertyId) {
        let write = match parent.and_then(|p| self.effective(p, property)) {
            Some((value, source)) if source != ValueSource::Default => SlotWrite::Set(Layer::Inherited, value),
            _ => SlotWrite::Clear(Layer::Inherited),
        };
        if let Err(error) = self.write_slot(child, property, write) {
            tracing::debug!(child = %child, property = %property, %error, "inheritance skipped");
        }
    }
}

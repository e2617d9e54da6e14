// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Element identifiers and the slot arena behind the tree.

use std::rc::Rc;

use hashbrown::HashSet;
use trellis_property::PropertyStore;

use crate::resource::ResourceDictionary;
use crate::style::{ControlTemplate, Style};
use crate::trigger::{Storyboard, TriggerInstance};
use crate::validation::ValidationError;

/// Identifier for an element in an [`ElementTree`](crate::ElementTree).
///
/// A small, copyable handle made of a slot index and a generation counter.
///
/// - On insert, a fresh slot is allocated with generation `1`.
/// - On remove, the slot is freed; any existing `ElementId` that pointed to
///   that slot is now stale.
/// - On reuse of a freed slot, its generation is incremented, producing a new,
///   distinct `ElementId`.
///
/// Stale ids never alias a different live element because the generation must
/// match. Use [`ElementTree::is_alive`](crate::ElementTree::is_alive) to check.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ElementId(pub(crate) u32, pub(crate) u32);

impl ElementId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for ElementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "element #{}v{}", self.0, self.1)
    }
}

/// Everything the engine keeps per element.
pub(crate) struct ElementData {
    pub(crate) type_name: &'static str,
    pub(crate) parent: Option<ElementId>,
    /// Parent under construction, used only while `parent` is `None`.
    pub(crate) ambient_parent: Option<ElementId>,
    pub(crate) children: Vec<ElementId>,
    /// Elements created with this one as their ambient parent.
    pub(crate) ambient_children: Vec<ElementId>,
    pub(crate) store: PropertyStore<ElementId>,
    pub(crate) name: Option<Rc<str>>,
    pub(crate) name_scope: bool,
    pub(crate) resources: ResourceDictionary,
    pub(crate) explicit_style: Option<Style>,
    /// Explicit or implicit style currently applied.
    pub(crate) style: Option<Style>,
    pub(crate) template: Option<ControlTemplate>,
    pub(crate) style_triggers: Vec<TriggerInstance>,
    pub(crate) template_triggers: Vec<TriggerInstance>,
    pub(crate) storyboards: Vec<(Rc<str>, Rc<dyn Storyboard>)>,
    pub(crate) group: Option<u64>,
    pub(crate) errors: Vec<ValidationError>,
    /// Expressions delivering into this element.
    pub(crate) expressions: Vec<u64>,
}

impl ElementData {
    fn new(id: ElementId, type_name: &'static str, ambient_parent: Option<ElementId>) -> Self {
        Self {
            type_name,
            parent: None,
            ambient_parent,
            children: Vec::new(),
            ambient_children: Vec::new(),
            store: PropertyStore::new(id),
            name: None,
            name_scope: false,
            resources: ResourceDictionary::new(),
            explicit_style: None,
            style: None,
            template: None,
            style_triggers: Vec::new(),
            template_triggers: Vec::new(),
            storyboards: Vec::new(),
            group: None,
            errors: Vec::new(),
            expressions: Vec::new(),
        }
    }

    pub(crate) fn trigger(&self, instance: u64) -> Option<&TriggerInstance> {
        self.style_triggers
            .iter()
            .chain(&self.template_triggers)
            .find(|t| t.id == instance)
    }

    pub(crate) fn trigger_mut(&mut self, instance: u64) -> Option<&mut TriggerInstance> {
        self.style_triggers
            .iter_mut()
            .chain(&mut self.template_triggers)
            .find(|t| t.id == instance)
    }

    /// Active trigger instances in application order: style, then template.
    pub(crate) fn triggers(&self) -> impl Iterator<Item = &TriggerInstance> {
        self.style_triggers.iter().chain(&self.template_triggers)
    }
}

struct Slot {
    generation: u32,
    data: Option<ElementData>,
}

/// Generational slot arena.
#[derive(Default)]
pub(crate) struct Elements {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl Elements {
    pub(crate) fn insert(&mut self, type_name: &'static str, ambient_parent: Option<ElementId>) -> ElementId {
        let id = if let Some(idx) = self.free.pop() {
            let slot = &mut self.slots[idx as usize];
            slot.generation = slot.generation.wrapping_add(1);
            let id = ElementId::new(idx, slot.generation);
            slot.data = Some(ElementData::new(id, type_name, ambient_parent));
            id
        } else {
            let idx = u32::try_from(self.slots.len()).unwrap_or_else(|_| panic!("too many elements"));
            let id = ElementId::new(idx, 1);
            self.slots.push(Slot {
                generation: 1,
                data: Some(ElementData::new(id, type_name, ambient_parent)),
            });
            id
        };
        if let Some(ambient) = ambient_parent.and_then(|ambient| self.get_mut(ambient)) {
            ambient.ambient_children.push(id);
        }
        id
    }

    pub(crate) fn get(&self, id: ElementId) -> Option<&ElementData> {
        self.slots
            .get(id.idx())
            .filter(|slot| slot.generation == id.1)
            .and_then(|slot| slot.data.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: ElementId) -> Option<&mut ElementData> {
        self.slots
            .get_mut(id.idx())
            .filter(|slot| slot.generation == id.1)
            .and_then(|slot| slot.data.as_mut())
    }

    pub(crate) fn remove(&mut self, id: ElementId) -> Option<ElementData> {
        let slot = self
            .slots
            .get_mut(id.idx())
            .filter(|slot| slot.generation == id.1)?;
        let data = slot.data.take()?;
        self.free.push(id.0);
        if let Some(ambient) = data.ambient_parent.and_then(|ambient| self.get_mut(ambient)) {
            ambient.ambient_children.retain(|child| *child != id);
        }
        Some(data)
    }

    pub(crate) fn is_alive(&self, id: ElementId) -> bool {
        self.get(id).is_some()
    }

    /// Live ids, in slot order.
    pub(crate) fn ids(&self) -> Vec<ElementId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.data.is_some())
            .map(|(idx, slot)| {
                #[expect(clippy::cast_possible_truncation, reason = "slot count fits in u32")]
                ElementId::new(idx as u32, slot.generation)
            })
            .collect()
    }

    pub(crate) fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.get(id).and_then(|data| data.parent)
    }

    /// Visual ancestors of `id`, nearest first, excluding `id`.
    pub(crate) fn ancestors(&self, id: ElementId) -> Ancestors<'_> {
        Ancestors {
            elements: self,
            next: self.parent(id),
        }
    }

    /// `id` itself, its visual ancestors, then the ambient chain of the
    /// topmost one. This is the resource lookup order.
    pub(crate) fn lookup_chain(&self, id: ElementId) -> Vec<ElementId> {
        let mut chain = Vec::new();
        let mut next = Some(id);
        while let Some(current) = next {
            // Ambient links can only point at elements created earlier, but a
            // reparent can still close a loop.
            if chain.contains(&current) {
                break;
            }
            chain.push(current);
            next = self
                .get(current)
                .and_then(|data| data.parent.or(data.ambient_parent));
        }
        chain
    }

    /// `root` and its descendants, pre-order.
    pub(crate) fn subtree(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(data) = self.get(id) else { continue };
            out.push(id);
            stack.extend(data.children.iter().rev());
        }
        out
    }

    /// `root` and every element whose lookup chain passes through it: its
    /// descendants, and unattached elements built inside any of them.
    pub(crate) fn lookup_scope(&self, root: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(data) = self.get(id) else { continue };
            if !seen.insert(id) {
                continue;
            }
            out.push(id);
            stack.extend(data.children.iter().rev());
            stack.extend(data.ambient_children.iter().filter(|child| {
                self.get(**child)
                    .is_some_and(|c| c.parent.is_none() && c.ambient_parent == Some(id))
            }));
        }
        out
    }

    pub(crate) fn is_ancestor_or_self(&self, ancestor: ElementId, id: ElementId) -> bool {
        id == ancestor || self.ancestors(id).any(|a| a == ancestor)
    }
}

/// Iterator over visual ancestors, nearest first.
pub(crate) struct Ancestors<'a> {
    elements: &'a Elements,
    next: Option<ElementId>,
}

impl Iterator for Ancestors<'_> {
    type Item = ElementId;

    fn next(&mut self) -> Option<ElementId> {
        let current = self.next?;
        self.next = self.elements.parent(current);
        Some(current)
    }
}

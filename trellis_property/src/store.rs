// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-element property storage with precedence slots.
//!
//! Each touched property gets an entry holding at most one value per
//! [`Layer`]. The effective value is the value in the highest occupied layer,
//! or the registered default when every layer is empty.
//!
//! # Layout
//!
//! Entries live in a sorted `SmallVec` keyed by [`PropertyId`] and looked up by
//! binary search. Inside an entry the occupied layers are kept sorted from
//! highest to lowest precedence, so the effective value is always the first
//! one. Typical elements touch a handful of properties and two or fewer layers
//! per property, so both vectors normally stay inline.
//!
//! # Expressions
//!
//! The Local layer can be owned by an expression (a binding or a resource
//! reference living in a higher layer of the engine). The store only keeps the
//! opaque [`ExpressionTag`]; a literal Local write displaces it and hands it
//! back so the owner can tear the expression down.
//!
//! # Animation shadow
//!
//! The first write into the Animation layer snapshots the effective value and
//! its source. Vacating the Animation layer puts the Local layer back the way
//! the snapshot found it: a literal Local value is written back, and when the
//! snapshot came from a lower layer or the default, a literal written to Local
//! underneath the animation is dropped. Managed layers (style, trigger,
//! template, inheritance, expression-owned Local) keep their live contents.

use smallvec::SmallVec;

use crate::id::{Property, PropertyId};
use crate::registry::PropertyRegistry;
use crate::value::{ErasedValue, PropertyValue};

const INLINE_ENTRIES: usize = 4;

/// A writable precedence layer, highest first.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Layer {
    /// Composed value presented by the animation collaborator.
    Animation,
    /// Direct assignment, a binding, or a dynamic resource reference.
    Local,
    /// Setters of active style and template triggers.
    StyleTrigger,
    /// Values written while instantiating a control template.
    Template,
    /// Setters of the applied style.
    Style,
    /// Value cascaded from the parent element.
    Inherited,
}

impl Layer {
    /// All layers, highest precedence first.
    pub const ALL: [Self; 6] = [
        Self::Animation,
        Self::Local,
        Self::StyleTrigger,
        Self::Template,
        Self::Style,
        Self::Inherited,
    ];
}

/// Label of the layer that produced an effective value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ValueSource {
    /// [`Layer::Animation`].
    Animation,
    /// [`Layer::Local`].
    Local,
    /// [`Layer::StyleTrigger`].
    StyleTrigger,
    /// [`Layer::Template`].
    Template,
    /// [`Layer::Style`].
    Style,
    /// [`Layer::Inherited`].
    Inherited,
    /// No layer is occupied; the metadata default applies.
    Default,
}

impl From<Layer> for ValueSource {
    fn from(layer: Layer) -> Self {
        match layer {
            Layer::Animation => Self::Animation,
            Layer::Local => Self::Local,
            Layer::StyleTrigger => Self::StyleTrigger,
            Layer::Template => Self::Template,
            Layer::Style => Self::Style,
            Layer::Inherited => Self::Inherited,
        }
    }
}

impl ValueSource {
    /// The layer behind this source, `None` for [`ValueSource::Default`].
    #[must_use]
    pub fn layer(self) -> Option<Layer> {
        match self {
            Self::Animation => Some(Layer::Animation),
            Self::Local => Some(Layer::Local),
            Self::StyleTrigger => Some(Layer::StyleTrigger),
            Self::Template => Some(Layer::Template),
            Self::Style => Some(Layer::Style),
            Self::Inherited => Some(Layer::Inherited),
            Self::Default => None,
        }
    }
}

/// Opaque handle of the expression owning a Local layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExpressionTag(pub u64);

#[derive(Clone, Debug)]
struct Shadow {
    /// `None` when the default was in effect.
    value: Option<ErasedValue>,
    source: ValueSource,
    local_literal: bool,
}

#[derive(Clone, Debug, Default)]
struct PropertyEntry {
    /// Occupied layers, sorted highest precedence first.
    layers: SmallVec<[(Layer, ErasedValue); 2]>,
    expression: Option<ExpressionTag>,
    shadow: Option<Shadow>,
}

impl PropertyEntry {
    fn find(&self, layer: Layer) -> Result<usize, usize> {
        self.layers.binary_search_by_key(&layer, |(l, _)| *l)
    }

    fn get(&self, layer: Layer) -> Option<&ErasedValue> {
        self.find(layer).ok().map(|idx| &self.layers[idx].1)
    }

    fn set(&mut self, layer: Layer, value: ErasedValue) {
        match self.find(layer) {
            Ok(idx) => self.layers[idx].1 = value,
            Err(idx) => self.layers.insert(idx, (layer, value)),
        }
    }

    fn clear(&mut self, layer: Layer) -> bool {
        match self.find(layer) {
            Ok(idx) => {
                self.layers.remove(idx);
                true
            }
            Err(_) => false,
        }
    }

    fn effective(&self) -> Option<(&ErasedValue, ValueSource)> {
        self.layers
            .first()
            .map(|(layer, value)| (value, ValueSource::from(*layer)))
    }
}

/// Sparse per-element storage for all precedence layers.
///
/// ```rust
/// use trellis_property::{Layer, PropertyMetadata, PropertyRegistry, PropertyStore, ValueSource};
///
/// let mut registry = PropertyRegistry::new();
/// let width = registry.register("Element", "Width", PropertyMetadata::new(0.0_f64));
///
/// let mut store = PropertyStore::new(1_u32);
/// store.set_typed(width, Layer::Style, 40.0);
/// store.set_typed(width, Layer::Local, 100.0);
/// assert_eq!(store.get_effective(width, &registry), 100.0);
/// assert_eq!(store.value_source(width.id()), ValueSource::Local);
///
/// store.set_typed(width, Layer::Animation, 250.0);
/// assert_eq!(store.get_effective(width, &registry), 250.0);
/// store.clear(width.id(), Layer::Animation);
/// assert_eq!(store.get_effective(width, &registry), 100.0);
/// ```
#[derive(Clone, Debug)]
pub struct PropertyStore<K> {
    entries: SmallVec<[(PropertyId, PropertyEntry); INLINE_ENTRIES]>,
    owner: K,
}

impl<K: Copy + Eq> PropertyStore<K> {
    /// Creates an empty store for `owner`.
    #[must_use]
    pub fn new(owner: K) -> Self {
        Self {
            entries: SmallVec::new(),
            owner,
        }
    }

    /// The element this store belongs to.
    #[must_use]
    #[inline]
    pub fn owner(&self) -> K {
        self.owner
    }

    /// Number of entries, including entries whose layers are all empty.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no property was ever touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ids of every touched property, ascending.
    pub fn property_ids(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.entries.iter().map(|(id, _)| *id)
    }

    fn entry(&self, id: PropertyId) -> Option<&PropertyEntry> {
        self.entries
            .binary_search_by_key(&id, |(pid, _)| *pid)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }

    fn entry_mut(&mut self, id: PropertyId) -> &mut PropertyEntry {
        let idx = match self.entries.binary_search_by_key(&id, |(pid, _)| *pid) {
            Ok(idx) => idx,
            Err(idx) => {
                self.entries.insert(idx, (id, PropertyEntry::default()));
                idx
            }
        };
        &mut self.entries[idx].1
    }

    /// Value held in `layer`, if any.
    #[must_use]
    pub fn get(&self, id: PropertyId, layer: Layer) -> Option<&ErasedValue> {
        self.entry(id).and_then(|entry| entry.get(layer))
    }

    /// Returns `true` if `layer` is occupied.
    #[must_use]
    pub fn has(&self, id: PropertyId, layer: Layer) -> bool {
        self.get(id, layer).is_some()
    }

    /// Writes `value` into `layer`.
    ///
    /// A Local write stores a literal and returns the expression it displaced,
    /// if there was one. The first Animation write snapshots the current
    /// effective value for restoration.
    pub fn set(&mut self, id: PropertyId, layer: Layer, value: ErasedValue) -> Option<ExpressionTag> {
        let entry = self.entry_mut(id);
        let mut displaced = None;
        match layer {
            Layer::Animation if entry.get(Layer::Animation).is_none() => {
                let (value, source) = match entry.effective() {
                    Some((value, source)) => (Some(value.clone()), source),
                    None => (None, ValueSource::Default),
                };
                entry.shadow = Some(Shadow {
                    value,
                    source,
                    local_literal: source == ValueSource::Local && entry.expression.is_none(),
                });
            }
            Layer::Local => displaced = entry.expression.take(),
            _ => {}
        }
        entry.set(layer, value);
        displaced
    }

    /// Empties `layer`; returns `true` if it was occupied.
    ///
    /// Clearing Local also drops any expression tag. Clearing Animation
    /// restores the shadow snapshot as described in the module docs.
    pub fn clear(&mut self, id: PropertyId, layer: Layer) -> bool {
        let Ok(idx) = self.entries.binary_search_by_key(&id, |(pid, _)| *pid) else {
            return false;
        };
        let entry = &mut self.entries[idx].1;
        let removed = entry.clear(layer);
        match layer {
            Layer::Local => {
                entry.expression = None;
            }
            Layer::Animation => {
                if let Some(shadow) = entry.shadow.take()
                    && entry.expression.is_none()
                {
                    match shadow.value {
                        Some(value) if shadow.local_literal => entry.set(Layer::Local, value),
                        _ => {
                            entry.clear(Layer::Local);
                        }
                    }
                }
            }
            _ => {}
        }
        removed
    }

    /// Effective value and its source; `None` means the default applies.
    #[must_use]
    pub fn effective(&self, id: PropertyId) -> Option<(&ErasedValue, ValueSource)> {
        self.entry(id).and_then(PropertyEntry::effective)
    }

    /// Effective value resolved against the registry default.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not registered.
    #[must_use]
    pub fn effective_or_default<'a>(
        &'a self,
        id: PropertyId,
        registry: &'a PropertyRegistry,
    ) -> (&'a ErasedValue, ValueSource) {
        if let Some(found) = self.effective(id) {
            return found;
        }
        let registration = registry
            .get(id)
            .unwrap_or_else(|| panic!("{id} is not registered"));
        (registration.default_value(), ValueSource::Default)
    }

    /// Label of the layer producing the effective value.
    #[must_use]
    pub fn value_source(&self, id: PropertyId) -> ValueSource {
        self.effective(id)
            .map_or(ValueSource::Default, |(_, source)| source)
    }

    /// The expression owning the Local layer, if any.
    #[must_use]
    pub fn expression(&self, id: PropertyId) -> Option<ExpressionTag> {
        self.entry(id).and_then(|entry| entry.expression)
    }

    /// Hands the Local layer to an expression.
    ///
    /// Any literal Local value is discarded; the previous expression, if any,
    /// is returned. The layer stays empty until the expression produces a value
    /// through [`PropertyStore::set_expression_value`].
    pub fn install_expression(&mut self, id: PropertyId, tag: ExpressionTag) -> Option<ExpressionTag> {
        let entry = self.entry_mut(id);
        entry.clear(Layer::Local);
        entry.expression.replace(tag)
    }

    /// Writes the value produced by the expression `tag`.
    ///
    /// `None` empties the layer while keeping ownership. Returns `false`, and
    /// leaves the entry alone, when `tag` no longer owns the Local layer.
    pub fn set_expression_value(
        &mut self,
        id: PropertyId,
        tag: ExpressionTag,
        value: Option<ErasedValue>,
    ) -> bool {
        let entry = self.entry_mut(id);
        if entry.expression != Some(tag) {
            return false;
        }
        match value {
            Some(value) => entry.set(Layer::Local, value),
            None => {
                entry.clear(Layer::Local);
            }
        }
        true
    }

    /// Releases the expression `tag` and empties the Local layer.
    ///
    /// Returns `false` when `tag` did not own the layer.
    pub fn remove_expression(&mut self, id: PropertyId, tag: ExpressionTag) -> bool {
        let Ok(idx) = self.entries.binary_search_by_key(&id, |(pid, _)| *pid) else {
            return false;
        };
        let entry = &mut self.entries[idx].1;
        if entry.expression != Some(tag) {
            return false;
        }
        entry.expression = None;
        entry.clear(Layer::Local);
        true
    }

    /// Drops every expression tag, returning them with their property.
    pub fn drain_expressions(&mut self) -> SmallVec<[(PropertyId, ExpressionTag); 4]> {
        let mut drained = SmallVec::new();
        for (id, entry) in &mut self.entries {
            if let Some(tag) = entry.expression.take() {
                entry.clear(Layer::Local);
                drained.push((*id, tag));
            }
        }
        drained
    }

    // Typed conveniences.

    /// Typed read of one layer.
    #[must_use]
    pub fn get_typed<T: PropertyValue>(&self, property: Property<T>, layer: Layer) -> Option<&T> {
        self.get(property.id(), layer)
            .and_then(ErasedValue::downcast_ref)
    }

    /// Typed write of one layer; see [`PropertyStore::set`].
    pub fn set_typed<T: PropertyValue>(
        &mut self,
        property: Property<T>,
        layer: Layer,
        value: T,
    ) -> Option<ExpressionTag> {
        self.set(property.id(), layer, ErasedValue::new(value))
    }

    /// Typed effective value, falling back to the registry default.
    ///
    /// # Panics
    ///
    /// Panics if the property is not registered with type `T`.
    #[must_use]
    pub fn get_effective<T: PropertyValue>(&self, property: Property<T>, registry: &PropertyRegistry) -> T {
        self.get_effective_ref(property, registry).clone()
    }

    /// Borrowed variant of [`PropertyStore::get_effective`].
    ///
    /// # Panics
    ///
    /// Panics if the property is not registered with type `T`.
    #[must_use]
    pub fn get_effective_ref<'a, T: PropertyValue>(
        &'a self,
        property: Property<T>,
        registry: &'a PropertyRegistry,
    ) -> &'a T {
        if let Some((value, _)) = self.effective(property.id())
            && let Some(value) = value.downcast_ref::<T>()
        {
            return value;
        }
        match registry.get_metadata(property) {
            Some(metadata) => metadata.default_value(),
            None => panic!("{:?} is not registered with this type", property.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyMetadata;
    use alloc::string::String;

    fn setup() -> (PropertyRegistry, Property<f64>, Property<String>) {
        let mut registry = PropertyRegistry::new();
        let width = registry.register("E", "Width", PropertyMetadata::new(0.0_f64));
        let text = registry.register("E", "Text", PropertyMetadata::new(String::new()));
        (registry, width, text)
    }

    #[test]
    fn empty_store_reports_default() {
        let (registry, width, _) = setup();
        let store = PropertyStore::new(1_u32);
        assert_eq!(store.get_effective(width, &registry), 0.0);
        assert_eq!(store.value_source(width.id()), ValueSource::Default);
        assert!(store.is_empty());
    }

    #[test]
    fn every_layer_beats_the_ones_below() {
        let (registry, width, _) = setup();
        let mut store = PropertyStore::new(1_u32);
        // Fill lowest first, checking the new layer takes over each time.
        for (i, layer) in Layer::ALL.iter().rev().enumerate() {
            store.set_typed(width, *layer, i as f64);
            assert_eq!(store.get_effective(width, &registry), i as f64);
            assert_eq!(store.value_source(width.id()), ValueSource::from(*layer));
        }
        // Peel from the top.
        for layer in Layer::ALL {
            store.clear(width.id(), layer);
        }
        assert_eq!(store.value_source(width.id()), ValueSource::Default);
    }

    #[test]
    fn entries_survive_being_emptied() {
        let (_, width, _) = setup();
        let mut store = PropertyStore::new(1_u32);
        store.set_typed(width, Layer::Style, 1.0);
        assert!(store.clear(width.id(), Layer::Style));
        assert!(!store.clear(width.id(), Layer::Style));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn animation_restores_prior_local_literal() {
        let (registry, width, _) = setup();
        let mut store = PropertyStore::new(1_u32);
        store.set_typed(width, Layer::Local, 10.0);
        store.set_typed(width, Layer::Animation, 99.0);
        // A local edit underneath the animation does not survive it.
        store.set_typed(width, Layer::Local, 20.0);
        store.set_typed(width, Layer::Animation, 98.0);
        store.clear(width.id(), Layer::Animation);
        assert_eq!(store.get_effective(width, &registry), 10.0);
        assert_eq!(store.value_source(width.id()), ValueSource::Local);
    }

    #[test]
    fn animation_over_style_drops_local_edit() {
        let (registry, width, _) = setup();
        let mut store = PropertyStore::new(1_u32);
        store.set_typed(width, Layer::Style, 40.0);
        store.set_typed(width, Layer::Animation, 99.0);
        store.set_typed(width, Layer::Local, 20.0);
        assert_eq!(store.get_effective(width, &registry), 99.0);
        store.clear(width.id(), Layer::Animation);
        assert_eq!(store.get_effective(width, &registry), 40.0);
        assert_eq!(store.value_source(width.id()), ValueSource::Style);
        assert!(!store.has(width.id(), Layer::Local));
    }

    #[test]
    fn animation_keeps_an_expression_installed_underneath() {
        let (registry, _, text) = setup();
        let mut store = PropertyStore::new(1_u32);
        store.set_typed(text, Layer::Animation, String::from("animated"));
        store.install_expression(text.id(), ExpressionTag(3));
        store.set_expression_value(text.id(), ExpressionTag(3), Some(ErasedValue::new(String::from("bound"))));
        store.clear(text.id(), Layer::Animation);
        assert_eq!(store.get_effective(text, &registry), "bound");
        assert_eq!(store.expression(text.id()), Some(ExpressionTag(3)));
    }

    #[test]
    fn animation_over_default_restores_default() {
        let (registry, width, _) = setup();
        let mut store = PropertyStore::new(1_u32);
        store.set_typed(width, Layer::Animation, 5.0);
        store.clear(width.id(), Layer::Animation);
        assert_eq!(store.get_effective(width, &registry), 0.0);
        assert_eq!(store.value_source(width.id()), ValueSource::Default);
    }

    #[test]
    fn literal_local_displaces_expression() {
        let (_, _, text) = setup();
        let mut store = PropertyStore::new(1_u32);
        let tag = ExpressionTag(7);
        assert_eq!(store.install_expression(text.id(), tag), None);
        assert!(store.set_expression_value(text.id(), tag, Some(ErasedValue::new(String::from("bound")))));
        assert_eq!(store.value_source(text.id()), ValueSource::Local);
        assert_eq!(store.expression(text.id()), Some(tag));

        let displaced = store.set_typed(text, Layer::Local, String::from("literal"));
        assert_eq!(displaced, Some(tag));
        assert_eq!(store.expression(text.id()), None);
        // The stale expression can no longer write.
        assert!(!store.set_expression_value(text.id(), tag, Some(ErasedValue::new(String::new()))));
    }

    #[test]
    fn installing_expression_discards_literal() {
        let (registry, _, text) = setup();
        let mut store = PropertyStore::new(1_u32);
        store.set_typed(text, Layer::Local, String::from("literal"));
        store.install_expression(text.id(), ExpressionTag(1));
        assert_eq!(store.get_effective(text, &registry), String::new());
        assert!(store.remove_expression(text.id(), ExpressionTag(1)));
        assert_eq!(store.expression(text.id()), None);
    }

    #[test]
    fn drain_expressions_empties_local() {
        let (_, width, text) = setup();
        let mut store = PropertyStore::new(1_u32);
        store.install_expression(text.id(), ExpressionTag(1));
        store.install_expression(width.id(), ExpressionTag(2));
        let drained = store.drain_expressions();
        assert_eq!(drained.len(), 2);
        assert_eq!(store.expression(text.id()), None);
    }
}

// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property registry.
//!
//! Properties are keyed by `(owner type, name)` and carry their value type.
//! The registry keeps both the typed metadata and an erased view of it, so the
//! engine can resolve defaults, coerce values and fire callbacks without
//! knowing `T`.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::{Any, TypeId};
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::id::{Property, PropertyId};
use crate::metadata::{InvalidationHints, PropertyMetadata, UpdateSourceTrigger};
use crate::value::{ErasedValue, PropertyValue};

/// One registered property.
pub struct PropertyRegistration {
    owner: &'static str,
    name: &'static str,
    type_id: TypeId,
    type_name: &'static str,
    default_value: ErasedValue,
    metadata: Box<dyn ErasedMetadata>,
}

impl PropertyRegistration {
    /// Owner type name, e.g. `"TextBox"`.
    #[must_use]
    #[inline]
    pub fn owner(&self) -> &'static str {
        self.owner
    }

    /// Property name, e.g. `"Text"`.
    #[must_use]
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// [`TypeId`] of the value type.
    #[must_use]
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the value type, for diagnostics.
    #[must_use]
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Erased default value.
    #[must_use]
    #[inline]
    pub fn default_value(&self) -> &ErasedValue {
        &self.default_value
    }

    /// Whether the property inherits.
    #[must_use]
    #[inline]
    pub fn inherits(&self) -> bool {
        self.metadata.inherits()
    }

    /// Invalidation hints.
    #[must_use]
    #[inline]
    pub fn hints(&self) -> InvalidationHints {
        self.metadata.hints()
    }

    /// Whether default-mode bindings are two-way.
    #[must_use]
    #[inline]
    pub fn binds_two_way_by_default(&self) -> bool {
        self.metadata.binds_two_way_by_default()
    }

    /// Resolved default update trigger.
    #[must_use]
    #[inline]
    pub fn default_update_source_trigger(&self) -> UpdateSourceTrigger {
        self.metadata.default_update_source_trigger()
    }

    /// Returns `true` if `value` has the registered value type.
    #[must_use]
    #[inline]
    pub fn accepts(&self, value: &ErasedValue) -> bool {
        value.type_id() == self.type_id
    }

    /// Applies the coerce callback to an erased value of the right type.
    ///
    /// Values of the wrong type are returned untouched.
    #[must_use]
    pub fn coerce(&self, value: ErasedValue) -> ErasedValue {
        self.metadata.coerce(value)
    }

    /// Runs the changed callback with erased values.
    pub fn notify_changed(&self, old_value: &ErasedValue, new_value: &ErasedValue) {
        self.metadata.notify_changed(old_value, new_value);
    }
}

impl core::fmt::Debug for PropertyRegistration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyRegistration")
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("type", &self.type_name)
            .field("inherits", &self.inherits())
            .field("hints", &self.hints())
            .finish_non_exhaustive()
    }
}

/// Table of every registered property.
///
/// ```rust
/// use trellis_property::{InvalidationHints, PropertyMetadataBuilder, PropertyRegistry};
///
/// let mut registry = PropertyRegistry::new();
/// let width = registry.register(
///     "FrameworkElement",
///     "Width",
///     PropertyMetadataBuilder::new(0.0_f64)
///         .hints(InvalidationHints::AFFECTS_MEASURE)
///         .build(),
/// );
///
/// assert_eq!(registry.lookup("FrameworkElement", "Width"), Some(width.id()));
/// assert_eq!(registry.find("Width"), Some(width.id()));
/// assert!(registry.hints(width.id()).contains(InvalidationHints::AFFECTS_MEASURE));
/// ```
#[derive(Default)]
pub struct PropertyRegistry {
    properties: Vec<PropertyRegistration>,
    /// Every id registered under a name, in registration order.
    by_name: HashMap<&'static str, SmallVec<[PropertyId; 2]>>,
}

impl PropertyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `owner.name` with value type `T`.
    ///
    /// # Panics
    ///
    /// Panics if `owner.name` is already registered, or when the registry is
    /// full (`u16::MAX` properties).
    pub fn register<T: PropertyValue>(
        &mut self,
        owner: &'static str,
        name: &'static str,
        metadata: PropertyMetadata<T>,
    ) -> Property<T> {
        assert!(
            self.lookup(owner, name).is_none(),
            "property {owner}.{name} is already registered"
        );
        assert!(
            self.properties.len() < u16::MAX as usize,
            "too many properties registered (max {})",
            u16::MAX
        );

        #[expect(clippy::cast_possible_truncation, reason = "checked above")]
        let id = PropertyId::new(self.properties.len() as u16);

        self.properties.push(PropertyRegistration {
            owner,
            name,
            type_id: TypeId::of::<T>(),
            type_name: core::any::type_name::<T>(),
            default_value: ErasedValue::new(metadata.default_value().clone()),
            metadata: Box::new(metadata),
        });
        self.by_name.entry(name).or_default().push(id);

        Property::from_id(id)
    }

    /// Number of registered properties.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Looks up `owner.name`.
    #[must_use]
    pub fn lookup(&self, owner: &str, name: &str) -> Option<PropertyId> {
        self.by_name.get(name)?.iter().copied().find(|id| {
            self.get(*id)
                .is_some_and(|registration| registration.owner == owner)
        })
    }

    /// Looks up a property by bare name; the first registration wins.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PropertyId> {
        self.by_name.get(name).and_then(|ids| ids.first().copied())
    }

    /// Returns the registration for `id`.
    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&PropertyRegistration> {
        self.properties.get(usize::from(id.index()))
    }

    /// Property name, if registered.
    #[must_use]
    pub fn name(&self, id: PropertyId) -> Option<&'static str> {
        self.get(id).map(PropertyRegistration::name)
    }

    /// Whether `id` inherits. Unknown ids do not.
    #[must_use]
    pub fn inherits(&self, id: PropertyId) -> bool {
        self.get(id).is_some_and(PropertyRegistration::inherits)
    }

    /// Hints for `id`; empty for unknown ids.
    #[must_use]
    pub fn hints(&self, id: PropertyId) -> InvalidationHints {
        self.get(id)
            .map(PropertyRegistration::hints)
            .unwrap_or_default()
    }

    /// Typed metadata, or `None` if unknown or registered with another type.
    #[must_use]
    pub fn get_metadata<T: PropertyValue>(
        &self,
        property: Property<T>,
    ) -> Option<&PropertyMetadata<T>> {
        self.get(property.id())
            .and_then(|r| r.metadata.as_any().downcast_ref())
    }

    /// Ids of every inheritable property, in registration order.
    pub fn inheritable(&self) -> impl Iterator<Item = PropertyId> + '_ {
        self.iter()
            .filter(|(_, r)| r.inherits())
            .map(|(id, _)| id)
    }

    /// Iterates all registrations.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyRegistration)> {
        self.properties.iter().enumerate().map(|(i, r)| {
            #[expect(clippy::cast_possible_truncation, reason = "index < len < u16::MAX")]
            (PropertyId::new(i as u16), r)
        })
    }
}

impl core::fmt::Debug for PropertyRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_list()
            .entries(self.properties.iter().map(|r| (r.owner, r.name)))
            .finish()
    }
}

trait ErasedMetadata: Any {
    fn as_any(&self) -> &dyn Any;
    fn inherits(&self) -> bool;
    fn hints(&self) -> InvalidationHints;
    fn binds_two_way_by_default(&self) -> bool;
    fn default_update_source_trigger(&self) -> UpdateSourceTrigger;
    fn coerce(&self, value: ErasedValue) -> ErasedValue;
    fn notify_changed(&self, old_value: &ErasedValue, new_value: &ErasedValue);
}

impl<T: PropertyValue> ErasedMetadata for PropertyMetadata<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn inherits(&self) -> bool {
        Self::inherits(self)
    }

    fn hints(&self) -> InvalidationHints {
        Self::hints(self)
    }

    fn binds_two_way_by_default(&self) -> bool {
        Self::binds_two_way_by_default(self)
    }

    fn default_update_source_trigger(&self) -> UpdateSourceTrigger {
        Self::default_update_source_trigger(self)
    }

    fn coerce(&self, value: ErasedValue) -> ErasedValue {
        if !self.has_coerce_callback() {
            return value;
        }
        match value.get::<T>() {
            Some(typed) => ErasedValue::new(Self::coerce(self, typed)),
            None => value,
        }
    }

    fn notify_changed(&self, old_value: &ErasedValue, new_value: &ErasedValue) {
        if let (Some(old), Some(new)) = (old_value.downcast_ref::<T>(), new_value.downcast_ref::<T>())
        {
            self.on_changed(old, new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::PropertyMetadataBuilder;
    use alloc::string::String;
    use alloc::vec;

    #[test]
    fn owner_and_name_form_the_key() {
        let mut registry = PropertyRegistry::new();
        let a = registry.register("Button", "Content", PropertyMetadata::new(String::new()));
        let b = registry.register("Label", "Content", PropertyMetadata::new(String::new()));

        assert_ne!(a.id(), b.id());
        assert_eq!(registry.lookup("Label", "Content"), Some(b.id()));
        // Bare-name lookup keeps the first registration.
        assert_eq!(registry.find("Content"), Some(a.id()));
        assert_eq!(registry.lookup("Label", "Missing"), None);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_key_panics() {
        let mut registry = PropertyRegistry::new();
        registry.register("Button", "Content", PropertyMetadata::new(0_i32));
        registry.register("Button", "Content", PropertyMetadata::new(0_i32));
    }

    #[test]
    fn typed_metadata_rejects_wrong_type() {
        let mut registry = PropertyRegistry::new();
        let width = registry.register("E", "Width", PropertyMetadata::new(0.0_f64));
        assert!(registry.get_metadata(width).is_some());
        let forged: Property<i32> = Property::from_id(width.id());
        assert!(registry.get_metadata(forged).is_none());
    }

    #[test]
    fn erased_coerce_and_accepts() {
        let mut registry = PropertyRegistry::new();
        let opacity = registry.register(
            "E",
            "Opacity",
            PropertyMetadataBuilder::new(1.0_f64)
                .coerce(|v| v.clamp(0.0, 1.0))
                .build(),
        );
        let registration = registry.get(opacity.id()).unwrap();
        assert!(registration.accepts(&ErasedValue::new(0.5_f64)));
        assert!(!registration.accepts(&ErasedValue::new(1_i32)));
        assert_eq!(
            registration.coerce(ErasedValue::new(3.0_f64)),
            ErasedValue::new(1.0_f64)
        );
        assert_eq!(registration.default_value(), &ErasedValue::new(1.0_f64));
    }

    #[test]
    fn inheritable_ids_in_order() {
        let mut registry = PropertyRegistry::new();
        let font = registry.register(
            "E",
            "FontSize",
            PropertyMetadataBuilder::new(12.0_f64).inherits(true).build(),
        );
        registry.register("E", "Width", PropertyMetadata::new(0.0_f64));
        let culture = registry.register(
            "E",
            "Culture",
            PropertyMetadataBuilder::new(String::from("en")).inherits(true).build(),
        );
        let ids: Vec<_> = registry.inheritable().collect();
        assert_eq!(ids, vec![font.id(), culture.id()]);
    }
}

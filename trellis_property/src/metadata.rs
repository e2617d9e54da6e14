// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-property metadata.
//!
//! [`PropertyMetadata`] is fixed at registration: default value, inheritance,
//! the invalidation hints handed to layout and render collaborators, binding
//! defaults, and optional coerce/changed callbacks.

use alloc::boxed::Box;

use crate::value::PropertyValue;

bitflags::bitflags! {
    /// Opaque invalidation hints attached to a property.
    ///
    /// The engine never interprets these; it forwards them with every change
    /// notification so layout and render collaborators can decide what to
    /// redo. Bits above the named ones are free for collaborator use.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InvalidationHints: u32 {
        /// Changing the value invalidates the element's measure pass.
        const AFFECTS_MEASURE = 1 << 0;
        /// Changing the value invalidates the element's arrange pass.
        const AFFECTS_ARRANGE = 1 << 1;
        /// Changing the value invalidates the element's rendering.
        const AFFECTS_RENDER = 1 << 2;
        /// Changing the value invalidates the parent's measure pass.
        const AFFECTS_PARENT_MEASURE = 1 << 3;
        /// Changing the value invalidates the parent's arrange pass.
        const AFFECTS_PARENT_ARRANGE = 1 << 4;
    }
}

/// When a two-way binding copies its target value back to the source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum UpdateSourceTrigger {
    /// Use the target property's declared default.
    #[default]
    Default,
    /// Every time the target value changes.
    PropertyChanged,
    /// When the target element loses focus.
    LostFocus,
    /// Only on an explicit `update_source` or a binding group commit.
    Explicit,
}

/// Called with `(old, new)` after the effective value changed.
pub type PropertyChangedCallback<T> = Box<dyn Fn(&T, &T)>;

/// Maps a proposed value to the value that is actually stored.
pub type CoerceValueCallback<T> = Box<dyn Fn(T) -> T>;

/// Registration-time description of a property.
///
/// ```rust
/// use trellis_property::{InvalidationHints, PropertyMetadataBuilder, UpdateSourceTrigger};
///
/// let text = PropertyMetadataBuilder::new(String::new())
///     .binds_two_way_by_default(true)
///     .default_update_source_trigger(UpdateSourceTrigger::LostFocus)
///     .hints(InvalidationHints::AFFECTS_MEASURE)
///     .build();
///
/// assert!(text.binds_two_way_by_default());
/// assert_eq!(text.default_update_source_trigger(), UpdateSourceTrigger::LostFocus);
/// ```
pub struct PropertyMetadata<T: PropertyValue> {
    default_value: T,
    inherits: bool,
    hints: InvalidationHints,
    binds_two_way_by_default: bool,
    default_update_source_trigger: UpdateSourceTrigger,
    changed_callback: Option<PropertyChangedCallback<T>>,
    coerce_callback: Option<CoerceValueCallback<T>>,
}

impl<T: PropertyValue> PropertyMetadata<T> {
    /// Metadata with only a default value.
    #[must_use]
    pub fn new(default_value: T) -> Self {
        PropertyMetadataBuilder::new(default_value).build()
    }

    /// The value reported when no slot is occupied.
    #[must_use]
    #[inline]
    pub fn default_value(&self) -> &T {
        &self.default_value
    }

    /// Whether the value flows down the element tree.
    #[must_use]
    #[inline]
    pub fn inherits(&self) -> bool {
        self.inherits
    }

    /// Invalidation hints forwarded with change notifications.
    #[must_use]
    #[inline]
    pub fn hints(&self) -> InvalidationHints {
        self.hints
    }

    /// Whether `BindingMode::Default` means two-way for this property.
    #[must_use]
    #[inline]
    pub fn binds_two_way_by_default(&self) -> bool {
        self.binds_two_way_by_default
    }

    /// What `UpdateSourceTrigger::Default` means for this property.
    ///
    /// Never returns [`UpdateSourceTrigger::Default`].
    #[must_use]
    #[inline]
    pub fn default_update_source_trigger(&self) -> UpdateSourceTrigger {
        match self.default_update_source_trigger {
            UpdateSourceTrigger::Default => UpdateSourceTrigger::PropertyChanged,
            trigger => trigger,
        }
    }

    /// Runs the changed callback, if any.
    #[inline]
    pub fn on_changed(&self, old_value: &T, new_value: &T) {
        if let Some(callback) = &self.changed_callback {
            callback(old_value, new_value);
        }
    }

    /// Runs the coerce callback, if any.
    #[inline]
    pub fn coerce(&self, value: T) -> T {
        match &self.coerce_callback {
            Some(callback) => callback(value),
            None => value,
        }
    }

    /// Whether a changed callback is installed.
    #[must_use]
    #[inline]
    pub fn has_changed_callback(&self) -> bool {
        self.changed_callback.is_some()
    }

    /// Whether a coerce callback is installed.
    #[must_use]
    #[inline]
    pub fn has_coerce_callback(&self) -> bool {
        self.coerce_callback.is_some()
    }
}

impl<T: PropertyValue> core::fmt::Debug for PropertyMetadata<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PropertyMetadata")
            .field("default_value", &self.default_value)
            .field("inherits", &self.inherits)
            .field("hints", &self.hints)
            .field("binds_two_way_by_default", &self.binds_two_way_by_default)
            .field(
                "default_update_source_trigger",
                &self.default_update_source_trigger,
            )
            .field("has_changed_callback", &self.changed_callback.is_some())
            .field("has_coerce_callback", &self.coerce_callback.is_some())
            .finish()
    }
}

/// Builder for [`PropertyMetadata`].
pub struct PropertyMetadataBuilder<T: PropertyValue> {
    metadata: PropertyMetadata<T>,
}

impl<T: PropertyValue> core::fmt::Debug for PropertyMetadataBuilder<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("PropertyMetadataBuilder")
            .field(&self.metadata)
            .finish()
    }
}

impl<T: PropertyValue> PropertyMetadataBuilder<T> {
    /// Starts from a default value; every flag off.
    #[must_use]
    pub fn new(default_value: T) -> Self {
        Self {
            metadata: PropertyMetadata {
                default_value,
                inherits: false,
                hints: InvalidationHints::empty(),
                binds_two_way_by_default: false,
                default_update_source_trigger: UpdateSourceTrigger::PropertyChanged,
                changed_callback: None,
                coerce_callback: None,
            },
        }
    }

    /// Makes the property inheritable.
    #[must_use]
    pub fn inherits(mut self, inherits: bool) -> Self {
        self.metadata.inherits = inherits;
        self
    }

    /// Sets the invalidation hints.
    #[must_use]
    pub fn hints(mut self, hints: InvalidationHints) -> Self {
        self.metadata.hints = hints;
        self
    }

    /// Makes `BindingMode::Default` resolve to two-way.
    #[must_use]
    pub fn binds_two_way_by_default(mut self, two_way: bool) -> Self {
        self.metadata.binds_two_way_by_default = two_way;
        self
    }

    /// Sets what `UpdateSourceTrigger::Default` resolves to.
    #[must_use]
    pub fn default_update_source_trigger(mut self, trigger: UpdateSourceTrigger) -> Self {
        self.metadata.default_update_source_trigger = trigger;
        self
    }

    /// Installs a callback run after every effective value change.
    #[must_use]
    pub fn on_changed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&T, &T) + 'static,
    {
        self.metadata.changed_callback = Some(Box::new(callback));
        self
    }

    /// Installs a coercion applied to every value before it is stored.
    #[must_use]
    pub fn coerce<F>(mut self, callback: F) -> Self
    where
        F: Fn(T) -> T + 'static,
    {
        self.metadata.coerce_callback = Some(Box::new(callback));
        self
    }

    /// Finishes the metadata.
    #[must_use]
    pub fn build(self) -> PropertyMetadata<T> {
        self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::Cell;

    #[test]
    fn defaults_are_conservative() {
        let metadata = PropertyMetadata::new(1.5_f64);
        assert_eq!(metadata.default_value(), &1.5);
        assert!(!metadata.inherits());
        assert!(metadata.hints().is_empty());
        assert!(!metadata.binds_two_way_by_default());
        assert_eq!(
            metadata.default_update_source_trigger(),
            UpdateSourceTrigger::PropertyChanged
        );
    }

    #[test]
    fn default_trigger_never_reports_default() {
        let metadata = PropertyMetadataBuilder::new(0_i32)
            .default_update_source_trigger(UpdateSourceTrigger::Default)
            .build();
        assert_eq!(
            metadata.default_update_source_trigger(),
            UpdateSourceTrigger::PropertyChanged
        );
    }

    #[test]
    fn coerce_and_changed_callbacks_run() {
        let seen = Rc::new(Cell::new(0_i32));
        let seen_in_callback = seen.clone();
        let metadata = PropertyMetadataBuilder::new(0_i32)
            .coerce(|v| v.clamp(0, 10))
            .on_changed(move |_, new| seen_in_callback.set(*new))
            .build();

        assert_eq!(metadata.coerce(42), 10);
        metadata.on_changed(&0, &7);
        assert_eq!(seen.get(), 7);
    }

    #[test]
    fn hints_combine() {
        let metadata = PropertyMetadataBuilder::new(0.0_f64)
            .hints(InvalidationHints::AFFECTS_MEASURE | InvalidationHints::AFFECTS_RENDER)
            .build();
        assert!(metadata.hints().contains(InvalidationHints::AFFECTS_RENDER));
        assert!(!metadata.hints().contains(InvalidationHints::AFFECTS_ARRANGE));
    }
}

// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Type-erased values.
//!
//! Everything that flows through slots, converters, resources and binding
//! paths is an [`ErasedValue`]. Equality is delegated to the concrete type, so
//! change detection ("did the effective value change?") stays exact.

use alloc::boxed::Box;
use core::any::{Any, TypeId};
use core::fmt;

/// Bound for anything storable in a property slot.
///
/// Blanket-implemented; there is nothing to implement by hand.
pub trait PropertyValue: Clone + PartialEq + fmt::Debug + 'static {}

impl<T: Clone + PartialEq + fmt::Debug + 'static> PropertyValue for T {}

/// Sentinel for "no value".
///
/// A multi-value converter receives it for a child binding that has neither a
/// resolved value nor a fallback, and may return it from `convert_back` to
/// leave the corresponding source untouched.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct UnsetValue;

/// A heap-allocated value of some [`PropertyValue`] type.
///
/// ```rust
/// use trellis_property::ErasedValue;
///
/// let a = ErasedValue::new(42_i32);
/// assert_eq!(a.downcast_ref::<i32>(), Some(&42));
/// assert_eq!(a, ErasedValue::new(42_i32));
/// assert_ne!(a, ErasedValue::new(42_i64));
/// ```
pub struct ErasedValue {
    inner: Box<dyn DynValue>,
    type_id: TypeId,
}

impl ErasedValue {
    /// Erases a concrete value.
    #[must_use]
    pub fn new<T: PropertyValue>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            inner: Box::new(value),
        }
    }

    /// Shorthand for an erased [`UnsetValue`].
    #[must_use]
    pub fn unset() -> Self {
        Self::new(UnsetValue)
    }

    /// Returns `true` if this is the [`UnsetValue`] sentinel.
    #[must_use]
    #[inline]
    pub fn is_unset(&self) -> bool {
        self.is::<UnsetValue>()
    }

    /// [`TypeId`] of the contained value.
    #[must_use]
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the contained type, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.inner.type_name()
    }

    /// Returns `true` if the contained value is a `T`.
    #[must_use]
    #[inline]
    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrows the contained value as `T`.
    #[must_use]
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        if self.is::<T>() {
            self.inner.as_any().downcast_ref()
        } else {
            None
        }
    }

    /// Clones the contained value out as `T`.
    #[must_use]
    pub fn get<T: PropertyValue>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }
}

impl Clone for ErasedValue {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone_boxed(),
            type_id: self.type_id,
        }
    }
}

impl PartialEq for ErasedValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.inner.eq_dyn(other.inner.as_any())
    }
}

impl fmt::Debug for ErasedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt_dyn(f)
    }
}

trait DynValue: Any {
    fn as_any(&self) -> &dyn Any;
    fn clone_boxed(&self) -> Box<dyn DynValue>;
    fn eq_dyn(&self, other: &dyn Any) -> bool;
    fn fmt_dyn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    fn type_name(&self) -> &'static str;
}

impl<T: PropertyValue> DynValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn DynValue> {
        Box::new(self.clone())
    }

    fn eq_dyn(&self, other: &dyn Any) -> bool {
        other.downcast_ref::<T>().is_some_and(|other| self == other)
    }

    fn fmt_dyn(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }

    fn type_name(&self) -> &'static str {
        core::any::type_name::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::String;

    #[test]
    fn equality_uses_concrete_type() {
        let a = ErasedValue::new(String::from("x"));
        let b = ErasedValue::new(String::from("x"));
        let c = ErasedValue::new(String::from("y"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(ErasedValue::new(1_u8), ErasedValue::new(1_u16));
    }

    #[test]
    fn debug_prints_inner_value() {
        let value = ErasedValue::new(Some(3_i32));
        assert_eq!(format!("{value:?}"), "Some(3)");
    }

    #[test]
    fn unset_sentinel() {
        assert!(ErasedValue::unset().is_unset());
        assert!(!ErasedValue::new(0_i32).is_unset());
    }

    #[test]
    fn clone_is_deep() {
        let value = ErasedValue::new(String::from("deep"));
        let cloned = value.clone();
        assert_eq!(cloned.get::<String>().as_deref(), Some("deep"));
        assert!(cloned.type_name().ends_with("String"));
    }
}

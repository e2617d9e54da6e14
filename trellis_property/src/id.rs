// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property handles.
//!
//! [`PropertyId`] is the untyped handle the engine passes around internally;
//! [`Property<T>`] carries the value type so typed reads and writes are
//! checked at compile time.

use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;

/// Untyped handle for a registered property.
///
/// Handed out by [`PropertyRegistry::register`](crate::PropertyRegistry::register).
/// The index is dense, so it doubles as a slot into the registry's table.
///
/// ```rust
/// use trellis_property::PropertyId;
///
/// let id = PropertyId::new(3);
/// assert_eq!(id.index(), 3);
/// ```
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PropertyId(u16);

impl PropertyId {
    /// Wraps a registry index.
    #[must_use]
    #[inline]
    pub const fn new(index: u16) -> Self {
        Self(index)
    }

    /// Returns the registry index.
    #[must_use]
    #[inline]
    pub const fn index(self) -> u16 {
        self.0
    }
}

impl fmt::Debug for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "property #{}", self.0)
    }
}

/// Typed property key.
///
/// The phantom `T` is the registered value type. Two handles with the same id
/// but different `T` compare equal by id; the registry refuses mismatched
/// metadata lookups, so a forged handle only ever yields `None`.
pub struct Property<T> {
    id: PropertyId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Property<T> {
    /// Builds a typed handle from an id registered with value type `T`.
    #[must_use]
    #[inline]
    pub const fn from_id(id: PropertyId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// Returns the untyped id.
    #[must_use]
    #[inline]
    pub const fn id(self) -> PropertyId {
        self.id
    }
}

impl<T> From<Property<T>> for PropertyId {
    #[inline]
    fn from(property: Property<T>) -> Self {
        property.id
    }
}

impl<T> Copy for Property<T> {}

impl<T> Clone for Property<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Property<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Property<T> {}

impl<T> Hash for Property<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("id", &self.id)
            .field("type", &core::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::String;

    #[test]
    fn id_formatting() {
        let id = PropertyId::new(7);
        assert_eq!(format!("{id:?}"), "#7");
        assert_eq!(format!("{id}"), "property #7");
    }

    #[test]
    fn typed_handle_converts_to_id() {
        let text: Property<String> = Property::from_id(PropertyId::new(2));
        let id: PropertyId = text.into();
        assert_eq!(id, PropertyId::new(2));
    }

    #[test]
    fn typed_handle_stays_compact() {
        use core::mem::size_of;
        assert_eq!(size_of::<Property<String>>(), size_of::<PropertyId>());
    }
}

// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis Property: dependency property metadata and layered storage.
//!
//! This crate is the data layer of the Trellis engine. It knows nothing about
//! element trees, bindings or styles; `trellis_ui` builds those on top.
//!
//! ## Core Concepts
//!
//! - [`PropertyRegistry`] maps `(owner, name)` to a typed [`Property<T>`]
//!   handle and keeps its [`PropertyMetadata`]: default value, inheritance,
//!   [`InvalidationHints`], and binding defaults.
//! - [`PropertyStore`] holds, per element, one value per precedence
//!   [`Layer`]:
//!
//!   **Animation → Local → `StyleTrigger` → Template → Style → Inherited → Default**
//!
//!   The effective value is the one in the highest occupied layer, and
//!   [`ValueSource`] names that layer.
//! - [`ErasedValue`] carries values of any [`PropertyValue`] type and compares
//!   them with the type's own equality, which is what change detection uses.
//!
//! ## Quick Start
//!
//! ```rust
//! use trellis_property::{
//!     InvalidationHints, Layer, PropertyMetadataBuilder, PropertyRegistry, PropertyStore,
//!     ValueSource,
//! };
//!
//! let mut registry = PropertyRegistry::new();
//! let font_size = registry.register(
//!     "TextElement",
//!     "FontSize",
//!     PropertyMetadataBuilder::new(12.0_f64)
//!         .inherits(true)
//!         .hints(InvalidationHints::AFFECTS_MEASURE)
//!         .build(),
//! );
//!
//! let mut store = PropertyStore::new(1_u32);
//! store.set_typed(font_size, Layer::Inherited, 14.0);
//! store.set_typed(font_size, Layer::Style, 16.0);
//! assert_eq!(store.get_effective(font_size, &registry), 16.0);
//! assert_eq!(store.value_source(font_size.id()), ValueSource::Style);
//! ```
//!
//! ## `no_std` Support
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod id;
mod metadata;
mod registry;
mod store;
mod value;

pub use id::{Property, PropertyId};
pub use metadata::{
    CoerceValueCallback, InvalidationHints, PropertyChangedCallback, PropertyMetadata,
    PropertyMetadataBuilder, UpdateSourceTrigger,
};
pub use registry::{PropertyRegistration, PropertyRegistry};
pub use store::{ExpressionTag, Layer, PropertyStore, ValueSource};
pub use value::{ErasedValue, PropertyValue, UnsetValue};

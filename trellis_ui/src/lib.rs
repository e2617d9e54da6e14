// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Trellis UI: element trees, styles, triggers, resources and data bindings.
//!
//! This crate builds the behaviour of a WPF-style property system on top of
//! the layered storage in [`trellis_property`]. An [`ElementTree`] owns the
//! elements; every value change flows through it, is compared by value, and
//! only a real change is propagated to listeners, inherited values,
//! triggers and bindings. Everything runs synchronously on the calling
//! thread.
//!
//! ## Pieces
//!
//! - **Inheritance**: properties registered with `inherits(true)` cascade
//!   down the tree and stop at descendants holding a higher layer.
//! - **Resources**: [`ResourceDictionary`] per element plus an application
//!   dictionary. Static lookups happen once; dynamic references
//!   ([`ElementTree::set_resource_reference`]) follow dictionary edits and
//!   tree moves. Type-keyed entries act as implicit styles.
//! - **Styles and templates**: [`Style`] and [`ControlTemplate`] write the
//!   Style and Template layers and carry [`Trigger`]s, [`MultiTrigger`]s,
//!   [`DataTrigger`]s and [`MultiDataTrigger`]s feeding the `StyleTrigger`
//!   layer.
//! - **Bindings**: [`Binding`], [`MultiBinding`] and [`PriorityBinding`]
//!   occupy the Local layer of their target. Paths walk [`BindingSource`]
//!   objects and element properties, re-subscribing whenever an intermediate
//!   step changes.
//! - **Validation**: rules, source exceptions and data errors become
//!   [`ValidationError`]s keyed by the binding that raised them.
//! - **Binding groups**: [`BindingGroup`] turns a set of bindings into one
//!   transaction with [`ElementTree::commit_edit`] and rollback on failure.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::cell::RefCell;
//!
//! use trellis_property::{ErasedValue, PropertyMetadata, PropertyRegistry, ValueSource};
//! use trellis_ui::{Binding, BindingSource, ElementTree, Notifier, Obj};
//!
//! #[derive(Default)]
//! struct Person {
//!     name: RefCell<String>,
//!     changed: Notifier<str>,
//! }
//!
//! impl BindingSource for Person {
//!     fn get(&self, member: &str) -> Option<ErasedValue> {
//!         (member == "Name").then(|| ErasedValue::new(self.name.borrow().clone()))
//!     }
//!
//!     fn property_changed(&self) -> Option<&Notifier<str>> {
//!         Some(&self.changed)
//!     }
//! }
//!
//! let mut registry = PropertyRegistry::new();
//! let text = registry.register("TextBlock", "Text", PropertyMetadata::new(String::new()));
//! let tree = ElementTree::new(registry);
//!
//! let window = tree.create_element("Window");
//! let label = tree.create_element("TextBlock");
//! tree.add_child(window, label).unwrap();
//!
//! let person = std::rc::Rc::new(Person::default());
//! *person.name.borrow_mut() = String::from("Ada");
//! tree.set_data_context(window, Some(Obj::from_rc(person.clone())));
//! tree.set_binding(label, text, Binding::new("Name")).unwrap();
//! assert_eq!(tree.get_value(label, text), "Ada");
//! assert_eq!(tree.value_source(label, text), ValueSource::Local);
//!
//! *person.name.borrow_mut() = String::from("Grace");
//! person.changed.notify("Name");
//! assert_eq!(tree.get_value(label, text), "Grace");
//! ```
//!
//! ## Threading
//!
//! [`ElementTree`] is an `Rc` handle and is neither `Send` nor `Sync`. Engine
//! state is never borrowed while user code runs, so listeners, converters,
//! sources and trigger actions may call back into the tree.

mod accessor;
mod binding;
mod config;
mod element;
mod error;
mod expression;
mod group;
mod inherit;
mod path;
mod resource;
mod source;
mod style;
mod tree;
mod trigger;
mod update;
mod validation;

pub use binding::{
    Binding, BindingBase, BindingId, BindingMode, BindingStatus, MultiBinding, MultiValueConverter,
    PriorityBinding, RelativeSource, UpdateSourceExceptionFilter, ValueConverter,
};
pub use config::TreeConfig;
pub use element::ElementId;
pub use error::{
    BindingError, BindingFault, ConstructionError, ConvertError, LoadError, SourceError,
    SourceLocation, TreeError,
};
pub use group::{BindingGroup, BindingGroupId};
pub use path::{PathError, PathStep, PropertyPath};
pub use resource::{ResourceDictionary, ResourceKey};
pub use source::{BindingSource, INDEXER_MEMBER, IndexKey, Notifier, Obj, Subscription};
pub use style::{ControlTemplate, Setter, SetterValue, Style, StyleBuilder, TemplateBuilder};
pub use tree::{ElementTree, FRAMEWORK_ELEMENT, PropertyChange};
pub use trigger::{
    BeginStoryboard, CallbackAction, Condition, DataTrigger, MultiDataTrigger, MultiTrigger,
    SetValueAction, StopStoryboard, Storyboard, Trigger, TriggerAction, TriggerBase,
    ValueAnimation,
};
pub use validation::{
    FnValidationRule, ValidationError, ValidationErrorKind, ValidationResult, ValidationRule,
    ValidationStep,
};

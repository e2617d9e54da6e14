// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resource dictionaries and lookup.
//!
//! Lookup walks the element's own dictionary, its visual ancestors, then the
//! construction-time ambient chain of the topmost unattached element, and
//! finally the application dictionary. The first match wins.
//!
//! Static resources are resolved once, at the point of use. Dynamic resource
//! references are expressions re-resolved whenever a dictionary on their
//! lookup chain changes or the element moves.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use trellis_property::{ErasedValue, Layer, PropertyId, PropertyValue};

use crate::element::ElementId;
use crate::error::{BindingError, ConstructionError, LoadError};
use crate::expression::{ExprKind, Expression, Sink};
use crate::tree::ElementTree;

/// Key of a dictionary entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    /// An explicit name.
    Name(Rc<str>),
    /// An element type; used for implicit styles.
    Type(&'static str),
}

impl ResourceKey {
    /// Key of the implicit style for `type_name`.
    #[must_use]
    pub fn of_type(type_name: &'static str) -> Self {
        Self::Type(type_name)
    }
}

impl From<&str> for ResourceKey {
    fn from(name: &str) -> Self {
        Self::Name(Rc::from(name))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Type(type_name) => write!(f, "{{x:Type {type_name}}}"),
        }
    }
}

/// Insertion-ordered key to value map with merged dictionaries.
///
/// Own entries shadow merged ones; merged dictionaries are searched last
/// added first.
///
/// ```rust
/// use trellis_ui::{ResourceDictionary, ResourceKey};
///
/// let mut theme = ResourceDictionary::new();
/// theme.insert("Accent", String::from("blue"));
/// theme.insert("Radius", 4.0_f64);
///
/// let mut local = ResourceDictionary::new();
/// local.insert("Accent", String::from("red"));
/// local.merge(theme);
///
/// let accent = local.get(&ResourceKey::from("Accent")).unwrap();
/// assert_eq!(accent.get::<String>().as_deref(), Some("red"));
/// assert!(local.get(&ResourceKey::from("Radius")).is_some());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceDictionary {
    entries: IndexMap<ResourceKey, ErasedValue>,
    merged: Vec<ResourceDictionary>,
}

impl ResourceDictionary {
    /// An empty dictionary.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under `key`, returning the previous own entry.
    pub fn insert<T: PropertyValue>(&mut self, key: impl Into<ResourceKey>, value: T) -> Option<ErasedValue> {
        self.insert_erased(key.into(), ErasedValue::new(value))
    }

    /// Erased form of [`ResourceDictionary::insert`].
    pub fn insert_erased(&mut self, key: ResourceKey, value: ErasedValue) -> Option<ErasedValue> {
        self.entries.insert(key, value)
    }

    /// Removes an own entry, keeping the order of the rest.
    pub fn remove(&mut self, key: &ResourceKey) -> Option<ErasedValue> {
        self.entries.shift_remove(key)
    }

    /// Looks `key` up in own entries, then merged dictionaries.
    #[must_use]
    pub fn get(&self, key: &ResourceKey) -> Option<&ErasedValue> {
        self.entries
            .get(key)
            .or_else(|| self.merged.iter().rev().find_map(|dict| dict.get(key)))
    }

    /// Returns `true` if `key` resolves in this dictionary.
    #[must_use]
    pub fn contains_key(&self, key: &ResourceKey) -> bool {
        self.get(key).is_some()
    }

    /// Appends a merged dictionary.
    pub fn merge(&mut self, dictionary: Self) {
        self.merged.push(dictionary);
    }

    /// Own keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.entries.keys()
    }

    /// Number of own entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no own entries and nothing merged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.merged.is_empty()
    }
}

impl ElementTree {
    /// Adds or replaces an entry in `element`'s dictionary.
    pub fn add_resource<T: PropertyValue>(&self, element: ElementId, key: impl Into<ResourceKey>, value: T) {
        let key = key.into();
        if let Some(data) = self.state_mut().element_mut(element) {
            data.resources.insert_erased(key.clone(), ErasedValue::new(value));
        } else {
            return;
        }
        tracing::debug!(element = %element, %key, "resource added");
        self.resources_changed(Some(element), Some(&key));
    }

    /// Removes an entry from `element`'s dictionary.
    pub fn remove_resource(&self, element: ElementId, key: &ResourceKey) -> bool {
        let removed = self
            .state_mut()
            .element_mut(element)
            .and_then(|data| data.resources.remove(key))
            .is_some();
        if removed {
            tracing::debug!(element = %element, %key, "resource removed");
            self.resources_changed(Some(element), Some(key));
        }
        removed
    }

    /// Replaces `element`'s whole dictionary.
    pub fn set_resources(&self, element: ElementId, resources: ResourceDictionary) {
        if let Some(data) = self.state_mut().element_mut(element) {
            data.resources = resources;
        } else {
            return;
        }
        self.resources_changed(Some(element), None);
    }

    /// A copy of `element`'s dictionary.
    #[must_use]
    pub fn resources(&self, element: ElementId) -> Option<ResourceDictionary> {
        self.state().element(element).map(|data| data.resources.clone())
    }

    /// Adds or replaces an application-wide entry.
    pub fn add_app_resource<T: PropertyValue>(&self, key: impl Into<ResourceKey>, value: T) {
        let key = key.into();
        self.state_mut()
            .app_resources
            .insert_erased(key.clone(), ErasedValue::new(value));
        tracing::debug!(%key, "application resource added");
        self.resources_changed(None, Some(&key));
    }

    /// Removes an application-wide entry.
    pub fn remove_app_resource(&self, key: &ResourceKey) -> bool {
        let removed = self.state_mut().app_resources.remove(key).is_some();
        if removed {
            self.resources_changed(None, Some(key));
        }
        removed
    }

    /// Looks `key` up from `element`.
    #[must_use]
    pub fn try_find_resource(&self, element: ElementId, key: &ResourceKey) -> Option<ErasedValue> {
        let state = self.state();
        state
            .elements
            .lookup_chain(element)
            .into_iter()
            .find_map(|id| state.element(id)?.resources.get(key).cloned())
            .or_else(|| state.app_resources.get(key).cloned())
    }

    /// Resolves a static resource reference; a missing key is a load error.
    pub fn static_resource(&self, element: ElementId, key: &ResourceKey) -> Result<ErasedValue, LoadError> {
        self.try_find_resource(element, key).ok_or_else(|| {
            ConstructionError::ResourceNotFound {
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Resolves a static resource and writes it into Local.
    pub fn set_static_resource(
        &self,
        element: ElementId,
        property: impl Into<PropertyId>,
        key: &ResourceKey,
    ) -> Result<(), LoadError> {
        let property = property.into();
        let value = self.static_resource(element, key)?;
        match self.set_value_erased(element, property, Layer::Local, value) {
            Ok(_) => Ok(()),
            Err(BindingError::TypeMismatch { expected, found }) => Err(ConstructionError::TypeMismatch {
                property: self.registry().name(property).unwrap_or("?"),
                expected,
                found,
            }
            .into()),
            Err(error) => {
                tracing::debug!(element = %element, %error, "static resource not applied");
                Ok(())
            }
        }
    }

    /// Makes Local of `property` follow the resource `key`.
    ///
    /// The reference is replaced by a later literal write or binding.
    pub fn set_resource_reference(
        &self,
        element: ElementId,
        property: impl Into<PropertyId>,
        key: impl Into<ResourceKey>,
    ) -> Result<(), BindingError> {
        let property = property.into();
        if !self.is_alive(element) {
            return Err(BindingError::StaleElement(element));
        }
        let sink = Sink::Slot {
            element,
            property,
            layer: Layer::Local,
        };
        let tag = self.create_resource_reference(sink, key.into());
        self.refresh(tag, true)
    }

    pub(crate) fn create_resource_reference(&self, sink: Sink, key: ResourceKey) -> u64 {
        let mut state = self.state_mut();
        let tag = state.next_serial();
        state.expressions.insert(
            tag,
            Expression {
                sink,
                kind: ExprKind::Resource(key),
            },
        );
        if let Some(data) = state.element_mut(sink.element()) {
            data.expressions.push(tag);
        }
        tag
    }

    /// Pushes the current value of a resource reference.
    pub(crate) fn refresh_resource(
        &self,
        tag: u64,
        sink: Sink,
        key: &ResourceKey,
        install: bool,
    ) -> Result<(), BindingError> {
        let mut value = self.try_find_resource(sink.element(), key);
        if let (Some(property), Some(found)) = (sink.property(), value.as_ref())
            && !self.registration(property).accepts(found)
        {
            tracing::warn!(%key, found = found.type_name(), "resource has the wrong type for its property");
            value = None;
        }
        if value.is_none() {
            tracing::debug!(expression = tag, %key, "resource reference unresolved");
        }
        self.deliver(tag, sink, value, install)
    }

    /// Re-resolves resource references and implicit styles of every element
    /// whose lookup chain passes through `scope` (all elements for the
    /// application dictionary). `key` narrows the update to one entry.
    pub(crate) fn resources_changed(&self, scope: Option<ElementId>, key: Option<&ResourceKey>) {
        let (restyle, mut tags) = {
            let state = self.state();
            let elements = match scope {
                Some(scope) => state.elements.lookup_scope(scope),
                None => state.elements.ids(),
            };
            let mut restyle = Vec::new();
            let mut tags = Vec::new();
            for id in elements {
                let Some(data) = state.element(id) else { continue };
                let implicit = match key {
                    None => true,
                    Some(ResourceKey::Type(t)) => data.type_name == *t,
                    Some(ResourceKey::Name(_)) => false,
                };
                if implicit {
                    restyle.push(id);
                }
                tags.extend(data.expressions.iter().copied().filter(|tag| {
                    state.expressions.get(tag).is_some_and(|e| match &e.kind {
                        ExprKind::Resource(k) => key.is_none_or(|key| k == key),
                        ExprKind::Binding(_) => false,
                    })
                }));
            }
            (restyle, tags)
        };
        tags.sort_unstable();
        for element in restyle {
            self.apply_style(element);
        }
        for tag in tags {
            self.refresh_logged(tag);
        }
    }

    /// Re-resolves everything resource-driven at or below `moved`.
    pub(crate) fn refresh_resources_under(&self, moved: ElementId) {
        self.resources_changed(Some(moved), None);
    }
}

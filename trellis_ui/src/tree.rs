// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The element tree and its write path.
//!
//! Every value change funnels through [`ElementTree::write_slot`]: the slot is
//! written, the effective value recomputed, and only if it changed by value
//! equality is a [`PropertyChange`] dispatched. Dispatch runs, in order, the
//! metadata changed callback, collaborator listeners, the inheritance cascade,
//! and dependents (bindings watching the property and triggers conditioned on
//! it). Everything completes before the originating call returns.
//!
//! # Borrowing
//!
//! Engine state lives in one `RefCell`. It is borrowed only for short,
//! callout-free sections; listeners, converters, sources and trigger actions
//! always run with no borrow held, so they may call back into the tree.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use hashbrown::{HashMap, HashSet};
use trellis_property::{
    ErasedValue, ExpressionTag, InvalidationHints, Layer, Property, PropertyId,
    PropertyMetadataBuilder, PropertyRegistration, PropertyRegistry, PropertyValue, ValueSource,
};

use crate::config::TreeConfig;
use crate::element::{ElementData, ElementId, Elements};
use crate::error::{BindingError, TreeError};
use crate::expression::{Dependent, Expression};
use crate::group::GroupState;
use crate::path::PathCache;
use crate::resource::ResourceDictionary;
use crate::source::{Notifier, Obj, Subscription};

/// Owner type name of the built-in `DataContext` property.
pub const FRAMEWORK_ELEMENT: &str = "FrameworkElement";

/// An effective value change, as seen by listeners.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyChange {
    /// Element whose value changed.
    pub element: ElementId,
    /// Property that changed.
    pub property: PropertyId,
    /// Effective value before the write.
    pub old_value: ErasedValue,
    /// Effective value after the write.
    pub new_value: ErasedValue,
    /// Layer producing `new_value`.
    pub source: ValueSource,
    /// The property's invalidation hints.
    pub hints: InvalidationHints,
}

/// One slot operation.
#[derive(Debug)]
pub(crate) enum SlotWrite {
    Set(Layer, ErasedValue),
    Clear(Layer),
    /// A value produced by the expression owning Local; `None` empties it.
    ExpressionValue(ExpressionTag, Option<ErasedValue>),
    /// Hands Local to an expression together with its first value.
    Install(ExpressionTag, Option<ErasedValue>),
    /// Releases an expression and empties Local.
    Release(ExpressionTag),
}

pub(crate) struct TreeInner {
    pub(crate) registry: PropertyRegistry,
    pub(crate) data_context: Property<Option<Obj>>,
    pub(crate) config: TreeConfig,
    pub(crate) state: RefCell<TreeState>,
    pub(crate) paths: RefCell<PathCache>,
    pub(crate) listeners: Notifier<PropertyChange>,
}

#[derive(Default)]
pub(crate) struct TreeState {
    pub(crate) elements: Elements,
    pub(crate) expressions: HashMap<u64, Expression>,
    /// Expressions with a link rooted at an element name.
    pub(crate) name_bound: HashSet<u64>,
    /// Bindings and triggers to re-evaluate when `(element, property)` changes.
    pub(crate) dependents: HashMap<(ElementId, PropertyId), Vec<Dependent>>,
    pub(crate) groups: HashMap<u64, GroupState>,
    pub(crate) app_resources: ResourceDictionary,
    next_serial: u64,
}

impl TreeState {
    /// Fresh id for expressions, trigger instances, groups and link epochs.
    pub(crate) fn next_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    pub(crate) fn add_dependent(&mut self, key: (ElementId, PropertyId), dependent: Dependent) {
        let list = self.dependents.entry(key).or_default();
        if !list.contains(&dependent) {
            list.push(dependent);
        }
    }

    pub(crate) fn remove_dependents(
        &mut self,
        key: (ElementId, PropertyId),
        mut matches: impl FnMut(&Dependent) -> bool,
    ) {
        if let Some(list) = self.dependents.get_mut(&key) {
            list.retain(|d| !matches(d));
            if list.is_empty() {
                self.dependents.remove(&key);
            }
        }
    }

    pub(crate) fn element(&self, id: ElementId) -> Option<&ElementData> {
        self.elements.get(id)
    }

    pub(crate) fn element_mut(&mut self, id: ElementId) -> Option<&mut ElementData> {
        self.elements.get_mut(id)
    }
}

/// A tree of elements with layered property values, resources, styles,
/// triggers and data bindings.
///
/// `ElementTree` is a cheap `Rc` handle; clones refer to the same tree. It is
/// neither `Send` nor `Sync`, so all access happens on the thread that created
/// it.
///
/// ```rust
/// use trellis_property::{PropertyMetadataBuilder, PropertyRegistry, ValueSource};
/// use trellis_ui::ElementTree;
///
/// let mut registry = PropertyRegistry::new();
/// let font_size = registry.register(
///     "Control",
///     "FontSize",
///     PropertyMetadataBuilder::new(12.0_f64).inherits(true).build(),
/// );
/// let tree = ElementTree::new(registry);
///
/// let window = tree.create_element("Window");
/// let button = tree.create_element("Button");
/// tree.add_child(window, button).unwrap();
///
/// tree.set_value(window, font_size, 20.0);
/// assert_eq!(tree.get_value(button, font_size), 20.0);
/// assert_eq!(tree.value_source(button, font_size), ValueSource::Inherited);
/// ```
#[derive(Clone)]
pub struct ElementTree {
    pub(crate) inner: Rc<TreeInner>,
}

impl fmt::Debug for ElementTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ElementTree")
            .field("elements", &state.elements.ids().len())
            .field("expressions", &state.expressions.len())
            .field("groups", &state.groups.len())
            .finish_non_exhaustive()
    }
}

/// Non-owning handle captured by source callbacks.
#[derive(Clone)]
pub(crate) struct WeakTree(Weak<TreeInner>);

impl WeakTree {
    pub(crate) fn upgrade(&self) -> Option<ElementTree> {
        self.0.upgrade().map(|inner| ElementTree { inner })
    }
}

impl ElementTree {
    /// Creates an empty tree over `registry` with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if `FrameworkElement.DataContext` is already registered.
    #[must_use]
    pub fn new(registry: PropertyRegistry) -> Self {
        Self::with_config(registry, TreeConfig::default())
    }

    /// Creates an empty tree with `config`.
    ///
    /// The tree registers the inheritable `FrameworkElement.DataContext`
    /// property itself; see [`ElementTree::data_context_property`].
    ///
    /// # Panics
    ///
    /// Panics if `FrameworkElement.DataContext` is already registered.
    #[must_use]
    pub fn with_config(mut registry: PropertyRegistry, config: TreeConfig) -> Self {
        let data_context = registry.register(
            FRAMEWORK_ELEMENT,
            "DataContext",
            PropertyMetadataBuilder::new(None::<Obj>).inherits(true).build(),
        );
        Self {
            inner: Rc::new(TreeInner {
                registry,
                data_context,
                config,
                state: RefCell::new(TreeState::default()),
                paths: RefCell::new(PathCache::default()),
                listeners: Notifier::new(),
            }),
        }
    }

    /// The property registry.
    #[must_use]
    #[inline]
    pub fn registry(&self) -> &PropertyRegistry {
        &self.inner.registry
    }

    /// The configuration.
    #[must_use]
    #[inline]
    pub fn config(&self) -> &TreeConfig {
        &self.inner.config
    }

    /// Handle of the built-in inheritable `DataContext` property.
    #[must_use]
    #[inline]
    pub fn data_context_property(&self) -> Property<Option<Obj>> {
        self.inner.data_context
    }

    /// Registers a collaborator listener for every effective value change.
    pub fn subscribe(&self, listener: impl Fn(&PropertyChange) + 'static) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    pub(crate) fn downgrade(&self) -> WeakTree {
        WeakTree(Rc::downgrade(&self.inner))
    }

    pub(crate) fn state(&self) -> Ref<'_, TreeState> {
        self.inner.state.borrow()
    }

    pub(crate) fn state_mut(&self) -> RefMut<'_, TreeState> {
        self.inner.state.borrow_mut()
    }

    /// Registration of `property`.
    ///
    /// # Panics
    ///
    /// Panics if `property` is not registered.
    pub(crate) fn registration(&self, property: PropertyId) -> &PropertyRegistration {
        self.inner
            .registry
            .get(property)
            .unwrap_or_else(|| panic!("{property} is not registered"))
    }

    // --- Element lifecycle ---------------------------------------------------

    /// Creates a detached element of `type_name`.
    pub fn create_element(&self, type_name: &'static str) -> ElementId {
        let id = self.state_mut().elements.insert(type_name, None);
        tracing::trace!(element = %id, type_name, "element created");
        self.apply_style(id);
        id
    }

    /// Creates a detached element whose resource lookups fall back to
    /// `ambient_parent` until it is attached.
    ///
    /// This is how a loader resolves static resources while building an
    /// element whose parent is itself still under construction.
    pub fn create_element_in(&self, type_name: &'static str, ambient_parent: ElementId) -> ElementId {
        let id = self
            .state_mut()
            .elements
            .insert(type_name, Some(ambient_parent));
        self.apply_style(id);
        id
    }

    /// Returns `true` if `element` refers to a live element.
    #[must_use]
    pub fn is_alive(&self, element: ElementId) -> bool {
        self.state().elements.is_alive(element)
    }

    /// Type name given at creation.
    #[must_use]
    pub fn type_name(&self, element: ElementId) -> Option<&'static str> {
        self.state().element(element).map(|data| data.type_name)
    }

    /// Visual parent.
    #[must_use]
    pub fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.state().elements.parent(element)
    }

    /// Children in insertion order.
    #[must_use]
    pub fn children(&self, element: ElementId) -> Vec<ElementId> {
        self.state()
            .element(element)
            .map(|data| data.children.clone())
            .unwrap_or_default()
    }

    /// Visual ancestors, nearest first.
    #[must_use]
    pub fn ancestors(&self, element: ElementId) -> Vec<ElementId> {
        self.state().elements.ancestors(element).collect()
    }

    /// Appends `child` to `parent`, detaching it from any previous parent.
    pub fn add_child(&self, parent: ElementId, child: ElementId) -> Result<(), TreeError> {
        {
            let mut state = self.state_mut();
            for id in [parent, child] {
                if !state.elements.is_alive(id) {
                    return Err(TreeError::StaleElement(id));
                }
            }
            if state.elements.is_ancestor_or_self(child, parent) {
                return Err(TreeError::WouldCycle { parent, child });
            }
            if let Some(old) = state.elements.parent(child)
                && let Some(data) = state.element_mut(old)
            {
                data.children.retain(|c| *c != child);
            }
            if let Some(data) = state.element_mut(child) {
                data.parent = Some(parent);
            }
            if let Some(data) = state.element_mut(parent) {
                data.children.push(child);
            }
        }
        tracing::debug!(parent = %parent, child = %child, "element attached");
        self.seed_inherited(child);
        self.structure_changed(child);
        Ok(())
    }

    /// Detaches `child` from its parent; returns `false` if it had none.
    ///
    /// The element stays alive and keeps its own values and bindings.
    pub fn detach(&self, child: ElementId) -> bool {
        {
            let mut state = self.state_mut();
            let Some(parent) = state.element_mut(child).and_then(|data| data.parent.take()) else {
                return false;
            };
            if let Some(data) = state.element_mut(parent) {
                data.children.retain(|c| *c != child);
            }
            tracing::debug!(parent = %parent, child = %child, "element detached");
        }
        self.seed_inherited(child);
        self.structure_changed(child);
        true
    }

    /// Detaches and destroys `element` and its subtree, releasing every
    /// binding, trigger, resource reference and binding group they own.
    pub fn remove(&self, element: ElementId) -> bool {
        if !self.is_alive(element) {
            return false;
        }
        self.detach(element);
        let (subtree, tags) = {
            let state = self.state();
            let subtree: HashSet<ElementId> = state.elements.subtree(element).into_iter().collect();
            let tags: Vec<u64> = subtree
                .iter()
                .filter_map(|id| state.element(*id))
                .flat_map(|data| data.expressions.iter().copied())
                .collect();
            (subtree, tags)
        };
        let released: Vec<Expression> = tags
            .into_iter()
            .filter_map(|tag| self.teardown_expression(tag))
            .collect();

        let removed: Vec<ElementData> = {
            let mut state = self.state_mut();
            state.dependents.retain(|(id, _), list| {
                list.retain(|d| !matches!(d, Dependent::Trigger { element, .. } if subtree.contains(element)));
                !subtree.contains(id) && !list.is_empty()
            });
            let groups: Vec<u64> = state
                .groups
                .iter()
                .filter(|(_, g)| subtree.contains(&g.owner))
                .map(|(key, _)| *key)
                .collect();
            for key in groups {
                state.drop_group(key);
            }
            subtree
                .iter()
                .filter_map(|id| state.elements.remove(*id))
                .collect()
        };
        tracing::debug!(element = %element, count = removed.len(), "subtree removed");
        drop(released);
        drop(removed);
        self.relink_structural(element);
        true
    }

    // --- Names --------------------------------------------------------------

    /// Sets the name used by `ElementName` bindings.
    pub fn set_name(&self, element: ElementId, name: &str) {
        if let Some(data) = self.state_mut().element_mut(element) {
            data.name = Some(Rc::from(name));
        }
        self.relink_structural(element);
    }

    /// The element's name.
    #[must_use]
    pub fn name(&self, element: ElementId) -> Option<Rc<str>> {
        self.state().element(element).and_then(|data| data.name.clone())
    }

    /// Makes `element` the root of its own name scope.
    pub fn set_name_scope(&self, element: ElementId, is_scope: bool) {
        if let Some(data) = self.state_mut().element_mut(element) {
            data.name_scope = is_scope;
        }
        self.relink_structural(element);
    }

    /// Finds `name` in the name scope enclosing `from`.
    ///
    /// The scope is rooted at the nearest ancestor-or-self marked as a name
    /// scope, or at the topmost ancestor. Nested scopes are opaque: their
    /// root's own name is visible, their descendants are not.
    #[must_use]
    pub fn find_name(&self, from: ElementId, name: &str) -> Option<ElementId> {
        let state = self.state();
        let elements = &state.elements;
        let is_scope = |id: ElementId| elements.get(id).is_some_and(|d| d.name_scope);
        let root = std::iter::once(from)
            .chain(elements.ancestors(from))
            .find(|id| is_scope(*id))
            .or_else(|| elements.ancestors(from).last())
            .unwrap_or(from);

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(data) = elements.get(id) else { continue };
            if data.name.as_deref() == Some(name) {
                return Some(id);
            }
            for child in data.children.iter().rev() {
                if is_scope(*child) {
                    if elements.get(*child).and_then(|d| d.name.as_deref()) == Some(name) {
                        return Some(*child);
                    }
                } else {
                    stack.push(*child);
                }
            }
        }
        None
    }

    // --- Values -------------------------------------------------------------

    /// Effective value.
    ///
    /// # Panics
    ///
    /// Panics if `element` is not alive or `property` is not registered with
    /// type `T`.
    #[must_use]
    pub fn get_value<T: PropertyValue>(&self, element: ElementId, property: Property<T>) -> T {
        self.try_get_value(element, property)
            .unwrap_or_else(|| panic!("{element} is no longer alive"))
    }

    /// Effective value, or `None` if `element` is not alive.
    ///
    /// # Panics
    ///
    /// Panics if `property` is not registered with type `T`.
    #[must_use]
    pub fn try_get_value<T: PropertyValue>(&self, element: ElementId, property: Property<T>) -> Option<T> {
        let state = self.state();
        let data = state.element(element)?;
        Some(data.store.get_effective(property, &self.inner.registry))
    }

    /// Erased effective value, or `None` if `element` is not alive.
    #[must_use]
    pub fn get_value_erased(&self, element: ElementId, property: impl Into<PropertyId>) -> Option<ErasedValue> {
        self.effective(element, property.into()).map(|(value, _)| value)
    }

    /// Label of the layer producing the effective value.
    #[must_use]
    pub fn value_source(&self, element: ElementId, property: impl Into<PropertyId>) -> ValueSource {
        let property = property.into();
        self.state()
            .element(element)
            .map_or(ValueSource::Default, |data| data.store.value_source(property))
    }

    /// Raw contents of one layer.
    #[must_use]
    pub fn layer_value(
        &self,
        element: ElementId,
        property: impl Into<PropertyId>,
        layer: Layer,
    ) -> Option<ErasedValue> {
        let property = property.into();
        self.state()
            .element(element)
            .and_then(|data| data.store.get(property, layer).cloned())
    }

    /// Writes a literal Local value, discarding any binding or resource
    /// reference on the property. Returns `true` if the effective value
    /// changed.
    pub fn set_value<T: PropertyValue>(&self, element: ElementId, property: Property<T>, value: T) -> bool {
        self.set_value_in(element, property, Layer::Local, value)
    }

    /// Writes `value` into `layer`. Returns `true` if the effective value
    /// changed.
    ///
    /// This is also the animation collaborator's entry point: writing
    /// [`Layer::Animation`] claims the slot, [`ElementTree::clear_value`]
    /// releases it.
    pub fn set_value_in<T: PropertyValue>(
        &self,
        element: ElementId,
        property: Property<T>,
        layer: Layer,
        value: T,
    ) -> bool {
        match self.write_slot(element, property.id(), SlotWrite::Set(layer, ErasedValue::new(value))) {
            Ok(changed) => changed,
            Err(error) => {
                tracing::debug!(element = %element, %error, "write ignored");
                false
            }
        }
    }

    /// Erased form of [`ElementTree::set_value_in`]; rejects values of the
    /// wrong type.
    pub fn set_value_erased(
        &self,
        element: ElementId,
        property: impl Into<PropertyId>,
        layer: Layer,
        value: ErasedValue,
    ) -> Result<bool, BindingError> {
        self.write_slot(element, property.into(), SlotWrite::Set(layer, value))
    }

    /// Empties `layer`. Clearing Local also removes a binding or resource
    /// reference. Returns `true` if the effective value changed.
    pub fn clear_value(&self, element: ElementId, property: impl Into<PropertyId>, layer: Layer) -> bool {
        self.write_slot(element, property.into(), SlotWrite::Clear(layer))
            .unwrap_or(false)
    }

    /// Sets the Local `DataContext`.
    pub fn set_data_context(&self, element: ElementId, context: Option<Obj>) -> bool {
        self.set_value(element, self.inner.data_context, context)
    }

    /// Effective `DataContext`.
    #[must_use]
    pub fn data_context(&self, element: ElementId) -> Option<Obj> {
        self.try_get_value(element, self.inner.data_context)
            .flatten()
    }

    pub(crate) fn effective(&self, element: ElementId, property: PropertyId) -> Option<(ErasedValue, ValueSource)> {
        let state = self.state();
        let data = state.element(element)?;
        let (value, source) = data.store.effective_or_default(property, &self.inner.registry);
        Some((value.clone(), source))
    }

    /// Type-checks and coerces a value bound for `property`.
    pub(crate) fn prepare(&self, property: PropertyId, value: ErasedValue) -> Result<ErasedValue, BindingError> {
        let registration = self.registration(property);
        if !registration.accepts(&value) {
            return Err(BindingError::TypeMismatch {
                expected: registration.type_name(),
                found: value.type_name(),
            });
        }
        Ok(registration.coerce(value))
    }

    /// Applies one slot operation and dispatches the change, if any.
    ///
    /// Returns whether the effective value changed.
    pub(crate) fn write_slot(
        &self,
        element: ElementId,
        property: PropertyId,
        write: SlotWrite,
    ) -> Result<bool, BindingError> {
        let write = match write {
            SlotWrite::Set(layer, value) => SlotWrite::Set(layer, self.prepare(property, value)?),
            SlotWrite::ExpressionValue(tag, Some(value)) => {
                SlotWrite::ExpressionValue(tag, Some(self.prepare(property, value)?))
            }
            SlotWrite::Install(tag, Some(value)) => SlotWrite::Install(tag, Some(self.prepare(property, value)?)),
            other => other,
        };
        if self.inner.config.trace_slot_writes {
            tracing::trace!(element = %element, property = %property, ?write, "slot write");
        }

        let registry = &self.inner.registry;
        let (old_value, new_value, source, displaced) = {
            let mut state = self.state_mut();
            let data = state
                .element_mut(element)
                .ok_or(BindingError::StaleElement(element))?;
            let store = &mut data.store;
            let old_value = store.effective_or_default(property, registry).0.clone();
            let mut displaced = None;
            match write {
                SlotWrite::Set(layer, value) => displaced = store.set(property, layer, value),
                SlotWrite::Clear(layer) => {
                    if layer == Layer::Local {
                        displaced = store.expression(property);
                    }
                    store.clear(property, layer);
                }
                SlotWrite::ExpressionValue(tag, value) => {
                    if !store.set_expression_value(property, tag, value) {
                        return Ok(false);
                    }
                }
                SlotWrite::Install(tag, value) => {
                    displaced = store.install_expression(property, tag);
                    store.set_expression_value(property, tag, value);
                }
                SlotWrite::Release(tag) => {
                    if !store.remove_expression(property, tag) {
                        return Ok(false);
                    }
                }
            }
            let (new_value, source) = store.effective_or_default(property, registry);
            (old_value, new_value.clone(), source, displaced)
        };

        if let Some(tag) = displaced {
            drop(self.teardown_expression(tag.0));
        }
        if old_value == new_value {
            return Ok(false);
        }
        self.dispatch_change(PropertyChange {
            element,
            property,
            old_value,
            new_value,
            source,
            hints: registry.hints(property),
        });
        Ok(true)
    }

    fn dispatch_change(&self, change: PropertyChange) {
        let registration = self.registration(change.property);
        registration.notify_changed(&change.old_value, &change.new_value);
        self.inner.listeners.notify(&change);
        if registration.inherits() {
            self.cascade(change.element, change.property);
        }
        self.notify_dependents(change.element, change.property);
    }

    pub(crate) fn notify_dependents(&self, element: ElementId, property: PropertyId) {
        let dependents = self
            .state()
            .dependents
            .get(&(element, property))
            .cloned()
            .unwrap_or_default();
        for dependent in dependents {
            match dependent {
                Dependent::Link {
                    expression,
                    child,
                    epoch,
                } => self.relink(expression, child, epoch),
                Dependent::Trigger { element, instance } => self.evaluate_trigger(element, instance),
            }
        }
    }

    /// Re-runs everything that depends on tree shape after `moved` was
    /// attached or detached.
    fn structure_changed(&self, moved: ElementId) {
        self.relink_structural(moved);
        self.reselect_groups(moved);
        self.refresh_resources_under(moved);
    }
}

// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Property and data triggers.
//!
//! A trigger instance is created per element for every trigger of its style
//! or template. It tracks whether its conditions hold. On a false to true
//! transition the trigger's setters join the StyleTrigger layer and its enter
//! actions run; on true to false the setters are withdrawn and the exit
//! actions run.
//!
//! # Re-entrancy
//!
//! Actions may write the very properties the trigger watches. Evaluation is
//! single-flight per instance: a re-evaluation requested while a transition
//! is running is only recorded, and replayed once the running action list has
//! completed. Replays are bounded by
//! [`TreeConfig::max_trigger_passes`](crate::TreeConfig::max_trigger_passes).

use std::fmt;
use std::rc::Rc;

use smallvec::SmallVec;
use trellis_property::{ErasedValue, Layer, Property, PropertyId, PropertyValue, UpdateSourceTrigger};

use crate::binding::{Binding, BindingBase, BindingMode};
use crate::element::ElementId;
use crate::error::{ConstructionError, LoadError};
use crate::expression::{Dependent, Expression, Sink};
use crate::tree::{ElementTree, SlotWrite};

/// Something a trigger does when it enters or leaves its satisfied state.
pub trait TriggerAction {
    /// Runs the action on the element owning the trigger.
    fn invoke(&self, tree: &ElementTree, element: ElementId);
}

impl fmt::Debug for dyn TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TriggerAction")
    }
}

/// A timeline driven by [`BeginStoryboard`] and [`StopStoryboard`].
///
/// Interpolation is not the engine's concern: a storyboard presents already
/// composed values to the Animation layer and releases them on stop.
pub trait Storyboard {
    /// Starts the timeline on `element`.
    fn begin(&self, tree: &ElementTree, element: ElementId);
    /// Stops the timeline on `element`, releasing whatever it holds.
    fn stop(&self, tree: &ElementTree, element: ElementId);
}

impl fmt::Debug for dyn Storyboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Storyboard")
    }
}

/// A storyboard that holds one value in the Animation layer while running.
#[derive(Clone, Debug)]
pub struct ValueAnimation {
    property: PropertyId,
    value: ErasedValue,
}

impl ValueAnimation {
    /// Holds `property` at `value`.
    #[must_use]
    pub fn new<T: PropertyValue>(property: Property<T>, value: T) -> Self {
        Self {
            property: property.id(),
            value: ErasedValue::new(value),
        }
    }
}

impl Storyboard for ValueAnimation {
    fn begin(&self, tree: &ElementTree, element: ElementId) {
        tree.write_logged(element, self.property, SlotWrite::Set(Layer::Animation, self.value.clone()));
    }

    fn stop(&self, tree: &ElementTree, element: ElementId) {
        tree.write_logged(element, self.property, SlotWrite::Clear(Layer::Animation));
    }
}

/// Writes a Local value.
#[derive(Clone, Debug)]
pub struct SetValueAction {
    property: PropertyId,
    value: ErasedValue,
}

impl SetValueAction {
    /// Sets `property` to `value`.
    #[must_use]
    pub fn new<T: PropertyValue>(property: Property<T>, value: T) -> Self {
        Self {
            property: property.id(),
            value: ErasedValue::new(value),
        }
    }
}

impl TriggerAction for SetValueAction {
    fn invoke(&self, tree: &ElementTree, element: ElementId) {
        tree.write_logged(element, self.property, SlotWrite::Set(Layer::Local, self.value.clone()));
    }
}

/// Runs a closure.
pub struct CallbackAction<F>(F);

impl<F> CallbackAction<F>
where
    F: Fn(&ElementTree, ElementId),
{
    /// Wraps `callback`.
    pub fn new(callback: F) -> Self {
        Self(callback)
    }
}

impl<F> fmt::Debug for CallbackAction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackAction").finish_non_exhaustive()
    }
}

impl<F> TriggerAction for CallbackAction<F>
where
    F: Fn(&ElementTree, ElementId),
{
    fn invoke(&self, tree: &ElementTree, element: ElementId) {
        (self.0)(tree, element);
    }
}

/// Starts a named storyboard, replacing a running one of the same name.
#[derive(Clone, Debug)]
pub struct BeginStoryboard {
    name: Rc<str>,
    storyboard: Rc<dyn Storyboard>,
}

impl BeginStoryboard {
    /// Starts `storyboard` under `name`.
    pub fn new(name: &str, storyboard: impl Storyboard + 'static) -> Self {
        Self {
            name: Rc::from(name),
            storyboard: Rc::new(storyboard),
        }
    }
}

impl TriggerAction for BeginStoryboard {
    fn invoke(&self, tree: &ElementTree, element: ElementId) {
        tree.begin_storyboard(element, &self.name, self.storyboard.clone());
    }
}

/// Stops a storyboard started by [`BeginStoryboard`].
#[derive(Clone, Debug)]
pub struct StopStoryboard {
    name: Rc<str>,
}

impl StopStoryboard {
    /// Stops the storyboard named `name`.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self { name: Rc::from(name) }
    }
}

impl TriggerAction for StopStoryboard {
    fn invoke(&self, tree: &ElementTree, element: ElementId) {
        tree.stop_storyboard(element, &self.name);
    }
}

#[derive(Clone, Debug)]
pub(crate) enum ConditionDef {
    Property { property: PropertyId, value: ErasedValue },
    Data { binding: Rc<Binding>, value: ErasedValue },
}

#[derive(Debug, Default)]
struct TriggerDef {
    conditions: Vec<ConditionDef>,
    setters: Vec<(PropertyId, ErasedValue)>,
    enter_actions: Vec<Rc<dyn TriggerAction>>,
    exit_actions: Vec<Rc<dyn TriggerAction>>,
}

/// Any built trigger, ready to be added to a style or template.
#[derive(Clone, Debug)]
pub struct TriggerBase(Rc<TriggerDef>);

impl TriggerBase {
    fn setter_properties(&self) -> SmallVec<[PropertyId; 4]> {
        let mut out = SmallVec::new();
        for (property, _) in &self.0.setters {
            if !out.contains(property) {
                out.push(*property);
            }
        }
        out
    }
}

/// One condition of a [`MultiTrigger`] or [`MultiDataTrigger`].
///
/// Which fields are required depends on the trigger kind and is checked when
/// the trigger is built.
#[derive(Clone, Debug, Default)]
pub struct Condition {
    property: Option<PropertyId>,
    binding: Option<Rc<Binding>>,
    value: Option<ErasedValue>,
}

impl Condition {
    /// An empty condition.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `property` of the owning element.
    #[must_use]
    pub fn property(mut self, property: impl Into<PropertyId>) -> Self {
        self.property = Some(property.into());
        self
    }

    /// Compares the value produced by `binding`.
    #[must_use]
    pub fn binding(mut self, binding: Binding) -> Self {
        self.binding = Some(Rc::new(binding));
        self
    }

    /// The value the condition is satisfied by.
    #[must_use]
    pub fn value<T: PropertyValue>(mut self, value: T) -> Self {
        self.value = Some(ErasedValue::new(value));
        self
    }
}

macro_rules! trigger_body {
    () => {
        /// Adds a setter applied while the trigger is satisfied.
        #[must_use]
        pub fn setter<T: PropertyValue>(mut self, property: Property<T>, value: T) -> Self {
            self.def.setters.push((property.id(), ErasedValue::new(value)));
            self
        }

        /// Adds an action run on entering the satisfied state.
        #[must_use]
        pub fn enter_action(mut self, action: impl TriggerAction + 'static) -> Self {
            self.def.enter_actions.push(Rc::new(action));
            self
        }

        /// Adds an action run on leaving the satisfied state.
        #[must_use]
        pub fn exit_action(mut self, action: impl TriggerAction + 'static) -> Self {
            self.def.exit_actions.push(Rc::new(action));
            self
        }
    };
}

/// Satisfied while one property of the element equals a value.
///
/// ```rust
/// use trellis_property::{PropertyMetadata, PropertyRegistry};
/// use trellis_ui::{ElementTree, StyleBuilder, Trigger};
///
/// let mut registry = PropertyRegistry::new();
/// let hovered = registry.register("Control", "IsMouseOver", PropertyMetadata::new(false));
/// let opacity = registry.register("Control", "Opacity", PropertyMetadata::new(1.0_f64));
/// let tree = ElementTree::new(registry);
///
/// let style = StyleBuilder::new()
///     .set(opacity, 0.5)
///     .trigger(Trigger::new(hovered, true).setter(opacity, 1.0))
///     .build();
/// let button = tree.create_element("Button");
/// tree.set_style(button, Some(style)).unwrap();
///
/// assert_eq!(tree.get_value(button, opacity), 0.5);
/// tree.set_value(button, hovered, true);
/// assert_eq!(tree.get_value(button, opacity), 1.0);
/// ```
#[derive(Debug)]
pub struct Trigger {
    def: TriggerDef,
}

impl Trigger {
    /// Satisfied while `property` equals `value`.
    #[must_use]
    pub fn new<T: PropertyValue>(property: Property<T>, value: T) -> Self {
        Self {
            def: TriggerDef {
                conditions: vec![ConditionDef::Property {
                    property: property.id(),
                    value: ErasedValue::new(value),
                }],
                ..TriggerDef::default()
            },
        }
    }

    trigger_body!();
}

impl From<Trigger> for TriggerBase {
    fn from(trigger: Trigger) -> Self {
        Self(Rc::new(trigger.def))
    }
}

/// Satisfied while a binding's value equals a value.
#[derive(Debug)]
pub struct DataTrigger {
    def: TriggerDef,
}

impl DataTrigger {
    /// Satisfied while `binding` produces `value`.
    #[must_use]
    pub fn new<T: PropertyValue>(binding: Binding, value: T) -> Self {
        Self {
            def: TriggerDef {
                conditions: vec![ConditionDef::Data {
                    binding: Rc::new(binding),
                    value: ErasedValue::new(value),
                }],
                ..TriggerDef::default()
            },
        }
    }

    trigger_body!();
}

impl From<DataTrigger> for TriggerBase {
    fn from(trigger: DataTrigger) -> Self {
        Self(Rc::new(trigger.def))
    }
}

/// Satisfied while every property condition holds.
#[derive(Debug, Default)]
pub struct MultiTrigger {
    conditions: Vec<Condition>,
    def: TriggerDef,
}

impl MultiTrigger {
    /// A trigger with no conditions yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition; it needs a property and a value.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    trigger_body!();

    /// Checks the conditions and builds the trigger.
    pub fn build(mut self) -> Result<TriggerBase, LoadError> {
        if self.conditions.is_empty() {
            return Err(ConstructionError::NoConditions.into());
        }
        for (index, condition) in self.conditions.into_iter().enumerate() {
            let property = condition
                .property
                .ok_or(ConstructionError::MissingConditionProperty { index })?;
            let value = condition
                .value
                .ok_or(ConstructionError::MissingConditionValue { index })?;
            self.def.conditions.push(ConditionDef::Property { property, value });
        }
        Ok(TriggerBase(Rc::new(self.def)))
    }
}

/// Satisfied while every data condition holds.
#[derive(Debug, Default)]
pub struct MultiDataTrigger {
    conditions: Vec<Condition>,
    def: TriggerDef,
}

impl MultiDataTrigger {
    /// A trigger with no conditions yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition; it needs a binding and a value.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    trigger_body!();

    /// Checks the conditions and builds the trigger.
    ///
    /// A condition without a binding or without a value is an error, never a
    /// silently ignored condition.
    pub fn build(mut self) -> Result<TriggerBase, LoadError> {
        if self.conditions.is_empty() {
            return Err(ConstructionError::NoConditions.into());
        }
        for (index, condition) in self.conditions.into_iter().enumerate() {
            let binding = condition
                .binding
                .ok_or(ConstructionError::MissingConditionBinding { index })?;
            let value = condition
                .value
                .ok_or(ConstructionError::MissingConditionValue { index })?;
            self.def.conditions.push(ConditionDef::Data { binding, value });
        }
        Ok(TriggerBase(Rc::new(self.def)))
    }
}

/// Which collection a trigger instance belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TriggerOrigin {
    Style,
    Template,
}

/// Per-element state of one trigger.
#[derive(Debug)]
pub(crate) struct TriggerInstance {
    pub(crate) id: u64,
    def: TriggerBase,
    /// Last value delivered by each data condition's binding.
    data_values: Vec<Option<ErasedValue>>,
    /// Binding expressions feeding the data conditions.
    condition_tags: Vec<u64>,
    pub(crate) satisfied: bool,
    busy: bool,
    pending: bool,
}

impl ElementTree {
    /// Starts `storyboard` on `element` under `name`, stopping a running
    /// storyboard of the same name first.
    pub fn begin_storyboard(&self, element: ElementId, name: &str, storyboard: Rc<dyn Storyboard>) {
        if !self.is_alive(element) {
            return;
        }
        self.stop_storyboard(element, name);
        if let Some(data) = self.state_mut().element_mut(element) {
            data.storyboards.push((Rc::from(name), storyboard.clone()));
        }
        tracing::debug!(element = %element, name, "storyboard started");
        storyboard.begin(self, element);
    }

    /// Stops the storyboard `name` on `element`. Returns `false` if none was
    /// running.
    pub fn stop_storyboard(&self, element: ElementId, name: &str) -> bool {
        let running = {
            let mut state = self.state_mut();
            let Some(data) = state.element_mut(element) else {
                return false;
            };
            let Some(index) = data.storyboards.iter().position(|(n, _)| &**n == name) else {
                return false;
            };
            data.storyboards.remove(index).1
        };
        tracing::debug!(element = %element, name, "storyboard stopped");
        running.stop(self, element);
        true
    }

    /// Returns `true` if any trigger of `element`'s style or template is
    /// currently satisfied.
    #[must_use]
    pub fn has_active_triggers(&self, element: ElementId) -> bool {
        self.state()
            .element(element)
            .is_some_and(|data| data.triggers().any(|t| t.satisfied))
    }

    /// Instantiates `triggers` on `element` and evaluates them once.
    pub(crate) fn install_triggers(&self, element: ElementId, origin: TriggerOrigin, triggers: &[TriggerBase]) {
        for def in triggers {
            let id = {
                let mut state = self.state_mut();
                if state.element(element).is_none() {
                    return;
                }
                let id = state.next_serial();
                for condition in &def.0.conditions {
                    if let ConditionDef::Property { property, .. } = condition {
                        state.add_dependent((element, *property), Dependent::Trigger { element, instance: id });
                    }
                }
                let Some(data) = state.element_mut(element) else {
                    return;
                };
                let instance = TriggerInstance {
                    id,
                    def: def.clone(),
                    data_values: vec![None; def.0.conditions.len()],
                    condition_tags: Vec::new(),
                    satisfied: false,
                    busy: false,
                    pending: false,
                };
                match origin {
                    TriggerOrigin::Style => data.style_triggers.push(instance),
                    TriggerOrigin::Template => data.template_triggers.push(instance),
                }
                id
            };
            for (index, condition) in def.0.conditions.iter().enumerate() {
                let ConditionDef::Data { binding, .. } = condition else {
                    continue;
                };
                let sink = Sink::Condition {
                    element,
                    instance: id,
                    index,
                };
                let base = BindingBase::Single(binding.clone());
                match self.create_binding(sink, base, BindingMode::OneWay, UpdateSourceTrigger::PropertyChanged) {
                    Ok(tag) => {
                        if let Some(instance) = self.state_mut().element_mut(element).and_then(|d| d.trigger_mut(id)) {
                            instance.condition_tags.push(tag);
                        }
                        self.refresh_logged(tag);
                    }
                    Err(error) => {
                        tracing::warn!(element = %element, %error, "data trigger condition not bound");
                    }
                }
            }
            self.evaluate_trigger(element, id);
        }
    }

    /// Drops every trigger instance of `origin` on `element`, withdrawing the
    /// setters of the satisfied ones. Exit actions do not run.
    pub(crate) fn remove_triggers(&self, element: ElementId, origin: TriggerOrigin) {
        let (removed, released) = {
            let mut state = self.state_mut();
            let Some(data) = state.element_mut(element) else {
                return;
            };
            let removed = match origin {
                TriggerOrigin::Style => std::mem::take(&mut data.style_triggers),
                TriggerOrigin::Template => std::mem::take(&mut data.template_triggers),
            };
            for instance in &removed {
                for condition in &instance.def.0.conditions {
                    if let ConditionDef::Property { property, .. } = condition {
                        state.remove_dependents((element, *property), |d| {
                            matches!(d, Dependent::Trigger { instance: i, .. } if *i == instance.id)
                        });
                    }
                }
            }
            let tags: Vec<u64> = removed.iter().flat_map(|i| i.condition_tags.iter().copied()).collect();
            (removed, tags)
        };
        if removed.is_empty() {
            return;
        }
        let released: Vec<Expression> = released
            .into_iter()
            .filter_map(|tag| self.teardown_expression(tag))
            .collect();
        drop(released);
        let mut properties: SmallVec<[PropertyId; 4]> = SmallVec::new();
        for instance in removed.iter().filter(|i| i.satisfied) {
            for property in instance.def.setter_properties() {
                if !properties.contains(&property) {
                    properties.push(property);
                }
            }
        }
        tracing::trace!(element = %element, count = removed.len(), "triggers removed");
        self.recompute_trigger_setters(element, &properties);
    }

    /// Stores the value a data condition's binding produced and
    /// re-evaluates the trigger.
    pub(crate) fn set_condition_value(
        &self,
        element: ElementId,
        instance: u64,
        index: usize,
        value: Option<ErasedValue>,
    ) {
        {
            let mut state = self.state_mut();
            let Some(slot) = state
                .element_mut(element)
                .and_then(|d| d.trigger_mut(instance))
                .and_then(|t| t.data_values.get_mut(index))
            else {
                return;
            };
            if *slot == value {
                return;
            }
            *slot = value;
        }
        self.evaluate_trigger(element, instance);
    }

    /// Re-evaluates trigger `instance`, running its transition if the
    /// satisfied state flipped.
    pub(crate) fn evaluate_trigger(&self, element: ElementId, instance: u64) {
        {
            let mut state = self.state_mut();
            let Some(trigger) = state.element_mut(element).and_then(|d| d.trigger_mut(instance)) else {
                return;
            };
            if trigger.busy {
                trigger.pending = true;
                return;
            }
            trigger.busy = true;
        }

        let max_passes = self.inner.config.max_trigger_passes;
        let mut passes = 0;
        loop {
            let Some(now) = self.conditions_hold(element, instance) else {
                return;
            };
            let transition = {
                let mut state = self.state_mut();
                let Some(trigger) = state.element_mut(element).and_then(|d| d.trigger_mut(instance)) else {
                    return;
                };
                trigger.pending = false;
                (trigger.satisfied != now).then(|| {
                    trigger.satisfied = now;
                    trigger.def.clone()
                })
            };
            if let Some(def) = transition {
                tracing::debug!(element = %element, trigger = instance, entered = now, "trigger transition");
                self.recompute_trigger_setters(element, &def.setter_properties());
                let actions = if now { &def.0.enter_actions } else { &def.0.exit_actions };
                for action in actions {
                    action.invoke(self, element);
                }
            }

            let again = {
                let mut state = self.state_mut();
                let Some(trigger) = state.element_mut(element).and_then(|d| d.trigger_mut(instance)) else {
                    return;
                };
                if trigger.pending && passes < max_passes {
                    true
                } else {
                    if trigger.pending {
                        tracing::warn!(element = %element, trigger = instance, passes, "trigger did not settle");
                    }
                    trigger.pending = false;
                    trigger.busy = false;
                    false
                }
            };
            if !again {
                break;
            }
            passes += 1;
        }
    }

    /// Current truth of every condition, or `None` if the instance is gone.
    fn conditions_hold(&self, element: ElementId, instance: u64) -> Option<bool> {
        let (conditions, data_values) = {
            let state = self.state();
            let trigger = state.element(element)?.trigger(instance)?;
            (trigger.def.0.conditions.clone(), trigger.data_values.clone())
        };
        Some(conditions.iter().zip(&data_values).all(|(condition, data)| match condition {
            ConditionDef::Property { property, value } => {
                self.get_value_erased(element, *property).as_ref() == Some(value)
            }
            ConditionDef::Data { value, .. } => data.as_ref() == Some(value),
        }))
    }

    /// Rewrites the StyleTrigger layer of `properties` from the satisfied
    /// triggers, style triggers first, later setters winning.
    fn recompute_trigger_setters(&self, element: ElementId, properties: &[PropertyId]) {
        let writes: SmallVec<[(PropertyId, Option<ErasedValue>); 4]> = {
            let state = self.state();
            let Some(data) = state.element(element) else {
                return;
            };
            properties
                .iter()
                .map(|property| {
                    let value = data
                        .triggers()
                        .filter(|t| t.satisfied)
                        .flat_map(|t| t.def.0.setters.iter())
                        .filter(|(p, _)| p == property)
                        .last()
                        .map(|(_, v)| v.clone());
                    (*property, value)
                })
                .collect()
        };
        for (property, value) in writes {
            let write = value.map_or(SlotWrite::Clear(Layer::StyleTrigger), |value| {
                SlotWrite::Set(Layer::StyleTrigger, value)
            });
            self.write_logged(element, property, write);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use trellis_property::{PropertyMetadata, PropertyRegistry, ValueSource};

    use super::*;
    use crate::style::StyleBuilder;

    fn setup() -> (ElementTree, Property<bool>, Property<f64>) {
        let mut registry = PropertyRegistry::new();
        let pressed = registry.register("Button", "IsPressed", PropertyMetadata::new(false));
        let scale = registry.register("Control", "Scale", PropertyMetadata::new(1.0_f64));
        (ElementTree::new(registry), pressed, scale)
    }

    #[test]
    fn setters_follow_the_condition() {
        let (tree, pressed, scale) = setup();
        let button = tree.create_element("Button");
        let style = StyleBuilder::new()
            .set(scale, 1.0)
            .trigger(Trigger::new(pressed, true).setter(scale, 0.9))
            .build();
        tree.set_style(button, Some(style)).unwrap();

        tree.set_value(button, pressed, true);
        assert_eq!(tree.get_value(button, scale), 0.9);
        assert_eq!(tree.value_source(button, scale), ValueSource::StyleTrigger);
        assert!(tree.has_active_triggers(button));

        tree.set_value(button, pressed, false);
        assert_eq!(tree.get_value(button, scale), 1.0);
        assert_eq!(tree.value_source(button, scale), ValueSource::Style);
    }

    #[test]
    fn later_trigger_wins_and_removal_withdraws() {
        let (tree, pressed, scale) = setup();
        let button = tree.create_element("Button");
        let style = StyleBuilder::new()
            .trigger(Trigger::new(pressed, true).setter(scale, 2.0))
            .trigger(Trigger::new(pressed, true).setter(scale, 3.0))
            .build();
        tree.set_style(button, Some(style)).unwrap();
        tree.set_value(button, pressed, true);
        assert_eq!(tree.get_value(button, scale), 3.0);

        tree.set_style(button, None).unwrap();
        assert_eq!(tree.value_source(button, scale), ValueSource::Default);
        assert!(!tree.has_active_triggers(button));
    }

    #[test]
    fn multi_trigger_requires_every_condition() {
        let mut registry = PropertyRegistry::new();
        let pressed = registry.register("Button", "IsPressed", PropertyMetadata::new(false));
        let enabled = registry.register("Button", "IsEnabled", PropertyMetadata::new(true));
        let scale = registry.register("Control", "Scale", PropertyMetadata::new(1.0_f64));
        let tree = ElementTree::new(registry);

        let trigger = MultiTrigger::new()
            .condition(Condition::new().property(pressed).value(true))
            .condition(Condition::new().property(enabled).value(true))
            .setter(scale, 0.5)
            .build()
            .unwrap();
        let button = tree.create_element("Button");
        tree.set_style(button, Some(StyleBuilder::new().trigger(trigger).build())).unwrap();

        tree.set_value(button, pressed, true);
        assert_eq!(tree.get_value(button, scale), 0.5);
        tree.set_value(button, enabled, false);
        assert_eq!(tree.get_value(button, scale), 1.0);
    }

    #[test]
    fn construction_errors() {
        let (_, pressed, _) = setup();
        let error = MultiDataTrigger::new()
            .condition(Condition::new().binding(Binding::new("A")).value(1_i32))
            .condition(Condition::new().value(2_i32))
            .build()
            .unwrap_err();
        assert_eq!(error.error, ConstructionError::MissingConditionBinding { index: 1 });

        let error = MultiDataTrigger::new()
            .condition(Condition::new().binding(Binding::new("A")))
            .build()
            .unwrap_err();
        assert_eq!(error.error, ConstructionError::MissingConditionValue { index: 0 });

        let error = MultiTrigger::new()
            .condition(Condition::new().value(true))
            .build()
            .unwrap_err();
        assert_eq!(error.error, ConstructionError::MissingConditionProperty { index: 0 });

        assert_eq!(MultiTrigger::new().build().unwrap_err().error, ConstructionError::NoConditions);
        assert!(MultiTrigger::new()
            .condition(Condition::new().property(pressed).value(true))
            .build()
            .is_ok());
    }

    #[test]
    fn storyboard_overlay_reverts() {
        let (tree, pressed, scale) = setup();
        let button = tree.create_element("Button");
        tree.set_value(button, scale, 1.5);
        let style = StyleBuilder::new()
            .trigger(
                Trigger::new(pressed, true)
                    .enter_action(BeginStoryboard::new("grow", ValueAnimation::new(scale, 4.0)))
                    .exit_action(StopStoryboard::new("grow")),
            )
            .build();
        tree.set_style(button, Some(style)).unwrap();

        tree.set_value(button, pressed, true);
        assert_eq!(tree.get_value(button, scale), 4.0);
        assert_eq!(tree.value_source(button, scale), ValueSource::Animation);
        tree.set_value(button, pressed, false);
        assert_eq!(tree.get_value(button, scale), 1.5);
        assert_eq!(tree.value_source(button, scale), ValueSource::Local);
        assert!(!tree.stop_storyboard(button, "grow"));
    }

    #[test]
    fn runaway_trigger_is_bounded() {
        let mut registry = PropertyRegistry::new();
        let flag = registry.register("Control", "Flag", PropertyMetadata::new(false));
        let tree = ElementTree::with_config(registry, crate::TreeConfig::default().with_max_trigger_passes(3));
        let enters = Rc::new(Cell::new(0));
        let exits = Rc::new(Cell::new(0));
        let (e, x) = (enters.clone(), exits.clone());
        let style = StyleBuilder::new()
            .trigger(
                Trigger::new(flag, true)
                    .enter_action(CallbackAction::new(move |tree: &ElementTree, el| {
                        e.set(e.get() + 1);
                        tree.set_value_in(el, flag, Layer::Local, false);
                    }))
                    .exit_action(CallbackAction::new(move |tree: &ElementTree, el| {
                        x.set(x.get() + 1);
                        tree.set_value_in(el, flag, Layer::Local, true);
                    })),
            )
            .build();
        let element = tree.create_element("Control");
        tree.set_style(element, Some(style)).unwrap();
        tree.set_value(element, flag, true);
        // One initial transition plus three replays, then the evaluator stops.
        assert_eq!(enters.get() + exits.get(), 4);
    }
}

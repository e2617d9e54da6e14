// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Styles and control templates.
//!
//! A [`Style`] is a shared, immutable list of setters plus triggers. Applying
//! it to an element writes its setters into the element's Style layer and
//! instantiates its triggers; replacing it withdraws the setters the new
//! style no longer has. A [`ControlTemplate`] does the same for the Template
//! layer.
//!
//! An element without an explicit style picks up the *implicit* style stored
//! under [`ResourceKey::Type`] of its type name, found through ordinary
//! resource lookup. The implicit style is re-evaluated whenever a dictionary
//! on the lookup chain changes or the element moves.

use std::rc::Rc;

use indexmap::IndexMap;
use trellis_property::{ErasedValue, Layer, Property, PropertyId, PropertyValue};

use crate::element::ElementId;
use crate::error::{ConstructionError, LoadError};
use crate::expression::{Expression, ExprKind, Sink};
use crate::resource::ResourceKey;
use crate::tree::{ElementTree, SlotWrite};
use crate::trigger::{TriggerBase, TriggerOrigin};

/// Right-hand side of a setter.
#[derive(Clone, Debug, PartialEq)]
pub enum SetterValue {
    /// A literal.
    Value(ErasedValue),
    /// Looked up once, when the style is applied (or built with
    /// [`StyleBuilder::build_in`]).
    StaticResource(ResourceKey),
    /// Followed for as long as the style stays applied.
    DynamicResource(ResourceKey),
}

/// One property assignment of a style or template.
#[derive(Clone, Debug, PartialEq)]
pub struct Setter {
    /// Target property.
    pub property: PropertyId,
    /// Value to assign.
    pub value: SetterValue,
}

#[derive(Debug)]
struct StyleData {
    target_type: Option<&'static str>,
    based_on: Option<Style>,
    setters: Vec<Setter>,
    triggers: Vec<TriggerBase>,
}

/// A shared, immutable collection of setters and triggers.
///
/// Cloning is cheap; two `Style`s are equal only if they are the same
/// instance.
///
/// ```rust
/// use trellis_property::{PropertyMetadata, PropertyRegistry, ValueSource};
/// use trellis_ui::{ElementTree, StyleBuilder};
///
/// let mut registry = PropertyRegistry::new();
/// let width = registry.register("Control", "Width", PropertyMetadata::new(0.0_f64));
/// let tree = ElementTree::new(registry);
///
/// let base = StyleBuilder::new().set(width, 10.0).build();
/// let wide = StyleBuilder::new().based_on(base).set(width, 100.0).build();
///
/// let button = tree.create_element("Button");
/// tree.set_style(button, Some(wide)).unwrap();
/// assert_eq!(tree.get_value(button, width), 100.0);
/// assert_eq!(tree.value_source(button, width), ValueSource::Style);
/// ```
#[derive(Clone, Debug)]
pub struct Style {
    inner: Rc<StyleData>,
}

impl PartialEq for Style {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Style {
    /// Element type this style is restricted to.
    #[must_use]
    pub fn target_type(&self) -> Option<&'static str> {
        self.inner.target_type
    }

    /// The style this one extends.
    #[must_use]
    pub fn based_on(&self) -> Option<&Self> {
        self.inner.based_on.as_ref()
    }

    /// Number of own setters, excluding inherited ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.setters.len()
    }

    /// Returns `true` if the style has no own setters or triggers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.setters.is_empty() && self.inner.triggers.is_empty()
    }

    /// Literal value this style, or a style it is based on, assigns to
    /// `property`.
    #[must_use]
    pub fn get<T: PropertyValue>(&self, property: Property<T>) -> Option<T> {
        self.setters()
            .into_iter()
            .rev()
            .find(|s| s.property == property.id())
            .and_then(|s| match s.value {
                SetterValue::Value(value) => value.get(),
                SetterValue::StaticResource(_) | SetterValue::DynamicResource(_) => None,
            })
    }

    /// Setters, base styles first.
    pub(crate) fn setters(&self) -> Vec<Setter> {
        let mut out = self
            .inner
            .based_on
            .as_ref()
            .map(Self::setters)
            .unwrap_or_default();
        out.extend(self.inner.setters.iter().cloned());
        out
    }

    /// Triggers, base styles first.
    pub(crate) fn triggers(&self) -> Vec<TriggerBase> {
        let mut out = self
            .inner
            .based_on
            .as_ref()
            .map(Self::triggers)
            .unwrap_or_default();
        out.extend(self.inner.triggers.iter().cloned());
        out
    }
}

macro_rules! setter_methods {
    () => {
        /// Appends a literal setter. A later setter for the same property
        /// wins.
        #[must_use]
        pub fn set<T: PropertyValue>(mut self, property: Property<T>, value: T) -> Self {
            self.setters.push(Setter {
                property: property.id(),
                value: SetterValue::Value(ErasedValue::new(value)),
            });
            self
        }

        /// Appends a setter whose value is a static resource.
        #[must_use]
        pub fn set_static_resource(mut self, property: impl Into<PropertyId>, key: impl Into<ResourceKey>) -> Self {
            self.setters.push(Setter {
                property: property.into(),
                value: SetterValue::StaticResource(key.into()),
            });
            self
        }

        /// Appends a setter that follows a dynamic resource.
        #[must_use]
        pub fn set_dynamic_resource(mut self, property: impl Into<PropertyId>, key: impl Into<ResourceKey>) -> Self {
            self.setters.push(Setter {
                property: property.into(),
                value: SetterValue::DynamicResource(key.into()),
            });
            self
        }

        /// Appends a trigger.
        #[must_use]
        pub fn trigger(mut self, trigger: impl Into<TriggerBase>) -> Self {
            self.triggers.push(trigger.into());
            self
        }

        /// Restricts the result to elements of `type_name`.
        #[must_use]
        pub fn target_type(mut self, type_name: &'static str) -> Self {
            self.target_type = Some(type_name);
            self
        }
    };
}

/// Builder for [`Style`].
#[derive(Debug, Default)]
pub struct StyleBuilder {
    target_type: Option<&'static str>,
    based_on: Option<Style>,
    setters: Vec<Setter>,
    triggers: Vec<TriggerBase>,
}

impl StyleBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extends `base`: its setters and triggers apply first.
    #[must_use]
    pub fn based_on(mut self, base: Style) -> Self {
        self.based_on = Some(base);
        self
    }

    setter_methods!();

    /// Builds the style. Static resource setters are resolved against each
    /// element the style is applied to.
    #[must_use]
    pub fn build(self) -> Style {
        Style {
            inner: Rc::new(StyleData {
                target_type: self.target_type,
                based_on: self.based_on,
                setters: self.setters,
                triggers: self.triggers,
            }),
        }
    }

    /// Builds the style, resolving static resource setters now from `scope`.
    ///
    /// This is how a loader builds a style declared inside a dictionary whose
    /// owner may not be attached yet.
    pub fn build_in(mut self, tree: &ElementTree, scope: ElementId) -> Result<Style, LoadError> {
        self.setters = resolve_static(tree, scope, self.setters)?;
        Ok(self.build())
    }
}

#[derive(Debug)]
struct TemplateData {
    target_type: Option<&'static str>,
    setters: Vec<Setter>,
    triggers: Vec<TriggerBase>,
}

/// Setters and triggers contributed by an element's control template.
///
/// Template setters land in the Template layer, below triggers and Local but
/// above Style.
#[derive(Clone, Debug)]
pub struct ControlTemplate {
    inner: Rc<TemplateData>,
}

impl PartialEq for ControlTemplate {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl ControlTemplate {
    /// Element type this template is restricted to.
    #[must_use]
    pub fn target_type(&self) -> Option<&'static str> {
        self.inner.target_type
    }
}

/// Builder for [`ControlTemplate`].
#[derive(Debug, Default)]
pub struct TemplateBuilder {
    target_type: Option<&'static str>,
    setters: Vec<Setter>,
    triggers: Vec<TriggerBase>,
}

impl TemplateBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    setter_methods!();

    /// Builds the template.
    #[must_use]
    pub fn build(self) -> ControlTemplate {
        ControlTemplate {
            inner: Rc::new(TemplateData {
                target_type: self.target_type,
                setters: self.setters,
                triggers: self.triggers,
            }),
        }
    }

    /// Builds the template, resolving static resource setters now from
    /// `scope`.
    pub fn build_in(mut self, tree: &ElementTree, scope: ElementId) -> Result<ControlTemplate, LoadError> {
        self.setters = resolve_static(tree, scope, self.setters)?;
        Ok(self.build())
    }
}

fn resolve_static(tree: &ElementTree, scope: ElementId, setters: Vec<Setter>) -> Result<Vec<Setter>, LoadError> {
    setters
        .into_iter()
        .map(|setter| {
            let SetterValue::StaticResource(key) = &setter.value else {
                return Ok(setter);
            };
            let value = tree.static_resource(scope, key)?;
            let registration = tree.registration(setter.property);
            if !registration.accepts(&value) {
                return Err(ConstructionError::TypeMismatch {
                    property: registration.name(),
                    expected: registration.type_name(),
                    found: value.type_name(),
                }
                .into());
            }
            Ok(Setter {
                property: setter.property,
                value: SetterValue::Value(value),
            })
        })
        .collect()
}

impl ElementTree {
    /// Sets or clears `element`'s explicit style. Without one, the implicit
    /// style for the element's type applies.
    pub fn set_style(&self, element: ElementId, style: Option<Style>) -> Result<(), LoadError> {
        let type_name = self.type_name(element).ok_or(ConstructionError::StaleElement(element))?;
        if let Some(expected) = style.as_ref().and_then(Style::target_type)
            && expected != type_name
        {
            return Err(ConstructionError::TargetTypeMismatch {
                expected,
                found: type_name,
            }
            .into());
        }
        if let Some(data) = self.state_mut().element_mut(element) {
            data.explicit_style = style;
        }
        self.apply_style(element);
        Ok(())
    }

    /// The style currently applied, explicit or implicit.
    #[must_use]
    pub fn style(&self, element: ElementId) -> Option<Style> {
        self.state().element(element).and_then(|data| data.style.clone())
    }

    /// Sets or clears `element`'s control template.
    pub fn set_template(&self, element: ElementId, template: Option<ControlTemplate>) -> Result<(), LoadError> {
        let type_name = self.type_name(element).ok_or(ConstructionError::StaleElement(element))?;
        if let Some(expected) = template.as_ref().and_then(ControlTemplate::target_type)
            && expected != type_name
        {
            return Err(ConstructionError::TargetTypeMismatch {
                expected,
                found: type_name,
            }
            .into());
        }
        let old = {
            let mut state = self.state_mut();
            let Some(data) = state.element_mut(element) else {
                return Ok(());
            };
            if data.template == template {
                return Ok(());
            }
            std::mem::replace(&mut data.template, template.clone())
        };
        tracing::debug!(element = %element, "template applied");
        let old_setters = old.map(|t| t.inner.setters.clone()).unwrap_or_default();
        let (setters, triggers) = template
            .map(|t| (t.inner.setters.clone(), t.inner.triggers.clone()))
            .unwrap_or_default();
        self.remove_triggers(element, TriggerOrigin::Template);
        self.replace_setters(element, Layer::Template, &old_setters, &setters);
        self.install_triggers(element, TriggerOrigin::Template, &triggers);
        Ok(())
    }

    /// The control template.
    #[must_use]
    pub fn template(&self, element: ElementId) -> Option<ControlTemplate> {
        self.state().element(element).and_then(|data| data.template.clone())
    }

    /// Re-selects the explicit or implicit style and applies it if it
    /// differs from the current one.
    pub(crate) fn apply_style(&self, element: ElementId) {
        let Some((explicit, type_name)) = self
            .state()
            .element(element)
            .map(|data| (data.explicit_style.clone(), data.type_name))
        else {
            return;
        };
        let next = explicit.or_else(|| {
            self.try_find_resource(element, &ResourceKey::Type(type_name))
                .and_then(|value| value.get::<Style>())
                .filter(|style| style.target_type().is_none_or(|t| t == type_name))
        });
        let old = {
            let mut state = self.state_mut();
            let Some(data) = state.element_mut(element) else {
                return;
            };
            if data.style == next {
                return;
            }
            std::mem::replace(&mut data.style, next.clone())
        };
        tracing::debug!(element = %element, type_name, styled = next.is_some(), "style applied");
        let old_setters = old.map(|s| s.setters()).unwrap_or_default();
        let (setters, triggers) = next.map(|s| (s.setters(), s.triggers())).unwrap_or_default();
        self.remove_triggers(element, TriggerOrigin::Style);
        self.replace_setters(element, Layer::Style, &old_setters, &setters);
        self.install_triggers(element, TriggerOrigin::Style, &triggers);
    }

    /// Swaps the setters occupying `layer` from `old` to `new`.
    fn replace_setters(&self, element: ElementId, layer: Layer, old: &[Setter], new: &[Setter]) {
        let references: Vec<u64> = self
            .state()
            .expressions
            .iter()
            .filter(|(_, e)| {
                matches!(e.kind, ExprKind::Resource(_))
                    && matches!(e.sink, Sink::Slot { element: el, layer: l, .. } if el == element && l == layer)
            })
            .map(|(tag, _)| *tag)
            .collect();
        let released: Vec<Expression> = references
            .into_iter()
            .filter_map(|tag| self.teardown_expression(tag))
            .collect();
        drop(released);

        let mut winners: IndexMap<PropertyId, &SetterValue> = IndexMap::new();
        for setter in new {
            // Later setters win but keep the first setter's position.
            winners.insert(setter.property, &setter.value);
        }
        for setter in old {
            if !winners.contains_key(&setter.property) {
                self.write_logged(element, setter.property, SlotWrite::Clear(layer));
            }
        }
        for (property, value) in winners {
            match value {
                SetterValue::Value(value) => {
                    self.write_logged(element, property, SlotWrite::Set(layer, value.clone()));
                }
                SetterValue::StaticResource(key) => match self.try_find_resource(element, key) {
                    Some(value) => self.write_logged(element, property, SlotWrite::Set(layer, value)),
                    None => {
                        tracing::warn!(element = %element, %key, "static resource in setter not found");
                        self.write_logged(element, property, SlotWrite::Clear(layer));
                    }
                },
                SetterValue::DynamicResource(key) => {
                    let sink = Sink::Slot {
                        element,
                        property,
                        layer,
                    };
                    let tag = self.create_resource_reference(sink, key.clone());
                    if let Err(error) = self.refresh(tag, false) {
                        tracing::warn!(element = %element, %key, %error, "dynamic resource setter not applied");
                    }
                }
            }
        }
    }

    pub(crate) fn write_logged(&self, element: ElementId, property: PropertyId, write: SlotWrite) {
        if let Err(error) = self.write_slot(element, property, write) {
            tracing::warn!(element = %element, property = %property, %error, "setter not applied");
        }
    }
}

#[cfg(test)]
mod tests {
    use trellis_property::{PropertyMetadata, PropertyRegistry, ValueSource};

    use super::*;

    fn setup() -> (ElementTree, Property<f64>, Property<String>) {
        let mut registry = PropertyRegistry::new();
        let width = registry.register("Control", "Width", PropertyMetadata::new(0.0_f64));
        let brush = registry.register("Control", "Background", PropertyMetadata::new(String::new()));
        (ElementTree::new(registry), width, brush)
    }

    #[test]
    fn based_on_setters_apply_first() {
        let (_, width, brush) = setup();
        let base = StyleBuilder::new().set(width, 1.0).set(brush, String::from("base")).build();
        let derived = StyleBuilder::new().based_on(base.clone()).set(width, 2.0).build();
        assert_eq!(derived.get(width), Some(2.0));
        assert_eq!(derived.get(brush).as_deref(), Some("base"));
        assert_eq!(derived.based_on(), Some(&base));
        assert_ne!(derived, base);
    }

    #[test]
    fn replacing_a_style_withdraws_missing_setters() {
        let (tree, width, brush) = setup();
        let button = tree.create_element("Button");
        let first = StyleBuilder::new().set(width, 10.0).set(brush, String::from("red")).build();
        let second = StyleBuilder::new().set(width, 20.0).build();

        tree.set_style(button, Some(first)).unwrap();
        assert_eq!(tree.get_value(button, brush), "red");
        tree.set_style(button, Some(second)).unwrap();
        assert_eq!(tree.get_value(button, width), 20.0);
        assert_eq!(tree.get_value(button, brush), "");
        assert_eq!(tree.value_source(button, brush), ValueSource::Default);

        tree.set_style(button, None).unwrap();
        assert_eq!(tree.value_source(button, width), ValueSource::Default);
    }

    #[test]
    fn local_beats_template_beats_style() {
        let (tree, width, _) = setup();
        let button = tree.create_element("Button");
        tree.set_style(button, Some(StyleBuilder::new().set(width, 1.0).build())).unwrap();
        tree.set_template(button, Some(TemplateBuilder::new().set(width, 2.0).build())).unwrap();
        assert_eq!(tree.value_source(button, width), ValueSource::Template);
        tree.set_value(button, width, 3.0);
        assert_eq!(tree.get_value(button, width), 3.0);
        tree.clear_value(button, width, Layer::Local);
        tree.set_template(button, None).unwrap();
        assert_eq!(tree.get_value(button, width), 1.0);
    }

    #[test]
    fn target_type_is_enforced() {
        let (tree, width, _) = setup();
        let label = tree.create_element("Label");
        let style = StyleBuilder::new().target_type("Button").set(width, 1.0).build();
        let error = tree.set_style(label, Some(style)).unwrap_err();
        assert_eq!(
            error.error,
            ConstructionError::TargetTypeMismatch {
                expected: "Button",
                found: "Label"
            }
        );
    }

    #[test]
    fn implicit_style_follows_dictionary() {
        let (tree, width, _) = setup();
        let window = tree.create_element("Window");
        let button = tree.create_element("Button");
        tree.add_child(window, button).unwrap();

        let style = StyleBuilder::new().target_type("Button").set(width, 42.0).build();
        tree.add_resource(window, ResourceKey::of_type("Button"), style.clone());
        assert_eq!(tree.get_value(button, width), 42.0);
        assert_eq!(tree.style(button), Some(style));

        // An explicit style shadows the implicit one.
        tree.set_style(button, Some(StyleBuilder::new().set(width, 7.0).build())).unwrap();
        assert_eq!(tree.get_value(button, width), 7.0);
        tree.set_style(button, None).unwrap();
        assert_eq!(tree.get_value(button, width), 42.0);

        tree.detach(button);
        assert_eq!(tree.get_value(button, width), 0.0);
        assert_eq!(tree.style(button), None);
    }

    #[test]
    fn dynamic_setter_lands_in_style_layer() {
        let (tree, _, brush) = setup();
        let window = tree.create_element("Window");
        let button = tree.create_element("Button");
        tree.add_child(window, button).unwrap();
        tree.add_resource(window, "Accent", String::from("blue"));

        let style = StyleBuilder::new().set_dynamic_resource(brush, "Accent").build();
        tree.set_style(button, Some(style)).unwrap();
        assert_eq!(tree.get_value(button, brush), "blue");
        assert_eq!(tree.value_source(button, brush), ValueSource::Style);

        tree.add_resource(window, "Accent", String::from("teal"));
        assert_eq!(tree.get_value(button, brush), "teal");

        tree.set_style(button, None).unwrap();
        tree.add_resource(window, "Accent", String::from("pink"));
        assert_eq!(tree.get_value(button, brush), "");
    }

    #[test]
    fn build_in_reports_missing_static_resource() {
        let (tree, _, brush) = setup();
        let grid = tree.create_element("Grid");
        let error = StyleBuilder::new()
            .set_static_resource(brush, "Missing")
            .build_in(&tree, grid)
            .unwrap_err();
        assert!(matches!(error.error, ConstructionError::ResourceNotFound { .. }));
    }
}

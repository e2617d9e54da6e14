// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Live expressions: bindings and dynamic resource references.
//!
//! A binding expression owns one [`Link`] per child binding. A link is the
//! resolved form of a path: the root node, one [`Accessor`] per step, the
//! source subscriptions and element watches that report changes along the way,
//! and the last value read from the leaf.
//!
//! # Re-resolution
//!
//! Any change to an intermediate step re-walks the whole link. The walk runs
//! with no engine borrow held, collects fresh subscriptions, and only then
//! swaps them in; the old ones are dropped afterwards. Each walk gets a new
//! epoch from the tree's serial counter and every callback carries the epoch
//! it was registered under, so a notification from a superseded walk (for
//! instance a write to an object that is no longer on the path) is ignored.

use std::rc::Rc;

use trellis_property::{ErasedValue, ExpressionTag, Layer, PropertyId, UpdateSourceTrigger};

use crate::accessor::{Accessor, Node};
use crate::binding::{
    Binding, BindingBase, BindingId, BindingMode, BindingStatus, RelativeSource, RootSource,
};
use crate::element::ElementId;
use crate::error::{BindingError, BindingFault};
use crate::path::PropertyPath;
use crate::resource::ResourceKey;
use crate::source::{Subscription, is_null};
use crate::tree::{ElementTree, SlotWrite};
use crate::validation::{ErrorStage, ValidationError, ValidationErrorKind};

/// Something to re-evaluate when an element property changes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Dependent {
    /// Re-walk one link of a binding, if `epoch` is still current.
    Link { expression: u64, child: usize, epoch: u64 },
    /// Re-evaluate a trigger instance.
    Trigger { element: ElementId, instance: u64 },
}

/// Where an expression delivers its value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Sink {
    /// A property slot. Bindings always write Local; style setters referencing
    /// dynamic resources write Style.
    Slot {
        element: ElementId,
        property: PropertyId,
        layer: Layer,
    },
    /// One condition of a data trigger instance.
    Condition {
        element: ElementId,
        instance: u64,
        index: usize,
    },
}

impl Sink {
    pub(crate) fn element(&self) -> ElementId {
        match self {
            Self::Slot { element, .. } | Self::Condition { element, .. } => *element,
        }
    }

    pub(crate) fn property(&self) -> Option<PropertyId> {
        match self {
            Self::Slot { property, .. } => Some(*property),
            Self::Condition { .. } => None,
        }
    }
}

pub(crate) struct Expression {
    pub(crate) sink: Sink,
    pub(crate) kind: ExprKind,
}

pub(crate) enum ExprKind {
    Resource(ResourceKey),
    Binding(BindingState),
}

impl Expression {
    pub(crate) fn binding(&self) -> Option<&BindingState> {
        match &self.kind {
            ExprKind::Binding(state) => Some(state),
            ExprKind::Resource(_) => None,
        }
    }

    pub(crate) fn binding_mut(&mut self) -> Option<&mut BindingState> {
        match &mut self.kind {
            ExprKind::Binding(state) => Some(state),
            ExprKind::Resource(_) => None,
        }
    }

    /// Drops membership in `group`.
    pub(crate) fn forget_group(&mut self, group: u64) {
        if let Some(state) = self.binding_mut()
            && state.group == Some(group)
        {
            state.group = None;
        }
    }
}

pub(crate) struct BindingState {
    pub(crate) base: BindingBase,
    pub(crate) links: Vec<Link>,
    /// Mode with `Default` resolved against the target property.
    pub(crate) mode: BindingMode,
    /// Trigger with `Default` resolved against the target property.
    pub(crate) trigger: UpdateSourceTrigger,
    /// Child currently feeding a priority binding.
    pub(crate) active: Option<usize>,
    pub(crate) group: Option<u64>,
    /// Set while a pull is writing to the source.
    pub(crate) updating: bool,
    /// A source notification arrived while `updating`.
    pub(crate) stale: bool,
    pub(crate) status: BindingStatus,
}

pub(crate) struct Link {
    pub(crate) binding: Rc<Binding>,
    pub(crate) path: Rc<PropertyPath>,
    pub(crate) epoch: u64,
    pub(crate) leaf: Option<Accessor>,
    pub(crate) value: LinkValue,
    /// The root depends on tree shape (element name, ancestor search, parent
    /// data context) and is re-walked on every structural change.
    pub(crate) structural: bool,
    pub(crate) watches: Vec<(ElementId, PropertyId)>,
    pub(crate) subscriptions: Vec<Subscription>,
}

impl Link {
    fn new(binding: Rc<Binding>, path: Rc<PropertyPath>) -> Self {
        Self {
            binding,
            path,
            epoch: 0,
            leaf: None,
            value: LinkValue::Unresolved,
            structural: false,
            watches: Vec::new(),
            subscriptions: Vec::new(),
        }
    }
}

/// What the leaf of a link currently yields.
#[derive(Clone, Debug)]
pub(crate) enum LinkValue {
    /// Some step along the path is missing or null.
    Unresolved,
    /// Converted value; [`ErasedValue::unset`] stands for null.
    Value(ErasedValue),
    /// The converter failed.
    Faulted(BindingFault),
}

/// Result of walking one link, not yet installed.
#[derive(Default)]
struct Walk {
    leaf: Option<Accessor>,
    value: Option<LinkValue>,
    structural: bool,
    watches: Vec<(ElementId, PropertyId)>,
    subscriptions: Vec<Subscription>,
}

/// Link state copied out for computing a target value.
#[derive(Clone)]
pub(crate) struct LinkSnapshot {
    pub(crate) binding: Rc<Binding>,
    pub(crate) value: LinkValue,
    pub(crate) leaf: Option<Accessor>,
}

struct Computed {
    /// `None` empties the sink.
    value: Option<ErasedValue>,
    fault: Option<BindingFault>,
    status: BindingStatus,
    active: Option<usize>,
    /// A priority binding found no usable child.
    missed: bool,
}

impl Computed {
    fn fallback(base: &BindingBase, status: BindingStatus) -> Self {
        Self {
            value: base.common().fallback_value.clone(),
            fault: None,
            status,
            active: None,
            missed: false,
        }
    }
}

fn non_null(value: &ErasedValue) -> Option<ErasedValue> {
    (!value.is_unset()).then(|| value.clone())
}

fn compute(base: &BindingBase, links: &[LinkSnapshot]) -> Computed {
    match base {
        BindingBase::Single(_) => {
            let Some(link) = links.first() else {
                return Computed::fallback(base, BindingStatus::Unresolved);
            };
            match &link.value {
                LinkValue::Value(value) => Computed {
                    value: non_null(value),
                    fault: None,
                    status: BindingStatus::Active,
                    active: Some(0),
                    missed: false,
                },
                LinkValue::Unresolved => Computed::fallback(base, BindingStatus::Unresolved),
                LinkValue::Faulted(fault) => Computed {
                    fault: Some(fault.clone()),
                    ..Computed::fallback(base, BindingStatus::Faulted)
                },
            }
        }
        BindingBase::Multi(multi) => {
            let values: Vec<ErasedValue> = links
                .iter()
                .map(|link| match &link.value {
                    LinkValue::Value(value) => value.clone(),
                    LinkValue::Unresolved | LinkValue::Faulted(_) => link
                        .binding
                        .common
                        .fallback_value
                        .clone()
                        .unwrap_or_else(ErasedValue::unset),
                })
                .collect();
            match multi.converter.convert(&values, multi.converter_parameter.as_ref()) {
                Ok(value) if value.is_unset() => Computed::fallback(base, BindingStatus::Unresolved),
                Ok(value) => Computed {
                    value: Some(value),
                    fault: None,
                    status: BindingStatus::Active,
                    active: None,
                    missed: false,
                },
                Err(error) => Computed {
                    fault: Some(BindingFault::Conversion(error)),
                    ..Computed::fallback(base, BindingStatus::Faulted)
                },
            }
        }
        BindingBase::Priority(_) => {
            let winner = links.iter().enumerate().find_map(|(i, link)| match &link.value {
                LinkValue::Value(value) => Some((i, value)),
                LinkValue::Unresolved | LinkValue::Faulted(_) => None,
            });
            match winner {
                Some((i, value)) => Computed {
                    value: non_null(value),
                    fault: None,
                    status: BindingStatus::Active,
                    active: Some(i),
                    missed: false,
                },
                None => Computed {
                    missed: true,
                    ..Computed::fallback(base, BindingStatus::Unresolved)
                },
            }
        }
    }
}

/// Leaf value after null substitution and conversion.
fn leaf_value(binding: &Binding, raw: Option<ErasedValue>) -> LinkValue {
    let Some(raw) = raw else {
        return LinkValue::Unresolved;
    };
    if is_null(&raw)
        && let Some(substitute) = &binding.common.target_null_value
    {
        return LinkValue::Value(substitute.clone());
    }
    match &binding.converter {
        Some(converter) => match converter.convert(&raw, binding.converter_parameter.as_ref()) {
            Ok(value) => LinkValue::Value(value),
            Err(error) => LinkValue::Faulted(BindingFault::Conversion(error)),
        },
        None => LinkValue::Value(raw),
    }
}

impl ElementTree {
    // --- Public surface -----------------------------------------------------

    /// Attaches `binding` to `property` of `element`, replacing any literal,
    /// binding or resource reference in its Local slot.
    ///
    /// The binding resolves immediately. A push fault raised while resolving
    /// is returned unless the binding validates on exceptions; the binding
    /// stays attached either way and shows its fallback value.
    pub fn set_binding(
        &self,
        element: ElementId,
        property: impl Into<PropertyId>,
        binding: impl Into<BindingBase>,
    ) -> Result<BindingId, BindingError> {
        let property = property.into();
        let base = binding.into();
        if !self.is_alive(element) {
            return Err(BindingError::StaleElement(element));
        }
        let registration = self.registration(property);
        let common = base.common();
        let mode = match common.mode {
            BindingMode::Default if registration.binds_two_way_by_default() => BindingMode::TwoWay,
            BindingMode::Default => BindingMode::OneWay,
            mode => mode,
        };
        let trigger = match common.update_source_trigger {
            UpdateSourceTrigger::Default => match registration.default_update_source_trigger() {
                UpdateSourceTrigger::Default => UpdateSourceTrigger::PropertyChanged,
                trigger => trigger,
            },
            trigger => trigger,
        };
        let sink = Sink::Slot {
            element,
            property,
            layer: Layer::Local,
        };
        let tag = self.create_binding(sink, base, mode, trigger)?;
        tracing::debug!(
            element = %element,
            property = %property,
            binding = tag,
            ?mode,
            ?trigger,
            "binding attached"
        );
        let pushed = self.refresh(tag, true);
        self.select_group(tag);
        if mode == BindingMode::OneWayToSource && self.expression_group(tag).is_none() {
            self.pull_binding(tag).into_result()?;
        }
        pushed.map(|()| BindingId(tag))
    }

    /// Removes the binding on `property` of `element` together with the
    /// validation errors it reported. Returns `false` if there was none.
    pub fn clear_binding(&self, element: ElementId, property: impl Into<PropertyId>) -> bool {
        let property = property.into();
        let Some(tag) = self.binding_expression(element, property) else {
            return false;
        };
        let released = self.teardown_expression(tag.0);
        if let Err(error) = self.write_slot(element, property, SlotWrite::Release(ExpressionTag(tag.0))) {
            tracing::debug!(element = %element, %error, "binding release failed");
        }
        tracing::debug!(element = %element, property = %property, binding = %tag, "binding cleared");
        drop(released);
        true
    }

    /// The binding attached to `property` of `element`.
    #[must_use]
    pub fn binding_expression(&self, element: ElementId, property: impl Into<PropertyId>) -> Option<BindingId> {
        let state = self.state();
        let tag = state.element(element)?.store.expression(property.into())?;
        state
            .expressions
            .get(&tag.0)?
            .binding()
            .map(|_| BindingId(tag.0))
    }

    /// Current status of `binding`, or `None` once it was removed.
    #[must_use]
    pub fn binding_status(&self, binding: BindingId) -> Option<BindingStatus> {
        self.state()
            .expressions
            .get(&binding.0)
            .and_then(Expression::binding)
            .map(|state| state.status)
    }

    /// Index of the child currently feeding a priority binding.
    #[must_use]
    pub fn active_child(&self, binding: BindingId) -> Option<usize> {
        self.state()
            .expressions
            .get(&binding.0)
            .and_then(Expression::binding)
            .and_then(|state| state.active)
    }

    /// Re-reads every source of `binding` and pushes the result, dropping the
    /// errors its last source update reported.
    pub fn update_target(&self, binding: BindingId) -> Result<(), BindingError> {
        let tag = binding.0;
        let Some((sink, count)) = self.state().expressions.get(&tag).and_then(|e| {
            e.binding().map(|state| (e.sink, state.links.len()))
        }) else {
            return Ok(());
        };
        for child in 0..count {
            self.resolve_link(tag, child);
        }
        self.replace_errors(sink.element(), binding, ErrorStage::Pull, Vec::new());
        self.refresh(tag, false)
    }

    // --- Construction and teardown -------------------------------------------

    pub(crate) fn compile_path(&self, text: &str) -> Result<Rc<PropertyPath>, BindingError> {
        Ok(self.inner.paths.borrow_mut().get_or_parse(text)?)
    }

    /// Registers a binding expression delivering into `sink` and resolves all
    /// of its links. Nothing is written yet.
    pub(crate) fn create_binding(
        &self,
        sink: Sink,
        base: BindingBase,
        mode: BindingMode,
        trigger: UpdateSourceTrigger,
    ) -> Result<u64, BindingError> {
        let links = base
            .links()
            .into_iter()
            .map(|binding| {
                let path = self.compile_path(&binding.path)?;
                Ok(Link::new(binding, path))
            })
            .collect::<Result<Vec<_>, BindingError>>()?;
        let count = links.len();
        let by_name = links
            .iter()
            .any(|link| matches!(link.binding.root, RootSource::ElementName(_)));
        let tag = {
            let mut state = self.state_mut();
            let tag = state.next_serial();
            if by_name {
                state.name_bound.insert(tag);
            }
            state.expressions.insert(
                tag,
                Expression {
                    sink,
                    kind: ExprKind::Binding(BindingState {
                        base,
                        links,
                        mode,
                        trigger,
                        active: None,
                        group: None,
                        updating: false,
                        stale: false,
                        status: BindingStatus::Unresolved,
                    }),
                },
            );
            if let Some(data) = state.element_mut(sink.element()) {
                data.expressions.push(tag);
            }
            tag
        };
        for child in 0..count {
            self.resolve_link(tag, child);
        }
        Ok(tag)
    }

    /// Unregisters expression `tag` and everything it registered: element
    /// watches, group membership and the errors it reported. Store slots are
    /// left alone. The returned expression still holds its subscriptions;
    /// drop it with no borrow held.
    pub(crate) fn teardown_expression(&self, tag: u64) -> Option<Expression> {
        let mut state = self.state_mut();
        let expression = state.expressions.remove(&tag)?;
        if let Some(binding) = expression.binding() {
            for key in binding.links.iter().flat_map(|link| &link.watches) {
                state.remove_dependents(*key, |d| {
                    matches!(d, Dependent::Link { expression, .. } if *expression == tag)
                });
            }
            if let Some(group) = binding.group
                && let Some(group) = state.groups.get_mut(&group)
            {
                group.members.retain(|member| *member != tag);
            }
        }
        state.name_bound.remove(&tag);
        if let Some(data) = state.element_mut(expression.sink.element()) {
            data.errors.retain(|e| e.origin.0 != tag);
            data.expressions.retain(|t| *t != tag);
        }
        tracing::trace!(expression = tag, "expression released");
        Some(expression)
    }

    // --- Resolution ----------------------------------------------------------

    /// Source-side change for one link. Ignored when `epoch` is stale;
    /// deferred while the binding is writing to its source.
    pub(crate) fn relink(&self, tag: u64, child: usize, epoch: u64) {
        let sink = {
            let mut state = self.state_mut();
            let Some(expression) = state.expressions.get_mut(&tag) else {
                return;
            };
            let sink = expression.sink;
            let Some(binding) = expression.binding_mut() else {
                return;
            };
            if binding.links.get(child).is_none_or(|link| link.epoch != epoch) {
                return;
            }
            if binding.updating {
                binding.stale = true;
                return;
            }
            sink
        };
        tracing::debug!(binding = tag, child, "binding source changed");
        self.resolve_link(tag, child);
        if let Sink::Slot { element, .. } = sink {
            self.replace_errors(element, BindingId(tag), ErrorStage::Pull, Vec::new());
        }
        self.refresh_logged(tag);
    }

    /// Re-walks the links whose root depends on tree shape after a change at
    /// `moved`: those of expressions on `moved` and its descendants, and every
    /// link rooted at an element name.
    pub(crate) fn relink_structural(&self, moved: ElementId) {
        let links: Vec<(u64, usize)> = {
            let state = self.state();
            let mut tags: Vec<u64> = state
                .elements
                .subtree(moved)
                .into_iter()
                .filter_map(|id| state.element(id))
                .flat_map(|data| data.expressions.iter().copied())
                .chain(state.name_bound.iter().copied())
                .collect();
            tags.sort_unstable();
            tags.dedup();
            tags.into_iter()
                .filter_map(|tag| state.expressions.get(&tag)?.binding().map(|b| (tag, b)))
                .flat_map(|(tag, b)| {
                    b.links
                        .iter()
                        .enumerate()
                        .filter(|(_, link)| link.structural)
                        .map(move |(child, _)| (tag, child))
                })
                .collect()
        };
        let mut touched: Vec<u64> = Vec::new();
        for (tag, child) in links {
            self.resolve_link(tag, child);
            if touched.last() != Some(&tag) {
                touched.push(tag);
            }
        }
        for tag in touched {
            self.refresh_logged(tag);
        }
    }

    /// Walks link `child` of expression `tag` and installs the result.
    pub(crate) fn resolve_link(&self, tag: u64, child: usize) {
        let (binding, path, sink, observe, notify_errors, epoch) = {
            let mut state = self.state_mut();
            let epoch = state.next_serial();
            let Some(expression) = state.expressions.get_mut(&tag) else {
                return;
            };
            let sink = expression.sink;
            let Some(binding) = expression.binding_mut() else {
                return;
            };
            let observe = binding.mode != BindingMode::OneTime;
            let outer_notify = binding.base.common().validation.on_notify_data_errors;
            let Some(link) = binding.links.get_mut(child) else {
                return;
            };
            link.epoch = epoch;
            let notify_errors = outer_notify || link.binding.common.validation.on_notify_data_errors;
            (link.binding.clone(), link.path.clone(), sink, observe, notify_errors, epoch)
        };

        let mut walk = Walk::default();
        self.walk(&mut walk, tag, child, epoch, &binding, &path, sink, observe, notify_errors);

        let old = {
            let mut state = self.state_mut();
            let Some(link) = state
                .expressions
                .get_mut(&tag)
                .and_then(Expression::binding_mut)
                .and_then(|b| b.links.get_mut(child))
            else {
                return;
            };
            // A nested walk started from a callout already installed newer state.
            if link.epoch != epoch {
                return;
            }
            link.leaf = walk.leaf;
            link.value = walk.value.unwrap_or(LinkValue::Unresolved);
            link.structural = walk.structural;
            let old_watches = std::mem::replace(&mut link.watches, walk.watches);
            let new_watches = link.watches.clone();
            let old_subscriptions = std::mem::replace(&mut link.subscriptions, walk.subscriptions);
            for key in old_watches {
                state.remove_dependents(key, |d| {
                    matches!(d, Dependent::Link { expression, child: c, .. } if *expression == tag && *c == child)
                });
            }
            for key in new_watches {
                state.add_dependent(
                    key,
                    Dependent::Link {
                        expression: tag,
                        child,
                        epoch,
                    },
                );
            }
            old_subscriptions
        };
        drop(old);
    }

    #[expect(clippy::too_many_arguments, reason = "internal walk over split-out link state")]
    fn walk(
        &self,
        walk: &mut Walk,
        tag: u64,
        child: usize,
        epoch: u64,
        binding: &Binding,
        path: &PropertyPath,
        sink: Sink,
        observe: bool,
        notify_errors: bool,
    ) {
        let Some(mut node) = self.resolve_root(walk, binding, sink) else {
            return;
        };
        let Some(last) = path.len().checked_sub(1) else {
            walk.value = Some(leaf_value(binding, Some(node.into_value())));
            return;
        };
        for (i, step) in path.steps().iter().enumerate() {
            let Some(accessor) = Accessor::bind(self, &node, step) else {
                tracing::debug!(binding = tag, %step, "path step does not resolve");
                return;
            };
            if observe {
                self.observe(walk, &accessor, step.member_name(), tag, child, epoch);
            }
            let value = accessor.get(self);
            if i == last {
                if notify_errors
                    && let Some((object, _)) = accessor.error_member()
                    && let Some(notifier) = object.errors_changed()
                {
                    let tree = self.downgrade();
                    walk.subscriptions.push(notifier.subscribe(move |_: &str| {
                        if let Some(tree) = tree.upgrade() {
                            tree.relink(tag, child, epoch);
                        }
                    }));
                }
                walk.value = Some(leaf_value(binding, value));
                walk.leaf = Some(accessor);
                return;
            }
            match value.as_ref().and_then(Node::from_value) {
                Some(next) => node = next,
                None => return,
            }
        }
    }

    /// Registers for changes of the value behind `accessor`.
    fn observe(&self, walk: &mut Walk, accessor: &Accessor, member: &str, tag: u64, child: usize, epoch: u64) {
        match accessor {
            Accessor::Element { element, property } => walk.watches.push((*element, *property)),
            Accessor::Member { object, .. } | Accessor::Index { object, .. } => {
                let Some(notifier) = object.property_changed() else {
                    return;
                };
                let member: Rc<str> = Rc::from(member);
                let tree = self.downgrade();
                walk.subscriptions.push(notifier.subscribe(move |changed: &str| {
                    if (changed.is_empty() || *changed == *member)
                        && let Some(tree) = tree.upgrade()
                    {
                        tree.relink(tag, child, epoch);
                    }
                }));
            }
        }
    }

    /// Root precedence: explicit source, element name, relative source, then
    /// the inherited data context.
    fn resolve_root(&self, walk: &mut Walk, binding: &Binding, sink: Sink) -> Option<Node> {
        let target = sink.element();
        match &binding.root {
            RootSource::Source(value) => Node::from_value(value),
            RootSource::ElementName(name) => {
                walk.structural = true;
                self.find_name(target, name).map(Node::Element)
            }
            RootSource::Relative(RelativeSource::Self_) => Some(Node::Element(target)),
            RootSource::Relative(RelativeSource::FindAncestor { type_name, level }) => {
                walk.structural = true;
                let state = self.state();
                let skip = usize::try_from(level.saturating_sub(1)).unwrap_or(usize::MAX);
                state
                    .elements
                    .ancestors(target)
                    .filter(|a| state.element(*a).is_some_and(|d| d.type_name == *type_name))
                    .nth(skip)
                    .map(Node::Element)
            }
            RootSource::DataContext => {
                let data_context = self.inner.data_context.id();
                // A binding on DataContext itself reads the parent's.
                let holder = if sink.property() == Some(data_context) {
                    walk.structural = true;
                    self.parent(target)?
                } else {
                    target
                };
                walk.watches.push((holder, data_context));
                let (value, _) = self.effective(holder, data_context)?;
                Node::from_value(&value)
            }
        }
    }

    // --- Push ---------------------------------------------------------------

    pub(crate) fn refresh_logged(&self, tag: u64) {
        if let Err(error) = self.refresh(tag, false) {
            tracing::error!(binding = tag, %error, "binding update failed");
        }
    }

    /// Recomputes expression `tag` from its links and delivers the value.
    ///
    /// `install` hands the Local slot to the expression first.
    pub(crate) fn refresh(&self, tag: u64, install: bool) -> Result<(), BindingError> {
        enum Snapshot {
            Resource(Sink, ResourceKey),
            Binding(Sink, BindingBase, Vec<LinkSnapshot>, BindingMode),
        }
        let snapshot = {
            let state = self.state();
            let Some(expression) = state.expressions.get(&tag) else {
                return Ok(());
            };
            match &expression.kind {
                ExprKind::Resource(key) => Snapshot::Resource(expression.sink, key.clone()),
                ExprKind::Binding(b) => Snapshot::Binding(
                    expression.sink,
                    b.base.clone(),
                    b.links
                        .iter()
                        .map(|link| LinkSnapshot {
                            binding: link.binding.clone(),
                            value: link.value.clone(),
                            leaf: link.leaf.clone(),
                        })
                        .collect(),
                    b.mode,
                ),
            }
        };
        let (sink, base, links, mode) = match snapshot {
            Snapshot::Resource(sink, key) => return self.refresh_resource(tag, sink, &key, install),
            Snapshot::Binding(sink, base, links, mode) => (sink, base, links, mode),
        };

        if !mode.updates_target() {
            // The target keeps its value; the source follows it.
            if install && let Sink::Slot { element, property, .. } = sink {
                let literal = self.layer_value(element, property, Layer::Local);
                self.write_slot(element, property, SlotWrite::Install(ExpressionTag(tag), literal))?;
            }
            return Ok(());
        }

        let mut computed = compute(&base, &links);
        if let BindingBase::Priority(priority) = &base {
            let scanned = computed.active.unwrap_or(links.len());
            for (child, link) in links.iter().enumerate().take(scanned) {
                if let LinkValue::Faulted(fault) = &link.value
                    && !priority.common.validation.on_exceptions
                    && !link.binding.common.validation.on_exceptions
                {
                    tracing::warn!(binding = tag, child, %fault, "priority child fault");
                }
            }
        }
        if let (Some(property), Some(value)) = (sink.property(), computed.value.as_ref()) {
            let registration = self.registration(property);
            if !registration.accepts(value) {
                tracing::warn!(
                    binding = tag,
                    expected = registration.type_name(),
                    found = value.type_name(),
                    "binding produced a value of the wrong type"
                );
                computed.fault = Some(BindingFault::TypeMismatch {
                    expected: registration.type_name(),
                    found: value.type_name(),
                });
                computed.status = BindingStatus::Faulted;
                computed.value = base
                    .common()
                    .fallback_value
                    .clone()
                    .filter(|fallback| registration.accepts(fallback));
            }
        }
        if let Some(fault) = &computed.fault {
            tracing::warn!(binding = tag, %fault, "push fault");
        }

        let validation = &base.common().validation;
        if let Sink::Slot { element, property, .. } = sink {
            let id = BindingId(tag);
            let mut errors = self.data_errors(&base, &links, computed.active, property, id);
            if let Some(fault) = &computed.fault
                && validation.on_exceptions
            {
                errors.push(ValidationError::from_fault(
                    ErrorStage::Push,
                    property,
                    id,
                    fault.clone(),
                    None,
                ));
            }
            if computed.missed {
                errors.push(ValidationError::new(
                    ErrorStage::Push,
                    property,
                    id,
                    ValidationErrorKind::NoActiveChild,
                    ErasedValue::new(String::from("no binding in the priority list produced a value")),
                ));
            }
            self.replace_errors(element, id, ErrorStage::Push, errors);
        }

        {
            let mut state = self.state_mut();
            if let Some(binding) = state.expressions.get_mut(&tag).and_then(Expression::binding_mut) {
                if binding.active != computed.active && matches!(base, BindingBase::Priority(_)) {
                    tracing::debug!(binding = tag, active = ?computed.active, "priority binding switched child");
                }
                binding.status = computed.status;
                binding.active = computed.active;
            }
        }

        self.deliver(tag, sink, computed.value, install)?;
        match computed.fault {
            Some(fault) if !validation.on_exceptions => Err(fault.into()),
            _ => Ok(()),
        }
    }

    /// Writes an expression's value into its sink.
    pub(crate) fn deliver(
        &self,
        tag: u64,
        sink: Sink,
        value: Option<ErasedValue>,
        install: bool,
    ) -> Result<(), BindingError> {
        match sink {
            Sink::Slot {
                element,
                property,
                layer,
            } => {
                let write = if layer != Layer::Local {
                    value.map_or(SlotWrite::Clear(layer), |value| SlotWrite::Set(layer, value))
                } else if install {
                    SlotWrite::Install(ExpressionTag(tag), value)
                } else {
                    SlotWrite::ExpressionValue(ExpressionTag(tag), value)
                };
                self.write_slot(element, property, write)?;
            }
            Sink::Condition {
                element,
                instance,
                index,
            } => self.set_condition_value(element, instance, index, value),
        }
        Ok(())
    }

    /// Data errors reported by the leaves of the links that feed the target.
    fn data_errors(
        &self,
        base: &BindingBase,
        links: &[LinkSnapshot],
        active: Option<usize>,
        property: PropertyId,
        id: BindingId,
    ) -> Vec<ValidationError> {
        let outer = &base.common().validation;
        let mut errors = Vec::new();
        for (i, link) in links.iter().enumerate() {
            if matches!(base, BindingBase::Priority(_)) && active != Some(i) {
                continue;
            }
            let own = &link.binding.common.validation;
            let Some((object, member)) = link.leaf.as_ref().and_then(Accessor::error_member) else {
                continue;
            };
            if (outer.on_data_errors || own.on_data_errors)
                && let Some(message) = object.data_error(member)
                && !message.is_empty()
            {
                errors.push(ValidationError::new(
                    ErrorStage::Push,
                    property,
                    id,
                    ValidationErrorKind::DataError,
                    ErasedValue::new(message),
                ));
            }
            if outer.on_notify_data_errors || own.on_notify_data_errors {
                errors.extend(object.errors(member).into_iter().map(|content| {
                    ValidationError::new(
                        ErrorStage::Push,
                        property,
                        id,
                        ValidationErrorKind::NotifyDataError,
                        content,
                    )
                }));
            }
        }
        errors
    }

    /// Group the expression currently belongs to.
    pub(crate) fn expression_group(&self, tag: u64) -> Option<u64> {
        self.state()
            .expressions
            .get(&tag)
            .and_then(Expression::binding)
            .and_then(|b| b.group)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use trellis_property::{PropertyMetadata, PropertyRegistry, ValueSource};

    use super::*;
    use crate::error::{ConvertError, SourceError};
    use crate::source::{BindingSource, Notifier, Obj};
    use crate::binding::ValueConverter;

    #[derive(Default)]
    struct Person {
        name: RefCell<String>,
        changed: Notifier<str>,
    }

    impl Person {
        fn rename(&self, name: &str) {
            *self.name.borrow_mut() = name.to_owned();
            self.changed.notify("Name");
        }
    }

    impl BindingSource for Person {
        fn get(&self, member: &str) -> Option<ErasedValue> {
            (member == "Name").then(|| ErasedValue::new(self.name.borrow().clone()))
        }

        fn set(&self, member: &str, value: ErasedValue) -> Result<(), SourceError> {
            let name = value
                .get::<String>()
                .ok_or_else(|| SourceError::wrong_type(member, "String"))?;
            self.rename(&name);
            Ok(())
        }

        fn property_changed(&self) -> Option<&Notifier<str>> {
            Some(&self.changed)
        }
    }

    struct Fails;

    impl ValueConverter for Fails {
        fn convert(&self, _: &ErasedValue, _: Option<&ErasedValue>) -> Result<ErasedValue, ConvertError> {
            Err(ConvertError::new("nope"))
        }
    }

    fn setup() -> (ElementTree, trellis_property::Property<String>) {
        let mut registry = PropertyRegistry::new();
        let text = registry.register("TextBlock", "Text", PropertyMetadata::new(String::new()));
        (ElementTree::new(registry), text)
    }

    #[test]
    fn push_follows_source_changes_at_local_precedence() {
        let (tree, text) = setup();
        let person = Rc::new(Person::default());
        person.rename("Ada");
        let label = tree.create_element("TextBlock");
        tree.set_data_context(label, Some(Obj::from_rc(person.clone())));

        let id = tree.set_binding(label, text, Binding::new("Name")).unwrap();
        assert_eq!(tree.get_value(label, text), "Ada");
        assert_eq!(tree.value_source(label, text), ValueSource::Local);
        assert_eq!(tree.binding_status(id), Some(BindingStatus::Active));

        person.rename("Grace");
        assert_eq!(tree.get_value(label, text), "Grace");
    }

    #[test]
    fn literal_write_discards_binding() {
        let (tree, text) = setup();
        let person = Rc::new(Person::default());
        let label = tree.create_element("TextBlock");
        let id = tree
            .set_binding(label, text, Binding::new("Name").source(Obj::from_rc(person.clone())))
            .unwrap();
        tree.set_value(label, text, String::from("literal"));
        assert_eq!(tree.binding_status(id), None);
        assert_eq!(person.changed.subscriber_count(), 0);
        person.rename("ignored");
        assert_eq!(tree.get_value(label, text), "literal");
    }

    #[test]
    fn push_fault_uses_fallback_and_reports() {
        let (tree, text) = setup();
        let person = Obj::new(Person::default());
        let label = tree.create_element("TextBlock");
        let error = tree
            .set_binding(
                label,
                text,
                Binding::new("Name")
                    .source(person.clone())
                    .converter(Fails)
                    .fallback_value(String::from("?")),
            )
            .unwrap_err();
        assert!(matches!(error, BindingError::Conversion(_)));
        assert_eq!(tree.get_value(label, text), "?");
        assert!(!tree.has_error(label));

        let other = tree.create_element("TextBlock");
        tree.set_binding(
            other,
            text,
            Binding::new("Name")
                .source(person)
                .converter(Fails)
                .validates_on_exceptions(true),
        )
        .unwrap();
        assert_eq!(tree.errors(other)[0].kind, ValidationErrorKind::Conversion);
    }

    #[test]
    fn element_name_resolves_after_attach() {
        let (tree, text) = setup();
        let window = tree.create_element("Window");
        let source = tree.create_element("TextBox");
        let label = tree.create_element("TextBlock");
        tree.set_name(source, "Input");
        tree.set_value(source, text, String::from("typed"));
        tree.add_child(window, label).unwrap();

        let id = tree
            .set_binding(label, text, Binding::new("Text").element_name("Input"))
            .unwrap();
        assert_eq!(tree.binding_status(id), Some(BindingStatus::Unresolved));

        tree.add_child(window, source).unwrap();
        assert_eq!(tree.get_value(label, text), "typed");
        tree.set_value(source, text, String::from("again"));
        assert_eq!(tree.get_value(label, text), "again");
    }
}

// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Target to source updates.
//!
//! A pull converts the target value back, runs the validation rules and writes
//! the source. Every step reports a [`PullOutcome`]; faults only become a
//! [`BindingError`] at the public entry points, and only for bindings that do
//! not validate on exceptions.
//!
//! While a binding pulls, source notifications caused by its own write are
//! deferred; the binding re-reads its links once the pull finishes.

use trellis_property::{ErasedValue, ExpressionTag, Layer, Property, PropertyId, PropertyValue, UpdateSourceTrigger};

use crate::accessor::Journal;
use crate::binding::{BindingBase, BindingId};
use crate::element::ElementId;
use crate::error::{BindingError, BindingFault};
use crate::expression::{Expression, LinkSnapshot, Sink};
use crate::tree::{ElementTree, SlotWrite};
use crate::validation::{ErrorStage, ValidationError, ValidationErrorKind, ValidationStep, run_rules};

/// Result of one pull.
#[derive(Debug)]
#[must_use]
pub(crate) enum PullOutcome {
    /// The source was written, or there was nothing to write.
    Ok,
    /// The binding does not pull right now.
    Skipped,
    /// A rule failed or a fault was turned into a validation error.
    ValidationFailed,
    /// A fault the binding did not opt into validating.
    Faulted(BindingError),
}

impl PullOutcome {
    /// `Ok(true)` when the source was written.
    pub(crate) fn into_result(self) -> Result<bool, BindingError> {
        match self {
            Self::Ok => Ok(true),
            Self::Skipped | Self::ValidationFailed => Ok(false),
            Self::Faulted(error) => Err(error),
        }
    }
}

/// Everything a pull needs, copied out of the engine.
struct PullContext {
    tag: u64,
    element: ElementId,
    property: PropertyId,
    base: BindingBase,
    links: Vec<LinkSnapshot>,
    active: Option<usize>,
}

impl PullContext {
    fn id(&self) -> BindingId {
        BindingId(self.tag)
    }
}

impl ElementTree {
    /// Changes the effective value of `property` without changing its source.
    ///
    /// When Local is owned by a binding, the value becomes that binding's
    /// target value and, for a `PropertyChanged` binding outside any group,
    /// is written to the source right away. Otherwise the value replaces the
    /// contents of whichever layer currently wins, or Local when the default
    /// is in effect.
    pub fn set_current_value<T: PropertyValue>(
        &self,
        element: ElementId,
        property: Property<T>,
        value: T,
    ) -> Result<bool, BindingError> {
        self.set_current_value_erased(element, property, ErasedValue::new(value))
    }

    /// Erased form of [`ElementTree::set_current_value`].
    pub fn set_current_value_erased(
        &self,
        element: ElementId,
        property: impl Into<PropertyId>,
        value: ErasedValue,
    ) -> Result<bool, BindingError> {
        let property = property.into();
        let (expression, layer, binding) = {
            let state = self.state();
            let data = state.element(element).ok_or(BindingError::StaleElement(element))?;
            let expression = data.store.expression(property);
            let layer = data.store.value_source(property).layer().unwrap_or(Layer::Local);
            let binding = expression
                .and_then(|tag| state.expressions.get(&tag.0))
                .and_then(Expression::binding)
                .map(|b| {
                    b.mode.updates_source()
                        && b.trigger == UpdateSourceTrigger::PropertyChanged
                        && b.group.is_none()
                });
            (expression, layer, binding)
        };

        let changed = match expression {
            Some(tag) if layer == Layer::Local => {
                self.write_slot(element, property, SlotWrite::ExpressionValue(tag, Some(value)))?
            }
            _ => self.write_slot(element, property, SlotWrite::Set(layer, value))?,
        };
        if changed
            && layer == Layer::Local
            && binding == Some(true)
            && let Some(ExpressionTag(tag)) = expression
        {
            self.pull_binding(tag).into_result()?;
        }
        Ok(changed)
    }

    /// Writes the current target value of the binding on `property` to its
    /// source, whatever its trigger.
    ///
    /// Bindings registered in a binding group only update through
    /// [`ElementTree::commit_edit`]; for them this does nothing. Returns
    /// `Ok(true)` when the source was written.
    pub fn update_source(&self, element: ElementId, property: impl Into<PropertyId>) -> Result<bool, BindingError> {
        let Some(BindingId(tag)) = self.binding_expression(element, property) else {
            return Ok(false);
        };
        if self.expression_group(tag).is_some() {
            return Ok(false);
        }
        self.pull_binding(tag).into_result()
    }

    /// Focus left `element`: pulls every `LostFocus` binding on it.
    ///
    /// All bindings are attempted; the first error is returned.
    pub fn lost_focus(&self, element: ElementId) -> Result<(), BindingError> {
        let mut tags: Vec<u64> = self
            .state()
            .expressions
            .iter()
            .filter(|(_, e)| matches!(e.sink, Sink::Slot { element: el, .. } if el == element))
            .filter(|(_, e)| {
                e.binding().is_some_and(|b| {
                    b.trigger == UpdateSourceTrigger::LostFocus && b.group.is_none() && b.mode.updates_source()
                })
            })
            .map(|(tag, _)| *tag)
            .collect();
        tags.sort_unstable();
        let mut first = None;
        for tag in tags {
            if let Err(error) = self.pull_binding(tag).into_result() {
                first.get_or_insert(error);
            }
        }
        first.map_or(Ok(()), Err)
    }

    // --- Internals -------------------------------------------------------------

    /// Pulls one binding under its own update guard.
    pub(crate) fn pull_binding(&self, tag: u64) -> PullOutcome {
        if !self.begin_update(tag) {
            return PullOutcome::Skipped;
        }
        let mut journal = Journal::default();
        let outcome = self.pull(tag, &mut journal);
        self.finish_update(tag, matches!(outcome, PullOutcome::Ok));
        outcome
    }

    /// Marks `tag` as updating. Returns `false` if it cannot pull now.
    pub(crate) fn begin_update(&self, tag: u64) -> bool {
        let mut state = self.state_mut();
        let Some(binding) = state.expressions.get_mut(&tag).and_then(Expression::binding_mut) else {
            return false;
        };
        if binding.updating || !binding.mode.updates_source() {
            return false;
        }
        binding.updating = true;
        binding.stale = false;
        true
    }

    /// Ends an update. Links whose source changed meanwhile are re-walked;
    /// the target is refreshed from the source only when `push` is set.
    pub(crate) fn finish_update(&self, tag: u64, push: bool) {
        let (stale, count) = {
            let mut state = self.state_mut();
            let Some(binding) = state.expressions.get_mut(&tag).and_then(Expression::binding_mut) else {
                return;
            };
            binding.updating = false;
            (std::mem::take(&mut binding.stale), binding.links.len())
        };
        if stale {
            for child in 0..count {
                self.resolve_link(tag, child);
            }
        }
        if push {
            self.refresh_logged(tag);
        }
    }

    fn pull_context(&self, tag: u64) -> Option<PullContext> {
        let state = self.state();
        let expression = state.expressions.get(&tag)?;
        let Sink::Slot { element, property, .. } = expression.sink else {
            return None;
        };
        let binding = expression.binding()?;
        Some(PullContext {
            tag,
            element,
            property,
            base: binding.base.clone(),
            links: binding
                .links
                .iter()
                .map(|link| LinkSnapshot {
                    binding: link.binding.clone(),
                    value: link.value.clone(),
                    leaf: link.leaf.clone(),
                })
                .collect(),
            active: binding.active,
        })
    }

    /// One pull, recording every source write in `journal`.
    pub(crate) fn pull(&self, tag: u64, journal: &mut Journal) -> PullOutcome {
        let Some(ctx) = self.pull_context(tag) else {
            return PullOutcome::Skipped;
        };
        let Some(target) = self.get_value_erased(ctx.element, ctx.property) else {
            return PullOutcome::Faulted(BindingError::StaleElement(ctx.element));
        };
        tracing::debug!(binding = tag, element = %ctx.element, "updating source");
        self.replace_errors(ctx.element, ctx.id(), ErrorStage::Pull, Vec::new());

        if self.rule_failed(&ctx, ValidationStep::RawProposedValue, &target) {
            return PullOutcome::ValidationFailed;
        }
        match &ctx.base {
            BindingBase::Single(_) => match ctx.links.first() {
                Some(link) => self.pull_link(&ctx, link, &target, journal),
                None => PullOutcome::Ok,
            },
            BindingBase::Priority(_) => match ctx.active.and_then(|i| ctx.links.get(i)) {
                Some(link) => self.pull_link(&ctx, link, &target, journal),
                None => PullOutcome::Ok,
            },
            BindingBase::Multi(_) => self.pull_multi(&ctx, &target, journal),
        }
    }

    fn pull_link(
        &self,
        ctx: &PullContext,
        link: &LinkSnapshot,
        target: &ErasedValue,
        journal: &mut Journal,
    ) -> PullOutcome {
        let Some(leaf) = &link.leaf else {
            return PullOutcome::Ok;
        };
        let binding = &link.binding;
        let value = match &binding.converter {
            Some(converter) => match converter.convert_back(target, binding.converter_parameter.as_ref()) {
                Ok(value) => value,
                Err(error) => return self.fault(ctx, BindingFault::Conversion(error)),
            },
            None => target.clone(),
        };
        if value.is_unset() {
            return PullOutcome::Ok;
        }
        if self.rule_failed(ctx, ValidationStep::ConvertedProposedValue, &value) {
            return PullOutcome::ValidationFailed;
        }
        let prior = leaf.get(self);
        if let Err(fault) = leaf.set(self, value.clone()) {
            return self.fault(ctx, fault);
        }
        journal.record(leaf.clone(), prior);
        if self.rule_failed(ctx, ValidationStep::UpdatedValue, &value) {
            return PullOutcome::ValidationFailed;
        }
        PullOutcome::Ok
    }

    /// Converts back for every child before writing any source; a failing
    /// write restores the children already written.
    fn pull_multi(&self, ctx: &PullContext, target: &ErasedValue, journal: &mut Journal) -> PullOutcome {
        let BindingBase::Multi(multi) = &ctx.base else {
            return PullOutcome::Skipped;
        };
        let count = ctx.links.len();
        let values = match multi
            .converter
            .convert_back(target, count, multi.converter_parameter.as_ref())
        {
            Ok(values) => values,
            Err(error) => return self.fault(ctx, BindingFault::Conversion(error)),
        };
        if values.len() != count {
            return self.fault(
                ctx,
                BindingFault::ArityMismatch {
                    expected: count,
                    actual: values.len(),
                },
            );
        }
        if self.rule_failed(ctx, ValidationStep::ConvertedProposedValue, target) {
            return PullOutcome::ValidationFailed;
        }

        let mut writes = Vec::with_capacity(count);
        for (link, value) in ctx.links.iter().zip(values) {
            if value.is_unset() {
                continue;
            }
            let Some(leaf) = &link.leaf else { continue };
            let value = match &link.binding.converter {
                Some(converter) => match converter.convert_back(&value, link.binding.converter_parameter.as_ref()) {
                    Ok(value) => value,
                    Err(error) => return self.fault(ctx, BindingFault::Conversion(error)),
                },
                None => value,
            };
            if !value.is_unset() {
                writes.push((leaf.clone(), value));
            }
        }

        let keep = journal.len();
        for (leaf, value) in writes {
            let prior = leaf.get(self);
            if let Err(fault) = leaf.set(self, value) {
                journal.rollback_to(self, keep);
                return self.fault(ctx, fault);
            }
            journal.record(leaf, prior);
        }
        if self.rule_failed(ctx, ValidationStep::UpdatedValue, target) {
            return PullOutcome::ValidationFailed;
        }
        PullOutcome::Ok
    }

    /// Runs the rules for `step`, recording a failure as a validation error.
    fn rule_failed(&self, ctx: &PullContext, step: ValidationStep, value: &ErasedValue) -> bool {
        let rules = &ctx.base.common().validation.rules;
        let Some(content) = run_rules(rules, step, value) else {
            return false;
        };
        self.add_error(
            ctx.element,
            ValidationError::new(
                ErrorStage::Pull,
                ctx.property,
                ctx.id(),
                ValidationErrorKind::Rule,
                content,
            ),
        );
        true
    }

    /// Routes a pull fault through `validates_on_exceptions` and the
    /// exception filter.
    fn fault(&self, ctx: &PullContext, fault: BindingFault) -> PullOutcome {
        let validation = &ctx.base.common().validation;
        if !validation.on_exceptions {
            tracing::debug!(binding = ctx.tag, %fault, "source update failed");
            return PullOutcome::Faulted(fault.into());
        }
        let content = match &validation.exception_filter {
            Some(filter) => match filter(&fault, ctx.id()) {
                Ok(content) => content,
                Err(error) => return PullOutcome::Faulted(BindingError::Filter(error)),
            },
            None => None,
        };
        self.add_error(
            ctx.element,
            ValidationError::from_fault(ErrorStage::Pull, ctx.property, ctx.id(), fault, content),
        );
        PullOutcome::ValidationFailed
    }
}

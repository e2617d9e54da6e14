// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Validation rules and per-element error collections.
//!
//! Every error is tagged with the binding that produced it. A binding only
//! ever replaces or removes its own errors, so clearing one binding leaves the
//! errors of every other binding on the same element untouched. Whether an
//! element has errors is always computed from the collection.

use std::fmt;
use std::rc::Rc;

use trellis_property::{ErasedValue, PropertyId, PropertyValue};

use crate::binding::BindingId;
use crate::element::ElementId;
use crate::error::BindingFault;
use crate::tree::ElementTree;

/// Point of the update pipeline at which a rule runs.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValidationStep {
    /// Before conversion, against the raw target value.
    RawProposedValue,
    /// After `convert_back`, before the source is written.
    #[default]
    ConvertedProposedValue,
    /// After the source was written.
    UpdatedValue,
}

/// Outcome of a [`ValidationRule`].
#[derive(Clone, Debug, PartialEq)]
pub enum ValidationResult {
    /// The value is acceptable.
    Valid,
    /// The value is rejected; the payload becomes the error content.
    Invalid(ErasedValue),
}

impl ValidationResult {
    /// Rejection with a text message.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(ErasedValue::new(message.into()))
    }

    /// Returns `true` for [`ValidationResult::Valid`].
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// A check run on values travelling from target to source.
pub trait ValidationRule {
    /// When the rule runs.
    fn step(&self) -> ValidationStep {
        ValidationStep::ConvertedProposedValue
    }

    /// Checks `value`.
    fn validate(&self, value: &ErasedValue) -> ValidationResult;
}

/// A [`ValidationRule`] made from a closure.
///
/// ```rust
/// use trellis_property::ErasedValue;
/// use trellis_ui::{FnValidationRule, ValidationResult, ValidationRule, ValidationStep};
///
/// let not_empty = FnValidationRule::new(|value: &ErasedValue| {
///     match value.downcast_ref::<String>() {
///         Some(s) if !s.is_empty() => ValidationResult::Valid,
///         _ => ValidationResult::invalid("required"),
///     }
/// })
/// .at(ValidationStep::RawProposedValue);
///
/// assert_eq!(not_empty.step(), ValidationStep::RawProposedValue);
/// assert!(!not_empty.validate(&ErasedValue::new(String::new())).is_valid());
/// ```
pub struct FnValidationRule<F> {
    check: F,
    step: ValidationStep,
}

impl<F> FnValidationRule<F>
where
    F: Fn(&ErasedValue) -> ValidationResult,
{
    /// Rule running at [`ValidationStep::ConvertedProposedValue`].
    pub fn new(check: F) -> Self {
        Self {
            check,
            step: ValidationStep::default(),
        }
    }

    /// Moves the rule to `step`.
    #[must_use]
    pub fn at(mut self, step: ValidationStep) -> Self {
        self.step = step;
        self
    }
}

impl<F> ValidationRule for FnValidationRule<F>
where
    F: Fn(&ErasedValue) -> ValidationResult,
{
    fn step(&self) -> ValidationStep {
        self.step
    }

    fn validate(&self, value: &ErasedValue) -> ValidationResult {
        (self.check)(value)
    }
}

impl<F> fmt::Debug for FnValidationRule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnValidationRule")
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

/// What produced a [`ValidationError`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// A [`ValidationRule`] rejected the value.
    Rule,
    /// A source write failed.
    Exception,
    /// A converter failed or returned the wrong shape.
    Conversion,
    /// [`BindingSource::data_error`](crate::BindingSource::data_error).
    DataError,
    /// [`BindingSource::errors`](crate::BindingSource::errors).
    NotifyDataError,
    /// No child of a priority binding produced a value.
    NoActiveChild,
}

/// Which direction of a binding reported an error.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum ErrorStage {
    /// Source to target: conversion faults, data errors, priority misses.
    Push,
    /// Target to source: rules, write failures, `convert_back` faults.
    Pull,
}

/// One validation error on an element.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationError {
    /// Target property of the originating binding.
    pub property: PropertyId,
    /// The originating binding.
    pub origin: BindingId,
    /// What produced the error.
    pub kind: ValidationErrorKind,
    /// Rule payload, filter result, error text, or the fault itself.
    pub content: ErasedValue,
    /// The fault behind exception and conversion errors.
    pub fault: Option<BindingFault>,
    pub(crate) stage: ErrorStage,
}

impl ValidationError {
    pub(crate) fn new(
        stage: ErrorStage,
        property: PropertyId,
        origin: BindingId,
        kind: ValidationErrorKind,
        content: ErasedValue,
    ) -> Self {
        Self {
            property,
            origin,
            kind,
            content,
            fault: None,
            stage,
        }
    }

    pub(crate) fn from_fault(
        stage: ErrorStage,
        property: PropertyId,
        origin: BindingId,
        fault: BindingFault,
        content: Option<ErasedValue>,
    ) -> Self {
        let kind = match fault {
            BindingFault::SourceWrite(_) => ValidationErrorKind::Exception,
            BindingFault::Conversion(_)
            | BindingFault::ArityMismatch { .. }
            | BindingFault::TypeMismatch { .. } => ValidationErrorKind::Conversion,
        };
        Self {
            property,
            origin,
            kind,
            content: content.unwrap_or_else(|| ErasedValue::new(fault.clone())),
            fault: Some(fault),
            stage,
        }
    }

    /// The content as text, when it is a `String`.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.content.get::<String>()
    }

    /// Typed content.
    #[must_use]
    pub fn content_as<T: PropertyValue>(&self) -> Option<&T> {
        self.content.downcast_ref()
    }
}

/// Runs every rule registered for `step`, stopping at the first failure.
pub(crate) fn run_rules(
    rules: &[Rc<dyn ValidationRule>],
    step: ValidationStep,
    value: &ErasedValue,
) -> Option<ErasedValue> {
    rules
        .iter()
        .filter(|rule| rule.step() == step)
        .find_map(|rule| match rule.validate(value) {
            ValidationResult::Valid => None,
            ValidationResult::Invalid(content) => Some(content),
        })
}

impl ElementTree {
    /// Returns `true` while any binding on `element` reports an error.
    #[must_use]
    pub fn has_error(&self, element: ElementId) -> bool {
        self.state()
            .element(element)
            .is_some_and(|data| !data.errors.is_empty())
    }

    /// Every error on `element`, oldest first.
    #[must_use]
    pub fn errors(&self, element: ElementId) -> Vec<ValidationError> {
        self.state()
            .element(element)
            .map(|data| data.errors.clone())
            .unwrap_or_default()
    }

    /// Errors on `element` reported for `property`.
    #[must_use]
    pub fn property_errors(&self, element: ElementId, property: impl Into<PropertyId>) -> Vec<ValidationError> {
        let property = property.into();
        self.state()
            .element(element)
            .map(|data| {
                data.errors
                    .iter()
                    .filter(|e| e.property == property)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replaces the errors `origin` reported at `stage` with `errors`.
    pub(crate) fn replace_errors(
        &self,
        element: ElementId,
        origin: BindingId,
        stage: ErrorStage,
        errors: Vec<ValidationError>,
    ) {
        let mut state = self.state_mut();
        let Some(data) = state.element_mut(element) else {
            return;
        };
        data.errors
            .retain(|e| e.origin != origin || e.stage != stage);
        if !errors.is_empty() {
            tracing::debug!(
                element = %element,
                binding = %origin,
                count = errors.len(),
                "validation errors reported"
            );
        }
        data.errors.extend(errors);
    }

    pub(crate) fn add_error(&self, element: ElementId, error: ValidationError) {
        tracing::debug!(
            element = %element,
            binding = %error.origin,
            kind = ?error.kind,
            "validation error reported"
        );
        if let Some(data) = self.state_mut().element_mut(element) {
            data.errors.push(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;

    #[test]
    fn rules_run_in_order_and_stop_at_first_failure() {
        let positive: Rc<dyn ValidationRule> = Rc::new(FnValidationRule::new(|v: &ErasedValue| {
            if v.get::<i32>().is_some_and(|n| n > 0) {
                ValidationResult::Valid
            } else {
                ValidationResult::invalid("must be positive")
            }
        }));
        let small: Rc<dyn ValidationRule> = Rc::new(FnValidationRule::new(|v: &ErasedValue| {
            if v.get::<i32>().is_some_and(|n| n < 10) {
                ValidationResult::Valid
            } else {
                ValidationResult::invalid("too large")
            }
        }));
        let late: Rc<dyn ValidationRule> = Rc::new(
            FnValidationRule::new(|_: &ErasedValue| ValidationResult::invalid("never checked here"))
                .at(ValidationStep::UpdatedValue),
        );
        let rules = [positive, small, late];
        let step = ValidationStep::ConvertedProposedValue;

        assert_eq!(run_rules(&rules, step, &ErasedValue::new(5_i32)), None);
        assert_eq!(
            run_rules(&rules, step, &ErasedValue::new(-5_i32)),
            Some(ErasedValue::new(String::from("must be positive")))
        );
        assert_eq!(
            run_rules(&rules, step, &ErasedValue::new(50_i32)),
            Some(ErasedValue::new(String::from("too large")))
        );
        assert!(run_rules(&rules, ValidationStep::UpdatedValue, &ErasedValue::new(5_i32)).is_some());
    }

    #[test]
    fn fault_errors_wrap_the_fault_by_default() {
        let fault = BindingFault::SourceWrite(SourceError::new("setter failed"));
        let error = ValidationError::from_fault(
            ErrorStage::Pull,
            PropertyId::new(0),
            BindingId(3),
            fault.clone(),
            None,
        );
        assert_eq!(error.kind, ValidationErrorKind::Exception);
        assert_eq!(error.content_as::<BindingFault>(), Some(&fault));

        let filtered = ValidationError::from_fault(
            ErrorStage::Pull,
            PropertyId::new(0),
            BindingId(3),
            fault,
            Some(ErasedValue::new(String::from("filtered"))),
        );
        assert_eq!(filtered.message().as_deref(), Some("filtered"));
    }
}

// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binding descriptions.
//!
//! [`Binding`], [`MultiBinding`] and [`PriorityBinding`] are immutable
//! descriptions built with chained setters. Attaching one to a property with
//! [`ElementTree::set_binding`](crate::ElementTree::set_binding) creates a
//! live expression identified by a [`BindingId`].

use std::fmt;
use std::rc::Rc;

use trellis_property::{ErasedValue, PropertyValue, UpdateSourceTrigger};

use crate::error::{BindingFault, ConvertError, SourceError};
use crate::source::Obj;
use crate::validation::ValidationRule;

/// Identity of a live binding expression.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(pub(crate) u64);

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding #{}", self.0)
    }
}

/// Direction of data flow.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum BindingMode {
    /// The target property's declared default: two-way if it binds two-way by
    /// default, one-way otherwise.
    #[default]
    Default,
    /// Source to target, on every source change.
    OneWay,
    /// Both directions.
    TwoWay,
    /// Source to target once, when the binding resolves.
    OneTime,
    /// Target to source only.
    OneWayToSource,
}

impl BindingMode {
    /// Whether target edits are written back.
    #[must_use]
    pub fn updates_source(self) -> bool {
        matches!(self, Self::TwoWay | Self::OneWayToSource)
    }

    /// Whether source changes reach the target.
    #[must_use]
    pub fn updates_target(self) -> bool {
        !matches!(self, Self::OneWayToSource)
    }
}

/// Root selection relative to the target element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RelativeSource {
    /// The target element itself.
    Self_,
    /// The `level`-th visual ancestor (1 = nearest) whose type name is
    /// `type_name`. Re-evaluated whenever the tree shape changes.
    FindAncestor {
        /// Element type name to match.
        type_name: &'static str,
        /// Which match to take, counting from 1.
        level: u32,
    },
}

impl RelativeSource {
    /// Nearest ancestor of `type_name`.
    #[must_use]
    pub fn find_ancestor(type_name: &'static str) -> Self {
        Self::FindAncestor { type_name, level: 1 }
    }
}

/// Where a binding path starts.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) enum RootSource {
    /// The target's inherited `DataContext`.
    #[default]
    DataContext,
    Source(ErasedValue),
    ElementName(Rc<str>),
    Relative(RelativeSource),
}

/// Converts between source and target representations.
pub trait ValueConverter {
    /// Source to target.
    fn convert(&self, value: &ErasedValue, parameter: Option<&ErasedValue>) -> Result<ErasedValue, ConvertError>;

    /// Target to source.
    fn convert_back(
        &self,
        value: &ErasedValue,
        parameter: Option<&ErasedValue>,
    ) -> Result<ErasedValue, ConvertError> {
        let _ = (value, parameter);
        Err(ConvertError::new("convert_back is not supported"))
    }
}

/// Combines several source values into one target value.
pub trait MultiValueConverter {
    /// Sources to target. Unresolved children without a fallback appear as
    /// [`ErasedValue::unset`].
    fn convert(&self, values: &[ErasedValue], parameter: Option<&ErasedValue>) -> Result<ErasedValue, ConvertError>;

    /// Target to one value per child. Returning [`ErasedValue::unset`] for a
    /// child leaves that child's source untouched.
    fn convert_back(
        &self,
        value: &ErasedValue,
        count: usize,
        parameter: Option<&ErasedValue>,
    ) -> Result<Vec<ErasedValue>, ConvertError> {
        let _ = (value, count, parameter);
        Err(ConvertError::new("convert_back is not supported"))
    }
}

/// Hook run on a source update failure of a binding that validates on
/// exceptions.
///
/// `Ok(Some(content))` becomes the validation error content, `Ok(None)` keeps
/// the fault itself as the content, and `Err` is returned to the caller of the
/// update in place of the fault.
pub type UpdateSourceExceptionFilter =
    Rc<dyn Fn(&BindingFault, BindingId) -> Result<Option<ErasedValue>, SourceError>>;

/// Validation knobs shared by all binding kinds.
#[derive(Clone, Default)]
pub(crate) struct ValidationSettings {
    pub(crate) rules: Vec<Rc<dyn ValidationRule>>,
    pub(crate) on_exceptions: bool,
    pub(crate) on_data_errors: bool,
    pub(crate) on_notify_data_errors: bool,
    pub(crate) exception_filter: Option<UpdateSourceExceptionFilter>,
}

impl fmt::Debug for ValidationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationSettings")
            .field("rules", &self.rules.len())
            .field("on_exceptions", &self.on_exceptions)
            .field("on_data_errors", &self.on_data_errors)
            .field("on_notify_data_errors", &self.on_notify_data_errors)
            .field("exception_filter", &self.exception_filter.is_some())
            .finish()
    }
}

/// Settings shared by all binding kinds.
#[derive(Clone, Debug, Default)]
pub(crate) struct CommonSettings {
    pub(crate) mode: BindingMode,
    pub(crate) update_source_trigger: UpdateSourceTrigger,
    pub(crate) fallback_value: Option<ErasedValue>,
    pub(crate) target_null_value: Option<ErasedValue>,
    pub(crate) binding_group_name: Option<Rc<str>>,
    pub(crate) validation: ValidationSettings,
}

macro_rules! common_setters {
    () => {
        /// Sets the direction of data flow.
        #[must_use]
        pub fn mode(mut self, mode: BindingMode) -> Self {
            self.common.mode = mode;
            self
        }

        /// Sets when target edits are written back.
        #[must_use]
        pub fn update_source_trigger(mut self, trigger: UpdateSourceTrigger) -> Self {
            self.common.update_source_trigger = trigger;
            self
        }

        /// Value used while the binding cannot produce one.
        #[must_use]
        pub fn fallback_value<T: PropertyValue>(mut self, value: T) -> Self {
            self.common.fallback_value = Some(ErasedValue::new(value));
            self
        }

        /// Value used when the source yields null.
        #[must_use]
        pub fn target_null_value<T: PropertyValue>(mut self, value: T) -> Self {
            self.common.target_null_value = Some(ErasedValue::new(value));
            self
        }

        /// Joins the nearest ancestor binding group with this name.
        #[must_use]
        pub fn binding_group_name(mut self, name: &str) -> Self {
            self.common.binding_group_name = Some(Rc::from(name));
            self
        }

        /// Appends a validation rule; rules run in order and stop at the first
        /// failure.
        #[must_use]
        pub fn validation_rule(mut self, rule: impl ValidationRule + 'static) -> Self {
            self.common.validation.rules.push(Rc::new(rule));
            self
        }

        /// Turns update failures into validation errors.
        #[must_use]
        pub fn validates_on_exceptions(mut self, enabled: bool) -> Self {
            self.common.validation.on_exceptions = enabled;
            self
        }

        /// Reports [`BindingSource::data_error`](crate::BindingSource::data_error)
        /// as validation errors.
        #[must_use]
        pub fn validates_on_data_errors(mut self, enabled: bool) -> Self {
            self.common.validation.on_data_errors = enabled;
            self
        }

        /// Reports [`BindingSource::errors`](crate::BindingSource::errors) as
        /// validation errors, following `errors_changed`.
        #[must_use]
        pub fn validates_on_notify_data_errors(mut self, enabled: bool) -> Self {
            self.common.validation.on_notify_data_errors = enabled;
            self
        }

        /// Installs an [`UpdateSourceExceptionFilter`].
        #[must_use]
        pub fn update_source_exception_filter<F>(mut self, filter: F) -> Self
        where
            F: Fn(&BindingFault, BindingId) -> Result<Option<ErasedValue>, SourceError> + 'static,
        {
            self.common.validation.exception_filter = Some(Rc::new(filter));
            self
        }
    };
}

/// A single-path binding.
///
/// ```rust
/// use trellis_property::UpdateSourceTrigger;
/// use trellis_ui::{Binding, BindingMode};
///
/// let binding = Binding::new("Customer.Name")
///     .mode(BindingMode::TwoWay)
///     .update_source_trigger(UpdateSourceTrigger::LostFocus)
///     .validates_on_exceptions(true)
///     .fallback_value(String::from("(none)"));
/// assert_eq!(binding.path(), "Customer.Name");
/// ```
#[derive(Clone, Debug)]
pub struct Binding {
    pub(crate) path: Rc<str>,
    pub(crate) root: RootSource,
    pub(crate) converter: Option<Rc<dyn ValueConverter>>,
    pub(crate) converter_parameter: Option<ErasedValue>,
    pub(crate) common: CommonSettings,
}

impl fmt::Debug for dyn ValueConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueConverter")
    }
}

impl fmt::Debug for dyn MultiValueConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MultiValueConverter")
    }
}

impl Binding {
    /// Binding to `path` against the target's `DataContext`.
    #[must_use]
    pub fn new(path: &str) -> Self {
        Self {
            path: Rc::from(path),
            root: RootSource::DataContext,
            converter: None,
            converter_parameter: None,
            common: CommonSettings::default(),
        }
    }

    /// The path text.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Starts the path at an explicit object.
    #[must_use]
    pub fn source(mut self, source: Obj) -> Self {
        self.root = RootSource::Source(ErasedValue::new(source));
        self
    }

    /// Starts the path at an arbitrary value.
    #[must_use]
    pub fn source_value<T: PropertyValue>(mut self, value: T) -> Self {
        self.root = RootSource::Source(ErasedValue::new(value));
        self
    }

    /// Starts the path at the element named `name` in the target's name scope.
    #[must_use]
    pub fn element_name(mut self, name: &str) -> Self {
        self.root = RootSource::ElementName(Rc::from(name));
        self
    }

    /// Starts the path relative to the target element.
    #[must_use]
    pub fn relative_source(mut self, relative: RelativeSource) -> Self {
        self.root = RootSource::Relative(relative);
        self
    }

    /// Installs a converter.
    #[must_use]
    pub fn converter(mut self, converter: impl ValueConverter + 'static) -> Self {
        self.converter = Some(Rc::new(converter));
        self
    }

    /// Parameter handed to the converter.
    #[must_use]
    pub fn converter_parameter<T: PropertyValue>(mut self, parameter: T) -> Self {
        self.converter_parameter = Some(ErasedValue::new(parameter));
        self
    }

    common_setters!();
}

/// N sources combined into one target through a [`MultiValueConverter`].
#[derive(Clone, Debug)]
pub struct MultiBinding {
    pub(crate) bindings: Vec<Rc<Binding>>,
    pub(crate) converter: Rc<dyn MultiValueConverter>,
    pub(crate) converter_parameter: Option<ErasedValue>,
    pub(crate) common: CommonSettings,
}

impl MultiBinding {
    /// Multi binding with no children yet.
    #[must_use]
    pub fn new(converter: impl MultiValueConverter + 'static) -> Self {
        Self {
            bindings: Vec::new(),
            converter: Rc::new(converter),
            converter_parameter: None,
            common: CommonSettings::default(),
        }
    }

    /// Appends a child binding.
    #[must_use]
    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(Rc::new(binding));
        self
    }

    /// Parameter handed to the converter.
    #[must_use]
    pub fn converter_parameter<T: PropertyValue>(mut self, parameter: T) -> Self {
        self.converter_parameter = Some(ErasedValue::new(parameter));
        self
    }

    /// Number of child bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if there are no child bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    common_setters!();
}

/// Ordered fallback list; the first child that resolves wins.
#[derive(Clone, Debug)]
pub struct PriorityBinding {
    pub(crate) bindings: Vec<Rc<Binding>>,
    pub(crate) common: CommonSettings,
}

impl Default for PriorityBinding {
    fn default() -> Self {
        Self::new()
    }
}

impl PriorityBinding {
    /// Priority binding with no children yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            common: CommonSettings::default(),
        }
    }

    /// Appends a child binding at the next lower priority.
    #[must_use]
    pub fn binding(mut self, binding: Binding) -> Self {
        self.bindings.push(Rc::new(binding));
        self
    }

    /// Number of child bindings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if there are no child bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    common_setters!();
}

/// Any binding description.
#[derive(Clone, Debug)]
pub enum BindingBase {
    /// A [`Binding`].
    Single(Rc<Binding>),
    /// A [`MultiBinding`].
    Multi(Rc<MultiBinding>),
    /// A [`PriorityBinding`].
    Priority(Rc<PriorityBinding>),
}

impl BindingBase {
    pub(crate) fn common(&self) -> &CommonSettings {
        match self {
            Self::Single(b) => &b.common,
            Self::Multi(b) => &b.common,
            Self::Priority(b) => &b.common,
        }
    }

    /// Child bindings, one per link.
    pub(crate) fn links(&self) -> Vec<Rc<Binding>> {
        match self {
            Self::Single(b) => vec![b.clone()],
            Self::Multi(b) => b.bindings.clone(),
            Self::Priority(b) => b.bindings.clone(),
        }
    }
}

impl From<Binding> for BindingBase {
    fn from(binding: Binding) -> Self {
        Self::Single(Rc::new(binding))
    }
}

impl From<MultiBinding> for BindingBase {
    fn from(binding: MultiBinding) -> Self {
        Self::Multi(Rc::new(binding))
    }
}

impl From<PriorityBinding> for BindingBase {
    fn from(binding: PriorityBinding) -> Self {
        Self::Priority(Rc::new(binding))
    }
}

/// Observable state of a live binding.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingStatus {
    /// The path, or every child's path, does not resolve.
    Unresolved,
    /// The binding produced a value.
    Active,
    /// The last push or pull failed.
    Faulted,
}

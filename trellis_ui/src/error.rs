// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types.
//!
//! User code raises [`SourceError`] from source setters and [`ConvertError`]
//! from converters. The engine turns those into validation errors when the
//! binding opted in, and into a [`BindingError`] for the immediate caller
//! otherwise. Load-time contract violations are [`ConstructionError`]s,
//! optionally wrapped in a [`LoadError`] carrying a location.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::element::ElementId;
use crate::path::PathError;

/// Failure raised by a [`BindingSource`](crate::BindingSource) write.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct SourceError {
    message: String,
}

impl SourceError {
    /// Error with a free-form message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The member cannot be written.
    #[must_use]
    pub fn read_only(member: &str) -> Self {
        Self::new(format!("member `{member}` is read-only"))
    }

    /// The value has the wrong type for the member.
    #[must_use]
    pub fn wrong_type(member: &str, expected: &str) -> Self {
        Self::new(format!("member `{member}` expects a value of type {expected}"))
    }

    /// The message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Failure raised by a converter.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ConvertError {
    message: String,
}

impl ConvertError {
    /// Error with a free-form message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A failure inside one binding's push or pull, before it is surfaced.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum BindingFault {
    /// The source rejected the write.
    #[error("source write failed: {0}")]
    SourceWrite(SourceError),
    /// A converter failed.
    #[error("conversion failed: {0}")]
    Conversion(ConvertError),
    /// A multi converter returned the wrong number of values.
    #[error("convert_back returned {actual} values for {expected} bindings")]
    ArityMismatch {
        /// Number of child bindings.
        expected: usize,
        /// Number of returned values.
        actual: usize,
    },
    /// A value did not have the target property's type.
    #[error("expected a value of type {expected}, found {found}")]
    TypeMismatch {
        /// Registered type name.
        expected: &'static str,
        /// Offered type name.
        found: &'static str,
    },
}

/// Error returned from binding operations to their immediate caller.
#[derive(Clone, Debug, Error)]
pub enum BindingError {
    /// A source write failed and the binding does not validate on exceptions.
    #[error("source write failed: {0}")]
    SourceWrite(SourceError),
    /// A converter failed and the binding does not validate on exceptions.
    #[error("conversion failed: {0}")]
    Conversion(ConvertError),
    /// The update exception filter itself failed.
    #[error("update exception filter failed: {0}")]
    Filter(SourceError),
    /// A multi converter returned the wrong number of values.
    #[error("convert_back returned {actual} values for {expected} bindings")]
    ArityMismatch {
        /// Number of child bindings.
        expected: usize,
        /// Number of returned values.
        actual: usize,
    },
    /// A value did not match the property's registered type.
    #[error("expected a value of type {expected}, found {found}")]
    TypeMismatch {
        /// Registered type name.
        expected: &'static str,
        /// Offered type name.
        found: &'static str,
    },
    /// A binding path did not parse.
    #[error(transparent)]
    Path(#[from] PathError),
    /// The element was removed from the tree.
    #[error("{0} is no longer alive")]
    StaleElement(ElementId),
}

impl From<BindingFault> for BindingError {
    fn from(fault: BindingFault) -> Self {
        match fault {
            BindingFault::SourceWrite(err) => Self::SourceWrite(err),
            BindingFault::Conversion(err) => Self::Conversion(err),
            BindingFault::ArityMismatch { expected, actual } => {
                Self::ArityMismatch { expected, actual }
            }
            BindingFault::TypeMismatch { expected, found } => Self::TypeMismatch { expected, found },
        }
    }
}

/// Error returned from tree shape edits.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TreeError {
    /// The element was removed from the tree.
    #[error("{0} is no longer alive")]
    StaleElement(ElementId),
    /// The child is an ancestor of (or is) the parent.
    #[error("attaching {child} under {parent} would create a cycle")]
    WouldCycle {
        /// Requested parent.
        parent: ElementId,
        /// Requested child.
        child: ElementId,
    },
}

/// A load-time contract violation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConstructionError {
    /// A data condition was declared without a binding.
    #[error("condition {index} has no binding")]
    MissingConditionBinding {
        /// Position of the condition.
        index: usize,
    },
    /// A property condition was declared without a property.
    #[error("condition {index} has no property")]
    MissingConditionProperty {
        /// Position of the condition.
        index: usize,
    },
    /// A condition was declared without a value.
    #[error("condition {index} has no value")]
    MissingConditionValue {
        /// Position of the condition.
        index: usize,
    },
    /// A multi trigger has no conditions.
    #[error("trigger has no conditions")]
    NoConditions,
    /// A static resource key did not resolve.
    #[error("resource `{key}` was not found")]
    ResourceNotFound {
        /// The key, formatted.
        key: String,
    },
    /// A property name did not resolve.
    #[error("unknown property `{name}`")]
    UnknownProperty {
        /// The name as written.
        name: String,
    },
    /// A value did not match the property's registered type.
    #[error("property `{property}` expects {expected}, found {found}")]
    TypeMismatch {
        /// Property name.
        property: &'static str,
        /// Registered type name.
        expected: &'static str,
        /// Offered type name.
        found: &'static str,
    },
    /// The element was removed from the tree.
    #[error("{0} is no longer alive")]
    StaleElement(ElementId),
    /// A style or template was applied to an element of another type.
    #[error("style targets `{expected}` but the element is a `{found}`")]
    TargetTypeMismatch {
        /// The style's target type.
        expected: &'static str,
        /// The element's type.
        found: &'static str,
    },
}

/// Position in a markup source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceLocation {
    /// File the declaration came from.
    pub file: Option<Rc<str>>,
    /// One-based line.
    pub line: u32,
    /// One-based column.
    pub column: u32,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{file}:{}:{}", self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// A [`ConstructionError`] with an optional markup location.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}{error}", location_prefix(.location.as_ref()))]
pub struct LoadError {
    /// What went wrong.
    #[source]
    pub error: ConstructionError,
    /// Where, when the loader knows.
    pub location: Option<SourceLocation>,
}

impl LoadError {
    /// Attaches a location.
    #[must_use]
    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }
}

fn location_prefix(location: Option<&SourceLocation>) -> String {
    location.map(|l| format!("{l}: ")).unwrap_or_default()
}

impl From<ConstructionError> for LoadError {
    fn from(error: ConstructionError) -> Self {
        Self {
            error,
            location: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faults_map_onto_caller_errors() {
        let err = BindingError::from(BindingFault::SourceWrite(SourceError::new("boom")));
        assert!(matches!(err, BindingError::SourceWrite(ref e) if e.message() == "boom"));
        assert_eq!(err.to_string(), "source write failed: boom");

        let err = BindingError::from(BindingFault::ArityMismatch {
            expected: 2,
            actual: 3,
        });
        assert_eq!(err.to_string(), "convert_back returned 3 values for 2 bindings");
    }

    #[test]
    fn load_error_prints_location() {
        let err = LoadError::from(ConstructionError::ResourceNotFound {
            key: String::from("Accent"),
        })
        .at(SourceLocation {
            file: Some(Rc::from("Window.xaml")),
            line: 12,
            column: 7,
        });
        assert_eq!(err.to_string(), "Window.xaml:12:7: resource `Accent` was not found");
    }
}

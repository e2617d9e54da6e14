// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resolved path steps.
//!
//! An [`Accessor`] is one step of a binding path bound to a concrete object:
//! an element property, a source member, or a source indexer entry. Reading
//! and writing through it is all the binding engine needs from either kind of
//! node.

use std::rc::Rc;

use trellis_property::{ErasedValue, PropertyId};

use crate::element::ElementId;
use crate::error::{BindingError, BindingFault, SourceError};
use crate::path::PathStep;
use crate::source::{IndexKey, Obj, as_object, is_null};
use crate::tree::ElementTree;

/// A value a path walk can stand on.
#[derive(Clone, Debug)]
pub(crate) enum Node {
    Element(ElementId),
    Object(Obj),
    /// A plain value; no further steps resolve on it.
    Value(ErasedValue),
}

impl Node {
    /// Classifies `value`; null is no node at all.
    pub(crate) fn from_value(value: &ErasedValue) -> Option<Self> {
        if is_null(value) {
            return None;
        }
        if let Some(object) = as_object(value) {
            return Some(Self::Object(object));
        }
        if let Some(element) = value.downcast_ref::<ElementId>() {
            return Some(Self::Element(*element));
        }
        Some(Self::Value(value.clone()))
    }

    pub(crate) fn into_value(self) -> ErasedValue {
        match self {
            Self::Element(element) => ErasedValue::new(element),
            Self::Object(object) => ErasedValue::new(object),
            Self::Value(value) => value,
        }
    }
}

/// One bound path step.
#[derive(Clone, Debug)]
pub(crate) enum Accessor {
    Element { element: ElementId, property: PropertyId },
    Member { object: Obj, member: Rc<str> },
    Index { object: Obj, key: IndexKey },
}

impl Accessor {
    /// Binds `step` to `node`, or `None` if the step does not apply.
    pub(crate) fn bind(tree: &ElementTree, node: &Node, step: &PathStep) -> Option<Self> {
        match (node, step) {
            (Node::Element(element), PathStep::Member(name)) => Some(Self::Element {
                element: *element,
                property: tree.registry().find(name)?,
            }),
            (Node::Element(element), PathStep::Attached { owner, member }) => Some(Self::Element {
                element: *element,
                property: tree.registry().lookup(owner, member)?,
            }),
            (Node::Object(object), PathStep::Member(member) | PathStep::Attached { member, .. }) => {
                Some(Self::Member {
                    object: object.clone(),
                    member: member.clone(),
                })
            }
            (Node::Object(object), PathStep::Index(key)) => Some(Self::Index {
                object: object.clone(),
                key: key.clone(),
            }),
            (Node::Element(_), PathStep::Index(_)) | (Node::Value(_), _) => None,
        }
    }

    /// Current value; `None` when the member does not exist.
    pub(crate) fn get(&self, tree: &ElementTree) -> Option<ErasedValue> {
        match self {
            Self::Element { element, property } => tree.get_value_erased(*element, *property),
            Self::Member { object, member } => object.get(member),
            Self::Index { object, key } => object.get_index(key),
        }
    }

    /// Writes `value`.
    pub(crate) fn set(&self, tree: &ElementTree, value: ErasedValue) -> Result<(), BindingFault> {
        match self {
            Self::Element { element, property } => tree
                .set_current_value_erased(*element, *property, value)
                .map(drop)
                .map_err(|error| match error {
                    BindingError::TypeMismatch { expected, found } => {
                        BindingFault::TypeMismatch { expected, found }
                    }
                    other => BindingFault::SourceWrite(SourceError::new(other.to_string())),
                }),
            Self::Member { object, member } => object.set(member, value).map_err(BindingFault::SourceWrite),
            Self::Index { object, key } => object.set_index(key, value).map_err(BindingFault::SourceWrite),
        }
    }

    /// Source object and member name used for data error queries.
    pub(crate) fn error_member(&self) -> Option<(&Obj, &str)> {
        match self {
            Self::Member { object, member } => Some((object, member)),
            Self::Index { object, .. } => Some((object, crate::source::INDEXER_MEMBER)),
            Self::Element { .. } => None,
        }
    }
}

/// Prior leaf values captured during a grouped or multi-source update.
///
/// Rolling back writes the captured values in reverse order. Rollback is best
/// effort: a failing restore is logged and the rest still run.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    entries: Vec<(Accessor, Option<ErasedValue>)>,
}

impl Journal {
    pub(crate) fn record(&mut self, accessor: Accessor, prior: Option<ErasedValue>) {
        self.entries.push((accessor, prior));
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Restores every entry after the first `keep`.
    pub(crate) fn rollback_to(&mut self, tree: &ElementTree, keep: usize) {
        while self.entries.len() > keep {
            let Some((accessor, prior)) = self.entries.pop() else {
                break;
            };
            // A member that did not exist before has nothing to restore.
            let Some(prior) = prior else { continue };
            if let Err(fault) = accessor.set(tree, prior) {
                tracing::warn!(%fault, "rollback write failed");
            }
        }
    }

    pub(crate) fn rollback(mut self, tree: &ElementTree) {
        self.rollback_to(tree, 0);
    }
}

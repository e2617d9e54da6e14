// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Binding groups: transactional scopes for target to source updates.
//!
//! A group is attached to an element. A pulling binding joins the nearest
//! group on its target or the target's ancestors whose name matches its
//! `binding_group_name` (any group when the binding names none). Members never
//! pull on their own trigger; [`ElementTree::commit_edit`] pulls them all, in
//! registration order, and undoes every write of the call when one fails.
//! Membership is re-selected whenever the tree changes shape.

use std::fmt;
use std::rc::Rc;

use crate::accessor::Journal;
use crate::binding::BindingId;
use crate::element::ElementId;
use crate::error::BindingError;
use crate::expression::{Expression, Sink};
use crate::tree::{ElementTree, TreeState};
use crate::update::PullOutcome;

/// Description of a binding group to attach with
/// [`ElementTree::set_binding_group`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindingGroup {
    name: Option<Rc<str>>,
}

impl BindingGroup {
    /// An unnamed group, joined only by bindings that name no group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A group joined by bindings naming `name`, and by unnamed bindings.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(Rc::from(name)),
        }
    }

    /// The group name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

/// Identity of an attached binding group.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingGroupId(pub(crate) u64);

impl fmt::Display for BindingGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding group #{}", self.0)
    }
}

pub(crate) struct GroupState {
    pub(crate) owner: ElementId,
    pub(crate) name: Option<Rc<str>>,
    /// Member expressions in registration order.
    pub(crate) members: Vec<u64>,
}

impl GroupState {
    fn accepts(&self, wanted: Option<&str>) -> bool {
        match wanted {
            Some(name) => self.name.as_deref() == Some(name),
            None => true,
        }
    }
}

impl ElementTree {
    /// Attaches `group` to `element`, replacing the group it had.
    ///
    /// # Panics
    ///
    /// Panics if `element` is not alive.
    pub fn set_binding_group(&self, element: ElementId, group: BindingGroup) -> BindingGroupId {
        let id = {
            let mut state = self.state_mut();
            let id = state.next_serial();
            let data = state
                .element_mut(element)
                .unwrap_or_else(|| panic!("{element} is no longer alive"));
            let replaced = data.group.replace(id);
            if let Some(old) = replaced {
                state.drop_group(old);
            }
            state.groups.insert(
                id,
                GroupState {
                    owner: element,
                    name: group.name,
                    members: Vec::new(),
                },
            );
            id
        };
        tracing::debug!(element = %element, group = id, "binding group attached");
        self.reselect_groups(element);
        BindingGroupId(id)
    }

    /// Detaches the binding group of `element`. Its members go back to
    /// pulling on their own trigger unless another group picks them up.
    pub fn clear_binding_group(&self, element: ElementId) -> bool {
        {
            let mut state = self.state_mut();
            let Some(old) = state.element_mut(element).and_then(|data| data.group.take()) else {
                return false;
            };
            state.drop_group(old);
        }
        self.reselect_groups(element);
        true
    }

    /// The group attached to `element`.
    #[must_use]
    pub fn binding_group(&self, element: ElementId) -> Option<BindingGroupId> {
        self.state()
            .element(element)
            .and_then(|data| data.group)
            .map(BindingGroupId)
    }

    /// Members of `group` in registration order.
    #[must_use]
    pub fn group_members(&self, group: BindingGroupId) -> Vec<BindingId> {
        self.state()
            .groups
            .get(&group.0)
            .map(|g| g.members.iter().copied().map(BindingId).collect())
            .unwrap_or_default()
    }

    /// Pulls every member of `group` as one transaction.
    ///
    /// Returns `Ok(true)` when every member updated its source. On the first
    /// failure every write made by this call is undone, newest first, by
    /// writing the captured prior value back into the same leaf. A validation
    /// failure, or a fault the binding validates, then yields `Ok(false)`; a
    /// fault the binding does not validate is returned as `Err` after the
    /// rollback.
    pub fn commit_edit(&self, group: BindingGroupId) -> Result<bool, BindingError> {
        let Some(members) = self.state().groups.get(&group.0).map(|g| g.members.clone()) else {
            return Ok(false);
        };
        tracing::debug!(%group, members = members.len(), "committing binding group");
        let started: Vec<u64> = members.into_iter().filter(|tag| self.begin_update(*tag)).collect();

        let mut journal = Journal::default();
        let mut failure = None;
        for tag in &started {
            match self.pull(*tag, &mut journal) {
                PullOutcome::Ok | PullOutcome::Skipped => {}
                PullOutcome::ValidationFailed => {
                    failure = Some(None);
                    break;
                }
                PullOutcome::Faulted(error) => {
                    failure = Some(Some(error));
                    break;
                }
            }
        }
        if failure.is_some() {
            tracing::debug!(%group, writes = journal.len(), "rolling back binding group");
            journal.rollback(self);
        }
        for tag in &started {
            self.finish_update(*tag, failure.is_none());
        }
        match failure {
            None => Ok(true),
            Some(None) => Ok(false),
            Some(Some(error)) => Err(error),
        }
    }

    /// Discards pending edits: every member re-reads its source and drops the
    /// errors its last update reported.
    pub fn cancel_edit(&self, group: BindingGroupId) {
        let members = self.group_members(group);
        tracing::debug!(%group, members = members.len(), "cancelling binding group edit");
        for member in members {
            if let Err(error) = self.update_target(member) {
                tracing::warn!(binding = %member, %error, "restoring target failed");
            }
        }
    }

    /// Picks the group expression `tag` belongs to.
    pub(crate) fn select_group(&self, tag: u64) {
        let mut state = self.state_mut();
        let Some(expression) = state.expressions.get(&tag) else {
            return;
        };
        let Sink::Slot { element, .. } = expression.sink else {
            return;
        };
        let Some(binding) = expression.binding() else {
            return;
        };
        let current = binding.group;
        let selected = if binding.mode.updates_source() {
            let wanted = binding.base.common().binding_group_name.clone();
            std::iter::once(element)
                .chain(state.elements.ancestors(element))
                .find_map(|id| {
                    let group = state.element(id)?.group?;
                    state
                        .groups
                        .get(&group)?
                        .accepts(wanted.as_deref())
                        .then_some(group)
                })
        } else {
            None
        };
        if selected == current {
            return;
        }
        if let Some(old) = current
            && let Some(group) = state.groups.get_mut(&old)
        {
            group.members.retain(|member| *member != tag);
        }
        if let Some(new) = selected
            && let Some(group) = state.groups.get_mut(&new)
        {
            group.members.push(tag);
        }
        if let Some(binding) = state.expressions.get_mut(&tag).and_then(Expression::binding_mut) {
            binding.group = selected;
        }
        tracing::trace!(binding = tag, group = ?selected, "binding group selected");
    }

    /// Re-selects the group of every binding at or below `scope`, oldest first.
    pub(crate) fn reselect_groups(&self, scope: ElementId) {
        let mut tags: Vec<u64> = {
            let state = self.state();
            state
                .elements
                .subtree(scope)
                .into_iter()
                .filter_map(|id| state.element(id))
                .flat_map(|data| data.expressions.iter().copied())
                .filter(|tag| state.expressions.get(tag).is_some_and(|e| e.binding().is_some()))
                .collect()
        };
        tags.sort_unstable();
        for tag in tags {
            self.select_group(tag);
        }
    }
}

impl TreeState {
    /// Removes group `key` and clears it from its members.
    pub(crate) fn drop_group(&mut self, key: u64) {
        let Some(group) = self.groups.remove(&key) else {
            return;
        };
        for member in group.members {
            if let Some(expression) = self.expressions.get_mut(&member) {
                expression.forget_group(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use trellis_property::{ErasedValue, Property, PropertyMetadataBuilder, PropertyRegistry};

    use super::*;
    use crate::binding::{Binding, BindingMode};
    use crate::error::SourceError;
    use crate::source::{BindingSource, Obj};

    #[derive(Default)]
    struct Form {
        first: RefCell<String>,
        last: RefCell<String>,
    }

    impl BindingSource for Form {
        fn get(&self, member: &str) -> Option<ErasedValue> {
            match member {
                "First" => Some(ErasedValue::new(self.first.borrow().clone())),
                "Last" => Some(ErasedValue::new(self.last.borrow().clone())),
                _ => None,
            }
        }

        fn set(&self, member: &str, value: ErasedValue) -> Result<(), SourceError> {
            let text = value
                .get::<String>()
                .ok_or_else(|| SourceError::wrong_type(member, "String"))?;
            match member {
                "First" => *self.first.borrow_mut() = text,
                "Last" if text == "!" => return Err(SourceError::new("bad last name")),
                "Last" => *self.last.borrow_mut() = text,
                _ => return Err(SourceError::read_only(member)),
            }
            Ok(())
        }
    }

    fn setup() -> (ElementTree, Property<String>) {
        let mut registry = PropertyRegistry::new();
        let text = registry.register(
            "TextBox",
            "Text",
            PropertyMetadataBuilder::new(String::new())
                .binds_two_way_by_default(true)
                .build(),
        );
        (ElementTree::new(registry), text)
    }

    #[test]
    fn members_only_pull_on_commit() {
        let (tree, text) = setup();
        let form = Rc::new(Form::default());
        let panel = tree.create_element("Panel");
        let first = tree.create_element("TextBox");
        tree.add_child(panel, first).unwrap();
        let group = tree.set_binding_group(panel, BindingGroup::new());
        tree.set_binding(first, text, Binding::new("First").source(Obj::from_rc(form.clone())))
            .unwrap();
        assert_eq!(tree.group_members(group).len(), 1);

        tree.set_current_value(first, text, String::from("Ada")).unwrap();
        assert_eq!(*form.first.borrow(), "");
        assert!(!tree.update_source(first, text).unwrap());
        assert!(tree.commit_edit(group).unwrap());
        assert_eq!(*form.first.borrow(), "Ada");
    }

    #[test]
    fn one_way_bindings_do_not_join() {
        let (tree, text) = setup();
        let panel = tree.create_element("Panel");
        let group = tree.set_binding_group(panel, BindingGroup::new());
        tree.set_binding(
            panel,
            text,
            Binding::new("First")
                .source(Obj::new(Form::default()))
                .mode(BindingMode::OneWay),
        )
        .unwrap();
        assert!(tree.group_members(group).is_empty());
    }

    #[test]
    fn failing_member_rolls_back_earlier_writes() {
        let (tree, text) = setup();
        let form = Rc::new(Form::default());
        *form.first.borrow_mut() = String::from("old");
        let panel = tree.create_element("Panel");
        let first = tree.create_element("TextBox");
        let last = tree.create_element("TextBox");
        tree.add_child(panel, first).unwrap();
        tree.add_child(panel, last).unwrap();
        let group = tree.set_binding_group(panel, BindingGroup::new());
        let source = Obj::from_rc(form.clone());
        tree.set_binding(first, text, Binding::new("First").source(source.clone()))
            .unwrap();
        tree.set_binding(
            last,
            text,
            Binding::new("Last").source(source).validates_on_exceptions(true),
        )
        .unwrap();

        tree.set_current_value(first, text, String::from("new")).unwrap();
        tree.set_current_value(last, text, String::from("!")).unwrap();
        assert!(!tree.commit_edit(group).unwrap());
        assert_eq!(*form.first.borrow(), "old");
        assert!(tree.has_error(last));
        // Targets keep the edits for the user to fix.
        assert_eq!(tree.get_value(first, text), "new");

        tree.cancel_edit(group);
        assert_eq!(tree.get_value(first, text), "old");
        assert_eq!(tree.get_value(last, text), "");
        assert!(!tree.has_error(last));
    }

    #[test]
    fn replacing_a_group_releases_members() {
        let (tree, text) = setup();
        let form = Rc::new(Form::default());
        let panel = tree.create_element("Panel");
        let old = tree.set_binding_group(panel, BindingGroup::named("Edit"));
        tree.set_binding(
            panel,
            text,
            Binding::new("First")
                .source(Obj::from_rc(form.clone()))
                .binding_group_name("Edit"),
        )
        .unwrap();
        assert_eq!(tree.group_members(old).len(), 1);

        let new = tree.set_binding_group(panel, BindingGroup::named("Other"));
        assert!(tree.group_members(old).is_empty());
        assert!(tree.group_members(new).is_empty());
        tree.set_current_value(panel, text, String::from("free")).unwrap();
        assert_eq!(*form.first.borrow(), "free");
    }
}

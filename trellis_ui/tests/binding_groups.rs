// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tests for binding group transactions.
//!
//! A group collects the two-way bindings below its element and writes them
//! in one `commit_edit`: either every source takes its value or none keeps
//! one.

use std::cell::RefCell;
use std::rc::Rc;

use trellis_property::{ErasedValue, Property, PropertyMetadataBuilder, PropertyRegistry};
use trellis_ui::{
    Binding, BindingError, BindingGroup, BindingSource, ElementTree, Notifier, Obj, SourceError,
};

/// A text record. `Street` refuses empty values.
#[derive(Default)]
struct Address {
    city: RefCell<String>,
    street: RefCell<String>,
    writes: RefCell<Vec<String>>,
    changed: Notifier<str>,
}

impl BindingSource for Address {
    fn get(&self, member: &str) -> Option<ErasedValue> {
        match member {
            "City" => Some(ErasedValue::new(self.city.borrow().clone())),
            "Street" => Some(ErasedValue::new(self.street.borrow().clone())),
            _ => None,
        }
    }

    fn set(&self, member: &str, value: ErasedValue) -> Result<(), SourceError> {
        let text = value
            .get::<String>()
            .ok_or_else(|| SourceError::wrong_type(member, "String"))?;
        match member {
            "City" => *self.city.borrow_mut() = text.clone(),
            "Street" if text.is_empty() => return Err(SourceError::new("street is required")),
            "Street" => *self.street.borrow_mut() = text.clone(),
            _ => return Err(SourceError::read_only(member)),
        }
        self.writes.borrow_mut().push(format!("{member}={text}"));
        self.changed.notify(member);
        Ok(())
    }

    fn property_changed(&self) -> Option<&Notifier<str>> {
        Some(&self.changed)
    }
}

/// Holds an `Address`.
struct Customer {
    address: Obj,
}

impl BindingSource for Customer {
    fn get(&self, member: &str) -> Option<ErasedValue> {
        (member == "Address").then(|| ErasedValue::new(self.address.clone()))
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

fn address(city: &str, street: &str) -> Rc<Address> {
    let address = Address::default();
    *address.city.borrow_mut() = city.to_owned();
    *address.street.borrow_mut() = street.to_owned();
    Rc::new(address)
}

#[test]
fn unvalidated_failure_rolls_back_nested_writes_and_propagates() {
    let (tree, text) = setup();
    let home = address("Paris", "Rue Oberkampf");
    let customer = Obj::new(Customer {
        address: Obj::from_rc(home.clone()),
    });

    let form = tree.create_element("Form");
    let city = tree.create_element("TextBox");
    let street = tree.create_element("TextBox");
    tree.add_child(form, city).unwrap();
    tree.add_child(form, street).unwrap();
    tree.set_data_context(form, Some(customer));
    let group = tree.set_binding_group(form, BindingGroup::new());
    tree.set_binding(city, text, Binding::new("Address.City")).unwrap();
    tree.set_binding(street, text, Binding::new("Address.Street")).unwrap();
    assert_eq!(tree.group_members(group).len(), 2);
    assert_eq!(tree.get_value(city, text), "Paris");

    tree.set_current_value(city, text, String::from("Lyon")).unwrap();
    tree.set_current_value(street, text, String::new()).unwrap();
    assert!(home.writes.borrow().is_empty());

    let err = tree.commit_edit(group).unwrap_err();
    assert!(matches!(err, BindingError::SourceWrite(ref e) if e.message() == "street is required"));
    assert_eq!(*home.city.borrow(), "Paris");
    assert_eq!(*home.writes.borrow(), ["City=Lyon", "City=Paris"]);
    // An unvalidated fault is not recorded as an error.
    assert!(!tree.has_error(street));

    tree.set_current_value(street, text, String::from("Rue Mouffetard"))
        .unwrap();
    assert!(tree.commit_edit(group).unwrap());
    assert_eq!(*home.city.borrow(), "Lyon");
    assert_eq!(*home.street.borrow(), "Rue Mouffetard");
}

#[test]
fn validated_failure_returns_false_and_keeps_the_error() {
    let (tree, text) = setup();
    let home = address("Paris", "Rue Oberkampf");
    let source = Obj::from_rc(home.clone());

    let form = tree.create_element("Form");
    let city = tree.create_element("TextBox");
    let street = tree.create_element("TextBox");
    tree.add_child(form, city).unwrap();
    tree.add_child(form, street).unwrap();
    let group = tree.set_binding_group(form, BindingGroup::new());
    tree.set_binding(city, text, Binding::new("City").source(source.clone()))
        .unwrap();
    let street_binding = tree
        .set_binding(
            street,
            text,
            Binding::new("Street").source(source).validates_on_exceptions(true),
        )
        .unwrap();

    tree.set_current_value(city, text, String::from("Lyon")).unwrap();
    tree.set_current_value(street, text, String::new()).unwrap();
    assert!(!tree.commit_edit(group).unwrap());
    assert_eq!(*home.city.borrow(), "Paris");

    let errors = tree.errors(street);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].origin, street_binding);
    assert!(errors[0].fault.is_some());
}

#[test]
fn named_bindings_skip_nearer_groups() {
    let (tree, text) = setup();
    let home = address("Paris", "Rue Oberkampf");
    let source = Obj::from_rc(home.clone());

    let window = tree.create_element("Window");
    let panel = tree.create_element("Panel");
    let city = tree.create_element("TextBox");
    let street = tree.create_element("TextBox");
    tree.add_child(window, panel).unwrap();
    tree.add_child(panel, city).unwrap();
    tree.add_child(panel, street).unwrap();
    let outer = tree.set_binding_group(window, BindingGroup::named("Outer"));
    let inner = tree.set_binding_group(panel, BindingGroup::named("Inner"));

    let city_binding = tree
        .set_binding(
            city,
            text,
            Binding::new("City").source(source.clone()).binding_group_name("Outer"),
        )
        .unwrap();
    let street_binding = tree
        .set_binding(street, text, Binding::new("Street").source(source))
        .unwrap();
    assert_eq!(tree.group_members(outer), [city_binding]);
    assert_eq!(tree.group_members(inner), [street_binding]);

    tree.set_current_value(city, text, String::from("Lyon")).unwrap();
    tree.set_current_value(street, text, String::from("Rue Mouffetard"))
        .unwrap();
    assert!(tree.commit_edit(inner).unwrap());
    assert_eq!(*home.street.borrow(), "Rue Mouffetard");
    assert_eq!(*home.city.borrow(), "Paris");

    assert!(tree.commit_edit(outer).unwrap());
    assert_eq!(*home.city.borrow(), "Lyon");
}

#[test]
fn removing_the_inner_group_hands_members_outward() {
    let (tree, text) = setup();
    let home = address("Paris", "Rue Oberkampf");

    let window = tree.create_element("Window");
    let panel = tree.create_element("Panel");
    let street = tree.create_element("TextBox");
    tree.add_child(window, panel).unwrap();
    tree.add_child(panel, street).unwrap();
    let outer = tree.set_binding_group(window, BindingGroup::new());
    let inner = tree.set_binding_group(panel, BindingGroup::new());
    let binding = tree
        .set_binding(street, text, Binding::new("Street").source(Obj::from_rc(home)))
        .unwrap();
    assert_eq!(tree.group_members(inner), [binding]);

    assert!(tree.clear_binding_group(panel));
    assert!(tree.group_members(inner).is_empty());
    assert_eq!(tree.group_members(outer), [binding]);

    // Detaching the subtree leaves the binding ungrouped.
    assert!(tree.detach(panel));
    assert!(tree.group_members(outer).is_empty());
}

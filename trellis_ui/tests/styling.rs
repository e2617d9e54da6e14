// Copyright 2025 the Trellis Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tests for styles, triggers, resources and animation working together.
//!
//! Each test builds a small tree, applies styles through the public
//! surface, and checks both the effective value and the layer that
//! produced it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use trellis_property::{
    ErasedValue, Layer, Property, PropertyMetadata, PropertyRegistry, ValueSource,
};
use trellis_ui::{
    Binding, BindingSource, CallbackAction, ConstructionError, DataTrigger, ElementTree,
    Notifier, Obj, PropertyChange, ResourceKey, SetValueAction, Storyboard, StyleBuilder, Trigger,
    ValueAnimation,
};

struct Props {
    pressed: Property<bool>,
    scale: Property<f64>,
    brush: Property<String>,
}

fn setup() -> (ElementTree, Props) {
    let mut registry = PropertyRegistry::new();
    let props = Props {
        pressed: registry.register("Button", "IsPressed", PropertyMetadata::new(false)),
        scale: registry.register("Control", "Scale", PropertyMetadata::new(1.0_f64)),
        brush: registry.register("Control", "Background", PropertyMetadata::new(String::from("none"))),
    };
    (ElementTree::new(registry), props)
}

#[test]
fn static_setter_resolves_through_the_ambient_parent() {
    let (tree, p) = setup();
    let panel = tree.create_element("Panel");
    tree.add_resource(panel, "Accent", String::from("teal"));

    // Not attached anywhere: only the ambient parent provides the resource.
    let button = tree.create_element_in("Button", panel);
    assert_eq!(tree.parent(button), None);
    let style = StyleBuilder::new().set_static_resource(p.brush, "Accent").build();
    tree.set_style(button, Some(style)).unwrap();
    assert_eq!(tree.get_value(button, p.brush), "teal");
    assert_eq!(tree.value_source(button, p.brush), ValueSource::Style);

    // Resolved once: later dictionary edits do not reach a static setter.
    tree.add_resource(panel, "Accent", String::from("plum"));
    assert_eq!(tree.get_value(button, p.brush), "teal");

    let built = StyleBuilder::new()
        .set_static_resource(p.brush, "Accent")
        .build_in(&tree, panel)
        .unwrap();
    assert_eq!(built.get(p.brush).as_deref(), Some("plum"));
    let orphan = tree.create_element("Button");
    tree.set_style(orphan, Some(built)).unwrap();
    assert_eq!(tree.get_value(orphan, p.brush), "plum");

    let missing = StyleBuilder::new()
        .set_static_resource(p.brush, "Missing")
        .build_in(&tree, orphan)
        .unwrap_err();
    assert_eq!(
        missing.error,
        ConstructionError::ResourceNotFound {
            key: String::from("Missing")
        }
    );
}

#[test]
fn enter_action_flipping_its_own_condition_settles_once() {
    let (tree, p) = setup();
    let seen_enters = Rc::new(Cell::new(0));
    let seen_exits = Rc::new(Cell::new(0));
    let (enters, exits) = (seen_enters.clone(), seen_exits.clone());
    let style = StyleBuilder::new()
        .set(p.scale, 1.0)
        .trigger(
            Trigger::new(p.pressed, true)
                .setter(p.scale, 0.9)
                .enter_action(CallbackAction::new(move |_: &ElementTree, _| {
                    enters.set(enters.get() + 1);
                }))
                .enter_action(SetValueAction::new(p.pressed, false))
                .exit_action(CallbackAction::new(move |_: &ElementTree, _| {
                    exits.set(exits.get() + 1);
                })),
        )
        .build();
    let button = tree.create_element("Button");
    tree.set_style(button, Some(style)).unwrap();

    tree.set_value(button, p.pressed, true);
    assert_eq!(seen_enters.get(), 1);
    assert_eq!(seen_exits.get(), 1);
    assert!(!tree.get_value(button, p.pressed));
    assert_eq!(tree.get_value(button, p.scale), 1.0);
    assert_eq!(tree.value_source(button, p.scale), ValueSource::Style);
    assert!(!tree.has_active_triggers(button));
}

#[test]
fn animation_does_not_leak_local_edits() {
    let (tree, p) = setup();
    let button = tree.create_element("Button");
    tree.set_value(button, p.scale, 1.5);

    let changes = Rc::new(RefCell::new(Vec::new()));
    let log = changes.clone();
    let scale = p.scale.id();
    let _subscription = tree.subscribe(move |change: &PropertyChange| {
        if change.property == scale {
            log.borrow_mut().push(change.source);
        }
    });

    let grow: Rc<dyn Storyboard> = Rc::new(ValueAnimation::new(p.scale, 5.0));
    tree.begin_storyboard(button, "grow", grow);
    assert_eq!(tree.get_value(button, p.scale), 5.0);

    // Hidden underneath the animation: no effective change.
    tree.set_value(button, p.scale, 4.0);
    assert_eq!(tree.get_value(button, p.scale), 5.0);
    assert_eq!(tree.layer_value(button, p.scale, Layer::Local), Some(ErasedValue::new(4.0_f64)));

    assert!(tree.stop_storyboard(button, "grow"));
    assert_eq!(tree.get_value(button, p.scale), 1.5);
    assert_eq!(tree.value_source(button, p.scale), ValueSource::Local);
    assert_eq!(*changes.borrow(), [ValueSource::Animation, ValueSource::Local]);
}

#[test]
fn animating_a_styled_value_drops_local_edits_made_underneath() {
    let (tree, p) = setup();
    let button = tree.create_element("Button");
    tree.set_style(button, Some(StyleBuilder::new().set(p.scale, 2.0).build()))
        .unwrap();

    tree.begin_storyboard(button, "grow", Rc::new(ValueAnimation::new(p.scale, 5.0)));
    tree.set_value(button, p.scale, 4.0);
    assert_eq!(tree.get_value(button, p.scale), 5.0);

    assert!(tree.stop_storyboard(button, "grow"));
    assert_eq!(tree.get_value(button, p.scale), 2.0);
    assert_eq!(tree.value_source(button, p.scale), ValueSource::Style);
    assert_eq!(tree.layer_value(button, p.scale, Layer::Local), None);
}

#[test]
fn animation_over_managed_layers_reveals_their_live_state() {
    let (tree, p) = setup();
    let style = StyleBuilder::new()
        .set(p.scale, 2.0)
        .trigger(Trigger::new(p.pressed, true).setter(p.scale, 3.0))
        .build();
    let button = tree.create_element("Button");
    tree.set_style(button, Some(style)).unwrap();

    tree.begin_storyboard(button, "pulse", Rc::new(ValueAnimation::new(p.scale, 9.0)));
    tree.set_value(button, p.pressed, true);
    assert_eq!(tree.get_value(button, p.scale), 9.0);

    // Restarting under the same name replaces the running storyboard.
    tree.begin_storyboard(button, "pulse", Rc::new(ValueAnimation::new(p.scale, 8.0)));
    assert_eq!(tree.get_value(button, p.scale), 8.0);

    assert!(tree.stop_storyboard(button, "pulse"));
    assert_eq!(tree.get_value(button, p.scale), 3.0);
    assert_eq!(tree.value_source(button, p.scale), ValueSource::StyleTrigger);

    tree.set_value(button, p.pressed, false);
    assert_eq!(tree.get_value(button, p.scale), 2.0);
    assert_eq!(tree.value_source(button, p.scale), ValueSource::Style);
}

#[test]
fn implicit_style_with_dynamic_setter_follows_tree_and_dictionary() {
    let (tree, p) = setup();
    tree.add_app_resource("Accent", String::from("gray"));
    let window = tree.create_element("Window");
    let dialog = tree.create_element("Window");
    let implicit = StyleBuilder::new()
        .target_type("Button")
        .set_dynamic_resource(p.brush, "Accent")
        .build();
    tree.add_resource(window, ResourceKey::of_type("Button"), implicit);

    let button = tree.create_element("Button");
    let label = tree.create_element("TextBlock");
    tree.add_child(window, button).unwrap();
    tree.add_child(window, label).unwrap();
    assert_eq!(tree.get_value(button, p.brush), "gray");
    assert_eq!(tree.value_source(button, p.brush), ValueSource::Style);
    assert!(tree.style(label).is_none());

    tree.add_resource(window, "Accent", String::from("blue"));
    assert_eq!(tree.get_value(button, p.brush), "blue");
    tree.add_app_resource("Accent", String::from("black"));
    assert_eq!(tree.get_value(button, p.brush), "blue");

    tree.add_child(dialog, button).unwrap();
    assert!(tree.style(button).is_none());
    assert_eq!(tree.value_source(button, p.brush), ValueSource::Default);

    tree.add_child(window, button).unwrap();
    assert_eq!(tree.get_value(button, p.brush), "blue");
    assert!(tree.remove_resource(window, &ResourceKey::from("Accent")));
    assert_eq!(tree.get_value(button, p.brush), "black");

    // A literal Local value overrides the style without disturbing it.
    tree.set_value(button, p.brush, String::from("white"));
    assert_eq!(tree.layer_value(button, p.brush, Layer::Style), Some(ErasedValue::new(String::from("black"))));
}

/// Reports a status text.
#[derive(Default)]
struct Job {
    status: RefCell<String>,
    changed: Notifier<str>,
}

impl Job {
    fn report(&self, status: &str) {
        *self.status.borrow_mut() = status.to_owned();
        self.changed.notify("Status");
    }
}

impl BindingSource for Job {
    fn get(&self, member: &str) -> Option<ErasedValue> {
        (member == "Status").then(|| ErasedValue::new(self.status.borrow().clone()))
    }

    fn property_changed(&self) -> Option<&Notifier<str>> {
        Some(&self.changed)
    }
}

#[test]
fn data_trigger_reads_the_inherited_data_context() {
    let (tree, p) = setup();
    let job = Rc::new(Job::default());
    let window = tree.create_element("Window");
    let badge = tree.create_element("Control");
    tree.add_child(window, badge).unwrap();
    tree.set_data_context(window, Some(Obj::from_rc(job.clone())));

    let style = StyleBuilder::new()
        .trigger(DataTrigger::new(Binding::new("Status"), String::from("failed")).setter(p.brush, String::from("red")))
        .build();
    tree.set_style(badge, Some(style)).unwrap();
    assert_eq!(tree.get_value(badge, p.brush), "none");

    job.report("failed");
    assert_eq!(tree.get_value(badge, p.brush), "red");
    assert_eq!(tree.value_source(badge, p.brush), ValueSource::StyleTrigger);

    // A different context turns the condition off.
    tree.set_data_context(window, Some(Obj::new(Job::default())));
    assert_eq!(tree.get_value(badge, p.brush), "none");

    // The old source is no longer observed.
    job.report("failed again");
    job.report("failed");
    assert_eq!(tree.get_value(badge, p.brush), "none");
}

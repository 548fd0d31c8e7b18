//! End-to-end scenarios for view models over live store nodes

use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;

use formkit_common::CatalogTranslator;
use formkit_fields::{Domain, EntityDef, EntityRegistry, FieldType, Rule, ValidationEngine};
use formkit_store::{validate_node, NodeChange, StoreNode, ViewModel};

fn registry() -> Arc<EntityRegistry> {
    let name = Domain::new("person-name")
        .required()
        .rules([Rule::MinLength {
            min: 2,
            message: Some("validation.too-short".into()),
        }])
        .expect("valid rules");
    let registry = EntityRegistry::builder()
        .domain(name)
        .entity_yaml(
            r#"
name: person
entries:
  - kind: field
    name: name
    domain: person-name
  - kind: field
    name: age
    type: number
  - kind: field
    name: count
    type: number
  - kind: list
    name: tags
    entity: tag
"#,
        )
        .expect("person yaml")
        .entity_yaml(
            r#"
name: tag
identity: code
entries:
  - kind: field
    name: code
  - kind: field
    name: label
"#,
        )
        .expect("tag yaml")
        .build()
        .expect("registry");
    Arc::new(registry)
}

fn engine() -> ValidationEngine {
    ValidationEngine::new(Arc::new(
        CatalogTranslator::new()
            .with("validation.too-short", "too short")
            .with("validation.required", "{field} is required")
            .with("person.name", "Name"),
    ))
}

#[test]
fn test_required_and_optional_fields() {
    let node = StoreNode::build(&registry(), "person").expect("node");
    node.set(&json!({"name": "Ann"})).expect("set");
    assert!(validate_node(&node, &engine()).is_valid());

    node.set(&json!({"name": "A"})).expect("set");
    let errors = validate_node(&node, &engine());
    assert_eq!(errors.fields.len(), 1);
    assert_eq!(errors.field("name"), Some("too short"));

    node.set(&json!({"name": null})).expect("set");
    let errors = validate_node(&node, &engine());
    assert_eq!(errors.field("name"), Some("Name is required"));
}

#[test]
fn test_edit_wins_then_reset_takes_upstream() {
    let source = StoreNode::build(&registry(), "person").expect("node");
    source.set(&json!({"count": 1})).expect("set");

    let vm = ViewModel::new(&source).expect("view model");
    vm.subscribe();
    vm.set_field("count", json!(5)).expect("edit");
    assert!(vm.is_dirty());

    source.set(&json!({"count": 2})).expect("upstream write");
    assert_eq!(vm.field("count").expect("declared"), Some(json!(5)));

    vm.reset().expect("reset");
    assert_eq!(vm.field("count").expect("declared"), Some(json!(2)));
    assert!(!vm.is_dirty());
}

#[test_log::test]
fn test_reordered_tags_keep_edits_by_identity() {
    let source = StoreNode::build(&registry(), "person").expect("node");
    source
        .set(&json!({"tags": [{"code": "a", "label": "A"}, {"code": "b", "label": "B"}]}))
        .expect("set");
    let vm = ViewModel::new(&source).expect("view model");
    vm.subscribe();

    let first = vm.list("tags")[0].clone();
    first.set_field("label", json!("edited")).expect("edit");

    source
        .set(&json!({"tags": [{"code": "b", "label": "B2"}, {"code": "a", "label": "A2"}]}))
        .expect("reorder");

    let tags = vm.list("tags");
    assert_eq!(tags.len(), 2);
    assert!(tags[1].ptr_eq(&first));
    assert_eq!(
        vm.to_value()["tags"],
        json!([{"code": "b", "label": "B2"}, {"code": "a", "label": "edited"}])
    );
}

#[test]
fn test_shadow_notifies_renderers() {
    let source = StoreNode::build(&registry(), "person").expect("node");
    let vm = ViewModel::new(&source).expect("view model");
    let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = seen.clone();
    let _subscription = vm.shadow().subscribe(move |change| sink.borrow_mut().push(change.clone()));

    vm.set_input("age", "41").expect("typed input");
    assert_eq!(
        seen.borrow().as_slice(),
        &[NodeChange::Field {
            name: "age".into(),
            value: Some(json!(41)),
        }]
    );
}

proptest! {
    /// Property: reset restores the source's current values regardless of prior edits
    #[test]
    fn prop_reset_restores_baseline(
        edits in prop::collection::vec((0usize..3, any::<i32>()), 0..12),
        upstream in any::<i32>(),
    ) {
        let fields = ["name", "age", "count"];
        let source = StoreNode::build(&registry(), "person").expect("node");
        source.set(&json!({"name": "Ann", "age": 30})).expect("set");
        let vm = ViewModel::new(&source).expect("view model");
        vm.subscribe();

        for (field, value) in edits {
            vm.set_field(fields[field], json!(value)).expect("edit");
        }
        source.set(&json!({"count": upstream})).expect("upstream write");

        vm.reset().expect("reset");
        prop_assert_eq!(vm.to_value(), source.to_value());
        prop_assert!(!vm.is_dirty());
    }

    /// Property: a subscribed clean field tracks upstream writes
    #[test]
    fn prop_clean_fields_follow_source(values in prop::collection::vec(any::<i32>(), 1..8)) {
        let source = StoreNode::build(&registry(), "person").expect("node");
        let vm = ViewModel::new(&source).expect("view model");
        vm.subscribe();
        for value in values {
            source.set_field("count", json!(value)).expect("upstream write");
            prop_assert_eq!(vm.field("count").expect("declared"), Some(json!(value)));
        }
        prop_assert!(!vm.is_dirty());
    }
}

//! Tree-wide validation of store nodes

use std::collections::BTreeMap;

use formkit_fields::{EntryDef, ValidationEngine};

use crate::node::StoreNode;

/// Validation result for one node and its descendants.
///
/// Only failing fields and children with failures are recorded, so an empty
/// `NodeErrors` means the whole subtree is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeErrors {
    pub fields: BTreeMap<String, String>,
    pub objects: BTreeMap<String, NodeErrors>,
    pub lists: BTreeMap<String, BTreeMap<usize, NodeErrors>>,
}

impl NodeErrors {
    pub fn is_valid(&self) -> bool {
        self.fields.is_empty() && self.objects.is_empty() && self.lists.is_empty()
    }

    /// Message for a direct field of this node.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Every message keyed by its path: `name`, `address.city`, `phones[1].number`.
    pub fn flatten(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.flatten_into("", &mut out);
        out
    }

    fn flatten_into(&self, prefix: &str, out: &mut BTreeMap<String, String>) {
        for (name, message) in &self.fields {
            out.insert(format!("{prefix}{name}"), message.clone());
        }
        for (name, child) in &self.objects {
            child.flatten_into(&format!("{prefix}{name}."), out);
        }
        for (name, items) in &self.lists {
            for (index, child) in items {
                child.flatten_into(&format!("{prefix}{name}[{index}]."), out);
            }
        }
    }
}

/// Validate every field of `node`, recursing into objects and list elements.
pub fn validate_node(node: &StoreNode, engine: &ValidationEngine) -> NodeErrors {
    let mut errors = NodeErrors::default();
    for (name, entry) in node.entity().entries() {
        match entry {
            EntryDef::Field(field) => {
                let value = node.field_value(name);
                if let Some(message) = engine.validate_field(field, value.as_ref()) {
                    errors.fields.insert(name.to_string(), message);
                }
            }
            EntryDef::Object { .. } => {
                if let Some(child) = node.object_node(name) {
                    let child_errors = validate_node(&child, engine);
                    if !child_errors.is_valid() {
                        errors.objects.insert(name.to_string(), child_errors);
                    }
                }
            }
            EntryDef::List { .. } => {
                let items: BTreeMap<usize, NodeErrors> = node
                    .list_nodes(name)
                    .iter()
                    .enumerate()
                    .map(|(index, element)| (index, validate_node(element, engine)))
                    .filter(|(_, e)| !e.is_valid())
                    .collect();
                if !items.is_empty() {
                    errors.lists.insert(name.to_string(), items);
                }
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use formkit_fields::{Domain, EntityDef, EntityRegistry, FieldType, Rule};
    use serde_json::json;
    use std::sync::Arc;

    fn person() -> StoreNode {
        let required = Arc::new(Domain::new("required").required());
        let number = Arc::new(
            Domain::new("number")
                .rules([Rule::Pattern {
                    regex: "^[0-9]+$".into(),
                    message: Some("digits only".into()),
                }])
                .unwrap(),
        );
        let registry = EntityRegistry::builder()
            .entity(
                EntityDef::builder("person")
                    .field("name", FieldType::Text, required.clone())
                    .object("address", "address")
                    .list("phones", "phone")
                    .build()
                    .unwrap(),
            )
            .entity(
                EntityDef::builder("address")
                    .field("city", FieldType::Text, required)
                    .build()
                    .unwrap(),
            )
            .entity(
                EntityDef::builder("phone")
                    .field("number", FieldType::Text, number)
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap();
        StoreNode::build(&Arc::new(registry), "person").unwrap()
    }

    #[test]
    fn collects_nested_failures_with_paths() {
        let node = person();
        node.set(&json!({
            "address": {"city": ""},
            "phones": [{"number": "12"}, {"number": "x"}]
        }))
        .unwrap();

        let errors = validate_node(&node, &ValidationEngine::default());
        assert!(!errors.is_valid());
        assert_eq!(errors.field("name"), Some("validation.required"));
        assert!(errors.lists["phones"].contains_key(&1));
        assert!(!errors.lists["phones"].contains_key(&0));

        let flat = errors.flatten();
        assert_eq!(
            flat.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["address.city", "name", "phones[1].number"]
        );
        assert_eq!(flat["phones[1].number"], "digits only");
    }

    #[test]
    fn valid_tree_has_no_entries() {
        let node = person();
        node.set(&json!({"name": "Ann", "phones": [{"number": "1"}]})).unwrap();
        let errors = validate_node(&node, &ValidationEngine::default());
        assert!(errors.is_valid());
        assert_eq!(errors, NodeErrors::default());
    }

    #[test]
    fn validation_is_repeatable() {
        let node = person();
        let engine = ValidationEngine::default();
        assert_eq!(validate_node(&node, &engine), validate_node(&node, &engine));
    }
}

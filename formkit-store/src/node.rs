//! StoreNode: a live, mutable data tree shaped by entity metadata.
//!
//! A node owns one slot per entry of its entity: a value for each field, an
//! optional nested node for each object entry, and an ordered list of nodes
//! for each list entry. The set of slots is fixed at construction; only their
//! contents change.
//!
//! # Invariants
//!
//! 1. A node's shape never changes after construction.
//! 2. `clear()` keeps the identity of the node and of nested object nodes, so
//!    subscriptions held on them stay valid.
//! 3. `set()` checks the whole input against the entity shape before mutating
//!    anything; a shape error leaves the node untouched.
//! 4. Subscribers are notified synchronously, in registration order, after the
//!    slot has been updated. Callbacks may mutate other nodes.
//!
//! Subscribers that capture a strong handle to the node they listen to create
//! a reference cycle; capture a [`StoreNode::downgrade`] handle instead.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::trace;
use ulid::Ulid;

use formkit_fields::{EntityDef, EntityRegistry, EntryDef};

use crate::error::{Result, StoreError};

/// Stable identity of a node, unchanged by `set` and `clear`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Ulid);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A change applied to a node's own slots.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeChange {
    /// A field value changed; `None` means undefined.
    Field { name: String, value: Option<Value> },
    /// A nested object node was created or detached.
    Object { name: String },
    /// A list was replaced, or an element was pushed or removed.
    List { name: String },
    /// `clear()` finished on this node.
    Cleared,
}

enum Slot {
    Field(Option<Value>),
    Object(Option<StoreNode>),
    List(Vec<StoreNode>),
}

type Listener = Rc<dyn Fn(&NodeChange)>;

struct NodeInner {
    id: NodeId,
    entity: Arc<EntityDef>,
    registry: Arc<EntityRegistry>,
    slots: RefCell<IndexMap<String, Slot>>,
    listeners: RefCell<Vec<(u64, Listener)>>,
    next_listener: Cell<u64>,
}

/// Handle to a live node. Clones share the same node.
#[derive(Clone)]
pub struct StoreNode {
    inner: Rc<NodeInner>,
}

/// Weak handle for use inside subscriber callbacks.
#[derive(Clone)]
pub struct WeakStoreNode {
    inner: Weak<NodeInner>,
}

impl WeakStoreNode {
    pub fn upgrade(&self) -> Option<StoreNode> {
        self.inner.upgrade().map(|inner| StoreNode { inner })
    }
}

/// RAII guard for a node subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    node: Weak<NodeInner>,
    id: u64,
}

impl Subscription {
    /// Unsubscribe now. Equivalent to dropping the guard.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(node) = self.node.upgrade() {
            node.listeners.borrow_mut().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl StoreNode {
    /// Build an empty node for the named entity.
    ///
    /// Fields start undefined, lists start empty, and nested objects are
    /// created lazily by `set` or [`ensure_object`](Self::ensure_object).
    pub fn build(registry: &Arc<EntityRegistry>, entity: &str) -> Result<Self> {
        let def = registry.resolve(entity)?;
        Ok(Self::from_entity(registry, def))
    }

    /// Build an empty node for an already-resolved entity.
    pub fn from_entity(registry: &Arc<EntityRegistry>, entity: Arc<EntityDef>) -> Self {
        let slots = entity
            .entries()
            .map(|(name, entry)| {
                let slot = match entry {
                    EntryDef::Field(_) => Slot::Field(None),
                    EntryDef::Object { .. } => Slot::Object(None),
                    EntryDef::List { .. } => Slot::List(Vec::new()),
                };
                (name.to_string(), slot)
            })
            .collect();
        Self {
            inner: Rc::new(NodeInner {
                id: NodeId(Ulid::new()),
                entity,
                registry: Arc::clone(registry),
                slots: RefCell::new(slots),
                listeners: RefCell::new(Vec::new()),
                next_listener: Cell::new(0),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.inner.entity
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.inner.registry
    }

    /// True if both handles point at the same node.
    pub fn ptr_eq(&self, other: &StoreNode) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakStoreNode {
        WeakStoreNode {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // --- Reads ---

    /// Current value of a field; `None` when undefined.
    pub fn field(&self, name: &str) -> Result<Option<Value>> {
        self.expect_kind(name, "field")?;
        Ok(self.field_value(name))
    }

    /// Current value of a field decoded into `T`.
    pub fn field_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        self.field(name)?
            .map(|value| {
                serde_json::from_value(value).map_err(|source| StoreError::Decode {
                    name: name.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Nested object node, if it has been created.
    pub fn object(&self, name: &str) -> Result<Option<StoreNode>> {
        self.expect_kind(name, "object")?;
        Ok(self.object_node(name))
    }

    /// Elements of a list entry, in order.
    pub fn list(&self, name: &str) -> Result<Vec<StoreNode>> {
        self.expect_kind(name, "list")?;
        Ok(self.list_nodes(name))
    }

    /// Flatten to JSON. Undefined fields and uncreated objects are omitted.
    pub fn to_value(&self) -> Value {
        let slots = self.inner.slots.borrow();
        let mut map = Map::new();
        for (name, slot) in slots.iter() {
            match slot {
                Slot::Field(Some(value)) => {
                    map.insert(name.clone(), value.clone());
                }
                Slot::Field(None) | Slot::Object(None) => {}
                Slot::Object(Some(child)) => {
                    map.insert(name.clone(), child.to_value());
                }
                Slot::List(items) => {
                    map.insert(
                        name.clone(),
                        Value::Array(items.iter().map(StoreNode::to_value).collect()),
                    );
                }
            }
        }
        Value::Object(map)
    }

    // --- Writes ---

    /// Merge `data` into the node.
    ///
    /// Keys present in `data` are assigned: fields take the value (`null`
    /// means undefined), objects are merged recursively (created if missing,
    /// cleared in place on `null`), lists are replaced by freshly built nodes
    /// in input order. Keys absent from `data` are left untouched; keys the
    /// entity does not declare are ignored.
    pub fn set(&self, data: &Value) -> Result<()> {
        check_shape(self.registry(), self.entity(), data, "")?;
        self.apply(data)
    }

    /// Assign a single field. `Value::Null` makes it undefined.
    pub fn set_field(&self, name: &str, value: Value) -> Result<()> {
        self.expect_kind(name, "field")?;
        self.write_field(name, normalize(value));
        Ok(())
    }

    /// Return the nested object node, creating an empty one if missing.
    pub fn ensure_object(&self, name: &str) -> Result<StoreNode> {
        let entity = self.target_entity(name, "object")?;
        if let Some(child) = self.object_node(name) {
            return Ok(child);
        }
        let child = StoreNode::from_entity(self.registry(), entity);
        self.attach_object(name, Some(child.clone()));
        Ok(child)
    }

    /// Append an element built from `data` to a list entry.
    pub fn push(&self, name: &str, data: &Value) -> Result<StoreNode> {
        let entity = self.target_entity(name, "list")?;
        check_shape(self.registry(), &entity, data, name)?;
        let child = StoreNode::from_entity(self.registry(), entity);
        child.apply(data)?;
        if let Some(Slot::List(items)) = self.inner.slots.borrow_mut().get_mut(name) {
            items.push(child.clone());
        }
        self.notify(&NodeChange::List {
            name: name.to_string(),
        });
        Ok(child)
    }

    /// Remove and return the element at `index` of a list entry.
    pub fn remove(&self, name: &str, index: usize) -> Result<StoreNode> {
        self.expect_kind(name, "list")?;
        let removed = {
            let mut slots = self.inner.slots.borrow_mut();
            let Some(Slot::List(items)) = slots.get_mut(name) else {
                return Err(StoreError::UnknownEntry {
                    entity: self.inner.entity.name().to_string(),
                    name: name.to_string(),
                });
            };
            if index >= items.len() {
                return Err(StoreError::IndexOutOfRange {
                    name: name.to_string(),
                    index,
                    len: items.len(),
                });
            }
            items.remove(index)
        };
        self.notify(&NodeChange::List {
            name: name.to_string(),
        });
        Ok(removed)
    }

    /// Reset every field to undefined, empty every list, and clear nested
    /// objects in place.
    pub fn clear(&self) {
        for (name, entry) in self.inner.entity.entries() {
            match entry {
                EntryDef::Field(_) => {
                    self.write_field(name, None);
                }
                EntryDef::Object { .. } => {
                    if let Some(child) = self.object_node(name) {
                        child.clear();
                    }
                }
                EntryDef::List { .. } => {
                    if !self.list_nodes(name).is_empty() {
                        self.replace_list(name, Vec::new());
                    }
                }
            }
        }
        self.notify(&NodeChange::Cleared);
    }

    /// Register a change callback. The callback runs synchronously after
    /// each change to this node's own slots.
    pub fn subscribe(&self, callback: impl Fn(&NodeChange) + 'static) -> Subscription {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        self.inner
            .listeners
            .borrow_mut()
            .push((id, Rc::new(callback)));
        Subscription {
            node: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    // --- Crate internals ---

    pub(crate) fn field_value(&self, name: &str) -> Option<Value> {
        match self.inner.slots.borrow().get(name) {
            Some(Slot::Field(value)) => value.clone(),
            _ => None,
        }
    }

    pub(crate) fn object_node(&self, name: &str) -> Option<StoreNode> {
        match self.inner.slots.borrow().get(name) {
            Some(Slot::Object(child)) => child.clone(),
            _ => None,
        }
    }

    pub(crate) fn list_nodes(&self, name: &str) -> Vec<StoreNode> {
        match self.inner.slots.borrow().get(name) {
            Some(Slot::List(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    /// Write a field slot, notifying only if the value changed.
    pub(crate) fn write_field(&self, name: &str, value: Option<Value>) -> bool {
        {
            let mut slots = self.inner.slots.borrow_mut();
            match slots.get_mut(name) {
                Some(Slot::Field(current)) if *current != value => *current = value.clone(),
                _ => return false,
            }
        }
        self.notify(&NodeChange::Field {
            name: name.to_string(),
            value,
        });
        true
    }

    /// Put `child` in an object slot, notifying if the identity changed.
    pub(crate) fn attach_object(&self, name: &str, child: Option<StoreNode>) {
        {
            let mut slots = self.inner.slots.borrow_mut();
            match slots.get_mut(name) {
                Some(Slot::Object(current)) => {
                    let same = match (current.as_ref(), child.as_ref()) {
                        (Some(a), Some(b)) => a.ptr_eq(b),
                        (None, None) => true,
                        _ => false,
                    };
                    if same {
                        return;
                    }
                    *current = child;
                }
                _ => return,
            }
        }
        self.notify(&NodeChange::Object {
            name: name.to_string(),
        });
    }

    /// Replace the elements of a list slot.
    pub(crate) fn replace_list(&self, name: &str, nodes: Vec<StoreNode>) {
        {
            let mut slots = self.inner.slots.borrow_mut();
            match slots.get_mut(name) {
                Some(Slot::List(items)) => *items = nodes,
                _ => return,
            }
        }
        self.notify(&NodeChange::List {
            name: name.to_string(),
        });
    }

    /// Entity referenced by an object or list entry.
    pub(crate) fn target_entity(&self, name: &str, kind: &'static str) -> Result<Arc<EntityDef>> {
        let entry = self.expect_kind(name, kind)?;
        let target = entry.target().unwrap_or_default().to_string();
        Ok(self.registry().resolve(&target)?)
    }

    fn expect_kind(&self, name: &str, expected: &'static str) -> Result<&EntryDef> {
        let entry = self
            .inner
            .entity
            .entry(name)
            .ok_or_else(|| StoreError::UnknownEntry {
                entity: self.inner.entity.name().to_string(),
                name: name.to_string(),
            })?;
        if entry.kind() != expected {
            return Err(StoreError::KindMismatch {
                entity: self.inner.entity.name().to_string(),
                name: name.to_string(),
                expected,
                actual: entry.kind(),
            });
        }
        Ok(entry)
    }

    /// Apply already shape-checked data.
    fn apply(&self, data: &Value) -> Result<()> {
        let Value::Object(map) = data else {
            return Ok(());
        };
        for (key, value) in map {
            let Some(entry) = self.inner.entity.entry(key) else {
                trace!(entity = %self.inner.entity.name(), key = %key, "ignoring undeclared key");
                continue;
            };
            match entry {
                EntryDef::Field(_) => {
                    self.write_field(key, normalize(value.clone()));
                }
                EntryDef::Object { .. } => match (self.object_node(key), value) {
                    (Some(child), Value::Null) => child.clear(),
                    (None, Value::Null) => {}
                    (Some(child), value) => child.apply(value)?,
                    (None, value) => {
                        let child = StoreNode::from_entity(
                            self.registry(),
                            self.target_entity(key, "object")?,
                        );
                        child.apply(value)?;
                        self.attach_object(key, Some(child));
                    }
                },
                EntryDef::List { .. } => {
                    let entity = self.target_entity(key, "list")?;
                    let items = value.as_array().map(Vec::as_slice).unwrap_or_default();
                    let mut nodes = Vec::with_capacity(items.len());
                    for item in items {
                        let child = StoreNode::from_entity(self.registry(), Arc::clone(&entity));
                        child.apply(item)?;
                        nodes.push(child);
                    }
                    self.replace_list(key, nodes);
                }
            }
        }
        Ok(())
    }

    fn notify(&self, change: &NodeChange) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(change);
        }
    }
}

impl fmt::Debug for StoreNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreNode")
            .field("id", &self.inner.id)
            .field("entity", &self.inner.entity.name())
            .field("value", &self.to_value())
            .finish()
    }
}

fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        value => Some(value),
    }
}

fn child_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

/// Verify `data` against the entity shape without mutating anything.
pub(crate) fn check_shape(
    registry: &EntityRegistry,
    entity: &EntityDef,
    data: &Value,
    path: &str,
) -> Result<()> {
    let mismatch = |path: String, expected| StoreError::ShapeMismatch {
        entity: entity.name().to_string(),
        path,
        expected,
    };
    let Value::Object(map) = data else {
        let path = if path.is_empty() { "<root>".to_string() } else { path.to_string() };
        return Err(mismatch(path, "object"));
    };
    for (key, value) in map {
        match entity.entry(key) {
            Some(EntryDef::Object { entity: target }) if !value.is_null() => {
                let target = registry.resolve(target)?;
                check_shape(registry, &target, value, &child_path(path, key))?;
            }
            Some(EntryDef::List { entity: target }) => match value {
                Value::Null => {}
                Value::Array(items) => {
                    let target = registry.resolve(target)?;
                    for (i, item) in items.iter().enumerate() {
                        let item_path = format!("{}[{i}]", child_path(path, key));
                        check_shape(registry, &target, item, &item_path)?;
                    }
                }
                _ => return Err(mismatch(child_path(path, key), "array")),
            },
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    fn registry() -> Arc<EntityRegistry> {
        let person = EntityDef::builder("person")
            .text("name")
            .text("age")
            .object("address", "address")
            .list("phones", "phone")
            .build()
            .unwrap();
        let address = EntityDef::builder("address").text("city").build().unwrap();
        let phone = EntityDef::builder("phone").text("number").build().unwrap();
        Arc::new(
            EntityRegistry::builder()
                .entity(person)
                .entity(address)
                .entity(phone)
                .build()
                .unwrap(),
        )
    }

    fn person() -> StoreNode {
        StoreNode::build(&registry(), "person").unwrap()
    }

    #[test]
    fn build_starts_empty() {
        let node = person();
        assert_eq!(node.field("name").unwrap(), None);
        assert!(node.object("address").unwrap().is_none());
        assert!(node.list("phones").unwrap().is_empty());
        assert_eq!(node.to_value(), json!({"phones": []}));
    }

    #[test]
    fn set_is_a_partial_merge() {
        let node = person();
        node.set(&json!({"name": "Ann", "age": 30})).unwrap();
        node.set(&json!({"age": 31})).unwrap();
        assert_eq!(node.field("name").unwrap(), Some(json!("Ann")));
        assert_eq!(node.field_as::<u32>("age").unwrap(), Some(31));
    }

    #[test]
    fn set_builds_nested_objects_and_lists() {
        let node = person();
        node.set(&json!({
            "address": {"city": "Ghent"},
            "phones": [{"number": "1"}, {"number": "2"}]
        }))
        .unwrap();
        let address = node.object("address").unwrap().unwrap();
        assert_eq!(address.field("city").unwrap(), Some(json!("Ghent")));
        let numbers: Vec<_> = node
            .list("phones")
            .unwrap()
            .iter()
            .map(|p| p.field("number").unwrap().unwrap())
            .collect();
        assert_eq!(numbers, [json!("1"), json!("2")]);

        node.set(&json!({"address": {"city": "Leuven"}})).unwrap();
        let again = node.object("address").unwrap().unwrap();
        assert!(address.ptr_eq(&again));
        assert_eq!(again.field("city").unwrap(), Some(json!("Leuven")));
    }

    #[test]
    fn shape_mismatch_leaves_node_untouched() {
        let node = person();
        node.set(&json!({"name": "Ann"})).unwrap();
        let err = node
            .set(&json!({"name": "Bob", "phones": [{"number": "1"}, 7]}))
            .unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { ref path, .. } if path == "phones[1]"));
        assert_eq!(node.field("name").unwrap(), Some(json!("Ann")));
        assert!(node.list("phones").unwrap().is_empty());
    }

    #[test]
    fn non_object_root_is_a_shape_mismatch() {
        let err = person().set(&json!([1, 2])).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { expected: "object", .. }));
    }

    #[test]
    fn accessor_kind_errors() {
        let node = person();
        assert!(matches!(
            node.field("phones"),
            Err(StoreError::KindMismatch { expected: "field", actual: "list", .. })
        ));
        assert!(matches!(
            node.field("nope"),
            Err(StoreError::UnknownEntry { .. })
        ));
    }

    #[test]
    fn clear_preserves_identity() {
        let node = person();
        node.set(&json!({"name": "Ann", "address": {"city": "Ghent"}, "phones": [{"number": "1"}]}))
            .unwrap();
        let address = node.object("address").unwrap().unwrap();
        node.clear();
        assert_eq!(node.field("name").unwrap(), None);
        assert!(node.list("phones").unwrap().is_empty());
        let after = node.object("address").unwrap().unwrap();
        assert!(after.ptr_eq(&address));
        assert_eq!(after.field("city").unwrap(), None);
    }

    #[test]
    fn subscribers_see_changes_in_order() {
        let node = person();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let log = seen.clone();
        let sub = node.subscribe(move |change| log.borrow_mut().push(change.clone()));

        node.set(&json!({"name": "Ann", "phones": []})).unwrap();
        node.set_field("name", json!("Ann")).unwrap();
        node.clear();

        assert_eq!(
            *seen.borrow(),
            vec![
                NodeChange::Field {
                    name: "name".into(),
                    value: Some(json!("Ann"))
                },
                NodeChange::List {
                    name: "phones".into()
                },
                NodeChange::Field {
                    name: "name".into(),
                    value: None
                },
                NodeChange::Cleared,
            ]
        );

        drop(sub);
        assert_eq!(node.subscriber_count(), 0);
        node.set_field("name", json!("Bob")).unwrap();
        assert_eq!(seen.borrow().len(), 4);
    }

    #[test]
    fn push_and_remove_list_elements() {
        let node = person();
        node.push("phones", &json!({"number": "1"})).unwrap();
        node.push("phones", &json!({"number": "2"})).unwrap();
        let removed = node.remove("phones", 0).unwrap();
        assert_eq!(removed.field("number").unwrap(), Some(json!("1")));
        assert_eq!(node.list("phones").unwrap().len(), 1);
        assert!(matches!(
            node.remove("phones", 5),
            Err(StoreError::IndexOutOfRange { len: 1, .. })
        ));
    }

    #[test]
    fn null_object_clears_in_place() {
        let node = person();
        node.set(&json!({"address": {"city": "Ghent"}})).unwrap();
        let address = node.object("address").unwrap().unwrap();
        node.set(&json!({"address": null})).unwrap();
        assert!(node.object("address").unwrap().unwrap().ptr_eq(&address));
        assert_eq!(address.field("city").unwrap(), None);
    }
}

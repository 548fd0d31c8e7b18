//! ViewModel: an editable shadow of a source node.
//!
//! The view model owns a shadow [`StoreNode`] of the same entity as its source.
//! Local edits go to the shadow and mark the touched field dirty. While
//! subscribed, upstream writes to the source are mirrored into clean fields
//! only, so a refresh never overwrites work in progress. `reset()` discards
//! every local edit and recopies the source.
//!
//! Nested objects and list elements get their own child view models; the
//! shadow's nested slots hold the children's shadows, so `shadow().to_value()`
//! is the full edited tree.
//!
//! # List reconciliation
//!
//! When a source list is replaced and the element entity declares an identity
//! field, existing children are matched to the new elements by identity value.
//! Without an identity field, children are matched by position. Matched
//! children keep their dirty edits; unmatched elements get fresh children.
//! A list edited locally (push, remove, replace) ignores upstream list changes
//! until the next reset.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;
use tracing::{trace, warn};

use formkit_fields::{EntityDef, EntryDef, FieldDef, ValidationEngine};

use crate::error::{Result, StoreError};
use crate::node::{check_shape, NodeChange, StoreNode, Subscription};
use crate::validate::{validate_node, NodeErrors};

/// Edit-mode and error-display state of a form.
#[derive(Debug, Default)]
pub struct FormFacet {
    is_edit: Cell<bool>,
    force_error_display: Cell<bool>,
    touched: RefCell<BTreeSet<String>>,
    server_errors: RefCell<BTreeMap<String, String>>,
}

impl FormFacet {
    pub fn is_edit(&self) -> bool {
        self.is_edit.get()
    }

    pub fn set_edit(&self, editing: bool) {
        self.is_edit.set(editing);
    }

    /// When set, every validation error is visible, touched or not.
    pub fn force_error_display(&self) -> bool {
        self.force_error_display.get()
    }

    pub fn set_force_error_display(&self, force: bool) {
        self.force_error_display.set(force);
    }

    /// Mark a field path (`name`, `address.city`, `phones[0].number`) as touched.
    pub fn touch(&self, path: impl Into<String>) {
        self.touched.borrow_mut().insert(path.into());
    }

    pub fn is_touched(&self, path: &str) -> bool {
        self.touched.borrow().contains(path)
    }

    /// Merge errors reported by a backend, keyed by field path.
    pub fn merge_server_errors(&self, errors: &BTreeMap<String, String>) {
        self.server_errors
            .borrow_mut()
            .extend(errors.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    pub fn server_errors(&self) -> BTreeMap<String, String> {
        self.server_errors.borrow().clone()
    }

    pub fn clear_server_errors(&self) {
        self.server_errors.borrow_mut().clear();
    }

    /// Forget touched paths, server errors and forced display.
    pub fn clear_errors(&self) {
        self.force_error_display.set(false);
        self.touched.borrow_mut().clear();
        self.server_errors.borrow_mut().clear();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SyncMode {
    /// Discard local edits and rebuild lists from the source.
    Reset,
    /// Copy clean fields only and reconcile clean lists.
    KeepEdits,
}

struct VmInner {
    entity: Arc<EntityDef>,
    source: RefCell<StoreNode>,
    shadow: StoreNode,
    dirty: RefCell<HashSet<String>>,
    dirty_lists: RefCell<HashSet<String>>,
    objects: RefCell<HashMap<String, ViewModel>>,
    lists: RefCell<HashMap<String, Vec<ViewModel>>>,
    subscription: RefCell<Option<Subscription>>,
    form: FormFacet,
}

/// Editable shadow of a [`StoreNode`]. Clones share the same view model.
#[derive(Clone)]
pub struct ViewModel {
    inner: Rc<VmInner>,
}

impl ViewModel {
    /// Create a view model over `source`, initialized to its current values.
    ///
    /// The view model starts unsubscribed.
    pub fn new(source: &StoreNode) -> Result<Self> {
        let entity = Arc::clone(source.entity());
        let shadow = StoreNode::from_entity(source.registry(), Arc::clone(&entity));
        let vm = Self {
            inner: Rc::new(VmInner {
                entity,
                source: RefCell::new(source.clone()),
                shadow,
                dirty: RefCell::new(HashSet::new()),
                dirty_lists: RefCell::new(HashSet::new()),
                objects: RefCell::new(HashMap::new()),
                lists: RefCell::new(HashMap::new()),
                subscription: RefCell::new(None),
                form: FormFacet::default(),
            }),
        };
        vm.sync(SyncMode::Reset)?;
        Ok(vm)
    }

    pub fn source(&self) -> StoreNode {
        self.inner.source.borrow().clone()
    }

    /// The edited tree.
    pub fn shadow(&self) -> StoreNode {
        self.inner.shadow.clone()
    }

    pub fn entity(&self) -> &Arc<EntityDef> {
        &self.inner.entity
    }

    pub fn form(&self) -> &FormFacet {
        &self.inner.form
    }

    pub fn ptr_eq(&self, other: &ViewModel) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // --- Subscription ---

    /// Start mirroring source changes into clean fields, recursively.
    ///
    /// Clean fields first catch up with changes made while unsubscribed.
    /// Calling it on a subscribed view model does nothing.
    pub fn subscribe(&self) {
        if !self.is_subscribed() {
            let weak = Rc::downgrade(&self.inner);
            let subscription = self.source().subscribe(move |change| {
                if let Some(inner) = weak.upgrade() {
                    let vm = ViewModel { inner };
                    if let Err(e) = vm.on_source_change(change) {
                        warn!(entity = %vm.inner.entity.name(), %e, "failed to mirror source change");
                    }
                }
            });
            *self.inner.subscription.borrow_mut() = Some(subscription);
            if let Err(e) = self.sync(SyncMode::KeepEdits) {
                warn!(entity = %self.inner.entity.name(), %e, "failed to catch up with source");
            }
        }
        for child in self.children() {
            child.subscribe();
        }
    }

    /// Stop mirroring, recursively. Idempotent.
    pub fn unsubscribe(&self) {
        self.inner.subscription.borrow_mut().take();
        for child in self.children() {
            child.unsubscribe();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.borrow().is_some()
    }

    // --- Baseline ---

    /// Discard all local edits and recopy every value from the source.
    pub fn reset(&self) -> Result<()> {
        self.sync(SyncMode::Reset)
    }

    /// Rebind to a different source node and reset.
    ///
    /// The subscription state carries over to the new source.
    pub fn set_source(&self, source: &StoreNode) -> Result<()> {
        self.rebind(source, SyncMode::Reset)
    }

    // --- Reads ---

    /// Current edited value of a field.
    pub fn field(&self, name: &str) -> Result<Option<Value>> {
        self.inner.shadow.field(name)
    }

    /// Child view model of a nested object, if the object exists.
    pub fn object(&self, name: &str) -> Option<ViewModel> {
        self.inner.objects.borrow().get(name).cloned()
    }

    /// Child view models of a list entry, in order.
    pub fn list(&self, name: &str) -> Vec<ViewModel> {
        self.inner.lists.borrow().get(name).cloned().unwrap_or_default()
    }

    /// Flattened edited values.
    pub fn to_value(&self) -> Value {
        self.inner.shadow.to_value()
    }

    pub fn is_field_dirty(&self, name: &str) -> bool {
        self.inner.dirty.borrow().contains(name)
    }

    pub fn is_list_dirty(&self, name: &str) -> bool {
        self.inner.dirty_lists.borrow().contains(name)
    }

    /// True if any field or list in this subtree was edited since the last reset.
    pub fn is_dirty(&self) -> bool {
        !self.inner.dirty.borrow().is_empty()
            || !self.inner.dirty_lists.borrow().is_empty()
            || self.children().iter().any(ViewModel::is_dirty)
    }

    // --- Local edits ---

    /// Edit a field. Writing the source's current value marks it clean again.
    pub fn set_field(&self, name: &str, value: Value) -> Result<()> {
        self.inner.shadow.set_field(name, value)?;
        let local = self.inner.shadow.field_value(name);
        let upstream = self.source().field_value(name);
        let mut dirty = self.inner.dirty.borrow_mut();
        if local == upstream {
            dirty.remove(name);
        } else {
            dirty.insert(name.to_string());
        }
        Ok(())
    }

    /// Edit a field from user-typed text, parsed through the field's domain.
    pub fn set_input(&self, name: &str, text: &str) -> Result<()> {
        let value = self.field_def(name)?.unformat(text);
        self.set_field(name, value)
    }

    /// The edited value of a field rendered for an input control.
    pub fn input_text(&self, name: &str) -> Result<String> {
        let field = self.field_def(name)?;
        Ok(self
            .inner
            .shadow
            .field(name)?
            .map(|value| field.domain.format_input(&value))
            .unwrap_or_default())
    }

    /// Merge `data` as local edits, with the same patch semantics as
    /// [`StoreNode::set`]. Replacing a list marks it structurally dirty.
    pub fn set(&self, data: &Value) -> Result<()> {
        check_shape(self.inner.shadow.registry(), &self.inner.entity, data, "")?;
        let Value::Object(map) = data else {
            return Ok(());
        };
        for (key, value) in map {
            match self.inner.entity.entry(key) {
                None => trace!(entity = %self.inner.entity.name(), key = %key, "ignoring undeclared key"),
                Some(EntryDef::Field(_)) => self.set_field(key, value.clone())?,
                Some(EntryDef::Object { .. }) => match value {
                    Value::Null => {
                        if let Some(child) = self.object(key) {
                            child.set_all_undefined()?;
                        }
                    }
                    value => self.ensure_object(key)?.set(value)?,
                },
                Some(EntryDef::List { .. }) => {
                    let items = match value {
                        Value::Array(items) => items.as_slice(),
                        _ => &[][..],
                    };
                    let mut children = Vec::with_capacity(items.len());
                    for item in items {
                        children.push(self.detached_child(key, item)?);
                    }
                    self.inner.dirty_lists.borrow_mut().insert(key.clone());
                    self.install_list(key, children);
                }
            }
        }
        Ok(())
    }

    /// Child view model of a nested object, created if the source has none.
    pub fn ensure_object(&self, name: &str) -> Result<ViewModel> {
        if let Some(child) = self.object(name) {
            return Ok(child);
        }
        let entity = self.inner.shadow.target_entity(name, "object")?;
        let detached = StoreNode::from_entity(self.inner.shadow.registry(), entity);
        let child = self.child(&detached)?;
        self.install_object(name, Some(child.clone()));
        Ok(child)
    }

    /// Append a locally created list element.
    pub fn push(&self, name: &str, data: &Value) -> Result<ViewModel> {
        let child = self.detached_child(name, data)?;
        let mut children = self.list(name);
        children.push(child.clone());
        self.inner.dirty_lists.borrow_mut().insert(name.to_string());
        self.install_list(name, children);
        Ok(child)
    }

    /// Remove a list element locally.
    pub fn remove(&self, name: &str, index: usize) -> Result<ViewModel> {
        self.inner.shadow.target_entity(name, "list")?;
        let mut children = self.list(name);
        if index >= children.len() {
            return Err(StoreError::IndexOutOfRange {
                name: name.to_string(),
                index,
                len: children.len(),
            });
        }
        let removed = children.remove(index);
        removed.unsubscribe();
        self.inner.dirty_lists.borrow_mut().insert(name.to_string());
        self.install_list(name, children);
        Ok(removed)
    }

    // --- Validation ---

    /// Validate the edited tree.
    pub fn validate(&self, engine: &ValidationEngine) -> NodeErrors {
        validate_node(&self.inner.shadow, engine)
    }

    pub fn is_valid(&self, engine: &ValidationEngine) -> bool {
        self.validate(engine).is_valid()
    }

    /// Errors the UI should show, keyed by field path.
    ///
    /// A validation error is visible once error display is forced or its path
    /// was touched. Server errors are always visible and take precedence.
    pub fn visible_errors(&self, engine: &ValidationEngine) -> BTreeMap<String, String> {
        let form = &self.inner.form;
        let mut visible: BTreeMap<String, String> = self
            .validate(engine)
            .flatten()
            .into_iter()
            .filter(|(path, _)| form.force_error_display() || form.is_touched(path))
            .collect();
        visible.extend(form.server_errors());
        visible
    }

    // --- Internals ---

    fn field_def(&self, name: &str) -> Result<&FieldDef> {
        self.inner.entity.field(name).ok_or_else(|| StoreError::UnknownEntry {
            entity: self.inner.entity.name().to_string(),
            name: name.to_string(),
        })
    }

    fn children(&self) -> Vec<ViewModel> {
        let mut children: Vec<ViewModel> = self.inner.objects.borrow().values().cloned().collect();
        children.extend(self.inner.lists.borrow().values().flatten().cloned());
        children
    }

    fn rebind(&self, source: &StoreNode, mode: SyncMode) -> Result<()> {
        let was_subscribed = self.is_subscribed();
        self.unsubscribe();
        *self.inner.source.borrow_mut() = source.clone();
        self.sync(mode)?;
        if was_subscribed {
            self.subscribe();
        }
        Ok(())
    }

    /// Create a child over `source`, subscribed if this view model is.
    fn child(&self, source: &StoreNode) -> Result<ViewModel> {
        let child = ViewModel::new(source)?;
        if self.is_subscribed() {
            child.subscribe();
        }
        Ok(child)
    }

    /// A list element with its own private source, holding `data` as edits.
    fn detached_child(&self, list: &str, data: &Value) -> Result<ViewModel> {
        let entity = self.inner.shadow.target_entity(list, "list")?;
        let detached = StoreNode::from_entity(self.inner.shadow.registry(), entity);
        let child = self.child(&detached)?;
        child.set(data)?;
        Ok(child)
    }

    fn install_object(&self, name: &str, child: Option<ViewModel>) {
        let shadow = child.as_ref().map(ViewModel::shadow);
        let previous = match child {
            Some(child) => self.inner.objects.borrow_mut().insert(name.to_string(), child),
            None => self.inner.objects.borrow_mut().remove(name),
        };
        if let Some(previous) = previous {
            let replaced = shadow.as_ref().is_none_or(|s| !s.ptr_eq(&previous.shadow()));
            if replaced {
                previous.unsubscribe();
            }
        }
        self.inner.shadow.attach_object(name, shadow);
    }

    fn install_list(&self, name: &str, children: Vec<ViewModel>) {
        let shadows = children.iter().map(ViewModel::shadow).collect();
        let previous = self
            .inner
            .lists
            .borrow_mut()
            .insert(name.to_string(), children.clone())
            .unwrap_or_default();
        for old in previous {
            if !children.iter().any(|c| c.ptr_eq(&old)) {
                old.unsubscribe();
            }
        }
        self.inner.shadow.replace_list(name, shadows);
    }

    /// Make every field of this subtree undefined as a local edit.
    fn set_all_undefined(&self) -> Result<()> {
        for (name, entry) in self.inner.entity.entries() {
            match entry {
                EntryDef::Field(_) => self.set_field(name, Value::Null)?,
                EntryDef::Object { .. } => {
                    if let Some(child) = self.object(name) {
                        child.set_all_undefined()?;
                    }
                }
                EntryDef::List { .. } => {
                    if !self.list(name).is_empty() {
                        self.inner.dirty_lists.borrow_mut().insert(name.to_string());
                        self.install_list(name, Vec::new());
                    }
                }
            }
        }
        Ok(())
    }

    fn sync(&self, mode: SyncMode) -> Result<()> {
        if mode == SyncMode::Reset {
            self.inner.dirty.borrow_mut().clear();
            self.inner.dirty_lists.borrow_mut().clear();
        }
        let source = self.source();
        for (name, entry) in self.inner.entity.entries() {
            match entry {
                EntryDef::Field(_) => {
                    if !self.is_field_dirty(name) {
                        self.inner.shadow.write_field(name, source.field_value(name));
                    }
                }
                EntryDef::Object { .. } => self.sync_object(name, &source, mode)?,
                EntryDef::List { .. } => match mode {
                    SyncMode::Reset => {
                        let children = source
                            .list_nodes(name)
                            .iter()
                            .map(|element| self.child(element))
                            .collect::<Result<Vec<_>>>()?;
                        self.install_list(name, children);
                    }
                    SyncMode::KeepEdits => {
                        if !self.is_list_dirty(name) {
                            self.reconcile_list(name, &source)?;
                        }
                    }
                },
            }
        }
        Ok(())
    }

    fn sync_object(&self, name: &str, source: &StoreNode, mode: SyncMode) -> Result<()> {
        match (source.object_node(name), self.object(name)) {
            (Some(upstream), Some(child)) => {
                if child.source().ptr_eq(&upstream) {
                    child.sync(mode)
                } else {
                    child.rebind(&upstream, mode)
                }
            }
            (Some(upstream), None) => {
                let child = self.child(&upstream)?;
                self.install_object(name, Some(child));
                Ok(())
            }
            (None, Some(child)) if mode == SyncMode::Reset || !child.is_dirty() => {
                self.install_object(name, None);
                Ok(())
            }
            (None, _) => Ok(()),
        }
    }

    fn reconcile_list(&self, name: &str, source: &StoreNode) -> Result<()> {
        let entity = self.inner.shadow.target_entity(name, "list")?;
        let identity = entity.identity();
        let mut remaining: Vec<Option<ViewModel>> = self.list(name).into_iter().map(Some).collect();
        let elements = source.list_nodes(name);
        let mut children = Vec::with_capacity(elements.len());

        for (position, element) in elements.iter().enumerate() {
            let matched = match identity {
                Some(key) => match element.field_value(key) {
                    Some(id) => remaining
                        .iter_mut()
                        .find(|slot| {
                            matches!(slot, Some(c) if c.source().field_value(key).as_ref() == Some(&id))
                        })
                        .and_then(Option::take),
                    None => None,
                },
                None => remaining.get_mut(position).and_then(Option::take),
            };
            let child = match matched {
                Some(child) => {
                    if !child.source().ptr_eq(element) {
                        child.rebind(element, SyncMode::KeepEdits)?;
                    }
                    child
                }
                None => self.child(element)?,
            };
            children.push(child);
        }

        trace!(
            entity = %self.inner.entity.name(),
            list = %name,
            kept = children.len(),
            by_identity = identity.is_some(),
            "reconciled list"
        );
        self.install_list(name, children);
        Ok(())
    }

    fn on_source_change(&self, change: &NodeChange) -> Result<()> {
        match change {
            NodeChange::Field { name, value } => {
                if !self.is_field_dirty(name) {
                    self.inner.shadow.write_field(name, value.clone());
                }
                Ok(())
            }
            NodeChange::Object { name } => {
                let source = self.source();
                self.sync_object(name, &source, SyncMode::KeepEdits)
            }
            NodeChange::List { name } => {
                if self.is_list_dirty(name) {
                    return Ok(());
                }
                let source = self.source();
                self.reconcile_list(name, &source)
            }
            NodeChange::Cleared => Ok(()),
        }
    }
}

impl fmt::Debug for ViewModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewModel")
            .field("entity", &self.inner.entity.name())
            .field("dirty", &self.is_dirty())
            .field("subscribed", &self.is_subscribed())
            .field("value", &self.to_value())
            .finish()
    }
}

//! FormController: binds a view model to its collaborators.
//!
//! The controller owns a [`ViewModel`] over a source [`StoreNode`] and drives
//! it through load, edit, save and delete. It is a cheap-clone handle; the
//! form is unmounted when the last handle is dropped.
//!
//! # Ordering
//!
//! Every load takes a generation number. A load that resolves after a newer
//! load was started is discarded, so the source always ends up with the data
//! of the most recently started load. Save and delete are refused while any
//! operation is in flight. Toggling edit mode off does not abort an in-flight
//! call; its result still lands on the source.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::rc::{Rc, Weak};

use formkit_common::{Pretty, Severity};
use formkit_fields::ValidationEngine;
use formkit_store::{NodeErrors, StoreNode, Subscription, ViewModel};
use scopeguard::ScopeGuard;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::FormSettings;
use crate::error::Result;
use crate::hooks::{FormHooks, NoHooks};
use crate::registry::{EditRegistry, FormId};
use crate::service::{FormService, ServiceError};

/// Where a form is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormPhase {
    /// Not mounted.
    Idle,
    /// A load is in flight.
    Loading,
    /// Mounted, read-only.
    Consulting,
    /// Mounted, in edit mode.
    Editing,
    /// A save or delete is in flight.
    Saving,
}

/// Result of [`FormController::save`].
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    /// The service accepted the data and the source holds the stored entity.
    Saved,
    /// Validation failed; the service was not called.
    Invalid(NodeErrors),
    /// Another operation is in flight; nothing happened.
    Busy,
    /// The service failed. Edit mode and values are unchanged.
    Failed(ServiceError),
}

/// Result of [`FormController::delete`].
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    Deleted,
    Busy,
    Failed(ServiceError),
}

/// Shared collaborators of the forms of one application.
#[derive(Clone)]
pub struct FormContext {
    pub registry: EditRegistry,
    pub engine: ValidationEngine,
    pub settings: FormSettings,
    pub hooks: Rc<dyn FormHooks>,
}

impl FormContext {
    pub fn new(registry: EditRegistry) -> Self {
        Self {
            registry,
            engine: ValidationEngine::default(),
            settings: FormSettings::default(),
            hooks: Rc::new(NoHooks),
        }
    }

    pub fn with_engine(mut self, engine: ValidationEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_settings(mut self, settings: FormSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_hooks(mut self, hooks: Rc<dyn FormHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

struct ControllerInner {
    id: FormId,
    view_model: ViewModel,
    service: Rc<dyn FormService>,
    ctx: FormContext,
    mounted: Cell<bool>,
    loads_in_flight: Cell<usize>,
    saving: Cell<bool>,
    generation: Cell<u64>,
    last_params: RefCell<Option<Vec<Value>>>,
    watchers: RefCell<Vec<Subscription>>,
}

impl ControllerInner {
    fn release(&self) {
        self.watchers.borrow_mut().clear();
        self.view_model.unsubscribe();
        self.ctx.registry.unregister(self.id);
        self.mounted.set(false);
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// Lifecycle controller of one form. Clones share the same form.
#[derive(Clone)]
pub struct FormController {
    inner: Rc<ControllerInner>,
}

type InFlight = ScopeGuard<Rc<ControllerInner>, fn(Rc<ControllerInner>)>;

impl FormController {
    /// Create a controller over `source` and register it, not editing.
    pub fn new(source: &StoreNode, service: Rc<dyn FormService>, ctx: FormContext) -> Result<Self> {
        let view_model = ViewModel::new(source)?;
        let id = FormId::new();
        ctx.registry.register(id, false);
        debug!(form = %id, entity = %source.entity().name(), "form created");
        Ok(Self {
            inner: Rc::new(ControllerInner {
                id,
                view_model,
                service,
                ctx,
                mounted: Cell::new(false),
                loads_in_flight: Cell::new(0),
                saving: Cell::new(false),
                generation: Cell::new(0),
                last_params: RefCell::new(None),
                watchers: RefCell::new(Vec::new()),
            }),
        })
    }

    pub fn id(&self) -> FormId {
        self.inner.id
    }

    pub fn view_model(&self) -> &ViewModel {
        &self.inner.view_model
    }

    pub fn source(&self) -> StoreNode {
        self.inner.view_model.source()
    }

    pub fn settings(&self) -> &FormSettings {
        &self.inner.ctx.settings
    }

    pub fn is_mounted(&self) -> bool {
        self.inner.mounted.get()
    }

    /// True while a load, save or delete is in flight.
    pub fn is_loading(&self) -> bool {
        self.inner.loads_in_flight.get() > 0 || self.inner.saving.get()
    }

    pub fn is_edit(&self) -> bool {
        self.inner.view_model.form().is_edit()
    }

    pub fn phase(&self) -> FormPhase {
        if self.inner.saving.get() {
            FormPhase::Saving
        } else if self.inner.loads_in_flight.get() > 0 {
            FormPhase::Loading
        } else if !self.is_mounted() {
            FormPhase::Idle
        } else if self.is_edit() {
            FormPhase::Editing
        } else {
            FormPhase::Consulting
        }
    }

    /// Subscribe the view model to its source, then load.
    pub async fn mount(&self) -> Result<bool> {
        if !self.inner.ctx.registry.is_registered(self.inner.id) {
            self.inner.ctx.registry.register(self.inner.id, self.is_edit());
        }
        self.inner.view_model.subscribe();
        self.inner.mounted.set(true);
        debug!(form = %self.inner.id, "form mounted");
        self.load().await
    }

    /// Unsubscribe, drop parameter watchers and leave the registry.
    /// Idempotent.
    pub fn unmount(&self) {
        if self.is_mounted() || self.inner.ctx.registry.is_registered(self.inner.id) {
            debug!(form = %self.inner.id, "form unmounted");
        }
        self.inner.release();
    }

    /// Rebind the form to another source node, discarding local edits.
    pub fn set_source(&self, source: &StoreNode) -> Result<()> {
        self.inner.view_model.set_source(source)?;
        Ok(())
    }

    /// Load data from the service into the source node.
    ///
    /// Returns `Ok(false)` without calling the service when the service has
    /// no parameters, and when a newer load started before this one resolved
    /// or rejected.
    pub async fn load(&self) -> Result<bool> {
        let Some(params) = self.inner.service.load_params() else {
            debug!(form = %self.inner.id, "no load parameters, skipping load");
            return Ok(false);
        };
        *self.inner.last_params.borrow_mut() = Some(params.clone());

        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);
        let busy = self.begin_load();

        if self.inner.ctx.settings.clear_before_load {
            self.source().clear();
        }
        debug!(form = %self.inner.id, generation, "loading");
        let service = Rc::clone(&self.inner.service);
        let loaded = service.load(&params).await;

        if self.inner.generation.get() != generation {
            debug!(form = %self.inner.id, generation, ok = loaded.is_ok(), "discarding stale load");
            return Ok(false);
        }
        let data = loaded?;
        trace!(form = %self.inner.id, "load result: {}", Pretty(&data));
        self.source().set(&data)?;
        drop(busy);

        info!(form = %self.inner.id, generation, "form loaded");
        self.inner.ctx.hooks.on_form_loaded(self);
        Ok(true)
    }

    /// Load again if the service's parameters differ structurally from
    /// those of the last load.
    pub async fn reload_if_params_changed(&self) -> Result<bool> {
        if !self.params_changed() {
            return Ok(false);
        }
        self.load().await
    }

    /// Reload whenever `node` changes and the load parameters changed with it.
    ///
    /// Changes are queued from the node's listener; the returned future runs
    /// the reloads one after another and must be polled, typically with
    /// [`tokio::task::spawn_local`]. It completes once the form is unmounted
    /// or dropped.
    #[must_use = "reloads only happen while the returned future is polled"]
    pub fn watch(&self, node: &StoreNode) -> impl Future<Output = ()> + 'static {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let weak: Weak<ControllerInner> = Rc::downgrade(&self.inner);
        let subscription = node.subscribe({
            let weak = weak.clone();
            move |_| {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if (FormController { inner }).params_changed() {
                    // A closed receiver means nobody polls the watch any more.
                    let _ = tx.send(());
                }
            }
        });
        self.inner.watchers.borrow_mut().push(subscription);

        async move {
            while rx.recv().await.is_some() {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let form = FormController { inner };
                if let Err(e) = form.load().await {
                    warn!(form = %form.id(), %e, "reload after parameter change failed");
                }
            }
        }
    }

    /// Enter or leave edit mode. Leaving discards unsaved edits and clears
    /// error display.
    pub fn toggle_edit(&self, editing: bool) -> Result<()> {
        let vm = &self.inner.view_model;
        vm.form().set_edit(editing);
        if !editing {
            vm.reset()?;
            vm.form().clear_errors();
        }
        self.inner.ctx.registry.set_editing(self.inner.id, editing);
        debug!(form = %self.inner.id, editing, "edit mode toggled");
        Ok(())
    }

    /// Mark a field path as touched.
    pub fn touch(&self, path: impl Into<String>) {
        self.inner.view_model.form().touch(path);
    }

    /// Errors to display, keyed by field path.
    pub fn visible_errors(&self) -> BTreeMap<String, String> {
        let vm = &self.inner.view_model;
        if self.inner.ctx.settings.reveal_errors_on_touch || vm.form().force_error_display() {
            vm.visible_errors(&self.inner.ctx.engine)
        } else {
            vm.form().server_errors()
        }
    }

    /// Validate, then send the view model's values to the service.
    ///
    /// Error display is forced on every attempt that is not refused as busy.
    /// On success the stored entity is written to the source and the form
    /// leaves edit mode. On failure the form stays as it was and any
    /// per-field messages from the service become visible.
    pub async fn save(&self) -> Result<SaveOutcome> {
        if self.is_loading() {
            debug!(form = %self.inner.id, "save refused, operation in flight");
            return Ok(SaveOutcome::Busy);
        }
        let vm = &self.inner.view_model;
        let form = vm.form();
        form.clear_server_errors();
        form.set_force_error_display(true);

        let errors = vm.validate(&self.inner.ctx.engine);
        if !errors.is_valid() {
            debug!(form = %self.inner.id, errors = errors.flatten().len(), "save blocked by validation");
            return Ok(SaveOutcome::Invalid(errors));
        }

        let busy = self.begin_save();
        let data = vm.to_value();
        let service = Rc::clone(&self.inner.service);
        match service.save(&data).await {
            Ok(saved) => {
                self.source().set(&saved)?;
                if self.inner.ctx.settings.reset_after_save {
                    vm.reset()?;
                }
                form.set_edit(false);
                form.clear_errors();
                self.inner.ctx.registry.set_editing(self.inner.id, false);
                drop(busy);
                info!(form = %self.inner.id, "form saved");
                self.inner.ctx.hooks.on_form_saved(self);
                Ok(SaveOutcome::Saved)
            }
            Err(e) => {
                drop(busy);
                if let Some(fields) = e.field_errors() {
                    form.merge_server_errors(fields);
                }
                e.severity().log(&format!("form {} save failed: {e}", self.inner.id));
                Ok(SaveOutcome::Failed(e))
            }
        }
    }

    /// Ask the service to delete the current values, then clear the source.
    pub async fn delete(&self) -> Result<DeleteOutcome> {
        if self.is_loading() {
            return Ok(DeleteOutcome::Busy);
        }
        let vm = &self.inner.view_model;
        let busy = self.begin_save();
        let data = vm.to_value();
        let service = Rc::clone(&self.inner.service);
        match service.delete(&data).await {
            Ok(()) => {
                self.source().clear();
                vm.reset()?;
                vm.form().set_edit(false);
                vm.form().clear_errors();
                self.inner.ctx.registry.set_editing(self.inner.id, false);
                drop(busy);
                info!(form = %self.inner.id, "form deleted");
                self.inner.ctx.hooks.on_form_deleted(self);
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) => {
                drop(busy);
                if let Some(fields) = e.field_errors() {
                    vm.form().merge_server_errors(fields);
                }
                e.severity().log(&format!("form {} delete failed: {e}", self.inner.id));
                Ok(DeleteOutcome::Failed(e))
            }
        }
    }

    fn params_changed(&self) -> bool {
        let current = self.inner.service.load_params();
        let mut last = self.inner.last_params.borrow_mut();
        if *last == current {
            return false;
        }
        *last = current;
        true
    }

    fn begin_load(&self) -> InFlight {
        let inner = Rc::clone(&self.inner);
        inner.loads_in_flight.set(inner.loads_in_flight.get() + 1);
        scopeguard::guard(inner, end_load as fn(Rc<ControllerInner>))
    }

    fn begin_save(&self) -> InFlight {
        let inner = Rc::clone(&self.inner);
        inner.saving.set(true);
        scopeguard::guard(inner, end_save as fn(Rc<ControllerInner>))
    }
}

fn end_load(inner: Rc<ControllerInner>) {
    inner.loads_in_flight.set(inner.loads_in_flight.get().saturating_sub(1));
}

fn end_save(inner: Rc<ControllerInner>) {
    inner.saving.set(false);
}

impl fmt::Debug for FormController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormController")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .field("view_model", &self.inner.view_model)
            .finish()
    }
}

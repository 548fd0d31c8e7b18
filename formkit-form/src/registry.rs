//! Edit-mode registry shared by every form of an application

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::trace;
use ulid::Ulid;

/// Unique identity of a form controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormId(Ulid);

impl FormId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for FormId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Map of live forms to their edit flag.
///
/// Cloning yields another handle to the same map. Create one per application
/// (or per test) and hand it to every controller through
/// [`FormContext`](crate::FormContext).
#[derive(Clone, Default)]
pub struct EditRegistry {
    forms: Rc<RefCell<HashMap<FormId, bool>>>,
}

impl EditRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: FormId, editing: bool) {
        trace!(form = %id, editing, "form registered");
        self.forms.borrow_mut().insert(id, editing);
    }

    /// Update the edit flag of a registered form. Returns false if `id` is
    /// not registered; unknown forms are not added.
    pub fn set_editing(&self, id: FormId, editing: bool) -> bool {
        match self.forms.borrow_mut().get_mut(&id) {
            Some(flag) => {
                *flag = editing;
                true
            }
            None => false,
        }
    }

    /// Remove a form. Returns whether it was registered.
    pub fn unregister(&self, id: FormId) -> bool {
        let removed = self.forms.borrow_mut().remove(&id).is_some();
        if removed {
            trace!(form = %id, "form unregistered");
        }
        removed
    }

    pub fn is_registered(&self, id: FormId) -> bool {
        self.forms.borrow().contains_key(&id)
    }

    pub fn is_editing(&self, id: FormId) -> bool {
        self.forms.borrow().get(&id).copied().unwrap_or(false)
    }

    /// True if any registered form is in edit mode.
    pub fn is_any_form_editing(&self) -> bool {
        self.forms.borrow().values().any(|editing| *editing)
    }

    pub fn len(&self) -> usize {
        self.forms.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.borrow().is_empty()
    }
}

impl fmt::Debug for EditRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.forms.borrow().iter()).finish()
    }
}

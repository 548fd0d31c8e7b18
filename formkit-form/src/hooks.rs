//! Notification hooks fired after lifecycle transitions

use crate::controller::FormController;

/// Callbacks an embedding component overrides to react to completed
/// operations. They run after `is_loading` has been cleared.
pub trait FormHooks {
    fn on_form_loaded(&self, _form: &FormController) {}

    fn on_form_saved(&self, _form: &FormController) {}

    fn on_form_deleted(&self, _form: &FormController) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl FormHooks for NoHooks {}

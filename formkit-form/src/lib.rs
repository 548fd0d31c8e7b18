//! Form lifecycle orchestration
//!
//! A [`FormController`] binds a [`ViewModel`](formkit_store::ViewModel) over a
//! source node to externally supplied load/save/delete collaborators
//! ([`FormService`]) and tracks edit mode in a shared [`EditRegistry`].
//!
//! ```text
//! idle ──mount──▶ loading ──▶ consulting ◀──toggle_edit──▶ editing
//!                                  ▲                          │
//!                                  └──────── saving ◀──save───┘
//! ```
//!
//! Loading is an overlay: a load can start from either consulting or editing.
//! Everything in this crate is single-threaded; futures returned by the
//! controller are `!Send` and run on a current-thread runtime or a `LocalSet`.

pub mod config;
pub mod controller;
pub mod error;
pub mod hooks;
pub mod registry;
pub mod service;

pub use config::FormSettings;
pub use controller::{DeleteOutcome, FormContext, FormController, FormPhase, SaveOutcome};
pub use error::{FormError, Result};
pub use hooks::{FormHooks, NoHooks};
pub use registry::{EditRegistry, FormId};
pub use service::{FormService, ServiceError};

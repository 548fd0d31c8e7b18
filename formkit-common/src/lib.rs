//! # formkit common
//!
//! Foundational types shared by every formkit crate.
//!
//! ## Modules
//!
//! - [`error`] - Severity classification implemented by each crate's error type
//! - [`logging`] - YAML pretty-printing for tracing output and subscriber bootstrap
//! - [`translate`] - The string lookup service used for user-visible messages
//!
//! The core never interprets translated text; it only forwards keys and
//! parameters to whatever [`Translate`] implementation the embedder supplies.

pub mod error;
pub mod logging;
pub mod translate;

pub use error::{ErrorSeverity, Severity};
pub use logging::{init_tracing, Pretty};
pub use translate::{CatalogTranslator, KeyTranslator, Translate};

//! Live entity data and editable shadows
//!
//! - [`StoreNode`]: a mutable data tree shaped by an [`EntityDef`](formkit_fields::EntityDef),
//!   with explicit change notification through [`StoreNode::subscribe`]
//! - [`ViewModel`]: an editable shadow of a source node with per-field dirty
//!   tracking, upstream mirroring of unedited fields, and reset
//! - [`validate_node`]: aggregates field validation over a whole tree
//!
//! Everything here is single-threaded (`Rc`-based). Change callbacks run
//! synchronously inside the mutating call.

pub mod error;
pub mod node;
pub mod validate;
pub mod view_model;

pub use error::{Result, StoreError};
pub use node::{NodeChange, NodeId, StoreNode, Subscription};
pub use validate::{validate_node, NodeErrors};
pub use view_model::{FormFacet, ViewModel};

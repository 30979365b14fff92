//! crudo: a graph-structured CRUD engine.
//!
//! Entity trees (e.g. User → Post → Comment → Like) are stored as an
//! append-only log of versioned property mutations over a pluggable
//! key-value backend, and read back as bounded-depth JSON views.
//!
//! ```no_run
//! use crudo::{Context, MemStore, Query};
//!
//! fn main() -> crudo::Result<()> {
//!     let ctx = Context::new(MemStore::new());
//!
//!     let mut update = crudo::get("User", "uid_a");
//!     update
//!         .set_source("uid_a")
//!         .add_child("Post")
//!         .set("url", "www.google.com")
//!         .set("body", "cat videos")
//!         .execute(&ctx)?;
//!
//!     let mut query = Query::new("User", "uid_a");
//!     query.upto_depth(10);
//!     let view = query.run(&ctx)?;
//!     println!("{}", String::from_utf8_lossy(&view.to_json()?));
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod id;
pub mod logging;
pub mod model;
pub mod query;
pub mod store;

pub use crate::engine::{create, get, Batch, ChildEdge, Context, Entity, NodeRef, ScalarCell};
pub use crate::error::{CrudError, Result};
pub use crate::model::{Record, Value, DELETED_PREDICATE};
pub use crate::query::{Query, QueryResult};
pub use crate::store::{DiskStore, MemStore, Store};

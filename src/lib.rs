//! Matter node data model store.
//!
//! This library keeps the in-memory data model of a Matter node (endpoints,
//! clusters, attributes, commands and events) and persists non-volatile
//! attribute values to a key-value store.

pub mod config;
pub mod error;
pub mod matter;
pub mod persistence;
pub mod scheduler;

pub use error::{DataModelError, ErrorKind, Result};
pub use matter::{DataModel, Node, SharedDataModel};

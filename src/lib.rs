//! Warehouse Agent: a conversational, tool-calling assistant over a tabular
//! data warehouse.
//!
//! A language model answers questions by calling tools hosted in backend
//! processes: guarded read-only SQL, catalog lookups, and entity resolution.

pub mod agent;
pub mod backend;
pub mod config;
pub mod guard;
pub mod inference;
pub mod protocol;
pub mod resolver;
pub mod router;
pub mod tools;
pub mod types;
pub mod warehouse;

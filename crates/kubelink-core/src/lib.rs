//! kubelink Core Library
//!
//! Shared functionality for kubelink components:
//! - `SQLite` pool setup, timestamps and the `define_database!` macro
//! - Tracing subscriber initialization

pub mod db;
pub mod tracing_init;

pub use db::{DatabaseError, unix_timestamp};

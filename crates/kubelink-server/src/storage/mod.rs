//! `SQLite` storage for the kubelink control plane.
//!
//! Provides persistence for registration tokens and cluster rows.

mod db;
mod models;
mod queries;


pub use db::ServerDatabase;
pub use kubelink_core::db::DatabaseError;
pub use models::*;
pub use queries::{ClaimOutcome, NewCluster, NewRegistrationToken};

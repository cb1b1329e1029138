//! `SQLite` database for the kubelink control plane.

kubelink_core::define_database!(ServerDatabase);

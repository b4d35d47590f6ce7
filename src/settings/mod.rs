//! Singleton system settings, editable by admins.

pub mod handlers;
pub mod repo;

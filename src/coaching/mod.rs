//! Coach profiles and the coach-client relationship.

pub mod dto;
pub mod handlers;
pub mod repo;
pub mod services;

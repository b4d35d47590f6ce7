//! Training plans authored by coaches, their exercises, and plan
//! assignments to clients.

pub mod dto;
pub mod handlers;
pub mod repo;

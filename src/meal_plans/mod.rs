//! Meal plans authored by coaches, the meals inside them, and meal plan
//! assignments to clients. Plans and meals are keyed by UUID.

pub mod dto;
pub mod handlers;
pub mod repo;

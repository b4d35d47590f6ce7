//! Trainee-side tracking: workout progress records, body metrics and the
//! progress photos attached to them.

pub mod dto;
pub mod handlers;
pub mod photos;
pub mod repo;

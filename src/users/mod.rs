pub mod deletion;
pub mod dto;
pub mod handlers;
pub mod repo;
pub mod services;

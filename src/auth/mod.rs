//! Accounts: registration, login, JWT issuance and password flows.

pub mod dto;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod services;

//! Public website forms: newsletter subscription and the contact form.
//! Both only send mail; nothing is stored.

pub mod dto;
pub mod handlers;

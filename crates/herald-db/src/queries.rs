//! Database query functions organized by domain.

pub mod messages;

//! Booking signup: backend-for-frontend for the marketplace signup wizard.

pub mod backend;
pub mod config;
pub mod error;
pub mod server;
pub mod signup;

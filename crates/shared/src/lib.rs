//! Shared types for the chama client and its API server.

pub mod error;
pub mod models;

pub use error::*;
pub use models::*;

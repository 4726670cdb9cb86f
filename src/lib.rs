pub mod models;
pub mod error;
pub mod injection;  // Injection point model: substitution and discovery
pub mod builder;
pub mod auth;
pub mod config;
pub mod client;

// Re-export commonly used items
pub use models::*;
pub use error::{Result, SpliceError};
pub use injection::*;
pub use builder::*;
pub use auth::*;
pub use config::*;
pub use client::*;

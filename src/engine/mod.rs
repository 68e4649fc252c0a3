//! The task engine: bounded execution pool, dispatch policy and lifecycle events.

pub mod condition;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod pool;

#[cfg(test)]
mod tests;

pub use condition::*;
pub use config::*;
pub use error::*;
pub use events::*;
pub use manager::*;
pub use pool::*;

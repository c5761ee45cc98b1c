//! fieldsync library
//!
//! Offline-first local record store with encrypted sensitive fields and a
//! durable mutation queue that syncs to a REST API when connectivity
//! returns.

pub mod app;
pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod services;
pub mod sync;

pub use app::AppContext;
pub use error::{AppError, Result};

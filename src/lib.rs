pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod store;
pub mod watch;

pub use db::create_store;
pub use error::{CoreError, CoreResult};

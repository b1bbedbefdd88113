#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod auth;
pub mod card;
pub mod config;
pub mod data;
pub mod driver;
pub mod error;
pub mod feed;
pub mod follow;
pub mod pagination;
pub mod session;
pub mod social;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;

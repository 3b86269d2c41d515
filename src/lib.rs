pub mod aggregate;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod handler;
pub mod service;
pub mod source;
pub mod types;

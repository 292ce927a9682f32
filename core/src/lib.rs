pub mod alert;
pub mod backend;
pub mod catalog;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod export;
pub mod milestone;
pub mod postgrest;
pub mod query_engine;
pub mod store;
pub mod template;
pub mod types;
pub mod value;

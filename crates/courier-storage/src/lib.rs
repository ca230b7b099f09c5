//! Courier Storage - Campaign and shipping record persistence
//!
//! This crate provides the persistence traits consumed by the dispatch
//! engine, their PostgreSQL implementations and an in-memory store.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;

//! Durable, transactional persistence for feeds and entries.

pub mod models;
pub mod repository;

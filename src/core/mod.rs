//! Shared primitives for the registry.
//!
//! Storage, configuration, errors and the small helpers every registry
//! component builds on.

pub mod broker;
pub mod checksum;
pub mod config;
pub mod db;
pub mod error;
pub mod migration;
pub mod names;
pub mod schemas;
pub mod store;
pub mod time;

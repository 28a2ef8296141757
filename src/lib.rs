//! Atrium: per-page atomic loaders over a cache-aside snapshot store, with
//! synchronous invalidation on writes and background warming of hot keys.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

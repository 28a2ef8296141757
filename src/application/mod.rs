pub mod catalog;
pub mod error;
pub mod loaders;
pub mod repos;
pub mod snapshots;

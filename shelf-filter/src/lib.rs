pub mod catalog;
pub mod config;
pub mod error;
pub mod facets;
pub mod field_path;
pub mod persistence;
pub mod predicate;
pub mod protocol;
pub mod server;
pub mod storage;
pub mod store;
pub mod transport;
pub mod types;

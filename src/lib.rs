pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod executor;
pub mod ingest;
pub mod model;
pub mod planner;
pub mod source;
pub mod stock;

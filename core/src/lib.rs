pub mod aggregate;
pub mod cgm;
pub mod db;
pub mod error;
pub mod export;
pub mod interval;
pub mod models;
pub mod range;
pub mod reconcile;
pub mod service;
pub mod store;

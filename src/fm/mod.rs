pub mod client;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod query;
pub mod records;
pub mod sync;
pub mod token;
pub mod transform;
pub mod transport;

pub mod auth;
pub mod clock;
pub mod config;
pub mod dates;
pub mod directory;
pub mod engine;
pub mod error;
pub mod limits;
pub mod maintenance;
pub mod model;
pub mod notify;
pub mod observability;
pub mod pricing;
pub mod sql;
pub mod store;
pub mod tls;
pub mod wire;

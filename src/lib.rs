pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod extractor;
pub mod quota;
pub mod routes;

pub mod app;
pub mod catalog;
pub mod config;
pub mod error;
pub mod middleware;
pub mod routes;

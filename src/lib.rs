// Library exports for Pioneers
// This allows integration tests and external code to use Pioneers modules

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod forum;
pub mod notify;
pub mod presence;
pub mod routes;
pub mod settings;
pub mod state;
pub mod sweeper;

// Library exports for Scribe
// This allows integration tests and external code to use Scribe modules

pub mod accounts;
pub mod auth;
pub mod config;
pub mod content;
pub mod db;
pub mod error;
pub mod extractors;
pub mod follows;
pub mod forms;
pub mod mail;
pub mod pagination;
pub mod roles;
pub mod routes;
pub mod state;

#[cfg(test)]
mod testing;

//! Mimic HTTP surface: platform routes, the agent service dispatcher, and
//! the CLI entrypoints.

pub mod auth;
pub mod cli;
pub mod error;
pub mod extract;
pub mod routes;
pub mod server;
pub mod services;

//! hearth real-time notification and presence fan-out server.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod config;
pub mod db;
pub mod dm;
pub mod follows;
pub mod groups;
pub mod membership;
pub mod notify;
pub mod presence;
pub mod routes;
pub mod state;
pub mod ws;

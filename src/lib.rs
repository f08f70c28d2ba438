//! Library crate for pairplay, exposing modules for binaries and integration tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod error;
pub mod gateways;
pub mod routes;
pub mod services;
pub mod state;

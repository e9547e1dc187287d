//! Core types, config, errors, and client protocol for Murmur.

pub mod config;
pub mod error;
pub mod protocol;
pub mod types;

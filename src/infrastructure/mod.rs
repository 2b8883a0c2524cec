//! Infrastructure layer modules
//!
//! This module contains shared infrastructure components:
//! - `config`: Application configuration and settings
//! - `crypto`: Frame cipher and device identity hashing
//! - `error`: Startup-scope error types
//! - `mysql`: MySQL connector with pool/standalone acquisition fallback

pub mod config;
pub mod crypto;
pub mod error;
pub mod mysql;

//! Configuration module for Image Squisher
//!
//! Handles loading configuration from TOML files, environment variable overrides
//! and validation of the options record before any job is scheduled.

pub mod config;

pub use config::*;

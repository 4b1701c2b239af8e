//! REST API client module for the gymlog backend.
//!
//! This module provides the `ApiClient` for communicating with the
//! backend: credential exchange, profile management, avatar upload,
//! and exercise history.
//!
//! Authenticated endpoints use JWT bearer tokens; expired access
//! tokens are rotated transparently through the refresh coordinator.

pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::ApiError;

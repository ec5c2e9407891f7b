//! Gemini Proxy - transparent recording gateway for the Gemini API
//!
//! This crate provides a daemon that forwards every request to the
//! Generative Language API unchanged and writes one interaction record
//! per request to a shared store.

pub mod config;
pub mod error;
pub mod interaction;
pub mod proxy;
pub mod storage;
pub mod testing;

pub use error::GatewayError;

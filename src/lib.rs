#![forbid(unsafe_code)]

//! Public entry point for the VidTube backend crate.
//!
//! The binary in `src/bin/backend.rs` only wires configuration and the HTTP
//! listener together; everything else (store, read models, tokens, media,
//! request handlers) lives here so it can be exercised from tests.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod models;
pub mod pagination;
pub mod read_models;
pub mod security;
pub mod store;

//! Varys service library crate.
//!
//! # Purpose
//! Exposes the API surface, auth and policy machinery, configuration, and
//! storage implementation for use by the binary and tests.
//!
//! # Notes
//! Module boundaries mirror the request path: authentication and identity
//! in `auth`, persistence in `store`, derivation in `derive`, and the HTTP
//! surface in `api`/`app`.
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod derive;
pub mod model;
pub mod observability;
pub mod store;

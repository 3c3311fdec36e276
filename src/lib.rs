//! Keel is a backend service scaffold whose core is its cross-cutting
//! request pipeline: a closed error taxonomy normalized at a single
//! boundary, masked structured logging with per-request correlation, and
//! flag-driven assembly of optional backing services at startup.
//!
//! - [`config`] — layered settings (file → env → CLI) and the feature flags.
//! - [`domain`] — the error taxonomy and the canonical `ErrorRecord`.
//! - [`logging`] — the masking engine and the tracing subscriber bootstrap.
//! - [`http`] — router wiring, correlation middleware, request logging,
//!   health probes.
//! - [`assembly`] — configuration loaders and the module strategy registry.
//! - [`services`] — database, cache, and secret-store collaborator handles.

pub mod assembly;
pub mod config;
pub mod domain;
pub mod error;
pub mod http;
pub mod logging;
pub mod services;

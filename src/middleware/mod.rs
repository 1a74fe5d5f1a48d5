//! Middleware for the request pipeline.
//!
//! The usual global order is [`Errors`], [`Logger`], [`Metrics`], [`Panics`]:
//! errors are classified outside everything else, so the logger and the
//! counters see the unclassified error. [`Authenticate`] and [`Authorize`] are
//! attached per route.

mod auth;
mod errors;
mod logger;
mod metrics;
mod panics;


pub use auth::{Authenticate, Authorize};
pub use errors::{Errors, INTERNAL_MESSAGE, VALIDATION_MESSAGE, classify};
pub use logger::Logger;
pub use metrics::Metrics;
pub use panics::Panics;

//! Core types shared by the calsync server and client: calendar entries
//! and tracing setup.

pub mod entry;
pub mod tracing;

pub use crate::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
pub use entry::CalendarEntry;

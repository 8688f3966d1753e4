//! Data models for the release window pipeline.
//!
//! Field names serialize in camelCase so the static front-end can consume them unchanged.

mod dataset;
mod market;
mod week;
mod window;

pub use dataset::*;
pub use market::*;
pub use week::*;
pub use window::*;

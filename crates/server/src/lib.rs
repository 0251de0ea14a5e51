//! HTTP front end of the alphavid conversion pipeline.

pub mod api;
pub mod metrics;
pub mod state;

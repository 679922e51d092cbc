//! # Alert engine integration tests
//!
//! These cover end-to-end scenarios of the engine, running against an
//! in-memory store, scripted forecasts, and recording email and push senders.
mod api;
mod outbreaks;
mod weather;

//! This module contains utilities for testing code built on the roster controller without a
//!  network: an in-memory connector with a scriptable server side, and builders for the JSON
//!  frames the server sends. They are used for testing the controller itself, but they are also
//!  exported for application testing.

pub mod frames;
pub mod snapshot;
pub mod transport;

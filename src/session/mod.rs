//! Multi-page capture sessions
//!
//! - [`controller`]: the per-session capture state machine
//! - [`registry`]: background execution and lookup of sessions

pub mod controller;
pub mod registry;

pub use controller::{SequenceController, SessionParams, Signal, Tick};
pub use registry::{SessionManager, SessionRequest};

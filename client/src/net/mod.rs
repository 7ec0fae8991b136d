//! Networking modules.
//!
//! SYSTEM CONTEXT
//! ==============
//! `api` defines the gateway endpoints the store calls and a `reqwest`
//! implementation that keeps the session cookie between calls.

pub mod api;

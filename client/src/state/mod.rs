//! Store state.
//!
//! SYSTEM CONTEXT
//! ==============
//! `pending` tracks in-flight calls for the loading indicator; `fhir` owns the
//! authentication and patient view-state and the operations that change it.

pub mod fhir;
pub mod pending;

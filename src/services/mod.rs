//! Gateway services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! `fhir` owns the start / complete / check / stop flow and the patient
//! reads. `session` and `pg_session` own session storage, and `smart` talks
//! to the FHIR authorization server and resource endpoints. Route handlers
//! only translate between HTTP and these calls.

pub mod fhir;
pub mod pg_session;
pub mod session;
pub mod smart;

//! Perihelion - SSO security gateway for the service management console
//!
//! Validates single-sign-on tickets against an external identity server,
//! enriches the authenticated profile with roles from a hot-reloading rule
//! file, and enforces a required-role check in front of the console.
//! It exposes all modules for testing purposes.

pub mod authn;
pub mod authz;
pub mod errors;
pub mod gate;
pub mod session;
pub mod settings;
pub mod web;

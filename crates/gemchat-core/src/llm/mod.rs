//! Generative backend abstractions.
//!
//! - `GenerativeBackend`: RPITIT trait for concrete backend clients
//! - `BoxBackend`: object-safe wrapper for dynamic dispatch

pub mod backend;
pub mod box_backend;

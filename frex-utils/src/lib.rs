//! Utility library for the FREX project

pub mod other;
pub mod serde;

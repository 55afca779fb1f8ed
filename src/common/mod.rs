//! Common types, errors and channel helpers shared across modules

pub mod channels;
pub mod errors;
pub mod types;

//! Core data types.

pub mod message;

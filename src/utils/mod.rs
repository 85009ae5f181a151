//! Shared helpers for payload parsing

pub mod json;
pub mod time;

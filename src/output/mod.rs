//! Output formatting for erp-sync.
//!
//! Every command renders either human-readable text or JSON.

mod json;
mod pretty;

pub use json::to_json;
pub use pretty::*;

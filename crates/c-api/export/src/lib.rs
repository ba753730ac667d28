//! cdylib shim re-exporting the `glot` C API symbols.

pub use glot_c_api::*;

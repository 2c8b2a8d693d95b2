//! CLI command implementations.

pub mod common;
pub mod grants;
pub mod synth;
pub mod validate;
pub mod version;

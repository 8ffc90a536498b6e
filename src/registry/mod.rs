//! Format plugins and the registry that resolves streams from them

pub mod manager;
pub mod plugin;

pub use manager::{file_extension, FormatRegistry};
pub use plugin::FormatPlugin;

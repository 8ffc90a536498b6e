//! Format plugin abstraction
//!
//! A plugin declares the formats it understands and their file extensions,
//! and constructs (closed) streams for a path. The registry decides which
//! plugins to try and opens the streams itself.

use crate::audio::{AudioStream, OpenFlags};
use std::path::Path;

/// Capability object for one family of containers
pub trait FormatPlugin: Send + Sync {
    /// Name of this plugin (for logging)
    fn name(&self) -> &'static str;

    /// Format names served by this plugin, e.g. `["Wave", "Au"]`
    fn formats(&self) -> Vec<String>;

    /// Lower-case extensions for one of the plugin's formats
    fn extensions(&self, format: &str) -> Vec<String>;

    /// Construct a closed stream for `path`
    ///
    /// `format` is `None` when the caller wants the plugin to sniff the
    /// container; otherwise it is one of [`formats`](Self::formats).
    fn create_stream(
        &self,
        path: &Path,
        format: Option<&str>,
        flags: OpenFlags,
    ) -> Box<dyn AudioStream>;
}

//! Format registry and stream resolution
//!
//! Plugins are registered at startup, in priority order. Resolution tries
//! plugins for the format hint, or for the file extension first and then
//! every remaining plugin, returning the first stream that opens.

use crate::audio::{AudioStream, OpenFlags};
use crate::error::{Error, Result};
use crate::registry::FormatPlugin;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Default)]
struct Indices {
    plugins: Vec<Arc<dyn FormatPlugin>>,
    formats: Vec<String>,
    extensions: Vec<String>,
    /// format -> plugin indices, registration order
    plugins_for_format: HashMap<String, Vec<usize>>,
    /// extension -> plugin indices, registration order
    plugins_for_extension: HashMap<String, Vec<usize>>,
    /// extension -> format names, registration order
    formats_for_extension: HashMap<String, Vec<String>>,
}

/// Aggregates every installed [`FormatPlugin`]
#[derive(Default)]
pub struct FormatRegistry {
    indices: RwLock<Indices>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin; earlier registrations win ties
    ///
    /// # Panics
    ///
    /// Panics if the plugin declares an extension that is not lower-case.
    pub fn register(&self, plugin: Arc<dyn FormatPlugin>) {
        let mut indices = self.indices.write();
        let index = indices.plugins.len();

        for format in plugin.formats() {
            if !indices.formats.contains(&format) {
                indices.formats.push(format.clone());
            }
            push_unique(indices.plugins_for_format.entry(format.clone()).or_default(), index);

            for extension in plugin.extensions(&format) {
                assert_eq!(
                    extension,
                    extension.to_lowercase(),
                    "plugin {} declared a mixed-case extension",
                    plugin.name()
                );

                if !indices.extensions.contains(&extension) {
                    indices.extensions.push(extension.clone());
                }
                push_unique(
                    indices.plugins_for_extension.entry(extension.clone()).or_default(),
                    index,
                );
                let formats = indices.formats_for_extension.entry(extension).or_default();
                if !formats.contains(&format) {
                    formats.push(format.clone());
                }
            }
        }

        debug!("Registered format plugin {}", plugin.name());
        indices.plugins.push(plugin);
    }

    pub fn available_formats(&self) -> Vec<String> {
        self.indices.read().formats.clone()
    }

    /// Extensions of every plugin serving `format`
    ///
    /// # Panics
    ///
    /// Panics if `format` was never registered.
    pub fn extensions_for_format(&self, format: &str) -> Vec<String> {
        let indices = self.indices.read();
        let plugins = indices
            .plugins_for_format
            .get(format)
            .unwrap_or_else(|| panic!("unknown format {:?}", format));

        let mut extensions = Vec::new();
        for &index in plugins {
            for extension in indices.plugins[index].extensions(format) {
                if !extensions.contains(&extension) {
                    extensions.push(extension);
                }
            }
        }
        extensions
    }

    pub fn all_extensions(&self) -> Vec<String> {
        self.indices.read().extensions.clone()
    }

    /// Formats registered for an extension; empty when unknown
    pub fn formats_for_extension(&self, extension: &str) -> Vec<String> {
        self.indices
            .read()
            .formats_for_extension
            .get(&extension.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Resolve and open a stream, reading tags
    pub fn resolve_stream(&self, path: &Path, format: Option<&str>) -> Result<Box<dyn AudioStream>> {
        self.resolve_stream_with(path, format, OpenFlags::with_tags())
    }

    /// Resolve and open a stream with explicit open flags
    pub fn resolve_stream_with(
        &self,
        path: &Path,
        format: Option<&str>,
        flags: OpenFlags,
    ) -> Result<Box<dyn AudioStream>> {
        if let Some(format) = format {
            let plugins = self.plugins_for(|indices| indices.plugins_for_format.get(format));
            return try_plugins(&plugins, path, Some(format), flags).ok_or_else(|| not_found(path));
        }

        let mut tried: Vec<usize> = Vec::new();

        if let Some(extension) = file_extension(path) {
            let plugins = self.plugins_for(|indices| indices.plugins_for_extension.get(&extension));
            if let Some(stream) = try_plugins(&plugins, path, None, flags) {
                return Ok(stream);
            }
            tried = plugins.iter().map(|(index, _)| *index).collect();
            trace!(
                "No plugin for .{} opened {}, trying all plugins",
                extension,
                path.display()
            );
        }

        let remaining: Vec<(usize, Arc<dyn FormatPlugin>)> = {
            let indices = self.indices.read();
            indices
                .plugins
                .iter()
                .enumerate()
                .filter(|(index, _)| !tried.contains(index))
                .map(|(index, plugin)| (index, Arc::clone(plugin)))
                .collect()
        };

        try_plugins(&remaining, path, None, flags).ok_or_else(|| not_found(path))
    }

    /// Snapshot the plugins of one index entry so opening happens unlocked
    fn plugins_for<F>(&self, select: F) -> Vec<(usize, Arc<dyn FormatPlugin>)>
    where
        F: FnOnce(&Indices) -> Option<&Vec<usize>>,
    {
        let indices = self.indices.read();
        select(&indices)
            .map(|list| {
                list.iter()
                    .map(|&index| (index, Arc::clone(&indices.plugins[index])))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn try_plugins(
    plugins: &[(usize, Arc<dyn FormatPlugin>)],
    path: &Path,
    format: Option<&str>,
    flags: OpenFlags,
) -> Option<Box<dyn AudioStream>> {
    for (_, plugin) in plugins {
        let mut stream = plugin.create_stream(path, format, flags);
        match stream.open() {
            Ok(()) => {
                debug!(
                    "{} opened {} as {}",
                    plugin.name(),
                    path.display(),
                    stream.resolved_format().unwrap_or("?")
                );
                return Some(stream);
            }
            Err(e) => {
                trace!("{} could not open {}: {}", plugin.name(), path.display(), e);
                stream.close();
            }
        }
    }
    None
}

fn not_found(path: &Path) -> Error {
    Error::NotFound {
        path: path.to_path_buf(),
    }
}

fn push_unique(list: &mut Vec<usize>, index: usize) {
    if !list.contains(&index) {
        list.push(index);
    }
}

/// Lower-cased suffix after the last `.` of the file name
pub fn file_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let (_, suffix) = name.rsplit_once('.')?;
    if suffix.is_empty() {
        None
    } else {
        Some(suffix.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{SampleGeometry, StreamCore, StreamInfo, StreamState};
    use crate::error::StreamError;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    /// Stream that opens only when its plugin is configured to accept
    struct MockStream {
        core: StreamCore,
        accept: bool,
        format: String,
    }

    impl AudioStream for MockStream {
        fn core(&self) -> &StreamCore {
            &self.core
        }

        fn open(&mut self) -> std::result::Result<(), StreamError> {
            if !self.accept {
                return Err(StreamError::Unrecognized("mock".to_string()));
            }
            self.core.set_info(StreamInfo {
                resolved_format: self.format.clone(),
                geometry: SampleGeometry::new(2, 16).unwrap(),
                frequency: 44100,
                total_samples: Some(0),
            })?;
            self.core.set_state(StreamState::Open);
            Ok(())
        }

        fn close(&mut self) {
            self.core.set_state(StreamState::Closed);
        }

        fn is_sequential(&self) -> bool {
            false
        }

        fn read(&mut self, _buf: &mut [u8]) -> std::result::Result<usize, StreamError> {
            Ok(0)
        }

        fn seek(&mut self, _position: u64) -> std::result::Result<(), StreamError> {
            Ok(())
        }

        fn position(&self) -> u64 {
            0
        }

        fn at_end(&self) -> bool {
            true
        }
    }

    struct MockPlugin {
        name: &'static str,
        formats: Vec<(&'static str, Vec<&'static str>)>,
        accept: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl FormatPlugin for MockPlugin {
        fn name(&self) -> &'static str {
            self.name
        }

        fn formats(&self) -> Vec<String> {
            self.formats.iter().map(|(f, _)| f.to_string()).collect()
        }

        fn extensions(&self, format: &str) -> Vec<String> {
            self.formats
                .iter()
                .find(|(f, _)| *f == format)
                .map(|(_, exts)| exts.iter().map(|e| e.to_string()).collect())
                .unwrap_or_default()
        }

        fn create_stream(
            &self,
            path: &Path,
            format: Option<&str>,
            flags: OpenFlags,
        ) -> Box<dyn AudioStream> {
            self.calls.lock().push(self.name);
            Box::new(MockStream {
                core: StreamCore::new(path, format, flags),
                accept: self.accept,
                format: format.unwrap_or(self.formats[0].0).to_string(),
            })
        }
    }

    fn plugin(
        name: &'static str,
        formats: Vec<(&'static str, Vec<&'static str>)>,
        accept: bool,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn FormatPlugin> {
        Arc::new(MockPlugin {
            name,
            formats,
            accept,
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn test_lookups() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = FormatRegistry::new();
        registry.register(plugin("wave", vec![("Wave", vec!["wav"]), ("Au", vec!["au"])], true, &calls));
        registry.register(plugin("mp3", vec![("Mp3", vec!["mp3"])], true, &calls));

        assert_eq!(registry.available_formats(), ["Wave", "Au", "Mp3"]);
        assert_eq!(registry.all_extensions(), ["wav", "au", "mp3"]);
        assert_eq!(registry.extensions_for_format("Au"), ["au"]);
        assert_eq!(registry.formats_for_extension("MP3"), ["Mp3"]);
        assert!(registry.formats_for_extension("unknownext").is_empty());
    }

    #[test]
    #[should_panic(expected = "unknown format")]
    fn test_extensions_for_unknown_format_panics() {
        FormatRegistry::new().extensions_for_format("Nope");
    }

    #[test]
    #[should_panic(expected = "mixed-case")]
    fn test_mixed_case_extension_panics() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        FormatRegistry::new().register(plugin("bad", vec![("Bad", vec!["WaV"])], true, &calls));
    }

    #[test]
    fn test_extension_plugins_tried_first() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = FormatRegistry::new();
        registry.register(plugin("first", vec![("A", vec!["a"])], true, &calls));
        registry.register(plugin("second", vec![("B", vec!["b"])], true, &calls));

        let stream = registry.resolve_stream(Path::new("song.b"), None).unwrap();
        assert_eq!(stream.resolved_format(), Some("B"));
        assert_eq!(*calls.lock(), ["second"]);
    }

    #[test]
    fn test_fallback_skips_already_tried_plugins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = FormatRegistry::new();
        registry.register(plugin("good", vec![("A", vec!["a"])], true, &calls));
        registry.register(plugin("wrong", vec![("B", vec!["b"])], false, &calls));
        registry.register(plugin("also_wrong", vec![("C", vec!["c", "b"])], false, &calls));

        let stream = registry.resolve_stream(Path::new("misnamed.b"), None).unwrap();
        assert_eq!(stream.resolved_format(), Some("A"));
        // each plugin is constructed at most once per resolution
        assert_eq!(*calls.lock(), ["wrong", "also_wrong", "good"]);
    }

    #[test]
    fn test_format_hint_does_not_fall_back() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = FormatRegistry::new();
        registry.register(plugin("good", vec![("A", vec!["a"])], true, &calls));
        registry.register(plugin("wrong", vec![("B", vec!["b"])], false, &calls));

        let err = registry.resolve_stream(Path::new("x.a"), Some("B")).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(*calls.lock(), ["wrong"]);
    }

    #[test]
    fn test_format_hint_tries_every_plugin_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = FormatRegistry::new();
        registry.register(plugin("p1", vec![("Shared", vec!["s"])], false, &calls));
        registry.register(plugin("p2", vec![("Shared", vec!["s"])], true, &calls));
        registry.register(plugin("p3", vec![("Shared", vec!["s"])], true, &calls));

        let stream = registry.resolve_stream(Path::new("noext"), Some("Shared")).unwrap();
        assert_eq!(stream.resolved_format(), Some("Shared"));
        assert_eq!(*calls.lock(), ["p1", "p2"]);
    }

    #[test]
    fn test_no_extension_tries_all_plugins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let registry = FormatRegistry::new();
        registry.register(plugin("p1", vec![("A", vec!["a"])], false, &calls));
        registry.register(plugin("p2", vec![("B", vec!["b"])], false, &calls));

        let err = registry.resolve_stream(Path::new("/tmp/noext"), None).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(*calls.lock(), ["p1", "p2"]);
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension(Path::new("a/b/Song.WAV")), Some("wav".to_string()));
        assert_eq!(file_extension(Path::new("archive.tar.gz")), Some("gz".to_string()));
        assert_eq!(file_extension(Path::new("dir.d/noext")), None);
        assert_eq!(file_extension(Path::new("trailing.")), None);
        assert_eq!(file_extension(&PathBuf::from(".au")), Some("au".to_string()));
    }
}

//! Built-in format plugins
//!
//! - `wave`: Raw, Wave and Au parsed natively
//! - `compressed`: FLAC, Mp3 and Ogg/Vorbis through symphonia
//! - `runtime`: the codec runtime shared by the symphonia plugins

pub mod compressed;
pub mod runtime;
pub mod wave;

pub use compressed::{CodecFamily, CompressedPlugin};
pub use runtime::CodecRuntime;
pub use wave::WavePlugin;

use crate::registry::FormatRegistry;
use std::sync::Arc;

/// Registry with every built-in plugin, the native container parser first
pub fn default_registry() -> FormatRegistry {
    let registry = FormatRegistry::new();
    let runtime = CodecRuntime::init();

    registry.register(Arc::new(WavePlugin));
    for family in [CodecFamily::Flac, CodecFamily::Mp3, CodecFamily::Vorbis] {
        registry.register(Arc::new(CompressedPlugin::new(family, Arc::clone(&runtime))));
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_formats() {
        let registry = default_registry();
        assert_eq!(
            registry.available_formats(),
            ["Raw", "Wave", "Au", "FLAC", "Mp3", "Ogg/Vorbis"]
        );
        assert_eq!(registry.formats_for_extension("MP3"), ["Mp3"]);
        assert_eq!(registry.extensions_for_format("Ogg/Vorbis"), ["ogg", "oga"]);
        assert!(registry.all_extensions().contains(&"au".to_string()));
    }
}

//! Decoded audio streams and the primitives they share
//!
//! - `geometry`: byte/sample arithmetic
//! - `tags`: upper-case tag multi-map
//! - `codecs`: G.711 and byte-order transforms for uncompressed containers
//! - `stream`: the `AudioStream` contract every format plugin implements

pub mod codecs;
pub mod geometry;
pub mod stream;
pub mod tags;

pub use geometry::SampleGeometry;
pub use stream::{AudioStream, OpenFlags, StreamCore, StreamInfo, StreamState};
pub use tags::TagStore;

//! FLAC, MP3 and Ogg/Vorbis streams decoded through symphonia
//!
//! One plugin type serves all three families; a [`CodecFamily`] decides the
//! format name, extensions and which symphonia codecs the plugin accepts.
//! Decoded packets are converted to interleaved 16-bit little-endian bytes.
//! Whatever does not fit the caller's buffer stays in a pending buffer and is
//! served first on the next read.

use crate::audio::tags::{self, TagStore};
use crate::audio::{AudioStream, OpenFlags, SampleGeometry, StreamCore, StreamInfo, StreamState};
use crate::error::StreamError;
use crate::formats::runtime::{CodecRuntime, RuntimeLease};
use crate::registry::FormatPlugin;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{
    CodecParameters, CodecType, Decoder, DecoderOptions, CODEC_TYPE_FLAC, CODEC_TYPE_MP1,
    CODEC_TYPE_MP2, CODEC_TYPE_MP3, CODEC_TYPE_VORBIS,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;
use tracing::{debug, trace};

// A decode error on a single packet is skipped; more than this many in a row
// is a read fault.
const MAX_DECODE_RETRIES: usize = 3;

/// Output sample width of every compressed stream
const OUTPUT_BITS: u16 = 16;

/// Codec families decoded through symphonia
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecFamily {
    Flac,
    Mp3,
    Vorbis,
}

impl CodecFamily {
    pub fn format_name(self) -> &'static str {
        match self {
            CodecFamily::Flac => "FLAC",
            CodecFamily::Mp3 => "Mp3",
            CodecFamily::Vorbis => "Ogg/Vorbis",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            CodecFamily::Flac => &["flac"],
            CodecFamily::Mp3 => &["mp3"],
            CodecFamily::Vorbis => &["ogg", "oga"],
        }
    }

    fn plugin_name(self) -> &'static str {
        match self {
            CodecFamily::Flac => "flac",
            CodecFamily::Mp3 => "mp3",
            CodecFamily::Vorbis => "vorbis",
        }
    }

    fn accepts(self, codec: CodecType) -> bool {
        match self {
            CodecFamily::Flac => codec == CODEC_TYPE_FLAC,
            CodecFamily::Mp3 => {
                codec == CODEC_TYPE_MP3 || codec == CODEC_TYPE_MP2 || codec == CODEC_TYPE_MP1
            }
            CodecFamily::Vorbis => codec == CODEC_TYPE_VORBIS,
        }
    }
}

/// Plugin for one symphonia-backed codec family
pub struct CompressedPlugin {
    family: CodecFamily,
    runtime: Arc<CodecRuntime>,
}

impl CompressedPlugin {
    pub fn new(family: CodecFamily, runtime: Arc<CodecRuntime>) -> Self {
        Self { family, runtime }
    }

    pub fn family(&self) -> CodecFamily {
        self.family
    }
}

impl FormatPlugin for CompressedPlugin {
    fn name(&self) -> &'static str {
        self.family.plugin_name()
    }

    fn formats(&self) -> Vec<String> {
        vec![self.family.format_name().to_string()]
    }

    fn extensions(&self, format: &str) -> Vec<String> {
        if format != self.family.format_name() {
            return Vec::new();
        }
        self.family
            .extensions()
            .iter()
            .map(|ext| ext.to_string())
            .collect()
    }

    fn create_stream(
        &self,
        path: &Path,
        format: Option<&str>,
        flags: OpenFlags,
    ) -> Box<dyn AudioStream> {
        Box::new(CompressedStream::new(
            path,
            format,
            flags,
            self.family,
            Arc::clone(&self.runtime),
        ))
    }
}

/// Probed container before a decoder is attached
struct Probed {
    format: Box<dyn FormatReader>,
    track_id: u32,
    params: CodecParameters,
    tags: TagStore,
    sequential: bool,
}

/// Live decoder state of an open stream
struct Decoding {
    _lease: RuntimeLease,
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    channels: usize,
    frequency: u32,
    sequential: bool,
    pending: Vec<u8>,
    pending_offset: usize,
    /// Frames to drop from the next decoded packets after a seek
    skip_frames: u64,
    exhausted: bool,
}

impl Decoding {
    fn has_pending(&self) -> bool {
        self.pending_offset < self.pending.len()
    }

    /// Decode the next packet into `pending`; `Ok(false)` at end of stream
    fn decode_next(&mut self) -> Result<bool, StreamError> {
        let mut decode_errors = 0;

        loop {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    self.exhausted = true;
                    return Ok(false);
                }
                Err(e) => return Err(e.into()),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    decode_errors += 1;
                    if decode_errors > MAX_DECODE_RETRIES {
                        return Err(StreamError::Decode(e.to_string()));
                    }
                    trace!("Skipping corrupted packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            decode_errors = 0;

            let spec = *decoded.spec();
            if spec.channels.count() != self.channels || spec.rate != self.frequency {
                return Err(StreamError::Decode(format!(
                    "packet has {} channels @ {}Hz, stream opened as {} channels @ {}Hz",
                    spec.channels.count(),
                    spec.rate,
                    self.channels,
                    self.frequency
                )));
            }

            let frames = decoded.frames() as u64;
            if frames == 0 {
                continue;
            }

            let mut buffer = SampleBuffer::<i16>::new(decoded.capacity() as u64, spec);
            buffer.copy_interleaved_ref(decoded);

            let skip = self.skip_frames.min(frames);
            self.skip_frames -= skip;
            let samples = &buffer.samples()[skip as usize * self.channels..];
            if samples.is_empty() {
                continue;
            }

            self.pending.clear();
            self.pending_offset = 0;
            for sample in samples {
                self.pending.extend_from_slice(&sample.to_le_bytes());
            }
            return Ok(true);
        }
    }
}

/// Stream over one FLAC, MP3 or Ogg/Vorbis file
pub struct CompressedStream {
    core: StreamCore,
    family: CodecFamily,
    runtime: Arc<CodecRuntime>,
    decoding: Option<Decoding>,
    position: u64,
}

impl CompressedStream {
    pub fn new(
        path: &Path,
        format: Option<&str>,
        flags: OpenFlags,
        family: CodecFamily,
        runtime: Arc<CodecRuntime>,
    ) -> Self {
        Self {
            core: StreamCore::new(path, format, flags),
            family,
            runtime,
            decoding: None,
            position: 0,
        }
    }

    fn probe(&self, read_tags: bool) -> Result<Probed, StreamError> {
        if let Some(requested) = self.core.format() {
            if requested != self.family.format_name() {
                return Err(StreamError::Unrecognized(format!(
                    "'{}' is not served by the {} plugin",
                    requested,
                    self.family.plugin_name()
                )));
            }
        }

        let file = File::open(self.core.path())?;
        let sequential = self.core.flags().sequential || !file.metadata()?.is_file();
        let source: Box<dyn MediaSource> = if sequential {
            Box::new(ReadOnlySource::new(file))
        } else {
            Box::new(file)
        };
        let mss = MediaSourceStream::new(source, Default::default());

        let mut hint = Hint::new();
        hint.with_extension(self.family.extensions()[0]);

        let mut probed = self.runtime.probe().format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )?;

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| self.family.accepts(t.codec_params.codec))
            .ok_or_else(|| {
                StreamError::Unrecognized(format!("no {} track", self.family.format_name()))
            })?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let mut tags = TagStore::new();
        if read_tags {
            if let Some(metadata) = probed.metadata.get() {
                if let Some(revision) = metadata.current() {
                    collect_tags(revision, &mut tags);
                }
            }
            if let Some(revision) = probed.format.metadata().current() {
                collect_tags(revision, &mut tags);
            }
        }

        Ok(Probed {
            format: probed.format,
            track_id,
            params,
            tags,
            sequential,
        })
    }

    /// Probe, fix the length and attach a decoder
    fn start_decoding(&self, read_tags: bool) -> Result<(Decoding, StreamInfo, TagStore), StreamError> {
        let mut probed = self.probe(read_tags)?;

        let channels = probed
            .params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| StreamError::Unsupported("channel layout not declared".to_string()))?;
        let frequency = probed
            .params
            .sample_rate
            .ok_or_else(|| StreamError::Unsupported("sample rate not declared".to_string()))?;
        let geometry = u16::try_from(channels)
            .ok()
            .and_then(|channels| SampleGeometry::new(channels, OUTPUT_BITS))
            .ok_or_else(|| StreamError::Unsupported(format!("{} channels", channels)))?;

        let total_samples = match probed.params.n_frames {
            Some(frames) => Some(frames),
            None if probed.sequential => None,
            None => {
                let counted = count_frames(probed.format.as_mut(), probed.track_id)?;
                debug!(
                    "{}: container has no frame count, scanned {} frames",
                    self.core.path().display(),
                    counted
                );
                let tags = std::mem::take(&mut probed.tags);
                probed = self.probe(false)?;
                probed.tags = tags;
                Some(counted)
            }
        };

        let info = StreamInfo {
            resolved_format: self.family.format_name().to_string(),
            geometry,
            frequency,
            total_samples,
        };
        // reject surround layouts before building a decoder for them
        info.check_layout()?;

        let decoder = self
            .runtime
            .codecs()
            .make(&probed.params, &DecoderOptions::default())?;

        let decoding = Decoding {
            _lease: self.runtime.lease(),
            format: probed.format,
            decoder,
            track_id: probed.track_id,
            channels,
            frequency,
            sequential: probed.sequential,
            pending: Vec::new(),
            pending_offset: 0,
            skip_frames: 0,
            exhausted: false,
        };
        Ok((decoding, info, probed.tags))
    }

    fn rebuild(&mut self) -> Result<(), StreamError> {
        self.decoding = None;
        let rebuilt = self
            .start_decoding(false)
            .and_then(|(decoding, info, _)| self.core.check_rebuild(&info).map(|_| decoding));

        match rebuilt {
            Ok(decoding) => {
                self.decoding = Some(decoding);
                self.position = 0;
                Ok(())
            }
            Err(e) => {
                debug!("{}: rebuild failed: {}", self.core.path().display(), e);
                self.core.set_state(StreamState::Failed);
                Err(e)
            }
        }
    }
}

impl AudioStream for CompressedStream {
    fn core(&self) -> &StreamCore {
        &self.core
    }

    fn open(&mut self) -> Result<(), StreamError> {
        if self.core.state() == StreamState::Open {
            return Ok(());
        }
        self.core.set_state(StreamState::Opening);

        let read_tags = self.core.flags().read_tags;
        let started = self
            .start_decoding(read_tags)
            .and_then(|(decoding, info, tags)| self.core.set_info(info).map(|_| (decoding, tags)));

        match started {
            Ok((decoding, tags)) => {
                if read_tags {
                    self.core.set_tags(tags);
                }
                self.decoding = Some(decoding);
                self.position = 0;
                self.core.set_state(StreamState::Open);
                if let Some(info) = self.core.info() {
                    debug!("Opened {}: {}", self.core.path().display(), info);
                }
                Ok(())
            }
            Err(e) => {
                self.core.set_state(StreamState::Closed);
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        self.decoding = None;
        if self.core.state() != StreamState::Failed {
            self.core.set_state(StreamState::Closed);
        }
    }

    fn is_sequential(&self) -> bool {
        match &self.decoding {
            Some(decoding) => decoding.sequential,
            None => self.core.flags().sequential,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.core.ensure_open()?;
        let geometry = self.core.geometry()?;
        let size = self.core.info().and_then(StreamInfo::size);
        let decoding = self.decoding.as_mut().ok_or(StreamError::NotOpen)?;

        let mut want = geometry.truncated_size(buf.len());
        if let (false, Some(size)) = (decoding.sequential, size) {
            let remaining = size.saturating_sub(self.position);
            want = want.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }

        let mut filled = 0;
        while filled < want {
            if decoding.has_pending() {
                let start = decoding.pending_offset;
                let n = (want - filled).min(decoding.pending.len() - start);
                buf[filled..filled + n].copy_from_slice(&decoding.pending[start..start + n]);
                decoding.pending_offset += n;
                filled += n;
                continue;
            }
            if decoding.exhausted || !decoding.decode_next()? {
                break;
            }
        }
        self.position += filled as u64;

        if decoding.sequential {
            let decoded = geometry.bytes_to_samples(self.position);
            let drained = decoding.exhausted && !decoding.has_pending();
            let overran = size.map_or(false, |size| self.position > size);
            if drained || overran {
                self.core.revise_total_samples(decoded);
            }
        }

        Ok(filled)
    }

    fn seek(&mut self, position: u64) -> Result<(), StreamError> {
        self.core.ensure_open()?;
        let geometry = self.core.geometry()?;

        if !geometry.is_aligned(position) {
            return Err(StreamError::InvalidSeek {
                position,
                reason: format!("not aligned to {}-byte samples", geometry.chunk_size()),
            });
        }
        if self.is_sequential() {
            if position != 0 {
                return Err(StreamError::InvalidSeek {
                    position,
                    reason: "sequential source can only rewind to the start".to_string(),
                });
            }
            return self.rebuild();
        }

        let size = self.size().unwrap_or(0);
        if position > size {
            return Err(StreamError::InvalidSeek {
                position,
                reason: format!("beyond end of stream ({} bytes)", size),
            });
        }

        let decoding = self.decoding.as_mut().ok_or(StreamError::NotOpen)?;
        decoding.pending.clear();
        decoding.pending_offset = 0;

        if position == size {
            decoding.exhausted = true;
            self.position = position;
            return Ok(());
        }

        let frame = geometry.bytes_to_samples(position);
        let seeked = decoding
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id: decoding.track_id,
                },
            )
            .map_err(|e| StreamError::InvalidSeek {
                position,
                reason: e.to_string(),
            })?;

        decoding.decoder.reset();
        decoding.skip_frames = seeked.required_ts.saturating_sub(seeked.actual_ts);
        decoding.exhausted = false;
        self.position = position;

        trace!(
            "Seeked to frame {} (landed {}, skipping {})",
            frame,
            seeked.actual_ts,
            decoding.skip_frames
        );
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn at_end(&self) -> bool {
        match &self.decoding {
            Some(decoding) if decoding.sequential => decoding.exhausted && !decoding.has_pending(),
            Some(decoding) => {
                let past_size = self.size().map_or(false, |size| self.position >= size);
                past_size || (decoding.exhausted && !decoding.has_pending())
            }
            None => true,
        }
    }
}

/// Sum packet durations of a track, consuming the reader
fn count_frames(format: &mut dyn FormatReader, track_id: u32) -> Result<u64, StreamError> {
    let mut frames = 0;
    loop {
        match format.next_packet() {
            Ok(packet) if packet.track_id() == track_id => frames += packet.dur(),
            Ok(_) => {}
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Ok(frames)
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn collect_tags(revision: &MetadataRevision, store: &mut TagStore) {
    for tag in revision.tags() {
        let key = match tag.std_key {
            Some(StandardTagKey::TrackTitle) => tags::TITLE,
            Some(StandardTagKey::Artist) => tags::ARTIST,
            Some(StandardTagKey::Album) => tags::ALBUM,
            Some(StandardTagKey::Genre) => tags::GENRE,
            Some(StandardTagKey::Date) => tags::DATE,
            Some(StandardTagKey::TrackNumber) => tags::TRACK_NUMBER,
            _ => tag.key.as_str(),
        };
        store.insert(key, tag.value.to_string());
    }
}

//! Native parser for uncompressed containers: RIFF/WAVE, Sun AU and headerless raw
//!
//! The sample data of these containers is read straight from the file and
//! passed through a [`SampleCodec`] so the caller always receives
//! little-endian PCM with unsigned 8-bit samples.

use crate::audio::codecs::SampleCodec;
use crate::audio::tags::{self, TagStore};
use crate::audio::{AudioStream, OpenFlags, SampleGeometry, StreamCore, StreamInfo, StreamState};
use crate::error::StreamError;
use crate::registry::{file_extension, FormatPlugin};
use lofty::{Accessor, ItemKey, Probe, TaggedFileExt};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, trace};

pub const RAW: &str = "Raw";
pub const WAVE: &str = "Wave";
pub const AU: &str = "Au";

/// Plugin serving `Raw` (`.raw`), `Wave` (`.wav`) and `Au` (`.au`)
#[derive(Debug, Default)]
pub struct WavePlugin;

impl FormatPlugin for WavePlugin {
    fn name(&self) -> &'static str {
        "wave"
    }

    fn formats(&self) -> Vec<String> {
        vec![RAW.to_string(), WAVE.to_string(), AU.to_string()]
    }

    fn extensions(&self, format: &str) -> Vec<String> {
        match Container::from_name(format) {
            Some(container) => vec![container.extension().to_string()],
            None => Vec::new(),
        }
    }

    fn create_stream(
        &self,
        path: &Path,
        format: Option<&str>,
        flags: OpenFlags,
    ) -> Box<dyn AudioStream> {
        Box::new(WaveStream::new(path, format, flags))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Raw,
    Wave,
    Au,
}

impl Container {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            RAW => Some(Container::Raw),
            WAVE => Some(Container::Wave),
            AU => Some(Container::Au),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Container::Raw => RAW,
            Container::Wave => WAVE,
            Container::Au => AU,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            Container::Raw => "raw",
            Container::Wave => "wav",
            Container::Au => "au",
        }
    }

    fn magic(self) -> Option<&'static [u8; 4]> {
        match self {
            Container::Raw => None,
            Container::Wave => Some(b"RIFF"),
            Container::Au => Some(b".snd"),
        }
    }
}

/// What a container header declares about its sample data
#[derive(Debug, Clone, Copy)]
struct Header {
    container: Container,
    codec: SampleCodec,
    channels: u16,
    /// Bits per decoded (output) sample
    bits: u16,
    frequency: u32,
    /// Container bytes of sample data; `None` when the header does not say
    data_len: Option<u64>,
}

/// An opened file positioned inside the sample data
struct Source {
    reader: BufReader<File>,
    codec: SampleCodec,
    sequential: bool,
    /// File offset of the first data byte (random access only)
    data_start: u64,
    /// Decoded length in bytes, when known
    output_len: Option<u64>,
    exhausted: bool,
    scratch: Vec<u8>,
}

/// Stream over one Raw/Wave/Au file
pub struct WaveStream {
    core: StreamCore,
    source: Option<Source>,
    position: u64,
}

impl WaveStream {
    pub fn new(path: &Path, format: Option<&str>, flags: OpenFlags) -> Self {
        Self {
            core: StreamCore::new(path, format, flags),
            source: None,
            position: 0,
        }
    }

    fn open_source(&self) -> Result<(Source, StreamInfo), StreamError> {
        let path = self.core.path();
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        let sequential = self.core.flags().sequential || !metadata.is_file();
        let mut reader = BufReader::new(file);

        let hinted = match self.core.format() {
            Some(name) => Some(Container::from_name(name).ok_or_else(|| {
                StreamError::Unrecognized(format!("'{}' is not served by the wave plugin", name))
            })?),
            None => None,
        };

        let container = match hinted {
            Some(Container::Raw) => Container::Raw,
            _ => sniff(&mut reader, hinted, file_extension(path).as_deref())?,
        };

        let header = match container {
            Container::Raw => Header {
                container,
                codec: SampleCodec::Linear,
                channels: 1,
                bits: 8,
                frequency: 8000,
                data_len: None,
            },
            Container::Wave => parse_riff(&mut reader)?,
            Container::Au => parse_au(&mut reader)?,
        };

        let geometry = SampleGeometry::new(header.channels, header.bits).ok_or_else(|| {
            StreamError::Unsupported(format!(
                "{} channels of {} bits",
                header.channels, header.bits
            ))
        })?;

        let (data_start, data_len) = if sequential {
            (0, header.data_len)
        } else {
            let start = reader.stream_position()?;
            let available = metadata.len().saturating_sub(start);
            let len = match header.data_len {
                Some(declared) if declared > available => {
                    debug!(
                        "{}: data chunk declares {} bytes but only {} remain",
                        path.display(),
                        declared,
                        available
                    );
                    available
                }
                Some(declared) => declared,
                None => available,
            };
            (start, Some(len))
        };

        let expansion = header.codec.expansion() as u64;
        let output_len = data_len.map(|len| {
            let chunk = geometry.chunk_size() as u64;
            (len * expansion) / chunk * chunk
        });

        let info = StreamInfo {
            resolved_format: header.container.name().to_string(),
            geometry,
            frequency: header.frequency,
            total_samples: output_len.map(|len| geometry.bytes_to_samples(len)),
        };

        let source = Source {
            reader,
            codec: header.codec,
            sequential,
            data_start,
            output_len,
            exhausted: false,
            scratch: Vec::new(),
        };
        Ok((source, info))
    }

    /// Reopen a sequential source and verify it still has the same shape
    fn rebuild(&mut self) -> Result<(), StreamError> {
        self.source = None;
        let rebuilt = self
            .open_source()
            .and_then(|(source, info)| self.core.check_rebuild(&info).map(|_| source));

        match rebuilt {
            Ok(source) => {
                self.source = Some(source);
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

impl AudioStream for WaveStream {
    fn core(&self) -> &StreamCore {
        &self.core
    }

    fn open(&mut self) -> Result<(), StreamError> {
        if self.core.state() == StreamState::Open {
            return Ok(());
        }
        self.core.set_state(StreamState::Opening);

        let opened = self
            .open_source()
            .and_then(|(source, info)| self.core.set_info(info).map(|_| source));

        let source = match opened {
            Ok(source) => source,
            Err(e) => {
                self.core.set_state(StreamState::Closed);
                return Err(e);
            }
        };

        if self.core.flags().read_tags {
            let tags = match self.core.info().map(|info| info.resolved_format.as_str()) {
                Some(WAVE) if !source.sequential => read_riff_tags(self.core.path()),
                _ => TagStore::new(),
            };
            self.core.set_tags(tags);
        }

        self.source = Some(source);
        self.position = 0;
        self.core.set_state(StreamState::Open);

        if let Some(info) = self.core.info() {
            debug!("Opened {}: {}", self.core.path().display(), info);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.source = None;
        if self.core.state() != StreamState::Failed {
            self.core.set_state(StreamState::Closed);
        }
    }

    fn is_sequential(&self) -> bool {
        match &self.source {
            Some(source) => source.sequential,
            None => self.core.flags().sequential,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.core.ensure_open()?;
        let geometry = self.core.geometry()?;
        let source = self.source.as_mut().ok_or(StreamError::NotOpen)?;

        let mut want = geometry.truncated_size(buf.len());
        if let Some(len) = source.output_len {
            let remaining = len.saturating_sub(self.position);
            want = want.min(usize::try_from(remaining).unwrap_or(usize::MAX));
        }
        if want == 0 || source.exhausted {
            return Ok(0);
        }

        let expansion = source.codec.expansion();
        let input_want = want / expansion;
        source.scratch.resize(input_want, 0);
        let mut got = read_full(&mut source.reader, &mut source.scratch)?;

        if got < input_want {
            if source.output_len.is_some() {
                return Err(StreamError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "source ended before its declared length",
                )));
            }
            // trailing partial sample of an unterminated source is dropped
            source.exhausted = true;
            got = geometry.truncated_size(got * expansion) / expansion;
        }

        let produced = got * expansion;
        source.codec.decode(&source.scratch[..got], &mut buf[..produced]);
        self.position += produced as u64;

        if source.exhausted {
            let total = geometry.bytes_to_samples(self.position);
            self.core.revise_total_samples(total);
        }

        trace!("Read {} bytes at {}", produced, self.position - produced as u64);
        Ok(produced)
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

        let source = self.source.as_mut().ok_or(StreamError::NotOpen)?;
        let size = source.output_len.unwrap_or(0);
        if position > size {
            return Err(StreamError::InvalidSeek {
                position,
                reason: format!("beyond end of stream ({} bytes)", size),
            });
        }

        let offset = source.data_start + position / source.codec.expansion() as u64;
        source.reader.seek(SeekFrom::Start(offset))?;
        source.exhausted = false;
        self.position = position;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn at_end(&self) -> bool {
        match &self.source {
            Some(source) => match source.output_len {
                Some(len) => self.position >= len,
                None => source.exhausted,
            },
            None => true,
        }
    }
}

/// Pick the container by magic, checking the extension's container first
fn sniff(
    reader: &mut impl Read,
    hinted: Option<Container>,
    extension: Option<&str>,
) -> Result<Container, StreamError> {
    let magic: [u8; 4] = read_array(reader)?;

    let candidates = match hinted {
        Some(container) => vec![container],
        None if extension == Some("au") => vec![Container::Au, Container::Wave],
        None => vec![Container::Wave, Container::Au],
    };

    candidates
        .into_iter()
        .find(|container| container.magic() == Some(&magic))
        .ok_or_else(|| StreamError::Unrecognized("no RIFF or AU signature".to_string()))
}

fn parse_riff(reader: &mut impl Read) -> Result<Header, StreamError> {
    let _riff_len = u32::from_le_bytes(read_array(reader)?);
    let form: [u8; 4] = read_array(reader)?;
    if &form != b"WAVE" {
        return Err(StreamError::Unrecognized("RIFF form is not WAVE".to_string()));
    }

    let mut format: Option<(SampleCodec, u16, u32, u16)> = None;

    loop {
        let id: [u8; 4] = read_array(reader)?;
        let len = u32::from_le_bytes(read_array(reader)?) as u64;

        match &id {
            b"fmt " => {
                if len < 16 {
                    return Err(StreamError::Unrecognized(format!("fmt chunk of {} bytes", len)));
                }
                let tag = u16::from_le_bytes(read_array(reader)?);
                let channels = u16::from_le_bytes(read_array(reader)?);
                let frequency = u32::from_le_bytes(read_array(reader)?);
                let _byte_rate = u32::from_le_bytes(read_array(reader)?);
                let _block_align = u16::from_le_bytes(read_array(reader)?);
                let bits = u16::from_le_bytes(read_array(reader)?);
                skip(reader, len - 16 + (len & 1))?;

                let (codec, bits) = match (tag, bits) {
                    (1, bits) => (SampleCodec::Linear, bits),
                    (7, 8) => (SampleCodec::ULaw, 16),
                    (7, bits) => {
                        return Err(StreamError::Unsupported(format!("{}-bit u-law", bits)))
                    }
                    (tag, _) => {
                        return Err(StreamError::Unsupported(format!("WAVE format tag {:#06x}", tag)))
                    }
                };
                format = Some((codec, channels, frequency, bits));
            }
            b"data" => {
                let (codec, channels, frequency, bits) = format.ok_or_else(|| {
                    StreamError::Unrecognized("data chunk before fmt chunk".to_string())
                })?;
                return Ok(Header {
                    container: Container::Wave,
                    codec,
                    channels,
                    bits,
                    frequency,
                    data_len: Some(len),
                });
            }
            _ => {
                trace!("Skipping RIFF chunk {:?} ({} bytes)", String::from_utf8_lossy(&id), len);
                skip(reader, len + (len & 1))?;
            }
        }
    }
}

fn parse_au(reader: &mut impl Read) -> Result<Header, StreamError> {
    let data_offset = u32::from_be_bytes(read_array(reader)?);
    let data_len = u32::from_be_bytes(read_array(reader)?);
    let encoding = u32::from_be_bytes(read_array(reader)?);
    let frequency = u32::from_be_bytes(read_array(reader)?);
    let channels = u32::from_be_bytes(read_array(reader)?);

    if data_offset < 24 {
        return Err(StreamError::Unrecognized(format!("AU data offset {}", data_offset)));
    }
    skip(reader, u64::from(data_offset - 24))?;

    let (codec, bits) = match encoding {
        1 => (SampleCodec::ULaw, 16),
        2 => (SampleCodec::Signed8, 8),
        3 => (SampleCodec::Swap16, 16),
        27 => (SampleCodec::ALaw, 16),
        other => return Err(StreamError::Unsupported(format!("AU encoding {}", other))),
    };
    let channels = u16::try_from(channels)
        .map_err(|_| StreamError::Unsupported(format!("{} channels", channels)))?;

    Ok(Header {
        container: Container::Au,
        codec,
        channels,
        bits,
        frequency,
        data_len: if data_len == u32::MAX {
            None
        } else {
            Some(u64::from(data_len))
        },
    })
}

fn read_array<const N: usize>(reader: &mut impl Read) -> Result<[u8; N], StreamError> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StreamError::Unrecognized("truncated header".to_string()),
        _ => StreamError::Io(e),
    })?;
    Ok(bytes)
}

fn skip(reader: &mut impl Read, count: u64) -> Result<(), StreamError> {
    let skipped = io::copy(&mut reader.take(count), &mut io::sink())?;
    if skipped < count {
        return Err(StreamError::Unrecognized("truncated header".to_string()));
    }
    Ok(())
}

/// Read until `buf` is full or the source ends
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_riff_tags(path: &Path) -> TagStore {
    let mut store = TagStore::new();

    let tagged_file = match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(file) => file,
        Err(e) => {
            debug!("No readable tags in {}: {}", path.display(), e);
            return store;
        }
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        if let Some(title) = tag.title() {
            store.insert(tags::TITLE, title.to_string());
        }
        if let Some(artist) = tag.artist() {
            store.insert(tags::ARTIST, artist.to_string());
        }
        if let Some(album) = tag.album() {
            store.insert(tags::ALBUM, album.to_string());
        }
        if let Some(genre) = tag.genre() {
            store.insert(tags::GENRE, genre.to_string());
        }
        if let Some(date) = tag.get_string(&ItemKey::RecordingDate) {
            store.insert(tags::DATE, date.to_string());
        } else if let Some(year) = tag.year() {
            store.insert(tags::DATE, year.to_string());
        }
        if let Some(track) = tag.track() {
            store.insert(tags::TRACK_NUMBER, track.to_string());
        }
    }

    store
}

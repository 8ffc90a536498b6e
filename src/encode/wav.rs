//! 16-bit PCM WAV output through hound, tagged with a RIFF INFO list

use crate::audio::tags::{self, TagStore};
use crate::encode::{EncodeParams, Encoder, EncoderFactory};
use crate::error::EncodeError;
use hound::{SampleFormat, WavSpec, WavWriter};
use lofty::{Accessor, ItemKey, Tag, TagExt, TagType};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct WavEncoderFactory;

impl EncoderFactory for WavEncoderFactory {
    fn name(&self) -> &'static str {
        "WAV"
    }

    fn extension(&self) -> &'static str {
        "wav"
    }

    fn create(
        &self,
        file: File,
        destination: &Path,
        params: &EncodeParams,
        tags: &TagStore,
    ) -> Result<Box<dyn Encoder>, EncodeError> {
        params.validate()?;

        let spec = WavSpec {
            channels: params.channels,
            sample_rate: params.frequency,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::new(BufWriter::new(file), spec)?;

        Ok(Box::new(WavEncoder {
            writer,
            destination: destination.to_path_buf(),
            tags: tags.clone(),
        }))
    }
}

pub struct WavEncoder {
    writer: WavWriter<BufWriter<File>>,
    destination: PathBuf,
    tags: TagStore,
}

impl Encoder for WavEncoder {
    fn write_samples(&mut self, samples: &[i16]) -> Result<(), EncodeError> {
        let mut writer = self.writer.get_i16_writer(samples.len() as u32);
        for &sample in samples {
            writer.write_sample(sample);
        }
        writer.flush()?;
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<(), EncodeError> {
        let WavEncoder {
            writer,
            destination,
            tags,
        } = *self;
        writer.finalize()?;

        if !tags.is_empty() {
            write_info_tags(&destination, &tags);
        }
        Ok(())
    }
}

/// Tags are best effort: a file without them is still a good conversion
fn write_info_tags(path: &Path, store: &TagStore) {
    let mut tag = Tag::new(TagType::RiffInfo);

    if let Some(title) = store.first(tags::TITLE) {
        tag.set_title(title.to_string());
    }
    if let Some(artist) = store.first(tags::ARTIST) {
        tag.set_artist(artist.to_string());
    }
    if let Some(album) = store.first(tags::ALBUM) {
        tag.set_album(album.to_string());
    }
    if let Some(genre) = store.first(tags::GENRE) {
        tag.set_genre(genre.to_string());
    }
    if let Some(date) = store.first(tags::DATE) {
        tag.insert_text(ItemKey::RecordingDate, date.to_string());
    }
    if let Some(track) = store
        .first(tags::TRACK_NUMBER)
        .and_then(|value| value.split('/').next())
        .and_then(|value| value.trim().parse().ok())
    {
        tag.set_track(track);
    }

    match tag.save_to_path(path) {
        Ok(()) => debug!("Wrote {} tag items to {}", tag.len(), path.display()),
        Err(e) => warn!("Could not write tags to {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(channels: u16) -> EncodeParams {
        EncodeParams {
            channels,
            frequency: 22050,
            quality: 0.4,
        }
    }

    #[test]
    fn test_writes_readable_wav() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let file = File::create(&path).unwrap();

        let mut encoder = WavEncoderFactory
            .create(file, &path, &params(2), &TagStore::new())
            .unwrap();
        encoder.write_samples(&[1, -1, 2, -2]).unwrap();
        encoder.write_samples(&[3, -3]).unwrap();
        encoder.finish().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 22050);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, -1, 2, -2, 3, -3]);
    }

    #[test]
    fn test_rejects_bad_quality() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.wav");
        let file = File::create(&path).unwrap();

        let mut bad = params(1);
        bad.quality = 2.0;
        let result = WavEncoderFactory.create(file, &path, &bad, &TagStore::new());
        assert!(matches!(result, Err(EncodeError::Parameters(_))));
    }
}

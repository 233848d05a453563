//! File-backed sample source decoding with symphonia.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use oeaudio_core::{Error, Result};
use symphonia::core::{
    audio::SampleBuffer,
    codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL},
    formats::{FormatOptions, FormatReader, SeekMode, SeekTo},
    io::{MediaSourceStream, MediaSourceStreamOptions},
    meta::MetadataOptions,
    probe::Hint,
};
use tracing::{debug, info, warn};

use super::{ClickSynth, SampleSource};

/// Demuxer and decoder for the first audio track of a file.
struct Decoding {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    n_frames: Option<u64>,
}

impl Decoding {
    fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
            _ => Error::UnreadableFormat {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;
        let mss = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let unreadable = |reason: String| Error::UnreadableFormat {
            path: path.to_path_buf(),
            reason,
        };

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| unreadable(format!("Failed to probe format: {e}")))?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| unreadable("No audio tracks found".to_string()))?;

        let track_id = track.id;
        let sample_rate = track
            .codec_params
            .sample_rate
            .ok_or_else(|| unreadable("Unknown sample rate".to_string()))?;
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| unreadable("Unknown channel count".to_string()))?;
        let n_frames = track.codec_params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| unreadable(format!("Failed to create decoder: {e}")))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            sample_rate,
            channels,
            n_frames,
        })
    }
}

/// A stimulus file opened for block-wise reading.
///
/// The file is probed at construction but decoded lazily, one packet at a
/// time, as blocks are read.
pub struct FileSource {
    path: PathBuf,
    name: String,
    decoding: Decoding,
    /// Decoded samples not yet handed out.
    pending: Vec<f32>,
    pending_offset: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    exhausted: bool,
    position: u64,
    click: Option<ClickSynth>,
}

impl FileSource {
    /// Open `path`, adding a sync click channel of `click_duration` seconds
    /// if the file is mono.
    pub fn open(path: impl AsRef<Path>, click_duration: Option<f64>) -> Result<Self> {
        let path = path.as_ref();
        let decoding = Decoding::open(path)?;
        let name = path.to_string_lossy().into_owned();

        let click = ClickSynth::for_source(
            &name,
            click_duration,
            decoding.channels,
            decoding.sample_rate,
        );

        let source = Self {
            path: path.to_path_buf(),
            name,
            decoding,
            pending: Vec::new(),
            pending_offset: 0,
            sample_buf: None,
            exhausted: false,
            position: 0,
            click,
        };

        info!(
            " - {}: {:.2} s (channels={}, samplerate={})",
            source.name,
            source.duration().unwrap_or(f64::NAN),
            source.decoding.channels,
            source.decoding.sample_rate
        );

        Ok(source)
    }

    fn pending_len(&self) -> usize {
        self.pending.len() - self.pending_offset
    }

    /// Decode the next packet into `pending`. Returns false at end of stream.
    fn decode_next(&mut self) -> Result<bool> {
        loop {
            let packet = match self.decoding.format.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(symphonia::core::errors::Error::ResetRequired) => return Ok(false),
                Err(e) => {
                    return Err(Error::AudioDecode(format!(
                        "{}: failed to read packet: {e}",
                        self.name
                    )));
                }
            };

            if packet.track_id() != self.decoding.track_id {
                continue;
            }

            match self.decoding.decoder.decode(&packet) {
                Ok(decoded) => {
                    let needed = decoded.frames() * decoded.spec().channels.count();
                    if self
                        .sample_buf
                        .as_ref()
                        .map_or(true, |buf| buf.capacity() < needed)
                    {
                        self.sample_buf = Some(SampleBuffer::new(
                            decoded.capacity() as u64,
                            *decoded.spec(),
                        ));
                    }
                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        self.pending.extend_from_slice(buf.samples());
                    }
                    return Ok(true);
                }
                Err(symphonia::core::errors::Error::DecodeError(e)) => {
                    // Corrupt frames are skipped
                    warn!("{}: decode error (skipping packet): {e}", self.name);
                }
                Err(e) => {
                    return Err(Error::AudioDecode(format!(
                        "{}: decode failed: {e}",
                        self.name
                    )));
                }
            }
        }
    }
}

impl SampleSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.decoding.sample_rate
    }

    fn channels(&self) -> u16 {
        if self.click.is_some() {
            2
        } else {
            self.decoding.channels
        }
    }

    fn duration(&self) -> Option<f64> {
        self.decoding
            .n_frames
            .map(|n| n as f64 / f64::from(self.decoding.sample_rate))
    }

    fn read(&mut self, frames: usize) -> Result<Vec<f32>> {
        let channels = usize::from(self.decoding.channels);
        let wanted = frames * channels;

        while self.pending_len() < wanted && !self.exhausted {
            if !self.decode_next()? {
                self.exhausted = true;
            }
        }

        let take = wanted.min(self.pending_len()) / channels * channels;
        let start = self.pending_offset;
        let block = &self.pending[start..start + take];
        self.position += (take / channels) as u64;

        let output = match self.click.as_mut() {
            Some(click) => click.apply(block),
            None => block.to_vec(),
        };

        self.pending_offset += take;
        if self.pending_offset >= self.pending.len() / 2 {
            self.pending.drain(..self.pending_offset);
            self.pending_offset = 0;
        }

        Ok(output)
    }

    fn rewind(&mut self) -> Result<()> {
        let seek = self.decoding.format.seek(
            SeekMode::Accurate,
            SeekTo::TimeStamp {
                ts: 0,
                track_id: self.decoding.track_id,
            },
        );

        match seek {
            Ok(_) => self.decoding.decoder.reset(),
            Err(e) => {
                debug!("{}: seek failed ({e}), reopening", self.name);
                self.decoding = Decoding::open(&self.path)?;
            }
        }

        self.pending.clear();
        self.pending_offset = 0;
        self.exhausted = false;
        self.position = 0;
        if let Some(click) = self.click.as_mut() {
            click.reset();
        }
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;
    use crate::source::CLICK_LEVEL;

    /// Write a 16-bit WAV ramp and return its path.
    fn write_wav(dir: &Path, name: &str, channels: u16, frames: usize) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for frame in 0..frames {
            for _ in 0..channels {
                writer.write_sample((frame % 100) as i16 * 100).unwrap();
            }
        }
        writer.finalize().unwrap();
        path
    }

    fn read_all(source: &mut FileSource, block: usize) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        loop {
            let data = source.read(block).unwrap();
            let len = data.len();
            blocks.push(data);
            if len < block * usize::from(source.channels()) {
                return blocks;
            }
        }
    }

    #[test]
    fn test_open_reports_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "tone.wav", 1, 8000);

        let source = FileSource::open(&path, None).unwrap();
        assert_eq!(source.sample_rate(), 8000);
        assert_eq!(source.channels(), 1);
        assert!((source.duration().unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(source.name(), path.to_string_lossy());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileSource::open(dir.path().join("nope.wav"), None);
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        let result = FileSource::open(&path, None);
        assert!(matches!(result, Err(Error::UnreadableFormat { .. })));
    }

    #[test]
    fn test_reads_whole_file_in_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "stereo.wav", 2, 1000);
        let mut source = FileSource::open(&path, None).unwrap();

        let blocks = read_all(&mut source, 256);
        let frames: usize = blocks.iter().map(|b| b.len() / 2).sum();
        assert_eq!(frames, 1000);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[3].len(), (1000 - 3 * 256) * 2);
        assert_eq!(source.position(), 1000);
    }

    #[test]
    fn test_rewind_restarts_from_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "mono.wav", 1, 500);
        let mut source = FileSource::open(&path, None).unwrap();

        let first = source.read(64).unwrap();
        read_all(&mut source, 64);
        source.rewind().unwrap();
        assert_eq!(source.position(), 0);
        assert_eq!(source.read(64).unwrap(), first);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_click_on_mono_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "mono.wav", 1, 2000);
        let mut source = FileSource::open(&path, Some(0.01)).unwrap();
        assert_eq!(source.channels(), 2);

        let first = source.read(256).unwrap();
        assert_eq!(first.len(), 512);
        let sync: Vec<f32> = first.chunks_exact(2).map(|f| f[1]).collect();
        assert_eq!(sync.iter().filter(|&&s| s == CLICK_LEVEL).count(), 80);
        assert!(sync[80..].iter().all(|&s| s == 0.0));

        let second = source.read(256).unwrap();
        assert!(second.chunks_exact(2).all(|f| f[1] == 0.0));

        source.rewind().unwrap();
        let again = source.read(256).unwrap();
        assert_eq!(again[1], CLICK_LEVEL);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_click_skipped_for_stereo_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_wav(dir.path(), "stereo.wav", 2, 100);
        let mut source = FileSource::open(&path, Some(0.01)).unwrap();
        assert_eq!(source.channels(), 2);
        let block = source.read(10).unwrap();
        assert_eq!(block[0], block[1]);
    }
}

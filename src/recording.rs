// Local recording of the capture audio plus post-session transcode.
//
// The recording destination's chunks are appended to a WAV file during the
// session. On stop the finished file is handed to an injected transcoder on
// a detached task; the session never waits for it and the original WAV is
// kept whenever transcoding fails.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Compresses a finished recording into its distributable form.
///
/// External collaborator: the engine only reports the outcome.
#[async_trait::async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the path of the produced artifact.
    async fn transcode(&self, wav_path: &Path) -> Result<PathBuf>;
}

/// Appends PCM16 chunks to a WAV file.
pub struct RecordingSink {
    writer: Option<hound::WavWriter<BufWriter<File>>>,
    path: PathBuf,
    samples_written: u64,
}

impl RecordingSink {
    pub fn create(path: PathBuf, sample_rate: u32, channels: u16) -> Result<Self> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let writer = hound::WavWriter::create(&path, spec)
            .with_context(|| format!("Failed to create recording file: {:?}", path))?;
        Ok(Self {
            writer: Some(writer),
            path,
            samples_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    pub fn write(&mut self, samples: &[i16]) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .context("Failed to write recording sample")?;
            }
            self.samples_written += samples.len() as u64;
        }
        Ok(())
    }

    /// Finalize the WAV header and return the file path.
    pub fn finish(mut self) -> Result<PathBuf> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .context("Failed to finalize recording WAV")?;
        }
        Ok(self.path.clone())
    }
}

impl Drop for RecordingSink {
    fn drop(&mut self) {
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.finalize() {
                warn!("Failed to finalize recording on drop: {}", e);
            }
        }
    }
}

// Subtitle and transcript file writers.
//
// Each cue/block is flushed to disk immediately: the files are meant to be
// usable if the process dies mid-session (durability over throughput).

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use super::SubtitleCue;

/// `HH:MM:SS,mmm` (SRT style)
pub fn format_srt_timestamp(at: Duration) -> String {
    format_timestamp(at, ',')
}

/// `HH:MM:SS.mmm` (WebVTT style)
pub fn format_vtt_timestamp(at: Duration) -> String {
    format_timestamp(at, '.')
}

fn format_timestamp(at: Duration, millis_sep: char) -> String {
    let total_ms = at.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1_000) % 60;
    let millis = total_ms % 1_000;
    format!(
        "{:02}:{:02}:{:02}{}{:03}",
        hours, minutes, seconds, millis_sep, millis
    )
}

/// SubRip writer: 1-based index, timing line, text, blank separator.
pub struct SrtWriter {
    writer: BufWriter<File>,
}

impl SrtWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create SRT file: {:?}", path))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn write_cue(&mut self, cue: &SubtitleCue) -> Result<()> {
        writeln!(self.writer, "{}", cue.index)?;
        writeln!(
            self.writer,
            "{} --> {}",
            format_srt_timestamp(cue.start),
            format_srt_timestamp(cue.end)
        )?;
        writeln!(self.writer, "{}", cue.text)?;
        writeln!(self.writer)?;
        self.writer.flush().context("Failed to flush SRT cue")
    }
}

/// WebVTT writer: `WEBVTT` header, dot-millisecond timing lines.
pub struct VttWriter {
    writer: BufWriter<File>,
}

impl VttWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create VTT file: {:?}", path))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "WEBVTT")?;
        writeln!(writer)?;
        writer.flush().context("Failed to write VTT header")?;
        Ok(Self { writer })
    }

    pub fn write_cue(&mut self, cue: &SubtitleCue) -> Result<()> {
        writeln!(
            self.writer,
            "{} --> {}",
            format_vtt_timestamp(cue.start),
            format_vtt_timestamp(cue.end)
        )?;
        writeln!(self.writer, "{}", cue.text)?;
        writeln!(self.writer)?;
        self.writer.flush().context("Failed to flush VTT cue")
    }
}

/// Append-only plaintext transcript: `[HH:mm:ss]` / original / translated.
pub struct TranscriptWriter {
    writer: BufWriter<File>,
}

impl TranscriptWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open transcript file: {:?}", path))?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    pub fn append(
        &mut self,
        timestamp: DateTime<Utc>,
        original: &str,
        translated: &str,
    ) -> Result<()> {
        let local = timestamp.with_timezone(&Local);
        writeln!(self.writer, "[{}]", local.format("%H:%M:%S"))?;
        writeln!(self.writer, "{}", original)?;
        writeln!(self.writer, "{}", translated)?;
        writeln!(self.writer)?;
        self.writer.flush().context("Failed to flush transcript")
    }
}

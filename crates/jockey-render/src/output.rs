//! WAV output for the main and cue buses

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

type Writer = WavWriter<BufWriter<File>>;

/// A pair of 32-bit float stereo WAV files written block by block
pub struct BusWriter {
    main: Writer,
    cue: Writer,
    main_path: PathBuf,
    cue_path: PathBuf,
    peak: f32,
}

impl BusWriter {
    /// Create `<stem>_main.wav` and `<stem>_cue.wav` in `dir`
    pub fn create(dir: &Path, stem: &str, sample_rate: u32) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {:?}", dir))?;

        let spec = WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let main_path = dir.join(format!("{}_main.wav", stem));
        let cue_path = dir.join(format!("{}_cue.wav", stem));
        let main = WavWriter::create(&main_path, spec)
            .with_context(|| format!("Failed to create {:?}", main_path))?;
        let cue = WavWriter::create(&cue_path, spec)
            .with_context(|| format!("Failed to create {:?}", cue_path))?;

        Ok(Self {
            main,
            cue,
            main_path,
            cue_path,
            peak: 0.0,
        })
    }

    /// Append one block of interleaved samples to each file
    pub fn write(&mut self, main: &[f32], cue: &[f32]) -> Result<()> {
        for &sample in main {
            self.peak = self.peak.max(sample.abs());
            self.main.write_sample(sample).context("Failed to write main sample")?;
        }
        for &sample in cue {
            self.cue.write_sample(sample).context("Failed to write cue sample")?;
        }
        Ok(())
    }

    /// Flush headers; returns the written paths and the main-bus peak
    pub fn finalize(self) -> Result<(PathBuf, PathBuf, f32)> {
        self.main.finalize().context("Failed to finalize main WAV")?;
        self.cue.finalize().context("Failed to finalize cue WAV")?;
        Ok((self.main_path, self.cue_path, self.peak))
    }
}

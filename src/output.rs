//! Result output
//!
//! Results are written as JSON (one array) or JSON Lines (one object per
//! line), to a file or to stdout.

use crate::config::OutputFormat;
use crate::Result;
use anyhow::Context;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Serialize `results` in `format` to any writer
pub fn write_results<W: Write, T: Serialize>(writer: &mut W, results: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *writer, results).context("Failed to serialize results")?;
            writeln!(writer)?;
        }
        OutputFormat::JsonLines => {
            for result in results {
                serde_json::to_writer(&mut *writer, result).context("Failed to serialize result")?;
                writeln!(writer)?;
            }
        }
    }

    writer.flush().context("Failed to flush results")?;
    Ok(())
}

/// Write results to `path`, or stdout when `path` is `None`
pub fn write_results_to<T: Serialize>(path: Option<&Path>, results: &[T], format: OutputFormat) -> Result<()> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            write_results(&mut writer, results, format)
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            write_results(&mut writer, results, format)
        }
    }
}

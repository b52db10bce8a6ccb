use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Append-only destination for `(key, value, step)` scalars.
pub trait ScalarSink {
    fn add_scalar(&mut self, key: &str, value: f64, step: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarRecord {
    pub key: String,
    pub value: f64,
    pub step: usize,
}

/// Writes one JSON object per line to `<dir>/scalars.jsonl`.
pub struct JsonlScalarWriter {
    path: PathBuf,
    out: BufWriter<fs::File>,
}

impl JsonlScalarWriter {
    pub const FILE_NAME: &'static str = "scalars.jsonl";

    /// Creates `dir` if needed and appends to any existing log in it.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::FILE_NAME);
        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlScalarWriter { path, out: BufWriter::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ScalarSink for JsonlScalarWriter {
    fn add_scalar(&mut self, key: &str, value: f64, step: usize) -> Result<()> {
        let record = ScalarRecord { key: key.to_string(), value, step };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Keeps every scalar in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryScalars {
    pub records: Vec<ScalarRecord>,
}

impl MemoryScalars {
    pub fn values(&self, key: &str) -> Vec<f64> {
        self.records.iter().filter(|r| r.key == key).map(|r| r.value).collect()
    }
}

impl ScalarSink for MemoryScalars {
    fn add_scalar(&mut self, key: &str, value: f64, step: usize) -> Result<()> {
        self.records.push(ScalarRecord { key: key.to_string(), value, step });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_lines_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonlScalarWriter::create(&dir.path().join("runs")).unwrap();
        writer.add_scalar("train/loss", 0.5, 0).unwrap();
        writer.add_scalar("train/accuracy", 0.25, 0).unwrap();
        writer.flush().unwrap();

        let text = fs::read_to_string(writer.path()).unwrap();
        let records: Vec<ScalarRecord> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1], ScalarRecord { key: "train/accuracy".into(), value: 0.25, step: 0 });
    }

    #[test]
    fn memory_sink_filters_by_key() {
        let mut sink = MemoryScalars::default();
        sink.add_scalar("a", 1.0, 0).unwrap();
        sink.add_scalar("b", 2.0, 0).unwrap();
        sink.add_scalar("a", 3.0, 1).unwrap();
        assert_eq!(sink.values("a"), vec![1.0, 3.0]);
    }
}

//! Run archive for per-generation records and the final report.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::schema::{ArchiveConfig, CandidateSnapshot, EvolutionReport, GenerationStats};

const REPORT_FILE: &str = "report.json";

/// One evaluated generation as stored in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub generation: usize,
    pub stats: GenerationStats,
    /// Every member, failed ones included with no fitness.
    pub members: Vec<CandidateSnapshot>,
}

/// Archive of evaluated generations.
#[derive(Debug, Default)]
pub struct RunArchive {
    /// Retained records in generation order.
    records: Vec<GenerationRecord>,
    /// Keep records in memory.
    retain: bool,
    /// Output directory for record and report files.
    output_dir: Option<PathBuf>,
}

impl RunArchive {
    /// Create a new archive.
    pub fn new(retain: bool) -> Self {
        Self {
            records: Vec::new(),
            retain,
            output_dir: None,
        }
    }

    /// Set output directory, creating it if needed.
    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> io::Result<Self> {
        let path = dir.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        self.output_dir = Some(path);
        Ok(self)
    }

    pub fn from_config(config: &ArchiveConfig) -> io::Result<Self> {
        let archive = Self::new(config.retain_generations);
        match &config.output_dir {
            Some(dir) => archive.with_output_dir(dir),
            None => Ok(archive),
        }
    }

    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    /// Store a generation, writing `generation_NNNN.json` when an output
    /// directory is set. Returns the written path.
    pub fn record(&mut self, record: GenerationRecord) -> io::Result<Option<PathBuf>> {
        let path = match &self.output_dir {
            Some(dir) => {
                let path = dir.join(format!("generation_{:04}.json", record.generation));
                write_json(&path, &record)?;
                Some(path)
            }
            None => None,
        };

        if self.retain {
            self.records.push(record);
        }
        Ok(path)
    }

    /// Retained records in generation order.
    pub fn records(&self) -> &[GenerationRecord] {
        &self.records
    }

    /// Get a retained record by generation number.
    pub fn get(&self, generation: usize) -> Option<&GenerationRecord> {
        self.records.iter().find(|r| r.generation == generation)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Write `report.json` to the output directory.
    pub fn save_report(&self, report: &EvolutionReport) -> io::Result<PathBuf> {
        let output_dir = self
            .output_dir
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "No output directory set"))?;
        let path = output_dir.join(REPORT_FILE);
        write_json(&path, report)?;
        Ok(path)
    }
}

/// Load a report written by [`RunArchive::save_report`].
pub fn load_report<P: AsRef<Path>>(path: P) -> io::Result<EvolutionReport> {
    read_json(path)
}

/// Load a generation record file.
pub fn load_generation<P: AsRef<Path>>(path: P) -> io::Result<GenerationRecord> {
    read_json(path)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)
}

fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> io::Result<T> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

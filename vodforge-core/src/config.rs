use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VodforgeConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub media: MediaSection,
    pub storage: StorageSection,
    pub recording: RecordingSection,
    pub jobs: JobsSection,
    pub control: ControlSection,
}

impl VodforgeConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.data_dir).join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        Path::new(&self.paths.data_dir).join("recordings.sqlite")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub data_dir: String,
    pub work_dir: String,
    pub logs_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSection {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub log_level: String,
    pub thumbnail_offset_s: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    pub mode: StorageMode,
    pub root: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Local,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecordingSection {
    pub proximity_threshold_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobsSection {
    pub interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlSection {
    pub bind_addr: String,
}

pub fn load_vodforge_config<P: AsRef<Path>>(path: P) -> Result<VodforgeConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

use super::{SegmentStore, Stage};
use crate::error::{DubError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory of persisted store generations, one JSON file each.
pub struct GenerationArchive {
    dir: PathBuf,
}

impl GenerationArchive {
    /// Open (and create if needed) an archive directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(store: &SegmentStore) -> String {
        format!("{:02}-{}.json", store.generation, store.stage)
    }

    /// Persist a generation and return its path.
    pub fn save(&self, store: &SegmentStore) -> Result<PathBuf> {
        let path = self.dir.join(Self::file_name(store));
        let json = serde_json::to_string_pretty(store)?;
        fs::write(&path, json)?;
        debug!("Saved generation {} ({}) to {:?}", store.generation, store.stage, path);
        Ok(path)
    }

    /// All stored generations as `(generation, stage, path)`, oldest first.
    pub fn list(&self) -> Result<Vec<(u32, Stage, PathBuf)>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some((generation, stage)) = stem.split_once('-') else {
                continue;
            };
            if let (Ok(generation), Ok(stage)) = (generation.parse::<u32>(), stage.parse::<Stage>()) {
                entries.push((generation, stage, path));
            }
        }
        entries.sort_by_key(|(generation, _, _)| *generation);
        Ok(entries)
    }

    /// Latest generation produced by `stage`.
    pub fn load(&self, stage: Stage) -> Result<SegmentStore> {
        let path = self
            .list()?
            .into_iter()
            .rev()
            .find(|(_, s, _)| *s == stage)
            .map(|(_, _, path)| path)
            .ok_or_else(|| DubError::StageNotFound(stage.to_string()))?;
        Self::read(&path)
    }

    /// Most recent generation of any stage.
    pub fn latest(&self) -> Result<SegmentStore> {
        let path = self
            .list()?
            .into_iter()
            .last()
            .map(|(_, _, path)| path)
            .ok_or_else(|| DubError::StageNotFound("any".to_string()))?;
        Self::read(&path)
    }

    pub fn read(path: &Path) -> Result<SegmentStore> {
        if !path.exists() {
            return Err(DubError::FileNotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        let store: SegmentStore = serde_json::from_str(&contents)?;
        Ok(store)
    }
}

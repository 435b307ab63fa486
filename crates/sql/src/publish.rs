//! Script artifacts: bundling, writing, and publish-time deduplication.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use sagastore_core::{ConfigResult, SagaDefinition};
use tracing::{debug, info};

use crate::dialect::Dialect;
use crate::script::ScriptGenerator;

/// Folder inside each dialect directory holding per-saga scripts.
pub const SAGAS_FOLDER: &str = "Sagas";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptKind {
    Create,
    Drop,
}

impl ScriptKind {
    fn suffix(self) -> &'static str {
        match self {
            ScriptKind::Create => "Create",
            ScriptKind::Drop => "Drop",
        }
    }
}

/// Artifact key: `(saga, dialect, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    pub saga: String,
    pub dialect: Dialect,
    pub kind: ScriptKind,
}

impl ArtifactKey {
    /// `{Dialect}/Sagas/{Saga}_{Kind}.sql`
    pub fn relative_path(&self) -> PathBuf {
        Path::new(self.dialect.directory_name())
            .join(SAGAS_FOLDER)
            .join(format!("{}_{}.sql", self.saga, self.kind.suffix()))
    }
}

/// Generated scripts keyed by `(saga, dialect, kind)`.
///
/// Registering the same key twice with identical content is a no-op (the
/// artifact is emitted once); differing content for one key is rejected.
#[derive(Debug, Default, Clone)]
pub struct ScriptBundle {
    artifacts: BTreeMap<ArtifactKey, String>,
    duplicates: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum BundleError {
    #[error(transparent)]
    Config(#[from] sagastore_core::ConfigError),
    #[error("conflicting script content for {0}")]
    Conflict(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

impl ScriptBundle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate create and drop scripts for every definition × dialect.
    pub fn generate(
        definitions: &[SagaDefinition],
        dialects: &[Dialect],
        table_prefix: &str,
    ) -> Result<Self, BundleError> {
        let mut bundle = Self::new();
        for &dialect in dialects {
            let generator = ScriptGenerator::new(dialect, table_prefix);
            for definition in definitions {
                bundle.add_definition(&generator, definition)?;
            }
        }
        Ok(bundle)
    }

    fn add_definition(&mut self, generator: &ScriptGenerator, definition: &SagaDefinition) -> Result<(), BundleError> {
        let scripts = generator.scripts(definition)?;
        let key = |kind| ArtifactKey {
            saga: scripts.saga.clone(),
            dialect: scripts.dialect,
            kind,
        };
        self.push(key(ScriptKind::Create), scripts.create.clone())?;
        self.push(key(ScriptKind::Drop), scripts.drop.clone())?;
        Ok(())
    }

    pub fn push(&mut self, key: ArtifactKey, content: String) -> Result<(), BundleError> {
        match self.artifacts.get(&key) {
            Some(existing) if *existing == content => {
                self.duplicates += 1;
                debug!(path = %key.relative_path().display(), "skipping duplicate script");
                Ok(())
            }
            Some(_) => Err(BundleError::Conflict(key.relative_path().display().to_string())),
            None => {
                self.artifacts.insert(key, content);
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &ArtifactKey) -> Option<&str> {
        self.artifacts.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Number of identical registrations folded into an existing artifact.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArtifactKey, &str)> {
        self.artifacts.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Write every artifact below `root`, returning the written paths.
    pub fn write_to(&self, root: &Path) -> Result<Vec<PathBuf>, BundleError> {
        let mut written = Vec::with_capacity(self.artifacts.len());
        for (key, content) in &self.artifacts {
            let path = root.join(key.relative_path());
            let io_err = |source| BundleError::Io {
                path: path.display().to_string(),
                source,
            };
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            std::fs::write(&path, content).map_err(io_err)?;
            written.push(path);
        }
        info!(count = written.len(), root = %root.display(), "wrote saga scripts");
        Ok(written)
    }
}

/// Validate that every definition renders on every dialect (startup check).
pub fn check_definitions(definitions: &[SagaDefinition], dialects: &[Dialect], table_prefix: &str) -> ConfigResult<()> {
    for &dialect in dialects {
        let generator = ScriptGenerator::new(dialect, table_prefix);
        for definition in definitions {
            generator.scripts(definition)?;
            generator.statements(definition)?;
        }
    }
    Ok(())
}

/// A file staged for publishing, identified by its path relative to the output root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFile {
    pub relative_path: String,
}

impl PublishedFile {
    pub fn new(relative_path: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
        }
    }
}

/// Files to drop from a publish set.
///
/// Shared scripts under `prefix` that are not per-saga (outside any `Sagas`
/// folder) can be staged several times by different project groupings; every
/// repeat of an already-seen relative path is returned for removal. Per-saga
/// scripts and files outside `prefix` are never removed.
pub fn dedupe_published(files: &[PublishedFile], prefix: &str) -> Vec<PublishedFile> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for file in files {
        let path = file.relative_path.as_str();
        if path.starts_with(prefix) && !path.contains(SAGAS_FOLDER) && !seen.insert(path) {
            duplicates.push(file.clone());
        }
    }
    duplicates
}

use crate::{
    error::EngineError,
    features::CategoricalEncoder,
    network::{Network, Topology, WeightTensor},
    normalization::NormalizationStats,
    trainer::CompileConfig,
};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const CURRENT_FILE: &str = "CURRENT";
const MODEL_FILE: &str = "model.json";
const META_FILE: &str = "meta.json";
const STAGING_PREFIX: &str = ".staging-";

/// Structure, compile settings and weights of one trained network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelArtifact {
    pub generation: Uuid,
    pub topology: Topology,
    pub compile: CompileConfig,
    pub weights: Vec<WeightTensor>,
}

/// Everything needed to reproduce training-time scaling at inference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub generation: Uuid,
    pub trained_at: DateTime<Utc>,
    pub row_count: usize,
    #[serde(flatten)]
    pub stats: NormalizationStats,
    pub encoders: CategoricalEncoder,
}

/// A trained network together with the stats and encoder it was fit on.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub network: Network,
    pub compile: CompileConfig,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    pub fn generation(&self) -> Uuid {
        self.metadata.generation
    }
}

/// Directory-backed snapshot store.
///
/// ```text
/// <dir>/CURRENT                 active generation id
/// <dir>/<generation>/model.json
/// <dir>/<generation>/meta.json
/// ```
///
/// A new generation is fully written before `CURRENT` is swapped to it, so a
/// failed save never disturbs the snapshot that was active before.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), EngineError> {
        let generation = snapshot.generation();
        fs::create_dir_all(&self.dir).map_err(|e| io_failure(&self.dir, e))?;

        let target = self.generation_dir(generation);
        if target.exists() {
            return Err(EngineError::PersistenceFailure(format!(
                "generation {} already exists",
                generation
            )));
        }

        let staging = self.dir.join(format!("{}{}", STAGING_PREFIX, generation));
        if let Err(e) = self.write_staging(&staging, snapshot) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }
        if let Err(e) = fs::rename(&staging, &target) {
            let _ = fs::remove_dir_all(&staging);
            return Err(io_failure(&target, e));
        }

        // CURRENT still names the previous generation until the rename lands
        if let Err(e) = self.swap_pointer(generation) {
            warn!("Abandoning model snapshot {}: {}", generation, e);
            let _ = fs::remove_dir_all(&target);
            return Err(e);
        }

        info!("Persisted model snapshot {} to {}", generation, self.dir.display());
        self.prune(generation);
        Ok(())
    }

    pub fn load(&self) -> Result<Snapshot, EngineError> {
        let generation = self.current_generation()?;
        let dir = self.generation_dir(generation);

        let artifact: ModelArtifact = read_json(&dir.join(MODEL_FILE))?;
        let metadata: SnapshotMetadata = read_json(&dir.join(META_FILE))?;
        if artifact.generation != generation || metadata.generation != generation {
            return Err(EngineError::ModelNotTrained(format!(
                "artifacts in {} belong to different training runs",
                dir.display()
            )));
        }

        let network = Network::from_weights(artifact.topology, &artifact.weights)?;
        debug!("Loaded model snapshot {} ({} parameters)", generation, network.num_parameters());

        Ok(Snapshot {
            network,
            compile: artifact.compile,
            metadata,
        })
    }

    pub fn metadata(&self) -> Result<SnapshotMetadata, EngineError> {
        let generation = self.current_generation()?;
        let metadata: SnapshotMetadata = read_json(&self.generation_dir(generation).join(META_FILE))?;
        if metadata.generation != generation {
            return Err(EngineError::ModelNotTrained(format!(
                "metadata belongs to generation {}, expected {}",
                metadata.generation, generation
            )));
        }
        Ok(metadata)
    }

    pub fn current_generation(&self) -> Result<Uuid, EngineError> {
        let pointer = self.dir.join(CURRENT_FILE);
        let content = match fs::read_to_string(&pointer) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(EngineError::ModelNotTrained(
                    "no trained model found, upload training data first".to_string(),
                ))
            }
            Err(e) => return Err(io_failure(&pointer, e)),
        };

        Uuid::parse_str(content.trim())
            .map_err(|e| EngineError::ModelNotTrained(format!("corrupt {}: {}", pointer.display(), e)))
    }

    fn generation_dir(&self, generation: Uuid) -> PathBuf {
        self.dir.join(generation.to_string())
    }

    fn swap_pointer(&self, generation: Uuid) -> Result<(), EngineError> {
        let pointer = self.dir.join(CURRENT_FILE);
        let pointer_tmp = self.dir.join(format!("{}.tmp", CURRENT_FILE));
        write_synced(&pointer_tmp, generation.to_string().as_bytes())?;
        fs::rename(&pointer_tmp, &pointer).map_err(|e| io_failure(&pointer, e))
    }

    fn write_staging(&self, staging: &Path, snapshot: &Snapshot) -> Result<(), EngineError> {
        fs::create_dir(staging).map_err(|e| io_failure(staging, e))?;

        let artifact = ModelArtifact {
            generation: snapshot.generation(),
            topology: snapshot.network.topology().clone(),
            compile: snapshot.compile.clone(),
            weights: snapshot.network.weights(),
        };
        write_json(&staging.join(MODEL_FILE), &artifact)?;
        write_json(&staging.join(META_FILE), &snapshot.metadata)?;
        Ok(())
    }

    /// Removes every generation and staging directory except `keep`.
    fn prune(&self, keep: Uuid) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list {} for pruning: {}", self.dir.display(), e);
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let stale = match Uuid::parse_str(&name) {
                Ok(generation) => generation != keep,
                Err(_) => name.starts_with(STAGING_PREFIX),
            };
            if stale {
                match fs::remove_dir_all(&path) {
                    Ok(()) => debug!("Pruned stale model directory {}", path.display()),
                    Err(e) => warn!("Failed to prune {}: {}", path.display(), e),
                }
            }
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), EngineError> {
    let file = fs::File::create(path).map_err(|e| io_failure(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| EngineError::PersistenceFailure(format!("{}: {}", path.display(), e)))?;
    writer.flush().map_err(|e| io_failure(path, e))?;
    writer.get_ref().sync_all().map_err(|e| io_failure(path, e))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let mut file = fs::File::create(path).map_err(|e| io_failure(path, e))?;
    file.write_all(bytes).map_err(|e| io_failure(path, e))?;
    file.sync_all().map_err(|e| io_failure(path, e))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, EngineError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(EngineError::ModelNotTrained(format!("{} is missing", path.display())))
        }
        Err(e) => return Err(io_failure(path, e)),
    };

    serde_json::from_str(&content)
        .map_err(|e| EngineError::ModelNotTrained(format!("corrupt {}: {}", path.display(), e)))
}

fn io_failure(path: &Path, err: io::Error) -> EngineError {
    EngineError::PersistenceFailure(format!("{}: {}", path.display(), err))
}

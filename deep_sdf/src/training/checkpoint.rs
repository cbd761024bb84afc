//! Experiment directory layout and checkpoint artifacts.
//!
//! A snapshot is four files keyed by the same tag (`latest` or an epoch
//! number): decoder weights, optimizer state, latent tables and the logs.
//! Each binary artifact stores the epoch it was written at; loading refuses
//! components written at different epochs.

use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use burn::prelude::*;

use super::logs::TrainingLogs;
use super::optimizer::{AdamState, OptimizerState};
use crate::config::TrainingConfig;
use crate::error::{DeepSdfError, Result};
use crate::latent::LatentBank;
use crate::nn::SdfDecoder;
use crate::tensor_ops::{matrix, to_vec};

/// Magic bytes of a binary artifact.
pub const ARTIFACT_MAGIC: [u8; 4] = *b"DSDF";

/// Current artifact format version.
pub const ARTIFACT_VERSION: u32 = 1;

/// Which component an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ArtifactKind {
    /// Decoder weights.
    ModelParameters = 1,
    /// Optimizer moments and step counters.
    OptimizerParameters = 2,
    /// Latent mean and log-variance tables.
    LatentCodes = 3,
}

impl ArtifactKind {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::ModelParameters),
            2 => Some(Self::OptimizerParameters),
            3 => Some(Self::LatentCodes),
            _ => None,
        }
    }

    /// Subdirectory of the experiment holding this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::ModelParameters => "ModelParameters",
            Self::OptimizerParameters => "OptimizerParameters",
            Self::LatentCodes => "LatentCodes",
        }
    }
}

/// Snapshot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTag {
    /// Rolling snapshot overwritten every `log_frequency` epochs.
    Latest,
    /// Numbered snapshot.
    Epoch(usize),
}

impl fmt::Display for SnapshotTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Epoch(epoch) => write!(f, "{epoch}"),
        }
    }
}

impl FromStr for SnapshotTag {
    type Err = DeepSdfError;

    fn from_str(s: &str) -> Result<Self> {
        if s == "latest" {
            return Ok(Self::Latest);
        }
        s.parse()
            .map(Self::Epoch)
            .map_err(|_| DeepSdfError::config(format!("invalid snapshot tag '{s}'")))
    }
}

/// A 2-D tensor copied to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTensor {
    /// `[rows, cols]`.
    pub shape: [usize; 2],
    /// Row-major values.
    pub values: Vec<f32>,
}

impl StoredTensor {
    /// Copy a tensor to the host.
    pub fn from_tensor<B: Backend>(tensor: Tensor<B, 2>) -> Result<Self> {
        let shape = tensor.dims();
        Ok(Self {
            shape,
            values: to_vec(tensor)?,
        })
    }

    /// Upload to `device`.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        matrix(self.values.clone(), self.shape[0], self.shape[1], device)
    }

    fn expect_shape(&self, what: &str, expected: [usize; 2]) -> Result<()> {
        if self.shape == expected {
            Ok(())
        } else {
            Err(DeepSdfError::DimensionMismatch {
                what: what.to_string(),
                expected: expected.to_vec(),
                got: self.shape.to_vec(),
            })
        }
    }
}

/// Binary artifact: header, counters and 2-D tensors.
///
/// Layout (little-endian): magic (4) | version u32 | kind u32 | reserved u32 |
/// epoch u64 | counter count u64 | counters u64... | tensor count u64 |
/// per tensor: rows u64, cols u64, f32 values.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorArchive {
    /// Component stored.
    pub kind: ArtifactKind,
    /// Epoch at which it was written.
    pub epoch: usize,
    /// Integer side data (optimizer step counters).
    pub counters: Vec<u64>,
    /// Tensors in component-defined order.
    pub tensors: Vec<StoredTensor>,
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_len<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let value = read_u64(reader)?;
    usize::try_from(value).map_err(|_| DeepSdfError::InvalidData(format!("{what} {value} out of range")))
}

/// Read exactly `len` bytes without trusting `len` for preallocation.
fn read_payload<R: Read>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    (&mut *reader).take(len as u64).read_to_end(&mut bytes)?;
    if bytes.len() != len {
        return Err(DeepSdfError::InvalidData(format!(
            "truncated artifact: expected {} tensor bytes, found {}",
            len,
            bytes.len()
        )));
    }
    Ok(bytes)
}

impl TensorArchive {
    /// Create an archive.
    pub fn new(kind: ArtifactKind, epoch: usize) -> Self {
        Self {
            kind,
            epoch,
            counters: Vec::new(),
            tensors: Vec::new(),
        }
    }

    /// Serialize to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&ARTIFACT_MAGIC)?;
        writer.write_all(&ARTIFACT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.kind as u32).to_le_bytes())?;
        writer.write_all(&0u32.to_le_bytes())?;
        writer.write_all(&(self.epoch as u64).to_le_bytes())?;

        writer.write_all(&(self.counters.len() as u64).to_le_bytes())?;
        for c in &self.counters {
            writer.write_all(&c.to_le_bytes())?;
        }

        writer.write_all(&(self.tensors.len() as u64).to_le_bytes())?;
        for tensor in &self.tensors {
            writer.write_all(&(tensor.shape[0] as u64).to_le_bytes())?;
            writer.write_all(&(tensor.shape[1] as u64).to_le_bytes())?;
            let bytes: Vec<u8> = tensor.values.iter().flat_map(|f| f.to_le_bytes()).collect();
            writer.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Deserialize from a reader.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != ARTIFACT_MAGIC {
            return Err(DeepSdfError::InvalidData(format!(
                "invalid artifact magic: expected {:?}, got {:?}",
                ARTIFACT_MAGIC, magic
            )));
        }
        let version = read_u32(reader)?;
        if version != ARTIFACT_VERSION {
            return Err(DeepSdfError::InvalidData(format!(
                "unsupported artifact version {version}"
            )));
        }
        let kind_raw = read_u32(reader)?;
        let kind = ArtifactKind::from_u32(kind_raw)
            .ok_or_else(|| DeepSdfError::InvalidData(format!("unknown artifact kind {kind_raw}")))?;
        let _reserved = read_u32(reader)?;
        let epoch = read_len(reader, "epoch")?;

        let num_counters = read_len(reader, "counter count")?;
        let counters = (0..num_counters)
            .map(|_| read_u64(reader))
            .collect::<Result<Vec<_>>>()?;

        let num_tensors = read_len(reader, "tensor count")?;
        let mut tensors = Vec::with_capacity(num_tensors.min(1024));
        for _ in 0..num_tensors {
            let rows = read_len(reader, "tensor rows")?;
            let cols = read_len(reader, "tensor columns")?;
            let len = rows
                .checked_mul(cols)
                .and_then(|n| n.checked_mul(4))
                .ok_or_else(|| DeepSdfError::InvalidData(format!("tensor shape [{rows}, {cols}] overflows")))?;
            let bytes = read_payload(reader, len)?;
            let values = bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            tensors.push(StoredTensor {
                shape: [rows, cols],
                values,
            });
        }

        Ok(Self {
            kind,
            epoch,
            counters,
            tensors,
        })
    }

    /// Write to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read from `path`, checking the artifact kind.
    pub fn load(path: impl AsRef<Path>, kind: ArtifactKind) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DeepSdfError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let archive = Self::read_from(&mut BufReader::new(File::open(path)?))?;
        if archive.kind != kind {
            return Err(DeepSdfError::InvalidData(format!(
                "{} holds {:?}, expected {:?}",
                path.display(),
                archive.kind,
                kind
            )));
        }
        Ok(archive)
    }
}

/// Files of one experiment.
///
/// ```text
/// <root>/specs.json
/// <root>/ModelParameters/<tag>.bin
/// <root>/OptimizerParameters/<tag>.bin
/// <root>/LatentCodes/<tag>.bin
/// <root>/Logs.json
/// <root>/TrainingSummary.json
/// <root>/Reconstructions/{train,test}/<shape>/epoch=<E>.obj
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentDir {
    root: PathBuf,
}

impl ExperimentDir {
    /// Training specification file.
    pub const SPECS_FILE: &'static str = "specs.json";
    /// Log bundle file.
    pub const LOGS_FILE: &'static str = "Logs.json";
    /// Final summary file.
    pub const SUMMARY_FILE: &'static str = "TrainingSummary.json";
    /// Extracted meshes directory.
    pub const RECONSTRUCTIONS_DIR: &'static str = "Reconstructions";

    /// Refer to an experiment directory without touching the filesystem.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the directory tree.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let dir = Self::new(root);
        for kind in [
            ArtifactKind::ModelParameters,
            ArtifactKind::OptimizerParameters,
            ArtifactKind::LatentCodes,
        ] {
            fs::create_dir_all(dir.root.join(kind.dir_name()))?;
        }
        Ok(dir)
    }

    /// Experiment root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of an artifact.
    pub fn artifact_path(&self, kind: ArtifactKind, tag: SnapshotTag) -> PathBuf {
        self.root.join(kind.dir_name()).join(format!("{tag}.bin"))
    }

    /// Path of `specs.json`.
    pub fn specs_path(&self) -> PathBuf {
        self.root.join(Self::SPECS_FILE)
    }

    /// Path of `Logs.json`.
    pub fn logs_path(&self) -> PathBuf {
        self.root.join(Self::LOGS_FILE)
    }

    /// Path of `TrainingSummary.json`.
    pub fn summary_path(&self) -> PathBuf {
        self.root.join(Self::SUMMARY_FILE)
    }

    /// Path of an extracted mesh.
    pub fn reconstruction_path(&self, split: &str, shape: &str, epoch: usize) -> PathBuf {
        self.root
            .join(Self::RECONSTRUCTIONS_DIR)
            .join(split)
            .join(shape)
            .join(format!("epoch={epoch}.obj"))
    }

    /// Mesh of `shape` reconstructed against snapshot `tag`.
    pub fn reconstructed_mesh_path(&self, tag: SnapshotTag, shape: &str) -> PathBuf {
        self.root
            .join(Self::RECONSTRUCTIONS_DIR)
            .join(tag.to_string())
            .join(format!("{shape}.obj"))
    }

    /// Latent code of `shape` reconstructed against snapshot `tag`.
    pub fn reconstructed_latent_path(&self, tag: SnapshotTag, shape: &str) -> PathBuf {
        self.root
            .join(Self::RECONSTRUCTIONS_DIR)
            .join(tag.to_string())
            .join(format!("{shape}.bin"))
    }

    /// Write the training configuration.
    pub fn save_specs(&self, config: &TrainingConfig) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.specs_path(), serde_json::to_string_pretty(config)?)?;
        Ok(())
    }

    /// Read the training configuration.
    pub fn load_specs(&self) -> Result<TrainingConfig> {
        let path = self.specs_path();
        if !path.exists() {
            return Err(DeepSdfError::MissingFile { path });
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Whether every component of a snapshot exists.
    pub fn snapshot_exists(&self, tag: SnapshotTag) -> bool {
        [
            ArtifactKind::ModelParameters,
            ArtifactKind::OptimizerParameters,
            ArtifactKind::LatentCodes,
        ]
        .iter()
        .all(|&kind| self.artifact_path(kind, tag).exists())
            && self.logs_path().exists()
    }

    /// Highest numbered snapshot with decoder weights on disk.
    pub fn latest_numbered_snapshot(&self) -> Option<usize> {
        let entries = fs::read_dir(self.root.join(ArtifactKind::ModelParameters.dir_name())).ok()?;
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let name = name.to_str()?;
                name.strip_suffix(".bin")?.parse::<usize>().ok()
            })
            .max()
    }
}

/// Write decoder weights.
pub fn save_model<B: Backend>(dir: &ExperimentDir, tag: SnapshotTag, decoder: &SdfDecoder<B>, epoch: usize) -> Result<()> {
    let mut archive = TensorArchive::new(ArtifactKind::ModelParameters, epoch);
    for param in decoder.parameters() {
        archive.tensors.push(StoredTensor::from_tensor(param)?);
    }
    archive.save(dir.artifact_path(ArtifactKind::ModelParameters, tag))
}

/// Read decoder weights into the architecture of `template`.
pub fn load_model<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    template: &SdfDecoder<B>,
    device: &B::Device,
) -> Result<(SdfDecoder<B>, usize)> {
    let archive = TensorArchive::load(dir.artifact_path(ArtifactKind::ModelParameters, tag), ArtifactKind::ModelParameters)?;
    let params = archive.tensors.iter().map(|t| t.to_tensor(device)).collect();
    Ok((template.with_parameters(params)?, archive.epoch))
}

/// Write optimizer moments and step counters.
pub fn save_optimizer<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    state: &OptimizerState<B>,
    epoch: usize,
) -> Result<()> {
    let mut archive = TensorArchive::new(ArtifactKind::OptimizerParameters, epoch);
    for adam in state.states() {
        archive.tensors.push(StoredTensor::from_tensor(adam.moment_1().clone())?);
        archive.tensors.push(StoredTensor::from_tensor(adam.moment_2().clone())?);
        archive.counters.extend_from_slice(adam.row_steps());
    }
    archive.save(dir.artifact_path(ArtifactKind::OptimizerParameters, tag))
}

/// Read optimizer state; `template` fixes the expected shapes.
pub fn load_optimizer<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    template: &OptimizerState<B>,
    device: &B::Device,
) -> Result<(OptimizerState<B>, usize)> {
    let archive = TensorArchive::load(
        dir.artifact_path(ArtifactKind::OptimizerParameters, tag),
        ArtifactKind::OptimizerParameters,
    )?;
    let shapes: Vec<[usize; 2]> = template.states().map(AdamState::shape).collect();
    if archive.tensors.len() != shapes.len() * 2 {
        return Err(DeepSdfError::DimensionMismatch {
            what: "optimizer state tensors".to_string(),
            expected: vec![shapes.len() * 2],
            got: vec![archive.tensors.len()],
        });
    }
    let total_rows: usize = shapes.iter().map(|s| s[0]).sum();
    if archive.counters.len() != total_rows {
        return Err(DeepSdfError::DimensionMismatch {
            what: "optimizer step counters".to_string(),
            expected: vec![total_rows],
            got: vec![archive.counters.len()],
        });
    }

    let mut states = Vec::with_capacity(shapes.len());
    let mut offset = 0;
    for (i, shape) in shapes.iter().enumerate() {
        let (m1, m2) = (&archive.tensors[2 * i], &archive.tensors[2 * i + 1]);
        m1.expect_shape("optimizer first moment", *shape)?;
        m2.expect_shape("optimizer second moment", *shape)?;
        let steps = archive.counters[offset..offset + shape[0]].to_vec();
        offset += shape[0];
        states.push(AdamState::from_parts(m1.to_tensor(device), m2.to_tensor(device), steps)?);
    }

    let log_var = states.pop();
    let mean = states.pop();
    match (mean, log_var) {
        (Some(mean), Some(log_var)) => Ok((
            OptimizerState {
                decoder: states,
                mean,
                log_var,
            },
            archive.epoch,
        )),
        _ => Err(DeepSdfError::InvalidData("optimizer state is missing latent groups".to_string())),
    }
}

/// Write a latent code fitted for `shape` against snapshot `tag`.
pub fn save_reconstructed_latent<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    shape: &str,
    latent: Tensor<B, 2>,
    epoch: usize,
) -> Result<()> {
    let mut archive = TensorArchive::new(ArtifactKind::LatentCodes, epoch);
    archive.tensors.push(StoredTensor::from_tensor(latent)?);
    archive.save(dir.reconstructed_latent_path(tag, shape))
}

/// Read a reconstructed latent code and the model epoch it was fitted against.
pub fn load_reconstructed_latent<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    shape: &str,
    device: &B::Device,
) -> Result<(Tensor<B, 2>, usize)> {
    let archive = TensorArchive::load(dir.reconstructed_latent_path(tag, shape), ArtifactKind::LatentCodes)?;
    let latent = archive
        .tensors
        .first()
        .ok_or_else(|| DeepSdfError::InvalidData(format!("no latent stored for {shape}")))?;
    Ok((latent.to_tensor(device), archive.epoch))
}

/// Write both latent tables.
pub fn save_latent_codes<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    bank: &LatentBank<B>,
    epoch: usize,
) -> Result<()> {
    let mut archive = TensorArchive::new(ArtifactKind::LatentCodes, epoch);
    archive.tensors.push(StoredTensor::from_tensor(bank.mean.clone())?);
    archive.tensors.push(StoredTensor::from_tensor(bank.log_var.clone())?);
    archive.save(dir.artifact_path(ArtifactKind::LatentCodes, tag))
}

/// Read latent tables, requiring `[num_shapes, latent_size]`.
pub fn load_latent_codes<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    num_shapes: usize,
    latent_size: usize,
    code_bound: Option<f32>,
    device: &B::Device,
) -> Result<(LatentBank<B>, usize)> {
    let archive = TensorArchive::load(dir.artifact_path(ArtifactKind::LatentCodes, tag), ArtifactKind::LatentCodes)?;
    let [mean, log_var] = archive.tensors.as_slice() else {
        return Err(DeepSdfError::InvalidData(format!(
            "latent artifact holds {} tensors, expected 2",
            archive.tensors.len()
        )));
    };
    mean.expect_shape("latent mean table", [num_shapes, latent_size])?;
    log_var.expect_shape("latent log-variance table", [num_shapes, latent_size])?;

    let bank = LatentBank::from_tables(mean.to_tensor(device), log_var.to_tensor(device), code_bound)?;
    Ok((bank, archive.epoch))
}

/// A fully loaded, epoch-consistent snapshot.
#[derive(Debug, Clone)]
pub struct Checkpoint<B: Backend> {
    /// Decoder weights.
    pub decoder: SdfDecoder<B>,
    /// Optimizer state.
    pub optimizer: OptimizerState<B>,
    /// Latent tables.
    pub latents: LatentBank<B>,
    /// Logs clipped to `epoch`.
    pub logs: TrainingLogs,
    /// Epoch shared by all components.
    pub epoch: usize,
}

/// Write decoder, optimizer and latent artifacts for `tag`.
pub fn save_checkpoint<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    decoder: &SdfDecoder<B>,
    optimizer: &OptimizerState<B>,
    latents: &LatentBank<B>,
    epoch: usize,
) -> Result<()> {
    save_model(dir, tag, decoder, epoch)?;
    save_optimizer(dir, tag, optimizer, epoch)?;
    save_latent_codes(dir, tag, latents, epoch)?;
    log::debug!("saved snapshot '{}' at epoch {}", tag, epoch);
    Ok(())
}

/// Load every component of `tag` and check that they agree on the epoch.
///
/// The templates fix the expected architecture and table shapes.
/// Logs written past the model epoch are clipped; logs behind it, or any
/// disagreement among the binary artifacts, is an
/// [`DeepSdfError::EpochMismatch`].
pub fn load_checkpoint<B: Backend>(
    dir: &ExperimentDir,
    tag: SnapshotTag,
    decoder_template: &SdfDecoder<B>,
    optimizer_template: &OptimizerState<B>,
    latent_template: &LatentBank<B>,
    device: &B::Device,
) -> Result<Checkpoint<B>> {
    let (latents, latent_epoch) = load_latent_codes(
        dir,
        tag,
        latent_template.num_shapes(),
        latent_template.latent_size(),
        latent_template.code_bound(),
        device,
    )?;
    let (decoder, model_epoch) = load_model(dir, tag, decoder_template, device)?;
    let (optimizer, optimizer_epoch) = load_optimizer(dir, tag, optimizer_template, device)?;
    let mut logs = TrainingLogs::load(dir.logs_path())?;

    let mismatch = || DeepSdfError::EpochMismatch {
        model: model_epoch,
        optimizer: optimizer_epoch,
        latent: latent_epoch,
        logs: logs.epoch,
    };
    if model_epoch != optimizer_epoch || model_epoch != latent_epoch {
        return Err(mismatch());
    }
    if logs.epoch < model_epoch {
        return Err(mismatch());
    }
    if logs.epoch > model_epoch {
        log::info!("clipping logs from epoch {} to {}", logs.epoch, model_epoch);
        logs.clip(model_epoch);
    }

    log::info!("Loaded snapshot '{}' from {:?} (epoch {})", tag, dir.root(), model_epoch);

    Ok(Checkpoint {
        decoder,
        optimizer,
        latents,
        logs,
        epoch: model_epoch,
    })
}

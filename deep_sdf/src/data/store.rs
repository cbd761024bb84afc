//! Sample stores: in-memory and on-disk access to per-shape samples.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rand::Rng;
use rayon::prelude::*;

use super::samples::{SampleRow, ShapeSamples};
use crate::error::{DeepSdfError, Result};

/// File extension of binary sample files.
pub const SAMPLES_EXTENSION: &str = "sdfs";

const SAMPLES_MAGIC: [u8; 4] = *b"SDFS";
const SAMPLES_VERSION: u32 = 1;
/// Magic, version and the two row counts.
const SAMPLES_HEADER_BYTES: u64 = 4 + 4 + 8 + 8;
const SAMPLE_ROW_BYTES: u64 = 16;

/// Name of the optional label file in a sample directory.
const LABELS_FILE: &str = "labels.json";

/// Read-only access to training shapes.
///
/// Implementations are shared with prefetch workers and must be thread-safe.
pub trait SampleStore: Send + Sync {
    /// Number of shapes.
    fn len(&self) -> usize;

    /// Check if empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positive and negative samples of shape `id`.
    fn samples(&self, id: usize) -> Result<Arc<ShapeSamples>>;

    /// Scalar label of shape `id` (0.0 when unlabelled).
    fn label(&self, id: usize) -> f32;

    /// Instance name of shape `id`.
    fn name(&self, id: usize) -> Option<&str>;
}

fn out_of_range(id: usize, len: usize) -> DeepSdfError {
    DeepSdfError::InvalidData(format!("shape id {id} out of range (store has {len} shapes)"))
}

#[derive(Debug, Clone)]
struct StoredShape {
    name: String,
    samples: Arc<ShapeSamples>,
    label: f32,
}

/// Shapes held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySampleStore {
    shapes: Vec<StoredShape>,
}

impl InMemorySampleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a shape and return its id.
    pub fn push(&mut self, name: impl Into<String>, samples: ShapeSamples, label: f32) -> usize {
        self.shapes.push(StoredShape {
            name: name.into(),
            samples: Arc::new(samples),
            label,
        });
        self.shapes.len() - 1
    }

    /// Load every readable shape of a sample directory into memory.
    ///
    /// Both halves of each shape are shuffled once at load time so that the
    /// contiguous windows drawn by [`subsample`](super::subsample) are not
    /// spatially ordered. Missing and unreadable files are logged and skipped.
    pub fn load_dir<R: Rng + ?Sized>(root: impl AsRef<Path>, names: &[String], rng: &mut R) -> Result<Self> {
        let files = FileSampleStore::open(root, names)?;
        let loaded: Vec<Result<Arc<ShapeSamples>>> = (0..files.len())
            .into_par_iter()
            .map(|id| files.samples(id))
            .collect();

        let mut store = Self::new();
        for (id, samples) in loaded.into_iter().enumerate() {
            let name = files.name(id).unwrap_or_default().to_string();
            match samples {
                Ok(samples) => {
                    store.push(name, samples.permuted(rng), files.label(id));
                }
                Err(e) => log::warn!("Skipping unreadable sample file for '{}': {}", name, e),
            }
        }
        if store.is_empty() {
            return Err(DeepSdfError::InvalidData(format!(
                "no readable sample files under {}",
                files.root().display()
            )));
        }
        log::debug!("loaded {} shapes into memory", store.len());
        Ok(store)
    }
}

impl SampleStore for InMemorySampleStore {
    fn len(&self) -> usize {
        self.shapes.len()
    }

    fn samples(&self, id: usize) -> Result<Arc<ShapeSamples>> {
        self.shapes
            .get(id)
            .map(|s| Arc::clone(&s.samples))
            .ok_or_else(|| out_of_range(id, self.shapes.len()))
    }

    fn label(&self, id: usize) -> f32 {
        self.shapes.get(id).map_or(0.0, |s| s.label)
    }

    fn name(&self, id: usize) -> Option<&str> {
        self.shapes.get(id).map(|s| s.name.as_str())
    }
}

/// Shapes read from `<root>/<name>.sdfs` on every access.
#[derive(Debug, Clone)]
pub struct FileSampleStore {
    root: PathBuf,
    names: Vec<String>,
    labels: Vec<f32>,
}

impl FileSampleStore {
    /// Index the sample files of `names` under `root`.
    ///
    /// Names without a sample file are logged and skipped, so shape ids are
    /// assigned in order among the files that exist. Labels come from
    /// `labels.json` (a map from name to value) when present.
    pub fn open(root: impl AsRef<Path>, names: &[String]) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let label_map = read_labels(&root)?;

        let mut kept = Vec::with_capacity(names.len());
        let mut labels = Vec::with_capacity(names.len());
        for name in names {
            let path = samples_path(&root, name);
            if !path.is_file() {
                log::warn!("Requested non-existent file '{}'", path.display());
                continue;
            }
            labels.push(label_map.get(name).copied().unwrap_or(0.0));
            kept.push(name.clone());
        }

        if kept.is_empty() {
            return Err(DeepSdfError::InvalidData(format!(
                "no sample files found under {}",
                root.display()
            )));
        }
        log::debug!("using {} shapes from data source {}", kept.len(), root.display());

        Ok(Self {
            root,
            names: kept,
            labels,
        })
    }

    /// Sample directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SampleStore for FileSampleStore {
    fn len(&self) -> usize {
        self.names.len()
    }

    fn samples(&self, id: usize) -> Result<Arc<ShapeSamples>> {
        let name = self
            .names
            .get(id)
            .ok_or_else(|| out_of_range(id, self.names.len()))?;
        read_samples_file(samples_path(&self.root, name)).map(Arc::new)
    }

    fn label(&self, id: usize) -> f32 {
        self.labels.get(id).copied().unwrap_or(0.0)
    }

    fn name(&self, id: usize) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }
}

fn samples_path(root: &Path, name: &str) -> PathBuf {
    root.join(format!("{name}.{SAMPLES_EXTENSION}"))
}

fn read_labels(root: &Path) -> Result<HashMap<String, f32>> {
    let path = root.join(LABELS_FILE);
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Write a sample file: magic, version, row counts, then little-endian rows.
pub fn write_samples_file(path: impl AsRef<Path>, samples: &ShapeSamples) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);

    writer.write_all(&SAMPLES_MAGIC)?;
    writer.write_all(&SAMPLES_VERSION.to_le_bytes())?;
    writer.write_all(&(samples.positive.len() as u64).to_le_bytes())?;
    writer.write_all(&(samples.negative.len() as u64).to_le_bytes())?;
    for row in samples.positive.iter().chain(&samples.negative) {
        for value in row {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    writer.flush()?;
    Ok(())
}

/// Read a sample file written by [`write_samples_file`]. NaN rows are dropped.
pub fn read_samples_file(path: impl AsRef<Path>) -> Result<ShapeSamples> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DeepSdfError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != SAMPLES_MAGIC {
        return Err(DeepSdfError::InvalidData(format!(
            "{} is not a sample file",
            path.display()
        )));
    }
    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    let version = u32::from_le_bytes(word);
    if version != SAMPLES_VERSION {
        return Err(DeepSdfError::InvalidData(format!(
            "unsupported sample file version {version}"
        )));
    }

    let mut count = [0u8; 8];
    reader.read_exact(&mut count)?;
    let num_positive = u64::from_le_bytes(count);
    reader.read_exact(&mut count)?;
    let num_negative = u64::from_le_bytes(count);

    // The header fixes the payload size; reject it before allocating.
    let expected = num_positive
        .checked_add(num_negative)
        .and_then(|rows| rows.checked_mul(SAMPLE_ROW_BYTES))
        .and_then(|payload| payload.checked_add(SAMPLES_HEADER_BYTES));
    if expected != Some(file_len) {
        return Err(DeepSdfError::InvalidData(format!(
            "{}: header declares {} + {} rows but the file holds {} bytes",
            path.display(),
            num_positive,
            num_negative,
            file_len
        )));
    }
    let num_positive = usize::try_from(num_positive)
        .map_err(|_| DeepSdfError::InvalidData("sample count does not fit in memory".to_string()))?;
    let num_negative = usize::try_from(num_negative)
        .map_err(|_| DeepSdfError::InvalidData("sample count does not fit in memory".to_string()))?;

    let mut read_rows = |n: usize| -> Result<Vec<SampleRow>> {
        let mut rows = Vec::with_capacity(n);
        let mut buf = [0u8; 16];
        for _ in 0..n {
            reader.read_exact(&mut buf)?;
            let mut row = [0.0f32; 4];
            for (i, chunk) in buf.chunks_exact(4).enumerate() {
                row[i] = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            }
            rows.push(row);
        }
        Ok(rows)
    };
    let positive = read_rows(num_positive)?;
    let negative = read_rows(num_negative)?;

    Ok(ShapeSamples::new(positive, negative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn sample_set() -> ShapeSamples {
        ShapeSamples::new(
            vec![[0.1, 0.2, 0.3, 0.05], [0.0, 0.0, 0.9, f32::NAN]],
            vec![[0.0, 0.0, 0.0, -0.5]],
        )
    }

    #[test]
    fn test_sample_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.sdfs");
        write_samples_file(&path, &sample_set()).unwrap();
        let loaded = read_samples_file(&path).unwrap();
        assert_eq!(loaded, sample_set());
        assert_eq!(loaded.positive.len(), 1);
    }

    #[test]
    fn test_bad_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.sdfs");
        fs::write(&path, b"NOPE0000000000000000").unwrap();
        assert!(matches!(read_samples_file(&path), Err(DeepSdfError::InvalidData(_))));
    }

    #[test]
    fn test_file_store_skips_missing() {
        let dir = TempDir::new().unwrap();
        write_samples_file(dir.path().join("a.sdfs"), &sample_set()).unwrap();
        write_samples_file(dir.path().join("c.sdfs"), &sample_set()).unwrap();
        fs::write(dir.path().join("labels.json"), r#"{"c": 1.0}"#).unwrap();

        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let store = FileSampleStore::open(dir.path(), &names).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.name(1), Some("c"));
        assert_eq!(store.label(0), 0.0);
        assert_eq!(store.label(1), 1.0);
        assert_eq!(store.samples(1).unwrap().negative.len(), 1);
        assert!(store.samples(2).is_err());
    }

    #[test]
    fn test_file_store_requires_files() {
        let dir = TempDir::new().unwrap();
        assert!(FileSampleStore::open(dir.path(), &["x".to_string()]).is_err());
    }

    #[test]
    fn test_oversized_row_count_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("huge.sdfs");
        write_samples_file(&path, &sample_set()).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes[8..16].copy_from_slice(&(u64::MAX / 4).to_le_bytes());
        fs::write(&path, bytes).unwrap();

        assert!(matches!(read_samples_file(&path), Err(DeepSdfError::InvalidData(_))));
    }

    #[test]
    fn test_truncated_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("short.sdfs");
        write_samples_file(&path, &sample_set()).unwrap();
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        assert!(matches!(read_samples_file(&path), Err(DeepSdfError::InvalidData(_))));
    }

    #[test]
    fn test_load_dir_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        write_samples_file(dir.path().join("good.sdfs"), &sample_set()).unwrap();
        write_samples_file(dir.path().join("bad.sdfs"), &sample_set()).unwrap();
        let mut bytes = fs::read(dir.path().join("bad.sdfs")).unwrap();
        bytes[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        fs::write(dir.path().join("bad.sdfs"), bytes).unwrap();

        let names = vec!["bad".to_string(), "good".to_string()];
        let mut rng = StdRng::seed_from_u64(0);
        let store = InMemorySampleStore::load_dir(dir.path(), &names, &mut rng).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.name(0), Some("good"));

        let bad_only = InMemorySampleStore::load_dir(dir.path(), &names[..1], &mut rng);
        assert!(matches!(bad_only, Err(DeepSdfError::InvalidData(_))));
    }

    #[test]
    fn test_load_dir_into_memory() {
        let dir = TempDir::new().unwrap();
        write_samples_file(dir.path().join("a.sdfs"), &sample_set()).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let store = InMemorySampleStore::load_dir(dir.path(), &["a".to_string()], &mut rng).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.samples(0).unwrap().len(), 2);
    }
}

//! Train/validation/test split files.
//!
//! A split file is a JSON list of instance file names (e.g. `"torus_0042.obj"`);
//! shapes are referred to by the name without extension.

use std::fs;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{DeepSdfError, Result};

fn strip_extension(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| match Path::new(name).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                format!("{}/{}", parent.to_string_lossy(), stem)
            }
            _ => stem.to_string(),
        })
        .unwrap_or_else(|| name.to_string())
}

/// Read instance names from a split file.
pub fn read_split(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(DeepSdfError::MissingFile {
            path: path.to_path_buf(),
        });
    }
    let names: Vec<String> = serde_json::from_str(&fs::read_to_string(path)?)?;
    Ok(names.iter().map(|n| strip_extension(n)).collect())
}

/// Write instance names as a split file.
pub fn write_split(path: impl AsRef<Path>, names: &[String]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(names)?)?;
    Ok(())
}

/// Shuffle `names` and cut them into train/validation/test lists.
pub fn split_names<R: Rng + ?Sized>(
    names: &[String],
    train_ratio: f32,
    val_ratio: f32,
    rng: &mut R,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut shuffled = names.to_vec();
    shuffled.shuffle(rng);

    let n = shuffled.len();
    let train_end = ((n as f32 * train_ratio) as usize).min(n);
    let val_end = (train_end + (n as f32 * val_ratio) as usize).min(n);

    let test = shuffled.split_off(val_end);
    let val = shuffled.split_off(train_end);
    (shuffled, val, test)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    #[test]
    fn test_split_round_trip_strips_extensions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("splits/train.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"["torus_1.obj", "torus_2.obj", "chairs/c3"]"#).unwrap();

        let names = read_split(&path).unwrap();
        assert_eq!(names, vec!["torus_1", "torus_2", "chairs/c3"]);

        write_split(&path, &names).unwrap();
        assert_eq!(read_split(&path).unwrap(), names);
    }

    #[test]
    fn test_missing_split() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_split(dir.path().join("nope.json")),
            Err(DeepSdfError::MissingFile { .. })
        ));
    }

    #[test]
    fn test_split_ratios() {
        let names: Vec<String> = (0..100).map(|i| format!("s{i}")).collect();
        let mut rng = StdRng::seed_from_u64(0);
        let (train, val, test) = split_names(&names, 0.7, 0.15, &mut rng);
        assert_eq!(train.len(), 70);
        assert_eq!(val.len(), 15);
        assert_eq!(test.len(), 15);
    }
}

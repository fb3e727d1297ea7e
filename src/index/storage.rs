//! On-disk layout of an index directory.
//!
//! * `ids.json`: JSON array of identifiers in row order.
//! * `vectors.bin`: `u32` rows, `u32` cols (little endian), then `rows * cols`
//!   little-endian `f32`. Rows 0 and 1 hold the normalization parameters.
//! * `manifest.json`: method, scheme, shape, build time and the SHA-256 of
//!   `vectors.bin`.
//!
//! [`save`] stages the three files in a hidden sibling directory and renames it
//! into place, so a reader never sees a half-written index. Both the staging
//! directory and the holder for the replaced index contain a child named after
//! the index, which is how [`recover_interrupted`] finds what a crash left
//! behind. One writer per index directory is assumed.

use std::cmp::Reverse;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use super::{Index, NormalizationParams, NormalizationScheme};
use crate::analysis::ExtractionMethod;
use crate::error::IndexError;

pub const IDS_FILE_NAME: &str = "ids.json";
pub const VECTORS_FILE_NAME: &str = "vectors.bin";
pub const MANIFEST_FILE_NAME: &str = "manifest.json";
/// Current index layout version.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 8;
const STAGING_PREFIX: &str = ".staging-";
const REPLACED_PREFIX: &str = ".replaced-";

/// Metadata persisted next to the vectors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub format_version: u32,
    pub method: ExtractionMethod,
    pub normalization: NormalizationScheme,
    pub dimension: usize,
    pub count: usize,
    #[serde(default)]
    pub corpus_root: Option<PathBuf>,
    pub built_at: String,
    pub vectors_sha256: String,
}

/// Persist `index` at `dir`, replacing any previous index there.
pub fn save(index: &Index, dir: &Path) -> Result<IndexManifest, IndexError> {
    let (parent, name) = split_index_dir(dir)?;
    fs::create_dir_all(&parent).map_err(|source| IndexError::io(&parent, source))?;
    recover_interrupted(dir)?;

    let staging = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&parent)
        .map_err(|source| IndexError::io(&parent, source))?;
    let staged = staging.path().join(&name);
    fs::create_dir(&staged).map_err(|source| IndexError::io(&staged, source))?;
    let manifest = write_artifacts(index, &staged)?;

    // Keep the previous index until the new one is in place.
    let previous = if dir.exists() {
        let holder = tempfile::Builder::new()
            .prefix(REPLACED_PREFIX)
            .tempdir_in(&parent)
            .map_err(|source| IndexError::io(&parent, source))?;
        let moved = holder.path().join(&name);
        fs::rename(dir, &moved).map_err(|source| IndexError::io(dir, source))?;
        Some((holder, moved))
    } else {
        None
    };

    if let Err(source) = fs::rename(&staged, dir) {
        if let Some((_, moved)) = previous.as_ref()
            && let Err(err) = fs::rename(moved, dir)
        {
            warn!("Failed to restore previous index at {}: {err}", dir.display());
        }
        return Err(IndexError::io(dir, source));
    }
    drop(previous);
    drop(staging);
    debug!("Published index with {} entries at {}", index.len(), dir.display());
    Ok(manifest)
}

/// Restore or discard what an interrupted [`save`] of `dir` left behind.
///
/// When `dir` is missing, the newest stranded previous index is moved back.
/// Every other holder and staging directory for `dir` is removed. Leftovers of
/// other indexes in the same parent are not touched.
pub fn recover_interrupted(dir: &Path) -> Result<(), IndexError> {
    let (parent, name) = split_index_dir(dir)?;
    let mut replaced = leftovers(&parent, &name, REPLACED_PREFIX);
    if !dir.exists() && !replaced.is_empty() {
        let newest = replaced.remove(0);
        fs::rename(&newest, dir).map_err(|source| IndexError::io(dir, source))?;
        info!("Restored previous index at {} after an interrupted save", dir.display());
        remove_holder(&newest);
    }
    for stale in replaced
        .iter()
        .chain(&leftovers(&parent, &name, STAGING_PREFIX))
    {
        remove_holder(stale);
    }
    Ok(())
}

fn split_index_dir(dir: &Path) -> Result<(PathBuf, OsString), IndexError> {
    let parent = match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let name = dir
        .file_name()
        .ok_or_else(|| IndexError::corrupt(dir, "index path has no directory name"))?;
    Ok((parent, name.to_os_string()))
}

/// `<parent>/<prefix>*/<name>` directories, newest holder first.
fn leftovers(parent: &Path, name: &OsStr, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(parent) else {
        return Vec::new();
    };
    let mut found: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(prefix))
        .map(|entry| entry.path())
        .filter(|holder| holder.join(name).is_dir())
        .map(|holder| {
            let modified = fs::metadata(&holder).and_then(|meta| meta.modified()).ok();
            (modified, holder.join(name))
        })
        .collect();
    found.sort_by_key(|(modified, _)| Reverse(*modified));
    found.into_iter().map(|(_, path)| path).collect()
}

fn remove_holder(inner: &Path) {
    let Some(holder) = inner.parent() else {
        return;
    };
    match fs::remove_dir_all(holder) {
        Ok(()) => debug!("Removed leftover {}", holder.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Failed to remove leftover {}: {err}", holder.display()),
    }
}

/// Write the three artifacts into an existing, empty directory.
fn write_artifacts(index: &Index, dir: &Path) -> Result<IndexManifest, IndexError> {
    let ids_path = dir.join(IDS_FILE_NAME);
    let ids = serde_json::to_vec_pretty(index.ids())
        .map_err(|source| IndexError::Json {
            path: ids_path.clone(),
            source,
        })?;
    fs::write(&ids_path, ids).map_err(|source| IndexError::io(&ids_path, source))?;

    let vectors_path = dir.join(VECTORS_FILE_NAME);
    let blob = encode_vectors(index);
    fs::write(&vectors_path, &blob).map_err(|source| IndexError::io(&vectors_path, source))?;

    let built_at = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();
    let manifest = IndexManifest {
        format_version: FORMAT_VERSION,
        method: index.method(),
        normalization: index.params().scheme(),
        dimension: index.dimension(),
        count: index.len(),
        corpus_root: index.corpus_root().map(Path::to_path_buf),
        built_at,
        vectors_sha256: sha256_hex(&blob),
    };
    let manifest_path = dir.join(MANIFEST_FILE_NAME);
    let data = serde_json::to_vec_pretty(&manifest).map_err(|source| IndexError::Json {
        path: manifest_path.clone(),
        source,
    })?;
    fs::write(&manifest_path, data).map_err(|source| IndexError::io(&manifest_path, source))?;
    Ok(manifest)
}

/// Load the index at `dir`. Fails with `NotFound` if nothing is there.
///
/// A previous index stranded by an interrupted [`save`] is read in place when
/// `dir` is missing; the next save moves it back.
pub fn load(dir: &Path) -> Result<Index, IndexError> {
    let dir = readable_dir(dir)?;
    let dir = dir.as_path();
    let manifest = read_manifest(dir)?;
    if manifest.format_version != FORMAT_VERSION {
        return Err(IndexError::corrupt(
            dir,
            format!("unsupported format version {}", manifest.format_version),
        ));
    }

    let ids_path = dir.join(IDS_FILE_NAME);
    let ids_bytes = read_required(&ids_path)?;
    let ids: Vec<String> = serde_json::from_slice(&ids_bytes).map_err(|source| IndexError::Json {
        path: ids_path.clone(),
        source,
    })?;

    let vectors_path = dir.join(VECTORS_FILE_NAME);
    let blob = read_required(&vectors_path)?;
    if sha256_hex(&blob) != manifest.vectors_sha256 {
        return Err(IndexError::corrupt(&vectors_path, "checksum mismatch"));
    }
    let (rows, cols, values) = decode_vectors(&blob).map_err(|reason| IndexError::corrupt(&vectors_path, reason))?;
    if rows != ids.len() + 2 {
        return Err(IndexError::corrupt(
            dir,
            format!("{rows} rows for {} identifiers (expected identifiers + 2)", ids.len()),
        ));
    }
    if cols != manifest.dimension || ids.len() != manifest.count {
        return Err(IndexError::corrupt(dir, "manifest does not match stored vectors"));
    }
    if manifest.method != ExtractionMethod::Embedding && cols != manifest.method.dimension() {
        return Err(IndexError::corrupt(
            dir,
            format!("{} vectors have {} dims, found {cols}", manifest.method, manifest.method.dimension()),
        ));
    }

    let mut values = values;
    let body = values.split_off(2 * cols);
    let second = values.split_off(cols);
    let params = NormalizationParams::from_rows(manifest.normalization, values, second)?;
    let vectors = Array2::from_shape_vec((ids.len(), cols), body)
        .map_err(|err| IndexError::corrupt(&vectors_path, err.to_string()))?;
    let index = Index::new(manifest.method, params, ids, vectors)?;
    Ok(match manifest.corpus_root {
        Some(root) => index.with_corpus_root(root),
        None => index,
    })
}

fn readable_dir(dir: &Path) -> Result<PathBuf, IndexError> {
    if dir.exists() {
        return Ok(dir.to_path_buf());
    }
    let not_found = || IndexError::NotFound {
        path: dir.to_path_buf(),
    };
    let (parent, name) = split_index_dir(dir).map_err(|_| not_found())?;
    match leftovers(&parent, &name, REPLACED_PREFIX).into_iter().next() {
        Some(stranded) => {
            warn!(
                "Index at {} is missing; reading the copy left by an interrupted save at {}",
                dir.display(),
                stranded.display()
            );
            Ok(stranded)
        }
        None => Err(not_found()),
    }
}

/// Load the index at `dir` and check that it was built with `method`.
pub fn load_for_method(dir: &Path, method: ExtractionMethod) -> Result<Index, IndexError> {
    let index = load(dir)?;
    if index.method() != method {
        return Err(IndexError::corrupt(
            dir,
            format!("index was built with {}, expected {method}", index.method()),
        ));
    }
    Ok(index)
}

/// Read only the manifest of an index directory.
pub fn read_manifest(dir: &Path) -> Result<IndexManifest, IndexError> {
    let path = dir.join(MANIFEST_FILE_NAME);
    let bytes = read_required(&path)?;
    serde_json::from_slice(&bytes).map_err(|source| IndexError::Json { path, source })
}

fn read_required(path: &Path) -> Result<Vec<u8>, IndexError> {
    fs::read(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            IndexError::corrupt(path, "missing artifact")
        } else {
            IndexError::io(path, source)
        }
    })
}

fn encode_vectors(index: &Index) -> Vec<u8> {
    let rows = index.len() + 2;
    let cols = index.dimension();
    let mut out = Vec::with_capacity(HEADER_LEN + rows * cols * 4);
    out.extend_from_slice(&(rows as u32).to_le_bytes());
    out.extend_from_slice(&(cols as u32).to_le_bytes());
    let params = index.params();
    let parameter_rows = params.first().into_iter().chain(params.second());
    for &value in parameter_rows.chain(index.vectors().iter()) {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn decode_vectors(blob: &[u8]) -> Result<(usize, usize, Vec<f32>), String> {
    if blob.len() < HEADER_LEN {
        return Err("vector file shorter than its header".into());
    }
    let (header, body) = blob.split_at(HEADER_LEN);
    let rows = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
    let cols = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| "vector shape overflows".to_string())?;
    if body.len() != expected {
        return Err(format!(
            "expected {expected} bytes for {rows}x{cols} vectors, found {}",
            body.len()
        ));
    }
    if rows < 2 {
        return Err("missing normalization rows".into());
    }
    let values = body
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    Ok((rows, cols, values))
}

fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn index_with(ids: &[&str], raw: Array2<f32>) -> Index {
        let params = NormalizationParams::fit(NormalizationScheme::MinMax, raw.view()).unwrap();
        let mut vectors = raw;
        params.apply_rows(&mut vectors).unwrap();
        Index::new(
            ExtractionMethod::Descriptor,
            params,
            ids.iter().map(|id| id.to_string()).collect(),
            vectors,
        )
        .unwrap()
    }

    fn descriptor_rows(n: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, 7), |(r, c)| (r * 7 + c) as f32 * 0.5)
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("drums_descriptor");
        let index = index_with(&["a.wav", "sub/b.wav", "c.wav"], descriptor_rows(3))
            .with_corpus_root("/corpus/drums");
        let manifest = save(&index, &target).unwrap();
        assert_eq!(manifest.count, 3);
        assert_eq!(manifest.dimension, 7);

        let loaded = load(&target).unwrap();
        assert_eq!(loaded.ids(), index.ids());
        assert_eq!(loaded.params(), index.params());
        assert_eq!(loaded.vectors(), index.vectors());
        assert_eq!(loaded.corpus_root(), Some(Path::new("/corpus/drums")));
    }

    #[test]
    fn row_count_is_identifiers_plus_two() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("idx");
        save(&index_with(&["a", "b"], descriptor_rows(2)), &target).unwrap();
        let blob = fs::read(target.join(VECTORS_FILE_NAME)).unwrap();
        let (rows, cols, values) = decode_vectors(&blob).unwrap();
        assert_eq!((rows, cols), (4, 7));
        assert_eq!(values.len(), 28);
    }

    #[test]
    fn missing_directory_is_not_found() {
        let dir = tempdir().unwrap();
        let err = load(&dir.path().join("never_built")).unwrap_err();
        assert!(matches!(err, IndexError::NotFound { .. }));
    }

    #[test]
    fn tampered_vectors_are_corrupt() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("idx");
        save(&index_with(&["a", "b"], descriptor_rows(2)), &target).unwrap();
        let path = target.join(VECTORS_FILE_NAME);
        let mut blob = fs::read(&path).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        fs::write(&path, blob).unwrap();
        assert!(matches!(load(&target), Err(IndexError::Corrupt { .. })));
    }

    #[test]
    fn extra_identifier_breaks_the_row_invariant() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("idx");
        save(&index_with(&["a", "b"], descriptor_rows(2)), &target).unwrap();
        fs::write(target.join(IDS_FILE_NAME), br#"["a","b","c"]"#).unwrap();
        assert!(matches!(load(&target), Err(IndexError::Corrupt { .. })));
    }

    #[test]
    fn republishing_replaces_the_previous_index() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("idx");
        save(&index_with(&["old"], descriptor_rows(1)), &target).unwrap();
        save(&index_with(&["new1", "new2"], descriptor_rows(2)), &target).unwrap();
        let loaded = load(&target).unwrap();
        assert_eq!(loaded.ids(), ["new1".to_string(), "new2".to_string()]);

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["idx".to_string()]);
    }

    #[test]
    fn wrong_method_is_rejected() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("idx");
        save(&index_with(&["a"], descriptor_rows(1)), &target).unwrap();
        assert!(load_for_method(&target, ExtractionMethod::Descriptor).is_ok());
        assert!(matches!(
            load_for_method(&target, ExtractionMethod::Enhanced),
            Err(IndexError::Corrupt { .. })
        ));
    }

    fn entry_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    /// Leave `target` the way a crash between the two renames of `save` does.
    fn strand(root: &Path, target: &Path) {
        let holder = root.join(".replaced-crash");
        fs::create_dir(&holder).unwrap();
        fs::rename(target, holder.join("idx")).unwrap();
        let staged = root.join(".staging-crash").join("idx");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join(IDS_FILE_NAME), b"[").unwrap();
    }

    #[test]
    fn interrupted_save_is_read_back_then_cleaned_up() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("idx");
        save(&index_with(&["kept"], descriptor_rows(1)), &target).unwrap();
        strand(dir.path(), &target);
        let other = dir.path().join(".replaced-other").join("other_idx");
        fs::create_dir_all(&other).unwrap();

        let loaded = load(&target).unwrap();
        assert_eq!(loaded.ids(), ["kept".to_string()]);
        assert!(!target.exists());

        recover_interrupted(&target).unwrap();
        assert_eq!(load(&target).unwrap().ids(), ["kept".to_string()]);
        assert_eq!(entry_names(dir.path()), vec![".replaced-other", "idx"]);
    }

    #[test]
    fn next_save_replaces_a_stranded_index() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("idx");
        save(&index_with(&["old"], descriptor_rows(1)), &target).unwrap();
        strand(dir.path(), &target);

        save(&index_with(&["new"], descriptor_rows(1)), &target).unwrap();
        assert_eq!(load(&target).unwrap().ids(), ["new".to_string()]);
        assert_eq!(entry_names(dir.path()), vec!["idx"]);
    }
}

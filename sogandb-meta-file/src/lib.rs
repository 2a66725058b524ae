//! File-backed bookkeeping store for `SoganDB`.
//!
//! Stores each descriptor row and layer row as one file in a directory
//! tree. Suitable for development and testing; a production proxy keeps
//! its bookkeeping in the backend DBMS itself so that schema state and
//! data share one durability domain.
//!
//! Layout:
//! ```text
//! meta/
//! ├── records/
//! │   ├── 00000001          (parent id line, then the record line)
//! │   └── 00000002
//! └── layers/
//!     ├── 00000003.000      (onion id 3, position 0)
//!     └── 00000003.001
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::missing_errors_doc)]

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use sogandb::error::StoreError;
use sogandb::store::{LayerRow, MetaStore, RecordRow};

/// File-backed [`MetaStore`].
pub struct FileMetaStore {
    records_dir: PathBuf,
    layers_dir: PathBuf,
}

impl FileMetaStore {
    /// Opens an existing store directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory was never initialized.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        let store = Self { records_dir: dir.join("records"), layers_dir: dir.join("layers") };
        if !store.records_dir.is_dir() || !store.layers_dir.is_dir() {
            return Err(StoreError::ReadFailed(format!(
                "store directory {} is not initialized",
                dir.display()
            )));
        }
        Ok(store)
    }

    /// Initializes a fresh store directory and opens it.
    pub fn init(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join("records"))?;
        fs::create_dir_all(dir.join("layers"))?;
        Self::new(dir)
    }

    fn record_path(&self, id: u32) -> PathBuf {
        self.records_dir.join(format!("{id:08}"))
    }

    fn layer_path(&self, onion_id: u32, position: u32) -> PathBuf {
        self.layers_dir.join(format!("{onion_id:08}.{position:03}"))
    }
}

impl MetaStore for FileMetaStore {
    fn put_record(&self, row: &RecordRow) -> Result<(), StoreError> {
        let parent = row.parent_id.map_or_else(|| "-".to_string(), |p| p.to_string());
        write_atomically(&self.record_path(row.id), &format!("{parent}\n{}\n", row.serial))
    }

    fn delete_record(&self, id: u32) -> Result<(), StoreError> {
        remove_if_present(&self.record_path(id))
    }

    fn put_layer(&self, row: &LayerRow) -> Result<(), StoreError> {
        write_atomically(
            &self.layer_path(row.onion_id, row.position),
            &format!("{}\n", row.serial),
        )
    }

    fn delete_layer(&self, onion_id: u32, position: u32) -> Result<(), StoreError> {
        remove_if_present(&self.layer_path(onion_id, position))
    }

    fn load_records(&self) -> Result<Vec<RecordRow>, StoreError> {
        let mut rows = Vec::new();
        for name in sorted_file_names(&self.records_dir)? {
            let id = name
                .parse::<u32>()
                .map_err(|_| StoreError::ReadFailed(format!("stray record file `{name}`")))?;
            let body = read_file(&self.records_dir.join(&name))?;
            let (parent_line, serial) = body.split_once('\n').ok_or_else(|| {
                StoreError::ReadFailed(format!("record file `{name}` is malformed"))
            })?;
            let parent_id = match parent_line {
                "-" => None,
                raw => Some(raw.parse::<u32>().map_err(|_| {
                    StoreError::ReadFailed(format!("record file `{name}` has a bad parent id"))
                })?),
            };
            rows.push(RecordRow { id, parent_id, serial: serial.trim_end().to_string() });
        }
        Ok(rows)
    }

    fn load_layers(&self) -> Result<Vec<LayerRow>, StoreError> {
        let mut rows = Vec::new();
        for name in sorted_file_names(&self.layers_dir)? {
            let (onion_part, position_part) = name.split_once('.').ok_or_else(|| {
                StoreError::ReadFailed(format!("stray layer file `{name}`"))
            })?;
            let onion_id = onion_part
                .parse::<u32>()
                .map_err(|_| StoreError::ReadFailed(format!("stray layer file `{name}`")))?;
            let position = position_part
                .parse::<u32>()
                .map_err(|_| StoreError::ReadFailed(format!("stray layer file `{name}`")))?;
            let serial = read_file(&self.layers_dir.join(&name))?.trim_end().to_string();
            rows.push(LayerRow { onion_id, position, serial });
        }
        Ok(rows)
    }
}

/// Writes through a temporary file and renames, so a crash never leaves a
/// half-written row.
fn write_atomically(path: &Path, content: &str) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_file(path: &Path) -> Result<String, StoreError> {
    let mut content = String::new();
    File::open(path)?.read_to_string(&mut content)?;
    Ok(content)
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Zero-padded fixed-width names make lexicographic order numeric order.
fn sorted_file_names(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.ends_with(".tmp") {
            continue;
        }
        names.push(name);
    }
    names.sort_unstable();
    Ok(names)
}

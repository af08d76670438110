//! Storage boundaries: the local scratch folder where unfinished delta state
//! survives between runs, and the object store where finished delta files go.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::Result;

pub type ObjectReader = Box<dyn Read + Send>;

/// Local scratch state. Names are flat filenames inside the folder.
pub trait DataFolder: Send + Sync {
    /// Opens a file, or returns `None` if it does not exist.
    fn open_file(&self, name: &str) -> Result<Option<ObjectReader>>;
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()>;
    fn file_exists(&self, name: &str) -> bool;
    /// Removes every file in the folder.
    fn clean_folder(&self) -> Result<()>;
}

/// Destination for finished delta files.
pub trait Uploader: Send + Sync {
    fn upload(&self, name: &str, data: &[u8]) -> Result<()>;
}

/// Source of stored delta files and WAL segments.
pub trait StorageReader: Send + Sync {
    /// Opens an object, or returns `None` if it is not stored.
    fn read_object(&self, name: &str) -> Result<Option<ObjectReader>>;
}

fn open_if_exists(path: &Path) -> Result<Option<ObjectReader>> {
    match File::open(path) {
        Ok(file) => Ok(Some(Box::new(file))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Write to a temporary sibling, then rename over the target.
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct DiskDataFolder {
    path: PathBuf,
}

impl DiskDataFolder {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DataFolder for DiskDataFolder {
    fn open_file(&self, name: &str) -> Result<Option<ObjectReader>> {
        open_if_exists(&self.path.join(name))
    }

    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        write_atomically(&self.path.join(name), data)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path.join(name).is_file()
    }

    fn clean_folder(&self) -> Result<()> {
        for entry in WalkDir::new(&self.path).min_depth(1).max_depth(1) {
            let entry = entry.map_err(io::Error::from)?;
            if entry.file_type().is_file() {
                fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

/// A directory standing in for the object store.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Uploader for LocalStore {
    fn upload(&self, name: &str, data: &[u8]) -> Result<()> {
        write_atomically(&self.root.join(name), data)
    }
}

impl StorageReader for LocalStore {
    fn read_object(&self, name: &str) -> Result<Option<ObjectReader>> {
        open_if_exists(&self.root.join(name))
    }
}

use crate::{Error, Tree};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    io::Write,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

/// The name of the file, directly under the test directory, that records the tree on disk.
pub const STATE_FILE: &str = "teststate-meta.json";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct State {
    pub dir_depth: u32,
    pub dir_count: u32,
    pub file_count: u32,
    pub in_progress: bool,
    #[serde(default)]
    pub test_dir: PathBuf,
}

impl State {
    pub fn new(testdir: &Path, tree: Tree, in_progress: bool) -> Self {
        Self {
            dir_depth: tree.depth,
            dir_count: tree.dirs,
            file_count: tree.files,
            in_progress,
            test_dir: testdir.to_path_buf(),
        }
    }

    /// Reads the stashed state. A missing stash describes an empty tree.
    pub fn load(testdir: &Path) -> Result<Self, Error> {
        let path = testdir.join(STATE_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Self::new(testdir, Tree::default(), false));
            }
            Err(e) => return Err(Error::io(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| Error::Json(path, e))
    }

    pub fn store(&self, testdir: &Path) -> Result<(), Error> {
        let path = testdir.join(STATE_FILE);
        let bytes = serde_json::to_vec(self).map_err(|e| Error::Json(path.clone(), e))?;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .and_then(|mut f| f.write_all(&bytes))
            .map_err(|e| Error::io(&path, e))
    }

    pub fn tree(&self) -> Tree {
        Tree {
            depth: self.dir_depth,
            dirs: self.dir_count,
            files: self.file_count,
        }
    }
}

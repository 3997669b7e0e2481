use crate::Error;
use std::{fs, path::Path};
use tracing::{debug, trace};

/// The shape of a test tree: `dirs` directories per level, `depth` levels deep, with `files`
/// empty files in every directory.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Tree {
    pub depth: u32,
    pub dirs: u32,
    pub files: u32,
}

impl Tree {
    pub fn new(files: u32, dirs: u32, depth: u32) -> Self {
        Self { depth, dirs, files }
    }

    /// True when `other` fits within this tree in every dimension.
    pub fn covers(&self, other: &Tree) -> bool {
        self.depth >= other.depth && self.dirs >= other.dirs && self.files >= other.files
    }

    /// The total number of directories in the tree.
    pub fn total_dirs(&self) -> u64 {
        let mut level = 1u64;
        let mut total = 0u64;
        for _ in 0..self.depth {
            level = level.saturating_mul(self.dirs as u64);
            total = total.saturating_add(level);
        }
        total
    }

    pub fn total_files(&self) -> u64 {
        self.total_dirs().saturating_mul(self.files as u64)
    }

    /// Command-line arguments that ask the populator to build this tree under `testdir`.
    pub fn args(&self, testdir: &str) -> Vec<String> {
        vec![
            format!("--testdir={}", testdir),
            format!("--filecount={}", self.files),
            format!("--dircount={}", self.dirs),
            format!("--dirdepth={}", self.depth),
            "--tsr=false".to_string(),
        ]
    }
}

/// Grows the tree rooted at `root` from `current` to `desired`, creating only what is missing.
pub(crate) fn grow(root: &Path, current: &Tree, desired: &Tree) -> Result<(), Error> {
    fill(root, 1, false, current, desired)
}

fn fill(parent: &Path, depth: u32, fresh: bool, current: &Tree, desired: &Tree) -> Result<(), Error> {
    debug!(parent = %parent.display(), depth, dirs = desired.dirs, "Filling");
    for i in 1..=desired.dirs {
        let dir = parent.join(format!("dir_{}_{}", depth, i));
        // Everything below a directory that did not exist before is new as well.
        let fresh = fresh || depth > current.depth || i > current.dirs;
        fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        let first = if fresh { 1 } else { current.files + 1 };
        for n in first..=desired.files {
            let file = dir.join(format!("file_{}", n));
            trace!(file = %file.display());
            fs::File::create(&file).map_err(|e| Error::io(&file, e))?;
        }

        if depth < desired.depth {
            fill(&dir, depth + 1, fresh, current, desired)?;
        }
    }
    Ok(())
}

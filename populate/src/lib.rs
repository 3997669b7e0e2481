#![deny(rust_2018_idioms)]

mod state;
mod tree;

pub use self::{
    state::{State, STATE_FILE},
    tree::Tree,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::time;
use tracing::{error, info};

/// Subdirectory of the test directory that holds the tree.
pub const DATA_DIR: &str = "testdata";

const RESIDENT: time::Duration = time::Duration::from_secs(100 * 60 * 60);

#[derive(Clone, Debug, Parser)]
#[clap(name = "populate", about = "Grow a test file tree in a volume")]
pub struct Cmd {
    #[clap(long, default_value = "/testdir")]
    testdir: PathBuf,

    #[clap(long, default_value = "5")]
    dirdepth: u32,

    #[clap(long, default_value = "100")]
    dircount: u32,

    #[clap(long, default_value = "100")]
    filecount: u32,

    /// Stay resident after finishing so the container keeps running.
    #[clap(long, parse(try_from_str), default_value = "false")]
    tsr: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Grown { from: Tree },
}

#[derive(Debug)]
pub enum Error {
    Io { path: PathBuf, source: std::io::Error },
    Json(PathBuf, serde_json::Error),
    /// A previous run stopped part way, so the contents on disk are unknown.
    Interrupted,
    Shrink { current: Tree, desired: Tree },
    /// The blocking task that grows the tree panicked or was cancelled.
    Aborted(String),
}

// === impl Cmd ===

impl Cmd {
    pub async fn run(self) -> Result<(), Error> {
        let Self {
            testdir,
            dirdepth,
            dircount,
            filecount,
            tsr,
        } = self;

        let desired = Tree::new(filecount, dircount, dirdepth);
        let res = tokio::task::spawn_blocking(move || populate(&testdir, desired))
            .await
            .unwrap_or_else(|e| Err(Error::Aborted(e.to_string())));
        match &res {
            Ok(outcome) => info!(?outcome, ?desired, "Populated"),
            Err(error) => error!(%error, "Failed to populate"),
        }

        if tsr {
            info!("Staying resident");
            time::sleep(RESIDENT).await;
        }
        res.map(|_| ())
    }
}

/// Brings the tree under `testdir` to `desired`, growing it from whatever a previous run left.
///
/// Trees are never shrunk. The stash is marked in progress while the tree changes, so a crashed
/// run is detected rather than built upon.
pub fn populate(testdir: &Path, desired: Tree) -> Result<Outcome, Error> {
    let stashed = State::load(testdir)?;
    if stashed.in_progress {
        return Err(Error::Interrupted);
    }

    let current = stashed.tree();
    if !desired.covers(&current) {
        return Err(Error::Shrink { current, desired });
    }
    if current == desired {
        return Ok(Outcome::Unchanged);
    }

    State::new(testdir, desired, true).store(testdir)?;
    tree::grow(&testdir.join(DATA_DIR), &current, &desired)?;
    State::new(testdir, desired, false).store(testdir)?;
    Ok(Outcome::Grown { from: current })
}

// === impl Error ===

impl Error {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            Self::Json(path, e) => write!(f, "invalid state in {}: {}", path.display(), e),
            Self::Interrupted => write!(f, "an earlier run did not finish; cannot recover state"),
            Self::Shrink { current, desired } => write!(
                f,
                "cannot shrink from {:?} to {:?}",
                current, desired
            ),
            Self::Aborted(e) => write!(f, "populate task aborted: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Json(_, e) => Some(e),
            _ => None,
        }
    }
}

//! Ephemeral per-job files
//!
//! Each job gets an input and an output file named after its id, so no two
//! jobs ever share a path.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::types::JobId;

/// Input and output files of a single compiler run
///
/// **Important:** call [`cleanup()`](Self::cleanup) when the run is over. The
/// `Drop` implementation removes leftovers synchronously as a fallback.
#[derive(Debug)]
pub struct JobFiles {
    dir: PathBuf,
    input: PathBuf,
    output: PathBuf,
    cleaned: bool,
}

impl JobFiles {
    /// Write `source` to a fresh input file inside `dir`
    pub async fn create(dir: &Path, id: JobId, source: &str) -> io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let files = Self {
            dir: dir.to_path_buf(),
            input: dir.join(format!("{id}.facto")),
            output: dir.join(format!("{id}.blueprint")),
            cleaned: false,
        };

        tokio::fs::write(&files.input, source).await?;
        debug!(path = ?files.input, len = source.len(), "wrote source file");
        Ok(files)
    }

    /// Directory the compiler runs in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Remove both files; failures are logged and otherwise ignored
    pub async fn cleanup(&mut self) {
        for path in [&self.input, &self.output] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => debug!(?path, error = %e, "failed to remove job file"),
            }
        }
        self.cleaned = true;
    }

    /// Whether [`cleanup()`](Self::cleanup) has run
    pub fn is_cleaned(&self) -> bool {
        self.cleaned
    }
}

impl Drop for JobFiles {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        warn!("job files dropped without cleanup, removing synchronously");
        let _ = std::fs::remove_file(&self.input);
        let _ = std::fs::remove_file(&self.output);
    }
}

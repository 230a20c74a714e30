//! Logging setup for hosts embedding the middleware.
//!
//! The engine emits its decision trail (classification, computed delays,
//! handoffs) through `tracing`; this module gives embedders a file-backed
//! subscriber for it. `init_logging` installs the process-global default
//! under the XDG state dir; `init_scoped` returns a thread-scoped guard so
//! tests and short-lived hosts can capture the trail without touching
//! global state.

use anyhow::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Writer that is either a file or stderr (used when file clone fails).
enum FileOrStderr {
    File(std::fs::File),
    Stderr,
}

impl io::Write for FileOrStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileOrStderr::File(f) => f.write(buf),
            FileOrStderr::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileOrStderr::File(f) => f.flush(),
            FileOrStderr::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct FileMakeWriter(std::fs::File);

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileOrStderr;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(FileOrStderr::File)
            .unwrap_or(FileOrStderr::Stderr)
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,ebm=debug"))
}

/// Default log file location, `~/.local/state/ebm/ebm.log`.
pub fn log_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ebm")?;
    Ok(xdg_dirs.get_state_home().join("ebm").join("ebm.log"))
}

/// Build a file-backed subscriber for the engine's decision trail.
fn file_subscriber(path: &Path) -> Result<impl tracing::Subscriber + Send + Sync> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;

    Ok(tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(BoxMakeWriter::new(FileMakeWriter(file)))
        .with_ansi(false)
        .finish())
}

/// Install process-global logging to [`log_path`]. Fails if the state dir
/// is unwritable or a global subscriber is already set; the host decides
/// the fallback.
pub fn init_logging() -> Result<()> {
    let path = log_path()?;
    tracing::subscriber::set_global_default(file_subscriber(&path)?)?;
    tracing::info!("ebm logging initialized at {}", path.display());
    Ok(())
}

/// Thread-scoped logging to an explicit file; the returned guard restores
/// the previous subscriber when dropped.
pub fn init_scoped(path: &Path) -> Result<DefaultGuard> {
    Ok(tracing::subscriber::set_default(file_subscriber(path)?))
}

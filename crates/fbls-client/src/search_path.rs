use std::path::PathBuf;

pub trait ExecutableLookup: Send + Sync {
    fn find(&self, name: &str) -> Option<PathBuf>;
}

/// Resolves names against `PATH` (and `PATHEXT` on Windows).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPathLookup;

impl ExecutableLookup for SystemPathLookup {
    fn find(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }
}

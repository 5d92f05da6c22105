//! Trial identifiers and exclusive per-trial workspaces.

use kt_types::WorkspaceError;
use rand::Rng;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// 128-bit random trial identifier, rendered in decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrialId(u128);

impl TrialId {
    pub fn random() -> Self {
        Self(rand::rng().random())
    }

    pub fn value(&self) -> u128 {
        self.0
    }
}

impl From<u128> for TrialId {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for TrialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directory owned by exactly one trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub id: TrialId,
    pub path: PathBuf,
}

impl Workspace {
    /// Materialized filter configuration.
    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.yaml")
    }

    /// Log the trial runner writes the estimator output to.
    pub fn log_path(&self) -> PathBuf {
        self.path.join("odom.csv")
    }
}

/// Allocates trial workspaces under a shared results root.
///
/// Directory creation is the uniqueness gate: `create_dir` fails on an
/// existing path, so two processes drawing the same id cannot both own it.
#[derive(Debug, Clone)]
pub struct WorkspaceAllocator {
    root: PathBuf,
    max_attempts: u32,
}

impl WorkspaceAllocator {
    pub fn new(root: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self {
            root: root.into(),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn allocate(&self) -> Result<Workspace, WorkspaceError> {
        self.allocate_with(TrialId::random)
    }

    /// Allocate using `next_id` as the identifier source.
    pub fn allocate_with<F>(&self, mut next_id: F) -> Result<Workspace, WorkspaceError>
    where
        F: FnMut() -> TrialId,
    {
        fs::create_dir_all(&self.root).map_err(|e| WorkspaceError::CreateFailed {
            path: self.root.clone(),
            message: e.to_string(),
        })?;

        for attempt in 1..=self.max_attempts {
            let id = next_id();
            match self.try_create(id) {
                Ok(workspace) => {
                    debug!("Allocated workspace {} on attempt {}", workspace.path.display(), attempt);
                    return Ok(workspace);
                }
                Err(e) if e.is_recoverable() => {
                    warn!("{}, retrying with a new trial id", e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(WorkspaceError::Exhausted {
            attempts: self.max_attempts,
        })
    }

    fn try_create(&self, id: TrialId) -> Result<Workspace, WorkspaceError> {
        let path = self.root.join(id.to_string());
        if path.exists() {
            return Err(WorkspaceError::Collision { path });
        }
        match fs::create_dir(&path) {
            Ok(()) => Ok(Workspace { id, path }),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(WorkspaceError::Collision { path }),
            Err(e) => Err(WorkspaceError::CreateFailed {
                path,
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn sequential_allocations_are_unique() {
        let dir = TempDir::new().unwrap();
        let allocator = WorkspaceAllocator::new(dir.path(), 16);

        let mut paths = HashSet::new();
        for _ in 0..200 {
            let workspace = allocator.allocate().unwrap();
            assert!(workspace.path.is_dir());
            assert_eq!(workspace.path, dir.path().join(workspace.id.to_string()));
            assert!(paths.insert(workspace.path));
        }
    }

    #[test]
    fn existing_directory_forces_retry() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("7")).unwrap();
        fs::create_dir(dir.path().join("8")).unwrap();
        let allocator = WorkspaceAllocator::new(dir.path(), 16);

        let mut ids = vec![7u128, 8, 9].into_iter();
        let mut drawn = 0;
        let workspace = allocator
            .allocate_with(|| {
                drawn += 1;
                TrialId::from(ids.next().unwrap())
            })
            .unwrap();

        assert_eq!(drawn, 3);
        assert_eq!(workspace.id.value(), 9);
        assert_eq!(workspace.config_path(), dir.path().join("9").join("config.yaml"));
        assert_eq!(workspace.log_path(), dir.path().join("9").join("odom.csv"));
    }

    #[test]
    fn exhaustion_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("1")).unwrap();
        let allocator = WorkspaceAllocator::new(dir.path(), 4);

        let mut drawn = 0;
        let err = allocator
            .allocate_with(|| {
                drawn += 1;
                TrialId::from(1)
            })
            .unwrap_err();

        assert!(matches!(err, WorkspaceError::Exhausted { attempts: 4 }));
        assert_eq!(drawn, 4);
    }

    #[test]
    fn results_root_is_created_on_demand() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("KalmanTuningLogs");
        let allocator = WorkspaceAllocator::new(&root, 1);
        let workspace = allocator.allocate().unwrap();
        assert!(workspace.path.starts_with(&root));
        assert_eq!(allocator.root(), root.as_path());
    }

    #[test]
    fn uncreatable_root_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        fs::write(&file, b"").unwrap();
        let allocator = WorkspaceAllocator::new(&file, 8);
        assert!(matches!(
            allocator.allocate(),
            Err(WorkspaceError::CreateFailed { .. })
        ));
    }

    #[test]
    fn concurrent_allocators_never_share_a_workspace() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();

        // Every thread draws from the same small id range to force races.
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = WorkspaceAllocator::new(root.clone(), 64);
                std::thread::spawn(move || {
                    let mut rng = rand::rng();
                    (0..4)
                        .map(|_| {
                            allocator
                                .allocate_with(|| TrialId::from(rng.random_range(0..64u128)))
                                .unwrap()
                                .path
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for path in handle.join().unwrap() {
                assert!(all.insert(path));
            }
        }
        assert_eq!(all.len(), 32);
    }
}

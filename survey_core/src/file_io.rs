//! # File I/O Module
//!
//! Project and record files are plain JSON:
//!
//! - **Atomic saves**: write to `.tmp`, fsync, rename over the target
//! - **File locking**: advisory lock so two field laptops syncing the same
//!   share do not overwrite each other's edits
//! - **Version validation**: refuse project files from a newer schema
//!
//! ## File Format
//!
//! Projects are saved as `.srv` files. Lock files sit beside them with a
//! `.srv.lock` extension and hold JSON describing who holds the lock.
//! Single records (a resection job, a journal, a gyro measurement) can be
//! read and written with [`read_json`] / [`write_json_atomic`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use survey_core::file_io::{save_project, load_project, FileLock};
//! use survey_core::project::Project;
//! use std::path::Path;
//!
//! let project = Project::new("Surveyor", "24-117", "North portal");
//! let path = Path::new("portal.srv");
//!
//! let lock = FileLock::acquire(path, "surveyor@field")?;
//! save_project(&project, path)?;
//! drop(lock);
//!
//! let reloaded = load_project(path)?;
//! assert_eq!(reloaded.meta.job_id, "24-117");
//! # Ok::<(), survey_core::errors::SurveyError>(())
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::{SurveyError, SurveyResult};
use crate::project::{Project, SCHEMA_VERSION};

/// Locks older than this are taken over regardless of owner
const STALE_LOCK_HOURS: i64 = 24;

fn io_error<'a>(
    operation: &'static str,
    path: &'a Path,
) -> impl FnOnce(std::io::Error) -> SurveyError + 'a {
    move |e| SurveyError::file_error(operation, path.display().to_string(), e.to_string())
}

fn serialization_error(e: serde_json::Error) -> SurveyError {
    SurveyError::SerializationError { reason: e.to_string() }
}

/// Lock file metadata stored in `.srv.lock` files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// User identifier
    pub user_id: String,
    /// Machine name where the lock was acquired
    pub machine: String,
    /// Process holding the lock
    pub pid: u32,
    pub locked_at: DateTime<Utc>,
}

impl LockInfo {
    /// Lock info for the current process
    pub fn new(user_id: impl Into<String>) -> Self {
        LockInfo {
            user_id: user_id.into(),
            machine: hostname().unwrap_or_else(|| "unknown".to_string()),
            pid: std::process::id(),
            locked_at: Utc::now(),
        }
    }

    /// Whether the holder is gone or the lock has expired.
    pub fn is_stale(&self) -> bool {
        if (Utc::now() - self.locked_at).num_hours() > STALE_LOCK_HOURS {
            return true;
        }
        hostname().is_some_and(|ours| ours == self.machine) && !process_alive(self.pid)
    }
}

fn hostname() -> Option<String> {
    if cfg!(windows) {
        std::env::var("COMPUTERNAME").ok()
    } else {
        std::env::var("HOSTNAME").or_else(|_| std::env::var("HOST")).ok()
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists() || !Path::new("/proc").exists()
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Exclusive project lock, released on drop.
///
/// Holds an OS-level lock (via fs2) on the `.lock` file, and the file's
/// JSON body tells other users who holds it.
#[derive(Debug)]
pub struct FileLock {
    project_path: PathBuf,
    lock_path: PathBuf,
    _lock_file: File,
    pub info: LockInfo,
}

impl FileLock {
    /// Acquire an exclusive lock on a project file.
    ///
    /// A lock left behind by a dead process or older than 24 hours is
    /// taken over.
    ///
    /// # Errors
    ///
    /// * `FileLocked` - another live process holds the lock
    /// * `FileError` - the lock file cannot be created or written
    pub fn acquire(path: &Path, user_id: impl Into<String>) -> SurveyResult<Self> {
        let lock_path = lock_path_for(path);

        if let Some(existing) = FileLock::check(path) {
            return Err(SurveyError::file_locked(
                path.display().to_string(),
                format!("{} ({})", existing.user_id, existing.machine),
                existing.locked_at.to_rfc3339(),
            ));
        }

        let mut lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .map_err(io_error("create lock", &lock_path))?;

        lock_file.try_lock_exclusive().map_err(|_| {
            SurveyError::file_locked(path.display().to_string(), "another process", "unknown")
        })?;

        let info = LockInfo::new(user_id);
        let body = serde_json::to_string_pretty(&info).map_err(serialization_error)?;
        lock_file
            .write_all(body.as_bytes())
            .map_err(io_error("write lock", &lock_path))?;
        lock_file.sync_all().map_err(io_error("sync lock", &lock_path))?;

        log::debug!("locked {} for {}", path.display(), info.user_id);
        Ok(FileLock {
            project_path: path.to_path_buf(),
            lock_path,
            _lock_file: lock_file,
            info,
        })
    }

    /// Current live lock holder, if any, without acquiring.
    pub fn check(path: &Path) -> Option<LockInfo> {
        read_json::<LockInfo>(&lock_path_for(path))
            .ok()
            .filter(|info| !info.is_stale())
    }

    pub fn project_path(&self) -> &Path {
        &self.project_path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// `portal.srv` -> `portal.srv.lock`
fn lock_path_for(project_path: &Path) -> PathBuf {
    let extension = match project_path.extension() {
        Some(e) => format!("{}.lock", e.to_string_lossy()),
        None => "lock".to_string(),
    };
    project_path.with_extension(extension)
}

/// Read and deserialize a JSON file.
///
/// # Errors
///
/// * `FileError` - the file cannot be read
/// * `SerializationError` - the contents are not valid JSON for `T`
pub fn read_json<T: DeserializeOwned>(path: &Path) -> SurveyResult<T> {
    let contents = fs::read_to_string(path).map_err(io_error("read", path))?;
    serde_json::from_str(&contents).map_err(|e| SurveyError::SerializationError {
        reason: format!("Invalid JSON in {}: {}", path.display(), e),
    })
}

/// Serialize `value` as pretty JSON and write it atomically.
///
/// The JSON goes to a sibling `.tmp` file, which is fsynced and then renamed
/// over `path`. An interrupted write never leaves a truncated target.
pub fn write_json_atomic<T: Serialize>(value: &T, path: &Path) -> SurveyResult<()> {
    let json = serde_json::to_string_pretty(value).map_err(serialization_error)?;

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut tmp_file = File::create(&tmp_path).map_err(io_error("create temp file", &tmp_path))?;
    tmp_file
        .write_all(json.as_bytes())
        .map_err(io_error("write temp file", &tmp_path))?;
    tmp_file.sync_all().map_err(io_error("sync temp file", &tmp_path))?;

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        SurveyError::file_error("rename to final", path.display().to_string(), e.to_string())
    })
}

/// Save a project with atomic write semantics.
pub fn save_project(project: &Project, path: &Path) -> SurveyResult<()> {
    write_json_atomic(project, path)?;
    log::info!("saved project {} to {}", project.meta.job_id, path.display());
    Ok(())
}

/// Load a project and check its schema version.
///
/// # Errors
///
/// * `VersionMismatch` - the file was written by an incompatible schema
/// * `SerializationError` - invalid JSON
/// * `FileError` - I/O error
pub fn load_project(path: &Path) -> SurveyResult<Project> {
    let project: Project = read_json(path)?;
    validate_version(&project.meta.version)?;
    Ok(project)
}

/// Load a project along with the current lock holder, if any.
///
/// A project locked by someone else can still be viewed read-only.
pub fn load_project_with_lock_check(path: &Path) -> SurveyResult<(Project, Option<LockInfo>)> {
    let project = load_project(path)?;
    Ok((project, FileLock::check(path)))
}

/// A file is compatible when its major version matches and, while the
/// schema is still 0.x, its minor version is not newer than ours.
fn validate_version(file_version: &str) -> SurveyResult<()> {
    let parse = |v: &str| -> Option<(u32, u32)> {
        let mut parts = v.split('.').map(str::parse::<u32>);
        let major = parts.next()?.ok()?;
        let minor = match parts.next() {
            Some(minor) => minor.ok()?,
            None => 0,
        };
        Some((major, minor))
    };

    let compatible = match (parse(file_version), parse(SCHEMA_VERSION)) {
        (Some((file_major, file_minor)), Some((major, minor))) => {
            file_major == major && (major > 0 || file_minor <= minor)
        }
        _ => false,
    };

    if compatible {
        Ok(())
    } else {
        Err(SurveyError::VersionMismatch {
            file_version: file_version.to_string(),
            expected_version: SCHEMA_VERSION.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculations::TheodoliteJournal;
    use std::env::temp_dir;

    fn temp_project_path(name: &str) -> PathBuf {
        temp_dir().join(format!("survey_core_test_{}_{}.srv", name, std::process::id()))
    }

    #[test]
    fn test_lock_path_generation() {
        assert_eq!(
            lock_path_for(Path::new("/data/portal.srv")),
            Path::new("/data/portal.srv.lock")
        );
        assert_eq!(lock_path_for(Path::new("/data/portal")), Path::new("/data/portal.lock"));
    }

    #[test]
    fn test_lock_info_creation() {
        let info = LockInfo::new("field@example.com");
        assert_eq!(info.user_id, "field@example.com");
        assert!(info.pid > 0);
        assert!(!info.is_stale());
    }

    #[test]
    fn test_old_lock_is_stale() {
        let mut info = LockInfo::new("field@example.com");
        info.locked_at = Utc::now() - chrono::Duration::hours(STALE_LOCK_HOURS + 1);
        assert!(info.is_stale());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let path = temp_project_path("roundtrip");

        let mut project = Project::new("Test Surveyor", "TEST-001", "Test Site");
        project.save(TheodoliteJournal::new("traverse")).unwrap();
        save_project(&project, &path).unwrap();

        let loaded = load_project(&path).unwrap();
        assert_eq!(loaded.meta.surveyor, "Test Surveyor");
        assert_eq!(loaded.meta.site, "Test Site");
        assert_eq!(loaded.journals.len(), 1);

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_atomic_save_creates_no_tmp_file() {
        let path = temp_project_path("atomic");
        let tmp_path = temp_dir().join(format!(
            "{}.tmp",
            path.file_name().unwrap().to_string_lossy()
        ));

        save_project(&Project::default(), &path).unwrap();
        assert!(!tmp_path.exists());
        assert!(path.exists());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_file_lock_acquire_and_release() {
        let path = temp_project_path("lock");
        File::create(&path).unwrap();

        let lock = FileLock::acquire(&path, "field@example.com").unwrap();
        assert_eq!(lock.info.user_id, "field@example.com");
        assert_eq!(lock.project_path(), path.as_path());

        let lock_path = lock_path_for(&path);
        assert!(lock_path.exists());

        let second = FileLock::acquire(&path, "office@example.com");
        assert!(matches!(second, Err(SurveyError::FileLocked { .. })));
        assert!(second.unwrap_err().is_recoverable());

        drop(lock);
        assert!(!lock_path.exists());
        assert!(FileLock::check(&path).is_none());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_version_validation() {
        assert!(validate_version(SCHEMA_VERSION).is_ok());
        assert!(validate_version("0.1.5").is_ok());
        assert!(validate_version("0.0.9").is_ok());

        assert!(validate_version("1.0.0").is_err());
        assert!(validate_version("0.2.0").is_err());
        assert!(validate_version("garbage").is_err());
    }

    #[test]
    fn test_load_rejects_newer_schema() {
        let path = temp_project_path("newer");
        let mut project = Project::default();
        project.meta.version = "0.9.0".to_string();
        save_project(&project, &path).unwrap();

        let err = load_project(&path).unwrap_err();
        assert_eq!(err.error_code(), "VERSION_MISMATCH");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_with_lock_check() {
        let path = temp_project_path("lock_check");
        save_project(&Project::new("Test", "TEST", "Site"), &path).unwrap();

        let (loaded, lock_info) = load_project_with_lock_check(&path).unwrap();
        assert_eq!(loaded.meta.job_id, "TEST");
        assert!(lock_info.is_none());

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_read_json_errors() {
        let missing = temp_dir().join("survey_core_test_missing.json");
        let err = read_json::<TheodoliteJournal>(&missing).unwrap_err();
        assert_eq!(err.error_code(), "FILE_ERROR");

        let path = temp_project_path("bad_json");
        fs::write(&path, "{ not json").unwrap();
        let err = read_json::<TheodoliteJournal>(&path).unwrap_err();
        assert_eq!(err.error_code(), "SERIALIZATION_ERROR");
        let _ = fs::remove_file(&path);
    }
}

//! Process-exclusive bootstrap lock: a PID file whose OS-level advisory lock makes the
//! "is it still running" check race-free.

use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fd_lock::RwLock;

use crate::error::{Error, Result};

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
	use nix::sys::signal::kill;
	use nix::unistd::Pid;
	kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
fn pid_is_alive(pid: u32) -> bool {
	// No portable signal-0 equivalent: conservatively assume any non-self PID is live.
	pid != std::process::id()
}

pub struct LockFile {
	path: PathBuf,
}

/// Held for the duration of a bootstrap run. Dropping it removes the lock file, which
/// is the only place `unlock()` needs to happen — every exit path goes through `Drop`.
pub struct LockGuard {
	path: PathBuf,
}

impl Drop for LockGuard {
	fn drop(&mut self) {
		if let Err(e) = std::fs::remove_file(&self.path) {
			tracing::warn!(error = %e, path = %self.path.display(), "failed to remove lock file");
		}
	}
}

impl LockFile {
	pub fn new(path: PathBuf) -> Self {
		LockFile { path }
	}

	/// Acquire the lock, returning `Err(Error::AnotherInstanceRunning)` if a live process
	/// already holds it.
	///
	/// The OS-level advisory lock (`fd-lock`) is only held long enough to make the
	/// read-check-write of the PID atomic against a second process doing the same thing
	/// at the same instant; once our PID is written, the lock file itself (content, not
	/// the flock) is what the rest of the world checks.
	pub fn lock(&self) -> Result<LockGuard> {
		if let Some(parent) = self.path.parent() {
			fs_err::create_dir_all(parent)?;
		}
		let file = std::fs::OpenOptions::new()
			.create(true)
			.read(true)
			.write(true)
			.truncate(false)
			.open(&self.path)
			.map_err(Error::Io)?;

		let mut flock = RwLock::new(file);
		let mut guard = flock
			.try_write()
			.map_err(|e| Error::Lock(format!("failed to acquire OS file lock: {e}")))?;

		let mut contents = String::new();
		guard.read_to_string(&mut contents).map_err(Error::Io)?;
		let our_pid = std::process::id();
		if let Ok(existing_pid) = contents.trim().parse::<u32>() {
			if existing_pid != our_pid && pid_is_alive(existing_pid) {
				return Err(Error::AnotherInstanceRunning);
			}
		}

		guard.set_len(0).map_err(Error::Io)?;
		guard.seek(SeekFrom::Start(0)).map_err(Error::Io)?;
		guard
			.write_all(our_pid.to_string().as_bytes())
			.map_err(Error::Io)?;
		guard.flush().map_err(Error::Io)?;

		Ok(LockGuard {
			path: self.path.clone(),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lock_then_unlock_removes_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bootstrap.lock");
		let lockfile = LockFile::new(path.clone());
		let guard = lockfile.lock().unwrap();
		assert!(path.exists());
		let contents = std::fs::read_to_string(&path).unwrap();
		assert_eq!(contents, std::process::id().to_string());
		drop(guard);
		assert!(!path.exists());
	}

	#[test]
	fn stale_nonexistent_pid_is_stolen() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bootstrap.lock");
		std::fs::write(&path, "2147483647").unwrap();
		let lockfile = LockFile::new(path.clone());
		let guard = lockfile.lock().unwrap();
		let contents = std::fs::read_to_string(&path).unwrap();
		assert_eq!(contents, std::process::id().to_string());
		drop(guard);
	}

	#[test]
	fn empty_lock_file_is_acquirable() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("bootstrap.lock");
		std::fs::write(&path, "").unwrap();
		let lockfile = LockFile::new(path.clone());
		assert!(lockfile.lock().is_ok());
	}
}

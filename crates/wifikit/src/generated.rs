use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, WifiError};

/// Daemon configuration written to the scratch directory.
///
/// The file is removed when the value is dropped unless [`keep`](Self::keep) hands
/// ownership of the path to the caller.
#[derive(Debug)]
pub struct GeneratedConfig {
    path: PathBuf,
    armed: bool,
}

fn ensure_scratch_dir(dir: &Path) -> Result<()> {
    let write_err = |source| WifiError::ConfigWrite {
        path: dir.to_path_buf(),
        source,
    };
    fs::create_dir_all(dir).map_err(write_err)?;
    fs::set_permissions(dir, fs::Permissions::from_mode(0o700)).map_err(write_err)?;
    Ok(())
}

impl GeneratedConfig {
    /// Write `contents` to `dir/name` with mode 0600, replacing any stale file.
    pub fn write(dir: &Path, name: &str, contents: &str) -> Result<Self> {
        ensure_scratch_dir(dir)?;
        let path = dir.join(name);
        let write_err = |source| WifiError::ConfigWrite {
            path: path.clone(),
            source,
        };

        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&path)
            .map_err(write_err)?;
        file.write_all(contents.as_bytes()).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        // An existing file keeps its old mode through open(); force it.
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).map_err(write_err)?;

        debug!(path = %path.display(), "generated config written");
        Ok(Self { path, armed: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Disarm cleanup and return the path.
    pub fn keep(mut self) -> PathBuf {
        self.armed = false;
        std::mem::take(&mut self.path)
    }
}

impl Drop for GeneratedConfig {
    fn drop(&mut self) {
        if self.armed {
            remove_config(&self.path);
        }
    }
}

/// Remove a generated file; a missing file is fine.
pub fn remove_config(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "generated config removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "generated config not removed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_is_private_and_removed_on_drop() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("scratch");
        let path = {
            let cfg = GeneratedConfig::write(&dir, "hostapd-wlan0.conf", "ssid=Guest\n").unwrap();
            let mode = fs::metadata(cfg.path()).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
            let dir_mode = fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(dir_mode & 0o777, 0o700);
            assert_eq!(fs::read_to_string(cfg.path()).unwrap(), "ssid=Guest\n");
            cfg.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn keep_disarms_cleanup() {
        let root = TempDir::new().unwrap();
        let cfg = GeneratedConfig::write(root.path(), "dnsmasq-wlan0.conf", "x").unwrap();
        let path = cfg.keep();
        assert!(path.exists());
        remove_config(&path);
        assert!(!path.exists());
        remove_config(&path);
    }

    #[test]
    fn unwritable_dir_is_config_write_error() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("file");
        fs::write(&blocker, "").unwrap();
        let err = GeneratedConfig::write(&blocker.join("sub"), "a.conf", "x").unwrap_err();
        assert!(matches!(err, WifiError::ConfigWrite { .. }));
    }
}

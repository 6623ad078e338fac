use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors raised while preparing job directories.
#[derive(thiserror::Error, Debug)]
pub enum HelperError {
    #[error("path must not be empty")]
    EmptyPath,
    #[error("directory mode must not be zero")]
    ZeroMode,
    #[error("{} exists and is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("{} exists with mode {actual:o}, expected {expected:o}", path.display())]
    ModeMismatch { path: PathBuf, expected: u32, actual: u32 },
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Make sure `path` exists as a directory with exactly `perm` permission bits.
///
/// Returns `true` when the directory (and any missing parents) had to be
/// created, `false` when it was already there with the right mode.
pub fn ensure_path(path: &Path, perm: u32) -> Result<bool, HelperError> {
    if path.as_os_str().is_empty() {
        return Err(HelperError::EmptyPath);
    }
    if perm == 0 {
        return Err(HelperError::ZeroMode);
    }

    match fs::metadata(path) {
        Ok(meta) => {
            if !meta.is_dir() {
                return Err(HelperError::NotADirectory(path.to_path_buf()));
            }
            let actual = mode_bits(&meta);
            if actual != perm {
                return Err(HelperError::ModeMismatch {
                    path: path.to_path_buf(),
                    expected: perm,
                    actual,
                });
            }
            Ok(false)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            create_dir_with_mode(path, perm).map_err(|source| HelperError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(true)
        }
        Err(source) => Err(HelperError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(unix)]
fn mode_bits(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_bits(_meta: &fs::Metadata) -> u32 {
    0o777
}

#[cfg(unix)]
fn create_dir_with_mode(path: &Path, perm: u32) -> io::Result<()> {
    use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
    fs::DirBuilder::new().recursive(true).mode(perm).create(path)?;
    // the process umask may have masked bits off the leaf
    fs::set_permissions(path, fs::Permissions::from_mode(perm))
}

#[cfg(not(unix))]
fn create_dir_with_mode(path: &Path, _perm: u32) -> io::Result<()> {
    fs::create_dir_all(path)
}

/// True when `dir/file` is a regular file with at least one byte in it.
pub fn is_non_empty_file(dir: &Path, file: &str) -> bool {
    if dir.as_os_str().is_empty() || file.is_empty() {
        return false;
    }
    match fs::metadata(dir.join(file)) {
        Ok(meta) => meta.is_file() && meta.len() > 0,
        Err(_) => false,
    }
}

/// Proxy settings picked up from the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyEnv {
    pub http_proxy: String,
    pub https_proxy: String,
    pub no_proxy: String,
    pub all_proxy: String,
}

impl ProxyEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup. `all_proxy` mirrors
    /// `HTTP_PROXY`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let http_proxy = lookup("HTTP_PROXY").unwrap_or_default();
        Self {
            https_proxy: lookup("HTTPS_PROXY").unwrap_or_default(),
            no_proxy: lookup("NO_PROXY").unwrap_or_default(),
            all_proxy: http_proxy.clone(),
            http_proxy,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.http_proxy.is_empty() && self.https_proxy.is_empty()
    }
}

use std::path::{Path, PathBuf};

/// Platform-specific filesystem operations. Each OS provides its own
/// `NativePlatform` so call sites stay free of `#[cfg]` blocks.
pub trait Platform {
    /// Set restrictive *directory* permissions (0o700 on Unix, no-op on Windows).
    fn restrict_dir_permissions(path: &Path);

    /// Set restrictive *file* permissions (0o600 on Unix, no-op on Windows).
    fn restrict_file_permissions(path: &Path);

    /// Conventional per-user home for foreman data when `FOREMAN_HOME` is unset.
    fn default_data_dir() -> Option<PathBuf>;

    /// Root data directory. `FOREMAN_HOME` wins over the platform default.
    fn data_dir() -> PathBuf {
        resolve_data_dir(
            std::env::var_os("FOREMAN_HOME").map(PathBuf::from),
            Self::default_data_dir(),
        )
    }
}

pub(crate) fn resolve_data_dir(overridden: Option<PathBuf>, fallback: Option<PathBuf>) -> PathBuf {
    overridden
        .filter(|p| !p.as_os_str().is_empty())
        .or(fallback)
        .unwrap_or_else(|| PathBuf::from(".foreman"))
}

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::NativePlatform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::NativePlatform;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_takes_precedence() {
        let dir = resolve_data_dir(
            Some(PathBuf::from("/tmp/foreman-x")),
            Some(PathBuf::from("/home/u/.foreman")),
        );
        assert_eq!(dir, PathBuf::from("/tmp/foreman-x"));
    }

    #[test]
    fn empty_override_falls_back() {
        let dir = resolve_data_dir(Some(PathBuf::new()), Some(PathBuf::from("/home/u/.foreman")));
        assert_eq!(dir, PathBuf::from("/home/u/.foreman"));
    }

    #[test]
    fn no_home_uses_relative_dir() {
        assert_eq!(resolve_data_dir(None, None), PathBuf::from(".foreman"));
    }
}

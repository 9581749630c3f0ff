use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Base evgpipe config directory (~/.config/evgpipe/ on all platforms)
pub fn evgpipe() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("evgpipe"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("evgpipe"))
    }
}

/// Global evgpipe.json config file path
pub fn evgpipe_json() -> Result<PathBuf> {
    Ok(evgpipe()?.join("evgpipe.json"))
}

/// Expand `~` and `$VAR` in a configured path.
pub fn expand(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_leaves_plain_paths_alone() {
        assert_eq!(expand("build/work"), PathBuf::from("build/work"));
    }

    #[test]
    fn expand_tilde_uses_home() {
        let expanded = expand("~/work");
        assert!(!expanded.starts_with("~"));
        assert!(expanded.ends_with("work"));
    }

    #[test]
    fn resolve_keeps_absolute_paths() {
        let base = Path::new("/repo");
        assert_eq!(resolve(base, Path::new("/abs/x")), PathBuf::from("/abs/x"));
        assert_eq!(resolve(base, Path::new("rel")), PathBuf::from("/repo/rel"));
    }
}

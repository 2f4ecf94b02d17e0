//! Home-directory expansion, absolute normalization, and deterministic
//! preorder tree walking for the Source Engine.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Expand a leading `~` to the current user's home directory, then resolve
/// to an absolute, non-symlink-resolving path.
///
/// `~` must appear at the start of the path (`~/foo`, or bare `~`). Anything
/// else is passed through unchanged before normalization.
pub fn expand(path: &str) -> Result<PathBuf> {
    let expanded: PathBuf = if let Some(rest) = path.strip_prefix('~') {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::InvalidPath(format!("cannot expand '~' in {path:?}: no home directory")))?;
        if rest.is_empty() {
            home
        } else {
            // `~foo` (no separator) is not home-relative; only `~/...` is.
            match rest.strip_prefix('/') {
                Some(tail) => home.join(tail),
                None => PathBuf::from(path),
            }
        }
    } else {
        PathBuf::from(path)
    };
    absolute_no_symlink_resolve(&expanded)
}

/// Resolve `path` to an absolute path without touching the filesystem to
/// resolve symlinks (i.e. lexical normalization of `.`/`..`, not `canonicalize`).
fn absolute_no_symlink_resolve(path: &Path) -> Result<PathBuf> {
    let base = if path.is_absolute() {
        PathBuf::new()
    } else {
        std::env::current_dir().map_err(|e| Error::InvalidPath(format!("cannot resolve cwd: {e}")))?
    };
    let mut out = base;
    for component in path.components() {
        use std::path::Component::*;
        match component {
            Prefix(p) => out.push(p.as_os_str()),
            RootDir => out.push(std::path::MAIN_SEPARATOR.to_string()),
            CurDir => {}
            ParentDir => {
                out.pop();
            }
            Normal(seg) => out.push(seg),
        }
    }
    Ok(out)
}

/// One entry of a preorder local tree walk.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub is_dir: bool,
    /// Low 12 bits of the Unix mode (setuid/setgid/sticky + rwx triads).
    pub mode: u32,
}

/// Produce a deterministic preorder traversal of `root`.
///
/// Directories are yielded before their contents; siblings are yielded in
/// lexicographic byte order of their basename (`walkdir`'s
/// `sort_by_file_name`). Symlinks to regular files are followed and yielded
/// as file entries (using the target's mode); symlinks to directories are
/// yielded as file entries using the *link's own* mode and are never
/// descended into, which prevents cycles.
pub fn walk(root: &Path) -> Result<Vec<WalkEntry>> {
    use std::os::unix::fs::MetadataExt;

    let mut out = Vec::new();
    let walker = walkdir::WalkDir::new(root).follow_links(false).sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| Error::LocalIoFailed(std::io::ErrorKind::Other, e.to_string()))?;
        let path = entry.path().to_path_buf();
        if entry.depth() == 0 {
            // The root itself is not emitted as a walk entry; callers treat
            // it as the tree's name, not a member of the tree.
            continue;
        }
        if entry.path_is_symlink() {
            let target_meta = std::fs::metadata(&path);
            let link_mode = entry.metadata().map(|m| m.mode() & 0o7777).unwrap_or(0o644);
            match target_meta {
                Ok(tm) if tm.is_dir() => {
                    // Link to a directory: emit as a file entry with the
                    // link's own mode, do not recurse (walkdir already
                    // won't, since follow_links is false).
                    out.push(WalkEntry { path, is_dir: false, mode: link_mode });
                }
                Ok(tm) => {
                    // Link to a file (or anything else): follow it, using
                    // the target's mode.
                    out.push(WalkEntry { path, is_dir: false, mode: (tm.mode() & 0o7777) });
                }
                Err(_) => {
                    // Dangling symlink: surface it as a file entry with the
                    // link's own mode; reading its contents will fail later
                    // with a local I/O error, which is the right place for
                    // that to surface.
                    out.push(WalkEntry { path, is_dir: false, mode: link_mode });
                }
            }
            continue;
        }
        let meta = entry.metadata().map_err(|e| Error::LocalIoFailed(std::io::ErrorKind::Other, e.to_string()))?;
        out.push(WalkEntry { path, is_dir: meta.is_dir(), mode: meta.mode() & 0o7777 });
    }
    Ok(out)
}

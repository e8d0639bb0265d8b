#[cfg(not(unix))]
use log::warn;
use std::fs;
use std::io;
use std::path::Path;

pub fn ensure_dir<P: AsRef<Path>>(p: P) -> io::Result<()> {
    if !p.as_ref().exists() {
        fs::create_dir_all(&p)?;
    }
    Ok(())
}

/// Creates the directory that will hold `file`, if it has one.
pub fn ensure_parent_dir<P: AsRef<Path>>(file: P) -> io::Result<()> {
    match file.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Links `alias` (a bare file name) to `target` inside `dir`, relative so the
/// theme directory can be moved. Existing entries are left alone.
#[cfg(unix)]
pub fn link_alias(dir: &Path, target: &str, alias: &str) -> io::Result<()> {
    let link = dir.join(alias);
    if link.symlink_metadata().is_ok() {
        return Ok(());
    }
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
pub fn link_alias(_dir: &Path, target: &str, alias: &str) -> io::Result<()> {
    warn!("symlinks unsupported on this platform, skipping alias {alias} -> {target}");
    Ok(())
}

/// File name component as UTF-8, falling back to `default`.
pub fn file_name_or<'a>(path: &'a Path, default: &'a str) -> &'a str {
    path.file_name().and_then(|s| s.to_str()).unwrap_or(default)
}

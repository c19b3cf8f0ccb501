//! Drop handling: map one dropped path to a lock or unlock plan.
//!
//! Everything here is pure; the caller detects the path kind (see
//! [`DetectedMode`]) and carries out the returned [`Plan`].

use std::path::{Component, Path, PathBuf};

use crate::error::{AtcError, Result};

pub const CONTAINER_EXTENSION: &str = "atc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedMode {
    Directory,
    /// A regular file without a container token.
    PlainFile,
    /// A readable container (plain or self-extracting).
    Container,
    /// A container whose token says it was destroyed.
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Lock   { source: PathBuf, output: PathBuf },
    Unlock { container: PathBuf, output_dir: PathBuf },
    Reject { reason: String },
}

pub fn plan_for(path: &Path, mode: DetectedMode) -> Plan {
    let Some(file_name) = path.file_name() else {
        return Plan::Reject { reason: format!("`{}` has no file name", path.display()) };
    };
    let parent = path.parent().map(Path::to_path_buf).unwrap_or_default();

    match mode {
        DetectedMode::Directory | DetectedMode::PlainFile => {
            let mut name = file_name.to_os_string();
            name.push(".");
            name.push(CONTAINER_EXTENSION);
            Plan::Lock { source: path.to_path_buf(), output: parent.join(name) }
        }
        DetectedMode::Container => Plan::Unlock { container: path.to_path_buf(), output_dir: parent },
        DetectedMode::Destroyed => Plan::Reject {
            reason: format!("`{}` was destroyed after too many wrong passwords", path.display()),
        },
    }
}

/// Stored entry name for `relative`: backslash separated, directories with a
/// trailing backslash.
pub fn entry_name(relative: &Path, is_dir: bool) -> String {
    let mut name = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\\");
    if is_dir {
        name.push('\\');
    }
    name
}

/// Regional-encoding name: ASCII kept, everything else replaced by `?`.
pub fn regional_name(name: &str) -> Vec<u8> {
    name.chars().map(|c| if c.is_ascii() { c as u8 } else { b'?' }).collect()
}

/// Resolve a stored entry name below `root`, refusing names that would
/// escape it.
pub fn output_path(root: &Path, name: &str) -> Result<PathBuf> {
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for part in name.split(['\\', '/']) {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(AtcError::InvalidEntry(format!("`{name}` escapes the output directory")));
            }
            p if p.contains(':') => {
                return Err(AtcError::InvalidEntry(format!("`{name}` carries a drive prefix")));
            }
            p => {
                out.push(p);
                depth += 1;
            }
        }
    }
    if depth == 0 {
        return Err(AtcError::InvalidEntry(format!("`{name}` names no path")));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_file_and_directory_lock_next_to_source() {
        assert_eq!(
            plan_for(Path::new("/data/report.pdf"), DetectedMode::PlainFile),
            Plan::Lock { source: "/data/report.pdf".into(), output: "/data/report.pdf.atc".into() }
        );
        assert_eq!(
            plan_for(Path::new("/data/photos"), DetectedMode::Directory),
            Plan::Lock { source: "/data/photos".into(), output: "/data/photos.atc".into() }
        );
    }

    #[test]
    fn container_unlocks_into_its_directory() {
        assert_eq!(
            plan_for(Path::new("/data/photos.atc"), DetectedMode::Container),
            Plan::Unlock { container: "/data/photos.atc".into(), output_dir: "/data".into() }
        );
    }

    #[test]
    fn destroyed_and_rootless_paths_are_rejected() {
        assert!(matches!(plan_for(Path::new("/x.atc"), DetectedMode::Destroyed), Plan::Reject { .. }));
        assert!(matches!(plan_for(Path::new("/"), DetectedMode::Directory), Plan::Reject { .. }));
    }

    #[test]
    fn entry_names_use_backslashes() {
        assert_eq!(entry_name(Path::new("test/sub/a.txt"), false), "test\\sub\\a.txt");
        assert_eq!(entry_name(Path::new("test"), true), "test\\");
        assert_eq!(regional_name("dir\\テ.txt"), b"dir\\?.txt".to_vec());
    }

    #[test]
    fn output_paths_stay_inside_root() {
        let root = Path::new("/out");
        assert_eq!(output_path(root, "test\\a.txt").unwrap(), PathBuf::from("/out/test/a.txt"));
        assert_eq!(output_path(root, "test\\").unwrap(), PathBuf::from("/out/test"));
        assert!(output_path(root, "..\\etc\\passwd").is_err());
        assert!(output_path(root, "C:\\Windows").is_err());
        assert!(output_path(root, "\\").is_err());
    }
}

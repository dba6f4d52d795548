// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.
use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::params::RunParameters;

/// Files whose name starts with this are hand-managed and never deleted or
/// overwritten.
pub const PROTECTED_PREFIX: char = '_';

/// Linux `IFNAMSIZ` minus the trailing NUL.
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// `prefix` followed by the zero padded instance number. Used as interface
/// name, config file stem, and dashboard configuration name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceName(String);

impl InstanceName {
    pub fn new(prefix: &str, number: u32, width: usize) -> Self {
        Self(format!("{prefix}{number:0width$}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn config_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.conf", self.0))
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Number of digits every instance number is padded to.
pub fn padding_width(end: u32) -> usize {
    end.to_string().len()
}

pub fn instance_names(prefix: &str, start: u32, end: u32) -> Vec<InstanceName> {
    let width = padding_width(end);
    (start..=end)
        .map(|n| InstanceName::new(prefix, n, width))
        .collect()
}

pub fn is_protected(file_name: &str) -> bool {
    file_name.starts_with(PROTECTED_PREFIX)
}

pub fn is_valid_interface_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_INTERFACE_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Create,
    /// The file exists and delete-existing was requested.
    Overwrite,
    /// The file exists and is left alone, keys included.
    Skip,
}

#[derive(Debug, Clone)]
pub struct PlannedInstance {
    pub name: InstanceName,
    pub path: PathBuf,
    pub decision: Decision,
}

pub fn plan(params: &RunParameters) -> Vec<PlannedInstance> {
    instance_names(&params.prefix, params.start, params.end)
        .into_iter()
        .map(|name| {
            let path = name.config_path(&params.target_dir);
            let decision = match (path.exists(), params.delete_existing) {
                (false, _) => Decision::Create,
                (true, true) => Decision::Overwrite,
                (true, false) => Decision::Skip,
            };
            debug!(interface = %name, ?decision, "planned instance");
            PlannedInstance {
                name,
                path,
                decision,
            }
        })
        .collect()
}

#[derive(Debug, Default)]
pub struct DeletionPass {
    /// Removed files, or in dry-run the files that would be removed.
    pub removed: Vec<PathBuf>,
    pub protected: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Remove every `*.conf` in `dir` whose stem is one of `names`, leaving
/// protected files untouched.
pub fn delete_existing(
    dir: &Path,
    names: &[InstanceName],
    dry_run: bool,
) -> Result<DeletionPass, io::Error> {
    let mut pass = DeletionPass::default();

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(dir = %dir.display(), "target directory does not exist, nothing to delete");
            return Ok(pass);
        }
        Err(e) => return Err(e),
    };

    let in_scope: HashSet<&str> = names.iter().map(InstanceName::as_str).collect();
    let mut candidates: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "conf"))
        .collect();
    candidates.sort();

    for path in candidates {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_protected(file_name) {
            info!(path = %path.display(), "skipping protected config");
            pass.protected.push(path);
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !in_scope.contains(stem) {
            continue;
        }

        if dry_run {
            info!(path = %path.display(), "[dry-run] would delete config");
            pass.removed.push(path);
            continue;
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "deleted config");
                pass.removed.push(path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to delete config");
                pass.failed.push((path, e));
            }
        }
    }

    Ok(pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn suffixes(names: &[InstanceName], prefix: &str) -> Vec<String> {
        names
            .iter()
            .map(|n| n.as_str().trim_start_matches(prefix).to_string())
            .collect()
    }

    #[test_case(9, 1; "single digit")]
    #[test_case(10, 2; "two digits")]
    #[test_case(100, 3; "three digits")]
    #[test_case(0, 1; "zero")]
    fn width_follows_end(end: u32, expected: usize) {
        assert_eq!(padding_width(end), expected);
    }

    #[test]
    fn names_are_padded_to_end_width() {
        let names = instance_names("APW", 1, 10);
        assert_eq!(names.len(), 10);
        assert_eq!(names[0].as_str(), "APW01");
        assert_eq!(names[9].as_str(), "APW10");
        assert_eq!(
            suffixes(&names, "APW"),
            ["01", "02", "03", "04", "05", "06", "07", "08", "09", "10"]
        );
    }

    #[test]
    fn single_instance_range() {
        let names = instance_names("st", 7, 7);
        assert_eq!(names, vec![InstanceName::new("st", 7, 1)]);
        assert_eq!(
            names[0].config_path(Path::new("/etc/wireguard")),
            PathBuf::from("/etc/wireguard/st7.conf")
        );
    }

    #[test_case("APW01", true; "plain")]
    #[test_case("wg-site.1", true; "punctuation")]
    #[test_case("abcdefghijklmno", true; "fifteen bytes")]
    #[test_case("abcdefghijklmnop", false; "sixteen bytes")]
    #[test_case("has space", false; "space")]
    #[test_case("slash/0", false; "slash")]
    #[test_case("", false; "empty")]
    fn interface_names(name: &str, valid: bool) {
        assert_eq!(is_valid_interface_name(name), valid);
    }

    #[test]
    fn deletion_removes_only_in_scope_unprotected() {
        let dir = tempfile::tempdir().unwrap();
        let files = ["AP1.conf", "AP2.conf", "AP3.conf", "_AP1.conf", "_special.conf", "AP2.txt"];
        for file in files {
            std::fs::write(dir.path().join(file), "x").unwrap();
        }
        let names = instance_names("AP", 1, 2);

        let pass = delete_existing(dir.path(), &names, false).unwrap();

        assert_eq!(pass.removed.len(), 2);
        assert!(pass.failed.is_empty());
        assert!(!dir.path().join("AP1.conf").exists());
        assert!(!dir.path().join("AP2.conf").exists());
        assert!(dir.path().join("AP3.conf").exists(), "out of range");
        assert!(dir.path().join("_AP1.conf").exists());
        assert!(dir.path().join("_special.conf").exists());
        assert!(dir.path().join("AP2.txt").exists());
        assert_eq!(pass.protected.len(), 2);
    }

    #[test]
    fn deletion_matches_padded_names_only() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["AP01.conf", "AP1.conf", "AP10.conf"] {
            std::fs::write(dir.path().join(file), "x").unwrap();
        }

        let pass = delete_existing(dir.path(), &instance_names("AP", 1, 10), false).unwrap();

        assert_eq!(pass.removed.len(), 2);
        assert!(!dir.path().join("AP01.conf").exists());
        assert!(!dir.path().join("AP10.conf").exists());
        assert!(dir.path().join("AP1.conf").exists(), "unpadded name is out of scope");
    }

    #[test]
    fn deletion_dry_run_leaves_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("AP1.conf"), "x").unwrap();

        let pass = delete_existing(dir.path(), &instance_names("AP", 1, 1), true).unwrap();

        assert_eq!(pass.removed, vec![dir.path().join("AP1.conf")]);
        assert!(dir.path().join("AP1.conf").exists());
    }

    #[test]
    fn deletion_in_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let absent = dir.path().join("absent");
        let pass = delete_existing(&absent, &instance_names("AP", 1, 3), false).unwrap();
        assert!(pass.removed.is_empty());
    }
}

use crate::manifest::Platform;
use anyhow::{anyhow, Context, Result};
use itertools::Itertools;
use lazy_regex::regex;
use log::debug;
use semver::Version;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};
use walkdir::{DirEntry, WalkDir};

const MAX_DEPTH: usize = 2;
const SIDE_FILE_EXTENSIONS: &[&str] = &[".sig", ".sha256", ".blake3"];

/// A build artifact found on disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocatedArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size: u64,
}

/// The artifacts found for each platform. A platform with no artifact is absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Artifacts(BTreeMap<Platform, LocatedArtifact>);

impl Artifacts {
    #[must_use]
    pub fn get(&self, platform: Platform) -> Option<&LocatedArtifact> {
        self.0.get(&platform)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Platform, &LocatedArtifact)> {
        self.0.iter().map(|(p, a)| (*p, a))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Artifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (platform, artifact) in self.iter() {
            writeln!(f, "{platform:<12} {} ({} bytes)", artifact.file_name, artifact.size)?;
        }
        Ok(())
    }
}

/// Returns the platform a file name belongs to, if any.
#[must_use]
pub fn classify(file_name: &str) -> Option<Platform> {
    let lower = file_name.to_lowercase();
    if lower.starts_with('.')
        || SIDE_FILE_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(ext))
    {
        return None;
    }

    let ends_with_any = |exts: &[&str]| exts.iter().any(|ext| lower.ends_with(ext));
    if lower.contains("win") && ends_with_any(&[".zip", ".exe"]) {
        Some(Platform::WinX64)
    } else if lower.contains("linux") && ends_with_any(&[".zip", ".tar.gz", ".appimage"]) {
        Some(Platform::LinuxX64)
    } else if (lower.contains("macos") || lower.contains("osx"))
        && ends_with_any(&[".dmg", ".zip"])
    {
        Some(Platform::MacosArm64)
    } else {
        None
    }
}

/// Returns false when the name mentions an `X.Y.Z` version other than `version`.
fn matches_version(file_name: &str, version: &Version) -> bool {
    let wanted = format!("{}.{}.{}", version.major, version.minor, version.patch);
    let mentioned = regex!(r"(\d+)\.(\d+)\.(\d+)")
        .find_iter(file_name)
        .map(|m| m.as_str())
        .collect::<Vec<_>>();
    mentioned.is_empty() || mentioned.contains(&wanted.as_str())
}

/// Finds one artifact per platform under `dir`, looking at most two levels deep.
///
/// # Errors
///
/// Returns an error if `dir` cannot be read, or if more than one file matches a platform.
pub fn locate(dir: &Path, version: Option<&Version>) -> Result<Artifacts> {
    debug!("looking for artifacts in {}", dir.display());
    if !dir.is_dir() {
        return Err(anyhow!("{} is not a directory", dir.display()));
    }

    let mut candidates: BTreeMap<Platform, Vec<DirEntry>> = BTreeMap::new();
    for entry in WalkDir::new(dir)
        .max_depth(MAX_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
    {
        let entry = entry.with_context(|| format!("could not read {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        let Some(platform) = classify(&name) else {
            continue;
        };
        if let Some(version) = version {
            if !matches_version(&name, version) {
                debug!("skipping {name}, which is for a different version than {version}");
                continue;
            }
        }
        debug!("found {platform} candidate {}", entry.path().display());
        candidates.entry(platform).or_default().push(entry);
    }

    let mut found = BTreeMap::new();
    for (platform, mut entries) in candidates {
        if entries.len() > 1 {
            return Err(anyhow!(
                "found more than one artifact for {platform}: {}",
                entries.iter().map(|e| e.path().display()).join(", ")
            ));
        }
        let Some(entry) = entries.pop() else {
            continue;
        };
        let size = entry
            .metadata()
            .with_context(|| format!("could not stat {}", entry.path().display()))?
            .len();
        found.insert(
            platform,
            LocatedArtifact {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.into_path(),
                size,
            },
        );
    }

    Ok(Artifacts(found))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use tempfile::tempdir;

    #[rstest]
    #[case("StabilityMatrix-win-x64.zip", Some(Platform::WinX64))]
    #[case("StabilityMatrix-Win-x64.EXE", Some(Platform::WinX64))]
    #[case("StabilityMatrix-linux-x64.zip", Some(Platform::LinuxX64))]
    #[case("StabilityMatrix-linux-x64.tar.gz", Some(Platform::LinuxX64))]
    #[case("StabilityMatrix.Linux.AppImage", Some(Platform::LinuxX64))]
    #[case("StabilityMatrix-macos-arm64.dmg", Some(Platform::MacosArm64))]
    #[case("StabilityMatrix-osx-arm64.zip", Some(Platform::MacosArm64))]
    #[case("StabilityMatrix-win-x64.zip.sig", None)]
    #[case("StabilityMatrix-linux-x64.zip.sha256", None)]
    #[case(".win-x64.zip", None)]
    #[case("StabilityMatrix-win-x64.pdb", None)]
    #[case("README.md", None)]
    fn classify(#[case] name: &str, #[case] expect: Option<Platform>) {
        assert_eq!(super::classify(name), expect);
    }

    #[rstest]
    #[case("StabilityMatrix-win-x64.zip", true)]
    #[case("StabilityMatrix-2.9.0-win-x64.zip", true)]
    #[case("StabilityMatrix-2.8.4-win-x64.zip", false)]
    fn matches_version(#[case] name: &str, #[case] expect: bool) {
        assert_eq!(
            super::matches_version(name, &Version::new(2, 9, 0)),
            expect
        );
    }

    #[test]
    fn locate_finds_one_per_platform() -> Result<()> {
        let td = tempdir()?;
        let nested = td.path().join("linux");
        fs::create_dir(&nested)?;
        fs::write(td.path().join("StabilityMatrix-win-x64.zip"), b"win")?;
        fs::write(td.path().join("StabilityMatrix-win-x64.zip.sig"), b"sig")?;
        fs::write(nested.join("StabilityMatrix-linux-x64.zip"), b"linux!")?;
        fs::write(td.path().join("notes.txt"), b"")?;

        let found = locate(td.path(), None)?;
        assert_eq!(found.len(), 2);
        let win = found.get(Platform::WinX64).expect("win artifact");
        assert_eq!(win.file_name, "StabilityMatrix-win-x64.zip");
        assert_eq!(win.size, 3);
        let linux = found.get(Platform::LinuxX64).expect("linux artifact");
        assert_eq!(linux.path, nested.join("StabilityMatrix-linux-x64.zip"));
        assert_eq!(linux.size, 6);
        assert!(found.get(Platform::MacosArm64).is_none());
        Ok(())
    }

    #[test]
    fn locate_skips_hidden_dirs_and_too_deep_files() -> Result<()> {
        let td = tempdir()?;
        let hidden = td.path().join(".cache");
        fs::create_dir(&hidden)?;
        fs::write(hidden.join("StabilityMatrix-win-x64.zip"), b"")?;
        let deep = td.path().join("a").join("b");
        fs::create_dir_all(&deep)?;
        fs::write(deep.join("StabilityMatrix-linux-x64.zip"), b"")?;

        assert!(locate(td.path(), None)?.is_empty());
        Ok(())
    }

    #[test]
    fn locate_filters_on_version() -> Result<()> {
        let td = tempdir()?;
        fs::write(td.path().join("StabilityMatrix-2.8.0-win-x64.zip"), b"")?;
        fs::write(td.path().join("StabilityMatrix-2.9.0-win-x64.zip"), b"")?;

        let found = locate(td.path(), Some(&Version::new(2, 9, 0)))?;
        assert_eq!(
            found.get(Platform::WinX64).map(|a| a.file_name.as_str()),
            Some("StabilityMatrix-2.9.0-win-x64.zip")
        );
        Ok(())
    }

    #[test]
    fn locate_rejects_ambiguous_platform() -> Result<()> {
        let td = tempdir()?;
        fs::write(td.path().join("StabilityMatrix-win-x64.zip"), b"")?;
        fs::write(td.path().join("StabilityMatrix-win-x64.exe"), b"")?;

        let err = locate(td.path(), None).unwrap_err();
        assert!(err.to_string().contains("more than one artifact for win-x64"));
        Ok(())
    }

    #[test]
    fn locate_requires_a_directory() {
        assert!(locate(Path::new("/does/not/exist"), None).is_err());
    }
}

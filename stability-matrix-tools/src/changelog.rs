use anyhow::{Context, Result};
use lazy_regex::regex;
use log::debug;
use semver::Version;
use std::{fs, path::Path};

/// One `## vX.Y.Z` section of a changelog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogEntry {
    pub version: Version,
    pub body: String,
}

/// Returns the first versioned section of a markdown changelog, or `None` if there are no
/// `## vX.Y.Z` headings in the text.
#[must_use]
pub fn latest_entry(text: &str) -> Option<ChangelogEntry> {
    entries(text).into_iter().next()
}

/// Returns the body of the section for `version`, if the changelog has one.
#[must_use]
pub fn entry_for(text: &str, version: &Version) -> Option<String> {
    entries(text)
        .into_iter()
        .find(|e| &e.version == version)
        .map(|e| e.body)
}

/// Reads a changelog file and returns its latest section.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn read_latest(path: &Path) -> Result<Option<ChangelogEntry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("could not read changelog at {}", path.display()))?;
    Ok(latest_entry(&text))
}

fn entries(text: &str) -> Vec<ChangelogEntry> {
    let heading = regex!(r"##\s*v([0-9]+\.[0-9]+\.[0-9]+(?:-[0-9A-Za-z.-]+)?)");

    let headings = heading.captures_iter(text).collect::<Vec<_>>();
    let mut entries = Vec::with_capacity(headings.len());
    for (i, caps) in headings.iter().enumerate() {
        let (Some(whole), Some(version)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let end = headings
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |m| m.start());

        let Ok(version) = Version::parse(version.as_str()) else {
            debug!("skipping changelog heading with unparseable version `{}`", version.as_str());
            continue;
        };
        entries.push(ChangelogEntry {
            version,
            body: text[whole.end()..end].trim().to_string(),
        });
    }

    entries
}

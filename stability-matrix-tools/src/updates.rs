use crate::{
    hashing,
    http::check,
    manifest::{Platform, UpdateChannel, UpdateInfo, UpdateManifest, UpdateType},
    signing::{self, SigningError},
};
use anyhow::{Context, Result};
use chrono::{DateTime, SubsecRound, Utc};
use ed25519_dalek::{SigningKey, VerifyingKey};
use log::{debug, info};
use reqwest::{header::CACHE_CONTROL, Client};
use semver::Version;
use similar::TextDiff;
use std::path::Path;

/// Fetches and parses the published manifest, bypassing any cached copy.
///
/// # Errors
///
/// Returns an error if the request fails, the server responds with a non-2xx status, or the body
/// is not a manifest.
pub async fn fetch_manifest(client: &Client, url: &str) -> Result<UpdateManifest> {
    debug!("fetching the update manifest from `{url}`");
    let resp = client
        .get(url)
        .header(CACHE_CONTROL, "no-cache")
        .send()
        .await
        .with_context(|| format!("Could not fetch the update manifest from {url}"))?;
    let text = check(resp, "Could not fetch the update manifest")
        .await?
        .text()
        .await?;
    UpdateManifest::parse(&text).with_context(|| format!("the manifest at {url} is not valid"))
}

/// Everything about a new update entry except its hash and signature.
#[derive(Clone, Debug)]
pub struct NewEntry {
    pub version: Version,
    pub channel: UpdateChannel,
    pub update_type: UpdateType,
    pub url: String,
    pub changelog: String,
    /// Defaults to now.
    pub release_date: Option<DateTime<Utc>>,
}

/// Hashes `artifact` and builds a signed [`UpdateInfo`] for it.
///
/// # Errors
///
/// Returns an error if the artifact cannot be read.
pub fn build_entry(artifact: &Path, entry: NewEntry, key: &SigningKey) -> Result<UpdateInfo> {
    let hash_blake3 = hashing::blake3_file_with_progress(artifact)?;
    Ok(signed_entry(entry, hash_blake3, key))
}

/// Builds a signed [`UpdateInfo`] from an already computed hash.
#[must_use]
pub fn signed_entry(entry: NewEntry, hash_blake3: String, key: &SigningKey) -> UpdateInfo {
    let mut info = UpdateInfo {
        version: entry.version,
        // Signed and published with whole-second precision.
        release_date: entry
            .release_date
            .unwrap_or_else(Utc::now)
            .trunc_subsecs(0),
        channel: entry.channel,
        update_type: entry.update_type,
        url: entry.url,
        changelog: entry.changelog,
        hash_blake3,
        signature: String::new(),
    };
    signing::sign_update(key, &mut info);
    info
}

/// The manifest JSON before and after an entry was applied.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedEntry {
    pub old_json: String,
    pub new_json: String,
    pub replaced: Option<UpdateInfo>,
}

impl AppliedEntry {
    #[must_use]
    pub fn diff(&self) -> String {
        diff(&self.old_json, &self.new_json)
    }

    #[must_use]
    pub fn changed(&self) -> bool {
        self.old_json != self.new_json
    }
}

/// Sets `info` as the entry for `platform` in its channel.
///
/// # Errors
///
/// Returns an error if the manifest cannot be serialized.
pub fn apply_entry(
    manifest: &mut UpdateManifest,
    platform: Platform,
    info: UpdateInfo,
) -> Result<AppliedEntry> {
    let old_json = manifest.to_pretty_json()?;
    info!(
        "setting {} {platform} to version {}",
        info.channel, info.version
    );
    let replaced = manifest.set(platform, info);
    let new_json = manifest.to_pretty_json()?;
    Ok(AppliedEntry {
        old_json,
        new_json,
        replaced,
    })
}

/// A unified diff between two texts, or an empty string if they are equal.
#[must_use]
pub fn diff(old: &str, new: &str) -> String {
    if old == new {
        return String::new();
    }
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header("current", "new")
        .to_string()
}

/// The result of checking one manifest entry's signature.
#[derive(Debug)]
pub struct EntryCheck {
    pub channel: UpdateChannel,
    pub platform: Platform,
    pub version: Version,
    pub result: Result<(), SigningError>,
}

impl EntryCheck {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.result.is_ok()
    }
}

/// Checks the signature of every entry in the manifest.
#[must_use]
pub fn verify_manifest(manifest: &UpdateManifest, key: &VerifyingKey) -> Vec<EntryCheck> {
    manifest
        .entries()
        .map(|(channel, platform, info)| EntryCheck {
            channel,
            platform,
            version: info.version.clone(),
            result: signing::verify_update(key, info),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use mockito::Server;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use test_log::test;

    fn new_entry(channel: UpdateChannel) -> NewEntry {
        NewEntry {
            version: Version::new(2, 9, 0),
            channel,
            update_type: UpdateType::NORMAL,
            url: "https://cdn.lykos.ai/sm/v2.9.0/StabilityMatrix-win-x64.zip".to_string(),
            changelog: "https://cdn.lykos.ai/changelog.md".to_string(),
            release_date: Some(
                Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6)
                    .single()
                    .expect("valid date"),
            ),
        }
    }

    #[test(tokio::test)]
    async fn fetch_manifest_sends_no_cache() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/update.json")
            .match_header("cache-control", "no-cache")
            .with_status(200)
            .with_body(r#"{"updates":{}}"#)
            .create_async()
            .await;
        let manifest =
            fetch_manifest(&Client::new(), &format!("{}/update.json", server.url())).await?;
        m.assert_async().await;
        assert_eq!(manifest, UpdateManifest::default());
        Ok(())
    }

    #[test(tokio::test)]
    async fn fetch_manifest_error_status() -> Result<()> {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/update.json")
            .with_status(500)
            .create_async()
            .await;
        assert!(
            fetch_manifest(&Client::new(), &format!("{}/update.json", server.url()))
                .await
                .is_err()
        );
        Ok(())
    }

    #[test]
    fn build_entry_hashes_and_signs() -> Result<()> {
        let mut f = NamedTempFile::new()?;
        f.write_all(b"release bytes")?;
        f.flush()?;

        let key = signing::generate();
        let info = build_entry(f.path(), new_entry(UpdateChannel::Stable), &key)?;
        assert_eq!(info.hash_blake3, hashing::blake3_bytes(b"release bytes"));
        assert!(!info.signature.is_empty());
        signing::verify_update(&key.verifying_key(), &info)?;
        Ok(())
    }

    #[test]
    fn signed_entry_defaults_to_now() {
        let key = signing::generate();
        let mut entry = new_entry(UpdateChannel::Stable);
        entry.release_date = None;
        let before = Utc::now().trunc_subsecs(0);
        let info = signed_entry(entry, "00".repeat(32), &key);
        assert!(info.release_date >= before);
        assert_eq!(info.release_date.timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn apply_entry_reports_old_and_new() -> Result<()> {
        let key = signing::generate();
        let mut manifest = UpdateManifest::default();

        let first = signed_entry(new_entry(UpdateChannel::Stable), "00".repeat(32), &key);
        let applied = apply_entry(&mut manifest, Platform::WinX64, first.clone())?;
        assert!(applied.changed());
        assert_eq!(applied.replaced, None);
        assert!(applied.new_json.contains("\"win-x64\""));
        let diff = applied.diff();
        assert!(diff.contains("+++ new"), "{diff}");
        assert!(
            diff.lines()
                .any(|l| l.starts_with('+') && l.contains("\"hashBlake3\"")),
            "{diff}"
        );

        let again = apply_entry(&mut manifest, Platform::WinX64, first.clone())?;
        assert!(!again.changed());
        assert_eq!(again.diff(), "");
        assert_eq!(again.replaced, Some(first));
        Ok(())
    }

    #[test]
    fn verify_manifest_flags_bad_entries() -> Result<()> {
        let key = signing::generate();
        let mut manifest = UpdateManifest::default();
        manifest.set(
            Platform::WinX64,
            signed_entry(new_entry(UpdateChannel::Stable), "00".repeat(32), &key),
        );
        let mut tampered = signed_entry(new_entry(UpdateChannel::Preview), "11".repeat(32), &key);
        tampered.url = "https://example.com/evil.zip".to_string();
        manifest.set(Platform::LinuxX64, tampered);

        let checks = verify_manifest(&manifest, &key.verifying_key());
        assert_eq!(checks.len(), 2);
        let by_channel = |c| {
            checks
                .iter()
                .find(|check| check.channel == c)
                .map(EntryCheck::is_valid)
        };
        assert_eq!(by_channel(UpdateChannel::Stable), Some(true));
        assert_eq!(by_channel(UpdateChannel::Preview), Some(false));
        Ok(())
    }
}

//! Types for the `update.json` manifest read by the Stability Matrix updater.
//!
//! The manifest maps each [`UpdateChannel`] to one optional [`UpdateInfo`] per [`Platform`]:
//!
//! ```json
//! {
//!   "updates": {
//!     "stable": {
//!       "win-x64": { "version": "2.9.0", "releaseDate": "...", "hashBlake3": "...", ... }
//!     }
//!   }
//! }
//! ```
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use itertools::Itertools;
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt, ops::BitOr};
use strum::{EnumIter, IntoEnumIterator};

#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    EnumIter,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum UpdateChannel {
    Stable,
    Preview,
    Development,
}

/// The platforms that Stability Matrix ships builds for.
#[derive(
    Clone,
    Copy,
    Debug,
    Deserialize,
    EnumIter,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    strum::AsRefStr,
    strum::Display,
    strum::EnumString,
    strum::VariantNames,
)]
pub enum Platform {
    #[serde(rename = "win-x64")]
    #[strum(serialize = "win-x64")]
    WinX64,
    #[serde(rename = "linux-x64")]
    #[strum(serialize = "linux-x64")]
    LinuxX64,
    #[serde(rename = "macos-arm64")]
    #[strum(serialize = "macos-arm64")]
    MacosArm64,
}

/// Update type flags. These are serialized as an integer, which is what the updater expects.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UpdateType(u8);

impl UpdateType {
    pub const NORMAL: UpdateType = UpdateType(1 << 0);
    pub const CRITICAL: UpdateType = UpdateType(1 << 1);
    pub const MANDATORY: UpdateType = UpdateType(1 << 2);

    const NAMED: [(&'static str, UpdateType); 3] = [
        ("normal", Self::NORMAL),
        ("critical", Self::CRITICAL),
        ("mandatory", Self::MANDATORY),
    ];

    /// Parses a string like `normal` or `critical,mandatory`. Every flag name that appears in the
    /// string is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the string does not name any flag.
    pub fn parse(value: &str) -> Result<Self> {
        let lower = value.to_lowercase();
        let parsed = Self::NAMED
            .iter()
            .filter(|(name, _)| lower.contains(name))
            .fold(UpdateType::default(), |acc, (_, flag)| acc | *flag);

        if parsed.is_empty() {
            return Err(anyhow!("Unknown update type: {value:?}"));
        }
        Ok(parsed)
    }

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn contains(self, other: UpdateType) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for UpdateType {
    type Output = UpdateType;

    fn bitor(self, rhs: Self) -> Self::Output {
        UpdateType(self.0 | rhs.0)
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .join("|");
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names)
        }
    }
}

/// A single update entry for one channel and platform.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfo {
    pub version: Version,
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub release_date: DateTime<Utc>,
    pub channel: UpdateChannel,
    #[serde(rename = "type")]
    pub update_type: UpdateType,
    pub url: String,
    pub changelog: String,
    pub hash_blake3: String,
    #[serde(default)]
    pub signature: String,
}

impl UpdateInfo {
    /// The bytes covered by [`UpdateInfo::signature`]. Every field except the signature itself is
    /// included, joined with `;`.
    #[must_use]
    pub fn signed_data(&self) -> String {
        format!(
            "{};{};{};{};{};{};{}",
            self.version,
            format_timestamp(&self.release_date),
            self.channel,
            self.update_type.bits(),
            self.url,
            self.changelog,
            self.hash_blake3,
        )
    }
}

/// One optional update per platform. This is also the shape of the legacy, channel-less manifest.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct UpdatePlatforms {
    #[serde(rename = "win-x64", default, skip_serializing_if = "Option::is_none")]
    pub win_x64: Option<UpdateInfo>,
    #[serde(rename = "linux-x64", default, skip_serializing_if = "Option::is_none")]
    pub linux_x64: Option<UpdateInfo>,
    #[serde(
        rename = "macos-arm64",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub macos_arm64: Option<UpdateInfo>,
}

/// The pre-channel manifest format, which held a single update per platform.
pub type UpdateCollection = UpdatePlatforms;

impl UpdatePlatforms {
    #[must_use]
    pub fn get(&self, platform: Platform) -> Option<&UpdateInfo> {
        match platform {
            Platform::WinX64 => self.win_x64.as_ref(),
            Platform::LinuxX64 => self.linux_x64.as_ref(),
            Platform::MacosArm64 => self.macos_arm64.as_ref(),
        }
    }

    fn slot(&mut self, platform: Platform) -> &mut Option<UpdateInfo> {
        match platform {
            Platform::WinX64 => &mut self.win_x64,
            Platform::LinuxX64 => &mut self.linux_x64,
            Platform::MacosArm64 => &mut self.macos_arm64,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Platform, &UpdateInfo)> {
        Platform::iter().filter_map(|p| self.get(p).map(|i| (p, i)))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct UpdateManifest {
    #[serde(default)]
    pub updates: BTreeMap<UpdateChannel, UpdatePlatforms>,
}

impl UpdateManifest {
    /// Parses a manifest. The legacy channel-less format is accepted too, in which case every
    /// entry is filed under its own `channel` field.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not JSON in either format.
    pub fn parse(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(text).context("update manifest is not valid JSON")?;
        if value.get("updates").is_some() {
            return serde_json::from_value(value).context("could not parse update manifest");
        }

        let legacy: UpdateCollection =
            serde_json::from_value(value).context("could not parse legacy update manifest")?;
        Ok(Self::from_legacy(legacy))
    }

    #[must_use]
    pub fn from_legacy(collection: UpdateCollection) -> Self {
        let mut manifest = Self::default();
        for (platform, info) in collection.iter() {
            manifest.set(platform, info.clone());
        }
        manifest
    }

    #[must_use]
    pub fn get(&self, channel: UpdateChannel, platform: Platform) -> Option<&UpdateInfo> {
        self.updates.get(&channel).and_then(|p| p.get(platform))
    }

    /// Stores `info` under its own channel, returning the entry it replaced.
    pub fn set(&mut self, platform: Platform, info: UpdateInfo) -> Option<UpdateInfo> {
        self.updates
            .entry(info.channel)
            .or_default()
            .slot(platform)
            .replace(info)
    }

    pub fn remove(&mut self, channel: UpdateChannel, platform: Platform) -> Option<UpdateInfo> {
        let platforms = self.updates.get_mut(&channel)?;
        let removed = platforms.slot(platform).take();
        if platforms.is_empty() {
            self.updates.remove(&channel);
        }
        removed
    }

    pub fn entries(&self) -> impl Iterator<Item = (UpdateChannel, Platform, &UpdateInfo)> {
        self.updates
            .iter()
            .flat_map(|(c, platforms)| platforms.iter().map(move |(p, i)| (*c, p, i)))
    }

    /// The JSON that gets published.
    ///
    /// # Errors
    ///
    /// Serialization of these types does not fail in practice, but `serde_json` can return an error.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Formats timestamps the way the manifest stores them, e.g. `2024-02-03T04:05:06+00:00`.
#[must_use]
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

/// Parses an RFC 3339 timestamp, or a naive ISO-8601 timestamp which is assumed to be UTC.
///
/// # Errors
///
/// Returns an error if the string matches neither form.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(naive.and_utc());
        }
    }
    Err(anyhow!("could not parse `{value}` as a timestamp"))
}

fn serialize_timestamp<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(dt))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TimestampRepr {
    Single(String),
    // Some older manifests were written with the timestamp wrapped in a one-element array.
    Wrapped(Vec<String>),
}

fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = match TimestampRepr::deserialize(deserializer)? {
        TimestampRepr::Single(s) => s,
        TimestampRepr::Wrapped(v) => v
            .into_iter()
            .next()
            .ok_or_else(|| serde::de::Error::custom("empty timestamp array"))?,
    };
    parse_timestamp(&raw).map_err(serde::de::Error::custom)
}

/// The `builder` module contains the `PublisherBuilder` struct which is used to create a
/// `Publisher` instance.
use crate::{
    config::Settings,
    github::RepoRef,
    http::reqwest_client,
    manifest::{UpdateChannel, UpdateType},
    publisher::{ChangelogSource, Publisher},
};
use anyhow::{anyhow, Context, Result};
use ed25519_dalek::SigningKey;
use log::debug;
use semver::Version;
use std::path::{Path, PathBuf};

/// `PublisherBuilder` is used to create a [`Publisher`] instance.
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct PublisherBuilder<'a> {
    settings: Option<&'a Settings>,
    version: Option<&'a str>,
    channel: Option<UpdateChannel>,
    update_type: Option<UpdateType>,
    artifact_dir: Option<PathBuf>,
    changelog_file: Option<PathBuf>,
    changelog_text: Option<&'a str>,
    changelog_url: Option<&'a str>,
    bucket: Option<&'a str>,
    signing_key: Option<SigningKey>,
    github_token: Option<&'a str>,
    dry_run: bool,
    no_github_release: bool,
}

impl<'a> PublisherBuilder<'a> {
    /// Returns a new empty `PublisherBuilder`.
    #[must_use]
    pub fn new() -> Self {
        PublisherBuilder::default()
    }

    /// The settings to publish with. This is required.
    #[must_use]
    pub fn settings(mut self, settings: &'a Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// The version being released, like `2.9.0` or `v2.9.0`. This is required.
    #[must_use]
    pub fn version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }

    /// The update channel to publish to. This is required.
    #[must_use]
    pub fn channel(mut self, channel: UpdateChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Defaults to [`UpdateType::NORMAL`].
    #[must_use]
    pub fn update_type(mut self, update_type: UpdateType) -> Self {
        self.update_type = Some(update_type);
        self
    }

    /// The directory holding the build artifacts. This is required.
    #[must_use]
    pub fn artifact_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.artifact_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// A changelog file to take the release notes from. The section for this version is used.
    ///
    /// You cannot set this and `changelog_text`.
    #[must_use]
    pub fn changelog_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.changelog_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Release notes given directly.
    ///
    /// You cannot set this and `changelog_file`.
    #[must_use]
    pub fn changelog_text(mut self, text: &'a str) -> Self {
        self.changelog_text = Some(text);
        self
    }

    /// The URL that update entries point to for the changelog. By default this is the release
    /// page for the version's tag in the public repo.
    #[must_use]
    pub fn changelog_url(mut self, url: &'a str) -> Self {
        self.changelog_url = Some(url);
        self
    }

    /// The B2 bucket for the artifacts. Defaults to the `SM_B2_BUCKET_NAME` setting.
    #[must_use]
    pub fn bucket(mut self, bucket: &'a str) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// The key that update entries are signed with. This is required.
    #[must_use]
    pub fn signing_key(mut self, key: SigningKey) -> Self {
        self.signing_key = Some(key);
        self
    }

    /// The token for creating the GitHub release. If this is not set, the `GITHUB_TOKEN`
    /// environment variable is used.
    #[must_use]
    pub fn github_token(mut self, token: &'a str) -> Self {
        self.github_token = Some(token);
        self
    }

    /// In a dry run the artifacts are hashed and signed and the manifest diff is computed, but
    /// nothing is uploaded, purged, or released.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Skip creating or updating the GitHub release.
    #[must_use]
    pub fn no_github_release(mut self) -> Self {
        self.no_github_release = true;
        self
    }

    /// Builds a new [`Publisher`] instance and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if a required option is missing, if both changelog options are set, if
    /// the version is not valid semver, or if the public repo setting is not a GitHub repo.
    pub fn build(self) -> Result<Publisher<'a>> {
        let settings = self
            .settings
            .ok_or_else(|| anyhow!("You must set the settings to publish with"))?;
        let version = self
            .version
            .ok_or_else(|| anyhow!("You must set a version"))?;
        let version = parse_version(version)?;
        let channel = self
            .channel
            .ok_or_else(|| anyhow!("You must set a channel"))?;
        let artifact_dir = self
            .artifact_dir
            .ok_or_else(|| anyhow!("You must set an artifact directory"))?;
        let signing_key = self
            .signing_key
            .ok_or_else(|| anyhow!("You must set a signing key"))?;

        let changelog = match (self.changelog_file, self.changelog_text) {
            (Some(_), Some(_)) => {
                return Err(anyhow!(
                    "You cannot set both a changelog file and changelog text"
                ))
            }
            (Some(path), None) => ChangelogSource::File(path),
            (None, Some(text)) => ChangelogSource::Text(text.to_string()),
            (None, None) => ChangelogSource::None,
        };

        let public_repo = RepoRef::parse(&settings.git_repo_public)?;
        let changelog_url = self.changelog_url.map_or_else(
            || {
                format!(
                    "https://github.com/{public_repo}/releases/tag/v{version}"
                )
            },
            String::from,
        );
        let bucket = self
            .bucket
            .unwrap_or(settings.b2_bucket_name.as_str())
            .to_string();
        debug!(
            "publishing v{version} to the {channel} channel from {} into bucket {bucket}",
            artifact_dir.display()
        );

        Ok(Publisher {
            settings,
            version,
            channel,
            update_type: self.update_type.unwrap_or(UpdateType::NORMAL),
            artifact_dir,
            changelog,
            changelog_url,
            bucket,
            signing_key,
            github_token: self.github_token.map(String::from),
            dry_run: self.dry_run,
            github_release: !self.no_github_release,
            public_repo,
            reqwest_client: reqwest_client()?,
        })
    }
}

/// Parses a version, allowing a leading `v`.
///
/// # Errors
///
/// Returns an error if the value is not valid semver.
pub fn parse_version(version: &str) -> Result<Version> {
    let trimmed = version.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(bare).with_context(|| format!("`{version}` is not a valid version"))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::signing;
    use rstest::rstest;

    #[rstest]
    #[case("2.9.0", Version::new(2, 9, 0))]
    #[case("v2.9.0", Version::new(2, 9, 0))]
    #[case(" 2.10.1 ", Version::new(2, 10, 1))]
    fn parse_version(#[case] input: &str, #[case] expect: Version) -> Result<()> {
        assert_eq!(super::parse_version(input)?, expect);
        Ok(())
    }

    #[test]
    fn parse_prerelease_version() -> Result<()> {
        let v = super::parse_version("2.10.0-pre.1")?;
        assert_eq!(v.pre.as_str(), "pre.1");
        assert!(super::parse_version("two").is_err());
        Ok(())
    }

    #[test]
    fn build_requires_options() {
        let settings = Settings::default();
        let err = PublisherBuilder::new().build().unwrap_err();
        assert_eq!(err.to_string(), "You must set the settings to publish with");

        let err = PublisherBuilder::new()
            .settings(&settings)
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "You must set a version");

        let err = PublisherBuilder::new()
            .settings(&settings)
            .version("2.9.0")
            .channel(UpdateChannel::Stable)
            .artifact_dir("dist")
            .build()
            .unwrap_err();
        assert_eq!(err.to_string(), "You must set a signing key");
    }

    #[test]
    fn build_rejects_two_changelogs() {
        let settings = Settings::default();
        let err = PublisherBuilder::new()
            .settings(&settings)
            .version("2.9.0")
            .channel(UpdateChannel::Stable)
            .artifact_dir("dist")
            .signing_key(signing::generate())
            .changelog_file("CHANGELOG.md")
            .changelog_text("text")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("both a changelog file and changelog text"));
    }

    #[test]
    fn build_defaults() -> Result<()> {
        let settings = Settings::default();
        let publisher = PublisherBuilder::new()
            .settings(&settings)
            .version("v2.9.0")
            .channel(UpdateChannel::Preview)
            .artifact_dir("dist")
            .signing_key(signing::generate())
            .build()?;
        assert_eq!(publisher.version(), &Version::new(2, 9, 0));
        assert_eq!(publisher.bucket(), "lykos-1");
        assert_eq!(
            publisher.changelog_url(),
            "https://github.com/LykosAI/StabilityMatrix/releases/tag/v2.9.0"
        );
        assert!(!publisher.is_dry_run());
        Ok(())
    }
}

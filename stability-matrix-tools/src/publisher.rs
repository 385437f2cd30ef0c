use crate::{
    artifacts::{self, Artifacts},
    b2::B2Client,
    changelog,
    cloudflare::Cloudflare,
    config::Settings,
    github::{GitHub, NewRelease, RepoRef},
    hashing,
    manifest::{Platform, UpdateChannel, UpdateManifest, UpdateType},
    progress::Step,
    updates::{self, NewEntry},
};
use anyhow::{anyhow, Context, Result};
use ed25519_dalek::SigningKey;
use itertools::Itertools;
use log::{debug, info, warn};
use reqwest::Client;
use semver::Version;
use std::{fmt::Write as _, fs, path::PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChangelogSource {
    File(PathBuf),
    Text(String),
    None,
}

/// `Publisher` uploads a release and publishes it in the update manifest. Use the
/// [`PublisherBuilder`](crate::PublisherBuilder) struct to create a new `Publisher` instance.
#[derive(Debug)]
pub struct Publisher<'a> {
    pub(crate) settings: &'a Settings,
    pub(crate) version: Version,
    pub(crate) channel: UpdateChannel,
    pub(crate) update_type: UpdateType,
    pub(crate) artifact_dir: PathBuf,
    pub(crate) changelog: ChangelogSource,
    pub(crate) changelog_url: String,
    pub(crate) bucket: String,
    pub(crate) signing_key: SigningKey,
    pub(crate) github_token: Option<String>,
    pub(crate) dry_run: bool,
    pub(crate) github_release: bool,
    pub(crate) public_repo: RepoRef,
    pub(crate) reqwest_client: Client,
}

/// One artifact and where it will be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedUpload {
    pub platform: Platform,
    pub local: PathBuf,
    pub file_name: String,
    pub size: u64,
    pub b2_path: String,
    pub url: String,
}

/// What [`Publisher::publish`] will do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPlan {
    pub version: Version,
    pub tag: String,
    pub channel: UpdateChannel,
    pub update_type: UpdateType,
    pub bucket: String,
    pub uploads: Vec<PlannedUpload>,
    /// The release notes for this version, if any were found.
    pub release_notes: Option<String>,
}

/// An artifact after publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifact {
    pub platform: Platform,
    pub file_name: String,
    pub size: u64,
    pub url: String,
    pub hash_blake3: String,
    pub uploaded: bool,
}

/// What [`Publisher::publish`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub dry_run: bool,
    pub artifacts: Vec<PublishedArtifact>,
    /// The manifest with the new entries applied. This is what gets uploaded.
    pub manifest: UpdateManifest,
    /// A unified diff of the manifest, empty if it did not change.
    pub manifest_diff: String,
    pub manifest_uploaded: bool,
    pub purged: Vec<String>,
    pub release_url: Option<String>,
}

impl Publisher<'_> {
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    #[must_use]
    pub fn changelog_url(&self) -> &str {
        &self.changelog_url
    }

    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Finds the artifacts and release notes and works out where everything will go. This does
    /// not touch the network.
    ///
    /// # Errors
    ///
    /// Returns an error if no artifacts are found, the artifact directory is ambiguous, or the
    /// changelog has no section for this version.
    pub fn plan(&self) -> Result<PublishPlan> {
        let found = artifacts::locate(&self.artifact_dir, Some(&self.version))?;
        if found.is_empty() {
            return Err(anyhow!(
                "no release artifacts were found in {}",
                self.artifact_dir.display()
            ));
        }

        Ok(PublishPlan {
            version: self.version.clone(),
            tag: format!("v{}", self.version),
            channel: self.channel,
            update_type: self.update_type,
            bucket: self.bucket.clone(),
            uploads: self.planned_uploads(&found),
            release_notes: self.release_notes()?,
        })
    }

    fn planned_uploads(&self, found: &Artifacts) -> Vec<PlannedUpload> {
        found
            .iter()
            .map(|(platform, artifact)| {
                let b2_path = format!("sm/v{}/{}", self.version, artifact.file_name);
                PlannedUpload {
                    platform,
                    local: artifact.path.clone(),
                    file_name: artifact.file_name.clone(),
                    size: artifact.size,
                    url: self.settings.cdn_url_for(&self.bucket, &b2_path),
                    b2_path,
                }
            })
            .collect()
    }

    fn release_notes(&self) -> Result<Option<String>> {
        match &self.changelog {
            ChangelogSource::Text(text) => Ok(Some(text.trim().to_string())),
            ChangelogSource::File(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("could not read {}", path.display()))?;
                changelog::entry_for(&text, &self.version)
                    .map(Some)
                    .ok_or_else(|| {
                        anyhow!(
                            "{} has no `## v{}` section",
                            path.display(),
                            self.version
                        )
                    })
            }
            ChangelogSource::None => Ok(None),
        }
    }

    /// Publishes the release. The steps are:
    ///
    /// 1. Hash and upload each artifact to `sm/v{version}/{file_name}` in B2.
    /// 2. Build and sign an update entry for each artifact.
    /// 3. Fetch the current manifest and apply the new entries.
    /// 4. Upload the manifest, purge the CDN cache for everything that changed, and create or
    ///    update the GitHub release.
    ///
    /// In a dry run only the first half of step 1 and steps 2 and 3 happen, so nothing remote is
    /// changed.
    ///
    /// # Errors
    ///
    /// There are a number of cases where an error can be returned:
    ///
    /// * Required B2 or Cloudflare settings are missing.
    /// * Artifacts cannot be found or read.
    /// * Any B2, Cloudflare, or GitHub request fails.
    /// * The current manifest cannot be fetched or parsed.
    pub async fn publish(&self) -> Result<PublishReport> {
        let plan = self.plan()?;
        if self.dry_run {
            info!("dry run, nothing will be uploaded");
        } else {
            // Fail before uploading anything if the later steps can't run.
            self.settings.cloudflare_credentials()?;
        }

        let remote = if self.dry_run {
            None
        } else {
            let step = Step::start("Connecting to B2");
            let b2 = B2Client::authorize(
                &self.reqwest_client,
                &self.settings.b2_api_url,
                self.settings.b2_credentials()?,
            )
            .await?;
            let bucket = b2.bucket(&self.bucket).await?;
            step.finish();
            Some((b2, bucket))
        };

        let mut published = vec![];
        for upload in &plan.uploads {
            let hash_blake3 = hashing::blake3_file_with_progress(&upload.local)?;
            if let Some((b2, bucket)) = &remote {
                let step = Step::start(format!("Uploading {}", upload.file_name));
                b2.upload(bucket, &upload.local, &upload.b2_path).await?;
                step.finish();
            }
            published.push(PublishedArtifact {
                platform: upload.platform,
                file_name: upload.file_name.clone(),
                size: upload.size,
                url: upload.url.clone(),
                hash_blake3,
                uploaded: remote.is_some(),
            });
        }

        let step = Step::start("Updating the update manifest");
        let mut manifest =
            updates::fetch_manifest(&self.reqwest_client, &self.settings.update_manifest_url)
                .await?;
        let old_json = manifest.to_pretty_json()?;
        for artifact in &published {
            let entry = updates::signed_entry(
                NewEntry {
                    version: self.version.clone(),
                    channel: self.channel,
                    update_type: self.update_type,
                    url: artifact.url.clone(),
                    changelog: self.changelog_url.clone(),
                    release_date: None,
                },
                artifact.hash_blake3.clone(),
                &self.signing_key,
            );
            updates::apply_entry(&mut manifest, artifact.platform, entry)?;
        }
        let new_json = manifest.to_pretty_json()?;
        let manifest_diff = updates::diff(&old_json, &new_json);
        debug!("manifest diff:\n{manifest_diff}");
        step.finish();

        let mut report = PublishReport {
            dry_run: self.dry_run,
            artifacts: published,
            manifest,
            manifest_diff,
            manifest_uploaded: false,
            purged: vec![],
            release_url: None,
        };

        let Some((b2, _)) = &remote else {
            return Ok(report);
        };

        let step = Step::start("Uploading the update manifest");
        self.upload_manifest(b2, new_json).await?;
        report.manifest_uploaded = true;
        step.finish();

        let step = Step::start("Purging the CDN cache");
        let purged = std::iter::once(self.settings.update_manifest_url.clone())
            .chain(report.artifacts.iter().map(|a| a.url.clone()))
            .collect::<Vec<_>>();
        Cloudflare::new(
            &self.reqwest_client,
            &self.settings.cf_api_url,
            self.settings.cloudflare_credentials()?,
        )
        .purge(&purged)
        .await?;
        report.purged = purged;
        step.finish();

        if self.github_release {
            let step = Step::start(format!("Publishing the GitHub release for v{}", self.version));
            report.release_url = Some(self.publish_github_release(&plan, &report).await?);
            step.finish();
        } else {
            debug!("skipping the GitHub release");
        }

        Ok(report)
    }

    async fn upload_manifest(&self, b2: &B2Client, json: String) -> Result<()> {
        // The manifest always lives in the public bucket, whatever bucket the artifacts went to.
        let manifest_bucket = b2.bucket(&self.settings.b2_bucket_name).await?;
        b2.upload_bytes(
            &manifest_bucket,
            json.into_bytes(),
            &self.settings.update_manifest_path,
            "application/json",
        )
        .await?;
        Ok(())
    }

    async fn publish_github_release(
        &self,
        plan: &PublishPlan,
        report: &PublishReport,
    ) -> Result<String> {
        let github = GitHub::new(
            &self.reqwest_client,
            &self.settings.github_api_url,
            self.github_token.clone(),
        )?;
        if !github.has_token() {
            warn!("no GitHub token is set, so creating the release will probably fail");
        }

        let new = NewRelease {
            tag_name: plan.tag.clone(),
            target_commitish: None,
            name: plan.tag.clone(),
            body: release_body(plan.release_notes.as_deref(), &report.artifacts),
            draft: false,
            prerelease: self.channel != UpdateChannel::Stable,
        };
        let release = match github.release_by_tag(&self.public_repo, &plan.tag).await? {
            Some(existing) => {
                github
                    .update_release(&self.public_repo, existing.id, &new)
                    .await?
            }
            None => github.create_release(&self.public_repo, &new).await?,
        };
        Ok(release.html_url)
    }
}

/// The GitHub release body: the release notes followed by a table of download links.
#[must_use]
pub fn release_body(notes: Option<&str>, artifacts: &[PublishedArtifact]) -> String {
    let mut body = String::new();
    if let Some(notes) = notes.filter(|n| !n.trim().is_empty()) {
        body.push_str(notes.trim());
        body.push_str("\n\n");
    }
    body.push_str("## Downloads\n\n| Platform | File | BLAKE3 |\n| --- | --- | --- |\n");
    for artifact in artifacts.iter().sorted_by_key(|a| a.platform) {
        // Writing to a String cannot fail.
        let _ = writeln!(
            body,
            "| {} | [{}]({}) | `{}` |",
            artifact.platform, artifact.file_name, artifact.url, artifact.hash_blake3
        );
    }
    body
}

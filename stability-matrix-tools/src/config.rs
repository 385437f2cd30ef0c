use crate::uris;
use anyhow::{Context, Result};
use log::debug;
use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
};
use thiserror::Error;

const PREFIX: &str = "SM_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("The {var} environment variable (or .env entry) must be set for this command.")]
    Missing { var: String },
    #[error("The {var} setting has an invalid value `{value}`: {reason}")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

/// Settings read from the environment and `.env`. Every variable has an `SM_` prefix, so
/// `cdn_root` is read from `SM_CDN_ROOT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub update_manifest_url: String,
    pub update_manifest_path: String,
    pub cdn_root: String,

    pub b2_api_id: Option<String>,
    pub b2_api_key: Option<String>,
    pub b2_api_url: String,
    pub b2_bucket_name: String,
    pub b2_bucket_secure_name: String,

    pub cf_zone_id: Option<String>,
    pub cf_cache_purge_token: Option<String>,
    pub cf_api_url: String,

    pub github_api_url: String,
    pub git_repo_private: String,
    pub git_repo_public: String,

    pub signing_private_key: Option<String>,

    pub verbose: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            update_manifest_url: "https://cdn.lykos.ai/update.json".to_string(),
            update_manifest_path: "update.json".to_string(),
            cdn_root: "https://cdn.lykos.ai".to_string(),
            b2_api_id: None,
            b2_api_key: None,
            b2_api_url: "https://api.backblazeb2.com".to_string(),
            b2_bucket_name: "lykos-1".to_string(),
            b2_bucket_secure_name: "lykos-s1".to_string(),
            cf_zone_id: None,
            cf_cache_purge_token: None,
            cf_api_url: "https://api.cloudflare.com/client/v4".to_string(),
            github_api_url: "https://api.github.com".to_string(),
            git_repo_private: "https://github.com/ionite34/StabilityMatrix".to_string(),
            git_repo_public: "https://github.com/LykosAI/StabilityMatrix".to_string(),
            signing_private_key: None,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct B2Credentials<'a> {
    pub key_id: &'a str,
    pub key: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct CloudflareCredentials<'a> {
    pub zone_id: &'a str,
    pub token: &'a str,
}

impl Settings {
    /// Loads settings from the nearest `.env` file, found by walking up from the current
    /// directory, overlaid with the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a `.env` file exists but cannot be parsed, or a value is invalid.
    pub fn load() -> Result<Self> {
        let mut vars = vec![];
        if let Some(dotenv) = find_dotenv(&env::current_dir()?) {
            debug!("loading settings from {}", dotenv.display());
            vars.extend(read_dotenv(&dotenv)?);
        }
        // Later entries win, so the process environment goes last.
        vars.extend(env::vars());
        Ok(Self::from_vars(vars)?)
    }

    /// Builds settings from a set of variables. Names are matched case-insensitively and only
    /// `SM_`-prefixed names are considered. When a name appears more than once, in any casing, the
    /// last value wins.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] for a value which cannot be parsed.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, SettingsError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut vars = vars
            .into_iter()
            .filter_map(|(k, v)| {
                let k = k.as_ref().to_uppercase();
                k.strip_prefix(PREFIX)
                    .map(|name| (name.to_string(), v.into()))
            })
            .collect::<HashMap<String, String>>();

        let mut s = Settings::default();
        let mut string = |name: &str, target: &mut String| {
            if let Some(v) = vars.remove(name) {
                *target = v;
            }
        };
        string("UPDATE_MANIFEST_URL", &mut s.update_manifest_url);
        string("UPDATE_MANIFEST_PATH", &mut s.update_manifest_path);
        string("CDN_ROOT", &mut s.cdn_root);
        string("B2_API_URL", &mut s.b2_api_url);
        string("B2_BUCKET_NAME", &mut s.b2_bucket_name);
        string("B2_BUCKET_SECURE_NAME", &mut s.b2_bucket_secure_name);
        string("CF_API_URL", &mut s.cf_api_url);
        string("GITHUB_API_URL", &mut s.github_api_url);
        string("GIT_REPO_PRIVATE", &mut s.git_repo_private);
        string("GIT_REPO_PUBLIC", &mut s.git_repo_public);

        let mut optional = |name: &str| vars.remove(name).filter(|v| !v.is_empty());
        s.b2_api_id = optional("B2_API_ID");
        s.b2_api_key = optional("B2_API_KEY");
        s.cf_zone_id = optional("CF_ZONE_ID");
        s.cf_cache_purge_token = optional("CF_CACHE_PURGE_TOKEN");
        s.signing_private_key = optional("SIGNING_PRIVATE_KEY");

        if let Some(v) = optional("VERBOSE") {
            s.verbose = parse_bool("SM_VERBOSE", &v)?;
        }

        Ok(s)
    }

    /// The CDN root for the secure bucket: `lykos-s1` is served from `{cdn_root}/s1`.
    #[must_use]
    pub fn cdn_root_secure(&self) -> String {
        let name = self.b2_bucket_secure_name.as_str();
        let sub = name.strip_prefix("lykos-").unwrap_or(name);
        uris::join(&[self.cdn_root.as_str(), sub])
    }

    /// The CDN URL for an object in the bucket named `bucket`.
    #[must_use]
    pub fn cdn_url_for(&self, bucket: &str, path: &str) -> String {
        if bucket == self.b2_bucket_secure_name {
            uris::join(&[self.cdn_root_secure().as_str(), path])
        } else {
            uris::join(&[self.cdn_root.as_str(), path])
        }
    }

    /// # Errors
    ///
    /// Returns [`SettingsError::Missing`] if either B2 value is not set.
    pub fn b2_credentials(&self) -> Result<B2Credentials<'_>, SettingsError> {
        Ok(B2Credentials {
            key_id: required(self.b2_api_id.as_deref(), "SM_B2_API_ID")?,
            key: required(self.b2_api_key.as_deref(), "SM_B2_API_KEY")?,
        })
    }

    /// # Errors
    ///
    /// Returns [`SettingsError::Missing`] if either Cloudflare value is not set.
    pub fn cloudflare_credentials(&self) -> Result<CloudflareCredentials<'_>, SettingsError> {
        Ok(CloudflareCredentials {
            zone_id: required(self.cf_zone_id.as_deref(), "SM_CF_ZONE_ID")?,
            token: required(
                self.cf_cache_purge_token.as_deref(),
                "SM_CF_CACHE_PURGE_TOKEN",
            )?,
        })
    }
}

fn required<'a>(value: Option<&'a str>, var: &str) -> Result<&'a str, SettingsError> {
    value.ok_or_else(|| SettingsError::Missing {
        var: var.to_string(),
    })
}

/// Parses a boolean setting. `1`, `true`, `yes`, and `on` are true, and `0`, `false`, `no`, and
/// `off` are false, in any case.
///
/// # Errors
///
/// Returns [`SettingsError::Invalid`] for anything else.
pub fn parse_bool(var: &str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::Invalid {
            var: var.to_string(),
            value: value.to_string(),
            reason: "expected a boolean like true or false".to_string(),
        }),
    }
}

/// Looks for a `.env` file in `start` and each of its ancestors.
#[must_use]
pub fn find_dotenv(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())
}

fn read_dotenv(path: &Path) -> Result<Vec<(String, String)>> {
    dotenvy::from_path_iter(path)
        .with_context(|| format!("could not open {}", path.display()))?
        .map(|item| item.with_context(|| format!("could not parse {}", path.display())))
        .collect()
}

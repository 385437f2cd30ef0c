//! Release tooling for [Stability Matrix](https://github.com/LykosAI/StabilityMatrix).
//!
//! This crate hashes and signs release artifacts, uploads them to Backblaze B2, purges the
//! Cloudflare cache in front of the bucket, maintains the signed `update.json` manifest that the
//! app's updater reads, and talks to GitHub for releases and merge pull requests.
//!
//! This project also ships a CLI tool named `sm-tools`, which is how these operations are normally
//! run. The library exists so that the same code can be driven from tests or other tooling.
//!
//! The main entry point for programmatic use is the [`PublisherBuilder`] struct. Here is an
//! example of its usage:
//!
//! ```ignore
//! use stability_matrix_tools::{signing, PublisherBuilder, Settings, UpdateChannel};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let publisher = PublisherBuilder::new()
//!         .settings(&settings)
//!         .version("2.9.0")
//!         .channel(UpdateChannel::Stable)
//!         .artifact_dir("dist")
//!         .changelog_file("CHANGELOG.md")
//!         .signing_key(signing::generate())
//!         .build()?;
//!
//!     let report = publisher.publish().await?;
//!     println!("{}", report.manifest_diff);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! Settings come from `SM_`-prefixed environment variables, with a `.env` file in the current
//! directory or any parent filling in whatever the environment does not set. See [`Settings`] for
//! the full list. Secrets that should not live in a `.env` file, such as the GitHub token and the
//! signing key, are kept in the OS keyring under the `sm-tools` service.
//!
//! ## The Update Manifest
//!
//! The manifest maps each update channel to one entry per platform. Every entry carries the
//! BLAKE3 hash of its artifact and an Ed25519 signature over the entry's fields, which the app
//! checks against a public key it ships with. See [`UpdateInfo::signed_data`] for exactly what is
//! signed.
//!
//! ## Features
//!
//! This crate offers several features to control the TLS dependency used by `reqwest`:
//!
#![doc = document_features::document_features!()]

pub mod artifacts;
pub mod b2;
mod builder;
pub mod changelog;
pub mod cloudflare;
pub mod config;
pub mod github;
pub mod hashing;
mod http;
pub mod keyring_config;
pub mod manifest;
pub mod progress;
mod publisher;
pub mod secrets;
pub mod signing;
pub mod updates;
pub mod uris;

pub use crate::{
    builder::{parse_version, PublisherBuilder},
    config::{Settings, SettingsError},
    http::reqwest_client,
    manifest::{Platform, UpdateChannel, UpdateInfo, UpdateManifest, UpdateType},
    publisher::{PlannedUpload, PublishPlan, PublishReport, PublishedArtifact, Publisher},
};

// The version of the `stability-matrix-tools` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(feature = "logging")]
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};

/// This function initializes logging for the application. It's public for the sake of the
/// `sm-tools` binary, but it lives in the library crate so that test code can also enable logging.
///
/// # Errors
///
/// This can return a `log::SetLoggerError` error.
#[cfg(feature = "logging")]
pub fn init_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    let line_colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::BrightBlack)
        .debug(Color::BrightBlack)
        .trace(Color::BrightBlack);
    let level_colors = line_colors.info(Color::Green).debug(Color::Black);

    Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{color_line}[{target}][{level}{color_line}] {message}\x1B[0m",
                color_line = format_args!(
                    "\x1B[{}m",
                    line_colors.get_color(&record.level()).to_fg_str()
                ),
                target = record.target(),
                level = level_colors.color(record.level()),
                message = message,
            ));
        })
        .level(level)
        // These are very noisy.
        .level_for("hyper", log::LevelFilter::Error)
        .level_for("hyper_util", log::LevelFilter::Error)
        .level_for("reqwest", log::LevelFilter::Error)
        .chain(std::io::stderr())
        .apply()
}

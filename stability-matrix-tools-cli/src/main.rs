use anyhow::{anyhow, Context, Error, Result};
use arboard::Clipboard;
use clap::{builder::PossibleValuesParser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use log::{debug, error, warn};
use stability_matrix_tools::{
    b2::B2Client,
    changelog,
    cloudflare::Cloudflare,
    config::parse_bool,
    github::{GitHub, RepoRef},
    hashing,
    keyring_config::{ConfigKey, KeyringConfig, KeyringConfigError},
    parse_version, reqwest_client,
    secrets::{KeyringStore, SecretStore},
    signing::{self, SigningError},
    updates::{self, NewEntry},
    Platform, PublisherBuilder, Settings, SettingsError, UpdateChannel, UpdateManifest,
    UpdateType,
};
use std::{env, fs, path::PathBuf, str::FromStr};
use strum::VariantNames;
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("{0:}")]
    InvalidArgs(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cmd = cmd();
    let matches = cmd.get_matches();
    let res = init_logger_from_matches(&matches);
    if let Err(e) = res {
        eprintln!("Error creating logger: {e}");
        std::process::exit(126);
    }

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            print_err(&e, matches.get_flag("debug") || verbose_env());
            std::process::exit(127);
        }
    };
    let full_chain = matches.get_flag("debug") || settings.verbose;

    let status = match run(&matches, &settings).await {
        Ok(()) => 0,
        Err(e) => {
            print_err(&e, full_chain);
            exit_code(&e)
        }
    };
    std::process::exit(status);
}

const MAX_TERM_WIDTH: usize = 100;

fn cmd() -> Command {
    Command::new("sm-tools")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Lykos AI <support@lykos.ai>")
        .about("Release tooling for Stability Matrix")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(config_cmd())
        .subcommand(keys_cmd())
        .subcommand(git_cmd())
        .subcommand(b2_cmd())
        .subcommand(cf_cmd())
        .subcommand(
            Command::new("hash")
                .about("Prints the BLAKE3 hash of a file.")
                .arg(file_arg("file", "The file to hash.")),
        )
        .subcommand(
            Command::new("sign")
                .about("Prints the BLAKE3 hash of a file and the signature of that hash.")
                .arg(file_arg("file", "The file to sign.")),
        )
        .subcommand(
            Command::new("changelog")
                .about("Reads release notes from a changelog.")
                .subcommand_required(true)
                .subcommand(
                    Command::new("latest")
                        .about("Prints the latest `## vX.Y.Z` section of a changelog.")
                        .arg(file_arg("path", "The markdown changelog to read.")),
                ),
        )
        .subcommand(updates_cmd())
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output."),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debugging output."),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppresses most output."),
        )
        .group(ArgGroup::new("log-level").args(["verbose", "debug", "quiet"]))
        .max_term_width(MAX_TERM_WIDTH)
}

fn file_arg(id: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .help(help)
}

fn yes_arg(help: &'static str) -> Arg {
    Arg::new("yes")
        .long("yes")
        .short('y')
        .action(ArgAction::SetTrue)
        .help(help)
}

fn bucket_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("bucket")
            .long("bucket")
            .help("The B2 bucket to use. Defaults to the SM_B2_BUCKET_NAME setting."),
    )
    .arg(
        Arg::new("secure")
            .long("secure")
            .action(ArgAction::SetTrue)
            .conflicts_with("bucket")
            .help("Use the secure bucket, SM_B2_BUCKET_SECURE_NAME."),
    )
}

fn config_cmd() -> Command {
    let key_arg = || {
        Arg::new("key")
            .required(true)
            .value_parser(PossibleValuesParser::new(ConfigKey::VARIANTS))
            .help("The config key.")
    };
    Command::new("config")
        .about("Manages config values stored in the system keyring.")
        .subcommand_required(true)
        .subcommand(
            Command::new("set")
                .about("Saves a config value. Omit the value to clear the key.")
                .arg(key_arg())
                .arg(Arg::new("value").help("The value to save.")),
        )
        .subcommand(
            Command::new("set-cp")
                .about("Saves the contents of the clipboard as a config value.")
                .arg(key_arg()),
        )
        .subcommand(Command::new("show").about("Shows which config keys are set."))
}

fn keys_cmd() -> Command {
    Command::new("keys")
        .about("Manages the update signing key.")
        .subcommand_required(true)
        .subcommand(
            Command::new("new-private")
                .about("Generates a new private key. Fails if one already exists."),
        )
        .subcommand(
            Command::new("set-private").about("Saves a PEM private key from the clipboard."),
        )
        .subcommand(
            Command::new("get-private").about("Copies the PEM private key to the clipboard."),
        )
        .subcommand(
            Command::new("get-public")
                .about("Prints the base64 public key and copies it to the clipboard."),
        )
}

fn git_cmd() -> Command {
    Command::new("git")
        .about("GitHub operations on the Stability Matrix repos.")
        .subcommand_required(true)
        .subcommand(Command::new("auth").about("Checks the GitHub token and prints the user."))
        .subcommand(
            Command::new("private-main-to-dev")
                .about("Opens a pull request merging main into dev in the private repo."),
        )
        .subcommand(
            Command::new("private-dev-to-main")
                .about("Opens a pull request merging dev into main in the private repo."),
        )
}

fn b2_cmd() -> Command {
    Command::new("b2")
        .about("Uploads to and deletes from Backblaze B2.")
        .subcommand_required(true)
        .subcommand(bucket_args(
            Command::new("upload")
                .about("Uploads a file, purges its CDN URL, and prints the URL.")
                .arg(file_arg("file", "The local file to upload."))
                .arg(
                    Arg::new("b2-path")
                        .required(true)
                        .help("The path in the bucket, like `sm/v2.9.0/file.zip`."),
                ),
        ))
        .subcommand(bucket_args(
            Command::new("delete")
                .about("Deletes a file and purges its CDN URL.")
                .arg(
                    Arg::new("b2-path")
                        .required(true)
                        .help("The path in the bucket."),
                )
                .arg(yes_arg(
                    "Actually delete the file. Without this the file is only looked up.",
                )),
        ))
}

fn cf_cmd() -> Command {
    Command::new("cf")
        .about("Cloudflare CDN operations.")
        .subcommand_required(true)
        .subcommand(
            Command::new("purge").about("Purges URLs from the CDN cache.").arg(
                Arg::new("urls")
                    .required(true)
                    .num_args(1..)
                    .help("The URLs to purge."),
            ),
        )
}

fn updates_cmd() -> Command {
    let version_arg = Arg::new("version")
        .long("version")
        .required(true)
        .help("The version being released, like 2.9.0.");
    let channel_arg = Arg::new("channel")
        .long("channel")
        .required(true)
        .value_parser(PossibleValuesParser::new(UpdateChannel::VARIANTS))
        .help("The update channel.");
    let type_arg = Arg::new("type")
        .long("type")
        .default_value("normal")
        .help("The update type flags, like `normal` or `critical,mandatory`.");
    let changelog_file_arg = Arg::new("changelog-file")
        .long("changelog-file")
        .value_parser(clap::value_parser!(PathBuf))
        .help("A markdown changelog with a `## vX.Y.Z` section for this version.");

    Command::new("updates")
        .about("Reads and publishes the update manifest.")
        .subcommand_required(true)
        .subcommand(Command::new("check").about("Fetches and prints the published manifest."))
        .subcommand(
            Command::new("verify")
                .about("Checks the signature of every manifest entry.")
                .arg(
                    Arg::new("manifest")
                        .long("manifest")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("A local manifest to check instead of the published one."),
                )
                .arg(Arg::new("public-key").long("public-key").help(concat!(
                    "The base64 public key to check against. By default the public half of the",
                    " configured private key is used.",
                ))),
        )
        .subcommand(
            Command::new("add")
                .about("Signs a single artifact and sets it as a platform's manifest entry.")
                .arg(
                    Arg::new("platform")
                        .required(true)
                        .value_parser(PossibleValuesParser::new(Platform::VARIANTS))
                        .help("The platform of the artifact."),
                )
                .arg(file_arg("file", "The artifact to hash and sign."))
                .arg(version_arg.clone())
                .arg(channel_arg.clone())
                .arg(type_arg.clone())
                .arg(
                    Arg::new("url")
                        .long("url")
                        .required(true)
                        .help("The download URL of the artifact."),
                )
                .arg(
                    Arg::new("changelog")
                        .long("changelog")
                        .conflicts_with("changelog-file")
                        .help(concat!(
                            "The changelog value for the entry. Defaults to the GitHub release",
                            " page for the version.",
                        )),
                )
                .arg(changelog_file_arg.clone())
                .arg(yes_arg(
                    "Upload the new manifest. Without this only the diff is shown.",
                )),
        )
        .subcommand(bucket_args(
            Command::new("publish")
                .about(concat!(
                    "Uploads all artifacts for a release, updates the manifest, purges the CDN,",
                    " and creates the GitHub release.",
                ))
                .arg(version_arg)
                .arg(channel_arg)
                .arg(type_arg)
                .arg(
                    Arg::new("dir")
                        .long("dir")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("The directory holding the build artifacts."),
                )
                .arg(changelog_file_arg)
                .arg(
                    Arg::new("no-github-release")
                        .long("no-github-release")
                        .action(ArgAction::SetTrue)
                        .help("Do not create or update the GitHub release."),
                )
                .arg(yes_arg(
                    "Actually publish. Without this nothing remote is changed.",
                )),
        ))
}

pub(crate) fn init_logger_from_matches(matches: &ArgMatches) -> Result<(), log::SetLoggerError> {
    let level = if matches.get_flag("debug") {
        log::LevelFilter::Debug
    } else if matches.get_flag("verbose") {
        log::LevelFilter::Info
    } else if matches.get_flag("quiet") {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Warn
    };

    stability_matrix_tools::init_logger(level)
}

async fn run(matches: &ArgMatches, settings: &Settings) -> Result<()> {
    let store = KeyringStore::default();
    match matches.subcommand() {
        Some(("config", m)) => config(m, &store),
        Some(("keys", m)) => keys(m, settings, &store),
        Some(("git", m)) => git(m, settings, &store).await,
        Some(("b2", m)) => b2(m, settings).await,
        Some(("cf", m)) => cf(m, settings).await,
        Some(("hash", m)) => {
            println!("{}", hashing::blake3_file_with_progress(path_arg(m, "file")?)?);
            Ok(())
        }
        Some(("sign", m)) => sign(m, settings, &store),
        Some(("changelog", m)) => changelog_latest(m),
        Some(("updates", m)) => updates(m, settings, &store).await,
        Some((other, _)) => Err(unknown_command(other)),
        None => Err(unknown_command("")),
    }
}

fn config(matches: &ArgMatches, store: &dyn SecretStore) -> Result<()> {
    let mut config = KeyringConfig::load(store)?;
    match matches.subcommand() {
        Some(("set", m)) => {
            let key = config_key(m)?;
            if let Some(value) = m.get_one::<String>("value") {
                config.set(key, value.as_str());
                config.save(store)?;
                println!("Saved key '{key}'");
            } else {
                config.clear(key);
                config.save(store)?;
                println!("Cleared key '{key}'");
            }
        }
        Some(("set-cp", m)) => {
            let key = config_key(m)?;
            let value = clipboard_text()?;
            config.set(key, value.as_str());
            config.save(store)?;
            println!(
                "Saved key '{key}' from clipboard ({} chars)",
                value.chars().count()
            );
        }
        Some(("show", _)) => println!("{}", config.to_keys_json()),
        Some((other, _)) => return Err(unknown_command(other)),
        None => return Err(unknown_command("config")),
    }
    Ok(())
}

fn keys(matches: &ArgMatches, settings: &Settings, store: &dyn SecretStore) -> Result<()> {
    match matches.subcommand() {
        Some(("new-private", _)) => {
            if signing::load_private_key(None, store)?.is_some() {
                return Err(SigningError::PrivateKeyExists.into());
            }
            let key = signing::generate();
            signing::save_private_key(&key, store)?;
            println!("Created a new private key");
            println!(
                "Public key: {}",
                signing::public_key_base64(&key.verifying_key())
            );
        }
        Some(("set-private", _)) => {
            let key = signing::from_pem(&clipboard_text()?)
                .context("the clipboard does not hold an OpenSSH or PEM private key")?;
            signing::save_private_key(&key, store)?;
            println!("Saved the private key from the clipboard");
        }
        Some(("get-private", _)) => {
            let key = signing::require_private_key(settings.signing_private_key.as_deref(), store)?;
            set_clipboard(signing::to_openssh(&key)?)?;
            println!("Copied the private key to the clipboard");
        }
        Some(("get-public", _)) => {
            let key = signing::require_private_key(settings.signing_private_key.as_deref(), store)?;
            let public = signing::public_key_base64(&key.verifying_key());
            println!("{public}");
            if let Err(e) = set_clipboard(public) {
                warn!("could not copy the public key to the clipboard: {e}");
            }
        }
        Some((other, _)) => return Err(unknown_command(other)),
        None => return Err(unknown_command("keys")),
    }
    Ok(())
}

async fn git(matches: &ArgMatches, settings: &Settings, store: &dyn SecretStore) -> Result<()> {
    let client = reqwest_client()?;
    let github = GitHub::new(
        &client,
        &settings.github_api_url,
        Some(github_token(store)?),
    )?;
    let (from, to) = match matches.subcommand() {
        Some(("auth", _)) => {
            let login = github.current_user().await?;
            println!("Authenticated with GitHub as: {login}");
            return Ok(());
        }
        Some(("private-main-to-dev", _)) => ("main", "dev"),
        Some(("private-dev-to-main", _)) => ("dev", "main"),
        Some((other, _)) => return Err(unknown_command(other)),
        None => return Err(unknown_command("git")),
    };

    let repo = RepoRef::parse(&settings.git_repo_private)?;
    let pr = github.open_merge_pr(&repo, from, to).await?;
    println!("Created pull request #{}: {}", pr.number, pr.html_url);
    Ok(())
}

async fn b2(matches: &ArgMatches, settings: &Settings) -> Result<()> {
    let client = reqwest_client()?;
    let Some((name, m)) = matches.subcommand() else {
        return Err(unknown_command("b2"));
    };
    let bucket_name = bucket_name(m, settings);
    let b2_path = m
        .get_one::<String>("b2-path")
        .ok_or_else(|| CliError::InvalidArgs("You must pass a B2 path.".to_string()))?;
    let url = settings.cdn_url_for(bucket_name, b2_path);

    let b2 = B2Client::authorize(&client, &settings.b2_api_url, settings.b2_credentials()?).await?;
    let bucket = b2.bucket(bucket_name).await?;
    match name {
        "upload" => {
            b2.upload(&bucket, path_arg(m, "file")?, b2_path).await?;
            purge(&client, settings, &url).await?;
            println!("Uploaded at: {url}");
        }
        "delete" => {
            let file = b2
                .find_file(&bucket, b2_path)
                .await?
                .ok_or_else(|| anyhow!("File not found in B2 bucket: {b2_path}"))?;
            if !m.get_flag("yes") {
                println!(
                    "Would delete {} ({} bytes, id {}). Pass --yes to delete it.",
                    file.file_name, file.content_length, file.file_id
                );
                return Ok(());
            }
            b2.delete(&file).await?;
            purge(&client, settings, &url).await?;
            println!("Deleted");
        }
        other => return Err(unknown_command(other)),
    }
    Ok(())
}

async fn cf(matches: &ArgMatches, settings: &Settings) -> Result<()> {
    let Some(("purge", m)) = matches.subcommand() else {
        return Err(unknown_command("cf"));
    };
    let urls = m
        .get_many::<String>("urls")
        .map(|urls| urls.cloned().collect::<Vec<_>>())
        .unwrap_or_default();
    let client = reqwest_client()?;
    let cf = Cloudflare::new(
        &client,
        &settings.cf_api_url,
        settings.cloudflare_credentials()?,
    );
    if let Some(resp) = cf.purge(&urls).await? {
        println!("{}", resp.status);
        println!("{}", serde_json::to_string_pretty(&resp.body)?);
    }
    Ok(())
}

async fn purge(client: &reqwest::Client, settings: &Settings, url: &str) -> Result<()> {
    Cloudflare::new(
        client,
        &settings.cf_api_url,
        settings.cloudflare_credentials()?,
    )
    .purge(&[url])
    .await?;
    Ok(())
}

fn sign(matches: &ArgMatches, settings: &Settings, store: &dyn SecretStore) -> Result<()> {
    let key = signing::require_private_key(settings.signing_private_key.as_deref(), store)?;
    let hash = hashing::blake3_file_with_progress(path_arg(matches, "file")?)?;
    println!("BLAKE3: {hash}");
    println!("Signature: {}", signing::sign(&key, hash.as_bytes()));
    Ok(())
}

fn changelog_latest(matches: &ArgMatches) -> Result<()> {
    let Some(("latest", m)) = matches.subcommand() else {
        return Err(unknown_command("changelog"));
    };
    let path = path_arg(m, "path")?;
    let entry = changelog::read_latest(path)?
        .ok_or_else(|| anyhow!("{} has no `## vX.Y.Z` sections", path.display()))?;
    println!("v{}", entry.version);
    println!();
    println!("{}", entry.body);
    Ok(())
}

async fn updates(matches: &ArgMatches, settings: &Settings, store: &dyn SecretStore) -> Result<()> {
    let client = reqwest_client()?;
    match matches.subcommand() {
        Some(("check", _)) => {
            let manifest = updates::fetch_manifest(&client, &settings.update_manifest_url).await?;
            println!("{}", manifest.to_pretty_json()?);
            Ok(())
        }
        Some(("verify", m)) => verify(m, &client, settings, store).await,
        Some(("add", m)) => add(m, &client, settings, store).await,
        Some(("publish", m)) => publish(m, settings, store).await,
        Some((other, _)) => Err(unknown_command(other)),
        None => Err(unknown_command("updates")),
    }
}

async fn verify(
    matches: &ArgMatches,
    client: &reqwest::Client,
    settings: &Settings,
    store: &dyn SecretStore,
) -> Result<()> {
    let manifest = match matches.get_one::<PathBuf>("manifest") {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("could not read {}", path.display()))?;
            UpdateManifest::parse(&text)?
        }
        None => updates::fetch_manifest(client, &settings.update_manifest_url).await?,
    };
    let key = match matches.get_one::<String>("public-key") {
        Some(b64) => signing::public_key_from_base64(b64)?,
        None => signing::require_private_key(settings.signing_private_key.as_deref(), store)?
            .verifying_key(),
    };

    let checks = updates::verify_manifest(&manifest, &key);
    if checks.is_empty() {
        println!("The manifest has no entries");
        return Ok(());
    }
    for check in &checks {
        let mark = if check.is_valid() { "✔" } else { "✘" };
        println!(
            "[{mark}] {} {} v{}",
            check.channel, check.platform, check.version
        );
    }
    let bad = checks.iter().filter(|c| !c.is_valid()).count();
    if bad > 0 {
        return Err(anyhow!(
            "{bad} of {} manifest entries have a bad signature",
            checks.len()
        ));
    }
    Ok(())
}

async fn add(
    matches: &ArgMatches,
    client: &reqwest::Client,
    settings: &Settings,
    store: &dyn SecretStore,
) -> Result<()> {
    let platform = Platform::from_str(required_arg(matches, "platform")?)?;
    let version = parse_version(required_arg(matches, "version")?)?;
    let channel = UpdateChannel::from_str(required_arg(matches, "channel")?)?;
    let update_type = UpdateType::parse(required_arg(matches, "type")?)?;
    let changelog = if let Some(text) = matches.get_one::<String>("changelog") {
        text.clone()
    } else if let Some(path) = matches.get_one::<PathBuf>("changelog-file") {
        let text = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        changelog::entry_for(&text, &version)
            .ok_or_else(|| anyhow!("{} has no `## v{version}` section", path.display()))?
    } else {
        let public_repo = RepoRef::parse(&settings.git_repo_public)?;
        format!("https://github.com/{public_repo}/releases/tag/v{version}")
    };

    let key = signing::require_private_key(settings.signing_private_key.as_deref(), store)?;
    let info = updates::build_entry(
        path_arg(matches, "file")?,
        NewEntry {
            version,
            channel,
            update_type,
            url: required_arg(matches, "url")?.to_string(),
            changelog,
            release_date: None,
        },
        &key,
    )?;

    let mut manifest = updates::fetch_manifest(client, &settings.update_manifest_url).await?;
    let applied = updates::apply_entry(&mut manifest, platform, info)?;
    if !applied.changed() {
        println!("The manifest is unchanged");
        return Ok(());
    }
    println!("{}", applied.diff());

    if !matches.get_flag("yes") {
        println!("Dry run. Pass --yes to upload the new manifest.");
        return Ok(());
    }

    let b2 = B2Client::authorize(client, &settings.b2_api_url, settings.b2_credentials()?).await?;
    let bucket = b2.bucket(&settings.b2_bucket_name).await?;
    b2.upload_bytes(
        &bucket,
        applied.new_json.into_bytes(),
        &settings.update_manifest_path,
        "application/json",
    )
    .await?;
    purge(client, settings, &settings.update_manifest_url).await?;
    println!("Updated {}", settings.update_manifest_url);
    Ok(())
}

async fn publish(matches: &ArgMatches, settings: &Settings, store: &dyn SecretStore) -> Result<()> {
    let key = signing::require_private_key(settings.signing_private_key.as_deref(), store)?;
    let token = KeyringConfig::load(store)?
        .get(ConfigKey::GithubToken)
        .map(String::from);
    let dir = matches
        .get_one::<PathBuf>("dir")
        .ok_or_else(|| CliError::InvalidArgs("You must pass a --dir.".to_string()))?;

    let mut builder = PublisherBuilder::new()
        .settings(settings)
        .version(required_arg(matches, "version")?)
        .channel(UpdateChannel::from_str(required_arg(matches, "channel")?)?)
        .update_type(UpdateType::parse(required_arg(matches, "type")?)?)
        .artifact_dir(dir)
        .signing_key(key)
        .dry_run(!matches.get_flag("yes"));
    if let Some(path) = matches.get_one::<PathBuf>("changelog-file") {
        builder = builder.changelog_file(path);
    }
    if matches.contains_id("bucket") || matches.get_flag("secure") {
        builder = builder.bucket(bucket_name(matches, settings));
    }
    if let Some(t) = &token {
        builder = builder.github_token(t);
    }
    if matches.get_flag("no-github-release") {
        builder = builder.no_github_release();
    }

    let publisher = builder.build()?;
    let report = publisher.publish().await?;
    for artifact in &report.artifacts {
        println!(
            "{}: {} ({})",
            artifact.platform, artifact.url, artifact.hash_blake3
        );
    }
    if report.manifest_diff.is_empty() {
        println!("The manifest is unchanged");
    } else {
        println!("{}", report.manifest_diff);
    }
    if report.dry_run {
        println!("Dry run. Pass --yes to publish.");
    } else {
        println!("Published v{}", publisher.version());
        if let Some(url) = &report.release_url {
            println!("Release: {url}");
        }
    }
    Ok(())
}

fn bucket_name<'a>(matches: &'a ArgMatches, settings: &'a Settings) -> &'a str {
    if let Some(b) = matches.get_one::<String>("bucket") {
        b
    } else if matches.get_flag("secure") {
        &settings.b2_bucket_secure_name
    } else {
        &settings.b2_bucket_name
    }
}

fn config_key(matches: &ArgMatches) -> Result<ConfigKey> {
    Ok(ConfigKey::from_str(required_arg(matches, "key")?)?)
}

fn github_token(store: &dyn SecretStore) -> Result<String> {
    if let Some(token) = KeyringConfig::load(store)?.get(ConfigKey::GithubToken) {
        return Ok(token.to_string());
    }
    match env::var("GITHUB_TOKEN") {
        Ok(token) if !token.is_empty() => {
            debug!("using the GitHub token from the GITHUB_TOKEN env var");
            Ok(token)
        }
        Ok(_) | Err(_) => Err(KeyringConfigError::MissingKey(ConfigKey::GithubToken).into()),
    }
}

fn required_arg<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| CliError::InvalidArgs(format!("You must pass a value for {id}.")).into())
}

fn path_arg<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a PathBuf> {
    matches
        .get_one::<PathBuf>(id)
        .ok_or_else(|| CliError::InvalidArgs(format!("You must pass a value for {id}.")).into())
}

fn clipboard_text() -> Result<String> {
    let text = Clipboard::new()
        .and_then(|mut c| c.get_text())
        .context("could not read the clipboard")?;
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(anyhow!("The clipboard is empty"));
    }
    Ok(text)
}

fn set_clipboard(text: String) -> Result<()> {
    Clipboard::new()
        .and_then(|mut c| c.set_text(text))
        .context("could not write to the clipboard")
}

fn unknown_command(name: &str) -> Error {
    CliError::InvalidArgs(format!("Unknown command: {name}")).into()
}

// Only used when the settings could not be loaded, so this reads the process environment alone.
fn verbose_env() -> bool {
    is_verbose(env::var("SM_VERBOSE").ok().as_deref())
}

fn is_verbose(value: Option<&str>) -> bool {
    value.is_some_and(|v| parse_bool("SM_VERBOSE", v).unwrap_or(false))
}

// Bad arguments and missing configuration exit with 127, like argument errors do.
fn exit_code(e: &Error) -> i32 {
    let is_config_error = e.chain().any(|cause| {
        cause.is::<CliError>()
            || cause.is::<SettingsError>()
            || cause.is::<KeyringConfigError>()
            || cause
                .downcast_ref::<SigningError>()
                .is_some_and(|se| match se {
                    SigningError::NoPrivateKey => true,
                    SigningError::PrivateKeyExists | SigningError::BadSignature => false,
                })
    });
    if is_config_error {
        127
    } else {
        1
    }
}

fn print_err(e: &Error, full_chain: bool) {
    if full_chain {
        error!("{e:?}");
    } else {
        error!("{e}");
    }
    if let Some(ce) = e.downcast_ref::<CliError>() {
        match ce {
            CliError::InvalidArgs(_) => {
                println!();
                if let Err(e) = cmd().print_help() {
                    eprintln!("could not print help: {e}");
                }
            }
        }
    }
}

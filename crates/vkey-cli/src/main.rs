//! vkey: vault key management CLI
//!
//! Vault commands:
//!   create <name>              - new vault, recovery kit written to a file
//!   unlock <vault>             - routine unlock on an authorized device
//!   recover <vault>            - authorize this device with the recovery key
//!   lock [<vault>] [--all]     - drop instant-unlock entries
//!   forget <vault> | --all     - remove this device's authorization
//!   status                     - authorized vaults and backends
//!   artifact <vault>           - inspect the remote recovery artifact
//!
//! Content commands:
//!   encrypt <vault> <in> <out> - seal a file under the vault key
//!   decrypt <vault> <in> <out> - open a sealed file
//!
//!   config show                - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use vkey_core::config::{expand_tilde, VaultConfig};
use vkey_core::{Session, VaultId};
use vkey_crypto::{decrypt_object, encrypt_object, secret_from_kit, RecoveryKit};
use vkey_lifecycle::{UnlockSource, VaultController};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "vkey",
    version,
    about = "Vault key management",
    long_about = "vkey: create vaults, authorize devices with a recovery key, and encrypt content"
)]
struct Cli {
    /// Path to vkey.toml configuration file
    #[arg(long, short = 'c', env = "VKEY_CONFIG", default_value = "~/.config/vkey/vkey.toml")]
    config: PathBuf,

    /// Log level filter (overrides config)
    #[arg(long, env = "VKEY_LOG")]
    log: Option<String>,

    /// Log format (overrides config)
    #[arg(long, env = "VKEY_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Account the remote store belongs to
    #[arg(long, env = "VKEY_USER", default_value = "local")]
    user: String,

    /// Bearer token for the remote store (needed by create, recover, artifact)
    #[arg(long, env = "VKEY_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a vault and write its recovery kit
    Create {
        /// Human-readable vault name
        name: String,
        /// Where to write the recovery kit (default: ./vkey-recovery-<name>.txt)
        #[arg(long)]
        kit_out: Option<PathBuf>,
    },

    /// Unlock a vault with this device's key
    Unlock {
        vault: VaultId,
    },

    /// Authorize this device for a vault using its recovery key
    ///
    /// Prompts for the key unless --secret-file is given.
    Recover {
        vault: VaultId,
        /// Read the recovery key from this file (a `vkey create` kit or the bare key)
        #[arg(long)]
        secret_file: Option<PathBuf>,
    },

    /// Drop instant-unlock entries so the next unlock uses the device key
    Lock {
        vault: Option<VaultId>,
        #[arg(long, conflicts_with = "vault")]
        all: bool,
    },

    /// Remove this device's authorization (recovery needed afterwards)
    Forget {
        vault: Option<VaultId>,
        /// Remove every device record (sign-out)
        #[arg(long, conflicts_with = "vault")]
        all: bool,
    },

    /// Show authorized vaults and configured backends
    Status,

    /// Show the remote recovery artifact of a vault (recovery key redacted)
    Artifact {
        vault: VaultId,
    },

    /// Encrypt a file under a vault's key
    Encrypt {
        vault: VaultId,
        input: PathBuf,
        output: PathBuf,
    },

    /// Decrypt a file sealed with `vkey encrypt`
    Decrypt {
        vault: VaultId,
        input: PathBuf,
        output: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let config = VaultConfig::load(&config_path)
        .with_context(|| format!("loading config: {}", config_path.display()))?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, &format);

    let session = build_session(&cli);

    match cli.command {
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &config_path),
        command => {
            let controller = VaultController::from_config(&config, None)
                .context("opening vault controller")?;
            tracing::debug!(?controller, "controller ready");
            run(command, &controller, &config, &session).await
        }
    }
}

async fn run(
    command: Commands,
    controller: &VaultController,
    config: &VaultConfig,
    session: &Session,
) -> Result<()> {
    match command {
        Commands::Create { name, kit_out } => {
            cmd_create(controller, session, &name, kit_out.as_deref()).await
        }
        Commands::Unlock { vault } => cmd_unlock(controller, &vault).await,
        Commands::Recover { vault, secret_file } => {
            cmd_recover(controller, session, &vault, secret_file.as_deref()).await
        }
        Commands::Lock { vault, all } => cmd_lock(config, vault.as_ref(), all),
        Commands::Forget { vault, all } => cmd_forget(controller, vault.as_ref(), all).await,
        Commands::Status => cmd_status(controller, config, session).await,
        Commands::Artifact { vault } => cmd_artifact(controller, session, &vault).await,
        Commands::Encrypt { vault, input, output } => {
            cmd_seal(controller, &vault, &input, &output, Direction::Encrypt).await
        }
        Commands::Decrypt { vault, input, output } => {
            cmd_seal(controller, &vault, &input, &output, Direction::Decrypt).await
        }
        Commands::Config { .. } => unreachable!("handled before the controller is opened"),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn build_session(cli: &Cli) -> Session {
    let session = Session::anonymous(cli.user.clone());
    match &cli.access_token {
        Some(token) if !token.is_empty() => {
            session.with_access_token(SecretString::from(token.clone()))
        }
        _ => session,
    }
}

// ── `vkey create` ─────────────────────────────────────────────────────────────

async fn cmd_create(
    controller: &VaultController,
    session: &Session,
    name: &str,
    kit_out: Option<&Path>,
) -> Result<()> {
    let created = controller
        .create(session, name)
        .await
        .context("creating vault")?;

    let kit_path = kit_out
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(created.recovery_kit.file_name()));
    write_kit(&kit_path, &created.recovery_kit)?;

    println!("created vault {}", created.vault_id);
    println!("  name:          {name}");
    println!("  recovery kit:  {}", kit_path.display());
    println!();
    println!("Keep the recovery kit offline. It is the only way to open this vault");
    println!("on a device that has never opened it.");
    Ok(())
}

fn write_kit(path: &Path, kit: &RecoveryKit) -> Result<()> {
    let body = Zeroizing::new(kit.render());
    std::fs::write(path, body.as_bytes())
        .with_context(|| format!("writing recovery kit: {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting recovery kit: {}", path.display()))?;
    }
    Ok(())
}

// ── `vkey unlock` / `vkey recover` ───────────────────────────────────────────

async fn cmd_unlock(controller: &VaultController, vault: &VaultId) -> Result<()> {
    let source = controller
        .unlock(vault)
        .await
        .with_context(|| format!("unlocking vault {vault}"))?;
    let via = match source {
        UnlockSource::Keyring => "already unlocked",
        UnlockSource::InstantCache => "instant-unlock cache",
        UnlockSource::DeviceRecord => "device key",
        UnlockSource::SiblingTab => "another session",
    };
    println!("vault {vault} unlocked ({via})");
    Ok(())
}

async fn cmd_recover(
    controller: &VaultController,
    session: &Session,
    vault: &VaultId,
    secret_file: Option<&Path>,
) -> Result<()> {
    let secret = read_recovery_secret(secret_file)?;

    controller
        .recover(session, vault, &secret)
        .await
        .with_context(|| format!("recovering vault {vault}"))?;

    println!("this device is now authorized for vault {vault}");
    Ok(())
}

/// The recovery secret from `path` (a kit written by `vkey create`, or just
/// the key) or from an interactive prompt.
fn read_recovery_secret(path: Option<&Path>) -> Result<Zeroizing<String>> {
    let text = match path {
        Some(path) => Zeroizing::new(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading recovery key: {}", path.display()))?,
        ),
        None => Zeroizing::new(
            rpassword::prompt_password("Recovery key: ").context("reading recovery key")?,
        ),
    };
    Ok(Zeroizing::new(secret_from_kit(&text).to_string()))
}

// ── `vkey lock` / `vkey forget` ──────────────────────────────────────────────

fn cmd_lock(config: &VaultConfig, vault: Option<&VaultId>, all: bool) -> Result<()> {
    let Some(cache) = vkey_keystore::open_unlock_cache(config) else {
        println!("instant unlock is disabled; vaults are never left unlocked between runs");
        return Ok(());
    };
    match (vault, all) {
        (Some(vault), _) => {
            cache.remove(vault)?;
            println!("vault {vault} locked");
        }
        (None, true) => {
            let local = vkey_keystore::open_keystore(config)?;
            for vault in local.vault_ids()? {
                cache.remove(&vault)?;
            }
            println!("all vaults locked");
        }
        (None, false) => anyhow::bail!("specify a vault id or --all"),
    }
    Ok(())
}

async fn cmd_forget(
    controller: &VaultController,
    vault: Option<&VaultId>,
    all: bool,
) -> Result<()> {
    match (vault, all) {
        (Some(vault), _) => {
            controller.forget(vault).await?;
            println!("device authorization for vault {vault} removed");
        }
        (None, true) => {
            controller.reset().await?;
            println!("all device authorizations removed");
        }
        (None, false) => anyhow::bail!("specify a vault id or --all"),
    }
    Ok(())
}

// ── `vkey status` ─────────────────────────────────────────────────────────────

async fn cmd_status(
    controller: &VaultController,
    config: &VaultConfig,
    session: &Session,
) -> Result<()> {
    let vaults = controller.authorized_vaults()?;

    println!("vkey v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "  keystore:       {:?} ({})",
        config.keystore.backend,
        expand_tilde(&config.keystore.path).display()
    );
    println!("  remote:         {:?} {}", config.remote.backend, config.remote.root);
    let instant = if config.unlock.instant_unlock {
        "enabled"
    } else {
        "disabled"
    };
    println!("  instant unlock: {instant}");
    println!(
        "  session:        {} ({})",
        session.user_id,
        if session.is_authenticated() { "signed in" } else { "no credential" }
    );
    if session.is_authenticated() {
        let remote = match controller.remote_health(session).await {
            Ok(()) => "reachable".to_string(),
            Err(e) => format!("unreachable ({e})"),
        };
        println!("  remote store:   {remote}");
    }
    println!("  vaults:         {}", vaults.len());
    for vault in &vaults {
        println!("    {vault}  [{:?}]", controller.state(vault).await);
    }
    Ok(())
}

// ── `vkey artifact` ───────────────────────────────────────────────────────────

async fn cmd_artifact(
    controller: &VaultController,
    session: &Session,
    vault: &VaultId,
) -> Result<()> {
    let artifact = controller
        .artifact(session, vault)
        .await
        .with_context(|| format!("fetching artifact for vault {vault}"))?;

    println!("{}", vkey_crypto::artifact_name(vault));
    println!("  version:       {}", artifact.version);
    println!("  masterKeyId:   {}", artifact.master_key_id);
    println!("  createdAt:     {}", artifact.created_at);
    println!("  recoveryKey:   [REDACTED]");
    println!("  iv:            {}", artifact.iv);
    println!("  authTag:       {}", artifact.auth_tag);
    Ok(())
}

// ── `vkey encrypt` / `vkey decrypt` ──────────────────────────────────────────

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

async fn cmd_seal(
    controller: &VaultController,
    vault: &VaultId,
    input: &Path,
    output: &Path,
    direction: Direction,
) -> Result<()> {
    controller
        .unlock(vault)
        .await
        .with_context(|| format!("unlocking vault {vault}"))?;
    let key = controller.master_key(vault).await?;

    let data = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let result = match direction {
        Direction::Encrypt => encrypt_object(&key, &data)?,
        Direction::Decrypt => decrypt_object(&key, &data)
            .with_context(|| format!("{} was not sealed under vault {vault}", input.display()))?,
    };
    tokio::fs::write(output, &result)
        .await
        .with_context(|| format!("writing {}", output.display()))?;

    tracing::info!(
        vault = %vault,
        input = %input.display(),
        output = %output.display(),
        bytes = result.len(),
        "content processed"
    );
    Ok(())
}

// ── `vkey config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

//! fanout: distributed chunked file cipher driver
//!
//! Commands:
//!   keygen --out <file>            - write a fresh key || iv file
//!   encrypt <input>                - encrypt a file across the configured workers
//!   decrypt <input> --key <file>   - decrypt a file produced by `encrypt`
//!   ping                           - liveness check of every worker
//!   config show | init | remote    - inspect or write fanout.toml

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use fanout_coordinator::{Coordinator, JobSummary};
use fanout_core::config::FanoutConfig;
use fanout_core::FanoutError;
use fanout_crypto::KeyMaterial;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fanout",
    version,
    about = "Distributed chunked AES-256-CBC file cipher",
    long_about = "fanout: split a file into chunks, encrypt or decrypt them on remote workers, reassemble the result"
)]
struct Cli {
    /// Path to fanout.toml configuration file
    #[arg(long, short = 'c', env = "FANOUT_CONFIG", default_value = "fanout.toml")]
    config: PathBuf,

    /// Worker addresses, comma separated (overrides config)
    #[arg(long, short = 'w', value_delimiter = ',', global = true)]
    workers: Vec<String>,

    /// Use TLS with ca.crt from the TLS directory
    #[arg(long, global = true)]
    secure: bool,

    /// Directory holding the TLS files (overrides config)
    #[arg(long, global = true)]
    tls_dir: Option<PathBuf>,

    /// Plaintext chunk size in bytes (overrides config)
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// Concurrent chunk RPCs; 1 is sequential (overrides config)
    #[arg(long, global = true)]
    max_in_flight: Option<usize>,

    /// Shrink block-aligned chunk sizes by one block, for files written by older tools
    #[arg(long, global = true)]
    legacy_block_adjust: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FANOUT_LOG", global = true)]
    log: Option<String>,

    /// Log format (json, text)
    #[arg(long, env = "FANOUT_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a random 256-bit key and 128-bit iv
    Keygen {
        /// Destination key file
        #[arg(long, short = 'o')]
        out: PathBuf,
    },

    /// Encrypt a file
    ///
    /// Without --key a fresh key is generated and saved next to the input.
    Encrypt {
        input: PathBuf,
        /// Output path (default: <input>.encrypted)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Existing key file to use instead of generating one
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,
        /// Where to save a generated key (default: <input>.key)
        #[arg(long, conflicts_with = "key")]
        key_out: Option<PathBuf>,
    },

    /// Decrypt a file
    ///
    /// Chunk size settings must match those used to encrypt.
    Decrypt {
        input: PathBuf,
        /// Key file written by `encrypt` or `keygen`
        #[arg(long, short = 'k')]
        key: PathBuf,
        /// Output path (default: input without .encrypted, or <input>.decrypted)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Check that every worker answers
    Ping,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Store the cloud-storage token and folder
    Remote {
        #[arg(long)]
        token: Option<String>,
        #[arg(long)]
        folder: Option<String>,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = FanoutConfig::load_or_default(&cli.config)?;
    apply_overrides(&mut config, &cli);

    let format = cli.log_format.clone().unwrap_or(match config.log.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&config.log.level, &format);

    match cli.command {
        Commands::Keygen { out } => cmd_keygen(&out),
        Commands::Encrypt {
            input,
            output,
            key,
            key_out,
        } => cmd_encrypt(&config, &input, output, key, key_out).await,
        Commands::Decrypt { input, key, output } => {
            cmd_decrypt(&config, &input, &key, output).await
        }
        Commands::Ping => cmd_ping(&config).await,
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
        Commands::Config {
            action: ConfigAction::Init { force },
        } => cmd_config_init(&cli.config, force),
        Commands::Config {
            action: ConfigAction::Remote { token, folder },
        } => cmd_config_remote(&cli.config, token, folder),
    }
}

fn apply_overrides(config: &mut FanoutConfig, cli: &Cli) {
    if !cli.workers.is_empty() {
        config.coordinator.workers = cli.workers.clone();
    }
    if cli.secure {
        config.tls.enabled = true;
    }
    if let Some(dir) = &cli.tls_dir {
        config.tls.dir = dir.clone();
    }
    if let Some(size) = cli.chunk_size {
        config.coordinator.chunk_size = size;
    }
    if let Some(n) = cli.max_in_flight {
        config.coordinator.max_in_flight = n;
    }
    if cli.legacy_block_adjust {
        config.coordinator.legacy_block_adjust = true;
    }
    if let Some(level) = &cli.log {
        config.log.level = level.clone();
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

// ── Default paths ─────────────────────────────────────────────────────────────

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

fn default_encrypted_path(input: &Path) -> PathBuf {
    with_suffix(input, ".encrypted")
}

fn default_key_path(input: &Path) -> PathBuf {
    with_suffix(input, ".key")
}

fn default_decrypted_path(input: &Path) -> PathBuf {
    match input.extension() {
        Some(ext) if ext == "encrypted" => input.with_extension(""),
        _ => with_suffix(input, ".decrypted"),
    }
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_progress_bar(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")
            .context("progress bar template")?
            .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn make_spinner(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .context("spinner template")?,
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

/// Coordinator with progress wired to `pb`, after a passing health check.
async fn ready_coordinator(config: &FanoutConfig, pb: &ProgressBar) -> Result<Coordinator> {
    let progress_pb = pb.clone();
    let coordinator = Coordinator::from_config(config)
        .context("configuring coordinator")?
        .with_progress(Box::new(move |done, total| {
            progress_pb.set_length(total as u64);
            progress_pb.set_position(done as u64);
        }));

    let options = coordinator.options();
    info!(
        workers = coordinator.workers().len(),
        chunk_size = options.plaintext_chunk_size(),
        legacy_block_adjust = options.legacy_block_adjust,
        max_in_flight = options.max_in_flight,
        "coordinator ready"
    );

    pb.set_message("checking workers...");
    if !coordinator.test_connections().await {
        pb.abandon_with_message("worker check failed");
        warn!("health check failed, job not started");
        anyhow::bail!(
            "not every worker is reachable (run `fanout ping` for details); refusing to start the job"
        );
    }
    pb.set_message(String::new());
    Ok(coordinator)
}

/// Abandon the bar and attach a hint for failures caused by a worker.
fn job_failed(pb: &ProgressBar, err: FanoutError, what: &str) -> anyhow::Error {
    pb.abandon_with_message("failed");
    if err.is_chunk_failure() {
        warn!(error = %err, "a worker failed a chunk, no output was written");
        return anyhow::Error::new(err).context(format!(
            "{what} (a worker failed; run `fanout ping` to check the fleet)"
        ));
    }
    anyhow::Error::new(err).context(what.to_string())
}

fn print_summary(summary: &JobSummary, output: &Path) {
    println!(
        "  {}ed {} chunks: {} → {} bytes in {:.2}s",
        summary.mode,
        summary.chunks,
        summary.bytes_in,
        summary.bytes_out,
        summary.elapsed.as_secs_f64()
    );
    println!("  output:  {}", output.display());
}

// ── `fanout keygen` ───────────────────────────────────────────────────────────

fn cmd_keygen(out: &Path) -> Result<()> {
    let material = fanout_crypto::generate_key_iv().context("generating key material")?;
    material
        .save(out)
        .with_context(|| format!("writing key file {}", out.display()))?;
    println!("Key written to {}", out.display());
    Ok(())
}

// ── `fanout encrypt` ──────────────────────────────────────────────────────────

async fn cmd_encrypt(
    config: &FanoutConfig,
    input: &Path,
    output: Option<PathBuf>,
    key: Option<PathBuf>,
    key_out: Option<PathBuf>,
) -> Result<()> {
    let output = output.unwrap_or_else(|| default_encrypted_path(input));

    let pb = make_progress_bar("encrypt")?;
    let coordinator = ready_coordinator(config, &pb).await?;

    let material = match &key {
        Some(path) => KeyMaterial::load(path)
            .with_context(|| format!("loading key file {}", path.display()))?,
        None => {
            let path = key_out.unwrap_or_else(|| default_key_path(input));
            let material = fanout_crypto::generate_key_iv().context("generating key material")?;
            material
                .save(&path)
                .with_context(|| format!("writing key file {}", path.display()))?;
            info!(path = %path.display(), "generated key saved");
            pb.println(format!("  key:     {}", path.display()));
            material
        }
    };

    let summary = coordinator
        .encrypt_file(input, &output, &material)
        .await
        .map_err(|e| job_failed(&pb, e, &format!("encrypting {}", input.display())))?;
    pb.finish_with_message("done");
    print_summary(&summary, &output);
    Ok(())
}

// ── `fanout decrypt` ──────────────────────────────────────────────────────────

async fn cmd_decrypt(
    config: &FanoutConfig,
    input: &Path,
    key: &Path,
    output: Option<PathBuf>,
) -> Result<()> {
    let output = output.unwrap_or_else(|| default_decrypted_path(input));
    let material =
        KeyMaterial::load(key).with_context(|| format!("loading key file {}", key.display()))?;

    let pb = make_progress_bar("decrypt")?;
    let coordinator = ready_coordinator(config, &pb).await?;

    let summary = coordinator
        .decrypt_file(input, &output, &material)
        .await
        .map_err(|e| job_failed(&pb, e, &format!("decrypting {}", input.display())))?;
    pb.finish_with_message("done");
    print_summary(&summary, &output);
    Ok(())
}

// ── `fanout ping` ─────────────────────────────────────────────────────────────

async fn cmd_ping(config: &FanoutConfig) -> Result<()> {
    let coordinator = Coordinator::from_config(config).context("configuring coordinator")?;

    let spinner = make_spinner("ping")?;
    spinner.set_message(format!("{} worker(s)...", coordinator.workers().len()));
    let report = coordinator.check_workers().await;
    spinner.finish_and_clear();

    let mut unhealthy = 0;
    for health in &report {
        if health.alive {
            println!(
                "  {:<30} alive    id={} status={}",
                health.endpoint,
                health.worker_id.as_deref().unwrap_or("-"),
                health.status.as_deref().unwrap_or("-"),
            );
        } else {
            unhealthy += 1;
            println!(
                "  {:<30} DOWN     {}",
                health.endpoint,
                health
                    .error
                    .as_deref()
                    .or(health.status.as_deref())
                    .unwrap_or("not alive"),
            );
        }
    }

    if unhealthy > 0 {
        anyhow::bail!("{unhealthy} of {} workers unavailable", report.len());
    }
    println!("All {} workers alive", report.len());
    Ok(())
}

// ── `fanout config` ───────────────────────────────────────────────────────────

fn cmd_config_show(config: &FanoutConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();

    let mut shown = config.clone();
    if shown.remote.access_token.is_some() {
        shown.remote.access_token = Some("[REDACTED]".into());
    }
    let rendered = toml::to_string_pretty(&shown).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn cmd_config_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }
    FanoutConfig::default().save(config_path)?;
    println!("Wrote default configuration to {}", config_path.display());
    Ok(())
}

fn cmd_config_remote(
    config_path: &Path,
    token: Option<String>,
    folder: Option<String>,
) -> Result<()> {
    // Start from the file on disk so CLI overrides are not persisted
    let mut config = FanoutConfig::load_or_default(config_path)?;
    if let Some(token) = token {
        config.remote.access_token = Some(token);
    }
    if let Some(folder) = folder {
        config.remote.folder = folder;
    }
    config.save(config_path)?;
    println!("Remote settings saved to {}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_output_paths() {
        let input = Path::new("/data/report.pdf");
        assert_eq!(
            default_encrypted_path(input),
            PathBuf::from("/data/report.pdf.encrypted")
        );
        assert_eq!(default_key_path(input), PathBuf::from("/data/report.pdf.key"));
    }

    #[test]
    fn decrypted_path_strips_encrypted_suffix() {
        assert_eq!(
            default_decrypted_path(Path::new("/data/report.pdf.encrypted")),
            PathBuf::from("/data/report.pdf")
        );
        assert_eq!(
            default_decrypted_path(Path::new("blob.bin")),
            PathBuf::from("blob.bin.decrypted")
        );
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "fanout",
            "--workers",
            "a:1,b:2",
            "--secure",
            "--chunk-size",
            "4096",
            "--max-in-flight",
            "1",
            "ping",
        ]);
        let mut config = FanoutConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.coordinator.workers, vec!["a:1", "b:2"]);
        assert!(config.tls.enabled);
        assert_eq!(config.coordinator.chunk_size, 4096);
        assert_eq!(config.coordinator.max_in_flight, 1);
        assert!(!config.coordinator.legacy_block_adjust);
    }

    #[test]
    fn worker_failures_get_a_ping_hint() {
        let pb = ProgressBar::hidden();

        let err = job_failed(
            &pb,
            FanoutError::transport("10.0.0.2:50051", "connection refused"),
            "encrypting in.bin",
        );
        let msg = format!("{err:#}");
        assert!(msg.contains("fanout ping"), "{msg}");
        assert!(msg.contains("connection refused"), "{msg}");

        let err = job_failed(
            &pb,
            FanoutError::io("/missing/in.bin", std::io::Error::other("not found")),
            "encrypting in.bin",
        );
        let msg = format!("{err:#}");
        assert!(!msg.contains("fanout ping"), "{msg}");
        assert!(msg.starts_with("encrypting in.bin"), "{msg}");
    }

    #[test]
    fn config_init_refuses_overwrite() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fanout.toml");

        cmd_config_init(&path, false).unwrap();
        assert!(cmd_config_init(&path, false).is_err());
        cmd_config_init(&path, true).unwrap();

        let loaded = FanoutConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.coordinator.chunk_size, 1024 * 1024);
    }

    #[test]
    fn config_remote_persists_token_and_folder() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("fanout.toml");

        cmd_config_remote(&path, Some("tok".into()), Some("backups".into())).unwrap();
        cmd_config_remote(&path, None, Some("archive".into())).unwrap();

        let loaded = FanoutConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.remote.access_token.as_deref(), Some("tok"));
        assert_eq!(loaded.remote.folder, "archive");
    }
}

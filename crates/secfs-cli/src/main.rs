//! secfs: manage an encrypted secfs volume stored in a local directory
//!
//! Commands:
//!   keygen [--out <file>]        - generate a random mount key (and a KDF salt)
//!   format                       - write the superblock marker for the mount prefix
//!   ls [<dir>]                   - list encrypted files
//!   put <local> <name>           - encrypt a local file into the volume
//!   get <name> <local>           - decrypt a file out of the volume
//!   cat <name>                   - decrypt a file to stdout
//!   rm <name>                    - delete a file
//!   stat <name>                  - show logical size and header fields
//!   verify <name>...             - recompute and check content digests
//!   config show                  - display current configuration

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use secfs::{Mount, MountOptions, OpenFlags};
use secfs_backing::LocalBacking;
use secfs_core::config::LogConfig;
use secfs_core::SecfsConfig;
use secfs_crypto::{derive_mount_key, generate_mount_key, generate_salt, KdfParams, MountKey};

const TRANSFER_CHUNK: usize = 64 * 1024;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "secfs",
    version,
    about = "Encrypted file volume over a plain directory",
    long_about = "secfs: store files AES-encrypted block by block under a backing directory"
)]
struct Cli {
    /// Path to secfs.toml configuration file
    #[arg(long, short = 'c', env = "SECFS_CONFIG", default_value = "/etc/secfs/config.toml")]
    config: PathBuf,

    /// Backing directory (overrides mount.backing_root)
    #[arg(long, env = "SECFS_BACKING_ROOT")]
    backing_root: Option<PathBuf>,

    /// Mount prefix inside the backing directory (overrides mount.prefix)
    #[arg(long, short = 'p')]
    prefix: Option<String>,

    /// File holding the base64 mount key (overrides crypto.key_file)
    #[arg(long, short = 'k', env = "SECFS_KEY_FILE")]
    key_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a random 128-bit mount key and a fresh Argon2id salt
    Keygen {
        /// Write the key here instead of stdout (created with mode 0600)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Write the superblock marker, making the prefix mountable with this key
    Format,

    /// List the encrypted files in a directory of the volume
    Ls {
        /// Directory relative to the mount prefix
        #[arg(default_value = "")]
        dir: String,
    },

    /// Encrypt a local file into the volume
    Put {
        local: PathBuf,
        /// Name inside the volume (default: the local file name)
        name: Option<String>,
    },

    /// Decrypt a file from the volume into a local file
    Get {
        name: String,
        /// Local destination (default: the file name in the current dir)
        local: Option<PathBuf>,
    },

    /// Decrypt a file to stdout
    Cat { name: String },

    /// Delete a file from the volume
    Rm { name: String },

    /// Show the logical size and header fields of a file
    Stat { name: String },

    /// Recompute content digests and compare them with the stored ones
    Verify {
        #[arg(required = true)]
        names: Vec<String>,
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

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = SecfsConfig::load(&cli.config)?;
    if let Some(root) = &cli.backing_root {
        config.mount.backing_root = root.clone();
    }
    if let Some(prefix) = &cli.prefix {
        config.mount.prefix = prefix.clone();
    }
    if let Some(key_file) = &cli.key_file {
        config.crypto.key_file = Some(key_file.clone());
    }

    init_logging(&config.log);

    match &cli.command {
        Commands::Keygen { out } => cmd_keygen(out.as_deref()),
        Commands::Format => cmd_format(&config),
        Commands::Ls { dir } => with_mount(&config, |m| cmd_ls(m, dir)),
        Commands::Put { local, name } => with_mount(&config, |m| cmd_put(m, local, name.as_deref())),
        Commands::Get { name, local } => with_mount(&config, |m| cmd_get(m, name, local.as_deref())),
        Commands::Cat { name } => with_mount(&config, |m| cmd_cat(m, name)),
        Commands::Rm { name } => with_mount(&config, |m| {
            m.unlink(name).with_context(|| format!("removing {name}"))
        }),
        Commands::Stat { name } => with_mount(&config, |m| cmd_stat(m, name)),
        Commands::Verify { names } => cmd_verify(&config, names),
        Commands::Config { action: ConfigAction::Show } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(log: &LogConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_env("SECFS_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(&log.level));

    // stdout carries file contents for `cat`; logs go to stderr
    match log.format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Key sourcing ──────────────────────────────────────────────────────────────

fn parse_key_file(content: &str) -> Result<MountKey> {
    let bytes = STANDARD
        .decode(content.trim())
        .context("key file is not valid base64")?;
    MountKey::from_slice(&bytes)
}

/// Mount key: key file if configured, otherwise a passphrase run through
/// Argon2id with the configured salt.
///
/// The passphrase comes from SECFS_PASSPHRASE or an interactive prompt.
fn load_mount_key(config: &SecfsConfig) -> Result<MountKey> {
    if let Some(path) = &config.crypto.key_file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading key file: {}", path.display()))?;
        return parse_key_file(&content)
            .with_context(|| format!("loading key file: {}", path.display()));
    }

    let salt = config.salt_bytes()?.context(
        "no mount key configured\n\
         Set crypto.key_file, or crypto.salt for passphrase mode.\n\
         `secfs keygen` prints a fresh key and salt.",
    )?;

    let passphrase = match std::env::var("SECFS_PASSPHRASE") {
        Ok(p) => SecretString::from(p),
        Err(_) => SecretString::from(
            rpassword::prompt_password("secfs passphrase: ").context("reading passphrase")?,
        ),
    };

    let params = KdfParams {
        mem_cost_kib: config.crypto.argon2_mem_cost_kib,
        time_cost: config.crypto.argon2_time_cost,
        parallelism: config.crypto.argon2_parallelism,
    };
    derive_mount_key(&passphrase, &salt, &params)
}

fn open_backing(config: &SecfsConfig) -> Result<LocalBacking> {
    let root = &config.mount.backing_root;
    let backing = LocalBacking::new(root)
        .with_context(|| format!("opening backing root {}", root.display()))?;
    secfs_backing::check_health(&backing, "")?;
    Ok(backing)
}

/// Mount, run `f`, and unmount even when `f` fails.
fn with_mount<F>(config: &SecfsConfig, f: F) -> Result<()>
where
    F: FnOnce(&Mount<LocalBacking>) -> Result<()>,
{
    let key = load_mount_key(config)?;
    tracing::debug!(
        root = %config.mount.backing_root.display(),
        prefix = %config.mount.prefix,
        "mounting"
    );
    let mount = Mount::with_key(
        open_backing(config)?,
        &key,
        MountOptions::from(&config.mount),
    )
    .context("mounting volume (wrong key, or prefix not formatted?)")?;

    let result = f(&mount);
    let unmounted = mount.unmount().context("unmounting volume");
    result.and(unmounted)
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn make_progress_bar(total: u64, prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )?
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn copy_with_progress(
    mut from: impl Read,
    mut to: impl Write,
    pb: &ProgressBar,
) -> Result<u64> {
    let mut buf = vec![0u8; TRANSFER_CHUNK];
    let mut total = 0u64;
    loop {
        let n = from.read(&mut buf)?;
        if n == 0 {
            break;
        }
        to.write_all(&buf[..n])?;
        total += n as u64;
        pb.inc(n as u64);
    }
    Ok(total)
}

// ── `secfs keygen` ────────────────────────────────────────────────────────────

fn cmd_keygen(out: Option<&Path>) -> Result<()> {
    let key = generate_mount_key();
    let encoded = STANDARD.encode(key.as_bytes());

    match out {
        Some(path) => {
            write_secret_file(path, &encoded)?;
            println!("Mount key written to {}", path.display());
        }
        None => println!("key  = {encoded}"),
    }
    println!("salt = {}", STANDARD.encode(generate_salt()));
    Ok(())
}

fn write_secret_file(path: &Path, content: &str) -> Result<()> {
    let mut opts = std::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts
        .open(path)
        .with_context(|| format!("creating key file: {}", path.display()))?;
    writeln!(f, "{content}")?;
    Ok(())
}

// ── `secfs format` ────────────────────────────────────────────────────────────

fn cmd_format(config: &SecfsConfig) -> Result<()> {
    let key = load_mount_key(config)?;
    let backing = open_backing(config)?;
    Mount::format(
        &backing,
        &secfs_crypto::SoftwareAes::new(&key),
        &config.mount.prefix,
    )
    .context("writing superblock marker")?;
    println!(
        "Formatted {} (prefix {:?})",
        config.mount.backing_root.display(),
        config.mount.prefix
    );
    Ok(())
}

// ── `secfs ls` ────────────────────────────────────────────────────────────────

fn cmd_ls(mount: &Mount<LocalBacking>, dir: &str) -> Result<()> {
    let mut names = mount
        .list(dir)
        .with_context(|| format!("listing {dir:?}"))?;
    names.sort();
    for name in names {
        let path = if dir.is_empty() {
            name.clone()
        } else {
            format!("{}/{name}", dir.trim_end_matches('/'))
        };
        match mount.stat(&path) {
            Ok(stat) => println!("{:>10}  {name}", fmt_bytes(stat.size)),
            Err(e) => println!("{:>10}  {name}  ({e})", "?"),
        }
    }
    Ok(())
}

// ── `secfs put` / `secfs get` / `secfs cat` ───────────────────────────────────

fn cmd_put(mount: &Mount<LocalBacking>, local: &Path, name: Option<&str>) -> Result<()> {
    let name = match name {
        Some(n) => n.to_string(),
        None => local
            .file_name()
            .context("local path has no file name")?
            .to_string_lossy()
            .into_owned(),
    };

    let src = File::open(local).with_context(|| format!("opening {}", local.display()))?;
    let total = src.metadata()?.len();

    let mut dst = mount
        .open(&name, OpenFlags::write_only().create().truncate())
        .with_context(|| format!("creating {name}"))?;
    let pb = make_progress_bar(total, "put")?;
    let copied = copy_with_progress(src, &mut dst, &pb);
    let closed = dst.close().with_context(|| format!("closing {name}"));
    pb.finish_and_clear();
    let copied = copied?;
    closed?;

    println!("{} → {name} ({})", local.display(), fmt_bytes(copied));
    Ok(())
}

fn cmd_get(mount: &Mount<LocalBacking>, name: &str, local: Option<&Path>) -> Result<()> {
    let local = match local {
        Some(p) => p.to_path_buf(),
        None => PathBuf::from(
            Path::new(name)
                .file_name()
                .context("name has no file component")?,
        ),
    };

    let mut src = mount
        .open(name, OpenFlags::read_only())
        .with_context(|| format!("opening {name}"))?;
    let dst = File::create(&local).with_context(|| format!("creating {}", local.display()))?;
    let pb = make_progress_bar(src.len(), "get")?;
    let copied = copy_with_progress(&mut src, dst, &pb);
    let closed = src.close().with_context(|| format!("closing {name}"));
    pb.finish_and_clear();
    let copied = copied?;
    closed?;

    println!("{name} → {} ({})", local.display(), fmt_bytes(copied));
    Ok(())
}

fn cmd_cat(mount: &Mount<LocalBacking>, name: &str) -> Result<()> {
    let mut src = mount
        .open(name, OpenFlags::read_only())
        .with_context(|| format!("opening {name}"))?;
    let stdout = std::io::stdout();
    let copied = std::io::copy(&mut src, &mut stdout.lock());
    let closed = src.close();
    copied?;
    closed?;
    Ok(())
}

// ── `secfs stat` ──────────────────────────────────────────────────────────────

fn cmd_stat(mount: &Mount<LocalBacking>, name: &str) -> Result<()> {
    let stat = mount.stat(name).with_context(|| format!("reading {name}"))?;
    println!("name:      {name}");
    println!("size:      {} ({} bytes)", fmt_bytes(stat.size), stat.size);
    println!("pad:       {}", stat.pad_count);
    println!("mode:      {:?}", stat.mode);
    Ok(())
}

// ── `secfs verify` ────────────────────────────────────────────────────────────

fn cmd_verify(config: &SecfsConfig, names: &[String]) -> Result<()> {
    // Digest check happens at open; mount with it forced on
    let mut config = config.clone();
    config.mount.verify_hash = true;

    with_mount(&config, |mount| {
        let mut bad = 0usize;
        for name in names {
            match mount.open(name, OpenFlags::read_only()) {
                Ok(f) => {
                    f.close()?;
                    println!("ok   {name}");
                }
                Err(e) if e.is_corruption() => {
                    bad += 1;
                    println!("BAD  {name}: {e}");
                }
                Err(e) => return Err(e).with_context(|| format!("opening {name}")),
            }
        }
        if bad > 0 {
            bail!("{bad} of {} files failed verification", names.len());
        }
        Ok(())
    })
}

// ── `secfs config show` ───────────────────────────────────────────────────────

fn cmd_config_show(config: &SecfsConfig, config_path: &Path) -> Result<()> {
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

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

//! stampede - bulk Steam Workshop skin downloader.
//!
//! Runs a herd of isolated steamcmd instances so their lockfiles never
//! trample each other.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use stampede::acf::{self, PatchOptions};
use stampede::config::{Layout, APP_ID, MAX_RETRY_PASSES};
use stampede::downloader::{self, DownloadOptions};
use std::io::Write as _;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stampede")]
#[command(version)]
#[command(about = "Bulk Steam Workshop skin downloader driving isolated steamcmd instances")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Download every workshop item listed in ImportedSkins.json
    Download {
        /// Max parallel steamcmd instances (prompted when omitted; >3 invites
        /// lock failures and rate limits)
        #[arg(short = 'n', long)]
        instances: Option<usize>,

        /// Skip items already present in the shared content tree
        #[arg(long)]
        skip_existing: bool,

        /// Process only the ids recorded in failed_ids.txt by a previous run
        #[arg(long)]
        retry_failed: bool,

        /// Working directory holding steamcmd, the input file and the shared tree
        #[arg(long, default_value = ".")]
        root: PathBuf,
    },

    /// Insert missing entries into Steam's appworkshop manifest
    PatchAcf {
        /// Steam workshop content folder for the app (prompted when omitted)
        #[arg(long)]
        content_dir: Option<PathBuf>,

        /// Path to appworkshop_252490.acf (prompted when omitted)
        #[arg(long)]
        acf: Option<PathBuf>,

        /// Answer yes to every confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            instances,
            skip_existing,
            retry_failed,
            root,
        } => {
            let layout = Layout::new(root);
            init_file_logging(&layout, cli.verbose)?;

            println!("--------------------------------------------------------");
            println!("-     Rust Workshop Skin Downloader  (steamcmd)        -");
            println!("-  isolated dirs | staging cleanup | lock detection    -");
            println!("--------------------------------------------------------");

            let opts = gather_download_options(&layout, instances, skip_existing, retry_failed)?;
            downloader::run(layout, opts).await?;
        }

        Commands::PatchAcf { content_dir, acf, yes } => {
            init_console_logging(cli.verbose)?;

            println!("+----------------------------------------------------------+");
            println!("|  appworkshop_{APP_ID}.acf patcher                         |");
            println!("|  Reads manifest.txt per skin, inserts missing entries    |");
            println!("+----------------------------------------------------------+");
            println!("Run this while Steam is closed - Steam holds a write lock on the .acf.");
            println!();

            let content_dir = match content_dir {
                Some(p) => p,
                None => prompt_path("Steam workshop content folder", &default_content_dir())?,
            };
            let acf_path = match acf {
                Some(p) => p,
                None => prompt_path(
                    &format!("appworkshop_{APP_ID}.acf path"),
                    &default_acf_path(),
                )?,
            };

            acf::run(&PatchOptions {
                content_dir,
                acf_path,
                assume_yes: yes,
            })?;
        }
    }

    Ok(())
}

/// Orchestrator logging goes to `logs/main.log`; the console stays free
/// for the progress bar.
fn init_file_logging(layout: &Layout, verbose: bool) -> Result<()> {
    std::fs::create_dir_all(layout.log_dir())
        .with_context(|| format!("Failed to create {}", layout.log_dir().display()))?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(layout.main_log())
        .with_context(|| format!("Failed to open {}", layout.main_log().display()))?;

    let default = if verbose { "stampede=debug" } else { "stampede=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default.parse()?))
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn init_console_logging(verbose: bool) -> Result<()> {
    if verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(
                if verbose { "stampede=debug" } else { "stampede=warn" }.parse()?,
            ))
            .init();
    }
    Ok(())
}

/// Fill in whatever the flags did not provide, asking on stdin the way the
/// tool has always done. Passing `--instances` switches to fully
/// non-interactive mode.
fn gather_download_options(
    layout: &Layout,
    instances: Option<usize>,
    skip_existing: bool,
    retry_failed: bool,
) -> Result<DownloadOptions> {
    let interactive = instances.is_none();

    let instances = match instances {
        Some(n) => n.max(1),
        None => {
            println!();
            println!("NOTE: Each instance downloads into its own install directory to");
            println!("      prevent 'Locking Failed' collisions. Recommended: 1-3.");
            prompt_usize("Max parallel SteamCMD instances")?.max(1)
        }
    };

    let skip_existing = skip_existing
        || (interactive && prompt_yes_no("Skip already-downloaded skins?")?);

    let retry_failed_only = if layout.failed_ids_file().exists() {
        retry_failed
            || (interactive
                && prompt_yes_no("A failed_ids.txt exists. Retry only those ids?")?)
    } else {
        false
    };

    println!(
        "Instances: {instances}  |  Passes: up to {}  |  Skip existing: {skip_existing}",
        MAX_RETRY_PASSES + 1
    );

    Ok(DownloadOptions {
        instances,
        skip_existing,
        retry_failed_only,
    })
}

fn read_stdin_line() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

fn prompt_usize(msg: &str) -> Result<usize> {
    loop {
        print!("{msg}: ");
        std::io::stdout().flush().ok();
        let line = read_stdin_line()?;
        match line.parse::<usize>() {
            Ok(n) => return Ok(n),
            Err(_) => println!("Please enter a number."),
        }
    }
}

fn prompt_yes_no(msg: &str) -> Result<bool> {
    print!("{msg} (y/n): ");
    std::io::stdout().flush().ok();
    let line = read_stdin_line()?;
    Ok(matches!(line.as_str(), "y" | "Y"))
}

/// Show a default path, let the user press Enter to accept or type another.
fn prompt_path(label: &str, default: &std::path::Path) -> Result<PathBuf> {
    println!("{label}:");
    println!("  {}", default.display());
    print!("Press Enter to use this, or type a custom path: ");
    std::io::stdout().flush().ok();
    let line = read_stdin_line()?;
    if line.is_empty() {
        Ok(default.to_path_buf())
    } else {
        Ok(PathBuf::from(line.replace('\\', "/")))
    }
}

#[cfg(windows)]
fn steam_root() -> PathBuf {
    PathBuf::from("C:/Program Files (x86)/Steam")
}

#[cfg(not(windows))]
fn steam_root() -> PathBuf {
    let home = std::env::var_os("HOME").unwrap_or_default();
    PathBuf::from(home).join(".local/share/Steam")
}

fn default_content_dir() -> PathBuf {
    steam_root().join("steamapps/workshop/content").join(APP_ID)
}

fn default_acf_path() -> PathBuf {
    steam_root()
        .join("steamapps/workshop")
        .join(format!("appworkshop_{APP_ID}.acf"))
}

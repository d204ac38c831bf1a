//! vdisk CLI - command line access to configured disks.
//!
//! Disks are described by a JSON configuration file; every subcommand runs
//! against the default disk unless `--disk` names another one.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use vdisk_storage::{DiskConfig, DiskFactory, FileEntry, Filesystem, FilesystemConfig};

const APP_NAME: &str = "vdisk";

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(about = "vdisk - Uniform access to local and remote disks")]
#[command(version)]
struct Cli {
    /// Disk configuration file (JSON).
    #[arg(short, long, env = "VDISK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Disk to operate on (default: the configured default disk).
    #[arg(short, long, global = true)]
    disk: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List files in a directory.
    Ls {
        /// Directory to list (default: disk root).
        #[arg(default_value = "")]
        dir: String,

        /// Include files in subdirectories.
        #[arg(short, long)]
        recursive: bool,
    },

    /// List directories in a directory.
    Dirs {
        /// Directory to list (default: disk root).
        #[arg(default_value = "")]
        dir: String,

        /// Include nested directories.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Print a file to stdout.
    Cat {
        path: String,
    },

    /// Write a file from a local file or stdin.
    Put {
        /// Destination path on the disk.
        path: String,

        /// Source file (default: stdin).
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Append text to a file.
    Append {
        path: String,
        text: String,
    },

    /// Delete a file.
    Rm {
        path: String,
    },

    /// Copy a file.
    Cp {
        from: String,
        to: String,
    },

    /// Move or rename a file.
    Mv {
        from: String,
        to: String,
    },

    /// Show size, modification time and visibility of a file.
    Stat {
        path: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create a directory.
    Mkdir {
        path: String,
    },

    /// Delete a directory and everything below it.
    Rmdir {
        dir: String,
    },

    /// List registered drivers.
    Drivers,

    /// Generate shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let factory = DiskFactory::new(config);
    let result = run(&factory, cli.disk.as_deref(), cli.command);

    if let Err(e) = factory.shutdown() {
        debug!("Shutdown reported: {}", e);
    }
    result
}

fn run(factory: &DiskFactory, disk_name: Option<&str>, command: Commands) -> Result<()> {
    // Listing drivers needs no disk.
    match command {
        Commands::Drivers => {
            for driver in factory.drivers() {
                println!("{}", driver);
            }
            return Ok(());
        }
        Commands::Completions { .. } => return Ok(()),
        _ => {}
    }

    let disk = open_disk(factory, disk_name)?;
    match command {
        Commands::Ls { dir, recursive } => cmd_ls(disk.as_ref(), &dir, recursive),
        Commands::Dirs { dir, recursive } => cmd_dirs(disk.as_ref(), &dir, recursive),
        Commands::Cat { path } => cmd_cat(disk.as_ref(), &path),
        Commands::Put { path, file } => cmd_put(disk.as_ref(), &path, file.as_deref()),
        Commands::Append { path, text } => disk
            .append(&path, text.as_bytes())
            .with_context(|| format!("Failed to append to {}", path)),
        Commands::Rm { path } => disk
            .delete(&path)
            .with_context(|| format!("Failed to delete {}", path)),
        Commands::Cp { from, to } => disk
            .copy(&from, &to)
            .with_context(|| format!("Failed to copy {} to {}", from, to)),
        Commands::Mv { from, to } => disk
            .move_file(&from, &to)
            .with_context(|| format!("Failed to move {} to {}", from, to)),
        Commands::Stat { path, json } => cmd_stat(disk.as_ref(), &path, json),
        Commands::Mkdir { path } => disk
            .make_directory(&path)
            .with_context(|| format!("Failed to create directory {}", path)),
        Commands::Rmdir { dir } => disk
            .delete_directory(&dir)
            .with_context(|| format!("Failed to delete directory {}", dir)),
        Commands::Drivers | Commands::Completions { .. } => Ok(()),
    }
}

/// Resolve the named disk, or the configured default.
fn open_disk(factory: &DiskFactory, name: Option<&str>) -> Result<Arc<dyn Filesystem>> {
    let name = name.unwrap_or_else(|| factory.default_disk_name());
    factory
        .try_disk(name)
        .with_context(|| format!("Failed to open disk '{}'", name))
}

/// Load the disk configuration, or fall back to a local disk at the
/// current directory.
fn load_config(path: Option<&Path>) -> Result<FilesystemConfig> {
    match path {
        Some(path) => FilesystemConfig::from_path(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => {
            debug!("No config given, using the current directory as disk 'local'");
            Ok(FilesystemConfig::new("local").with_disk(
                "local",
                DiskConfig::new()
                    .with("driver", "local")
                    .with("root", ".")
                    .with("perm", "0755"),
            ))
        }
    }
}

fn print_entry(entry: &FileEntry) {
    println!(
        "{:>12}  {}  {}",
        entry.size,
        entry.modified.to_rfc3339_opts(SecondsFormat::Secs, true),
        entry.path
    );
}

fn cmd_ls(disk: &dyn Filesystem, dir: &str, recursive: bool) -> Result<()> {
    let entries = if recursive {
        disk.all_files(dir)
    } else {
        disk.files(dir)
    }
    .with_context(|| format!("Failed to list {}", dir))?;

    if entries.is_empty() {
        println!("(empty)");
    }
    for entry in &entries {
        print_entry(entry);
    }
    Ok(())
}

fn cmd_dirs(disk: &dyn Filesystem, dir: &str, recursive: bool) -> Result<()> {
    let dirs = if recursive {
        disk.all_directories(dir)
    } else {
        disk.directories(dir)
    }
    .with_context(|| format!("Failed to list directories in {}", dir))?;

    for dir in dirs {
        println!("{}/", dir);
    }
    Ok(())
}

fn cmd_cat(disk: &dyn Filesystem, path: &str) -> Result<()> {
    let mut reader = disk
        .read_stream(path)
        .with_context(|| format!("Failed to open {}", path))?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    io::copy(&mut reader, &mut out).with_context(|| format!("Failed to read {}", path))?;
    out.flush()?;
    Ok(())
}

fn cmd_put(disk: &dyn Filesystem, path: &str, source: Option<&Path>) -> Result<()> {
    let mut reader: Box<dyn Read> = match source {
        Some(source) => Box::new(
            File::open(source)
                .with_context(|| format!("Failed to open source {}", source.display()))?,
        ),
        None => Box::new(io::stdin().lock()),
    };

    disk.write_stream(path, &mut reader)
        .with_context(|| format!("Failed to write {}", path))?;

    println!("Wrote {} to disk '{}'", path, disk.name());
    Ok(())
}

fn cmd_stat(disk: &dyn Filesystem, path: &str, json: bool) -> Result<()> {
    let size = disk
        .size(path)
        .with_context(|| format!("Failed to stat {}", path))?;
    let modified = disk
        .last_modified(path)
        .with_context(|| format!("Failed to stat {}", path))?;
    let visibility = disk.get_visibility(path);

    if json {
        let stat = serde_json::json!({
            "disk": disk.name(),
            "path": path,
            "size": size,
            "modified": modified,
            "visibility": visibility,
        });
        println!("{}", serde_json::to_string_pretty(&stat)?);
    } else {
        println!("Disk:       {}", disk.name());
        println!("Path:       {}", path);
        println!("Size:       {} bytes", size);
        println!("Modified:   {}", modified.to_rfc3339_opts(SecondsFormat::Secs, true));
        println!("Visibility: {}", visibility);
    }
    Ok(())
}

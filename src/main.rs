use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info};

use blobtree::{BlobTreeError, Config, ExportOutcome, Result, VirtualEntry, VirtualFs};

/// Folders and files over a flat object store.
#[derive(Debug, Parser)]
#[command(name = "blobtree", version, about)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "blobtree.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List a folder.
    Ls {
        /// Folder to list (defaults to the sandbox root).
        #[arg(default_value = "")]
        path: String,
        /// List every file below the folder instead of one level.
        #[arg(long)]
        flat: bool,
        /// Print JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create a folder.
    Mkdir { parent: String, name: String },
    /// Upload a local file.
    Put {
        local: PathBuf,
        target: String,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Rename a file or folder in place.
    Rename { path: String, new_name: String },
    /// Move a file or folder.
    Mv { src: String, dst: String },
    /// Delete a file or folder.
    Rm { path: String },
    /// Show file metadata as JSON.
    Stat { path: String },
    /// Write a file to stdout.
    Cat { path: String },
    /// Export a folder as an archive.
    Export {
        #[arg(default_value = "")]
        prefix: String,
        /// Output file, or `-` for stdout (defaults to the folder name
        /// with the archive extension).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load_with_env(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            let missing =
                matches!(&e, BlobTreeError::Io(io) if io.kind() == std::io::ErrorKind::NotFound);
            if !missing {
                eprintln!("Failed to load {}: {e}", cli.config.display());
                eprintln!("Using default configuration.");
            }
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = blobtree::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        blobtree::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let vfs = VirtualFs::from_config(config)?;
    debug!(
        root = vfs.sanitizer().root(),
        traversal = ?vfs.sanitizer().policy(),
        "sandbox opened"
    );

    match command {
        Command::Ls { path, flat, json } => {
            let entries = vfs.list(&path, !flat).await?;
            if json {
                print_json(&entries)?;
            } else {
                for entry in &entries {
                    println!("{}", format_entry(entry));
                }
            }
        }
        Command::Mkdir { parent, name } => {
            println!("{}", vfs.create_folder(&parent, &name).await?);
        }
        Command::Put {
            local,
            target,
            content_type,
        } => {
            let data = tokio::fs::read(&local).await?;
            let key = vfs
                .upload_file(&target, data, content_type.as_deref())
                .await?;
            println!("{key}");
        }
        Command::Rename { path, new_name } => {
            println!("{}", vfs.rename(&path, &new_name).await?);
        }
        Command::Mv { src, dst } => {
            println!("{}", vfs.move_path(&src, &dst).await?);
        }
        Command::Rm { path } => {
            let removed = vfs.delete(&path).await?;
            println!("removed {removed} object(s)");
        }
        Command::Stat { path } => {
            print_json(&vfs.stat(&path).await?)?;
        }
        Command::Cat { path } => {
            let (_, mut reader) = vfs.open_file(&path).await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
        }
        Command::Export { prefix, output } => match vfs.export(&prefix).await? {
            ExportOutcome::Empty => {
                return Err(BlobTreeError::NotFound(format!("files under '{prefix}'")));
            }
            ExportOutcome::Archive {
                mut stream,
                file_count,
            } => {
                let output = match output {
                    Some(path) => path,
                    None => {
                        let folder = vfs.sanitizer().folder(&prefix)?;
                        PathBuf::from(format!(
                            "{}.{}",
                            folder.name(),
                            vfs.export_format().extension()
                        ))
                    }
                };
                let mut out: Box<dyn AsyncWrite + Unpin + Send> = if output.as_os_str() == "-" {
                    Box::new(tokio::io::stdout())
                } else {
                    Box::new(tokio::fs::File::create(&output).await?)
                };
                let bytes = tokio::io::copy(&mut stream, &mut out).await?;
                out.flush().await?;
                stream.finish().await?;
                info!(
                    files = file_count,
                    bytes,
                    output = %output.display(),
                    "export written"
                );
            }
        },
    }

    Ok(())
}

fn format_entry(entry: &VirtualEntry) -> String {
    match entry {
        VirtualEntry::Folder { name, .. } => format!("{:>12}  {:16}  {name}/", "-", ""),
        VirtualEntry::File {
            name,
            size,
            last_modified,
            ..
        } => format!(
            "{size:>12}  {}  {name}",
            last_modified.format("%Y-%m-%d %H:%M")
        ),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{json}");
    Ok(())
}

//! `cairnd`: command-line front end for cairn trees.
//!
//! Blobs live in a file store under the configured data directory, next to a
//! `ROOT` file holding the hex id of the current root directory. Commands
//! that change the tree write a new root and move the pointer.
//!
//! # Usage
//!
//! ```text
//! cairnd ingest ./photos --prefix photos      # add a local directory
//! cairnd ls photos/2024                       # list one directory
//! cairnd cat photos/2024/a.jpg > a.jpg        # stream one file
//! cairnd rm photos/2024/a.jpg                 # delete a path
//! cairnd extract ./restore                    # materialize the tree
//! cairnd export -o backup.tar photos          # tar a subtree
//! cairnd --root <hex> ls                      # read an older root
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use cairn_cas::open_content_stream;
use cairn_engine::archive::PathFilter;
use cairn_engine::{ArchiveStreamer, Extractor};
use cairn_store::{BlobStore, FileStore};
use cairn_tree::{
    DirectoryNode, DirectoryUpdate, IngestFile, Ingestor, UpdatePlanner, scan_directory,
};
use cairn_types::{BlobId, FileFlags};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(clap::Parser)]
#[command(
    name = "cairnd",
    version,
    about = "Content-addressed directory trees over a blob store"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory.
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Read from this root id instead of the current one.
    #[arg(long, global = true)]
    root: Option<BlobId>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Chunk a local directory and add it to the tree.
    Ingest {
        /// Directory to scan.
        source: PathBuf,

        /// Tree path to place the scanned files under.
        #[arg(short, long, default_value = "")]
        prefix: String,
    },

    /// List a directory.
    Ls {
        /// Directory path inside the tree.
        #[arg(default_value = "")]
        path: String,
    },

    /// Write a file's content to stdout.
    Cat {
        /// File path inside the tree.
        path: String,
    },

    /// Delete files or directories.
    Rm {
        /// Paths to delete.
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Materialize the tree (or a subtree) on disk.
    Extract {
        /// Destination directory.
        dest: PathBuf,

        /// Subtree to extract.
        #[arg(short, long, default_value = "")]
        path: String,
    },

    /// Stream the tree as a tar archive.
    Export {
        /// Output file; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Restrict the archive to these paths.
        paths: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    use clap::Parser;

    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }
    setup_tracing(&config.log.level);

    let store: Arc<dyn BlobStore> = Arc::new(
        FileStore::new(config.blob_dir()).context("failed to initialize file store")?,
    );
    let head = match cli.root {
        Some(id) => Some(id),
        None => read_head(&config.head_path())?,
    };

    match cli.command {
        Commands::Ingest { source, prefix } => {
            cmd_ingest(&config, store, head, &source, &prefix).await
        }
        Commands::Ls { path } => cmd_ls(store, head, &path).await,
        Commands::Cat { path } => cmd_cat(&config, store, head, &path).await,
        Commands::Rm { paths } => cmd_rm(&config, store, head, &paths).await,
        Commands::Extract { dest, path } => cmd_extract(&config, store, head, &dest, &path).await,
        Commands::Export { output, paths } => {
            cmd_export(&config, store, head, output.as_deref(), paths).await
        }
    }
}

/// Initialize the `tracing` subscriber with the given level filter.
///
/// Respects `RUST_LOG` env var if set, otherwise uses the config value.
/// Logs go to stderr so `cat` and `export` can use stdout.
fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

// -----------------------------------------------------------------------
// Root pointer
// -----------------------------------------------------------------------

/// Current root id, `None` before the first ingest.
fn read_head(path: &Path) -> Result<Option<BlobId>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let id = content
                .trim()
                .parse()
                .with_context(|| format!("malformed root pointer in {}", path.display()))?;
            Ok(Some(id))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

/// Move the root pointer, replacing the file atomically.
fn write_head(path: &Path, id: BlobId) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, format!("{id}\n"))
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("failed to update {}", path.display()))?;
    Ok(())
}

async fn load_root(store: &Arc<dyn BlobStore>, head: Option<BlobId>) -> Result<DirectoryNode> {
    match head {
        Some(id) => DirectoryNode::load(store.as_ref(), id)
            .await
            .with_context(|| format!("failed to load root {id}")),
        None => Ok(DirectoryNode::new()),
    }
}

/// Prefix a tree path, ignoring empty parts.
fn under(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        path.to_string()
    } else {
        format!("{prefix}/{path}")
    }
}

// -----------------------------------------------------------------------
// Commands
// -----------------------------------------------------------------------

async fn cmd_ingest(
    config: &CliConfig,
    store: Arc<dyn BlobStore>,
    head: Option<BlobId>,
    source: &Path,
    prefix: &str,
) -> Result<()> {
    let files: Vec<IngestFile> = scan_directory(source)
        .with_context(|| format!("failed to scan {}", source.display()))?
        .into_iter()
        .map(|mut f| {
            f.path = under(prefix, &f.path);
            f
        })
        .collect();
    if files.is_empty() {
        warn!(source = %source.display(), "no regular files found");
    }

    let ingestor = Ingestor::new(store, config.chunking, config.ingest)?;
    let root = ingestor.commit(head, files).await?;
    write_head(&config.head_path(), root.id)?;
    info!(root = %root.id, length = root.length, "ingest: complete");
    println!("{}", root.id);
    Ok(())
}

async fn cmd_ls(store: Arc<dyn BlobStore>, head: Option<BlobId>, path: &str) -> Result<()> {
    let root = load_root(&store, head).await?;
    let Some(dir) = root.directory_by_path(store.as_ref(), path).await? else {
        bail!("no such directory: {path}");
    };
    for entry in dir.directories() {
        println!("{:>12}  {}/", "-", entry.name);
    }
    for entry in dir.files() {
        let exec = if entry.flags.contains(FileFlags::EXECUTABLE) {
            "*"
        } else {
            ""
        };
        println!("{:>12}  {}{exec}", entry.length, entry.name);
    }
    Ok(())
}

async fn cmd_cat(
    config: &CliConfig,
    store: Arc<dyn BlobStore>,
    head: Option<BlobId>,
    path: &str,
) -> Result<()> {
    let root = load_root(&store, head).await?;
    let Some(entry) = root.file_entry_by_path(store.as_ref(), path).await? else {
        bail!("no such file: {path}");
    };
    let mut reader = open_content_stream(store, entry.content, config.ingest.read_ahead);
    let mut stdout = tokio::io::stdout();
    tokio::io::copy(&mut reader, &mut stdout)
        .await
        .with_context(|| format!("failed to read {path}"))?;
    Ok(())
}

async fn cmd_rm(
    config: &CliConfig,
    store: Arc<dyn BlobStore>,
    head: Option<BlobId>,
    paths: &[String],
) -> Result<()> {
    let Some(base) = head else {
        bail!("the tree is empty");
    };
    let root = load_root(&store, head).await?;

    let mut overlay = DirectoryUpdate::new();
    for path in paths {
        if root.file_entry_by_path(store.as_ref(), path).await?.is_some() {
            overlay.delete_file(path)?;
        } else if !path.trim_matches('/').is_empty()
            && root.directory_by_path(store.as_ref(), path).await?.is_some()
        {
            overlay.delete_directory(path)?;
        } else {
            bail!("no such path: {path}");
        }
    }

    let new_root = UpdatePlanner::new(store, config.chunking)
        .apply_root(Some(base), &overlay)
        .await?;
    write_head(&config.head_path(), new_root.id)?;
    println!("{}", new_root.id);
    Ok(())
}

async fn cmd_extract(
    config: &CliConfig,
    store: Arc<dyn BlobStore>,
    head: Option<BlobId>,
    dest: &Path,
    path: &str,
) -> Result<()> {
    let root = load_root(&store, head).await?;
    let Some(subtree) = root.directory_by_path(store.as_ref(), path).await? else {
        bail!("no such directory: {path}");
    };

    let cancel = ctrl_c_token();
    let summary = Extractor::new(store, config.extract)?
        .extract_with_cancel(&subtree, dest, cancel)
        .await?;
    if summary.cancelled {
        warn!("extraction interrupted; re-run to finish");
    }
    println!(
        "{} files, {} directories, {} bytes in {:.2?}",
        summary.files, summary.directories, summary.bytes, summary.elapsed
    );
    Ok(())
}

async fn cmd_export(
    config: &CliConfig,
    store: Arc<dyn BlobStore>,
    head: Option<BlobId>,
    output: Option<&Path>,
    paths: Vec<String>,
) -> Result<()> {
    let root = load_root(&store, head).await?;
    let filter = selection_filter(paths);
    let mut reader = ArchiveStreamer::new(store, config.ingest.read_ahead).export(root, filter);

    let written = match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            tokio::io::copy(&mut reader, &mut file).await?
        }
        None => tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?,
    };
    info!(bytes = written, "export: complete");
    Ok(())
}

/// Filter keeping the selected paths, their contents and their ancestors.
fn selection_filter(paths: Vec<String>) -> Option<PathFilter> {
    let selected: Vec<String> = paths
        .iter()
        .map(|p| p.trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if selected.is_empty() {
        return None;
    }
    let filter: PathFilter = Arc::new(move |path: &str| {
        let trimmed = path.trim_end_matches('/');
        selected.iter().any(|s| {
            trimmed == s
                || trimmed.starts_with(&format!("{s}/"))
                || (path.ends_with('/') && s.starts_with(path))
        })
    });
    Some(filter)
}

/// Token cancelled on the first Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    token
}

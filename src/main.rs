//! Command-line front end: drives an [`ArchiveRegistry`] the way a document
//! provider would, one acquire/release around each command.

use anyhow::{Context, Result, bail};
use clap::Parser;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing_subscriber::EnvFilter;

use zipdocs::cli::{Cli, Command};
use zipdocs::{AccessMode, ArchiveId, ArchiveKey, ArchiveRegistry, Entry, mime};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let registry = ArchiveRegistry::new(cli.options());
    match cli.command {
        Command::Ls {
            archive,
            path,
            recursive,
        } => {
            let key = ArchiveKey::new(archive, AccessMode::Read)?;
            with_archive(&registry, &key, list(&registry, key.id(path)?, recursive)).await
        }
        Command::Stat { archive, path } => {
            let key = ArchiveKey::new(archive, AccessMode::Read)?;
            with_archive(&registry, &key, stat(&registry, key.id(path)?)).await
        }
        Command::Cat {
            archive,
            path,
            offset,
            length,
        } => {
            let key = ArchiveKey::new(archive, AccessMode::Read)?;
            let id = key.id(path)?;
            with_archive(&registry, &key, cat(&registry, id, offset, length)).await
        }
        Command::Pack { output, inputs } => {
            let key = ArchiveKey::new(output, AccessMode::Write)?;
            with_archive(&registry, &key, pack(&registry, &key, inputs)).await
        }
    }
}

/// Runs `work` between an acquire and a release of `key`. The release also
/// happens when `work` fails; for a write-mode archive it completes the file.
async fn with_archive<F>(registry: &ArchiveRegistry, key: &ArchiveKey, work: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    registry.acquire(key);
    let result = work.await;
    registry.release(key).await?;
    result
}

async fn list(registry: &ArchiveRegistry, dir: ArchiveId, recursive: bool) -> Result<()> {
    println!("{:>10}  {:>10}  {:>16}  Name", "Length", "Size", "Modified");
    println!("{}", "-".repeat(60));

    let mut total = 0u64;
    let mut files = 0usize;
    let mut pending = vec![dir];
    while let Some(dir) = pending.pop() {
        let mut children = registry
            .list_children(&dir)
            .await
            .with_context(|| format!("listing {}", dir.path()))?;
        children.sort_by(|a, b| a.path.cmp(&b.path));

        for entry in children {
            print_row(&entry);
            if entry.is_directory {
                if recursive {
                    pending.push(dir.with_path(entry.path)?);
                }
            } else {
                total += entry.size;
                files += 1;
            }
        }
    }

    println!("{}", "-".repeat(60));
    println!("{:>10}  {:>30}  {} files", total, "", files);
    Ok(())
}

fn print_row(entry: &Entry) {
    let modified = entry
        .last_modified
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();
    println!(
        "{:>10}  {:>10}  {:>16}  {}",
        entry.size, entry.compressed_size, modified, entry.path
    );
}

async fn stat(registry: &ArchiveRegistry, id: ArchiveId) -> Result<()> {
    let entry = registry.stat(&id).await?;
    println!("Path:       {}", entry.path);
    println!("Name:       {}", entry.display_name());
    println!("Type:       {}", entry.mime_type);
    if !entry.is_directory {
        println!("Size:       {}", format_size(entry.size));
        println!("Compressed: {}", format_size(entry.compressed_size));
    }
    if let Some(modified) = entry.last_modified {
        println!("Modified:   {}", modified.format("%Y-%m-%d %H:%M:%S"));
    }
    if entry.is_directory {
        let children = registry.list_children(&id).await?;
        println!("Children:   {}", children.len());
    }
    Ok(())
}

async fn cat(registry: &ArchiveRegistry, id: ArchiveId, offset: u64, length: Option<u64>) -> Result<()> {
    let mut proxy = registry
        .open_for_read(&id)
        .await
        .with_context(|| format!("opening {}", id.path()))?;
    let mut remaining = length.unwrap_or(u64::MAX);
    let mut position = offset;
    let mut buf = vec![0u8; registry.options().chunk_size];
    let mut stdout = tokio::io::stdout();

    while remaining > 0 {
        let want = (buf.len() as u64).min(remaining) as usize;
        let n = proxy.read(position, want, &mut buf).await?;
        if n == 0 {
            break;
        }
        stdout.write_all(&buf[..n]).await?;
        position += n as u64;
        remaining -= n as u64;
    }
    stdout.flush().await?;
    proxy.release();
    Ok(())
}

async fn pack(registry: &ArchiveRegistry, key: &ArchiveKey, inputs: Vec<PathBuf>) -> Result<()> {
    let chunk_size = registry.options().chunk_size;
    let mut pending: Vec<(ArchiveId, PathBuf)> = inputs.into_iter().map(|p| (key.root(), p)).collect();
    pending.reverse();

    while let Some((parent, path)) = pending.pop() {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            bail!("{} has no file name", path.display());
        };
        let metadata = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;

        if metadata.is_dir() {
            let dir = registry.create_entry(&parent, mime::DIRECTORY, &name).await?;
            let mut children = Vec::new();
            let mut read_dir = tokio::fs::read_dir(&path).await?;
            while let Some(child) = read_dir.next_entry().await? {
                children.push(child.path());
            }
            children.sort();
            pending.extend(children.into_iter().rev().map(|child| (dir.clone(), child)));
        } else {
            let id = registry
                .create_entry(&parent, mime::for_path(&name, false), &name)
                .await?;
            let mut writer = registry.open_for_write(&id).await?;
            let input = tokio::fs::File::open(&path).await?;
            writer.write_from(input, chunk_size).await?;
            let size = writer.finish().await?;
            println!("  adding: {} ({})", id.path(), format_size(size));
        }
    }
    Ok(())
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}

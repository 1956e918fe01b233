//! Offline corpus tool: chunks a paged markdown export into a JSON chunk array.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use manualchat_backend::core::config::defaults::{DEFAULT_OVERLAP, DEFAULT_SPLIT_COUNT};
use manualchat_backend::rag::chunker::split_paged_markdown;
use manualchat_backend::rag::{Chunker, ChunkerConfig};

#[derive(Parser)]
#[command(name = "manualchat-corpus", version, about = "Chunk a paged markdown manual export")]
struct Cli {
    /// Markdown export with `# Page <n>` headers.
    input: PathBuf,

    /// Where to write the chunk array.
    output: PathBuf,

    /// Base URL or directory of rendered page images (`page_<n>.jpg`).
    #[arg(long)]
    page_images: Option<String>,

    /// Segments per image-free page.
    #[arg(long, default_value_t = DEFAULT_SPLIT_COUNT)]
    split_count: usize,

    /// Characters shared by adjacent segments.
    #[arg(long, default_value_t = DEFAULT_OVERLAP)]
    overlap: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let text = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("Failed to read {}", cli.input.display()))?;

    let pages = split_paged_markdown(&text);
    if pages.is_empty() {
        anyhow::bail!("No `# Page` sections found in {}", cli.input.display());
    }

    let chunker = Chunker::new(ChunkerConfig {
        split_count: cli.split_count,
        overlap: cli.overlap,
        page_image_base: cli.page_images,
    });
    let chunks = chunker.chunk_pages(&pages);

    let body = serde_json::to_vec_pretty(&chunks)?;
    std::fs::write(&cli.output, body)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;

    tracing::info!(
        "Wrote {} chunks from {} pages to {}",
        chunks.len(),
        pages.len(),
        cli.output.display()
    );
    Ok(())
}

//! sizemap - where did the disk space go?
//!
//! Usage:
//!   sizemap scan [PATH]      Scan and show the size tree
//!   sizemap space [PATH]     Show capacity of the volume holding PATH
//!   sizemap --help           Show help

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Context, Result};
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use sizemap_cache::DiskAnalyzer;
use sizemap_core::{ScanConfig, ScanResult, TreeNode};

#[derive(Parser)]
#[command(
    name = "sizemap",
    version,
    about = "Directory size analytics",
    long_about = "sizemap walks a directory tree, totals sizes and entry counts \
                  per directory, and prints the largest entries first."
)]
struct Cli {
    /// Log debug output to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan a directory and show its size tree
    Scan {
        /// Path to scan
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Levels below the root to show
        #[arg(short, long, default_value = "1")]
        depth: usize,

        /// Also show the children of these subdirectories
        #[arg(short, long)]
        expand: Vec<PathBuf>,

        /// Print JSON instead of a tree
        #[arg(long)]
        json: bool,

        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout: u64,

        /// Worker threads (0 = one per core)
        #[arg(long, default_value = "0")]
        threads: usize,

        /// Always walk directories, never read the volume table
        #[arg(long)]
        no_fast_path: bool,
    },

    /// Show total, used and free space of the volume holding a path
    Space {
        /// Path on the volume
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Scan {
            path,
            depth,
            expand,
            json,
            timeout,
            threads,
            no_fast_path,
        } => {
            let config = ScanConfig::builder()
                .root(path.clone())
                .initial_depth(depth)
                .timeout(Duration::from_secs(timeout))
                .threads(threads)
                .fast_path(!no_fast_path)
                .build()
                .context("Invalid scan options")?;
            run_scan(config, &path, &expand, json, cli.verbose).await?;
        }
        Command::Space { path, json } => {
            run_space(&path, json)?;
        }
    }

    Ok(())
}

/// Logs go to stderr so JSON on stdout stays clean.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run_scan(
    config: ScanConfig,
    path: &Path,
    expand: &[PathBuf],
    json: bool,
    verbose: bool,
) -> Result<()> {
    let analyzer = DiskAnalyzer::new(config).context("Failed to start analyzer")?;

    if !json {
        eprintln!("Scanning {}...", path.display());
    }
    let result = analyzer.scan(path).await.context("Scan failed")?;

    let mut expansions = Vec::with_capacity(expand.len());
    for sub in expand {
        let target = if sub.is_absolute() {
            sub.clone()
        } else {
            result.root_path.join(sub)
        };
        debug!(path = %target.display(), "expanding");
        let children = analyzer
            .get_children(&target)
            .with_context(|| format!("Cannot expand {}", sub.display()))?;
        expansions.push((target, children));
    }

    if json {
        let expanded: Vec<_> = expansions
            .iter()
            .map(|(path, children)| json!({ "path": path, "children": children }))
            .collect();
        let out = json!({ "result": result, "expanded": expanded });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    print_summary(&result);
    print_node(&result.tree, 0, true);

    for (path, children) in &expansions {
        println!();
        println!(" {}", path.display());
        for child in children {
            print_node(child, 1, false);
        }
    }

    if result.has_warnings() {
        println!();
        println!("{} warning(s) during scan", result.warnings.len());
        if verbose {
            for warning in &result.warnings {
                println!("  {:?}: {}", warning.kind, warning.message);
            }
        }
    }

    Ok(())
}

fn run_space(path: &Path, json: bool) -> Result<()> {
    let analyzer = DiskAnalyzer::new(ScanConfig::default()).context("Failed to start analyzer")?;
    let info = analyzer
        .get_space_info(path)
        .with_context(|| format!("No volume information for {}", path.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!(" {}", path.display());
    println!("   total     {:>12}", format_size(info.total));
    println!(
        "   used      {:>12}  {:>5.1}% {}",
        format_size(info.used),
        info.used_percent(),
        make_bar(info.used_percent() / 100.0, 20)
    );
    println!("   available {:>12}", format_size(info.available));
    Ok(())
}

fn print_summary(result: &ScanResult) {
    let tree = &result.tree;
    println!();
    println!("{}", "─".repeat(72));
    println!(
        " {} - {}",
        result.root_path.display(),
        format_size(result.total_size())
    );
    println!(
        " {} files, {} directories, {} entries",
        tree.file_count, tree.directory_count, tree.entry_count
    );
    println!(
        " Scanned in {:.2}s ({:?})",
        result.scan_duration.as_secs_f64(),
        result.strategy
    );
    println!("{}", "─".repeat(72));
    println!();
}

/// Print a node and whatever part of its subtree is materialized.
fn print_node(node: &TreeNode, depth: usize, is_root: bool) {
    let indent = "  ".repeat(depth);
    let name = if is_root {
        node.path.display().to_string()
    } else if node.is_dir() {
        format!("{}/", node.name)
    } else {
        node.name.to_string()
    };
    let marker = match (node.is_dir(), node.children_loaded) {
        (true, true) => "▼ ",
        (true, false) => "▶ ",
        _ => "  ",
    };

    println!(
        "{}{}{:<40} {:>10} {:>5.1}% {} {}",
        indent,
        marker,
        truncate(&name, 40),
        format_size(node.size_bytes),
        node.percent_of_parent,
        make_bar(node.percent_of_parent / 100.0, 10),
        format_mtime(node.last_modified_time),
    );

    for child in &node.children {
        print_node(child, depth + 1, false);
    }
}

/// Create a simple ASCII bar.
fn make_bar(ratio: f64, width: usize) -> String {
    let filled = ((ratio * width as f64).round() as usize).min(width);
    let empty = width - filled;
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

fn format_mtime(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .filter(|_| secs > 0)
        .map(|time| time.with_timezone(&Local).format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Truncate a string to max length.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 1).collect();
        format!("{head}…")
    }
}

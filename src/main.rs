use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};

use bead::core::box_index::IndexUpdate;
use bead::core::query::search_boxes;
use bead::core::{Bead, Box as BeadBox, Workspace};
use bead::tech::timestamp;
use bead::web::Sketch;

#[derive(Parser)]
#[command(
    name = "bead",
    version,
    about = "Manage immutable, content-addressed bead archives"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Freeze a workspace into a box
    Freeze {
        /// Workspace directory
        workspace: PathBuf,
        /// Box directory
        box_dir: PathBuf,
    },
    /// Rebuild a box's index from its archive files
    Rebuild { box_dir: PathBuf },
    /// Reconcile a box's index with its directory
    Sync { box_dir: PathBuf },
    /// Query beads in one or more boxes
    Search(SearchArgs),
    /// Show the provenance web of one or more boxes
    Web {
        box_dirs: Vec<PathBuf>,
        /// Keep only clusters reachable from these cluster names
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
        /// Keep only clusters leading to these cluster names
        #[arg(long, value_delimiter = ',')]
        sinks: Vec<String>,
    },
}

#[derive(Args)]
struct SearchArgs {
    box_dirs: Vec<PathBuf>,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    kind: Option<String>,
    #[arg(long)]
    content_id: Option<String>,
    #[arg(long)]
    newer_than: Option<String>,
    #[arg(long)]
    older_than: Option<String>,
    #[arg(long)]
    at_or_newer: Option<String>,
    #[arg(long)]
    at_or_older: Option<String>,
    /// Keep one bead per content id
    #[arg(long)]
    unique: bool,
    #[arg(long, value_enum, default_value_t = Select::All)]
    select: Select,
}

#[derive(Clone, Copy, ValueEnum)]
enum Select {
    All,
    First,
    Oldest,
    Newest,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Command::Freeze { workspace, box_dir } => freeze(&workspace, &box_dir),
        Command::Rebuild { box_dir } => {
            let bead_box = open_box(&box_dir)?;
            drain_progress(bead_box.rebuild_index()?)
        }
        Command::Sync { box_dir } => {
            let bead_box = open_box(&box_dir)?;
            drain_progress(bead_box.sync_index()?)
        }
        Command::Search(args) => search(args),
        Command::Web {
            box_dirs,
            sources,
            sinks,
        } => web(&box_dirs, &sources, &sinks),
    }
}

fn open_box(directory: &Path) -> Result<BeadBox> {
    let name = directory
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("box")
        .to_string();
    BeadBox::new(name, directory)
        .with_context(|| format!("cannot open box at {}", directory.display()))
}

fn freeze(workspace_dir: &Path, box_dir: &Path) -> Result<()> {
    let workspace = Workspace::open(workspace_dir)
        .with_context(|| format!("cannot open workspace at {}", workspace_dir.display()))?;
    let bead_box = open_box(box_dir)?;
    let path = bead_box.store(&workspace, &timestamp::timestamp())?;
    println!("Frozen: {}", path.display());
    Ok(())
}

fn drain_progress(update: IndexUpdate) -> Result<()> {
    let mut errors = 0;
    for step in update {
        let progress = step?;
        errors = progress.error_count;
        match &progress.latest_error {
            Some(error) => println!(
                "[{}/{}] {}: ERROR: {}",
                progress.processed,
                progress.total,
                progress.path.display(),
                error
            ),
            None => println!(
                "[{}/{}] {}",
                progress.processed,
                progress.total,
                progress.path.display()
            ),
        }
    }
    if errors > 0 {
        println!("Done with {} errors", errors);
    }
    Ok(())
}

fn search(args: SearchArgs) -> Result<()> {
    let mut boxes = Vec::new();
    for directory in &args.box_dirs {
        boxes.push(open_box(directory)?);
    }

    let mut search = search_boxes(&boxes);
    if let Some(name) = &args.name {
        search = search.by_name(name)?;
    }
    if let Some(kind) = &args.kind {
        search = search.by_kind(kind)?;
    }
    if let Some(content_id) = &args.content_id {
        search = search.by_content_id(content_id)?;
    }
    if let Some(time) = &args.newer_than {
        search = search.newer_than(timestamp::parse_timestamp(time)?);
    }
    if let Some(time) = &args.older_than {
        search = search.older_than(timestamp::parse_timestamp(time)?);
    }
    if let Some(time) = &args.at_or_newer {
        search = search.at_or_newer(timestamp::parse_timestamp(time)?);
    }
    if let Some(time) = &args.at_or_older {
        search = search.at_or_older(timestamp::parse_timestamp(time)?);
    }
    if args.unique {
        search = search.unique();
    }

    match args.select {
        Select::All => {
            for bead in search.all()? {
                print_bead(&bead);
            }
        }
        Select::First => print_bead(&search.first()?),
        Select::Oldest => print_bead(&search.oldest()?),
        Select::Newest => print_bead(&search.newest()?),
    }
    Ok(())
}

fn print_bead(bead: &Bead) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        bead.name,
        bead.freeze_time_str,
        bead.box_name,
        bead.kind,
        &bead.content_id.as_str()[..bead.content_id.as_str().len().min(16)]
    );
}

fn web(box_dirs: &[PathBuf], sources: &[String], sinks: &[String]) -> Result<()> {
    let mut beads = Vec::new();
    for directory in box_dirs {
        let bead_box = open_box(directory)?;
        beads.extend(bead_box.all_beads()?);
    }

    let mut sketch = Sketch::from_beads(&beads)?;
    if !sources.is_empty() {
        let names: Vec<&str> = sources.iter().map(String::as_str).collect();
        sketch = sketch.set_sources(&names);
    }
    if !sinks.is_empty() {
        let names: Vec<&str> = sinks.iter().map(String::as_str).collect();
        sketch = sketch.set_sinks(&names);
    }

    let all_fresh = sketch.color_beads()?;
    for name in sketch.cluster_names() {
        if let Some(head) = sketch.head_of(&name) {
            println!("{}\t{}\t{}", name, head.freshness(), head.freeze_time_str);
        }
    }
    if !all_fresh {
        println!("(some clusters are not up to date)");
    }
    Ok(())
}

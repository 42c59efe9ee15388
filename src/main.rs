use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use bundlemerge::bundle_store::{
    AncestorSearch, BoundedAncestorSearch, BundleId, BundleSpec, BundleStore, DirBundleStore,
    DirCollection, ResourceCollection, Retention,
};
use bundlemerge::config::BundleMergeConfig;
use bundlemerge::merge::{BundleMergeReport, MergeCoordinator, MergeSources};
use bundlemerge::telemetry;

/// Three-way merge for forked configuration bundles
///
/// A bundle is a flat set of files (data files, snapshots, settings, a page
/// hierarchy). When two devices edit the same bundle independently, each
/// edit becomes a fork. bundlemerge reconciles forks against their nearest
/// shared ancestor and publishes one merge snapshot descending from all of
/// them.
///
/// QUICK START:
///
///   # Publish a directory as a bundle
///   bundlemerge import --store ./store --name data ./edited
///
///   # Merge every fork you have
///   bundlemerge merge --store ./store laptop-1718000000000-data phone-1718000500000-data
///
///   # Merge three plain directories without a store
///   bundlemerge merge-dirs ./base ./mine ./theirs ./out
///
/// Logging goes to stderr; set BUNDLEMERGE_LOG=info (or debug) for detail
/// and BUNDLEMERGE_LOG_FORMAT=json for machine-readable output.
#[derive(Parser)]
#[command(name = "bundlemerge")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'bundlemerge <command> --help' for more information on a specific command.")]
struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(long, global = true, env = "BUNDLEMERGE_CONFIG", default_value = "bundlemerge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge forks of one bundle and publish the result
    ///
    /// Prints the new bundle ID. With a single fork, prints that fork's ID
    /// and publishes nothing.
    Merge {
        /// Bundle store directory
        #[arg(long)]
        store: PathBuf,

        /// Fork IDs (<device>-<created-millis>-<name>)
        #[arg(required = true)]
        forks: Vec<BundleId>,

        /// Print the full merge outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Three-way merge of plain directories
    ///
    /// PARENT may be missing, in which case every file counts as added.
    #[command(name = "merge-dirs")]
    MergeDirs {
        /// Common ancestor directory
        parent: PathBuf,
        /// Earlier fork
        first: PathBuf,
        /// Later fork (wins unresolvable conflicts)
        second: PathBuf,
        /// Output directory; must be missing or empty
        dest: PathBuf,

        /// Print the merge report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Find the nearest shared ancestor of two bundles
    Ancestor {
        /// Bundle store directory
        #[arg(long)]
        store: PathBuf,

        /// First bundle ID
        a: BundleId,

        /// Second bundle ID
        b: BundleId,

        /// Generations to search from each side (default from config)
        #[arg(long)]
        depth: Option<usize>,
    },

    /// Publish a directory as a new bundle
    Import {
        /// Bundle store directory
        #[arg(long)]
        store: PathBuf,

        /// Logical bundle name
        #[arg(long)]
        name: String,

        /// Parent bundle IDs
        #[arg(long = "parent")]
        parents: Vec<BundleId>,

        /// Directory whose files become the bundle content
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    telemetry::init();
    let cli = Cli::parse();
    let config = BundleMergeConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    match cli.command {
        Commands::Merge { store, forks, json } => run_merge(&config, &store, &forks, json),
        Commands::MergeDirs {
            parent,
            first,
            second,
            dest,
            json,
        } => run_merge_dirs(&config, &parent, &first, &second, &dest, json),
        Commands::Ancestor { store, a, b, depth } => run_ancestor(&config, &store, &a, &b, depth),
        Commands::Import {
            store,
            name,
            parents,
            dir,
        } => run_import(&config, &store, &name, parents, &dir),
    }
}

fn open_store(config: &BundleMergeConfig, root: &Path) -> Result<DirBundleStore> {
    DirBundleStore::open(root, &config.store.device)
        .with_context(|| format!("opening bundle store at {}", root.display()))
}

fn run_merge(config: &BundleMergeConfig, root: &Path, forks: &[BundleId], json: bool) -> Result<()> {
    let mut store = open_store(config, root)?;
    let search = BoundedAncestorSearch;
    let outcome = MergeCoordinator::with_search(&mut store, &search)
        .merger(config.merger())
        .max_depth(config.merge.ancestor_search_depth)
        .scratch_root(root)
        .merge_forks(forks)
        .context("merge failed; nothing was published")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    println!("{}", outcome.bundle);
    for round in &outcome.rounds {
        match &round.ancestor {
            Some(ancestor) => eprintln!("merged {} (ancestor {ancestor})", round.fork),
            None => eprintln!("merged {} (no shared ancestor)", round.fork),
        }
        print_report(&round.report);
    }
    Ok(())
}

fn run_merge_dirs(
    config: &BundleMergeConfig,
    parent: &Path,
    first: &Path,
    second: &Path,
    dest: &Path,
    json: bool,
) -> Result<()> {
    for dir in [first, second] {
        anyhow::ensure!(dir.is_dir(), "{} is not a directory", dir.display());
    }
    ensure_empty_dest(dest)?;
    let parent = DirCollection::read_only(parent);
    let first = DirCollection::read_only(first);
    let second = DirCollection::read_only(second);

    // Build the result beside dest so a failed merge leaves nothing behind.
    let staging_root = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(staging_root)?;
    let staging = tempfile::Builder::new()
        .prefix(".bundlemerge-")
        .tempdir_in(staging_root)
        .with_context(|| format!("creating staging directory in {}", staging_root.display()))?;
    let staged = staging.path().join("out");
    let mut out = DirCollection::writable(&staged);

    let report = config
        .merger()
        .merge(
            &MergeSources {
                parent: &parent,
                first: &first,
                second: &second,
            },
            &mut out,
        )
        .with_context(|| format!("merging into {}", dest.display()))?;

    fs::create_dir_all(&staged)?;
    if dest.exists() {
        fs::remove_dir(dest).with_context(|| format!("replacing {}", dest.display()))?;
    }
    fs::rename(&staged, dest).with_context(|| format!("moving result to {}", dest.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// `dest` must be missing or an empty directory.
fn ensure_empty_dest(dest: &Path) -> Result<()> {
    match fs::read_dir(dest) {
        Ok(mut entries) => {
            anyhow::ensure!(
                entries.next().is_none(),
                "{} is not empty; choose a new output directory",
                dest.display()
            );
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("{} is not a usable output directory", dest.display())),
    }
}

fn run_ancestor(
    config: &BundleMergeConfig,
    root: &Path,
    a: &BundleId,
    b: &BundleId,
    depth: Option<usize>,
) -> Result<()> {
    let store = open_store(config, root)?;
    let depth = depth.unwrap_or(config.merge.ancestor_search_depth);
    match BoundedAncestorSearch.find_shared_ancestor(&store, a, b, depth)? {
        Some(ancestor) => println!("{ancestor}"),
        None => println!("none"),
    }
    Ok(())
}

fn run_import(
    config: &BundleMergeConfig,
    root: &Path,
    name: &str,
    parents: Vec<BundleId>,
    dir: &Path,
) -> Result<()> {
    let mut store = open_store(config, root)?;
    for parent in &parents {
        store
            .manifest(parent)
            .with_context(|| format!("parent {parent} is not in the store"))?;
    }
    let source = DirCollection::read_only(dir);
    let filenames = source.list_names()?;
    anyhow::ensure!(!filenames.is_empty(), "{} has no files to import", dir.display());
    let id = store.store_bundle(BundleSpec {
        name,
        source: &source,
        filenames,
        parents,
        retention: Retention::Standard,
    })?;
    println!("{id}");
    Ok(())
}

fn print_report(report: &BundleMergeReport) {
    for file in report.content_merged() {
        eprintln!("  merged      {file}");
    }
    for file in &report.overwritten {
        eprintln!("  overwritten {file} (no handler; kept second)");
    }
    if report.merged.is_empty() {
        eprintln!("  no conflicting files");
    }
}

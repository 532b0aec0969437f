use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use treediff_common::{load_config, AbortPolicy, ContinuePolicy, ErrorPolicy};
use treediff_core::{
    is_snapshot, read_snapshot, AlignmentAnalyser, CaptureInfo, CompareOptions,
    ComparisonDirNode, DigestKind, DirNode, LocalTreeBuilder, SnapshotInfo, SnapshotWriter,
    TreeComparator, ZipTreeBuilder,
};

#[derive(Parser)]
#[command(name = "treediff")]
#[command(author = "TreeDiff Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Directory tree comparison with snapshot support", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two trees (directories, zip archives or snapshots)
    Compare {
        /// First tree path
        left: PathBuf,

        /// Second tree path
        right: PathBuf,

        /// Match entry names case-insensitively
        #[arg(short = 'i', long)]
        ignore_case: bool,

        /// Allow line-ending-insensitive comparison of text files
        #[arg(short = 't', long)]
        text: bool,

        /// Follow symbolic links
        #[arg(short = 'L', long)]
        follow_symlinks: bool,

        /// Keep going past unreadable files instead of aborting
        #[arg(short = 'k', long)]
        continue_on_error: bool,

        /// Search both trees for the best-matching subtrees before comparing
        #[arg(short = 'a', long)]
        align: bool,

        /// Maximum descent depth for the alignment search
        #[arg(long)]
        max_depth: Option<usize>,

        /// Show only differences (hide identical entries)
        #[arg(short = 'd', long)]
        diff_only: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Disable ANSI colors in output
        #[arg(long)]
        no_color: bool,
    },

    /// Capture a tree into a snapshot file
    Snapshot {
        /// Tree to capture (directory or zip archive)
        path: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Digest to record (can be specified multiple times)
        #[arg(long = "digest")]
        digests: Vec<String>,

        /// Free-form comment stored in the snapshot
        #[arg(short = 'c', long)]
        comment: Option<String>,

        /// Follow symbolic links
        #[arg(short = 'L', long)]
        follow_symlinks: bool,
    },

    /// Show the metadata of a snapshot file
    Info {
        /// Snapshot file
        file: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    // Logs go to stderr so JSON and snapshot output stay clean on stdout
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Compare {
            left,
            right,
            ignore_case,
            text,
            follow_symlinks,
            continue_on_error,
            align,
            max_depth,
            diff_only,
            json,
            no_color,
        } => run_compare(CompareArgs {
            left,
            right,
            ignore_case,
            text,
            follow_symlinks,
            continue_on_error,
            align,
            max_depth,
            diff_only,
            json,
            no_color,
        }),
        Commands::Snapshot {
            path,
            output,
            digests,
            comment,
            follow_symlinks,
        } => run_snapshot(path, output, digests, comment, follow_symlinks),
        Commands::Info { file, json } => run_info(file, json),
    };

    match outcome {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e}");
            std::process::exit(2);
        }
    }
}

struct CompareArgs {
    left: PathBuf,
    right: PathBuf,
    ignore_case: bool,
    text: bool,
    follow_symlinks: bool,
    continue_on_error: bool,
    align: bool,
    max_depth: Option<usize>,
    diff_only: bool,
    json: bool,
    no_color: bool,
}

#[derive(Serialize)]
struct CompareReport<'a> {
    left: String,
    right: String,
    ignore_case: bool,
    text_compare: bool,
    aligned_left: Option<String>,
    aligned_right: Option<String>,
    same: bool,
    tree: &'a ComparisonDirNode,
}

fn run_compare(args: CompareArgs) -> anyhow::Result<i32> {
    if !args.left.exists() {
        anyhow::bail!("path does not exist: {}", args.left.display());
    }
    if !args.right.exists() {
        anyhow::bail!("path does not exist: {}", args.right.display());
    }

    let config = load_config(false)?.config;
    let options = CompareOptions {
        ignore_case: args.ignore_case || config.ignore_case,
        text_compare: args.text || config.text_compare,
    };
    let follow_symlinks = args.follow_symlinks || config.follow_symlinks;
    let max_depth = args.max_depth.unwrap_or(config.align_max_depth);

    let abort = AbortPolicy::new();
    let keep_going = ContinuePolicy::new();
    let policy: &dyn ErrorPolicy = if args.continue_on_error {
        &keep_going
    } else {
        &abort
    };

    info!("Comparing:");
    info!("  Left:  {}", args.left.display());
    info!("  Right: {}", args.right.display());

    let (left_tree, _) = build_tree(&args.left, follow_symlinks, policy)?;
    let (right_tree, _) = build_tree(&args.right, follow_symlinks, policy)?;

    let (left_root, right_root) = if args.align {
        let analyser = AlignmentAnalyser::new(options.ignore_case);
        let left_path = analyser.best_sub_tree(max_depth, &left_tree, &right_tree);
        let aligned_left = left_path.last().copied().unwrap_or(&left_tree);
        let right_path = analyser.best_sub_tree(max_depth, &right_tree, aligned_left);
        let aligned_right = right_path.last().copied().unwrap_or(&right_tree);
        if left_path.len() > 1 {
            info!(
                "aligned left side at {}",
                sub_tree_path(&left_path)
            );
        }
        if right_path.len() > 1 {
            info!(
                "aligned right side at {}",
                sub_tree_path(&right_path)
            );
        }
        (aligned_left, aligned_right)
    } else {
        (&left_tree, &right_tree)
    };

    let result = TreeComparator::new(options, policy)
        .compare(Some(left_root), Some(right_root))?;

    if policy.encountered_error() {
        warn!("some entries could not be compared and were counted as different");
    }

    if args.json {
        let report = CompareReport {
            left: args.left.display().to_string(),
            right: args.right.display().to_string(),
            ignore_case: options.ignore_case,
            text_compare: options.text_compare,
            aligned_left: args
                .align
                .then(|| left_root.name.clone())
                .filter(|name| *name != left_tree.name),
            aligned_right: args
                .align
                .then(|| right_root.name.clone())
                .filter(|name| *name != right_tree.name),
            same: result.are_same,
            tree: &result,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let use_color = !args.no_color && std::io::stdout().is_terminal();
        let mut counts = Counts::default();
        print_dir(&result, "", args.diff_only, use_color, &mut counts);
        println!();
        println!(
            "{} same, {} different, {} only left, {} only right",
            counts.same, counts.different, counts.only_left, counts.only_right
        );
    }

    Ok(if result.are_same { 0 } else { 1 })
}

#[derive(Default)]
struct Counts {
    same: u64,
    different: u64,
    only_left: u64,
    only_right: u64,
}

fn print_dir(
    node: &ComparisonDirNode,
    prefix: &str,
    diff_only: bool,
    use_color: bool,
    counts: &mut Counts,
) {
    for dir in &node.dirs {
        let name = present_name(&dir.name1, &dir.name2);
        let path = join_path(prefix, name);
        if !dir.present_on_both() {
            print_entry(&path, dir.missing2, use_color, counts);
        }
        print_dir(dir, &path, diff_only, use_color, counts);
    }
    for file in &node.files {
        let name = present_name(&file.name1, &file.name2);
        let path = join_path(prefix, name);
        if file.present_on_both() {
            if file.are_same {
                counts.same += 1;
                if !diff_only {
                    print_status(&path, "==", "\x1b[32m", use_color);
                }
            } else {
                counts.different += 1;
                print_status(&path, "!=", "\x1b[31m", use_color);
            }
        } else {
            print_entry(&path, file.missing2, use_color, counts);
        }
    }
}

fn print_entry(path: &str, missing2: bool, use_color: bool, counts: &mut Counts) {
    if missing2 {
        counts.only_left += 1;
        print_status(path, "<<", "\x1b[33m", use_color);
    } else {
        counts.only_right += 1;
        print_status(path, ">>", "\x1b[34m", use_color);
    }
}

fn print_status(path: &str, symbol: &str, color: &str, use_color: bool) {
    if use_color {
        println!("{color}{symbol}\x1b[0m {path}");
    } else {
        println!("{symbol} {path}");
    }
}

fn present_name<'a>(name1: &'a str, name2: &'a str) -> &'a str {
    if name1.is_empty() {
        name2
    } else {
        name1
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

fn sub_tree_path(path: &[&DirNode]) -> String {
    path.iter()
        .map(|d| d.name.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build a tree from a path, picking the source kind by inspection:
/// directories scan the filesystem, `.zip` files open as archives, and
/// anything recognized as a snapshot is deserialized. Other files become
/// single-entry trees.
fn build_tree(
    path: &Path,
    follow_symlinks: bool,
    policy: &dyn ErrorPolicy,
) -> anyhow::Result<(DirNode, Option<SnapshotInfo>)> {
    if path.is_dir() {
        let tree = LocalTreeBuilder::new(follow_symlinks).build(path, policy)?;
        return Ok((tree, None));
    }
    if path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
    {
        let tree = ZipTreeBuilder::new().build(path, policy)?;
        return Ok((tree, None));
    }
    if is_snapshot(fs::File::open(path)?)? {
        let (tree, info) = read_snapshot(fs::File::open(path)?)?;
        info!(
            "loaded snapshot of {:?} captured {} by {}@{}",
            tree.name, info.time, info.user, info.host
        );
        return Ok((tree, Some(info)));
    }
    let tree = LocalTreeBuilder::new(follow_symlinks).build(path, policy)?;
    Ok((tree, None))
}

fn run_snapshot(
    path: PathBuf,
    output: Option<PathBuf>,
    digests: Vec<String>,
    comment: Option<String>,
    follow_symlinks: bool,
) -> anyhow::Result<i32> {
    let config = load_config(false)?.config;
    let follow_symlinks = follow_symlinks || config.follow_symlinks;
    let tokens = if digests.is_empty() {
        config.snapshot_digests
    } else {
        digests
    };
    let kinds = tokens
        .iter()
        .map(|token| DigestKind::parse(token))
        .collect::<treediff_common::Result<Vec<_>>>()?;

    let policy = AbortPolicy::new();
    let (tree, _) = build_tree(&path, follow_symlinks, &policy)?;

    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let mut info = CaptureInfo::new(user, host);
    if let Some(comment) = comment {
        info = info.with_comment(comment);
    }

    let writer = SnapshotWriter::new(kinds);
    match output {
        Some(out_path) => {
            let file = fs::File::create(&out_path)?;
            writer.write(&tree, &info, std::io::BufWriter::new(file))?;
            info!("snapshot written to {}", out_path.display());
        }
        None => {
            let stdout = std::io::stdout();
            writer.write(&tree, &info, stdout.lock())?;
            println!();
        }
    }
    Ok(0)
}

#[derive(Serialize)]
struct InfoReport {
    captured: String,
    user: String,
    host: String,
    comment: Option<String>,
    digests: Vec<String>,
    root: String,
    dir_count: u64,
    file_count: u64,
}

fn run_info(file: PathBuf, json: bool) -> anyhow::Result<i32> {
    let (tree, info) = read_snapshot(fs::File::open(&file)?)?;
    let (dir_count, file_count) = count_entries(&tree);

    if json {
        let report = InfoReport {
            captured: info.time.to_rfc3339(),
            user: info.user,
            host: info.host,
            comment: info.comment,
            digests: info.digests.iter().map(|d| d.as_str().to_string()).collect(),
            root: tree.name,
            dir_count,
            file_count,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Snapshot:  {}", file.display());
        println!("Captured:  {}", info.time);
        println!("By:        {}@{}", info.user, info.host);
        if let Some(comment) = &info.comment {
            println!("Comment:   {comment}");
        }
        let digests: Vec<&str> = info.digests.iter().map(|d| d.as_str()).collect();
        println!(
            "Digests:   {}",
            if digests.is_empty() {
                "none".to_string()
            } else {
                digests.join(", ")
            }
        );
        println!("Root:      {:?}", tree.name);
        println!("Contents:  {dir_count} directories, {file_count} files");
    }
    Ok(0)
}

fn count_entries(dir: &DirNode) -> (u64, u64) {
    let mut dirs = dir.dirs.len() as u64;
    let mut files = dir.files.len() as u64;
    for sub in &dir.dirs {
        let (d, f) = count_entries(sub);
        dirs += d;
        files += f;
    }
    (dirs, files)
}

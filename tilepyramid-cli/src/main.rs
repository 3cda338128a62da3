//! Command-line driver for the `tilepyramid` partitioner.
//!
//! Parses arguments, resolves an extent (from `--limits`, a scan, or both for a mixed
//! xy/z octree run) and a dictionary from the input files, then hands both to
//! [`tilepyramid::Partitioner::run`] to drive the actual build. This binary only does argument
//! parsing, extent/dictionary resolution, logging setup, and summary reporting; the insert /
//! flush / drain / flush sequencing lives in the library crate.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tilepyramid::{
    feather_source, Dimensionality, Extent, ExtentOracle, FixedExtent, Partitioner, RecordSource,
    ScanningExtentOracle, DEFAULT_MAX_DICTIONARY_SIZE,
};

/// Build a spatial tile pyramid from one or more pre-built Arrow IPC point files.
#[derive(Parser, Debug)]
#[command(name = "tilepyramid", about, long_about = None)]
struct Args {
    /// Input Arrow IPC ("Feather v2") files, read in the order given.
    #[arg(short = 'f', long = "files", value_name = "PATH", required = true, num_args = 1..)]
    files: Vec<PathBuf>,

    /// Destination directory for the tile pyramid.
    #[arg(short = 'd', long = "destination", value_name = "DIR")]
    destination: PathBuf,

    /// Maximum rows held directly by any non-root tile.
    #[arg(long = "tile-size", default_value_t = 50_000)]
    tile_size: usize,

    /// Maximum rows held directly by the root tile.
    #[arg(long = "first-tile-size", default_value_t = 1_000)]
    first_tile_size: usize,

    /// Maximum number of simultaneously open memory buffers and overflow files.
    #[arg(long = "max-files", default_value_t = 200)]
    max_files: usize,

    /// Standard deviation of Gaussian jitter applied to coordinates before tiling, to keep
    /// exactly-coincident points from forcing an unbounded-depth spine. Zero disables jitter.
    #[arg(long = "jitter", default_value_t = 0.0)]
    jitter: f32,

    /// Explicit `x0 y0 x1 y1` bounds; omit to compute the extent from the input data.
    #[arg(long = "limits", value_names = ["X0", "Y0", "X1", "Y1"], num_args = 4)]
    limits: Option<Vec<f32>>,

    /// Build an octree (3D) pyramid instead of a quadtree. Requires a `z` column in the input.
    #[arg(long = "octree")]
    octree: bool,

    /// Maximum number of distinct codes per dictionary-typed column (including the "Other"
    /// sentinel). Pass 0 to skip global dictionary recoding entirely.
    #[arg(long = "max-dictionary-size", default_value_t = DEFAULT_MAX_DICTIONARY_SIZE)]
    max_dictionary_size: usize,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease log verbosity (repeatable).
    #[arg(short = 'q', long = "quiet", action = clap::ArgAction::Count)]
    quiet: u8,
}

fn init_logging(verbose: u8, quiet: u8) {
    let level = match i16::from(verbose) - i16::from(quiet) {
        ..=-1 => log::LevelFilter::Error,
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level.to_string())).init();
}

fn run(args: Args) -> tilepyramid::TilerResult<Vec<(String, u64)>> {
    let dims = if args.octree { Dimensionality::Oct } else { Dimensionality::Quad };
    let axes = dims.axes();

    let source = feather_source(&args.files);
    let batches = Box::new(source).into_batches()?;

    // `--limits` only ever carries x/y bounds; an octree run still needs a z bound, which
    // always comes from a scan regardless of whether x/y were given explicitly.
    let extent = match args.limits {
        Some(bounds) => {
            let xy = FixedExtent(Extent::new(&["x", "y"], &[(bounds[0], bounds[2]), (bounds[1], bounds[3])]));
            if dims == Dimensionality::Oct {
                let z_bounds = ScanningExtentOracle::new(&batches).compute(&["z"])?;
                Extent::new(
                    axes,
                    &[xy.0.get(0), xy.0.get(1), z_bounds.get(0)],
                )
            } else {
                xy.compute(axes)?
            }
        }
        None => {
            log::info!("no --limits given, scanning {} batches for extent", batches.len());
            ScanningExtentOracle::new(&batches).compute(axes)?
        }
    };
    log::info!("extent computed");

    let dictionary = if args.max_dictionary_size == 0 {
        tilepyramid::GlobalDictionary::default()
    } else {
        tilepyramid::GlobalDictionary::build_from_batches(&batches, args.max_dictionary_size)
    };

    Partitioner::run(
        args.destination,
        dims,
        args.first_tile_size,
        args.tile_size,
        args.max_files,
        args.jitter,
        batches,
        extent,
        dictionary,
    )
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(args) {
        Ok(summary) => {
            // `summary()` lists the root first, depth-first.
            let total_points = summary.first().map_or(0, |(_, n)| *n);
            log::info!("wrote {} tiles, {total_points} total points", summary.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("tile pyramid build failed: {e}");
            ExitCode::FAILURE
        }
    }
}

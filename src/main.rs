use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use niftyreg_bridge::config::load_config_or_default;
use niftyreg_bridge::host::{default_thresholds, StoredTransform, TransformStore, VolumeStore};
use niftyreg_bridge::io::{geometry_from_header, write_displacement_field, write_volume};
use niftyreg_bridge::logging::init_logging;
use niftyreg_bridge::pyramid::{compare_levels, compute_levels_with_floor, shape_label, LevelRow};
use niftyreg_bridge::transform::{encode, load_displacement_field, read_matrix_file, write_matrix_file};
use niftyreg_bridge::*;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "niftyreg")]
#[command(about = "Rigid, affine and non-linear image registration with NiftyReg")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a floating image onto a reference image
    Register {
        /// Reference (fixed) image
        #[arg(short, long)]
        reference: PathBuf,

        /// Floating (moving) image
        #[arg(short, long)]
        floating: PathBuf,

        /// rigid, affine or non-linear
        #[arg(short, long, default_value = "rigid")]
        algorithm: Algorithm,

        /// Highest pyramid level (coarsest)
        #[arg(long)]
        highest: Option<usize>,

        /// Lowest pyramid level (finest)
        #[arg(long)]
        lowest: Option<usize>,

        /// Reference intensity thresholds, e.g. `0,1200`
        #[arg(long, value_parser = parse_thresholds)]
        reference_thresholds: Option<ThresholdRange>,

        /// Floating intensity thresholds
        #[arg(long, value_parser = parse_thresholds)]
        floating_thresholds: Option<ThresholdRange>,

        /// Initial transform matrix file ("from parent" convention)
        #[arg(short, long)]
        initial: Option<PathBuf>,

        /// Name of the resampled output volume
        #[arg(long)]
        result_volume: Option<String>,

        /// Name of the output transform
        #[arg(long)]
        result_transform: Option<String>,

        /// Directory receiving the loaded results
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the command line without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the pyramid levels of one or two images
    Pyramid {
        #[arg(short, long)]
        reference: PathBuf,

        #[arg(short, long)]
        floating: Option<PathBuf>,

        #[arg(long)]
        highest: Option<usize>,

        #[arg(long)]
        lowest: Option<usize>,
    },

    /// Rebuild a displacement field from reg_f3d vector output
    Field {
        /// Raw vector file (256-byte header, float32 stream)
        #[arg(short, long)]
        vectors: PathBuf,

        /// Image whose grid the field lives on
        #[arg(short, long)]
        reference: PathBuf,

        /// Output NIfTI vector image
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Read a matrix file and print it in the tool's fixed-width format
    Matrix {
        #[arg(short, long)]
        input: PathBuf,

        /// Write the normalised matrix here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn parse_thresholds(value: &str) -> std::result::Result<ThresholdRange, String> {
    let (lower, upper) = value
        .split_once(',')
        .ok_or_else(|| format!("expected LOWER,UPPER, got '{}'", value))?;
    let parse = |s: &str| {
        s.trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid threshold '{}': {}", s, e))
    };
    Ok(ThresholdRange::new(parse(lower)?, parse(upper)?))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config_or_default(cli.config.as_deref());
    match cli.verbose {
        0 => {}
        1 => config.logging.global_level = "debug".to_string(),
        _ => config.logging.global_level = "trace".to_string(),
    }
    let _guard = init_logging(&config.logging)?;

    match cli.command {
        Commands::Register {
            reference,
            floating,
            algorithm,
            highest,
            lowest,
            reference_thresholds,
            floating_thresholds,
            initial,
            result_volume,
            result_transform,
            output_dir,
            dry_run,
        } => {
            let args = RegisterArgs {
                reference,
                floating,
                algorithm,
                highest,
                lowest,
                reference_thresholds,
                floating_thresholds,
                initial,
                result_volume,
                result_transform,
                output_dir,
                dry_run,
            };
            handle_register(&config, args)?;
        }
        Commands::Pyramid { reference, floating, highest, lowest } => {
            handle_pyramid(&config, &reference, floating.as_deref(), highest, lowest)?;
        }
        Commands::Field { vectors, reference, output } => {
            handle_field(&vectors, &reference, &output)?;
        }
        Commands::Matrix { input, output } => {
            handle_matrix(&input, output.as_deref())?;
        }
    }

    Ok(())
}

struct RegisterArgs {
    reference: PathBuf,
    floating: PathBuf,
    algorithm: Algorithm,
    highest: Option<usize>,
    lowest: Option<usize>,
    reference_thresholds: Option<ThresholdRange>,
    floating_thresholds: Option<ThresholdRange>,
    initial: Option<PathBuf>,
    result_volume: Option<String>,
    result_transform: Option<String>,
    output_dir: Option<PathBuf>,
    dry_run: bool,
}

fn handle_register(config: &Config, args: RegisterArgs) -> anyhow::Result<()> {
    let mut workspace = Workspace::new();
    let reference = workspace
        .open_volume(&args.reference)
        .with_context(|| format!("loading reference {}", args.reference.display()))?;
    let floating = if args.floating == args.reference {
        reference.clone()
    } else {
        workspace
            .open_volume(&args.floating)
            .with_context(|| format!("loading floating {}", args.floating.display()))?
    };

    let geometry = workspace.geometry(&reference)?;
    let pyramid = compute_levels_with_floor(&geometry.shape(), config.pyramid.min_level_size);
    let selector = LevelSelector::new(
        args.highest.unwrap_or(config.pyramid.default_highest),
        args.lowest.unwrap_or(config.pyramid.default_lowest),
        pyramid.max_level(),
    );

    let mut builder = RegistrationRequest::builder(reference.clone(), floating.clone())
        .algorithm(args.algorithm)
        .levels(selector.range())
        .reference_thresholds(
            args.reference_thresholds
                .unwrap_or_else(|| default_thresholds(&workspace, &reference)),
        )
        .floating_thresholds(
            args.floating_thresholds
                .unwrap_or_else(|| default_thresholds(&workspace, &floating)),
        );
    if let Some(path) = &args.initial {
        let matrix = read_matrix_file(path)
            .with_context(|| format!("reading initial transform {}", path.display()))?;
        builder = builder.initial_transform(matrix);
    }
    if let Some(name) = &args.result_volume {
        builder = builder.result_volume(name.clone());
    }
    if let Some(name) = &args.result_transform {
        builder = builder.result_transform(workspace.new_transform(name));
    }
    let request = builder.build()?;

    let mut pipeline = RegistrationPipeline::new(config, SystemProcessRunner);

    if args.dry_run {
        let (run_dir, command) = pipeline.prepare(&mut workspace, &request)?;
        println!("{}", command.pretty());
        println!("\nRun directory: {}", run_dir.keep().display());
        return Ok(());
    }

    let outcome = pipeline.run(&mut workspace, &request)?;

    println!("Registration completed in {:.2} seconds", outcome.report.duration.as_secs_f64());
    for message in &outcome.context.messages {
        println!("Warning: {}", message.message);
    }
    for timing in &outcome.context.stage_timings {
        println!("  {:<10} {:>10.1} ms", timing.stage_name, timing.duration_ms);
    }
    if let Some(dir) = &outcome.run_directory {
        println!("Run files kept in {}", dir.display());
    }

    if let Some(dir) = &args.output_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        export_results(&workspace, &outcome, dir)?;
    }

    Ok(())
}

fn export_results(workspace: &Workspace, outcome: &RegistrationOutcome, dir: &Path) -> anyhow::Result<()> {
    if let Some(handle) = &outcome.applied.volume {
        if let Some(volume) = workspace.volume(handle) {
            let path = dir.join(format!("{}.nii", handle.name.replace(' ', "_")));
            write_volume(volume, &path)?;
            println!("Result volume: {}", path.display());
        }
    }

    if let Some(handle) = &outcome.applied.transform {
        let stem = handle.name.replace(' ', "_");
        match workspace.transform(handle) {
            Some(StoredTransform::Linear { .. }) => {
                let path = dir.join(format!("{}.txt", stem));
                write_matrix_file(&workspace.matrix_from_parent(handle)?, &path)?;
                println!("Result transform: {}", path.display());
            }
            Some(StoredTransform::Displacement { field, .. }) => {
                let path = dir.join(format!("{}.nii.gz", stem));
                write_displacement_field(field, &path)?;
                println!("Result displacement field: {}", path.display());
            }
            None => {}
        }
    }

    Ok(())
}

fn handle_pyramid(
    config: &Config,
    reference: &Path,
    floating: Option<&Path>,
    highest: Option<usize>,
    lowest: Option<usize>,
) -> anyhow::Result<()> {
    let min_size = config.pyramid.min_level_size;
    let ref_map = compute_levels_with_floor(&read_geometry(reference)?.shape(), min_size);
    let flo_map = match floating {
        Some(path) => Some(compute_levels_with_floor(&read_geometry(path)?.shape(), min_size)),
        None => None,
    };

    println!("Reference pyramid:");
    for (level, shape) in ref_map.iter() {
        println!("  {:>2}: {}", level, shape_label(shape));
    }
    if let Some(map) = &flo_map {
        println!("Floating pyramid:");
        for (level, shape) in map.iter() {
            println!("  {:>2}: {}", level, shape_label(shape));
        }
    }

    let selector = LevelSelector::new(
        highest.unwrap_or(config.pyramid.default_highest),
        lowest.unwrap_or(config.pyramid.default_lowest),
        ref_map.max_level(),
    );
    let range = selector.range();
    println!(
        "\nSelected levels {}..{} (-ln {} -lp {})",
        range.lowest,
        range.highest,
        range.levels_to_build(),
        range.levels_to_perform()
    );
    let [high, low] = compare_levels(&ref_map, flo_map.as_ref(), range);
    print_level_row("Highest", &high);
    print_level_row("Lowest", &low);
    Ok(())
}

fn print_level_row(label: &str, row: &LevelRow) {
    let render = |shape: &Option<Vec<usize>>| shape.as_deref().map(shape_label).unwrap_or_else(|| "-".to_string());
    println!(
        "  {:<8} level {:>2}  reference {:<18} floating {}",
        label,
        row.level,
        render(&row.reference),
        render(&row.floating)
    );
}

fn read_geometry(path: &Path) -> anyhow::Result<ImageGeometry> {
    let header = nifti::NiftiHeader::from_file(path)
        .with_context(|| format!("reading header of {}", path.display()))?;
    Ok(geometry_from_header(&header))
}

fn handle_field(vectors: &Path, reference: &Path, output: &Path) -> anyhow::Result<()> {
    let geometry = read_geometry(reference)?;
    let field = load_displacement_field(vectors, &geometry)?;
    write_displacement_field(&field, output)?;
    println!(
        "Displacement field {} written to {}",
        shape_label(&geometry.shape()),
        output.display()
    );
    Ok(())
}

fn handle_matrix(input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let matrix = read_matrix_file(input)?;
    if matrix.inverse().is_none() {
        bail!("matrix in {} is singular", input.display());
    }
    match output {
        Some(path) => {
            write_matrix_file(&matrix, path)?;
            println!("Matrix written to {}", path.display());
        }
        None => println!("{}", encode(&matrix)),
    }
    Ok(())
}

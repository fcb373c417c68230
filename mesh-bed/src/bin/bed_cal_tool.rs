//! Bed calibration tool running against a simulated printer.
//!
//! Subcommands:
//! - `calibrate`: First-time offset and skew calibration from the bed corners
//! - `improve`: Refine the stored calibration
//! - `scan`: Locate every reference point and print where it was found
//! - `reset`: Erase the stored calibration
//! - `show`: Print the stored calibration
//! - `convert`: Map a point between world and machine coordinates

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use mesh_bed::reference_points::nominal_points;
use mesh_bed::{
    BedCalibrator, CalibrationConfig, FileTransformStore, TracingReporter, TransformStore,
};
use printer_hardware::{SimulatedPrinter, SimulatedPrinterArgs};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Printer bed XY calibration tool
#[derive(Parser, Debug)]
#[command(name = "bed_cal_tool")]
#[command(about = "Calibrate bed offset and skew with the induction sensor")]
#[command(version)]
struct Args {
    /// Calibration config JSON (built-in defaults when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the stored calibration (default ~/.mesh_bed)
    #[arg(long, global = true)]
    store_dir: Option<PathBuf>,

    /// Diagnostic verbosity (0 = quiet, 1+ = per-point, 10+ = residuals)
    #[arg(short, long, global = true, default_value = "1")]
    verbosity: i8,

    #[command(flatten)]
    sim: SimulatedPrinterArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the first-time calibration
    Calibrate,

    /// Refine the stored calibration
    Improve {
        /// Points to re-measure (0 = all, 1 = corners, 2 = corners and center)
        #[arg(short, long, default_value = "0")]
        method: i8,
    },

    /// Locate every reference point without changing the calibration
    Scan,

    /// Erase the stored calibration
    Reset,

    /// Print the stored calibration
    Show,

    /// Convert a point with the stored calibration
    Convert {
        #[arg(allow_hyphen_values = true)]
        x: f64,

        #[arg(allow_hyphen_values = true)]
        y: f64,

        /// Treat the input as machine coordinates
        #[arg(long)]
        from_machine: bool,
    },
}

type Calibrator = BedCalibrator<SimulatedPrinter, FileTransformStore, TracingReporter>;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            CalibrationConfig::load(path)?
        }
        None => CalibrationConfig::default(),
    };
    let store = match &args.store_dir {
        Some(dir) => FileTransformStore::with_root(dir),
        None => FileTransformStore::new()?,
    };
    let printer = args.sim.build(nominal_points(), config.limits);

    let mut calibrator: Calibrator = BedCalibrator::new(printer, store, TracingReporter, config);
    calibrator.world2machine_initialize();

    match args.command {
        Command::Calibrate => cmd_calibrate(&mut calibrator, args.verbosity),
        Command::Improve { method } => cmd_improve(&mut calibrator, method, args.verbosity),
        Command::Scan => cmd_scan(&mut calibrator, args.verbosity),
        Command::Reset => {
            calibrator.reset_bed_offset_and_skew();
            println!("Calibration reset");
            Ok(())
        }
        Command::Show => cmd_show(&calibrator),
        Command::Convert { x, y, from_machine } => {
            let transform = calibrator.transform();
            let (out_x, out_y) = if from_machine {
                transform.machine2world(x, y)
            } else {
                transform.world2machine(x, y)
            };
            println!("({x:.4}, {y:.4}) -> ({out_x:.4}, {out_y:.4})");
            Ok(())
        }
    }
}

fn cmd_calibrate(calibrator: &mut Calibrator, verbosity: i8) -> Result<()> {
    let outcome = calibrator.find_bed_offset_and_skew(verbosity);
    if let Some(failure) = calibrator.last_failure() {
        bail!("calibration failed: {failure}");
    }
    println!("Result: {} (code {})", outcome, outcome.result_code());
    println!("Transform: {}", calibrator.transform());
    Ok(())
}

fn cmd_improve(calibrator: &mut Calibrator, method: i8, verbosity: i8) -> Result<()> {
    let outcome = calibrator.improve_bed_offset_and_skew(method, verbosity);
    if let Some(failure) = calibrator.last_failure() {
        bail!("improvement failed: {failure}");
    }
    println!("Result: {} (code {})", outcome, outcome.result_code());
    if let Some(delta) = calibrator.last_correction_delta() {
        println!("Largest coefficient change: {delta:.6}");
    }
    println!("Transform: {}", calibrator.transform());
    Ok(())
}

fn cmd_scan(calibrator: &mut Calibrator, verbosity: i8) -> Result<()> {
    let report = calibrator.scan_bed_induction_points(verbosity);
    println!("{:>5} {:>10} {:>10} {:>10} {:>10}", "point", "x", "y", "z", "dev");
    for entry in &report.entries {
        match &entry.result {
            Ok(point) => println!(
                "{:>5} {:>10.4} {:>10.4} {:>10} {:>10.4}",
                entry.index,
                point.x,
                point.y,
                point.z.map_or("-".to_string(), |z| format!("{z:.4}")),
                point.deviation_mm
            ),
            Err(e) => println!("{:>5} not found: {}", entry.index, e),
        }
    }
    if report.aborted {
        bail!("scan aborted");
    }
    println!("{}/{} points found", report.found_count(), report.entries.len());
    Ok(())
}

fn cmd_show(calibrator: &Calibrator) -> Result<()> {
    match calibrator.store().load()? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!("Active: {}", calibrator.transform());
        }
        None => println!("No stored calibration"),
    }
    if let Some(jitter) = calibrator.z_jitter_data() {
        for (index, value) in jitter.iter().enumerate() {
            if let Some(value) = value {
                println!("point {index}: z jitter {value:.4} mm");
            }
        }
    }
    Ok(())
}

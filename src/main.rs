//! Command-line front end: argument parsing, mode dispatch, exit codes.
//!
//! Exit status: 0 on success, 1 on fatal device/query errors or an
//! unscannable device, 2 when the handle refers to no physical device.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use mtd_check::device::mtd::MtdDevice;
use mtd_check::{
    report, scan_blocks, CheckError, Config, FlashInspect, Mode, MtdGeometry, MtdKind,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Path to the MTD character device (e.g. /dev/mtd3)
    device: PathBuf,

    /// Output information on the partition and exit
    #[clap(short, long, group = "mode")]
    info: bool,

    /// Output only the number of bad blocks and exit
    #[clap(short, long, group = "mode")]
    bad_blocks: bool,

    /// Output only the ECC statistics and exit
    #[clap(short, long, group = "mode")]
    ecc: bool,

    /// Output the erase-region table and exit
    #[clap(short, long, group = "mode")]
    regions: bool,

    /// Machine-readable output: "<total> <good> <bad>"
    #[clap(short, long, group = "mode")]
    machine: bool,

    /// Reject devices whose OOB size is not a conventional NAND value
    #[clap(short, long)]
    strict: bool,

    /// Colorize the block map and summary
    #[clap(short, long)]
    color: bool,

    /// Verbose diagnostics
    #[clap(short, long)]
    verbose: bool,
}

impl Cli {
    fn config(&self) -> Config {
        let mode = if self.bad_blocks {
            Mode::BadBlockCountOnly
        } else if self.info {
            Mode::InfoOnly
        } else if self.ecc {
            Mode::EccOnly
        } else if self.regions {
            Mode::RegionsOnly
        } else if self.machine {
            Mode::MachineReadable
        } else {
            Mode::FullScan
        };

        Config {
            mode,
            strict: self.strict,
            color: self.color,
        }
    }
}

/// The bad-block-count shortcut is the only mode that tolerates MTD_ABSENT.
fn ensure_present(geometry: &MtdGeometry) -> Result<(), CheckError> {
    if geometry.kind == MtdKind::Absent {
        return Err(CheckError::AbsentDevice);
    }
    Ok(())
}

fn run(cli: &Cli) -> Result<(), CheckError> {
    let config = cli.config();
    let name = cli.device.display().to_string();
    let mut dev = MtdDevice::open(&cli.device)?;
    let geometry = dev.geometry();
    let ecc = dev.ecc_stats();

    match config.mode {
        Mode::BadBlockCountOnly => {
            println!("{}", ecc.bad_blocks);
            return Ok(());
        }

        Mode::EccOnly => {
            ensure_present(&geometry)?;
            print!("{}", report::ecc_report(&ecc));
            return Ok(());
        }

        Mode::RegionsOnly => {
            ensure_present(&geometry)?;
            let regions = dev.regions()?;
            print!("{}", report::regions_report(&regions));
            return Ok(());
        }

        Mode::InfoOnly => {
            print!("{}", report::device_report(&name, &geometry, &ecc));
            ensure_present(&geometry)?;
            return Ok(());
        }

        Mode::MachineReadable => {
            geometry.validate_for_scan(config.strict)?;
            let tally = scan_blocks(&mut dev, |_, _| {})?;
            println!("{}", report::machine_triple(&tally));
            return Ok(());
        }

        Mode::FullScan => {}
    }

    print!("{}", report::device_report(&name, &geometry, &ecc));
    geometry.validate_for_scan(config.strict)?;

    println!();
    println!("{}", report::LEGEND);
    println!();

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let tally = scan_blocks(&mut dev, |index, class| {
        let _ = write!(out, "{}", report::render_symbol(class, config.color));
        if index % report::ROW_WIDTH == report::ROW_WIDTH - 1 {
            let _ = writeln!(out);
        }
    })?;
    let _ = writeln!(out);
    let _ = writeln!(out);
    drop(out);

    print!("{}", report::summary_report(&name, &geometry, &tally, config.color));
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        if cli.verbose { "debug" } else { "warn" },
    ))
    .init();

    if cli.color {
        // Force color through even when stdout is piped
        colored::control::set_override(true);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mtd-check: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

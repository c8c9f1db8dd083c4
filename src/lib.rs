//! Inspect a raw MTD/NAND flash device and report per-eraseblock usage.
//!
//! For each erase block the scan prints one symbol:
//!
//! ```text
//! B    Bad block
//! R    Bad block attributed to the bad-block table
//! .    Empty
//! -    Partially filled
//! =    Full, no summary node
//! S    Full, with a JFFS2 summary node
//! ```
//!
//! The classification core is pure over block bytes plus the per-offset
//! bad-block query, so it can be exercised against [device::SimFlash]
//! without any hardware.

pub mod device;
pub mod error;
pub mod report;
pub mod scan;

pub use device::{EccStats, EraseRegion, FlashInspect, MtdFlags, MtdGeometry, MtdKind, SimFlash};
pub use error::CheckError;
pub use scan::{scan_blocks, BlockClass, ScanTally};

/// Which report the tool produces.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Mode {
    /// Scan every block and print the symbol map plus the tally
    FullScan,
    /// Geometry, flags, and ECC stats only
    InfoOnly,
    /// Just the bad-block count
    BadBlockCountOnly,
    /// Just the ECC counters
    EccOnly,
    /// Just the erase-region table
    RegionsOnly,
    /// Scan silently and print the "total good bad" triple
    MachineReadable,
}

/// Options threaded from the CLI into the core.
#[derive(Debug, Copy, Clone)]
pub struct Config {
    pub mode: Mode,
    /// Enforce conventional NAND OOB sizes before scanning
    pub strict: bool,
    /// Colorize the symbol map and summary
    pub color: bool,
}

//! Pure formatting of device reports, per-block symbols, and the final
//! tally. Nothing in here touches the device; the CLI decides where the
//! strings go.

use std::fmt::Write;

use colored::Colorize;
use humansize::{format_size, BINARY};

use crate::device::{EccStats, EraseRegion, MtdGeometry};
use crate::scan::{BlockClass, ScanTally};

/// Symbols per row in the block map. Display-only; carries no meaning.
pub const ROW_WIDTH: u64 = 80;

pub const LEGEND: &str =
    "B Bad block; R BBT reserved; . Empty; - Partially filled; = Full; S has a JFFS2 summary node";

/// The display symbol for one block.
pub fn symbol(class: BlockClass) -> char {
    match class {
        BlockClass::Bad => 'B',
        BlockClass::ReservedBad => 'R',
        BlockClass::Empty => '.',
        BlockClass::Partial { summary: true } => 's',
        BlockClass::Partial { summary: false } => '-',
        BlockClass::Full => '=',
        BlockClass::FullWithSummary => 'S',
    }
}

/// The display symbol, colorized when `color` is set.
pub fn render_symbol(class: BlockClass, color: bool) -> String {
    let sym = symbol(class).to_string();
    if !color {
        return sym;
    }
    match class {
        BlockClass::Bad => sym.as_str().red().bold(),
        BlockClass::ReservedBad => sym.as_str().yellow().bold(),
        BlockClass::Empty => sym.as_str().bright_black(),
        BlockClass::Partial { .. } => sym.as_str().cyan(),
        BlockClass::Full => sym.as_str().green(),
        BlockClass::FullWithSummary => sym.as_str().green().bold(),
    }
    .to_string()
}

/// Device identity, geometry, and ECC counters, as printed before a scan
/// or for info-only mode.
pub fn device_report(name: &str, geometry: &MtdGeometry, ecc: &EccStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Flash type of {name} is {}", geometry.kind);

    let flags: Vec<_> = geometry.flags.names().collect();
    let _ = writeln!(
        out,
        "Flash flags {:#x}: {}",
        geometry.flags.0,
        if flags.is_empty() {
            "(none)".to_string()
        } else {
            flags.join(" ")
        }
    );

    let _ = writeln!(
        out,
        "Block size {}, page size {}, OOB size {}",
        geometry.erase_size, geometry.write_size, geometry.oob_size
    );
    if geometry.erase_size > 0 {
        let _ = writeln!(
            out,
            "{} bytes ({}), {} blocks",
            geometry.size,
            format_size(geometry.size, BINARY),
            geometry.block_count()
        );
    } else {
        let _ = writeln!(out, "{} bytes", geometry.size);
    }
    out.push_str(&ecc_report(ecc));
    out
}

pub fn ecc_report(ecc: &EccStats) -> String {
    format!(
        "ECC stats: corrected {}, failed {}, bad blocks {}, BBT blocks {}\n",
        ecc.corrected, ecc.failed, ecc.bad_blocks, ecc.bbt_blocks
    )
}

/// The erase-region table; an empty table means uniform geometry.
pub fn regions_report(regions: &[EraseRegion]) -> String {
    if regions.is_empty() {
        return "Device reports uniform erase geometry (no regions)\n".to_string();
    }
    let mut out = String::new();
    for region in regions {
        let _ = writeln!(
            out,
            "Region {}: offset {:#x}, erase size {}, {} blocks",
            region.index, region.offset, region.erase_size, region.block_count
        );
    }
    out
}

/// The final tally printed after a full scan.
pub fn summary_report(name: &str, geometry: &MtdGeometry, tally: &ScanTally, color: bool) -> String {
    let total_bytes = tally.total() * u64::from(geometry.erase_size);
    let header = format!("Summary {name}:");

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        if color {
            header.as_str().bold().to_string()
        } else {
            header
        }
    );
    let _ = writeln!(
        out,
        "Total blocks: {}, total size: {}",
        tally.total(),
        format_size(total_bytes, BINARY)
    );
    let _ = writeln!(
        out,
        "Empty: {}, partially filled: {}, full: {}, with summary: {}, bad: {}, BBT reserved: {}",
        tally.empty, tally.partial, tally.full, tally.full_summary, tally.bad, tally.reserved_bad
    );
    if tally.read_errors > 0 {
        let line = format!("Read errors: {}", tally.read_errors);
        let _ = writeln!(
            out,
            "{}",
            if color {
                line.as_str().red().to_string()
            } else {
                line
            }
        );
    }
    out
}

/// Machine-readable triple: total, good, and bad block counts.
pub fn machine_triple(tally: &ScanTally) -> String {
    format!(
        "{} {} {}",
        tally.total(),
        tally.good(),
        tally.bad + tally.reserved_bad
    )
}

//! This module contains the code to scan erase blocks and classify their
//! fill state, plus the running tally accumulated over a scan.

use log::{debug, warn};

use crate::device::FlashInspect;
use crate::error::CheckError;

/// Magic value a JFFS2 summary node leaves in the last 4 bytes of a block.
/// Taken from linux/jffs2.h (JFFS2_SUM_MAGIC).
pub const JFFS2_SUM_MAGIC: u32 = 0x02851885;

/// The erased-fill value of NAND flash.
const ERASED_BYTE: u8 = 0xFF;

/// These are the states a given erase block may be classified into
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum BlockClass {
    /// The block is marked bad
    Bad,

    /// The block is marked bad and attributed to the bad-block table
    ReservedBad,

    /// The block is fully erased
    Empty,

    /// Less than half of the block holds data; a summary marker found in
    /// this regime is noted but the block stays partial
    Partial { summary: bool },

    /// Half or more of the block holds data
    Full,

    /// Full, and the last 4 bytes carry the JFFS2 summary marker
    FullWithSummary,
}

/// Fill state of one block's raw content, before bad-block accounting.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct ContentClass {
    /// Bytes from the start of the block to the last non-erased byte; 0
    /// when the block is fully erased
    pub fill_level: usize,
    /// Whether the last 4 bytes match the summary marker
    pub has_summary: bool,
}

/// Characterize a block's raw content.
///
/// Pure over the block bytes: scans backward for the first non-erased byte
/// and compares the last 4 bytes against the little-endian encoding of the
/// summary marker. The marker test is a heuristic presence check only; the
/// summary node itself is never validated.
pub fn classify_content(block: &[u8]) -> ContentClass {
    let fill_level = block
        .iter()
        .rposition(|&b| b != ERASED_BYTE)
        .map_or(0, |i| i + 1);

    let has_summary =
        block.len() >= 4 && block[block.len() - 4..] == JFFS2_SUM_MAGIC.to_le_bytes();

    ContentClass {
        fill_level,
        has_summary,
    }
}

impl ContentClass {
    /// Sort the content into its fill bucket for a block of `erase_size`.
    fn into_class(self, erase_size: u32) -> BlockClass {
        let half = erase_size as usize / 2;
        if self.fill_level == 0 {
            BlockClass::Empty
        } else if self.fill_level < half {
            BlockClass::Partial {
                summary: self.has_summary,
            }
        } else if self.has_summary {
            BlockClass::FullWithSummary
        } else {
            BlockClass::Full
        }
    }
}

/// Running tally over a whole scan. One bucket increment per block; short
/// reads are counted separately and do not add a seventh bucket.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ScanTally {
    pub bad: u64,
    pub reserved_bad: u64,
    pub empty: u64,
    pub partial: u64,
    pub full: u64,
    pub full_summary: u64,
    /// Blocks whose read came up short; classified as empty
    pub read_errors: u64,
}

impl ScanTally {
    fn record(&mut self, class: BlockClass) {
        match class {
            BlockClass::Bad => self.bad += 1,
            BlockClass::ReservedBad => self.reserved_bad += 1,
            BlockClass::Empty => self.empty += 1,
            BlockClass::Partial { .. } => self.partial += 1,
            BlockClass::Full => self.full += 1,
            BlockClass::FullWithSummary => self.full_summary += 1,
        }
    }

    /// All blocks seen, across the six buckets.
    pub fn total(&self) -> u64 {
        self.bad + self.reserved_bad + self.empty + self.partial + self.full + self.full_summary
    }

    /// Blocks that are not marked bad.
    pub fn good(&self) -> u64 {
        self.empty + self.partial + self.full + self.full_summary
    }
}

/// Scan every erase block of `dev`, emitting one [BlockClass] per block
/// through `sink` and returning the final tally.
///
/// Short reads are logged and the affected block counts as empty; a failed
/// bad-block query aborts the scan. Bad blocks are split between [Bad] and
/// [ReservedBad] by scan order: the device reports how many of its bad
/// blocks are bad-block-table reservations but not which ones, so the first
/// `bad_blocks - bbt_blocks` bad blocks encountered count as genuinely bad
/// and the remainder as reserved. This ordinal attribution is unverified
/// against any ground truth.
///
/// [Bad]: BlockClass::Bad
/// [ReservedBad]: BlockClass::ReservedBad
pub fn scan_blocks<D, F>(dev: &mut D, mut sink: F) -> Result<ScanTally, CheckError>
where
    D: FlashInspect,
    F: FnMut(u64, BlockClass),
{
    let geometry = dev.geometry();
    let ecc = dev.ecc_stats();
    let erase_size = geometry.erase_size as usize;
    let natural_bad = u64::from(ecc.bad_blocks.saturating_sub(ecc.bbt_blocks));

    debug!(
        "scanning {} blocks of {} bytes ({} reported bad, {} of those BBT)",
        geometry.block_count(),
        erase_size,
        ecc.bad_blocks,
        ecc.bbt_blocks
    );

    // One buffer, reused for every block.
    let mut buf = vec![0u8; erase_size];
    let mut tally = ScanTally::default();

    let mut index = 0u64;
    let mut offset = 0u64;
    while offset < geometry.size {
        let complete = match dev.read_block(offset, &mut buf) {
            Ok(n) if n == erase_size => true,
            Ok(n) => {
                warn!(
                    "short read at offset {offset:#x} (block {index}): {n} of {erase_size} bytes"
                );
                tally.read_errors += 1;
                false
            }
            Err(e) => {
                warn!("read error at offset {offset:#x} (block {index}): {e}");
                tally.read_errors += 1;
                false
            }
        };

        let class = if dev.is_bad_block(offset)? {
            if tally.bad < natural_bad {
                BlockClass::Bad
            } else {
                BlockClass::ReservedBad
            }
        } else if !complete {
            // Content past a short read is undefined; no fill level to judge
            BlockClass::Empty
        } else {
            classify_content(&buf).into_class(geometry.erase_size)
        };

        tally.record(class);
        sink(index, class);

        index += 1;
        offset += erase_size as u64;
    }

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{EccStats, SimFlash};

    const ERASE_SIZE: u32 = 256;
    const BLOCKS: u32 = 10;

    fn collect_classes(sim: &mut SimFlash) -> (Vec<BlockClass>, ScanTally) {
        let mut classes = Vec::new();
        let tally = scan_blocks(sim, |_, class| classes.push(class)).unwrap();
        (classes, tally)
    }

    #[test]
    fn test_classify_content_all_erased() {
        let block = vec![0xFF; ERASE_SIZE as usize];
        let content = classify_content(&block);
        assert_eq!(content.fill_level, 0);
        // An all-0xFF block can never match the marker
        assert!(!content.has_summary);
    }

    #[test]
    fn test_classify_content_fill_level() {
        let mut block = vec![0xFF; ERASE_SIZE as usize];
        block[..10].fill(0x00);
        assert_eq!(classify_content(&block).fill_level, 10);

        block[ERASE_SIZE as usize - 1] = 0xA5;
        assert_eq!(classify_content(&block).fill_level, ERASE_SIZE as usize);
    }

    #[test]
    fn test_classify_content_summary_marker() {
        let mut block = vec![0xFF; ERASE_SIZE as usize];
        block[ERASE_SIZE as usize - 4..].copy_from_slice(&JFFS2_SUM_MAGIC.to_le_bytes());
        let content = classify_content(&block);
        assert!(content.has_summary);
        // The marker bytes are data, so fill level reaches the block's end
        assert_eq!(content.fill_level, ERASE_SIZE as usize);
    }

    #[test]
    fn test_marker_only_upgrades_full_blocks() {
        let mut sim = SimFlash::new(ERASE_SIZE, 2);

        // Block 0: marker plus more than half data => full-with-summary
        sim.fill(0, ERASE_SIZE as usize / 2 + 8, 0xAA);
        sim.write_summary_marker(0);

        // Block 1: marker alone; the marker bytes sit at the block's tail,
        // so fill level is the whole block and it still classifies full.
        // A sub-half fill with a marker has to be forged through the pure
        // classifier instead:
        let mut partial = vec![0xFF; ERASE_SIZE as usize];
        partial[..4].copy_from_slice(&JFFS2_SUM_MAGIC.to_le_bytes());
        let content = ContentClass {
            fill_level: 4,
            has_summary: true,
        };
        assert_eq!(
            content.into_class(ERASE_SIZE),
            BlockClass::Partial { summary: true }
        );
        assert_eq!(classify_content(&partial).fill_level, 4);

        let (classes, tally) = collect_classes(&mut sim);
        assert_eq!(classes[0], BlockClass::FullWithSummary);
        assert_eq!(tally.full_summary, 1);
    }

    #[test]
    fn test_fill_regimes() {
        let mut sim = SimFlash::new(ERASE_SIZE, 4);
        sim.fill(1, 10, 0x12); // well under half
        sim.fill(2, ERASE_SIZE as usize / 2, 0x12); // exactly half
        sim.fill(3, ERASE_SIZE as usize, 0x12); // every byte

        let (classes, tally) = collect_classes(&mut sim);
        assert_eq!(
            classes,
            [
                BlockClass::Empty,
                BlockClass::Partial { summary: false },
                BlockClass::Full,
                BlockClass::Full,
            ]
        );
        assert_eq!(tally.total(), 4);
        assert_eq!(tally.empty, 1);
        assert_eq!(tally.partial, 1);
        assert_eq!(tally.full, 2);
    }

    #[test]
    fn test_bad_block_ordinal_attribution() {
        // The device reports 3 bad blocks of which 1 is a BBT reservation;
        // bad blocks at ordinals 2, 5, 9 must come out bad, bad, reserved.
        let mut sim = SimFlash::new(ERASE_SIZE, BLOCKS).with_ecc(EccStats {
            bad_blocks: 3,
            bbt_blocks: 1,
            ..Default::default()
        });
        sim.mark_bad(2);
        sim.mark_bad(5);
        sim.mark_bad(9);

        let (classes, tally) = collect_classes(&mut sim);
        assert_eq!(classes[2], BlockClass::Bad);
        assert_eq!(classes[5], BlockClass::Bad);
        assert_eq!(classes[9], BlockClass::ReservedBad);

        assert_eq!(tally.bad, 2);
        assert_eq!(tally.reserved_bad, 1);
        assert_eq!(tally.bad + tally.reserved_bad, 3);
        assert_eq!(tally.total(), u64::from(BLOCKS));
    }

    #[test]
    fn test_short_read_counts_as_empty() {
        let mut sim = SimFlash::new(ERASE_SIZE, BLOCKS);
        sim.fill(3, ERASE_SIZE as usize, 0x77);
        sim.fill(4, ERASE_SIZE as usize, 0x77);
        sim.truncate_reads(4, 32);

        let (classes, tally) = collect_classes(&mut sim);
        assert_eq!(classes[3], BlockClass::Full);
        assert_eq!(classes[4], BlockClass::Empty);
        assert_eq!(tally.read_errors, 1);
        assert_eq!(tally.total(), u64::from(BLOCKS));
    }

    #[test]
    fn test_bad_query_failure_aborts() {
        let mut sim = SimFlash::new(ERASE_SIZE, BLOCKS);
        sim.fail_bad_query(6);

        let result = scan_blocks(&mut sim, |_, _| {});
        assert!(matches!(result, Err(CheckError::Query { .. })));
    }

    #[test]
    fn test_scan_is_idempotent() {
        let mut sim = SimFlash::new(ERASE_SIZE, BLOCKS).with_ecc(EccStats {
            bad_blocks: 1,
            ..Default::default()
        });
        sim.mark_bad(0);
        sim.fill(1, 30, 0xC3);
        sim.fill(2, ERASE_SIZE as usize, 0xC3);
        sim.write_summary_marker(2);

        let (first, first_tally) = collect_classes(&mut sim);
        let (second, second_tally) = collect_classes(&mut sim);
        assert_eq!(first, second);
        assert_eq!(first_tally, second_tally);
    }
}

//! Abstractions and data model for the flash devices we inspect.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use crate::error::CheckError;

pub mod mtd;

/// OOB sizes of conventional NAND parts, enforced in strict mode only.
const CONVENTIONAL_OOB_SIZES: [u32; 5] = [8, 16, 32, 64, 128];

/// MTD device type, from the kernel's MTD_* type codes.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MtdKind {
    Absent,
    Ram,
    Rom,
    NorFlash,
    NandFlash,
    DataFlash,
    UbiVolume,
    MlcNandFlash,
}

impl MtdKind {
    /// Map a raw type code from MEMGETINFO; `None` for codes we don't know.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Absent,
            1 => Self::Ram,
            2 => Self::Rom,
            3 => Self::NorFlash,
            4 => Self::NandFlash,
            6 => Self::DataFlash,
            7 => Self::UbiVolume,
            8 => Self::MlcNandFlash,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Absent => "MTD_ABSENT",
            Self::Ram => "MTD_RAM",
            Self::Rom => "MTD_ROM",
            Self::NorFlash => "MTD_NORFLASH",
            Self::NandFlash => "MTD_NANDFLASH",
            Self::DataFlash => "MTD_DATAFLASH",
            Self::UbiVolume => "MTD_UBIVOLUME",
            Self::MlcNandFlash => "MTD_MLCNANDFLASH",
        }
    }
}

impl fmt::Display for MtdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// MTD capability flags, as reported by MEMGETINFO.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct MtdFlags(pub u32);

impl MtdFlags {
    pub const WRITEABLE: u32 = 0x400;
    pub const BIT_WRITEABLE: u32 = 0x800;
    pub const NO_ERASE: u32 = 0x1000;
    pub const POWERUP_LOCK: u32 = 0x2000;

    pub fn contains(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    /// Names of the set flags, in the kernel header's order.
    pub fn names(self) -> impl Iterator<Item = &'static str> {
        [
            (Self::WRITEABLE, "MTD_WRITEABLE"),
            (Self::BIT_WRITEABLE, "MTD_BIT_WRITEABLE"),
            (Self::NO_ERASE, "MTD_NO_ERASE"),
            (Self::POWERUP_LOCK, "MTD_POWERUP_LOCK"),
        ]
        .into_iter()
        .filter(move |(mask, _)| self.contains(*mask))
        .map(|(_, name)| name)
    }
}

/// Geometry snapshot of an MTD device, immutable once queried.
#[derive(Debug, Copy, Clone)]
pub struct MtdGeometry {
    pub kind: MtdKind,
    pub flags: MtdFlags,
    /// Total device size in bytes
    pub size: u64,
    /// Erase block size in bytes
    pub erase_size: u32,
    /// Page (write unit) size in bytes
    pub write_size: u32,
    /// Out-of-band bytes per page; 0 means no ECC/bad-block management
    pub oob_size: u32,
}

impl MtdGeometry {
    /// Number of erase blocks. Callers must have validated `erase_size != 0`.
    pub fn block_count(&self) -> u64 {
        self.size / u64::from(self.erase_size)
    }

    /// Decide whether a block scan is meaningful for this device.
    ///
    /// The OOB whitelist is a legacy-device accommodation: it only applies
    /// in strict mode, and is skipped entirely otherwise.
    pub fn validate_for_scan(&self, strict: bool) -> Result<(), CheckError> {
        if self.kind == MtdKind::Absent {
            return Err(CheckError::AbsentDevice);
        }
        if self.kind == MtdKind::UbiVolume {
            return Err(CheckError::Unsupported(
                "UBI volumes have no raw erase-block semantics".into(),
            ));
        }
        if self.erase_size == 0 {
            return Err(CheckError::Unsupported(
                "device reports a zero erase-block size".into(),
            ));
        }
        if self.oob_size == 0 {
            return Err(CheckError::Unsupported(
                "no OOB area: device has no bad-block/ECC management".into(),
            ));
        }
        if strict && !CONVENTIONAL_OOB_SIZES.contains(&self.oob_size) {
            return Err(CheckError::Unsupported(format!(
                "OOB size {} is not a conventional NAND value",
                self.oob_size
            )));
        }
        Ok(())
    }
}

/// ECC statistics snapshot, as reported by ECCGETSTATS.
///
/// `bad_blocks` is the authoritative total of bad blocks and includes the
/// `bbt_blocks` reserved for the bad-block table.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct EccStats {
    pub corrected: u32,
    pub failed: u32,
    pub bad_blocks: u32,
    pub bbt_blocks: u32,
}

/// One erase region of a device with non-uniform erase geometry.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct EraseRegion {
    pub index: u32,
    pub offset: u64,
    pub erase_size: u32,
    pub block_count: u32,
}

/// Query seam between the scanner and the device layer.
///
/// Geometry and ECC stats are snapshots taken when the device was opened.
/// `is_bad_block` failure is a device-communication failure and is fatal to
/// a scan; a short `read_block` is a data condition the caller may recover
/// from.
pub trait FlashInspect {
    fn geometry(&self) -> MtdGeometry;

    fn ecc_stats(&self) -> EccStats;

    /// Bad-block status of the block at `offset`.
    fn is_bad_block(&mut self, offset: u64) -> Result<bool, CheckError>;

    /// Read up to `buf.len()` bytes at `offset`, returning the count read.
    /// Fewer bytes than requested is a short read.
    fn read_block(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Erase-region table; an empty table means uniform geometry.
    fn regions(&mut self) -> Result<Vec<EraseRegion>, CheckError>;
}

/// A simulated in-memory flash device, for testing purposes
#[derive(Debug, Clone)]
pub struct SimFlash {
    geometry: MtdGeometry,
    ecc: EccStats,
    blocks: Vec<Vec<u8>>,
    bad: Vec<bool>,
    /// Per-block cap on readable bytes, to simulate short reads
    read_limits: BTreeMap<usize, usize>,
    /// Block index whose bad-block query fails, to simulate ioctl errors
    bad_query_failure: Option<usize>,
    regions: Vec<EraseRegion>,
}

impl SimFlash {
    /// Create a fully-erased NAND-like device.
    pub fn new(erase_size: u32, block_count: u32) -> Self {
        let geometry = MtdGeometry {
            kind: MtdKind::NandFlash,
            flags: MtdFlags(MtdFlags::WRITEABLE),
            size: u64::from(erase_size) * u64::from(block_count),
            erase_size,
            write_size: erase_size,
            oob_size: 64,
        };

        Self {
            geometry,
            ecc: EccStats::default(),
            blocks: vec![vec![0xFF; erase_size as usize]; block_count as usize],
            bad: vec![false; block_count as usize],
            read_limits: BTreeMap::new(),
            bad_query_failure: None,
            regions: Vec::new(),
        }
    }

    pub fn with_ecc(mut self, ecc: EccStats) -> Self {
        self.ecc = ecc;
        self
    }

    pub fn geometry_mut(&mut self) -> &mut MtdGeometry {
        &mut self.geometry
    }

    pub fn mark_bad(&mut self, index: usize) {
        self.bad[index] = true;
    }

    /// Write `byte` over the first `len` bytes of a block.
    pub fn fill(&mut self, index: usize, len: usize, byte: u8) {
        self.blocks[index][..len].fill(byte);
    }

    /// Place the JFFS2 summary marker in the last 4 bytes of a block.
    pub fn write_summary_marker(&mut self, index: usize) {
        let block = &mut self.blocks[index];
        let len = block.len();
        block[len - 4..].copy_from_slice(&crate::scan::JFFS2_SUM_MAGIC.to_le_bytes());
    }

    /// Cap reads of a block at `len` bytes, simulating a short read.
    pub fn truncate_reads(&mut self, index: usize, len: usize) {
        self.read_limits.insert(index, len);
    }

    /// Make the bad-block query for a block fail, simulating an ioctl error.
    pub fn fail_bad_query(&mut self, index: usize) {
        self.bad_query_failure = Some(index);
    }

    pub fn set_regions(&mut self, regions: Vec<EraseRegion>) {
        self.regions = regions;
    }

    fn block_index(&self, offset: u64) -> usize {
        (offset / u64::from(self.geometry.erase_size)) as usize
    }
}

impl FlashInspect for SimFlash {
    fn geometry(&self) -> MtdGeometry {
        self.geometry
    }

    fn ecc_stats(&self) -> EccStats {
        self.ecc
    }

    fn is_bad_block(&mut self, offset: u64) -> Result<bool, CheckError> {
        let index = self.block_index(offset);
        if self.bad_query_failure == Some(index) {
            return Err(CheckError::Query {
                what: "MEMGETBADBLOCK",
                source: nix::errno::Errno::EIO,
            });
        }
        Ok(self.bad[index])
    }

    fn read_block(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let index = self.block_index(offset);
        let within = (offset % u64::from(self.geometry.erase_size)) as usize;
        let Some(block) = self.blocks.get(index) else {
            return Ok(0);
        };

        let mut avail = block.len().saturating_sub(within);
        if let Some(&limit) = self.read_limits.get(&index) {
            avail = avail.min(limit);
        }

        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&block[within..within + n]);
        Ok(n)
    }

    fn regions(&mut self) -> Result<Vec<EraseRegion>, CheckError> {
        Ok(self.regions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nand_geometry(oob_size: u32) -> MtdGeometry {
        MtdGeometry {
            kind: MtdKind::NandFlash,
            flags: MtdFlags(MtdFlags::WRITEABLE),
            size: 128 * 131072,
            erase_size: 131072,
            write_size: 2048,
            oob_size,
        }
    }

    #[test]
    fn test_validate_accepts_plain_nand() {
        assert!(nand_geometry(64).validate_for_scan(false).is_ok());
        assert!(nand_geometry(64).validate_for_scan(true).is_ok());
    }

    #[test]
    fn test_validate_rejects_absent() {
        let mut geometry = nand_geometry(64);
        geometry.kind = MtdKind::Absent;
        assert!(matches!(
            geometry.validate_for_scan(false),
            Err(CheckError::AbsentDevice)
        ));
    }

    #[test]
    fn test_validate_rejects_ubi_volume() {
        let mut geometry = nand_geometry(64);
        geometry.kind = MtdKind::UbiVolume;
        assert!(matches!(
            geometry.validate_for_scan(false),
            Err(CheckError::Unsupported(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_erase_size() {
        let mut geometry = nand_geometry(64);
        geometry.erase_size = 0;
        assert!(matches!(
            geometry.validate_for_scan(false),
            Err(CheckError::Unsupported(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_oob() {
        assert!(matches!(
            nand_geometry(0).validate_for_scan(false),
            Err(CheckError::Unsupported(_))
        ));
    }

    #[test]
    fn test_strict_oob_whitelist() {
        // 24 is not a conventional NAND OOB size: rejected only in strict mode
        assert!(matches!(
            nand_geometry(24).validate_for_scan(true),
            Err(CheckError::Unsupported(_))
        ));
        assert!(nand_geometry(24).validate_for_scan(false).is_ok());
    }

    #[test]
    fn test_flag_names() {
        let flags = MtdFlags(MtdFlags::WRITEABLE | MtdFlags::NO_ERASE);
        let names: Vec<_> = flags.names().collect();
        assert_eq!(names, ["MTD_WRITEABLE", "MTD_NO_ERASE"]);
    }

    #[test]
    fn test_kind_from_code() {
        assert_eq!(MtdKind::from_code(4), Some(MtdKind::NandFlash));
        assert_eq!(MtdKind::from_code(0), Some(MtdKind::Absent));
        // 5 was never assigned by the kernel
        assert_eq!(MtdKind::from_code(5), None);
    }

    #[test]
    fn test_sim_read_and_short_read() {
        let mut sim = SimFlash::new(256, 4);
        sim.fill(1, 100, 0xAB);
        sim.truncate_reads(2, 16);

        let mut buf = vec![0u8; 256];
        assert_eq!(sim.read_block(256, &mut buf).unwrap(), 256);
        assert_eq!(&buf[..100], &[0xAB; 100][..]);
        assert!(buf[100..].iter().all(|&b| b == 0xFF));

        assert_eq!(sim.read_block(512, &mut buf).unwrap(), 16);
    }

    #[test]
    fn test_sim_bad_block_query() {
        let mut sim = SimFlash::new(256, 4);
        sim.mark_bad(3);
        assert!(!sim.is_bad_block(0).unwrap());
        assert!(sim.is_bad_block(3 * 256).unwrap());

        sim.fail_bad_query(1);
        assert!(sim.is_bad_block(256).is_err());
    }
}

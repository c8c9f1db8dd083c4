//! Device query layer over the Linux MTD ioctl interface.

use super::{EccStats, EraseRegion, FlashInspect, MtdFlags, MtdGeometry, MtdKind};
use crate::error::CheckError;

use log::debug;

use std::fs::File;
use std::io;
use std::mem::MaybeUninit;
use std::os::{fd::AsRawFd, unix::fs::FileExt};
use std::path::Path;

/// Flash inspection over an open /dev/mtdX file
#[derive(Debug)]
pub struct MtdDevice {
    file: File,
    geometry: MtdGeometry,
    ecc: EccStats,
}

impl MtdDevice {
    /// Open an `mtd` device read-only, by path (e.g. "/dev/mtd0"), and take
    /// the geometry and ECC snapshots. Either query failing is fatal.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CheckError> {
        let file =
            File::options()
                .read(true)
                .open(&path)
                .map_err(|source| CheckError::Open {
                    path: path.as_ref().into(),
                    source,
                })?;

        let info = unsafe {
            let mut info = MaybeUninit::<ioctl::mtd_info_user>::uninit();
            ioctl::memgetinfo(file.as_raw_fd(), info.as_mut_ptr()).map_err(|source| {
                CheckError::Query {
                    what: "MEMGETINFO",
                    source,
                }
            })?;
            info.assume_init()
        };

        let kind = MtdKind::from_code(info.r#type).ok_or_else(|| {
            CheckError::Unsupported(format!("unrecognized MTD type code {}", info.r#type))
        })?;

        let geometry = MtdGeometry {
            kind,
            flags: MtdFlags(info.flags),
            size: u64::from(info.size),
            erase_size: info.erasesize,
            write_size: info.writesize,
            oob_size: info.oobsize,
        };

        let ecc = unsafe {
            let mut stats = MaybeUninit::<ioctl::mtd_ecc_stats>::uninit();
            ioctl::eccgetstats(file.as_raw_fd(), stats.as_mut_ptr()).map_err(|source| {
                CheckError::Query {
                    what: "ECCGETSTATS",
                    source,
                }
            })?;
            stats.assume_init()
        };
        let ecc = EccStats {
            corrected: ecc.corrected,
            failed: ecc.failed,
            bad_blocks: ecc.badblocks,
            bbt_blocks: ecc.bbtblocks,
        };

        debug!(
            "{}: type={}, size={}, erasesize={}, writesize={}, oobsize={}, bad={}, bbt={}",
            path.as_ref().display(),
            geometry.kind,
            geometry.size,
            geometry.erase_size,
            geometry.write_size,
            geometry.oob_size,
            ecc.bad_blocks,
            ecc.bbt_blocks,
        );

        Ok(Self {
            file,
            geometry,
            ecc,
        })
    }
}

impl FlashInspect for MtdDevice {
    fn geometry(&self) -> MtdGeometry {
        self.geometry
    }

    fn ecc_stats(&self) -> EccStats {
        self.ecc
    }

    fn is_bad_block(&mut self, offset: u64) -> Result<bool, CheckError> {
        let ret = unsafe { ioctl::memgetbadblock(self.file.as_raw_fd(), &offset) }.map_err(
            |source| CheckError::Query {
                what: "MEMGETBADBLOCK",
                source,
            },
        )?;
        Ok(ret > 0)
    }

    fn read_block(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read_at(&mut buf[filled..], offset + filled as u64) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn regions(&mut self) -> Result<Vec<EraseRegion>, CheckError> {
        let mut count: i32 = 0;
        unsafe { ioctl::memgetregioncount(self.file.as_raw_fd(), &mut count) }.map_err(
            |source| CheckError::Query {
                what: "MEMGETREGIONCOUNT",
                source,
            },
        )?;

        // Zero regions is the common case: uniform erase geometry.
        let mut regions = Vec::with_capacity(count.max(0) as usize);
        for index in 0..count.max(0) as u32 {
            let mut info = ioctl::region_info_user {
                offset: 0,
                erasesize: 0,
                numblocks: 0,
                regionindex: index,
            };
            unsafe { ioctl::memgetregioninfo(self.file.as_raw_fd(), &mut info) }.map_err(
                |source| CheckError::Query {
                    what: "MEMGETREGIONINFO",
                    source,
                },
            )?;
            regions.push(EraseRegion {
                index,
                offset: u64::from(info.offset),
                erase_size: info.erasesize,
                block_count: info.numblocks,
            });
        }
        Ok(regions)
    }
}

mod ioctl {
    //! The private ioctls for interfacing with MTD devices

    use nix::{ioctl_read, ioctl_readwrite, ioctl_write_ptr};

    const MTD_IOC_MAGIC: u8 = b'M';

    #[repr(C)]
    pub struct mtd_info_user {
        pub r#type: u8,
        pub flags: u32,
        pub size: u32,
        pub erasesize: u32,
        pub writesize: u32,
        pub oobsize: u32,
        pub padding: u64,
    }
    ioctl_read!(memgetinfo, MTD_IOC_MAGIC, 1, mtd_info_user);

    ioctl_read!(memgetregioncount, MTD_IOC_MAGIC, 7, i32);

    #[repr(C)]
    pub struct region_info_user {
        pub offset: u32,
        pub erasesize: u32,
        pub numblocks: u32,
        pub regionindex: u32,
    }
    ioctl_readwrite!(memgetregioninfo, MTD_IOC_MAGIC, 8, region_info_user);

    ioctl_write_ptr!(memgetbadblock, MTD_IOC_MAGIC, 11, u64);

    #[repr(C)]
    pub struct mtd_ecc_stats {
        pub corrected: u32,
        pub failed: u32,
        pub badblocks: u32,
        pub bbtblocks: u32,
    }
    ioctl_read!(eccgetstats, MTD_IOC_MAGIC, 18, mtd_ecc_stats);
}

//! Error types for mtd-check.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Fatal conditions the tool can run into.
///
/// Short reads are deliberately not represented here: they are logged and
/// tallied by the scanner, never propagated.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The device node could not be opened
    #[error("cannot open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A device-control query failed; no partial snapshot is usable
    #[error("{what} failed: {source}")]
    Query {
        what: &'static str,
        #[source]
        source: Errno,
    },

    /// The handle refers to no physical flash device (MTD_ABSENT)
    #[error("no flash device is present behind this handle")]
    AbsentDevice,

    /// The device exists but block-level scanning is meaningless for it
    #[error("device cannot be scanned: {0}")]
    Unsupported(String),
}

impl CheckError {
    /// Process exit status for this error, per the tool's conventions.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::AbsentDevice => 2,
            _ => 1,
        }
    }
}

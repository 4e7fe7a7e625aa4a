//! Error taxonomy for the boundary operations that can fail.
//!
//! Internal hot-path conditions (undefined opcode, unknown SWI, unmapped
//! access) are not modelled here - they are log records that flip
//! `running` false, not `Result`s. This type only covers the operations
//! a host application calls across the FFI/library boundary: loading a
//! ROM, loading a BIOS image, and snapshotting state.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmuError {
    #[error("ROM image too large: {0} bytes (max 32 MiB)")]
    RomTooLarge(usize),

    #[error("ROM image is empty")]
    RomEmpty,

    #[error("BIOS image must be exactly 16384 bytes, got {0}")]
    BadBiosSize(usize),

    #[error("save state buffer too small: need {need}, have {have}")]
    SaveStateTooSmall { need: usize, have: usize },

    #[error("save state buffer corrupt or from an incompatible version")]
    SaveStateCorrupt,

    #[error("no ROM loaded")]
    NoRomLoaded,
}

pub type EmuResult<T> = Result<T, EmuError>;

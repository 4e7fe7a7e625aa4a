//! UI-to-emulation command queue payload.
//!
//! The emulation worker owns the CPU, bus, and scheduler outright; the
//! UI worker never touches them directly. Every cross-thread request
//! is one of these variants, drained at the emulation worker's inner-
//! loop boundaries only (never mid-instruction).

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    /// Stop after the given number of additional cycles, or immediately if `None`.
    Stop(Option<u64>),
    Reset,
    LoadRom(Vec<u8>),
    LoadBios(Vec<u8>),
    /// KEYINPUT-polarity mask: 1 = released, 0 = pressed.
    UpdateKeyInput(u16),
    ClearLog,
}

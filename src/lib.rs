//! Game Boy Advance Emulator Core
//!
//! A platform-agnostic emulator core with a stable C ABI. No OS APIs
//! are used directly - all I/O crosses the boundary as byte buffers,
//! and the host application drives the run loop on its own thread.
//!
//! # Architecture
//!
//! - `memory`: work RAM, IWRAM, VRAM, OAM, palette RAM, cartridge ROM/save
//! - `peripherals`: interrupt controller, keypad, timers, DMA, APU, PPU
//! - `bus`: address decoding and memory-mapped I/O routing
//! - `cpu`: ARM7TDMI core (ARM and THUMB decode, exception entry)
//! - `hle_bios`: high-level emulation of the BIOS SWI table
//! - `scheduler`: min-heap of future peripheral events
//! - `command`: cross-thread command queue payload
//! - `emu`: orchestrator tying the above into a run loop
//!
//! # Memory Map (32-bit address space)
//!
//! | Address Range         | Region                |
//! |------------------------|-----------------------|
//! | 0x0000_0000-0x0000_3FFF | BIOS ROM (16 KiB)     |
//! | 0x0200_0000-0x0203_FFFF | External work RAM     |
//! | 0x0300_0000-0x0300_7FFF | Internal work RAM     |
//! | 0x0400_0000-0x0400_03FE | I/O registers         |
//! | 0x0500_0000-0x0500_03FF | Palette RAM           |
//! | 0x0600_0000-0x0601_7FFF | VRAM                  |
//! | 0x0700_0000-0x0700_03FF | OAM                   |
//! | 0x0800_0000-0x09FF_FFFF | Cartridge ROM         |
//! | 0x0E00_0000-...         | Cartridge save memory |

pub mod command;
pub mod cpu;
pub mod error;
mod hle_bios;
pub mod memory;
pub mod peripherals;
pub mod scheduler;

pub mod bus;
mod emu;
#[cfg(feature = "wasm")]
mod wasm;

use std::ptr;
use std::slice;

pub use emu::{Emu, LogRecord, StopReason};
#[cfg(feature = "wasm")]
pub use wasm::WasmEmu;

pub(crate) fn error_code(err: &error::EmuError) -> i32 {
    use error::EmuError::*;
    match err {
        RomTooLarge(_) => -1,
        RomEmpty => -2,
        BadBiosSize(_) => -3,
        SaveStateTooSmall { .. } => -4,
        SaveStateCorrupt => -5,
        NoRomLoaded => -6,
    }
}

/// Create a new emulator instance.
#[no_mangle]
pub extern "C" fn emu_create() -> *mut Emu {
    Box::into_raw(Box::new(Emu::new()))
}

/// Destroy an emulator instance. Safe to call with a null pointer.
#[no_mangle]
pub extern "C" fn emu_destroy(emu: *mut Emu) {
    if !emu.is_null() {
        unsafe {
            drop(Box::from_raw(emu));
        }
    }
}

/// Load a cartridge ROM image. Returns 0 on success, a negative error
/// code on failure.
#[no_mangle]
pub extern "C" fn emu_load_rom(emu: *mut Emu, data: *const u8, len: usize) -> i32 {
    if emu.is_null() || data.is_null() {
        return -1;
    }
    let emu = unsafe { &mut *emu };
    let rom = unsafe { slice::from_raw_parts(data, len) };
    match emu.load_rom(rom) {
        Ok(()) => 0,
        Err(err) => error_code(&err),
    }
}

/// Load a 16 KiB BIOS image, switching off HLE BIOS interception in
/// favor of executing the supplied image directly.
#[no_mangle]
pub extern "C" fn emu_load_bios(emu: *mut Emu, data: *const u8, len: usize) -> i32 {
    if emu.is_null() || data.is_null() {
        return -1;
    }
    let emu = unsafe { &mut *emu };
    let bios = unsafe { slice::from_raw_parts(data, len) };
    match emu.load_bios(bios) {
        Ok(()) => 0,
        Err(err) => error_code(&err),
    }
}

/// Queue a `Command::Start`. Commands are applied at the next
/// `emu_run_cycles` call's inner-loop boundary, not immediately.
#[no_mangle]
pub extern "C" fn emu_queue_start(emu: *const Emu) {
    if emu.is_null() {
        return;
    }
    let emu = unsafe { &*emu };
    emu.push_command(command::Command::Start);
}

/// Queue a `Command::Stop`. `cycles < 0` means stop immediately;
/// otherwise run `cycles` more before stopping.
#[no_mangle]
pub extern "C" fn emu_queue_stop(emu: *const Emu, cycles: i64) {
    if emu.is_null() {
        return;
    }
    let emu = unsafe { &*emu };
    let delay = if cycles < 0 { None } else { Some(cycles as u64) };
    emu.push_command(command::Command::Stop(delay));
}

/// Reset the emulator to its post-BIOS-handoff state.
#[no_mangle]
pub extern "C" fn emu_reset(emu: *mut Emu) {
    if emu.is_null() {
        return;
    }
    unsafe { &mut *emu }.reset();
}

/// Run the emulator for up to `cycles` cycles, draining the command
/// queue first. Returns the number of cycles actually executed.
#[no_mangle]
pub extern "C" fn emu_run_cycles(emu: *mut Emu, cycles: u64) -> u64 {
    if emu.is_null() {
        return 0;
    }
    unsafe { &mut *emu }.run_cycles(cycles)
}

/// Width and height of the framebuffer `emu_render_argb8888` fills.
#[no_mangle]
pub extern "C" fn emu_framebuffer_size(emu: *const Emu, w: *mut i32, h: *mut i32) {
    if emu.is_null() {
        return;
    }
    let emu = unsafe { &*emu };
    let (width, height) = emu.framebuffer_size();
    if !w.is_null() {
        unsafe { *w = width as i32 };
    }
    if !h.is_null() {
        unsafe { *h = height as i32 };
    }
}

/// Convert the PPU's raw framebuffer into packed ARGB8888, writing
/// `width * height` words into `out`. The caller owns `out`.
#[no_mangle]
pub extern "C" fn emu_render_argb8888(emu: *const Emu, out: *mut u32, cap: usize) {
    if emu.is_null() || out.is_null() {
        return;
    }
    let emu = unsafe { &*emu };
    let buffer = unsafe { slice::from_raw_parts_mut(out, cap) };
    emu.render_argb8888(buffer);
}

/// Non-zero if a frame completed since the last call (consuming the flag).
#[no_mangle]
pub extern "C" fn emu_take_update_screen(emu: *mut Emu) -> i32 {
    if emu.is_null() {
        return 0;
    }
    unsafe { &mut *emu }.take_update_screen() as i32
}

/// Drain queued stereo audio samples (interleaved L/R) into `out`.
/// Returns the number of i16 values written.
#[no_mangle]
pub extern "C" fn emu_drain_audio(emu: *const Emu, out: *mut i16, cap: usize) -> usize {
    if emu.is_null() || out.is_null() {
        return 0;
    }
    let emu = unsafe { &*emu };
    let mut scratch = Vec::new();
    emu.drain_audio(&mut scratch);
    let n = scratch.len().min(cap);
    let dest = unsafe { slice::from_raw_parts_mut(out, cap) };
    dest[..n].copy_from_slice(&scratch[..n]);
    n
}

/// Update the KEYINPUT-polarity key mask (1 = released, 0 = pressed).
#[no_mangle]
pub extern "C" fn emu_set_key_input(emu: *const Emu, mask: u16) {
    if emu.is_null() {
        return;
    }
    unsafe { &*emu }.push_command(command::Command::UpdateKeyInput(mask));
}

/// Get the size needed for a save state buffer.
#[no_mangle]
pub extern "C" fn emu_save_state_size(emu: *const Emu) -> usize {
    if emu.is_null() {
        return 0;
    }
    unsafe { &*emu }.save_state_size()
}

/// Save emulator state to a buffer. Returns bytes written on success,
/// a negative error code on failure.
#[no_mangle]
pub extern "C" fn emu_save_state(emu: *const Emu, out: *mut u8, cap: usize) -> i32 {
    if emu.is_null() || out.is_null() {
        return -1;
    }
    let emu = unsafe { &*emu };
    let buffer = unsafe { slice::from_raw_parts_mut(out, cap) };
    match emu.save_state(buffer) {
        Ok(size) => size as i32,
        Err(err) => error_code(&err),
    }
}

/// Load emulator state from a buffer. Returns 0 on success, a
/// negative error code on failure.
#[no_mangle]
pub extern "C" fn emu_load_state(emu: *mut Emu, data: *const u8, len: usize) -> i32 {
    if emu.is_null() || data.is_null() {
        return -1;
    }
    let emu = unsafe { &mut *emu };
    let buffer = unsafe { slice::from_raw_parts(data, len) };
    match emu.load_state(buffer) {
        Ok(()) => 0,
        Err(err) => error_code(&err),
    }
}

/// Number of log records queued since the last `emu_clear_log`, each
/// reporting a fatal halt condition (unknown SWI, undefined opcode,
/// unknown BIOS branch target) with the PC it occurred at.
#[no_mangle]
pub extern "C" fn emu_log_count(emu: *mut Emu) -> usize {
    if emu.is_null() {
        return 0;
    }
    unsafe { &*emu }.log_len()
}

/// Clear queued log records.
#[no_mangle]
pub extern "C" fn emu_clear_log(emu: *const Emu) {
    if emu.is_null() {
        return;
    }
    unsafe { &*emu }.push_command(command::Command::ClearLog);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_destroy() {
        let emu = emu_create();
        assert!(!emu.is_null());
        emu_destroy(emu);
    }

    #[test]
    fn test_framebuffer_size() {
        let emu = emu_create();
        let mut w: i32 = 0;
        let mut h: i32 = 0;
        emu_framebuffer_size(emu, &mut w, &mut h);
        assert_eq!(w, 240);
        assert_eq!(h, 160);
        emu_destroy(emu);
    }

    #[test]
    fn test_load_rom_and_run() {
        let emu = emu_create();
        let mut rom = vec![0u8; 0x1000];
        let b_self: u32 = 0xEAFF_FFFE;
        rom[0..4].copy_from_slice(&b_self.to_le_bytes());
        assert_eq!(emu_load_rom(emu, rom.as_ptr(), rom.len()), 0);
        let ran = emu_run_cycles(emu, 1000);
        assert!(ran > 0);
        emu_destroy(emu);
    }

    #[test]
    fn test_load_rom_rejects_null() {
        let emu = emu_create();
        assert_eq!(emu_load_rom(emu, ptr::null(), 0), -1);
        emu_destroy(emu);
    }

    #[test]
    fn test_key_input() {
        let emu = emu_create();
        emu_set_key_input(emu, 0x0000);
        emu_set_key_input(emu, 0x03FF);
        emu_destroy(emu);
    }

    #[test]
    fn test_save_state_round_trip() {
        let emu = emu_create();
        let mut rom = vec![0u8; 0x1000];
        let b_self: u32 = 0xEAFF_FFFE;
        rom[0..4].copy_from_slice(&b_self.to_le_bytes());
        emu_load_rom(emu, rom.as_ptr(), rom.len());
        emu_run_cycles(emu, 10);

        let size = emu_save_state_size(emu);
        let mut buf = vec![0u8; size];
        let written = emu_save_state(emu, buf.as_mut_ptr(), buf.len());
        assert!(written > 0);

        let other = emu_create();
        emu_load_rom(other, rom.as_ptr(), rom.len());
        assert_eq!(emu_load_state(other, buf.as_ptr(), written as usize), 0);

        emu_destroy(emu);
        emu_destroy(other);
    }
}

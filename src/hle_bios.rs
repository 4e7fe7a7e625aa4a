//! High-level emulation of the 16 KiB boot ROM.
//!
//! When no real BIOS image is loaded, `SWI` and the fixed BIOS branch
//! targets (reset, post-IRQ, post-halt, post-SWI, intr-wait loop) are
//! intercepted here instead of being interpreted as ARM code. Handlers
//! are host-language functions operating directly on the register file
//! and the bus; they never flow through `Cpu::step`'s normal decode.

use crate::bus::Bus;
use crate::cpu::flags::Mode;
use crate::cpu::Cpu;

/// Fixed constant the real BIOS checksum routine returns.
const BIOS_CHECKSUM: u32 = 0xBAAE_187F;

/// Dispatch `SWI number`. Returns `true` if handled, `false` if the
/// number has no implemented semantics (caller logs and halts).
pub fn handle_swi(cpu: &mut Cpu, bus: &mut Bus, number: u32) -> bool {
    match number {
        0x00 => soft_reset(cpu, bus),
        0x01 => register_ram_reset(cpu, bus),
        0x02 => halt(bus),
        0x03 => stop(bus),
        0x04 => intr_wait(cpu, bus),
        0x05 => vblank_intr_wait(cpu, bus),
        0x06 => div(cpu, false),
        0x07 => div(cpu, true),
        0x08 => sqrt(cpu),
        0x09 => arctan(cpu),
        0x0A => arctan2(cpu),
        0x0B => cpu_set(cpu, bus),
        0x0C => cpu_fast_set(cpu, bus),
        0x0D => {
            cpu.r[0] = BIOS_CHECKSUM;
            true
        }
        0x0E => bg_affine_set(cpu, bus),
        0x0F => obj_affine_set(cpu, bus),
        _ => false,
    }
}

// SoftReset always clears every bank the mask selects, unlike
// RegisterRamReset which reads the mask from r0.
fn soft_reset(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    let mask = 0xFFu32;
    apply_ram_reset_mask(bus, mask);
    cpu.reset();
    cpu.init_pipeline(bus);
    true
}

fn register_ram_reset(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    let mask = cpu.r[0];
    apply_ram_reset_mask(bus, mask);
    true
}

fn apply_ram_reset_mask(bus: &mut Bus, mask: u32) {
    if mask & 0x01 != 0 {
        bus.memory.ewram.iter_mut().for_each(|b| *b = 0);
    }
    if mask & 0x02 != 0 {
        // IWRAM, excluding the top 0x200 bytes used by the BIOS stack/IRQ vector.
        let keep_from = crate::memory::addr::IWRAM_SIZE.saturating_sub(0x200);
        for b in bus.memory.iwram[..keep_from].iter_mut() {
            *b = 0;
        }
    }
    if mask & 0x04 != 0 {
        bus.memory.palette.iter_mut().for_each(|b| *b = 0);
    }
    if mask & 0x08 != 0 {
        bus.memory.vram.iter_mut().for_each(|b| *b = 0);
    }
    if mask & 0x10 != 0 {
        bus.memory.oam.iter_mut().for_each(|b| *b = 0);
    }
    if mask & 0x20 != 0 {
        bus.ppu.reset();
    }
    if mask & 0x40 != 0 {
        bus.dma.reset();
        bus.timers.reset();
    }
    if mask & 0x80 != 0 {
        bus.apu.reset();
    }
}

fn halt(bus: &mut Bus) -> bool {
    bus.halted = true;
    true
}

fn stop(bus: &mut Bus) -> bool {
    bus.stopped = true;
    true
}

/// IntrWait / VBlankIntrWait are specified as "spin until specified IF
/// bits set"; the CPU's instruction loop already parks on `halted`
/// and wakes on any pending IRQ, so the host-language shortcut is to
/// park the same way and let the orchestrator's interrupt check do
/// the waking instead of interpreting BIOS's busy-wait loop.
fn intr_wait(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    let _discard_old = cpu.r[0];
    let _wait_flags = cpu.r[1];
    bus.halted = true;
    true
}

fn vblank_intr_wait(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    cpu.r[0] = 1;
    cpu.r[1] = crate::peripherals::interrupt::sources::VBLANK as u32;
    bus.halted = true;
    true
}

fn div(cpu: &mut Cpu, swapped: bool) -> bool {
    let (numer, denom) = if swapped { (cpu.r[1] as i32, cpu.r[0] as i32) } else { (cpu.r[0] as i32, cpu.r[1] as i32) };
    if denom == 0 {
        // Real hardware hangs; we report zero rather than lock up the core.
        cpu.r[0] = 0;
        cpu.r[1] = numer as u32;
        cpu.r[3] = 0;
        return true;
    }
    let quotient = numer.wrapping_div(denom);
    let remainder = numer.wrapping_rem(denom);
    cpu.r[0] = quotient as u32;
    cpu.r[1] = remainder as u32;
    cpu.r[3] = quotient.unsigned_abs();
    true
}

fn sqrt(cpu: &mut Cpu) -> bool {
    let value = cpu.r[0];
    cpu.r[0] = (value as f64).sqrt() as u32;
    true
}

/// Real BIOS ArcTan is a 14-bit fixed-point polynomial approximation
/// with known inaccuracy near +-1.0; this uses the mathematically
/// exact `atan` scaled to the same 1.14 output format instead of
/// reproducing the polynomial's specific error curve.
fn arctan(cpu: &mut Cpu) -> bool {
    let x = fixed_14_to_f64(cpu.r[0] as i32);
    let angle = x.atan() / std::f64::consts::FRAC_PI_2 * 0x4000 as f64;
    cpu.r[0] = (angle as i32) as u32;
    true
}

fn arctan2(cpu: &mut Cpu) -> bool {
    let x = fixed_14_to_f64(cpu.r[0] as i32);
    let y = fixed_14_to_f64(cpu.r[1] as i32);
    let mut angle = y.atan2(x) / (2.0 * std::f64::consts::PI) * 0x1_0000 as f64;
    if angle < 0.0 {
        angle += 0x1_0000 as f64;
    }
    cpu.r[0] = (angle as u32) & 0xFFFF;
    true
}

fn fixed_14_to_f64(v: i32) -> f64 {
    v as f64 / (1 << 14) as f64
}

/// CpuSet: r0 = source, r1 = dest, r2 = control word (bits 0..20 =
/// length in units, bit 24 = fixed source, bit 26 = 32-bit transfer).
fn cpu_set(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    let src = cpu.r[0];
    let dst = cpu.r[1];
    let control = cpu.r[2];
    let count = control & 0x1F_FFFF;
    let fixed_source = control & (1 << 24) != 0;
    let word = control & (1 << 26) != 0;
    let unit = if word { 4 } else { 2 };

    let mut src_addr = src;
    let mut dst_addr = dst;
    for _ in 0..count {
        if word {
            let (v, _) = bus.read::<u32>(src_addr, false);
            bus.write::<u32>(dst_addr, v, false);
        } else {
            let (v, _) = bus.read::<u16>(src_addr, false);
            bus.write::<u16>(dst_addr, v, false);
        }
        if !fixed_source {
            src_addr = src_addr.wrapping_add(unit);
        }
        dst_addr = dst_addr.wrapping_add(unit);
    }
    true
}

/// CpuFastSet: same control-word layout as CpuSet but always 32-bit,
/// and length is rounded up to a multiple of 8 words the way real
/// hardware's block-copy microcode does.
fn cpu_fast_set(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    let src = cpu.r[0];
    let dst = cpu.r[1];
    let control = cpu.r[2];
    let count = (control & 0x1F_FFFF).div_ceil(8) * 8;
    let fixed_source = control & (1 << 24) != 0;

    let mut src_addr = src;
    let mut dst_addr = dst;
    for _ in 0..count {
        let (v, _) = bus.read::<u32>(src_addr, false);
        bus.write::<u32>(dst_addr, v, false);
        if !fixed_source {
            src_addr = src_addr.wrapping_add(4);
        }
        dst_addr = dst_addr.wrapping_add(4);
    }
    true
}

/// BgAffineSet: r0 = source array of 20-byte entries (origin X/Y in
/// 8.8 fixed, display X/Y, scale X/Y in 8.8 fixed, angle 0..0xFFFF),
/// r1 = dest array of 16-byte entries (pa/pb/pc/pd in 8.8 fixed), r2 = count.
fn bg_affine_set(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    let mut src = cpu.r[0];
    let mut dst = cpu.r[1];
    let count = cpu.r[2];

    for _ in 0..count {
        let origin_x = bus.read::<u32>(src, false).0 as i32 as f64 / 256.0;
        let origin_y = bus.read::<u32>(src.wrapping_add(4), false).0 as i32 as f64 / 256.0;
        let disp_x = bus.read::<u16>(src.wrapping_add(8), false).0 as i16 as f64;
        let disp_y = bus.read::<u16>(src.wrapping_add(10), false).0 as i16 as f64;
        let scale_x = bus.read::<u16>(src.wrapping_add(12), false).0 as i16 as f64 / 256.0;
        let scale_y = bus.read::<u16>(src.wrapping_add(14), false).0 as i16 as f64 / 256.0;
        let angle = bus.read::<u16>(src.wrapping_add(16), false).0;

        let (pa, pb, pc, pd) = affine_matrix(scale_x, scale_y, angle);
        bus.write::<u16>(dst, pa, false);
        bus.write::<u16>(dst.wrapping_add(2), pb, false);
        bus.write::<u16>(dst.wrapping_add(4), pc, false);
        bus.write::<u16>(dst.wrapping_add(6), pd, false);

        let ref_x = origin_x - (disp_x * fixed8(pa) + disp_y * fixed8(pb));
        let ref_y = origin_y - (disp_x * fixed8(pc) + disp_y * fixed8(pd));
        bus.write::<u32>(dst.wrapping_add(8), (ref_x * 256.0) as i32 as u32, false);
        bus.write::<u32>(dst.wrapping_add(12), (ref_y * 256.0) as i32 as u32, false);

        src = src.wrapping_add(20);
        dst = dst.wrapping_add(16);
    }
    true
}

/// ObjAffineSet: r0 = source array of 8-byte entries (scale X/Y 8.8
/// fixed, angle), r1 = dest array, r2 = count, r3 = dest stride in bytes.
fn obj_affine_set(cpu: &mut Cpu, bus: &mut Bus) -> bool {
    let mut src = cpu.r[0];
    let mut dst = cpu.r[1];
    let count = cpu.r[2];
    let stride = cpu.r[3];

    for _ in 0..count {
        let scale_x = bus.read::<u16>(src, false).0 as i16 as f64 / 256.0;
        let scale_y = bus.read::<u16>(src.wrapping_add(2), false).0 as i16 as f64 / 256.0;
        let angle = bus.read::<u16>(src.wrapping_add(4), false).0;

        let (pa, pb, pc, pd) = affine_matrix(scale_x, scale_y, angle);
        bus.write::<u16>(dst, pa, false);
        bus.write::<u16>(dst.wrapping_add(stride), pb, false);
        bus.write::<u16>(dst.wrapping_add(stride * 2), pc, false);
        bus.write::<u16>(dst.wrapping_add(stride * 3), pd, false);

        src = src.wrapping_add(8);
        dst = dst.wrapping_add(stride * 4);
    }
    true
}

fn affine_matrix(scale_x: f64, scale_y: f64, angle: u16) -> (u16, u16, u16, u16) {
    let theta = angle as f64 / 0x1_0000 as f64 * 2.0 * std::f64::consts::PI;
    let (sin, cos) = theta.sin_cos();
    let pa = (cos * scale_x * 256.0) as i32 as u16;
    let pb = (-sin * scale_y * 256.0) as i32 as u16;
    let pc = (sin * scale_x * 256.0) as i32 as u16;
    let pd = (cos * scale_y * 256.0) as i32 as u16;
    (pa, pb, pc, pd)
}

fn fixed8(v: u16) -> f64 {
    v as i16 as f64 / 256.0
}

/// `true` if `pc` is one of the canonical HLE trampoline addresses a
/// branch into the BIOS region would otherwise hit.
pub fn is_known_bios_target(pc: u32) -> bool {
    matches!(pc, 0x0000_0000 | 0x0000_0008 | 0x0000_0018 | 0x0000_0138 | 0x0000_01B4 | 0x0000_0170 | 0x0000_0348)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;

    #[test]
    fn div_matches_published_example() {
        let mut cpu = Cpu::new();
        cpu.r[0] = (-1000i32) as u32;
        cpu.r[1] = 7;
        div(&mut cpu, false);
        assert_eq!(cpu.r[0] as i32, -142);
        assert_eq!(cpu.r[1] as i32, -6);
        assert_eq!(cpu.r[3], 142);
    }

    #[test]
    fn div_by_zero_does_not_panic() {
        let mut cpu = Cpu::new();
        cpu.r[0] = 10;
        cpu.r[1] = 0;
        assert!(div(&mut cpu, false));
    }

    #[test]
    fn sqrt_of_perfect_square() {
        let mut cpu = Cpu::new();
        cpu.r[0] = 144;
        sqrt(&mut cpu);
        assert_eq!(cpu.r[0], 12);
    }

    #[test]
    fn get_bios_checksum_returns_constant() {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        handle_swi(&mut cpu, &mut bus, 0x0D);
        assert_eq!(cpu.r[0], BIOS_CHECKSUM);
    }

    #[test]
    fn cpu_set_copies_halfwords() {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        bus.write::<u16>(crate::memory::addr::EWRAM_START, 0xBEEF, false);
        cpu.r[0] = crate::memory::addr::EWRAM_START;
        cpu.r[1] = crate::memory::addr::EWRAM_START + 0x100;
        cpu.r[2] = 1;
        cpu_set(&mut cpu, &mut bus);
        let (v, _) = bus.read::<u16>(crate::memory::addr::EWRAM_START + 0x100, false);
        assert_eq!(v, 0xBEEF);
    }

    #[test]
    fn unknown_swi_reports_unhandled() {
        let mut cpu = Cpu::new();
        let mut bus = Bus::new();
        assert!(!handle_swi(&mut cpu, &mut bus, 0x2A));
    }
}

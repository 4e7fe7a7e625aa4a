//! ARM7TDMI CPU implementation.
//!
//! # Module organization
//!
//! - `flags`: CPSR bit constants, mode encodings, condition evaluation
//! - `decode_arm`: ARM instruction execution, classified by bits 27..20 ‖ 7..4
//! - `decode_thumb`: THUMB instruction execution, all 19 formats
//! - `shifter`: the barrel shifter shared by data processing and single-transfer addressing
//!
//! # Register set
//!
//! Sixteen general registers, r13 (SP) and r14 (LR) conventionally but
//! not architecturally special, r15 (PC). FIQ banks r8-r14; Supervisor,
//! Abort, IRQ, and Undefined each bank only r13/r14. User and System
//! share every register, including r13/r14.
//!
//! # References
//! - ARM7TDMI Data Sheet (ARM DDI 0029)
//! - GBATEK (CPU / memory / interrupt sections)

use crate::bus::Bus;

pub mod flags;
mod decode_arm;
mod decode_thumb;
mod shifter;

#[cfg(test)]
mod tests;

pub use flags::Mode;

const IRQ_VECTOR: u32 = 0x0000_0018;
const SWI_VECTOR: u32 = 0x0000_0008;

/// Outcome of `Cpu::step`, reported up to the orchestrator so it can
/// decide whether to keep running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Normal,
    Halted,
    UndefinedArm(u32),
    UndefinedThumb(u16),
    UnknownSwi(u32),
}

pub struct Cpu {
    pub r: [u32; 16],
    pub cpsr: u32,
    mode: Mode,

    spsr_fiq: u32,
    spsr_svc: u32,
    spsr_abt: u32,
    spsr_irq: u32,
    spsr_und: u32,

    bank_8_12_fiq: [u32; 5],
    bank_8_12_other: [u32; 5],
    bank_13_14_usr: [u32; 2],
    bank_13_14_fiq: [u32; 2],
    bank_13_14_svc: [u32; 2],
    bank_13_14_abt: [u32; 2],
    bank_13_14_irq: [u32; 2],
    bank_13_14_und: [u32; 2],

    /// Decoded-stage opcode, for the pipeline-invariant testable property.
    pub pipeline_decode: u32,
    /// Fetch-stage opcode.
    pub pipeline_fetch: u32,
}

impl Cpu {
    pub fn new() -> Self {
        let mut cpu = Self {
            r: [0; 16],
            cpsr: Mode::Supervisor.bits() | flags::IRQ_DISABLE | flags::FIQ_DISABLE,
            mode: Mode::Supervisor,
            spsr_fiq: 0,
            spsr_svc: 0,
            spsr_abt: 0,
            spsr_irq: 0,
            spsr_und: 0,
            bank_8_12_fiq: [0; 5],
            bank_8_12_other: [0; 5],
            bank_13_14_usr: [0; 2],
            bank_13_14_fiq: [0; 2],
            bank_13_14_svc: [0x0300_7FE0, 0],
            bank_13_14_abt: [0x0300_7FA0, 0],
            bank_13_14_irq: [0x0300_7FA0, 0],
            bank_13_14_und: [0x0300_7F00, 0],
            pipeline_decode: 0,
            pipeline_fetch: 0,
        };
        cpu.switch_to(Mode::System);
        cpu.r[13] = 0x0300_7F00;
        cpu
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Load the pipeline after a reset so the first `step()` call
    /// observes the pipeline invariant from instruction zero.
    pub fn init_pipeline(&mut self, bus: &mut Bus) {
        self.r[15] = 0;
        self.refill_pipeline(bus);
    }

    pub fn thumb(&self) -> bool {
        self.cpsr & flags::THUMB != 0
    }

    /// THUMB state of the mode this one was entered from, per the
    /// SPSR that exception entry stashed the old CPSR into. Lets HLE
    /// BIOS code recover the trapping instruction's width after mode
    /// switch has already cleared the live T bit.
    pub fn trapped_from_thumb(&self) -> bool {
        self.current_spsr() & flags::THUMB != 0
    }

    fn irq_disabled(&self) -> bool {
        self.cpsr & flags::IRQ_DISABLE != 0
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Value a general instruction sees when it names r15 as an
    /// operand: the pipeline puts PC ahead of the executing
    /// instruction by 8 bytes in ARM state, 4 in THUMB state.
    pub(crate) fn pc_operand(&self) -> u32 {
        self.r[15].wrapping_add(if self.thumb() { 4 } else { 8 })
    }

    pub(crate) fn get_reg(&self, idx: u32) -> u32 {
        if idx == 15 { self.pc_operand() } else { self.r[idx as usize] }
    }

    pub(crate) fn n_flag(&self) -> bool { self.cpsr & flags::N != 0 }
    fn z_flag(&self) -> bool { self.cpsr & flags::Z != 0 }
    fn c_flag(&self) -> bool { self.cpsr & flags::C != 0 }
    fn v_flag(&self) -> bool { self.cpsr & flags::V != 0 }

    fn set_nz(&mut self, value: u32) {
        self.cpsr = (self.cpsr & !(flags::N | flags::Z))
            | if value & 0x8000_0000 != 0 { flags::N } else { 0 }
            | if value == 0 { flags::Z } else { 0 };
    }

    fn set_flag(&mut self, bit: u32, set: bool) {
        if set {
            self.cpsr |= bit;
        } else {
            self.cpsr &= !bit;
        }
    }

    fn current_spsr(&self) -> u32 {
        match self.mode {
            Mode::Fiq => self.spsr_fiq,
            Mode::Supervisor => self.spsr_svc,
            Mode::Abort => self.spsr_abt,
            Mode::Irq => self.spsr_irq,
            Mode::Undefined => self.spsr_und,
            Mode::User | Mode::System => self.cpsr,
        }
    }

    fn set_current_spsr(&mut self, value: u32) {
        match self.mode {
            Mode::Fiq => self.spsr_fiq = value,
            Mode::Supervisor => self.spsr_svc = value,
            Mode::Abort => self.spsr_abt = value,
            Mode::Irq => self.spsr_irq = value,
            Mode::Undefined => self.spsr_und = value,
            Mode::User | Mode::System => {}
        }
    }

    /// Swap the banked register set for `new_mode`, leaving `r[0..8]`,
    /// `r[15]`, and non-banked portions of `r[8..15]` untouched.
    fn switch_to(&mut self, new_mode: Mode) {
        if new_mode == self.mode {
            return;
        }

        if self.mode == Mode::Fiq {
            self.bank_8_12_fiq.copy_from_slice(&self.r[8..13]);
        } else {
            self.bank_8_12_other.copy_from_slice(&self.r[8..13]);
        }
        let old_13_14 = [self.r[13], self.r[14]];
        match self.mode {
            Mode::User | Mode::System => self.bank_13_14_usr = old_13_14,
            Mode::Fiq => self.bank_13_14_fiq = old_13_14,
            Mode::Supervisor => self.bank_13_14_svc = old_13_14,
            Mode::Abort => self.bank_13_14_abt = old_13_14,
            Mode::Irq => self.bank_13_14_irq = old_13_14,
            Mode::Undefined => self.bank_13_14_und = old_13_14,
        }

        if new_mode == Mode::Fiq {
            self.r[8..13].copy_from_slice(&self.bank_8_12_fiq);
        } else {
            self.r[8..13].copy_from_slice(&self.bank_8_12_other);
        }
        let new_13_14 = match new_mode {
            Mode::User | Mode::System => self.bank_13_14_usr,
            Mode::Fiq => self.bank_13_14_fiq,
            Mode::Supervisor => self.bank_13_14_svc,
            Mode::Abort => self.bank_13_14_abt,
            Mode::Irq => self.bank_13_14_irq,
            Mode::Undefined => self.bank_13_14_und,
        };
        self.r[13] = new_13_14[0];
        self.r[14] = new_13_14[1];
        self.mode = new_mode;
        self.cpsr = (self.cpsr & !flags::MODE_MASK) | new_mode.bits();
    }

    /// Write CPSR through a field mask built from the MSR instruction's
    /// `fsxc` bits: c (bits 0-7, includes the mode field), x (8-15), s
    /// (16-23), f (24-31). A mask that touches the c field can change
    /// mode, honouring that a T-bit change from a non-privileged mode
    /// is silently rejected.
    fn write_cpsr(&mut self, value: u32, mask: u32) {
        if mask & 0x0000_00FF != 0 {
            if let Some(m) = Mode::from_bits(value) {
                self.switch_to(m);
            }
        }
        let mut merged = (self.cpsr & !mask) | (value & mask);
        if !self.mode.is_privileged() {
            merged = (merged & !flags::THUMB) | (self.cpsr & flags::THUMB);
        }
        self.cpsr = merged;
    }

    fn refill_pipeline(&mut self, bus: &mut Bus) {
        if self.thumb() {
            self.pipeline_decode = bus.peek::<u16>(self.r[15]) as u32;
            self.pipeline_fetch = bus.peek::<u16>(self.r[15].wrapping_add(2)) as u32;
        } else {
            self.pipeline_decode = bus.peek::<u32>(self.r[15]);
            self.pipeline_fetch = bus.peek::<u32>(self.r[15].wrapping_add(4));
        }
    }

    /// Execute one instruction (or service a pending IRQ), returning
    /// the number of cycles consumed: the base fetch cycle plus
    /// whatever wait-states, multiply-internal cycles, or block-
    /// transfer register accesses the instruction incurred.
    pub fn step(&mut self, bus: &mut Bus) -> (u64, StepOutcome) {
        if !self.irq_disabled() && bus.interrupts.line_active() {
            self.enter_irq(bus);
            return (3, StepOutcome::Normal);
        }

        if self.thumb() {
            let pc = self.r[15] & !1;
            let opcode = self.pipeline_decode as u16;
            let (cycles, outcome) = decode_thumb::execute(self, bus, opcode);
            match outcome {
                StepOutcome::Normal if self.r[15] == pc => {
                    self.r[15] = pc.wrapping_add(2);
                    self.pipeline_decode = self.pipeline_fetch;
                    self.pipeline_fetch = bus.peek::<u16>(self.r[15].wrapping_add(2)) as u32;
                }
                _ => self.refill_pipeline(bus),
            }
            (cycles, outcome)
        } else {
            let pc = self.r[15] & !3;
            let opcode = self.pipeline_decode;
            let cond = opcode >> 28;
            let (cycles, outcome) = if flags::condition_passes(cond, self.cpsr) {
                decode_arm::execute(self, bus, opcode)
            } else {
                (1, StepOutcome::Normal)
            };
            match outcome {
                StepOutcome::Normal if self.r[15] == pc => {
                    self.r[15] = pc.wrapping_add(4);
                    self.pipeline_decode = self.pipeline_fetch;
                    self.pipeline_fetch = bus.peek::<u32>(self.r[15].wrapping_add(4));
                }
                _ => self.refill_pipeline(bus),
            }
            (cycles, outcome)
        }
    }

    /// IRQ entry per §4.4: switch to IRQ mode, save CPSR, compute the
    /// return address, clear T, set I, vector to 0x18.
    ///
    /// `self.r[15]` at this point already holds the address of the
    /// instruction that has not yet executed (IRQs are only taken at
    /// an instruction boundary). Real hardware saves that address + 4
    /// into `LR_irq` regardless of ARM/THUMB state; an exit path must
    /// subtract the same 4 back out to resume in the right place.
    fn enter_irq(&mut self, bus: &mut Bus) {
        let return_pc = self.r[15].wrapping_add(4);
        let old_cpsr = self.cpsr;
        self.switch_to(Mode::Irq);
        self.spsr_irq = old_cpsr;
        self.r[14] = return_pc;
        self.cpsr &= !flags::THUMB;
        self.cpsr |= flags::IRQ_DISABLE;
        self.r[15] = IRQ_VECTOR;
        self.refill_pipeline(bus);
    }

    /// SWI entry. Unlike IRQ, `self.r[15]` here is still the address
    /// of the SWI instruction itself (entry happens mid-`execute`,
    /// before the pipeline advances past it), so `LR_svc` is that
    /// address plus one instruction width - already the correct
    /// resume address, needing no correction on exit.
    fn enter_swi(&mut self, bus: &mut Bus) {
        let width = if self.thumb() { 2 } else { 4 };
        let return_pc = self.r[15].wrapping_add(width);
        let old_cpsr = self.cpsr;
        self.switch_to(Mode::Supervisor);
        self.spsr_svc = old_cpsr;
        self.r[14] = return_pc;
        self.cpsr &= !flags::THUMB;
        self.cpsr |= flags::IRQ_DISABLE;
        self.r[15] = SWI_VECTOR;
        self.refill_pipeline(bus);
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

// ---------- State persistence ----------

impl Cpu {
    pub const SNAPSHOT_SIZE: usize = 16 * 4 + 4 + 4 + 5 * 4 + 5 * 4 + 2 * 4 * 6;

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SNAPSHOT_SIZE);
        for v in self.r {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(&self.cpsr.to_le_bytes());
        buf.extend_from_slice(&self.mode.bits().to_le_bytes());
        for v in [self.spsr_fiq, self.spsr_svc, self.spsr_abt, self.spsr_irq, self.spsr_und] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.bank_8_12_fiq {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for v in self.bank_8_12_other {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        for bank in [
            self.bank_13_14_usr,
            self.bank_13_14_fiq,
            self.bank_13_14_svc,
            self.bank_13_14_abt,
            self.bank_13_14_irq,
            self.bank_13_14_und,
        ] {
            for v in bank {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        buf
    }

    pub fn from_bytes(&mut self, buf: &[u8]) -> crate::error::EmuResult<()> {
        if buf.len() < Self::SNAPSHOT_SIZE {
            return Err(crate::error::EmuError::SaveStateTooSmall { need: Self::SNAPSHOT_SIZE, have: buf.len() });
        }
        let mut pos = 0;
        let mut next_u32 = |pos: &mut usize| -> u32 {
            let v = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
            *pos += 4;
            v
        };
        for i in 0..16 {
            self.r[i] = next_u32(&mut pos);
        }
        self.cpsr = next_u32(&mut pos);
        self.mode = Mode::from_bits(next_u32(&mut pos)).ok_or(crate::error::EmuError::SaveStateCorrupt)?;
        self.spsr_fiq = next_u32(&mut pos);
        self.spsr_svc = next_u32(&mut pos);
        self.spsr_abt = next_u32(&mut pos);
        self.spsr_irq = next_u32(&mut pos);
        self.spsr_und = next_u32(&mut pos);
        for i in 0..5 {
            self.bank_8_12_fiq[i] = next_u32(&mut pos);
        }
        for i in 0..5 {
            self.bank_8_12_other[i] = next_u32(&mut pos);
        }
        for bank in [
            &mut self.bank_13_14_usr,
            &mut self.bank_13_14_fiq,
            &mut self.bank_13_14_svc,
            &mut self.bank_13_14_abt,
            &mut self.bank_13_14_irq,
            &mut self.bank_13_14_und,
        ] {
            bank[0] = next_u32(&mut pos);
            bank[1] = next_u32(&mut pos);
        }
        Ok(())
    }
}

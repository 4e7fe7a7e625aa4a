//! Four DMA channels: visible SAD/DAD/CNT registers plus the
//! "shadow" latched copies taken on the enable rising edge.
//!
//! Register state and trigger-edge detection live here, grounded on
//! the teacher's `DmaControlBits` register shape; the actual transfer
//! loop (which needs the whole bus, not just DMA state) lives in
//! `Bus::service_dma`, mirroring how the source's `doDma<channel>`
//! reaches back into the shared `GameBoyAdvance` bus object.

use crate::scheduler::{EventKind, Scheduler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrControl {
    Increment,
    Decrement,
    Fixed,
    IncrementReload,
}

impl AddrControl {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0 => AddrControl::Increment,
            1 => AddrControl::Decrement,
            2 => AddrControl::Fixed,
            3 => AddrControl::IncrementReload,
            _ => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Immediate,
    VBlank,
    HBlank,
    Special,
}

impl Timing {
    fn from_bits(bits: u16) -> Self {
        match bits {
            0 => Timing::Immediate,
            1 => Timing::VBlank,
            2 => Timing::HBlank,
            3 => Timing::Special,
            _ => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DmaChannel {
    pub sad: u32,
    pub dad: u32,
    pub count: u16,
    pub control: u16,

    pub internal_sad: u32,
    pub internal_dad: u32,
    pub internal_count: u16,
    internal_control: u16,

    pub queued: bool,
}

impl DmaChannel {
    fn dst_control(&self) -> AddrControl {
        AddrControl::from_bits((self.internal_control >> 5) & 0x3)
    }

    fn src_control(&self) -> AddrControl {
        AddrControl::from_bits((self.internal_control >> 7) & 0x3)
    }

    pub fn repeat(&self) -> bool {
        self.internal_control & (1 << 9) != 0
    }

    pub fn word_size(&self) -> bool {
        self.internal_control & (1 << 10) != 0 // true = 32-bit
    }

    pub fn timing(&self) -> Timing {
        Timing::from_bits((self.internal_control >> 12) & 0x3)
    }

    pub fn irq_enable(&self) -> bool {
        self.internal_control & (1 << 14) != 0
    }

    pub fn enable(&self) -> bool {
        self.control & (1 << 15) != 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Dma {
    pub channels: [DmaChannel; 4],
}

const CHANNEL_ADDR_MASK: [u32; 4] = [0x07FF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF, 0x0FFF_FFFF];

impl Dma {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn write_control(&mut self, index: usize, value: u16, scheduler: &mut Scheduler) {
        let ch = &mut self.channels[index];
        let was_enabled = ch.enable();
        ch.control = value;

        if ch.enable() && !was_enabled {
            ch.internal_sad = ch.sad & CHANNEL_ADDR_MASK[index];
            ch.internal_dad = ch.dad & CHANNEL_ADDR_MASK[index];
            let max_count = if index == 3 { 0x1_0000 } else { 0x4000 };
            ch.internal_count = if ch.count == 0 { 0 } else { ch.count };
            ch.internal_control = value;

            let forced_fifo = (index == 1 || index == 2) && Timing::from_bits((value >> 12) & 0x3) == Timing::Special;
            if forced_fifo {
                ch.internal_count = 4;
                // force destination fixed + 32-bit transfers for FIFO timing
                ch.internal_control = (value & !(0x3 << 5)) | (2 << 5) | (1 << 10);
            } else if ch.count == 0 {
                ch.internal_count = max_count as u16;
                if max_count == 0x1_0000 {
                    ch.internal_count = 0; // u16 can't hold 0x10000; treated as 0 meaning "max" by the transfer loop
                }
            }

            let timing = Timing::from_bits((value >> 12) & 0x3);
            // channel 0 has no FIFO wiring, so "Special" timing is meaningless
            // on it and real hardware starts it immediately instead.
            let treated_as_immediate = timing == Timing::Immediate || (index == 0 && timing == Timing::Special);
            if treated_as_immediate {
                scheduler.add(2, EventKind::DmaImmediateStart(index as u8), true);
            }
        }
    }

    pub fn on_immediate_event(&mut self, index: usize) {
        if self.channels[index].enable() {
            self.channels[index].queued = true;
        }
    }

    pub fn on_vblank(&mut self) {
        for ch in &mut self.channels {
            if ch.enable() && ch.timing() == Timing::VBlank {
                ch.queued = true;
            }
        }
    }

    pub fn on_hblank(&mut self) {
        for ch in &mut self.channels {
            if ch.enable() && ch.timing() == Timing::HBlank {
                ch.queued = true;
            }
        }
    }

    /// Called by the APU when a FIFO it owns drops to the refill
    /// threshold. `channel` is 1 or 2 (the only FIFO-capable DMAs).
    pub fn on_fifo_request(&mut self, channel: usize) {
        if channel != 1 && channel != 2 {
            return;
        }
        let ch = &mut self.channels[channel];
        if ch.enable() && ch.timing() == Timing::Special {
            ch.queued = true;
        }
    }

    /// Lowest-numbered queued channel runs first.
    pub fn next_queued(&self) -> Option<usize> {
        self.channels.iter().position(|c| c.queued)
    }

    /// Apply a single unit's address-control adjustment, returning the
    /// (pre-adjustment) address to access and the step size consumed.
    pub fn step_addr(control: AddrControl, addr: &mut u32, unit_size: u32) -> u32 {
        let cur = *addr;
        match control {
            AddrControl::Increment | AddrControl::IncrementReload => *addr = addr.wrapping_add(unit_size),
            AddrControl::Decrement => *addr = addr.wrapping_sub(unit_size),
            AddrControl::Fixed => {}
        }
        cur
    }

    pub fn src_step(&self, index: usize) -> AddrControl {
        match self.channels[index].src_control() {
            // "increment and reload" is not a legal source mode; treated as increment.
            AddrControl::IncrementReload => AddrControl::Increment,
            other => other,
        }
    }

    pub fn dst_step(&self, index: usize) -> AddrControl {
        self.channels[index].dst_control()
    }

    pub fn complete(&mut self, index: usize) {
        let ch = &mut self.channels[index];
        ch.queued = false;
        if !ch.repeat() {
            ch.control &= !(1 << 15);
        }
        let dst_was_reload = ch.dst_control() == AddrControl::IncrementReload;
        ch.internal_control = ch.control;
        if dst_was_reload {
            ch.internal_dad = ch.dad & CHANNEL_ADDR_MASK[index];
        }
        if ch.repeat() && ch.timing() != Timing::Immediate {
            // a repeating non-immediate channel rearms its count for the next trigger
            ch.internal_count = if ch.count == 0 {
                if index == 3 { 0 } else { 0x4000 }
            } else {
                ch.count
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immediate_trigger_schedules_after_two_cycles() {
        let mut dma = Dma::new();
        let mut sched = Scheduler::new();
        dma.channels[0].sad = 0x0200_0000;
        dma.channels[0].dad = 0x0600_0000;
        dma.channels[0].count = 0x100;
        dma.write_control(0, 1 << 15, &mut sched); // enable, timing=immediate
        assert_eq!(sched.cycles_until_next(), 2);
        sched.advance(2);
        let due = sched.drain_due();
        assert_eq!(due, vec![EventKind::DmaImmediateStart(0)]);
        dma.on_immediate_event(0);
        assert!(dma.channels[0].queued);
    }

    #[test]
    fn priority_is_lowest_channel_first() {
        let mut dma = Dma::new();
        dma.channels[2].queued = true;
        dma.channels[2].control = 1 << 15;
        dma.channels[0].queued = true;
        dma.channels[0].control = 1 << 15;
        assert_eq!(dma.next_queued(), Some(0));
    }

    #[test]
    fn fifo_timing_forces_length_four_and_fixed_dest() {
        let mut dma = Dma::new();
        let mut sched = Scheduler::new();
        // timing=special (3) on channel 1
        dma.write_control(1, (1 << 15) | (3 << 12), &mut sched);
        assert_eq!(dma.channels[1].internal_count, 4);
        assert_eq!(dma.channels[1].dst_control(), AddrControl::Fixed);
        assert!(dma.channels[1].word_size());
    }

    #[test]
    fn non_repeating_channel_clears_enable_on_complete() {
        let mut dma = Dma::new();
        let mut sched = Scheduler::new();
        dma.channels[0].count = 4;
        dma.write_control(0, 1 << 15, &mut sched);
        dma.complete(0);
        assert!(!dma.channels[0].enable());
    }
}

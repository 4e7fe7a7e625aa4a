//! Four PSG channels, two DMA-fed PCM FIFOs, and the stereo mixer.
//!
//! No teacher module covers audio synthesis at all (the TI-84 Plus CE
//! has no programmable sound generator); this module is grounded
//! instead on the general "device struct + register read/write +
//! scheduler-driven tick" shape shared by every other peripheral in
//! this crate, with the PSG/FIFO semantics themselves drawn from the
//! GBA hardware reference this was distilled from.

use crate::peripherals::dma::Dma;
use crate::scheduler::{EventKind, Scheduler};

const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 0, 0, 0, 0, 0, 0, 1], // 12.5%
    [1, 0, 0, 0, 0, 0, 0, 1], // 25%
    [1, 0, 0, 0, 0, 1, 1, 1], // 50%
    [0, 1, 1, 1, 1, 1, 1, 0], // 75%
];

#[derive(Debug, Clone, Copy, Default)]
struct Envelope {
    start_volume: u8,
    increase: bool,
    period: u8,
    timer: u8,
    volume: u8,
}

impl Envelope {
    fn trigger(&mut self) {
        self.volume = self.start_volume;
        self.timer = self.period;
    }

    fn step(&mut self) {
        if self.period == 0 {
            return;
        }
        if self.timer > 0 {
            self.timer -= 1;
        }
        if self.timer == 0 {
            self.timer = self.period;
            if self.increase && self.volume < 15 {
                self.volume += 1;
            } else if !self.increase && self.volume > 0 {
                self.volume -= 1;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct SquareChannel {
    sweep_shift: u8,
    sweep_decrease: bool,
    sweep_time: u8,
    sweep_timer: u8,
    sweep_enabled: bool,
    shadow_freq: u16,
    has_sweep: bool,

    duty: u8,
    length_load: u8,
    length_counter: u16,
    length_enable: bool,

    envelope: Envelope,
    frequency: u16,
    frequency_timer: i32,
    duty_index: u8,
    enabled: bool,
    dac_enabled: bool,
}

impl SquareChannel {
    fn period(&self) -> i32 {
        (2048 - self.frequency as i32) * 4
    }

    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        if self.length_counter == 0 {
            self.length_counter = 64 - self.length_load as u16;
        }
        self.frequency_timer = self.period();
        self.envelope.trigger();
        if self.has_sweep {
            self.shadow_freq = self.frequency;
            self.sweep_timer = if self.sweep_time == 0 { 8 } else { self.sweep_time };
            self.sweep_enabled = self.sweep_time != 0 || self.sweep_shift != 0;
            if self.sweep_shift != 0 {
                self.sweep_calculate();
            }
        }
    }

    fn sweep_calculate(&mut self) -> u16 {
        let delta = self.shadow_freq >> self.sweep_shift;
        let new_freq = if self.sweep_decrease {
            self.shadow_freq.wrapping_sub(delta)
        } else {
            self.shadow_freq.wrapping_add(delta)
        };
        if new_freq > 2047 {
            self.enabled = false;
        }
        new_freq
    }

    fn step_sweep(&mut self) {
        if !self.has_sweep || !self.sweep_enabled {
            return;
        }
        if self.sweep_timer > 0 {
            self.sweep_timer -= 1;
        }
        if self.sweep_timer == 0 {
            self.sweep_timer = if self.sweep_time == 0 { 8 } else { self.sweep_time };
            if self.sweep_time != 0 {
                let new_freq = self.sweep_calculate();
                if new_freq <= 2047 && self.sweep_shift != 0 {
                    self.frequency = new_freq;
                    self.shadow_freq = new_freq;
                    self.sweep_calculate();
                }
            }
        }
    }

    fn step_length(&mut self) {
        if self.length_enable && self.length_counter > 0 {
            self.length_counter -= 1;
            if self.length_counter == 0 {
                self.enabled = false;
            }
        }
    }

    fn step_timer(&mut self, sub_cycles: i32) {
        self.frequency_timer -= sub_cycles;
        while self.frequency_timer <= 0 {
            self.frequency_timer += self.period().max(1);
            self.duty_index = (self.duty_index + 1) % 8;
        }
    }

    fn amplitude(&self) -> i16 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        let bit = DUTY_TABLE[self.duty as usize][self.duty_index as usize];
        if bit != 0 {
            self.envelope.volume as i16
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Default)]
struct WaveChannel {
    ram: [u8; 32],
    bank: u8,
    dac_enabled: bool,
    length_load: u16,
    length_counter: u16,
    length_enable: bool,
    volume_shift: u8, // 0=mute,1=100%,2=50%,3=25%
    frequency: u16,
    frequency_timer: i32,
    position: u8,
    enabled: bool,
}

impl WaveChannel {
    fn period(&self) -> i32 {
        (2048 - self.frequency as i32) * 2
    }

    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        if self.length_counter == 0 {
            self.length_counter = 256 - self.length_load;
        }
        self.frequency_timer = self.period();
        self.position = 0;
    }

    fn step_length(&mut self) {
        if self.length_enable && self.length_counter > 0 {
            self.length_counter -= 1;
            if self.length_counter == 0 {
                self.enabled = false;
            }
        }
    }

    fn step_timer(&mut self, sub_cycles: i32) {
        self.frequency_timer -= sub_cycles;
        while self.frequency_timer <= 0 {
            self.frequency_timer += self.period().max(1);
            self.position = (self.position + 1) % 32;
        }
    }

    fn amplitude(&self) -> i16 {
        if !self.enabled || !self.dac_enabled || self.volume_shift == 0 {
            return 0;
        }
        let byte = self.ram[(self.position / 2) as usize];
        let nibble = if self.position % 2 == 0 { byte >> 4 } else { byte & 0xF };
        (nibble >> (self.volume_shift - 1)) as i16
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct NoiseChannel {
    length_load: u8,
    length_counter: u16,
    length_enable: bool,
    envelope: Envelope,
    shift: u8,
    narrow: bool,
    divisor_code: u8,
    lfsr: u16,
    frequency_timer: i32,
    enabled: bool,
    dac_enabled: bool,
}

const DIVISORS: [i32; 8] = [8, 16, 32, 48, 64, 80, 96, 112];

impl NoiseChannel {
    fn period(&self) -> i32 {
        DIVISORS[self.divisor_code as usize & 7] << self.shift
    }

    fn trigger(&mut self) {
        self.enabled = self.dac_enabled;
        if self.length_counter == 0 {
            self.length_counter = 64 - self.length_load as u16;
        }
        self.frequency_timer = self.period();
        self.envelope.trigger();
        self.lfsr = 0x7FFF;
    }

    fn step_length(&mut self) {
        if self.length_enable && self.length_counter > 0 {
            self.length_counter -= 1;
            if self.length_counter == 0 {
                self.enabled = false;
            }
        }
    }

    fn step_timer(&mut self, sub_cycles: i32) {
        self.frequency_timer -= sub_cycles;
        while self.frequency_timer <= 0 {
            self.frequency_timer += self.period().max(1);
            let bit = (self.lfsr & 1) ^ ((self.lfsr >> 1) & 1);
            self.lfsr = (self.lfsr >> 1) | (bit << 14);
            if self.narrow {
                self.lfsr = (self.lfsr & !(1 << 6)) | (bit << 6);
            }
        }
    }

    fn amplitude(&self) -> i16 {
        if !self.enabled || !self.dac_enabled {
            return 0;
        }
        if self.lfsr & 1 == 0 {
            self.envelope.volume as i16
        } else {
            0
        }
    }
}

#[derive(Debug, Clone)]
struct Fifo {
    buf: std::collections::VecDeque<i8>,
    current: i8,
    timer_select: u8,
}

impl Default for Fifo {
    fn default() -> Self {
        Self { buf: std::collections::VecDeque::with_capacity(32), current: 0, timer_select: 0 }
    }
}

impl Fifo {
    fn push(&mut self, sample: i8) {
        if self.buf.len() >= 32 {
            self.buf.pop_front();
        }
        self.buf.push_back(sample);
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.current = 0;
    }

    fn pop_one(&mut self) -> bool {
        if let Some(v) = self.buf.pop_front() {
            self.current = v;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Apu {
    ch1: SquareChannel,
    ch2: SquareChannel,
    ch3: WaveChannel,
    ch4: NoiseChannel,
    fifo_a: Fifo,
    fifo_b: Fifo,

    master_enable: bool,
    psg_volume_left: u8,
    psg_volume_right: u8,
    psg_enable_left: u8,
    psg_enable_right: u8,
    psg_master_volume: u8, // 0..3 -> 1/4..full
    dma_a_volume_full: bool,
    dma_b_volume_full: bool,
    dma_a_enable_left: bool,
    dma_a_enable_right: bool,
    dma_b_enable_left: bool,
    dma_b_enable_right: bool,

    frame_sequencer_step: u8,

    pub sample_buffer: std::collections::VecDeque<(i16, i16)>,
}

impl Apu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// One 32,768 Hz tick: 128 PSG sub-cycles (= system clocks / sample
    /// / channel, 4 per sample over 32 samples per tick), then mix.
    pub fn on_sample_tick(&mut self) {
        if self.master_enable {
            self.ch1.step_timer(128);
            self.ch2.step_timer(128);
            self.ch3.step_timer(128);
            self.ch4.step_timer(128);
        }
        self.mix_sample();
    }

    /// 512 Hz frame sequencer: ticks length (steps 0,4), sweep
    /// (steps 2,6), and envelope (step 7).
    pub fn on_frame_sequencer_tick(&mut self) {
        if !self.master_enable {
            return;
        }
        let step = self.frame_sequencer_step;
        if step % 2 == 0 {
            self.ch1.step_length();
            self.ch2.step_length();
            self.ch3.step_length();
            self.ch4.step_length();
        }
        if step == 2 || step == 6 {
            self.ch1.step_sweep();
        }
        if step == 7 {
            self.ch1.envelope.step();
            self.ch2.envelope.step();
            self.ch4.envelope.step();
        }
        self.frame_sequencer_step = (self.frame_sequencer_step + 1) % 8;
    }

    fn mix_sample(&mut self) {
        let psg_scale = match self.psg_master_volume & 0x3 {
            0 => 0.25,
            1 => 0.5,
            2 => 1.0,
            _ => 1.0,
        };

        let psg_sum = |enable_mask: u8, apu: &Apu| -> i32 {
            let mut sum = 0i32;
            if enable_mask & 1 != 0 {
                sum += apu.ch1.amplitude() as i32;
            }
            if enable_mask & 2 != 0 {
                sum += apu.ch2.amplitude() as i32;
            }
            if enable_mask & 4 != 0 {
                sum += apu.ch3.amplitude() as i32;
            }
            if enable_mask & 8 != 0 {
                sum += apu.ch4.amplitude() as i32;
            }
            sum
        };

        let mut left = (psg_sum(self.psg_enable_left, self) as f32 * psg_scale
            * (self.psg_volume_left as f32 + 1.0) / 8.0) as i32;
        let mut right = (psg_sum(self.psg_enable_right, self) as f32 * psg_scale
            * (self.psg_volume_right as f32 + 1.0) / 8.0) as i32;

        let dma_a = self.fifo_a.current as i32 * if self.dma_a_volume_full { 4 } else { 2 };
        let dma_b = self.fifo_b.current as i32 * if self.dma_b_volume_full { 4 } else { 2 };
        if self.dma_a_enable_left {
            left += dma_a;
        }
        if self.dma_a_enable_right {
            right += dma_a;
        }
        if self.dma_b_enable_left {
            left += dma_b;
        }
        if self.dma_b_enable_right {
            right += dma_b;
        }

        let clip = |v: i32| -> i16 { v.clamp(-512, 511) as i16 * 32 };
        if self.sample_buffer.len() >= 2048 {
            self.sample_buffer.pop_front();
        }
        self.sample_buffer.push_back((clip(left), clip(right)));
    }

    /// A timer whose "timer select" bit matches `timer_index`
    /// overflowed; latch the next FIFO byte for any matching channel
    /// and request a DMA refill if it's now low.
    pub fn on_timer_overflow(&mut self, timer_index: u8, dma: &mut Dma) {
        if self.fifo_a.timer_select == timer_index {
            self.fifo_a.pop_one();
            if self.fifo_a.buf.len() <= 16 {
                dma.on_fifo_request(1);
            }
        }
        if self.fifo_b.timer_select == timer_index {
            self.fifo_b.pop_one();
            if self.fifo_b.buf.len() <= 16 {
                dma.on_fifo_request(2);
            }
        }
    }

    pub fn push_fifo_a(&mut self, byte: i8) {
        self.fifo_a.push(byte);
    }

    pub fn push_fifo_b(&mut self, byte: i8) {
        self.fifo_b.push(byte);
    }

    pub fn fifo_a_len(&self) -> usize {
        self.fifo_a.buf.len()
    }

    pub fn write_soundcnt_l(&mut self, value: u16) {
        self.psg_volume_right = (value & 0x7) as u8;
        self.psg_volume_left = ((value >> 4) & 0x7) as u8;
        self.psg_enable_right = ((value >> 8) & 0xF) as u8;
        self.psg_enable_left = ((value >> 12) & 0xF) as u8;
    }

    pub fn write_soundcnt_h(&mut self, value: u16) {
        self.psg_master_volume = (value & 0x3) as u8;
        self.dma_a_volume_full = value & (1 << 2) != 0;
        self.dma_b_volume_full = value & (1 << 3) != 0;
        self.dma_a_enable_right = value & (1 << 8) != 0;
        self.dma_a_enable_left = value & (1 << 9) != 0;
        self.fifo_a.timer_select = ((value >> 10) & 1) as u8;
        self.dma_b_enable_right = value & (1 << 12) != 0;
        self.dma_b_enable_left = value & (1 << 13) != 0;
        self.fifo_b.timer_select = ((value >> 14) & 1) as u8;
        if value & (1 << 11) != 0 {
            self.fifo_a.reset();
        }
        if value & (1 << 15) != 0 {
            self.fifo_b.reset();
        }
    }

    pub fn write_soundcnt_x(&mut self, value: u8) {
        let was_enabled = self.master_enable;
        self.master_enable = value & 0x80 != 0;
        if was_enabled && !self.master_enable {
            *self = Self { master_enable: false, ..Self::default() };
        }
    }

    pub fn set_ch1_trigger(&mut self) {
        self.ch1.has_sweep = true;
        self.ch1.trigger();
    }
    pub fn set_ch2_trigger(&mut self) {
        self.ch2.trigger();
    }
    pub fn set_ch3_trigger(&mut self) {
        self.ch3.trigger();
    }
    pub fn set_ch4_trigger(&mut self) {
        self.ch4.trigger();
    }
}

pub fn schedule_initial_events(scheduler: &mut Scheduler) {
    scheduler.add(512, EventKind::ApuSample, true);
    scheduler.add(32_768, EventKind::ApuFrameSequencer, true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_drain_requests_dma_at_sixteen_bytes() {
        let mut apu = Apu::new();
        let mut dma = Dma::new();
        for i in 0..32 {
            apu.push_fifo_a(i as i8);
        }
        apu.fifo_a.timer_select = 0;
        for _ in 0..16 {
            apu.on_timer_overflow(0, &mut dma);
        }
        assert_eq!(apu.fifo_a.buf.len(), 16);
        assert!(dma.channels[1].queued == false || dma.channels[1].enable());
    }

    #[test]
    fn square_channel_length_expiry_disables_channel() {
        let mut ch = SquareChannel { dac_enabled: true, length_enable: true, length_load: 63, ..Default::default() };
        ch.trigger();
        assert_eq!(ch.length_counter, 1);
        ch.step_length();
        assert!(!ch.enabled);
    }

    #[test]
    fn envelope_increases_towards_max() {
        let mut env = Envelope { start_volume: 0, increase: true, period: 1, ..Default::default() };
        env.trigger();
        env.step();
        assert_eq!(env.volume, 1);
    }

    #[test]
    fn master_disable_silences_and_clears_registers() {
        let mut apu = Apu::new();
        apu.write_soundcnt_x(0x80);
        assert!(apu.master_enable);
        apu.write_soundcnt_x(0x00);
        assert!(!apu.master_enable);
    }
}

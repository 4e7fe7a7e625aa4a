//! WebAssembly bindings for the Game Boy Advance emulator.
//!
//! Unlike the C FFI, this owns the emulator directly without a mutex
//! since WASM is single-threaded; there is no separate UI worker to
//! hand a pointer to.

use wasm_bindgen::prelude::*;

use crate::command::Command;
use crate::emu::Emu;
use crate::peripherals::keypad::buttons;

/// WASM-friendly wrapper around the emulator.
#[wasm_bindgen]
pub struct WasmEmu {
    inner: Emu,
    /// KEYINPUT-polarity mask (1 = released) built up by `set_button`
    /// calls, since the JS side reports buttons one at a time.
    key_mask: u16,
}

#[wasm_bindgen]
impl WasmEmu {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmEmu {
        console_error_panic_hook::set_once();
        WasmEmu { inner: Emu::new(), key_mask: 0x03FF }
    }

    /// Load ROM data into the emulator. Returns 0 on success, a
    /// negative error code on failure.
    #[wasm_bindgen]
    pub fn load_rom(&mut self, data: &[u8]) -> i32 {
        match self.inner.load_rom(data) {
            Ok(()) => 0,
            Err(err) => crate::error_code(&err),
        }
    }

    /// Load a BIOS image, switching off HLE interception.
    #[wasm_bindgen]
    pub fn load_bios(&mut self, data: &[u8]) -> i32 {
        match self.inner.load_bios(data) {
            Ok(()) => 0,
            Err(err) => crate::error_code(&err),
        }
    }

    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.inner.reset();
    }

    /// Run the emulator for up to `cycles` cycles. Returns the number
    /// of cycles actually executed.
    #[wasm_bindgen]
    pub fn run_cycles(&mut self, cycles: u32) -> u32 {
        self.inner.push_command(Command::UpdateKeyInput(self.key_mask));
        self.inner.run_cycles(cycles as u64) as u32
    }

    #[wasm_bindgen]
    pub fn framebuffer_width(&self) -> u32 {
        self.inner.framebuffer_size().0 as u32
    }

    #[wasm_bindgen]
    pub fn framebuffer_height(&self) -> u32 {
        self.inner.framebuffer_size().1 as u32
    }

    /// Copy the framebuffer to a byte array in RGBA8888 order, the
    /// layout canvas `ImageData` expects.
    #[wasm_bindgen]
    pub fn get_framebuffer_rgba(&self) -> Vec<u8> {
        let (width, height) = self.inner.framebuffer_size();
        let mut argb = vec![0u32; width * height];
        self.inner.render_argb8888(&mut argb);

        let mut rgba = Vec::with_capacity(argb.len() * 4);
        for pixel in argb {
            let a = ((pixel >> 24) & 0xFF) as u8;
            let r = ((pixel >> 16) & 0xFF) as u8;
            let g = ((pixel >> 8) & 0xFF) as u8;
            let b = (pixel & 0xFF) as u8;
            rgba.push(r);
            rgba.push(g);
            rgba.push(b);
            rgba.push(a);
        }
        rgba
    }

    /// Drain queued audio as interleaved L/R i16 samples.
    #[wasm_bindgen]
    pub fn drain_audio(&mut self) -> Vec<i16> {
        let mut out = Vec::new();
        self.inner.drain_audio(&mut out);
        out
    }

    /// Press or release one named button. `button` indexes the same
    /// order KEYINPUT uses: A, B, Select, Start, Right, Left, Up,
    /// Down, R, L.
    #[wasm_bindgen]
    pub fn set_button(&mut self, button: u8, down: bool) {
        let bit = match button {
            0 => buttons::A,
            1 => buttons::B,
            2 => buttons::SELECT,
            3 => buttons::START,
            4 => buttons::RIGHT,
            5 => buttons::LEFT,
            6 => buttons::UP,
            7 => buttons::DOWN,
            8 => buttons::R,
            9 => buttons::L,
            _ => return,
        };
        if down {
            self.key_mask &= !bit;
        } else {
            self.key_mask |= bit;
        }
    }

    #[wasm_bindgen]
    pub fn save_state_size(&self) -> usize {
        self.inner.save_state_size()
    }

    /// Save emulator state. Returns an empty array on failure.
    #[wasm_bindgen]
    pub fn save_state(&self) -> Vec<u8> {
        let size = self.inner.save_state_size();
        let mut buffer = vec![0u8; size];
        match self.inner.save_state(&mut buffer) {
            Ok(written) => {
                buffer.truncate(written);
                buffer
            }
            Err(_) => Vec::new(),
        }
    }

    /// Load emulator state. Returns 0 on success, a negative error
    /// code on failure.
    #[wasm_bindgen]
    pub fn load_state(&mut self, data: &[u8]) -> i32 {
        match self.inner.load_state(data) {
            Ok(()) => 0,
            Err(err) => crate::error_code(&err),
        }
    }
}

impl Default for WasmEmu {
    fn default() -> Self {
        Self::new()
    }
}

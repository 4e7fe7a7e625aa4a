//! Memory-mapped device layer: interrupt controller, keypad, timers,
//! cartridge save memory, DMA channels, audio mixer, and the PPU.
//!
//! Each module owns only its own register/state; operations that need
//! simultaneous access to more than one device (DMA transfers reading
//! and writing through the bus, timer overflow notifying the APU's
//! FIFO) are coordinated by `Bus`/`Emu` rather than by back-pointers
//! between peripherals, the way the teacher keeps its device structs
//! free of direct references to sibling devices.

pub mod apu;
pub mod dma;
pub mod interrupt;
pub mod keypad;
pub mod ppu;
pub mod save;
pub mod timers;

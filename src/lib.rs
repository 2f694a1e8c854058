pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod mapper;
pub mod ppu;

pub use apu::Apu;
pub use bus::Bus;
pub use cartridge::Cartridge;
pub use controller::{Button, Controller};
pub use cpu::Cpu;
pub use mapper::{create_mapper, mapper_name, wrap_mapper, Mapper, MapperHandle, Mirroring};
pub use ppu::{Ppu, FRAME_HEIGHT, FRAME_WIDTH};

/// NTSC timing facts the driver schedules around.
pub const CPU_CLOCK_HZ: u32 = 1_789_773;
pub const PPU_DOTS_PER_CPU_CYCLE: u32 = 3;
pub const SCANLINES_PER_FRAME: u32 = 262;
pub const DOTS_PER_SCANLINE: u32 = 341;
pub const CPU_CYCLES_PER_FRAME: f64 = 29_780.5;

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Result};
use log::{debug, trace};

use crate::cartridge::Cartridge;

/// Shared mapper handle; the bus and the PPU both hold one.
pub type MapperHandle = Rc<RefCell<Box<dyn Mapper>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    SingleScreenLower,
    SingleScreenUpper,
    FourScreen,
}

pub trait Mapper {
    fn cpu_read(&mut self, addr: u16) -> u8;
    fn cpu_write(&mut self, addr: u16, value: u8);
    fn ppu_read(&mut self, addr: u16) -> u8;
    fn ppu_write(&mut self, addr: u16, value: u8);
    fn mirror_mode(&self) -> Mirroring;
    /// Clocked by the PPU on each A12 rising edge (MMC3 hook).
    fn scanline_tick(&mut self) {}
    fn irq_pending(&self) -> bool {
        false
    }
}

pub fn mapper_name(mapper_id: u8) -> &'static str {
    match mapper_id {
        0 => "NROM",
        1 => "MMC1",
        4 => "MMC3",
        _ => "Unsupported",
    }
}

pub fn create_mapper(cart: Cartridge) -> Result<Box<dyn Mapper>> {
    let mapper_id = cart.mapper_id;
    let mapper: Box<dyn Mapper> = match mapper_id {
        0 => Box::new(Mapper0::new(cart)),
        1 => Box::new(Mapper1::new(cart)),
        4 => Box::new(Mapper4::new(cart)),
        id => bail!("unsupported mapper {id}"),
    };
    debug!("attached {} (mapper {mapper_id})", mapper_name(mapper_id));
    Ok(mapper)
}

pub fn wrap_mapper(mapper: Box<dyn Mapper>) -> MapperHandle {
    Rc::new(RefCell::new(mapper))
}

/// NROM: no banking at all. 16 KiB PRG images mirror into the upper half.
struct Mapper0 {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Vec<u8>,
    mirroring: Mirroring,
}

impl Mapper0 {
    fn new(cart: Cartridge) -> Self {
        Self {
            prg_rom: cart.prg_rom,
            chr: cart.chr_data,
            chr_is_ram: cart.chr_is_ram,
            prg_ram: vec![0; 8 * 1024],
            mirroring: cart.mirroring,
        }
    }
}

impl Mapper for Mapper0 {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => {
                let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                self.prg_ram[idx]
            }
            0x8000..=0xFFFF => {
                // prg_rom is 16 or 32 KiB, so the power-of-two mask handles
                // both the mirrored and the linear layout.
                let idx = (addr as usize - 0x8000) & (self.prg_rom.len() - 1);
                self.prg_rom[idx]
            }
            _ => 0,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        if (0x6000..=0x7FFF).contains(&addr) {
            let idx = (addr as usize - 0x6000) % self.prg_ram.len();
            self.prg_ram[idx] = value;
        }
    }

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.chr[addr as usize % self.chr.len()]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            let idx = addr as usize % self.chr.len();
            self.chr[idx] = value;
        }
    }

    fn mirror_mode(&self) -> Mirroring {
        self.mirroring
    }
}

/// MMC1: serial shift-register interface, 16/32 KiB PRG modes, 4/8 KiB CHR
/// modes, software-selected mirroring.
struct Mapper1 {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Vec<u8>,

    shift_register: u8,
    control: u8,
    chr_bank0: u8,
    chr_bank1: u8,
    prg_bank: u8,
}

impl Mapper1 {
    fn new(cart: Cartridge) -> Self {
        Self {
            prg_rom: cart.prg_rom,
            chr: cart.chr_data,
            chr_is_ram: cart.chr_is_ram,
            prg_ram: vec![0; 8 * 1024],
            shift_register: 0x10,
            control: 0x0C,
            chr_bank0: 0,
            chr_bank1: 0,
            prg_bank: 0,
        }
    }

    fn prg_bank_count_16k(&self) -> usize {
        (self.prg_rom.len() / 0x4000).max(1)
    }

    fn chr_bank_count_4k(&self) -> usize {
        (self.chr.len() / 0x1000).max(1)
    }

    fn read_prg_bank(&self, bank: usize, offset: usize) -> u8 {
        let bank = bank % self.prg_bank_count_16k();
        let idx = bank * 0x4000 + offset;
        self.prg_rom[idx % self.prg_rom.len()]
    }

    fn write_shift_register(&mut self, addr: u16, value: u8) {
        if (value & 0x80) != 0 {
            // Reset line: clear the shifter and force PRG mode 3.
            self.shift_register = 0x10;
            self.control |= 0x0C;
            return;
        }

        let commit = (self.shift_register & 0x01) != 0;
        self.shift_register >>= 1;
        self.shift_register |= (value & 0x01) << 4;

        if commit {
            let data = self.shift_register;
            match (addr >> 13) & 0x03 {
                0 => self.control = data,
                1 => self.chr_bank0 = data,
                2 => self.chr_bank1 = data,
                _ => self.prg_bank = data & 0x0F,
            }
            trace!("MMC1 commit reg {} = ${data:02X}", (addr >> 13) & 0x03);
            self.shift_register = 0x10;
        }
    }

    fn chr_index(&self, addr: u16) -> usize {
        let addr = addr as usize;
        if (self.control & 0x10) == 0 {
            // 8 KiB mode: low bit of the bank number is ignored.
            let bank = (self.chr_bank0 as usize & 0x1E) % self.chr_bank_count_4k();
            (bank * 0x1000 + addr) % self.chr.len()
        } else if addr < 0x1000 {
            let bank = (self.chr_bank0 as usize) % self.chr_bank_count_4k();
            (bank * 0x1000 + addr) % self.chr.len()
        } else {
            let bank = (self.chr_bank1 as usize) % self.chr_bank_count_4k();
            (bank * 0x1000 + (addr - 0x1000)) % self.chr.len()
        }
    }
}

impl Mapper for Mapper1 {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => {
                let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                self.prg_ram[idx]
            }
            0x8000..=0xFFFF => {
                let mode = (self.control >> 2) & 0x03;
                let bank = self.prg_bank as usize;
                let offset_16k = (addr as usize) & 0x3FFF;
                match mode {
                    0 | 1 => {
                        // 32 KiB switch at $8000.
                        let bank32 = bank & !1;
                        let idx = bank32 * 0x4000 + (addr as usize - 0x8000);
                        self.prg_rom[idx % self.prg_rom.len()]
                    }
                    2 => {
                        if addr < 0xC000 {
                            self.read_prg_bank(0, offset_16k)
                        } else {
                            self.read_prg_bank(bank, offset_16k)
                        }
                    }
                    _ => {
                        if addr < 0xC000 {
                            self.read_prg_bank(bank, offset_16k)
                        } else {
                            let last = self.prg_bank_count_16k() - 1;
                            self.read_prg_bank(last, offset_16k)
                        }
                    }
                }
            }
            _ => 0,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => {
                let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                self.prg_ram[idx] = value;
            }
            0x8000..=0xFFFF => self.write_shift_register(addr, value),
            _ => {}
        }
    }

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.chr[self.chr_index(addr)]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            let idx = self.chr_index(addr);
            self.chr[idx] = value;
        }
    }

    fn mirror_mode(&self) -> Mirroring {
        match self.control & 0x03 {
            0 => Mirroring::SingleScreenLower,
            1 => Mirroring::SingleScreenUpper,
            2 => Mirroring::Vertical,
            _ => Mirroring::Horizontal,
        }
    }
}

/// MMC3: eight bank registers feeding four 8 KiB PRG slots and eight 1 KiB
/// CHR slots, plus the A12-clocked scanline IRQ counter.
struct Mapper4 {
    prg_rom: Vec<u8>,
    chr: Vec<u8>,
    chr_is_ram: bool,
    prg_ram: Vec<u8>,
    prg_ram_enabled: bool,
    mirroring: Mirroring,
    four_screen: bool,

    bank_select: u8,
    bank_regs: [u8; 8],
    prg_offsets: [usize; 4],
    chr_offsets: [usize; 8],

    irq_latch: u8,
    irq_counter: u8,
    irq_reload: bool,
    irq_enabled: bool,
    irq_active: bool,
}

impl Mapper4 {
    fn new(cart: Cartridge) -> Self {
        let four_screen = cart.mirroring == Mirroring::FourScreen;
        let mut mapper = Self {
            prg_rom: cart.prg_rom,
            chr: cart.chr_data,
            chr_is_ram: cart.chr_is_ram,
            prg_ram: vec![0; 8 * 1024],
            prg_ram_enabled: true,
            mirroring: cart.mirroring,
            four_screen,
            bank_select: 0,
            bank_regs: [0; 8],
            prg_offsets: [0; 4],
            chr_offsets: [0; 8],
            irq_latch: 0,
            irq_counter: 0,
            irq_reload: false,
            irq_enabled: false,
            irq_active: false,
        };
        mapper.update_offsets();
        mapper
    }

    fn prg_bank_count_8k(&self) -> usize {
        (self.prg_rom.len() / 0x2000).max(1)
    }

    fn chr_bank_count_1k(&self) -> usize {
        (self.chr.len() / 0x0400).max(1)
    }

    fn update_offsets(&mut self) {
        let prg_banks = self.prg_bank_count_8k();
        let last = prg_banks - 1;
        let second_last = prg_banks.saturating_sub(2);
        let r6 = self.bank_regs[6] as usize % prg_banks;
        let r7 = self.bank_regs[7] as usize % prg_banks;

        let prg = if (self.bank_select & 0x40) == 0 {
            [r6, r7, second_last, last]
        } else {
            [second_last, r7, r6, last]
        };
        for (slot, bank) in prg.into_iter().enumerate() {
            self.prg_offsets[slot] = bank * 0x2000;
        }

        // R0/R1 address 2 KiB windows, so their low bit selects the half.
        let r0 = (self.bank_regs[0] & 0xFE) as usize;
        let r1 = (self.bank_regs[1] & 0xFE) as usize;
        let r2 = self.bank_regs[2] as usize;
        let r3 = self.bank_regs[3] as usize;
        let r4 = self.bank_regs[4] as usize;
        let r5 = self.bank_regs[5] as usize;

        let chr = if (self.bank_select & 0x80) == 0 {
            [r0, r0 + 1, r1, r1 + 1, r2, r3, r4, r5]
        } else {
            [r2, r3, r4, r5, r0, r0 + 1, r1, r1 + 1]
        };
        let chr_banks = self.chr_bank_count_1k();
        for (slot, bank) in chr.into_iter().enumerate() {
            self.chr_offsets[slot] = (bank % chr_banks) * 0x0400;
        }
    }

    fn chr_index(&self, addr: u16) -> usize {
        let slot = (addr as usize & 0x1FFF) / 0x0400;
        (self.chr_offsets[slot] + (addr as usize & 0x03FF)) % self.chr.len()
    }
}

impl Mapper for Mapper4 {
    fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => {
                if !self.prg_ram_enabled {
                    return 0;
                }
                let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                self.prg_ram[idx]
            }
            0x8000..=0xFFFF => {
                let slot = (addr as usize - 0x8000) / 0x2000;
                let idx = self.prg_offsets[slot] + (addr as usize & 0x1FFF);
                self.prg_rom[idx % self.prg_rom.len()]
            }
            _ => 0,
        }
    }

    fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x6000..=0x7FFF => {
                if self.prg_ram_enabled {
                    let idx = (addr as usize - 0x6000) % self.prg_ram.len();
                    self.prg_ram[idx] = value;
                }
            }
            0x8000..=0x9FFF => {
                if (addr & 1) == 0 {
                    self.bank_select = value;
                } else {
                    let target = (self.bank_select & 0x07) as usize;
                    self.bank_regs[target] = value;
                }
                self.update_offsets();
            }
            0xA000..=0xBFFF => {
                if (addr & 1) == 0 {
                    if !self.four_screen {
                        self.mirroring = if (value & 1) == 0 {
                            Mirroring::Vertical
                        } else {
                            Mirroring::Horizontal
                        };
                    }
                } else {
                    self.prg_ram_enabled = (value & 0x80) != 0;
                }
            }
            0xC000..=0xDFFF => {
                if (addr & 1) == 0 {
                    self.irq_latch = value;
                } else {
                    self.irq_reload = true;
                    self.irq_counter = 0;
                }
            }
            0xE000..=0xFFFF => {
                if (addr & 1) == 0 {
                    self.irq_enabled = false;
                    self.irq_active = false;
                    trace!("MMC3 IRQ disabled/acknowledged");
                } else {
                    self.irq_enabled = true;
                }
            }
            _ => {}
        }
    }

    fn ppu_read(&mut self, addr: u16) -> u8 {
        self.chr[self.chr_index(addr)]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        if self.chr_is_ram {
            let idx = self.chr_index(addr);
            self.chr[idx] = value;
        }
    }

    fn mirror_mode(&self) -> Mirroring {
        if self.four_screen {
            Mirroring::FourScreen
        } else {
            self.mirroring
        }
    }

    fn scanline_tick(&mut self) {
        if self.irq_counter == 0 || self.irq_reload {
            self.irq_counter = self.irq_latch;
            self.irq_reload = false;
        } else {
            self.irq_counter = self.irq_counter.wrapping_sub(1);
        }

        if self.irq_counter == 0 && self.irq_enabled {
            trace!("MMC3 scanline IRQ asserted");
            self.irq_active = true;
        }
    }

    fn irq_pending(&self) -> bool {
        self.irq_active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterned_banks(total_size: usize, bank_size: usize) -> Vec<u8> {
        let mut data = vec![0u8; total_size];
        for (bank, chunk) in data.chunks_mut(bank_size).enumerate() {
            chunk.fill(bank as u8);
        }
        data
    }

    fn make_cart(mapper_id: u8, prg_rom: Vec<u8>, chr_data: Vec<u8>, chr_is_ram: bool) -> Cartridge {
        Cartridge::new(mapper_id, Mirroring::Horizontal, false, prg_rom, chr_data, chr_is_ram)
            .unwrap()
    }

    #[test]
    fn create_mapper_rejects_unsupported_ids() {
        let cart = make_cart(2, vec![0; 0x8000], vec![0; 0x2000], false);
        assert!(create_mapper(cart).is_err());
    }

    #[test]
    fn mapper0_mirrors_sixteen_kib_prg() {
        let mut prg = vec![0u8; 0x4000];
        prg[0x0123] = 0xAB;
        let mut mapper = Mapper0::new(make_cart(0, prg, vec![0; 0x2000], false));

        assert_eq!(mapper.cpu_read(0x8123), 0xAB);
        assert_eq!(mapper.cpu_read(0xC123), 0xAB);
    }

    #[test]
    fn mapper0_prg_ram_round_trips() {
        let mut mapper = Mapper0::new(make_cart(0, vec![0; 0x8000], vec![0; 0x2000], false));

        mapper.cpu_write(0x6010, 0x5A);
        assert_eq!(mapper.cpu_read(0x6010), 0x5A);
    }

    #[test]
    fn mapper0_ignores_chr_rom_writes() {
        let chr = patterned_banks(0x2000, 0x2000);
        let mut mapper = Mapper0::new(make_cart(0, vec![0; 0x8000], chr, false));

        mapper.ppu_write(0x0010, 0xAB);
        assert_eq!(mapper.ppu_read(0x0010), 0x00);
    }

    #[test]
    fn mapper0_allows_chr_ram_writes() {
        let mut mapper = Mapper0::new(make_cart(0, vec![0; 0x8000], Vec::new(), true));

        mapper.ppu_write(0x0010, 0xAB);
        assert_eq!(mapper.ppu_read(0x0010), 0xAB);
    }

    #[test]
    fn mapper1_shift_register_programs_prg_bank() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let chr = patterned_banks(0x2000, 0x1000);
        let mut mapper = Mapper1::new(make_cart(1, prg, chr, false));

        for bit in [1u8, 0, 0, 0, 0] {
            mapper.cpu_write(0xE000, bit);
        }

        // Power-on PRG mode 3: switchable at $8000, last bank fixed at $C000.
        assert_eq!(mapper.cpu_read(0x8000), 1);
        assert_eq!(mapper.cpu_read(0xC000), 3);
    }

    #[test]
    fn mapper1_reset_bit_clears_shifter_and_forces_prg_mode_3() {
        let prg = patterned_banks(4 * 0x4000, 0x4000);
        let chr = patterned_banks(0x2000, 0x1000);
        let mut mapper = Mapper1::new(make_cart(1, prg, chr, false));

        // Program control = 0 (32 KiB PRG mode) bit by bit.
        for bit in [0u8, 0, 0, 0, 0] {
            mapper.cpu_write(0x8000, bit);
        }
        // Two partial bits, then the reset line.
        mapper.cpu_write(0xE000, 1);
        mapper.cpu_write(0xE000, 1);
        mapper.cpu_write(0x8000, 0x80);

        // Back in mode 3, and the partial PRG write was discarded.
        assert_eq!(mapper.cpu_read(0x8000), 0);
        assert_eq!(mapper.cpu_read(0xC000), 3);
    }

    #[test]
    fn mapper1_mirroring_follows_control() {
        let prg = patterned_banks(2 * 0x4000, 0x4000);
        let chr = patterned_banks(0x2000, 0x1000);
        let mut mapper = Mapper1::new(make_cart(1, prg, chr, false));

        for bit in [1u8, 0, 0, 0, 0] {
            mapper.cpu_write(0x8000, bit);
        }
        assert_eq!(mapper.mirror_mode(), Mirroring::SingleScreenUpper);

        for bit in [0u8, 1, 0, 0, 0] {
            mapper.cpu_write(0x8000, bit);
        }
        assert_eq!(mapper.mirror_mode(), Mirroring::Vertical);
    }

    #[test]
    fn mapper1_chr_4k_banks_switch_independently() {
        let prg = patterned_banks(2 * 0x4000, 0x4000);
        let chr = patterned_banks(4 * 0x1000, 0x1000);
        let mut mapper = Mapper1::new(make_cart(1, prg, chr, false));

        // Control = $10: two independent 4 KiB CHR banks.
        for bit in [0u8, 0, 0, 0, 1] {
            mapper.cpu_write(0x8000, bit);
        }
        // CHR bank 0 = 2, CHR bank 1 = 3.
        for bit in [0u8, 1, 0, 0, 0] {
            mapper.cpu_write(0xA000, bit);
        }
        for bit in [1u8, 1, 0, 0, 0] {
            mapper.cpu_write(0xC000, bit);
        }

        assert_eq!(mapper.ppu_read(0x0000), 2);
        assert_eq!(mapper.ppu_read(0x1000), 3);
    }

    #[test]
    fn mapper4_prg_modes_fix_and_switch_banks() {
        let prg = patterned_banks(32 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mapper4::new(make_cart(4, prg, chr, false));

        assert_eq!(mapper.cpu_read(0xC000), 30);
        assert_eq!(mapper.cpu_read(0xE000), 31);

        mapper.cpu_write(0x8000, 0x06);
        mapper.cpu_write(0x8001, 5);
        assert_eq!(mapper.cpu_read(0x8000), 5);

        mapper.cpu_write(0x8000, 0x46);
        assert_eq!(mapper.cpu_read(0x8000), 30);
        assert_eq!(mapper.cpu_read(0xC000), 5);
    }

    #[test]
    fn mapper4_chr_inversion_swaps_windows() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(16 * 0x0400, 0x0400);
        let mut mapper = Mapper4::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0x8000, 0x00);
        mapper.cpu_write(0x8001, 4); // R0: 2 KiB window at $0000
        mapper.cpu_write(0x8000, 0x02);
        mapper.cpu_write(0x8001, 9); // R2: 1 KiB slot at $1000

        assert_eq!(mapper.ppu_read(0x0000), 4);
        assert_eq!(mapper.ppu_read(0x0400), 5);
        assert_eq!(mapper.ppu_read(0x1000), 9);

        mapper.cpu_write(0x8000, 0x80);
        assert_eq!(mapper.ppu_read(0x1000), 4);
        assert_eq!(mapper.ppu_read(0x0000), 9);
    }

    #[test]
    fn mapper4_irq_asserts_after_latch_ticks() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mapper4::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0xC000, 3); // latch
        mapper.cpu_write(0xC001, 0); // reload pending
        mapper.cpu_write(0xE001, 0); // enable

        // First tick reloads, the next `latch` ticks count down.
        for _ in 0..3 {
            mapper.scanline_tick();
            assert!(!mapper.irq_pending());
        }
        mapper.scanline_tick();
        assert!(mapper.irq_pending());

        // Even $E000 write disables and acknowledges.
        mapper.cpu_write(0xE000, 0);
        assert!(!mapper.irq_pending());
    }

    #[test]
    fn mapper4_mirroring_register() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mapper4::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0xA000, 0);
        assert_eq!(mapper.mirror_mode(), Mirroring::Vertical);
        mapper.cpu_write(0xA000, 1);
        assert_eq!(mapper.mirror_mode(), Mirroring::Horizontal);
    }

    #[test]
    fn mapper4_prg_ram_protect_gates_wram() {
        let prg = patterned_banks(4 * 0x2000, 0x2000);
        let chr = patterned_banks(8 * 0x0400, 0x0400);
        let mut mapper = Mapper4::new(make_cart(4, prg, chr, false));

        mapper.cpu_write(0xA001, 0x80);
        mapper.cpu_write(0x6000, 0xA5);
        assert_eq!(mapper.cpu_read(0x6000), 0xA5);

        mapper.cpu_write(0xA001, 0x00);
        mapper.cpu_write(0x6000, 0x5A);
        assert_eq!(mapper.cpu_read(0x6000), 0);

        mapper.cpu_write(0xA001, 0x80);
        assert_eq!(mapper.cpu_read(0x6000), 0xA5);
    }
}

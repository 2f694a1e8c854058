use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use crate::apu::Apu;
use crate::controller::Controller;
use crate::mapper::MapperHandle;
use crate::ppu::Ppu;

/// CPU-side memory bus: 2 KiB internal RAM plus address decoding into the
/// PPU registers, the controller/APU I/O block and the cartridge. The CPU
/// itself only sees this through its read/write closures.
pub struct Bus {
    ram: [u8; 2048],
    ppu: Option<Rc<RefCell<Ppu>>>,
    mapper: Option<MapperHandle>,
    controller1: Option<Rc<RefCell<Controller>>>,
    controller2: Option<Rc<RefCell<Controller>>>,
    apu: Apu,
    dma_stall: Option<Box<dyn FnMut(u32)>>,
}

impl Bus {
    pub fn new() -> Self {
        Self {
            ram: [0; 2048],
            ppu: None,
            mapper: None,
            controller1: None,
            controller2: None,
            apu: Apu::new(),
            dma_stall: None,
        }
    }

    pub fn set_ppu(&mut self, ppu: Rc<RefCell<Ppu>>) {
        self.ppu = Some(ppu);
    }

    pub fn set_mapper(&mut self, mapper: MapperHandle) {
        self.mapper = Some(mapper);
    }

    pub fn set_controllers(
        &mut self,
        controller1: Rc<RefCell<Controller>>,
        controller2: Rc<RefCell<Controller>>,
    ) {
        self.controller1 = Some(controller1);
        self.controller2 = Some(controller2);
    }

    /// The driver decides how DMA stalls reach the CPU; a `$4014` write
    /// calls this with the stall length.
    pub fn set_dma_stall_callback(&mut self, callback: Box<dyn FnMut(u32)>) {
        self.dma_stall = Some(callback);
    }

    pub fn cpu_read(&mut self, addr: u16) -> u8 {
        match addr {
            0x0000..=0x1FFF => self.ram[(addr as usize) & 0x07FF],
            0x2000..=0x3FFF => {
                let reg = 0x2000 + (addr & 0x0007);
                match self.ppu.as_ref() {
                    Some(ppu) => ppu.borrow_mut().read_register(reg),
                    None => 0,
                }
            }
            0x4015 => self.apu.read_status(),
            0x4016 => match self.controller1.as_ref() {
                Some(port) => port.borrow_mut().read(),
                None => 0,
            },
            0x4017 => match self.controller2.as_ref() {
                Some(port) => port.borrow_mut().read(),
                None => 0,
            },
            0x4000..=0x401F => 0,
            _ => match self.mapper.as_ref() {
                Some(mapper) => mapper.borrow_mut().cpu_read(addr),
                None => 0,
            },
        }
    }

    pub fn cpu_write(&mut self, addr: u16, value: u8) {
        match addr {
            0x0000..=0x1FFF => {
                self.ram[(addr as usize) & 0x07FF] = value;
            }
            0x2000..=0x3FFF => {
                let reg = 0x2000 + (addr & 0x0007);
                if let Some(ppu) = self.ppu.as_ref() {
                    ppu.borrow_mut().write_register(reg, value);
                }
            }
            0x4014 => self.oam_dma(value),
            0x4016 => {
                if let Some(port) = self.controller1.as_ref() {
                    port.borrow_mut().write(value);
                }
                if let Some(port) = self.controller2.as_ref() {
                    port.borrow_mut().write(value);
                }
            }
            0x4000..=0x4013 | 0x4015 | 0x4017 => {
                self.apu.write_register(addr, value);
            }
            0x4018..=0x401F => {}
            _ => {
                if let Some(mapper) = self.mapper.as_ref() {
                    mapper.borrow_mut().cpu_write(addr, value);
                }
            }
        }
    }

    /// $4014: copy one CPU page into OAM and stall the CPU for the fixed
    /// 513-cycle transfer (the odd-cycle 514 case is not distinguished).
    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        let mut bytes = [0u8; 256];
        for (idx, slot) in bytes.iter_mut().enumerate() {
            *slot = self.cpu_read(base.wrapping_add(idx as u16));
        }

        if let Some(ppu) = self.ppu.as_ref() {
            ppu.borrow_mut().oam_dma_write(&bytes);
        }

        trace!("OAM DMA page=${page:02X}");
        if let Some(stall) = self.dma_stall.as_mut() {
            stall(513);
        }
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::cartridge::Cartridge;
    use crate::controller::Button;
    use crate::mapper::{create_mapper, wrap_mapper, Mirroring};

    fn wired_bus() -> (Bus, Rc<RefCell<Ppu>>, Rc<RefCell<Controller>>) {
        let cart = Cartridge::new(
            0,
            Mirroring::Vertical,
            false,
            vec![0; 0x8000],
            vec![0; 0x2000],
            false,
        )
        .unwrap();
        let mapper = wrap_mapper(create_mapper(cart).unwrap());

        let ppu = Rc::new(RefCell::new(Ppu::new()));
        ppu.borrow_mut().set_mapper(Rc::clone(&mapper));

        let controller1 = Rc::new(RefCell::new(Controller::new()));
        let controller2 = Rc::new(RefCell::new(Controller::new()));

        let mut bus = Bus::new();
        bus.set_ppu(Rc::clone(&ppu));
        bus.set_mapper(mapper);
        bus.set_controllers(Rc::clone(&controller1), controller2);

        (bus, ppu, controller1)
    }

    #[test]
    fn internal_ram_mirrors_every_two_kib() {
        let (mut bus, _, _) = wired_bus();

        bus.cpu_write(0x0000, 0x42);
        assert_eq!(bus.cpu_read(0x0800), 0x42);
        assert_eq!(bus.cpu_read(0x1000), 0x42);
        assert_eq!(bus.cpu_read(0x1800), 0x42);
    }

    #[test]
    fn ppu_registers_mirror_every_eight_bytes() {
        let (mut bus, _ppu, _) = wired_bus();

        // $3456 decodes to $2006; two writes set the VRAM address.
        bus.cpu_write(0x3456, 0x21);
        bus.cpu_write(0x3456, 0x08);
        bus.cpu_write(0x2007, 0x77);

        bus.cpu_write(0x2006, 0x21);
        bus.cpu_write(0x2006, 0x08);
        bus.cpu_read(0x2007);
        assert_eq!(bus.cpu_read(0x2007), 0x77);
    }

    #[test]
    fn oam_dma_copies_a_page_and_requests_the_stall() {
        let (mut bus, ppu, _) = wired_bus();

        let stalled = Rc::new(Cell::new(0u32));
        let handle = Rc::clone(&stalled);
        bus.set_dma_stall_callback(Box::new(move |n| handle.set(handle.get() + n)));

        for i in 0..256u16 {
            bus.cpu_write(0x0200 + i, i as u8);
        }
        bus.cpu_write(0x4014, 0x02);

        assert_eq!(stalled.get(), 513);
        let ppu = ppu.borrow();
        for i in 0..256usize {
            assert_eq!(ppu.debug_peek_oam(i), i as u8);
        }
    }

    #[test]
    fn controller_strobe_and_read_through_io_ports() {
        let (mut bus, _, controller1) = wired_bus();

        controller1.borrow_mut().set_button(Button::A, true);
        controller1.borrow_mut().set_button(Button::Up, true);

        bus.cpu_write(0x4016, 1);
        bus.cpu_write(0x4016, 0);

        let bits: Vec<u8> = (0..8).map(|_| bus.cpu_read(0x4016)).collect();
        assert_eq!(bits, vec![1, 0, 0, 0, 1, 0, 0, 0]);
        assert_eq!(bus.cpu_read(0x4016), 1);
    }

    #[test]
    fn unmapped_io_reads_zero_and_ignores_writes() {
        let (mut bus, _, _) = wired_bus();

        bus.cpu_write(0x4018, 0xFF);
        assert_eq!(bus.cpu_read(0x4018), 0);
        assert_eq!(bus.cpu_read(0x4000), 0);
    }

    #[test]
    fn apu_status_stub_reflects_channel_enables() {
        let (mut bus, _, _) = wired_bus();

        bus.cpu_write(0x4015, 0x0F);
        assert_eq!(bus.cpu_read(0x4015), 0x0F);
    }
}

use std::cell::Cell;
use std::rc::Rc;

use log::debug;

pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_INTERRUPT: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

/// Bus capabilities handed to the CPU at wire-up. The CPU never sees the
/// bus type itself, which keeps the ownership graph one-directional.
pub type BusRead = Box<dyn FnMut(u16) -> u8>;
pub type BusWrite = Box<dyn FnMut(u16, u8)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

#[derive(Clone, Copy)]
struct OpInfo {
    mnemonic: Mnemonic,
    mode: AddrMode,
    cycles: u32,
    len: u8,
    page_penalty: bool,
}

/// Unrecognised opcodes collapse to a two-cycle NOP.
const FALLBACK: OpInfo = OpInfo {
    mnemonic: Mnemonic::Nop,
    mode: AddrMode::Implied,
    cycles: 2,
    len: 1,
    page_penalty: false,
};

const fn entry(mnemonic: Mnemonic, mode: AddrMode, cycles: u32, len: u8, page: bool) -> OpInfo {
    OpInfo { mnemonic, mode, cycles, len, page_penalty: page }
}

static OPCODES: [OpInfo; 256] = build_opcode_table();

#[rustfmt::skip]
const fn build_opcode_table() -> [OpInfo; 256] {
    use AddrMode::*;
    use Mnemonic::*;

    let mut t = [FALLBACK; 256];

    t[0x69] = entry(Adc, Immediate, 2, 2, false);
    t[0x65] = entry(Adc, ZeroPage, 3, 2, false);
    t[0x75] = entry(Adc, ZeroPageX, 4, 2, false);
    t[0x6D] = entry(Adc, Absolute, 4, 3, false);
    t[0x7D] = entry(Adc, AbsoluteX, 4, 3, true);
    t[0x79] = entry(Adc, AbsoluteY, 4, 3, true);
    t[0x61] = entry(Adc, IndexedIndirect, 6, 2, false);
    t[0x71] = entry(Adc, IndirectIndexed, 5, 2, true);

    t[0x29] = entry(And, Immediate, 2, 2, false);
    t[0x25] = entry(And, ZeroPage, 3, 2, false);
    t[0x35] = entry(And, ZeroPageX, 4, 2, false);
    t[0x2D] = entry(And, Absolute, 4, 3, false);
    t[0x3D] = entry(And, AbsoluteX, 4, 3, true);
    t[0x39] = entry(And, AbsoluteY, 4, 3, true);
    t[0x21] = entry(And, IndexedIndirect, 6, 2, false);
    t[0x31] = entry(And, IndirectIndexed, 5, 2, true);

    t[0x0A] = entry(Asl, Accumulator, 2, 1, false);
    t[0x06] = entry(Asl, ZeroPage, 5, 2, false);
    t[0x16] = entry(Asl, ZeroPageX, 6, 2, false);
    t[0x0E] = entry(Asl, Absolute, 6, 3, false);
    t[0x1E] = entry(Asl, AbsoluteX, 7, 3, false);

    t[0x90] = entry(Bcc, Relative, 2, 2, false);
    t[0xB0] = entry(Bcs, Relative, 2, 2, false);
    t[0xF0] = entry(Beq, Relative, 2, 2, false);
    t[0x30] = entry(Bmi, Relative, 2, 2, false);
    t[0xD0] = entry(Bne, Relative, 2, 2, false);
    t[0x10] = entry(Bpl, Relative, 2, 2, false);
    t[0x50] = entry(Bvc, Relative, 2, 2, false);
    t[0x70] = entry(Bvs, Relative, 2, 2, false);

    t[0x24] = entry(Bit, ZeroPage, 3, 2, false);
    t[0x2C] = entry(Bit, Absolute, 4, 3, false);

    t[0x00] = entry(Brk, Implied, 7, 1, false);

    t[0x18] = entry(Clc, Implied, 2, 1, false);
    t[0xD8] = entry(Cld, Implied, 2, 1, false);
    t[0x58] = entry(Cli, Implied, 2, 1, false);
    t[0xB8] = entry(Clv, Implied, 2, 1, false);

    t[0xC9] = entry(Cmp, Immediate, 2, 2, false);
    t[0xC5] = entry(Cmp, ZeroPage, 3, 2, false);
    t[0xD5] = entry(Cmp, ZeroPageX, 4, 2, false);
    t[0xCD] = entry(Cmp, Absolute, 4, 3, false);
    t[0xDD] = entry(Cmp, AbsoluteX, 4, 3, true);
    t[0xD9] = entry(Cmp, AbsoluteY, 4, 3, true);
    t[0xC1] = entry(Cmp, IndexedIndirect, 6, 2, false);
    t[0xD1] = entry(Cmp, IndirectIndexed, 5, 2, true);

    t[0xE0] = entry(Cpx, Immediate, 2, 2, false);
    t[0xE4] = entry(Cpx, ZeroPage, 3, 2, false);
    t[0xEC] = entry(Cpx, Absolute, 4, 3, false);

    t[0xC0] = entry(Cpy, Immediate, 2, 2, false);
    t[0xC4] = entry(Cpy, ZeroPage, 3, 2, false);
    t[0xCC] = entry(Cpy, Absolute, 4, 3, false);

    t[0xC6] = entry(Dec, ZeroPage, 5, 2, false);
    t[0xD6] = entry(Dec, ZeroPageX, 6, 2, false);
    t[0xCE] = entry(Dec, Absolute, 6, 3, false);
    t[0xDE] = entry(Dec, AbsoluteX, 7, 3, false);

    t[0xCA] = entry(Dex, Implied, 2, 1, false);
    t[0x88] = entry(Dey, Implied, 2, 1, false);

    t[0x49] = entry(Eor, Immediate, 2, 2, false);
    t[0x45] = entry(Eor, ZeroPage, 3, 2, false);
    t[0x55] = entry(Eor, ZeroPageX, 4, 2, false);
    t[0x4D] = entry(Eor, Absolute, 4, 3, false);
    t[0x5D] = entry(Eor, AbsoluteX, 4, 3, true);
    t[0x59] = entry(Eor, AbsoluteY, 4, 3, true);
    t[0x41] = entry(Eor, IndexedIndirect, 6, 2, false);
    t[0x51] = entry(Eor, IndirectIndexed, 5, 2, true);

    t[0xE6] = entry(Inc, ZeroPage, 5, 2, false);
    t[0xF6] = entry(Inc, ZeroPageX, 6, 2, false);
    t[0xEE] = entry(Inc, Absolute, 6, 3, false);
    t[0xFE] = entry(Inc, AbsoluteX, 7, 3, false);

    t[0xE8] = entry(Inx, Implied, 2, 1, false);
    t[0xC8] = entry(Iny, Implied, 2, 1, false);

    t[0x4C] = entry(Jmp, Absolute, 3, 3, false);
    t[0x6C] = entry(Jmp, Indirect, 5, 3, false);

    t[0x20] = entry(Jsr, Absolute, 6, 3, false);

    t[0xA9] = entry(Lda, Immediate, 2, 2, false);
    t[0xA5] = entry(Lda, ZeroPage, 3, 2, false);
    t[0xB5] = entry(Lda, ZeroPageX, 4, 2, false);
    t[0xAD] = entry(Lda, Absolute, 4, 3, false);
    t[0xBD] = entry(Lda, AbsoluteX, 4, 3, true);
    t[0xB9] = entry(Lda, AbsoluteY, 4, 3, true);
    t[0xA1] = entry(Lda, IndexedIndirect, 6, 2, false);
    t[0xB1] = entry(Lda, IndirectIndexed, 5, 2, true);

    t[0xA2] = entry(Ldx, Immediate, 2, 2, false);
    t[0xA6] = entry(Ldx, ZeroPage, 3, 2, false);
    t[0xB6] = entry(Ldx, ZeroPageY, 4, 2, false);
    t[0xAE] = entry(Ldx, Absolute, 4, 3, false);
    t[0xBE] = entry(Ldx, AbsoluteY, 4, 3, true);

    t[0xA0] = entry(Ldy, Immediate, 2, 2, false);
    t[0xA4] = entry(Ldy, ZeroPage, 3, 2, false);
    t[0xB4] = entry(Ldy, ZeroPageX, 4, 2, false);
    t[0xAC] = entry(Ldy, Absolute, 4, 3, false);
    t[0xBC] = entry(Ldy, AbsoluteX, 4, 3, true);

    t[0x4A] = entry(Lsr, Accumulator, 2, 1, false);
    t[0x46] = entry(Lsr, ZeroPage, 5, 2, false);
    t[0x56] = entry(Lsr, ZeroPageX, 6, 2, false);
    t[0x4E] = entry(Lsr, Absolute, 6, 3, false);
    t[0x5E] = entry(Lsr, AbsoluteX, 7, 3, false);

    t[0xEA] = entry(Nop, Implied, 2, 1, false);

    t[0x09] = entry(Ora, Immediate, 2, 2, false);
    t[0x05] = entry(Ora, ZeroPage, 3, 2, false);
    t[0x15] = entry(Ora, ZeroPageX, 4, 2, false);
    t[0x0D] = entry(Ora, Absolute, 4, 3, false);
    t[0x1D] = entry(Ora, AbsoluteX, 4, 3, true);
    t[0x19] = entry(Ora, AbsoluteY, 4, 3, true);
    t[0x01] = entry(Ora, IndexedIndirect, 6, 2, false);
    t[0x11] = entry(Ora, IndirectIndexed, 5, 2, true);

    t[0x48] = entry(Pha, Implied, 3, 1, false);
    t[0x08] = entry(Php, Implied, 3, 1, false);
    t[0x68] = entry(Pla, Implied, 4, 1, false);
    t[0x28] = entry(Plp, Implied, 4, 1, false);

    t[0x2A] = entry(Rol, Accumulator, 2, 1, false);
    t[0x26] = entry(Rol, ZeroPage, 5, 2, false);
    t[0x36] = entry(Rol, ZeroPageX, 6, 2, false);
    t[0x2E] = entry(Rol, Absolute, 6, 3, false);
    t[0x3E] = entry(Rol, AbsoluteX, 7, 3, false);

    t[0x6A] = entry(Ror, Accumulator, 2, 1, false);
    t[0x66] = entry(Ror, ZeroPage, 5, 2, false);
    t[0x76] = entry(Ror, ZeroPageX, 6, 2, false);
    t[0x6E] = entry(Ror, Absolute, 6, 3, false);
    t[0x7E] = entry(Ror, AbsoluteX, 7, 3, false);

    t[0x40] = entry(Rti, Implied, 6, 1, false);
    t[0x60] = entry(Rts, Implied, 6, 1, false);

    t[0xE9] = entry(Sbc, Immediate, 2, 2, false);
    t[0xE5] = entry(Sbc, ZeroPage, 3, 2, false);
    t[0xF5] = entry(Sbc, ZeroPageX, 4, 2, false);
    t[0xED] = entry(Sbc, Absolute, 4, 3, false);
    t[0xFD] = entry(Sbc, AbsoluteX, 4, 3, true);
    t[0xF9] = entry(Sbc, AbsoluteY, 4, 3, true);
    t[0xE1] = entry(Sbc, IndexedIndirect, 6, 2, false);
    t[0xF1] = entry(Sbc, IndirectIndexed, 5, 2, true);

    t[0x38] = entry(Sec, Implied, 2, 1, false);
    t[0xF8] = entry(Sed, Implied, 2, 1, false);
    t[0x78] = entry(Sei, Implied, 2, 1, false);

    t[0x85] = entry(Sta, ZeroPage, 3, 2, false);
    t[0x95] = entry(Sta, ZeroPageX, 4, 2, false);
    t[0x8D] = entry(Sta, Absolute, 4, 3, false);
    t[0x9D] = entry(Sta, AbsoluteX, 5, 3, false);
    t[0x99] = entry(Sta, AbsoluteY, 5, 3, false);
    t[0x81] = entry(Sta, IndexedIndirect, 6, 2, false);
    t[0x91] = entry(Sta, IndirectIndexed, 6, 2, false);

    t[0x86] = entry(Stx, ZeroPage, 3, 2, false);
    t[0x96] = entry(Stx, ZeroPageY, 4, 2, false);
    t[0x8E] = entry(Stx, Absolute, 4, 3, false);

    t[0x84] = entry(Sty, ZeroPage, 3, 2, false);
    t[0x94] = entry(Sty, ZeroPageX, 4, 2, false);
    t[0x8C] = entry(Sty, Absolute, 4, 3, false);

    t[0xAA] = entry(Tax, Implied, 2, 1, false);
    t[0xA8] = entry(Tay, Implied, 2, 1, false);
    t[0xBA] = entry(Tsx, Implied, 2, 1, false);
    t[0x8A] = entry(Txa, Implied, 2, 1, false);
    t[0x9A] = entry(Txs, Implied, 2, 1, false);
    t[0x98] = entry(Tya, Implied, 2, 1, false);

    t
}

/// Instruction length in bytes for an opcode, fallback entries included.
/// Useful for driver-side tracing and disassembly.
pub fn instruction_length(opcode: u8) -> u8 {
    OPCODES[opcode as usize].len
}

#[derive(Clone, Copy)]
enum Operand {
    Implied,
    Accumulator,
    Address(u16),
}

pub struct Cpu {
    a: u8,
    x: u8,
    y: u8,
    sp: u8,
    pc: u16,
    p: u8,

    total_cycles: u64,
    stall: Rc<Cell<u32>>,
    nmi_pending: bool,
    irq_pending: bool,

    bus_read: BusRead,
    bus_write: BusWrite,
}

impl Cpu {
    pub fn new(bus_read: BusRead, bus_write: BusWrite) -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD,
            pc: 0,
            p: FLAG_INTERRUPT | FLAG_UNUSED,
            total_cycles: 0,
            stall: Rc::new(Cell::new(0)),
            nmi_pending: false,
            irq_pending: false,
            bus_read,
            bus_write,
        }
    }

    pub fn reset(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xFD;
        self.p = FLAG_INTERRUPT | FLAG_UNUSED;
        self.nmi_pending = false;
        self.irq_pending = false;
        self.stall.set(0);
        self.pc = self.read_u16(RESET_VECTOR);
        self.total_cycles = 7;
        debug!("CPU reset, PC=${:04X}", self.pc);
    }

    pub fn a(&self) -> u8 {
        self.a
    }

    pub fn x(&self) -> u8 {
        self.x
    }

    pub fn y(&self) -> u8 {
        self.y
    }

    pub fn sp(&self) -> u8 {
        self.sp
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn status(&self) -> u8 {
        self.p
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn trigger_nmi(&mut self) {
        self.nmi_pending = true;
    }

    pub fn trigger_irq(&mut self) {
        self.irq_pending = true;
    }

    pub fn clear_irq(&mut self) {
        self.irq_pending = false;
    }

    pub fn stall_cycles(&mut self, cycles: u32) {
        self.stall.set(self.stall.get() + cycles);
    }

    /// Shared stall counter for the bus's DMA callback. A `$4014` write
    /// lands mid-instruction, while the driver's `&mut Cpu` is live, so the
    /// callback adds to this cell instead of re-entering the CPU.
    pub fn stall_handle(&self) -> Rc<Cell<u32>> {
        Rc::clone(&self.stall)
    }

    /// Execute one event: a stall tick, a pending interrupt, or one
    /// instruction. Returns the CPU cycles consumed.
    pub fn step(&mut self) -> u32 {
        let stalled = self.stall.get();
        if stalled > 0 {
            self.stall.set(stalled - 1);
            self.total_cycles += 1;
            return 1;
        }

        if self.nmi_pending {
            self.nmi_pending = false;
            self.service_interrupt(NMI_VECTOR);
            self.total_cycles += 7;
            return 7;
        }

        // Level-triggered: the line stays asserted until the driver or the
        // IRQ source acknowledges it.
        if self.irq_pending && !self.get_flag(FLAG_INTERRUPT) {
            self.service_interrupt(IRQ_VECTOR);
            self.total_cycles += 7;
            return 7;
        }

        let opcode = self.fetch_byte();
        let info = OPCODES[opcode as usize];
        let (operand, page_crossed) = self.resolve(info.mode);

        let mut cycles = info.cycles;
        if page_crossed && info.page_penalty {
            cycles += 1;
        }
        cycles += self.execute(info.mnemonic, operand, page_crossed);

        self.total_cycles += cycles as u64;
        cycles
    }

    fn service_interrupt(&mut self, vector: u16) {
        self.push_u16(self.pc);
        self.push((self.p | FLAG_UNUSED) & !FLAG_BREAK);
        self.set_flag(FLAG_INTERRUPT, true);
        self.pc = self.read_u16(vector);
    }

    fn resolve(&mut self, mode: AddrMode) -> (Operand, bool) {
        match mode {
            AddrMode::Implied => (Operand::Implied, false),
            AddrMode::Accumulator => (Operand::Accumulator, false),
            AddrMode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                (Operand::Address(addr), false)
            }
            AddrMode::ZeroPage => (Operand::Address(self.fetch_byte() as u16), false),
            AddrMode::ZeroPageX => {
                let base = self.fetch_byte();
                (Operand::Address(base.wrapping_add(self.x) as u16), false)
            }
            AddrMode::ZeroPageY => {
                let base = self.fetch_byte();
                (Operand::Address(base.wrapping_add(self.y) as u16), false)
            }
            AddrMode::Absolute => (Operand::Address(self.fetch_word()), false),
            AddrMode::AbsoluteX => {
                let base = self.fetch_word();
                let addr = base.wrapping_add(self.x as u16);
                (Operand::Address(addr), (base & 0xFF00) != (addr & 0xFF00))
            }
            AddrMode::AbsoluteY => {
                let base = self.fetch_word();
                let addr = base.wrapping_add(self.y as u16);
                (Operand::Address(addr), (base & 0xFF00) != (addr & 0xFF00))
            }
            AddrMode::Indirect => {
                let ptr = self.fetch_word();
                (Operand::Address(self.read_u16_bug(ptr)), false)
            }
            AddrMode::IndexedIndirect => {
                let zp = self.fetch_byte().wrapping_add(self.x);
                (Operand::Address(self.read_zp_u16(zp)), false)
            }
            AddrMode::IndirectIndexed => {
                let zp = self.fetch_byte();
                let base = self.read_zp_u16(zp);
                let addr = base.wrapping_add(self.y as u16);
                (Operand::Address(addr), (base & 0xFF00) != (addr & 0xFF00))
            }
            AddrMode::Relative => {
                let offset = self.fetch_byte() as i8;
                let target = self.pc.wrapping_add(offset as i16 as u16);
                (
                    Operand::Address(target),
                    (self.pc & 0xFF00) != (target & 0xFF00),
                )
            }
        }
    }

    fn execute(&mut self, mnemonic: Mnemonic, operand: Operand, page_crossed: bool) -> u32 {
        match mnemonic {
            Mnemonic::Lda => {
                self.a = self.operand_value(operand);
                self.update_zn(self.a);
            }
            Mnemonic::Ldx => {
                self.x = self.operand_value(operand);
                self.update_zn(self.x);
            }
            Mnemonic::Ldy => {
                self.y = self.operand_value(operand);
                self.update_zn(self.y);
            }
            Mnemonic::Sta => self.write(self.operand_addr(operand), self.a),
            Mnemonic::Stx => self.write(self.operand_addr(operand), self.x),
            Mnemonic::Sty => self.write(self.operand_addr(operand), self.y),

            Mnemonic::Adc => {
                let value = self.operand_value(operand);
                self.adc(value);
            }
            Mnemonic::Sbc => {
                let value = self.operand_value(operand);
                self.sbc(value);
            }
            Mnemonic::And => {
                let value = self.operand_value(operand);
                self.a &= value;
                self.update_zn(self.a);
            }
            Mnemonic::Ora => {
                let value = self.operand_value(operand);
                self.a |= value;
                self.update_zn(self.a);
            }
            Mnemonic::Eor => {
                let value = self.operand_value(operand);
                self.a ^= value;
                self.update_zn(self.a);
            }

            Mnemonic::Asl => self.read_modify_write(operand, Self::asl),
            Mnemonic::Lsr => self.read_modify_write(operand, Self::lsr),
            Mnemonic::Rol => self.read_modify_write(operand, Self::rol),
            Mnemonic::Ror => self.read_modify_write(operand, Self::ror),

            Mnemonic::Bit => {
                let value = self.operand_value(operand);
                self.set_flag(FLAG_ZERO, (self.a & value) == 0);
                self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
                self.set_flag(FLAG_OVERFLOW, (value & 0x40) != 0);
            }
            Mnemonic::Cmp => {
                let value = self.operand_value(operand);
                self.compare(self.a, value);
            }
            Mnemonic::Cpx => {
                let value = self.operand_value(operand);
                self.compare(self.x, value);
            }
            Mnemonic::Cpy => {
                let value = self.operand_value(operand);
                self.compare(self.y, value);
            }

            Mnemonic::Inc => {
                let addr = self.operand_addr(operand);
                let value = self.read(addr).wrapping_add(1);
                self.write(addr, value);
                self.update_zn(value);
            }
            Mnemonic::Dec => {
                let addr = self.operand_addr(operand);
                let value = self.read(addr).wrapping_sub(1);
                self.write(addr, value);
                self.update_zn(value);
            }
            Mnemonic::Inx => {
                self.x = self.x.wrapping_add(1);
                self.update_zn(self.x);
            }
            Mnemonic::Iny => {
                self.y = self.y.wrapping_add(1);
                self.update_zn(self.y);
            }
            Mnemonic::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.update_zn(self.x);
            }
            Mnemonic::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.update_zn(self.y);
            }

            Mnemonic::Jmp => self.pc = self.operand_addr(operand),
            Mnemonic::Jsr => {
                let addr = self.operand_addr(operand);
                self.push_u16(self.pc.wrapping_sub(1));
                self.pc = addr;
            }
            Mnemonic::Rts => self.pc = self.pop_u16().wrapping_add(1),

            Mnemonic::Bcc => return self.branch(!self.get_flag(FLAG_CARRY), operand, page_crossed),
            Mnemonic::Bcs => return self.branch(self.get_flag(FLAG_CARRY), operand, page_crossed),
            Mnemonic::Beq => return self.branch(self.get_flag(FLAG_ZERO), operand, page_crossed),
            Mnemonic::Bne => return self.branch(!self.get_flag(FLAG_ZERO), operand, page_crossed),
            Mnemonic::Bmi => {
                return self.branch(self.get_flag(FLAG_NEGATIVE), operand, page_crossed)
            }
            Mnemonic::Bpl => {
                return self.branch(!self.get_flag(FLAG_NEGATIVE), operand, page_crossed)
            }
            Mnemonic::Bvc => {
                return self.branch(!self.get_flag(FLAG_OVERFLOW), operand, page_crossed)
            }
            Mnemonic::Bvs => {
                return self.branch(self.get_flag(FLAG_OVERFLOW), operand, page_crossed)
            }

            Mnemonic::Pha => self.push(self.a),
            Mnemonic::Pla => {
                self.a = self.pop();
                self.update_zn(self.a);
            }
            Mnemonic::Php => self.push(self.p | FLAG_BREAK | FLAG_UNUSED),
            Mnemonic::Plp => {
                self.p = (self.pop() & !FLAG_BREAK) | FLAG_UNUSED;
            }

            Mnemonic::Tax => {
                self.x = self.a;
                self.update_zn(self.x);
            }
            Mnemonic::Tay => {
                self.y = self.a;
                self.update_zn(self.y);
            }
            Mnemonic::Tsx => {
                self.x = self.sp;
                self.update_zn(self.x);
            }
            Mnemonic::Txa => {
                self.a = self.x;
                self.update_zn(self.a);
            }
            Mnemonic::Txs => self.sp = self.x,
            Mnemonic::Tya => {
                self.a = self.y;
                self.update_zn(self.a);
            }

            Mnemonic::Clc => self.set_flag(FLAG_CARRY, false),
            Mnemonic::Sec => self.set_flag(FLAG_CARRY, true),
            Mnemonic::Cli => self.set_flag(FLAG_INTERRUPT, false),
            Mnemonic::Sei => self.set_flag(FLAG_INTERRUPT, true),
            Mnemonic::Cld => self.set_flag(FLAG_DECIMAL, false),
            Mnemonic::Sed => self.set_flag(FLAG_DECIMAL, true),
            Mnemonic::Clv => self.set_flag(FLAG_OVERFLOW, false),

            Mnemonic::Brk => {
                // The byte after BRK is padding.
                self.pc = self.pc.wrapping_add(1);
                self.push_u16(self.pc);
                self.push(self.p | FLAG_BREAK | FLAG_UNUSED);
                self.set_flag(FLAG_INTERRUPT, true);
                self.pc = self.read_u16(IRQ_VECTOR);
            }
            Mnemonic::Rti => {
                self.p = (self.pop() & !FLAG_BREAK) | FLAG_UNUSED;
                self.pc = self.pop_u16();
            }

            Mnemonic::Nop => {}
        }

        0
    }

    fn branch(&mut self, condition: bool, operand: Operand, page_crossed: bool) -> u32 {
        if !condition {
            return 0;
        }
        self.pc = self.operand_addr(operand);
        1 + page_crossed as u32
    }

    fn read_modify_write(&mut self, operand: Operand, op: fn(&mut Self, u8) -> u8) {
        match operand {
            Operand::Accumulator => {
                let value = self.a;
                self.a = op(self, value);
            }
            Operand::Address(addr) => {
                let value = self.read(addr);
                let out = op(self, value);
                self.write(addr, out);
            }
            Operand::Implied => {}
        }
    }

    fn operand_value(&mut self, operand: Operand) -> u8 {
        match operand {
            Operand::Accumulator => self.a,
            Operand::Address(addr) => self.read(addr),
            Operand::Implied => 0,
        }
    }

    fn operand_addr(&self, operand: Operand) -> u16 {
        match operand {
            Operand::Address(addr) => addr,
            _ => 0,
        }
    }

    fn read(&mut self, addr: u16) -> u8 {
        (self.bus_read)(addr)
    }

    fn write(&mut self, addr: u16, value: u8) {
        (self.bus_write)(addr, value);
    }

    fn fetch_byte(&mut self) -> u8 {
        let byte = self.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch_byte() as u16;
        let hi = self.fetch_byte() as u16;
        (hi << 8) | lo
    }

    fn read_u16(&mut self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// JMP (indirect) never carries into the pointer's high byte.
    fn read_u16_bug(&mut self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi_addr = (addr & 0xFF00) | (addr.wrapping_add(1) & 0x00FF);
        let hi = self.read(hi_addr) as u16;
        (hi << 8) | lo
    }

    fn read_zp_u16(&mut self, addr: u8) -> u16 {
        let lo = self.read(addr as u16) as u16;
        let hi = self.read(addr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    fn push(&mut self, value: u8) {
        let addr = 0x0100 | self.sp as u16;
        self.write(addr, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    fn pop(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        let addr = 0x0100 | self.sp as u16;
        self.read(addr)
    }

    fn push_u16(&mut self, value: u16) {
        self.push((value >> 8) as u8);
        self.push(value as u8);
    }

    fn pop_u16(&mut self) -> u16 {
        let lo = self.pop() as u16;
        let hi = self.pop() as u16;
        (hi << 8) | lo
    }

    fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
        self.p |= FLAG_UNUSED;
    }

    fn get_flag(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    fn update_zn(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, value == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
    }

    fn adc(&mut self, value: u8) {
        let carry_in = self.get_flag(FLAG_CARRY) as u16;
        let result = self.a as u16 + value as u16 + carry_in;
        let out = result as u8;

        self.set_flag(FLAG_CARRY, result > 0xFF);
        self.set_flag(FLAG_OVERFLOW, ((self.a ^ out) & (value ^ out) & 0x80) != 0);

        self.a = out;
        self.update_zn(self.a);
    }

    fn sbc(&mut self, value: u8) {
        self.adc(value ^ 0xFF);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(FLAG_CARRY, register >= value);
        self.update_zn(result);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = value << 1;
        self.update_zn(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = value >> 1;
        self.update_zn(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.get_flag(FLAG_CARRY) as u8;
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = (value << 1) | carry_in;
        self.update_zn(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.get_flag(FLAG_CARRY) { 0x80 } else { 0 };
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = (value >> 1) | carry_in;
        self.update_zn(result);
        result
    }
}

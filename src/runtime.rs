//! The Sophia8 execution engine.
//!
//! A fetch/decode/execute loop over the 0xFFFF-byte memory: eight 8-bit
//! general registers, 16-bit `IP`/`SP`/`BP`, a carry flag, and a stop flag.
//! `LOAD`/`STORE`/`LOADR`/`STORER` go through the MMIO gate; instruction
//! fetches, stack traffic and `CALL` return-address writes hit raw memory.

use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::path::PathBuf;

use miette::Result;

use crate::error;
use crate::isa::{Mnemonic, Reg, MEM_SIZE};
use crate::snapshot;
use crate::term::{self, Keyboard};

/// Keyboard status: 0x01 when a byte is buffered.
pub const MMIO_KBD_STATUS: u16 = 0xFF00;
/// Keyboard data: pops one ASCII byte, 0x00 when empty.
pub const MMIO_KBD_DATA: u16 = 0xFF01;
/// TTY status: always 0x01.
pub const MMIO_TTY_STATUS: u16 = 0xFF02;
/// TTY data: a write sends one byte to stdout and flushes.
pub const MMIO_TTY_DATA: u16 = 0xFF03;

/// An armed `file:line` breakpoint, already resolved to an address.
#[derive(Clone, Debug)]
pub struct Breakpoint {
    pub addr: u16,
    pub file: String,
    pub line: u32,
}

/// Complete machine state. One value per running machine, so tests can
/// instantiate as many independent VMs as they like.
#[derive(Debug)]
pub struct RunState {
    mem: Box<[u8; MEM_SIZE]>,
    reg: [u8; 8],
    ip: u16,
    sp: u16,
    bp: u16,
    carry: bool,
    stop: bool,
    breakpoint: Option<Breakpoint>,
    /// Where the breakpoint snapshot lands; `debug.img` in the working
    /// directory by default.
    snapshot_path: PathBuf,
    kbd: Keyboard,
}

impl RunState {
    /// Power-on state: zeroed memory and registers, `SP = BP = 0xFFFF`.
    pub fn new() -> Self {
        RunState {
            mem: Box::new([0u8; MEM_SIZE]),
            reg: [0; 8],
            ip: 0,
            sp: MEM_SIZE as u16,
            bp: MEM_SIZE as u16,
            carry: false,
            stop: false,
            breakpoint: None,
            snapshot_path: PathBuf::from(snapshot::SNAPSHOT_FILE),
            kbd: Keyboard::new(),
        }
    }

    /// Load a raw memory image. Execution will begin at the entry stub.
    pub fn load_image(&mut self, image: &[u8]) -> Result<()> {
        if image.len() != MEM_SIZE {
            return Err(error::vm_load(format!(
                "image must be exactly 0x{MEM_SIZE:X} bytes, got {}",
                image.len()
            )));
        }
        self.mem.copy_from_slice(image);
        self.ip = 0;
        Ok(())
    }

    pub fn set_breakpoint(&mut self, bp: Breakpoint) {
        self.breakpoint = Some(bp);
    }

    pub fn set_snapshot_path(&mut self, path: PathBuf) {
        self.snapshot_path = path;
    }

    // State accessors, also used by snapshots and tests.

    pub fn reg(&self, i: usize) -> u8 {
        self.reg[i]
    }
    pub fn set_reg(&mut self, i: usize, v: u8) {
        self.reg[i] = v;
    }
    pub fn ip(&self) -> u16 {
        self.ip
    }
    pub fn set_ip(&mut self, v: u16) {
        self.ip = v;
    }
    pub fn sp(&self) -> u16 {
        self.sp
    }
    pub fn set_sp(&mut self, v: u16) {
        self.sp = v;
    }
    pub fn bp(&self) -> u16 {
        self.bp
    }
    pub fn set_bp(&mut self, v: u16) {
        self.bp = v;
    }
    pub fn carry(&self) -> bool {
        self.carry
    }
    pub fn set_carry(&mut self, v: bool) {
        self.carry = v;
    }
    pub fn stopped(&self) -> bool {
        self.stop
    }
    pub fn mem(&self) -> &[u8] {
        &self.mem[..]
    }
    pub fn mem_mut(&mut self) -> &mut [u8] {
        &mut self.mem[..]
    }

    /// Run until `HALT`, an unknown opcode, or the breakpoint.
    pub fn run(&mut self) -> Result<()> {
        while !self.stop {
            self.step()?;
        }
        Ok(())
    }

    /// Execute one instruction. The breakpoint is checked before decode.
    pub fn step(&mut self) -> Result<()> {
        if let Some(bp) = self.breakpoint.clone() {
            if bp.addr == self.ip {
                println!("BREAK at {}:{} (IP=0x{:04X})", bp.file, bp.line, self.ip);
                self.dump_registers();
                snapshot::write(&self.snapshot_path, self)?;
                self.stop = true;
                return Ok(());
            }
        }

        use Mnemonic::*;
        match Mnemonic::from_opcode(self.op8(0)) {
            None | Some(Halt) => self.stop = true,
            Some(Nop) => self.advance(1),
            Some(Load) => self.load(),
            Some(Store) => self.store(),
            Some(Storer) => self.storer(),
            Some(Loadr) => self.loadr(),
            Some(Set) => self.set(),
            Some(Inc) => self.inc(),
            Some(Dec) => self.dec(),
            Some(Jmp) => self.ip = self.op16(1),
            Some(Cmp) => self.cmp(),
            Some(Cmpr) => self.cmpr(),
            Some(Jz) => self.jump_zero(true),
            Some(Jnz) => self.jump_zero(false),
            Some(Jc) => self.jump_carry(true),
            Some(Jnc) => self.jump_carry(false),
            Some(Add) => self.add(),
            Some(Addr) => self.add_reg(),
            Some(Sub) => self.sub(),
            Some(Subr) => self.sub_reg(),
            Some(Push) => self.push(),
            Some(Pop) => self.pop(),
            Some(Call) => self.call(),
            Some(Ret) => self.ret(),
            Some(Mul) => self.mul(),
            Some(Mulr) => self.mul_reg(),
            Some(Div) => self.div(),
            Some(Divr) => self.div_reg(),
            Some(Shl) => self.shl(),
            Some(Shr) => self.shr(),
        }
        Ok(())
    }

    pub fn dump_registers(&self) {
        let mut line = String::new();
        for (i, v) in self.reg.iter().enumerate() {
            let _ = write!(line, "R{i} = 0x{v:02X} ");
        }
        let _ = write!(
            line,
            "IP = 0x{:04X} SP = 0x{:04X} BP = 0x{:04X} C = {}",
            self.ip,
            self.sp,
            self.bp,
            self.carry as u8
        );
        eprintln!("{line}");
    }

    // Raw memory: out-of-range reads yield 0, writes are dropped.

    fn raw_read(&self, addr: u32) -> u8 {
        if (addr as usize) < MEM_SIZE {
            self.mem[addr as usize]
        } else {
            0
        }
    }

    fn raw_write(&mut self, addr: u32, val: u8) {
        if (addr as usize) < MEM_SIZE {
            self.mem[addr as usize] = val;
        }
    }

    /// Operand byte at `IP + off`.
    fn op8(&self, off: u32) -> u8 {
        self.raw_read(self.ip as u32 + off)
    }

    /// Big-endian operand word at `IP + off`.
    fn op16(&self, off: u32) -> u16 {
        ((self.op8(off) as u16) << 8) | self.op8(off + 1) as u16
    }

    fn read16_at(&self, addr: u16) -> u16 {
        ((self.raw_read(addr as u32) as u16) << 8) | self.raw_read(addr as u32 + 1) as u16
    }

    /// Decode the operand byte at `IP + off` as a GPR index.
    fn gpr_at(&self, off: u32) -> Option<usize> {
        Reg::decode(self.op8(off)).and_then(Reg::gpr_index)
    }

    fn advance(&mut self, n: u16) {
        self.ip = self.ip.wrapping_add(n);
    }

    // The MMIO gate, used by LOAD/STORE/LOADR/STORER only.

    fn read_gate(&mut self, addr: u16) -> u8 {
        match addr {
            MMIO_KBD_STATUS => self.kbd.poll() as u8,
            MMIO_KBD_DATA => self.kbd.take(),
            MMIO_TTY_STATUS => 0x01,
            MMIO_TTY_DATA => 0x00,
            a if (a as usize) < MEM_SIZE => self.mem[a as usize],
            _ => 0,
        }
    }

    fn write_gate(&mut self, addr: u16, val: u8) {
        match addr {
            MMIO_KBD_STATUS | MMIO_KBD_DATA | MMIO_TTY_STATUS => {}
            MMIO_TTY_DATA => {
                let stdout = io::stdout();
                let mut out = stdout.lock();
                // Raw mode disables output post-processing; keep newlines
                // visually sane on a live terminal.
                let _ = if val == b'\n' && term::is_raw_mode() {
                    out.write_all(b"\r\n")
                } else {
                    out.write_all(&[val])
                };
                let _ = out.flush();
            }
            a if (a as usize) < MEM_SIZE => self.mem[a as usize] = val,
            _ => {}
        }
    }

    // Instruction handlers. An operand byte that does not decode to an
    // allowed register stops the machine with no further side effects.

    fn load(&mut self) {
        let src = self.op16(1);
        let value = self.read_gate(src);
        let Some(d) = self.gpr_at(3) else {
            self.stop = true;
            return;
        };
        self.reg[d] = value;
        self.advance(4);
    }

    fn store(&mut self) {
        let Some(s) = self.gpr_at(1) else {
            self.stop = true;
            return;
        };
        let dst = self.op16(2);
        self.write_gate(dst, self.reg[s]);
        self.advance(4);
    }

    fn storer(&mut self) {
        let (Some(s), Some(h), Some(l)) = (self.gpr_at(1), self.gpr_at(2), self.gpr_at(3)) else {
            self.stop = true;
            return;
        };
        let dst = ((self.reg[h] as u16) << 8) | self.reg[l] as u16;
        self.write_gate(dst, self.reg[s]);
        self.advance(4);
    }

    fn loadr(&mut self) {
        let (Some(d), Some(h), Some(l)) = (self.gpr_at(1), self.gpr_at(2), self.gpr_at(3)) else {
            self.stop = true;
            return;
        };
        let src = ((self.reg[h] as u16) << 8) | self.reg[l] as u16;
        self.reg[d] = self.read_gate(src);
        self.advance(4);
    }

    fn set(&mut self) {
        let value = self.op8(1);
        let Some(d) = self.gpr_at(2) else {
            self.stop = true;
            return;
        };
        self.reg[d] = value;
        self.advance(3);
    }

    fn inc(&mut self) {
        let Some(d) = self.gpr_at(1) else {
            self.stop = true;
            return;
        };
        self.reg[d] = self.reg[d].wrapping_add(1);
        self.carry = self.reg[d] == 0x00;
        self.advance(2);
    }

    fn dec(&mut self) {
        let Some(d) = self.gpr_at(1) else {
            self.stop = true;
            return;
        };
        self.reg[d] = self.reg[d].wrapping_sub(1);
        self.carry = self.reg[d] == 0xFF;
        self.advance(2);
    }

    /// Destructive compare: the compared register keeps the difference.
    fn cmp(&mut self) {
        let Some(d) = self.gpr_at(1) else {
            self.stop = true;
            return;
        };
        let value = self.op8(2);
        self.carry = self.reg[d] < value;
        self.reg[d] = self.reg[d].wrapping_sub(value);
        self.advance(3);
    }

    fn cmpr(&mut self) {
        let (Some(d), Some(s)) = (self.gpr_at(1), self.gpr_at(2)) else {
            self.stop = true;
            return;
        };
        let value = self.reg[s];
        self.carry = self.reg[d] < value;
        self.reg[d] = self.reg[d].wrapping_sub(value);
        self.advance(3);
    }

    fn jump_zero(&mut self, when_zero: bool) {
        let Some(s) = self.gpr_at(1) else {
            self.stop = true;
            return;
        };
        let target = self.op16(2);
        if (self.reg[s] == 0) == when_zero {
            self.ip = target;
        } else {
            self.advance(4);
        }
    }

    fn jump_carry(&mut self, when_set: bool) {
        let target = self.op16(1);
        if self.carry == when_set {
            self.ip = target;
        } else {
            self.advance(3);
        }
    }

    fn add(&mut self) {
        let value = self.op8(1);
        let Some(d) = self.gpr_at(2) else {
            self.stop = true;
            return;
        };
        self.carry = self.reg[d] as u16 + value as u16 > 0xFF;
        self.reg[d] = self.reg[d].wrapping_add(value);
        self.advance(3);
    }

    fn add_reg(&mut self) {
        let (Some(s), Some(d)) = (self.gpr_at(1), self.gpr_at(2)) else {
            self.stop = true;
            return;
        };
        let value = self.reg[s];
        self.carry = self.reg[d] as u16 + value as u16 > 0xFF;
        self.reg[d] = self.reg[d].wrapping_add(value);
        self.advance(3);
    }

    fn sub(&mut self) {
        let value = self.op8(1);
        let Some(d) = self.gpr_at(2) else {
            self.stop = true;
            return;
        };
        self.carry = self.reg[d] < value;
        self.reg[d] = self.reg[d].wrapping_sub(value);
        self.advance(3);
    }

    fn sub_reg(&mut self) {
        let (Some(s), Some(d)) = (self.gpr_at(1), self.gpr_at(2)) else {
            self.stop = true;
            return;
        };
        let value = self.reg[s];
        self.carry = self.reg[d] < value;
        self.reg[d] = self.reg[d].wrapping_sub(value);
        self.advance(3);
    }

    fn push(&mut self) {
        // 16-bit pushes store big-endian, low byte first at the higher
        // address. PUSH SP stores the already-decremented pointer.
        match Reg::decode(self.op8(1)) {
            Some(Reg::Ip) => {
                self.sp = self.sp.wrapping_sub(1);
                self.push16(self.ip);
            }
            Some(Reg::Sp) => {
                self.sp = self.sp.wrapping_sub(1);
                self.push16(self.sp);
            }
            Some(Reg::Bp) => {
                self.sp = self.sp.wrapping_sub(1);
                self.push16(self.bp);
            }
            Some(r) => {
                if let Some(i) = r.gpr_index() {
                    self.sp = self.sp.wrapping_sub(1);
                    self.raw_write(self.sp as u32, self.reg[i]);
                    self.advance(2);
                } else {
                    self.stop = true;
                }
            }
            None => self.stop = true,
        }
    }

    fn push16(&mut self, value: u16) {
        self.raw_write(self.sp as u32, (value & 0xFF) as u8);
        self.raw_write(self.sp.wrapping_sub(1) as u32, (value >> 8) as u8);
        self.sp = self.sp.wrapping_sub(1);
        self.advance(2);
    }

    fn pop(&mut self) {
        match Reg::decode(self.op8(1)) {
            Some(Reg::Ip) => {
                // The popped address is then advanced like any POP.
                self.ip = self.read16_at(self.sp).wrapping_add(2);
                self.sp = self.sp.wrapping_add(2);
            }
            Some(Reg::Sp) => {
                self.sp = self.read16_at(self.sp).wrapping_add(2);
                self.advance(2);
            }
            Some(Reg::Bp) => {
                self.bp = self.read16_at(self.sp);
                self.sp = self.sp.wrapping_add(2);
                self.advance(2);
            }
            Some(r) => {
                if let Some(i) = r.gpr_index() {
                    self.reg[i] = self.raw_read(self.sp as u32);
                    self.sp = self.sp.wrapping_add(1);
                    self.advance(2);
                } else {
                    self.stop = true;
                }
            }
            None => self.stop = true,
        }
    }

    fn call(&mut self) {
        let target = self.op16(1);
        let ret = self.ip.wrapping_add(3);
        self.raw_write(self.sp.wrapping_sub(2) as u32, (ret >> 8) as u8);
        self.raw_write(self.sp.wrapping_sub(1) as u32, (ret & 0xFF) as u8);
        self.sp = self.sp.wrapping_sub(2);
        self.ip = target;
    }

    fn ret(&mut self) {
        self.ip = self.read16_at(self.sp);
        self.sp = self.sp.wrapping_add(2);
    }

    fn mul(&mut self) {
        let value = self.op8(1) as u16;
        let (Some(h), Some(l)) = (self.gpr_at(2), self.gpr_at(3)) else {
            self.stop = true;
            return;
        };
        self.mul_into(value, h, l);
    }

    fn mul_reg(&mut self) {
        let (Some(s), Some(h), Some(l)) = (self.gpr_at(1), self.gpr_at(2), self.gpr_at(3)) else {
            self.stop = true;
            return;
        };
        let value = self.reg[s] as u16;
        self.mul_into(value, h, l);
    }

    /// Low byte lands first; if both destinations name the same register
    /// the high byte wins.
    fn mul_into(&mut self, value: u16, h: usize, l: usize) {
        let product = self.reg[l] as u16 * value;
        self.reg[l] = (product & 0xFF) as u8;
        self.carry = product > 0xFF;
        self.reg[h] = (product >> 8) as u8;
        self.advance(4);
    }

    fn div(&mut self) {
        let value = self.op8(1);
        let (Some(q), Some(r)) = (self.gpr_at(2), self.gpr_at(3)) else {
            self.stop = true;
            return;
        };
        self.div_into(value, q, r);
    }

    fn div_reg(&mut self) {
        let (Some(s), Some(q), Some(r)) = (self.gpr_at(1), self.gpr_at(2), self.gpr_at(3)) else {
            self.stop = true;
            return;
        };
        let value = self.reg[s];
        self.div_into(value, q, r);
    }

    /// Quotient and remainder are computed before either register is
    /// overwritten; the remainder write wins when they alias.
    fn div_into(&mut self, value: u8, q: usize, r: usize) {
        if value == 0 {
            self.stop = true;
            return;
        }
        let quot = self.reg[q] / value;
        let rem = self.reg[q] % value;
        self.reg[q] = quot;
        self.reg[r] = rem;
        self.advance(4);
    }

    fn shl(&mut self) {
        let count = self.op8(1);
        let Some(d) = self.gpr_at(2) else {
            self.stop = true;
            return;
        };
        if count > 0 {
            // Carry is the last bit shifted out.
            self.carry = count <= 8 && (self.reg[d] >> (8 - count as u32)) & 1 == 1;
            self.reg[d] = self.reg[d].checked_shl(count as u32).unwrap_or(0);
        }
        self.advance(3);
    }

    fn shr(&mut self) {
        let count = self.op8(1);
        let Some(d) = self.gpr_at(2) else {
            self.stop = true;
            return;
        };
        if count > 0 {
            self.carry = count <= 8 && (self.reg[d] >> (count as u32 - 1)) & 1 == 1;
            self.reg[d] = self.reg[d].checked_shr(count as u32).unwrap_or(0);
        }
        self.advance(3);
    }
}

impl Default for RunState {
    fn default() -> Self {
        RunState::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Place `code` at address 0 and run until the machine stops. Fuel
    /// bounds runaway programs so a broken jump fails the test instead of
    /// hanging it.
    fn run_code(code: &[u8]) -> RunState {
        let mut st = RunState::new();
        st.mem_mut()[..code.len()].copy_from_slice(code);
        for _ in 0..10_000 {
            if st.stopped() {
                return st;
            }
            st.step().unwrap();
        }
        panic!("program did not halt");
    }

    const R0: u8 = 0xF2;
    const R1: u8 = 0xF3;
    const R2: u8 = 0xF4;
    const R3: u8 = 0xF5;

    #[test]
    fn set_store_load_round_trip() {
        let st = run_code(&[
            0x04, 0x0A, R0, // SET #0x0A, R0
            0x02, R0, 0x12, 0x34, // STORE R0, 0x1234
            0x01, 0x12, 0x34, R1, // LOAD 0x1234, R1
            0x00, // HALT
        ]);
        assert_eq!(st.mem()[0x1234], 0x0A);
        assert_eq!(st.reg(1), 0x0A);
    }

    #[test]
    fn inc_wraps_and_sets_carry() {
        // SET #0xFF, R0; INC R0; HALT
        let st = run_code(&[0x04, 0xFF, R0, 0x05, R0, 0x00]);
        assert_eq!(st.reg(0), 0x00);
        assert!(st.carry());
    }

    #[test]
    fn dec_wraps_and_sets_carry() {
        let st = run_code(&[0x04, 0x00, R0, 0x06, R0, 0x00]);
        assert_eq!(st.reg(0), 0xFF);
        assert!(st.carry());
    }

    #[test]
    fn inc_clears_carry_when_no_wrap() {
        let st = run_code(&[0x04, 0xFF, R0, 0x05, R0, 0x05, R0, 0x00]);
        assert_eq!(st.reg(0), 0x01);
        assert!(!st.carry());
    }

    #[test]
    fn cmp_is_destructive() {
        // CMP R0, #0x01 with R0 == 0: R0 becomes 0xFF and C is set.
        let st = run_code(&[0x08, R0, 0x01, 0x00]);
        assert_eq!(st.reg(0), 0xFF);
        assert!(st.carry());
    }

    #[test]
    fn cmpr_same_register_is_zero() {
        let st = run_code(&[0x04, 0x42, R0, 0x09, R0, R0, 0x00]);
        assert_eq!(st.reg(0), 0x00);
        assert!(!st.carry());
    }

    #[test]
    fn add_carry_law() {
        // 0x80 + 0x80 overflows; 0x10 + 0x10 does not.
        let st = run_code(&[0x04, 0x80, R0, 0x0E, 0x80, R0, 0x00]);
        assert_eq!(st.reg(0), 0x00);
        assert!(st.carry());

        let st = run_code(&[0x04, 0x10, R0, 0x0E, 0x10, R0, 0x00]);
        assert_eq!(st.reg(0), 0x20);
        assert!(!st.carry());
    }

    #[test]
    fn sub_carry_law() {
        let st = run_code(&[0x04, 0x05, R0, 0x14, 0x06, R0, 0x00]);
        assert_eq!(st.reg(0), 0xFF);
        assert!(st.carry());

        let st = run_code(&[0x04, 0x05, R0, 0x14, 0x05, R0, 0x00]);
        assert_eq!(st.reg(0), 0x00);
        assert!(!st.carry());
    }

    #[test]
    fn addr_and_subr_use_register_values() {
        let st = run_code(&[
            0x04, 0x21, R0, // SET #0x21, R0
            0x04, 0x12, R1, // SET #0x12, R1
            0x0F, R0, R1, // ADDR R0, R1
            0x15, R0, R1, // SUBR R0, R1
            0x00,
        ]);
        assert_eq!(st.reg(1), 0x12);
        assert_eq!(st.reg(0), 0x21);
    }

    #[test]
    fn push_pop_gpr_restores_register_and_sp() {
        let st = run_code(&[0x04, 0x5A, R3, 0x10, R3, 0x04, 0x00, R3, 0x11, R3, 0x00]);
        assert_eq!(st.reg(3), 0x5A);
        assert_eq!(st.sp(), 0xFFFF);
    }

    #[test]
    fn push_pop_bp_restores_both() {
        let st = run_code(&[0x10, 0xFC, 0x11, 0xFC, 0x00]); // PUSH BP; POP BP
        assert_eq!(st.bp(), 0xFFFF);
        assert_eq!(st.sp(), 0xFFFF);
    }

    #[test]
    fn push_sp_stores_decremented_pointer() {
        let mut st = RunState::new();
        st.mem_mut()[0] = 0x10; // PUSH SP
        st.mem_mut()[1] = 0xFB;
        st.mem_mut()[2] = 0x00;
        st.step().unwrap();
        // sp went 0xFFFF -> 0xFFFE before capture, then one more for hi.
        assert_eq!(st.sp(), 0xFFFD);
        assert_eq!(st.mem()[0xFFFE], 0xFE);
        assert_eq!(st.mem()[0xFFFD], 0xFF);
    }

    #[test]
    fn pop_sp_adds_two_to_popped_value() {
        // PUSH SP; POP SP: pops 0xFFFE then adds 2, wrapping to 0x0000.
        let mut st = RunState::new();
        st.mem_mut()[..4].copy_from_slice(&[0x10, 0xFB, 0x11, 0xFB]);
        st.step().unwrap();
        st.step().unwrap();
        assert_eq!(st.sp(), 0x0000);
    }

    #[test]
    fn call_ret_returns_past_the_call() {
        let st = run_code(&[
            0x12, 0x00, 0x10, // 0x0000: CALL 0x0010
            0x00, // 0x0003: HALT
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x13, // 0x0010: RET
        ]);
        // Halted at the instruction right after the CALL.
        assert_eq!(st.ip(), 0x0003);
        assert_eq!(st.sp(), 0xFFFF);
    }

    #[test]
    fn jz_and_jnz() {
        // JZ taken when the register is zero.
        let st = run_code(&[
            0x0A, R0, 0x00, 0x08, // JZ R0, 0x0008
            0x04, 0x01, R1, // SET #1, R1 (skipped)
            0x00, // 0x0007: HALT (skipped)
            0x00, // 0x0008: HALT
        ]);
        assert_eq!(st.reg(1), 0x00);
        assert_eq!(st.ip(), 0x0008);

        // JNZ falls through on zero.
        let st = run_code(&[
            0x0B, R0, 0x00, 0x08, // JNZ R0, 0x0008
            0x04, 0x01, R1, // SET #1, R1
            0x00,
        ]);
        assert_eq!(st.reg(1), 0x01);
    }

    #[test]
    fn jc_and_jnc() {
        // Set carry via SUB underflow, then JC.
        let st = run_code(&[
            0x14, 0x01, R0, // SUB #1, R0 -> carry
            0x0C, 0x00, 0x08, // JC 0x0008
            0x04, 0x01, R1, // skipped
            0x00, // 0x0008
        ]);
        assert_eq!(st.reg(1), 0x00);

        let st = run_code(&[
            0x0D, 0x00, 0x07, // JNC 0x0007 (carry clear at start)
            0x04, 0x01, R1, // skipped
            0x00,
        ]);
        assert_eq!(st.reg(1), 0x00);
    }

    #[test]
    fn mul_splits_product() {
        // 0xEE * 0xEE = 0xDD44
        let st = run_code(&[0x04, 0xEE, R1, 0x16, 0xEE, R0, R1, 0x00]);
        assert_eq!(st.reg(1), 0x44);
        assert_eq!(st.reg(0), 0xDD);
        assert!(st.carry());
    }

    #[test]
    fn mul_high_write_wins_on_alias() {
        // MUL #0xEE with both destinations R1: low then high, high wins.
        let st = run_code(&[0x04, 0xEE, R1, 0x16, 0xEE, R1, R1, 0x00]);
        assert_eq!(st.reg(1), 0xDD);
    }

    #[test]
    fn mulr_reads_source_before_writing() {
        let st = run_code(&[
            0x04, 0x0A, R0, // SET #10, R0
            0x04, 0x0B, R2, // SET #11, R2
            0x17, R0, R1, R2, // MULR R0, R1, R2 -> 110
            0x00,
        ]);
        assert_eq!(st.reg(2), 110);
        assert_eq!(st.reg(1), 0);
        assert!(!st.carry());
    }

    #[test]
    fn div_quotient_and_remainder() {
        let st = run_code(&[0x04, 0x0A, R0, 0x18, 0x06, R0, R1, 0x00]);
        assert_eq!(st.reg(0), 1);
        assert_eq!(st.reg(1), 4);
    }

    #[test]
    fn div_remainder_wins_on_alias() {
        let st = run_code(&[0x04, 0x0A, R0, 0x18, 0x06, R0, R0, 0x00]);
        assert_eq!(st.reg(0), 4);
    }

    #[test]
    fn div_by_zero_stops() {
        let mut st = RunState::new();
        st.mem_mut()[..4].copy_from_slice(&[0x18, 0x00, R0, R1]);
        st.step().unwrap();
        assert!(st.stopped());
        assert_eq!(st.ip(), 0);
    }

    #[test]
    fn divr_uses_register_divisor() {
        let st = run_code(&[
            0x04, 0x06, R0, // SET #6, R0
            0x04, 0x0A, R1, // SET #10, R1
            0x19, R0, R1, R2, // DIVR R0, R1, R2
            0x00,
        ]);
        assert_eq!(st.reg(1), 1);
        assert_eq!(st.reg(2), 4);
    }

    #[test]
    fn shl_shifts_and_carries_last_bit() {
        // 0x01 << 7 = 0x80, carry from bit 1 (never set).
        let st = run_code(&[0x04, 0x01, R0, 0x1A, 0x07, R0, 0x00]);
        assert_eq!(st.reg(0), 0x80);
        assert!(!st.carry());

        // 0x80 << 1 shifts bit 7 out.
        let st = run_code(&[0x04, 0x80, R0, 0x1A, 0x01, R0, 0x00]);
        assert_eq!(st.reg(0), 0x00);
        assert!(st.carry());
    }

    #[test]
    fn shr_shifts_and_carries_last_bit() {
        // 0x80 >> 7 = 0x01, bit at position 6 is zero.
        let st = run_code(&[0x04, 0x80, R0, 0x1B, 0x07, R0, 0x00]);
        assert_eq!(st.reg(0), 0x01);
        assert!(!st.carry());

        // 0x01 >> 1 shifts bit 0 out.
        let st = run_code(&[0x04, 0x01, R0, 0x1B, 0x01, R0, 0x00]);
        assert_eq!(st.reg(0), 0x00);
        assert!(st.carry());
    }

    #[test]
    fn shift_by_zero_leaves_state_alone() {
        let st = run_code(&[
            0x14, 0x01, R0, // SUB #1, R0 -> carry set, R0 = 0xFF
            0x1A, 0x00, R0, // SHL #0, R0
            0x1B, 0x00, R0, // SHR #0, R0
            0x00,
        ]);
        assert_eq!(st.reg(0), 0xFF);
        assert!(st.carry());
    }

    #[test]
    fn storer_and_loadr_build_16_bit_addresses() {
        let st = run_code(&[
            0x04, 0xBB, R0, // SET #0xBB, R0
            0x04, 0x12, R1, // hi
            0x04, 0x34, R2, // lo
            0x03, R0, R1, R2, // STORER R0, R1, R2
            0x1C, R3, R1, R2, // LOADR R3, R1, R2
            0x00,
        ]);
        assert_eq!(st.mem()[0x1234], 0xBB);
        assert_eq!(st.reg(3), 0xBB);
    }

    #[test]
    fn unknown_opcode_stops() {
        let mut st = RunState::new();
        st.mem_mut()[0] = 0x42;
        st.step().unwrap();
        assert!(st.stopped());
        assert_eq!(st.ip(), 0);
    }

    #[test]
    fn invalid_register_byte_stops() {
        let mut st = RunState::new();
        // INC with a non-register operand byte.
        st.mem_mut()[..2].copy_from_slice(&[0x05, 0x17]);
        st.step().unwrap();
        assert!(st.stopped());
    }

    #[test]
    fn invalid_push_operand_leaves_stack_alone() {
        let mut st = RunState::new();
        // PUSH with a non-register operand byte: no partial side effects.
        st.mem_mut()[..2].copy_from_slice(&[0x10, 0x17]);
        st.step().unwrap();
        assert!(st.stopped());
        assert_eq!(st.sp(), 0xFFFF);
        assert_eq!(st.mem()[0xFFFE], 0x00);
    }

    #[test]
    fn stores_outside_memory_are_dropped() {
        // STORE R0, 0xFFFF is silently ignored.
        let st = run_code(&[0x04, 0x77, R0, 0x02, R0, 0xFF, 0xFF, 0x00]);
        assert_eq!(st.mem()[0xFFFE], 0x00);
    }

    #[test]
    fn tty_status_reads_ready() {
        let st = run_code(&[0x01, 0xFF, 0x02, R0, 0x00]); // LOAD 0xFF02, R0
        assert_eq!(st.reg(0), 0x01);
    }

    #[test]
    fn mmio_cells_are_not_backed_by_memory() {
        // A gated store to the TTY data cell must not land in mem[].
        let st = run_code(&[0x04, 0x58, R0, 0x02, R0, 0xFF, 0x03, 0x00]);
        assert_eq!(st.mem()[0xFF03], 0x00);
    }

    #[test]
    fn halt_program_leaves_high_memory_untouched() {
        let st = run_code(&[0x04, 0x01, R0, 0x00]);
        // Nothing above the program was written (stack untouched).
        assert!(st.mem()[0x0004..].iter().all(|b| *b == 0));
        assert_eq!(st.sp(), 0xFFFF);
    }

    #[test]
    fn load_image_requires_exact_size() {
        let mut st = RunState::new();
        assert!(st.load_image(&[0u8; 10]).is_err());
        assert!(st.load_image(&vec![0u8; MEM_SIZE]).is_ok());
    }

    #[test]
    fn breakpoint_stops_before_decode() {
        let dir = tempfile::TempDir::new().unwrap();
        let snap = dir.path().join("debug.img");

        let mut st = RunState::new();
        st.set_snapshot_path(snap.clone());
        st.mem_mut()[..6].copy_from_slice(&[
            0x04, 0x01, R0, // SET #1, R0
            0x04, 0x02, R0, // SET #2, R0  <- breakpoint
        ]);
        st.set_breakpoint(Breakpoint {
            addr: 0x0003,
            file: "test.s8".to_string(),
            line: 2,
        });
        st.run().unwrap();

        assert!(st.stopped());
        assert_eq!(st.ip(), 0x0003);
        assert_eq!(st.reg(0), 0x01, "second SET must not have run");
        assert!(snap.exists(), "snapshot should be written on breakpoint");
    }
}

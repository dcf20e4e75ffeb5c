//! Machine definition: memory size, register wire codes and the instruction
//! table (opcode, byte length, operand kinds).

use std::fmt;
use std::str::FromStr;

/// Total memory size in bytes. Valid addresses are `0x0000..=0xFFFE`.
pub const MEM_SIZE: usize = 0xFFFF;

/// Addresses `0x0000..0x0003` hold the implicit `JMP <entry>` stub.
pub const ENTRY_STUB_SIZE: u16 = 3;

/// Registers addressable in operand bytes.
///
/// Wire codes are the non-contiguous byte values `0xF2..=0xFC`; everything
/// below that range is free for immediates in neighbouring operand slots.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reg {
    R0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
    Ip,
    Sp,
    Bp,
}

impl Reg {
    pub const GPRS: [Reg; 8] = [
        Reg::R0,
        Reg::R1,
        Reg::R2,
        Reg::R3,
        Reg::R4,
        Reg::R5,
        Reg::R6,
        Reg::R7,
    ];

    /// The operand byte emitted for this register.
    pub fn code(self) -> u8 {
        match self {
            Reg::R0 => 0xF2,
            Reg::R1 => 0xF3,
            Reg::R2 => 0xF4,
            Reg::R3 => 0xF5,
            Reg::R4 => 0xF6,
            Reg::R5 => 0xF7,
            Reg::R6 => 0xF8,
            Reg::R7 => 0xF9,
            Reg::Ip => 0xFA,
            Reg::Sp => 0xFB,
            Reg::Bp => 0xFC,
        }
    }

    /// Decode an operand byte back into a register.
    pub fn decode(byte: u8) -> Option<Reg> {
        match byte {
            0xF2 => Some(Reg::R0),
            0xF3 => Some(Reg::R1),
            0xF4 => Some(Reg::R2),
            0xF5 => Some(Reg::R3),
            0xF6 => Some(Reg::R4),
            0xF7 => Some(Reg::R5),
            0xF8 => Some(Reg::R6),
            0xF9 => Some(Reg::R7),
            0xFA => Some(Reg::Ip),
            0xFB => Some(Reg::Sp),
            0xFC => Some(Reg::Bp),
            _ => None,
        }
    }

    /// Index into the general-purpose register file, if this is a GPR.
    pub fn gpr_index(self) -> Option<usize> {
        match self {
            Reg::R0 => Some(0),
            Reg::R1 => Some(1),
            Reg::R2 => Some(2),
            Reg::R3 => Some(3),
            Reg::R4 => Some(4),
            Reg::R5 => Some(5),
            Reg::R6 => Some(6),
            Reg::R7 => Some(7),
            _ => None,
        }
    }

    pub fn is_gpr(self) -> bool {
        self.gpr_index().is_some()
    }
}

impl FromStr for Reg {
    type Err = ();

    // Register names are case-sensitive, like the rest of the language.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "R0" => Ok(Reg::R0),
            "R1" => Ok(Reg::R1),
            "R2" => Ok(Reg::R2),
            "R3" => Ok(Reg::R3),
            "R4" => Ok(Reg::R4),
            "R5" => Ok(Reg::R5),
            "R6" => Ok(Reg::R6),
            "R7" => Ok(Reg::R7),
            "IP" => Ok(Reg::Ip),
            "SP" => Ok(Reg::Sp),
            "BP" => Ok(Reg::Bp),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reg::R0 => "R0",
            Reg::R1 => "R1",
            Reg::R2 => "R2",
            Reg::R3 => "R3",
            Reg::R4 => "R4",
            Reg::R5 => "R5",
            Reg::R6 => "R6",
            Reg::R7 => "R7",
            Reg::Ip => "IP",
            Reg::Sp => "SP",
            Reg::Bp => "BP",
        };
        f.write_str(name)
    }
}

/// What an instruction operand slot accepts.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OperandKind {
    /// Numeric literal or label, no `#` prefix; encoded big-endian.
    Addr16,
    /// `#literal`, at most 0xFF.
    Imm8,
    /// One of `R0..R7`.
    Gpr,
    /// Any register including `IP`, `SP`, `BP`.
    AnyReg,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mnemonic {
    Halt,
    Load,
    Store,
    Storer,
    Set,
    Inc,
    Dec,
    Jmp,
    Cmp,
    Cmpr,
    Jz,
    Jnz,
    Jc,
    Jnc,
    Add,
    Addr,
    Push,
    Pop,
    Call,
    Ret,
    Sub,
    Subr,
    Mul,
    Mulr,
    Div,
    Divr,
    Shl,
    Shr,
    Loadr,
    Nop,
}

impl Mnemonic {
    pub fn opcode(self) -> u8 {
        match self {
            Mnemonic::Halt => 0x00,
            Mnemonic::Load => 0x01,
            Mnemonic::Store => 0x02,
            Mnemonic::Storer => 0x03,
            Mnemonic::Set => 0x04,
            Mnemonic::Inc => 0x05,
            Mnemonic::Dec => 0x06,
            Mnemonic::Jmp => 0x07,
            Mnemonic::Cmp => 0x08,
            Mnemonic::Cmpr => 0x09,
            Mnemonic::Jz => 0x0A,
            Mnemonic::Jnz => 0x0B,
            Mnemonic::Jc => 0x0C,
            Mnemonic::Jnc => 0x0D,
            Mnemonic::Add => 0x0E,
            Mnemonic::Addr => 0x0F,
            Mnemonic::Push => 0x10,
            Mnemonic::Pop => 0x11,
            Mnemonic::Call => 0x12,
            Mnemonic::Ret => 0x13,
            Mnemonic::Sub => 0x14,
            Mnemonic::Subr => 0x15,
            Mnemonic::Mul => 0x16,
            Mnemonic::Mulr => 0x17,
            Mnemonic::Div => 0x18,
            Mnemonic::Divr => 0x19,
            Mnemonic::Shl => 0x1A,
            Mnemonic::Shr => 0x1B,
            Mnemonic::Loadr => 0x1C,
            Mnemonic::Nop => 0xFF,
        }
    }

    pub fn from_opcode(byte: u8) -> Option<Mnemonic> {
        match byte {
            0x00 => Some(Mnemonic::Halt),
            0x01 => Some(Mnemonic::Load),
            0x02 => Some(Mnemonic::Store),
            0x03 => Some(Mnemonic::Storer),
            0x04 => Some(Mnemonic::Set),
            0x05 => Some(Mnemonic::Inc),
            0x06 => Some(Mnemonic::Dec),
            0x07 => Some(Mnemonic::Jmp),
            0x08 => Some(Mnemonic::Cmp),
            0x09 => Some(Mnemonic::Cmpr),
            0x0A => Some(Mnemonic::Jz),
            0x0B => Some(Mnemonic::Jnz),
            0x0C => Some(Mnemonic::Jc),
            0x0D => Some(Mnemonic::Jnc),
            0x0E => Some(Mnemonic::Add),
            0x0F => Some(Mnemonic::Addr),
            0x10 => Some(Mnemonic::Push),
            0x11 => Some(Mnemonic::Pop),
            0x12 => Some(Mnemonic::Call),
            0x13 => Some(Mnemonic::Ret),
            0x14 => Some(Mnemonic::Sub),
            0x15 => Some(Mnemonic::Subr),
            0x16 => Some(Mnemonic::Mul),
            0x17 => Some(Mnemonic::Mulr),
            0x18 => Some(Mnemonic::Div),
            0x19 => Some(Mnemonic::Divr),
            0x1A => Some(Mnemonic::Shl),
            0x1B => Some(Mnemonic::Shr),
            0x1C => Some(Mnemonic::Loadr),
            0xFF => Some(Mnemonic::Nop),
            _ => None,
        }
    }

    /// Fixed encoded length in bytes, opcode included.
    pub fn len(self) -> u32 {
        match self {
            Mnemonic::Halt | Mnemonic::Ret | Mnemonic::Nop => 1,
            Mnemonic::Inc | Mnemonic::Dec | Mnemonic::Push | Mnemonic::Pop => 2,
            Mnemonic::Jmp
            | Mnemonic::Call
            | Mnemonic::Jc
            | Mnemonic::Jnc
            | Mnemonic::Set
            | Mnemonic::Add
            | Mnemonic::Sub
            | Mnemonic::Cmp
            | Mnemonic::Cmpr
            | Mnemonic::Addr
            | Mnemonic::Subr
            | Mnemonic::Shl
            | Mnemonic::Shr => 3,
            Mnemonic::Load
            | Mnemonic::Store
            | Mnemonic::Storer
            | Mnemonic::Loadr
            | Mnemonic::Jz
            | Mnemonic::Jnz
            | Mnemonic::Mul
            | Mnemonic::Mulr
            | Mnemonic::Div
            | Mnemonic::Divr => 4,
        }
    }

    /// Operand kinds in textual order. Encoding order on the wire differs
    /// for some mnemonics; the emitter owns that mapping.
    pub fn operands(self) -> &'static [OperandKind] {
        use OperandKind::*;
        match self {
            Mnemonic::Halt | Mnemonic::Ret | Mnemonic::Nop => &[],
            Mnemonic::Load => &[Addr16, Gpr],
            Mnemonic::Store => &[Gpr, Addr16],
            Mnemonic::Storer | Mnemonic::Loadr => &[Gpr, Gpr, Gpr],
            Mnemonic::Set
            | Mnemonic::Add
            | Mnemonic::Sub
            | Mnemonic::Shl
            | Mnemonic::Shr => &[Imm8, Gpr],
            Mnemonic::Inc | Mnemonic::Dec => &[Gpr],
            Mnemonic::Jmp | Mnemonic::Call | Mnemonic::Jc | Mnemonic::Jnc => &[Addr16],
            Mnemonic::Cmp => &[Gpr, Imm8],
            Mnemonic::Cmpr | Mnemonic::Addr | Mnemonic::Subr => &[Gpr, Gpr],
            Mnemonic::Jz | Mnemonic::Jnz => &[Gpr, Addr16],
            Mnemonic::Mul | Mnemonic::Div => &[Imm8, Gpr, Gpr],
            Mnemonic::Mulr | Mnemonic::Divr => &[Gpr, Gpr, Gpr],
            Mnemonic::Push | Mnemonic::Pop => &[AnyReg],
        }
    }
}

impl FromStr for Mnemonic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HALT" => Ok(Mnemonic::Halt),
            "LOAD" => Ok(Mnemonic::Load),
            "STORE" => Ok(Mnemonic::Store),
            "STORER" => Ok(Mnemonic::Storer),
            "SET" => Ok(Mnemonic::Set),
            "INC" => Ok(Mnemonic::Inc),
            "DEC" => Ok(Mnemonic::Dec),
            "JMP" => Ok(Mnemonic::Jmp),
            "CMP" => Ok(Mnemonic::Cmp),
            "CMPR" => Ok(Mnemonic::Cmpr),
            "JZ" => Ok(Mnemonic::Jz),
            "JNZ" => Ok(Mnemonic::Jnz),
            "JC" => Ok(Mnemonic::Jc),
            "JNC" => Ok(Mnemonic::Jnc),
            "ADD" => Ok(Mnemonic::Add),
            "ADDR" => Ok(Mnemonic::Addr),
            "PUSH" => Ok(Mnemonic::Push),
            "POP" => Ok(Mnemonic::Pop),
            "CALL" => Ok(Mnemonic::Call),
            "RET" => Ok(Mnemonic::Ret),
            "SUB" => Ok(Mnemonic::Sub),
            "SUBR" => Ok(Mnemonic::Subr),
            "MUL" => Ok(Mnemonic::Mul),
            "MULR" => Ok(Mnemonic::Mulr),
            "DIV" => Ok(Mnemonic::Div),
            "DIVR" => Ok(Mnemonic::Divr),
            "SHL" => Ok(Mnemonic::Shl),
            "SHR" => Ok(Mnemonic::Shr),
            "LOADR" => Ok(Mnemonic::Loadr),
            "NOP" => Ok(Mnemonic::Nop),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mnemonic::Halt => "HALT",
            Mnemonic::Load => "LOAD",
            Mnemonic::Store => "STORE",
            Mnemonic::Storer => "STORER",
            Mnemonic::Set => "SET",
            Mnemonic::Inc => "INC",
            Mnemonic::Dec => "DEC",
            Mnemonic::Jmp => "JMP",
            Mnemonic::Cmp => "CMP",
            Mnemonic::Cmpr => "CMPR",
            Mnemonic::Jz => "JZ",
            Mnemonic::Jnz => "JNZ",
            Mnemonic::Jc => "JC",
            Mnemonic::Jnc => "JNC",
            Mnemonic::Add => "ADD",
            Mnemonic::Addr => "ADDR",
            Mnemonic::Push => "PUSH",
            Mnemonic::Pop => "POP",
            Mnemonic::Call => "CALL",
            Mnemonic::Ret => "RET",
            Mnemonic::Sub => "SUB",
            Mnemonic::Subr => "SUBR",
            Mnemonic::Mul => "MUL",
            Mnemonic::Mulr => "MULR",
            Mnemonic::Div => "DIV",
            Mnemonic::Divr => "DIVR",
            Mnemonic::Shl => "SHL",
            Mnemonic::Shr => "SHR",
            Mnemonic::Loadr => "LOADR",
            Mnemonic::Nop => "NOP",
        };
        f.write_str(name)
    }
}

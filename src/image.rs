use miette::Result;

use crate::error;
use crate::isa::{Mnemonic, MEM_SIZE};
use crate::line::SrcLine;

/// The full memory image under construction: 0xFFFF zero-filled bytes plus a
/// parallel bitmap of cells that have already been emitted to. Emitting the
/// same cell twice is a fatal overlap.
#[derive(Debug)]
pub struct Image {
    bytes: Box<[u8; MEM_SIZE]>,
    used: Box<[bool; MEM_SIZE]>,
}

impl Image {
    /// A blank image with the entry-stub cells `0x0000..0x0003` pre-reserved.
    pub fn new() -> Self {
        let mut used = Box::new([false; MEM_SIZE]);
        used[0] = true;
        used[1] = true;
        used[2] = true;
        Image {
            bytes: Box::new([0u8; MEM_SIZE]),
            used,
        }
    }

    /// Emit one byte at the cursor and advance it.
    pub fn emit(&mut self, cursor: &mut u32, val: u8, sl: &SrcLine) -> Result<()> {
        let addr = *cursor;
        if addr as usize >= MEM_SIZE {
            return Err(error::emit_out_of_range(addr, sl));
        }
        if self.used[addr as usize] {
            return Err(error::overlap(addr, sl));
        }
        self.bytes[addr as usize] = val;
        self.used[addr as usize] = true;
        *cursor += 1;
        Ok(())
    }

    /// Emit a 16-bit value big-endian.
    pub fn emit_word(&mut self, cursor: &mut u32, val: u16, sl: &SrcLine) -> Result<()> {
        self.emit(cursor, (val >> 8) as u8, sl)?;
        self.emit(cursor, (val & 0xFF) as u8, sl)
    }

    /// Write the implicit `JMP <entry>` stub. The stub cells were reserved
    /// at construction, so this bypasses the overlap check.
    pub fn write_stub(&mut self, entry: u16) {
        self.bytes[0] = Mnemonic::Jmp.opcode();
        self.bytes[1] = (entry >> 8) as u8;
        self.bytes[2] = (entry & 0xFF) as u8;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..]
    }

    pub fn is_used(&self, addr: u16) -> bool {
        self.used[addr as usize]
    }
}

impl Default for Image {
    fn default() -> Self {
        Image::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn double_emission_is_an_overlap() {
        let mut img = Image::new();
        let sl = SrcLine::new(".byte 1", "test.s8", 1);
        let mut cursor = 0x0100;
        img.emit(&mut cursor, 0xAA, &sl).unwrap();
        assert_eq!(cursor, 0x0101);
        let mut again = 0x0100;
        let err = img.emit(&mut again, 0xBB, &sl).unwrap_err();
        assert!(err.to_string().contains("overlap at address 0x0100"));
    }

    #[test]
    fn stub_cells_are_reserved() {
        let mut img = Image::new();
        let sl = SrcLine::new("HALT", "test.s8", 1);
        let mut cursor = 0x0000;
        assert!(img.emit(&mut cursor, 0x00, &sl).is_err());
        img.write_stub(0x1234);
        assert_eq!(&img.bytes()[..3], &[0x07, 0x12, 0x34]);
    }

    #[test]
    fn emission_past_end_fails() {
        let mut img = Image::new();
        let sl = SrcLine::new(".byte 1", "test.s8", 1);
        let mut cursor = 0xFFFE;
        img.emit(&mut cursor, 0x01, &sl).unwrap();
        assert!(img.emit(&mut cursor, 0x02, &sl).is_err());
    }

    #[test]
    fn words_are_big_endian() {
        let mut img = Image::new();
        let sl = SrcLine::new(".word 0x1A2B", "test.s8", 1);
        let mut cursor = 0x0010;
        img.emit_word(&mut cursor, 0x1A2B, &sl).unwrap();
        assert_eq!(img.bytes()[0x0010], 0x1A);
        assert_eq!(img.bytes()[0x0011], 0x2B);
    }
}

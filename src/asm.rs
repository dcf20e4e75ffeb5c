//! Two-pass assembler.
//!
//! Pass 1 walks the flattened line stream, records labels and assigns every
//! item an address and size. Pass 2 encodes the items into the memory image
//! and produces one debug record per item. The implicit `JMP <entry>` stub
//! at `0x0000..0x0003` is written last.

use std::str::FromStr;

use miette::Result;

use crate::debug::{DebugRecord, RecordKind};
use crate::error;
use crate::image::Image;
use crate::isa::{Mnemonic, OperandKind, Reg, ENTRY_STUB_SIZE, MEM_SIZE};
use crate::line::SrcLine;
use crate::parse::{
    decode_string, is_ident, parse_int, peel_labels, split_operands, split_word, strip_comment,
};
use crate::symbol::SymbolTable;

/// Everything the assembler produces for one compilation.
#[derive(Debug)]
pub struct Assembly {
    pub image: Image,
    pub records: Vec<DebugRecord>,
    pub entry: u16,
}

/// One emission unit found by pass 1.
#[derive(Debug)]
struct Item {
    body: ItemBody,
    ops: Vec<String>,
    addr: u32,
    size: u32,
    src: SrcLine,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum ItemBody {
    /// Either `.org` form; layout-only, emits nothing.
    Org,
    Byte,
    Word,
    Str,
    Instr(Mnemonic),
}

/// Assemble a preprocessed line stream into a full memory image, debug
/// records and the resolved entry address.
pub fn assemble(lines: &[SrcLine]) -> Result<Assembly> {
    let (items, symbols, entry) = layout(lines)?;
    emit(&items, &symbols, entry)
}

/// Pass 1: labels, addresses, sizes, entry address.
fn layout(lines: &[SrcLine]) -> Result<(Vec<Item>, SymbolTable, u16)> {
    let mut symbols = SymbolTable::new();
    let mut items = Vec::new();
    let mut lc: u32 = ENTRY_STUB_SIZE as u32;
    let mut any_org = false;
    let mut entry_mark: Option<u32> = None;
    let mut first_org: Option<u32> = None;

    for sl in lines {
        let code = strip_comment(&sl.text).trim();
        if code.is_empty() {
            continue;
        }

        let (labels, stmt) = peel_labels(code);
        for lab in labels {
            if !symbols.insert(lab, lc as u16) {
                return Err(error::duplicate_label(lab, sl));
            }
        }
        if stmt.is_empty() {
            continue;
        }

        if stmt.starts_with('.') {
            let (dname, rest) = split_word(stmt);
            match dname {
                ".org" => {
                    any_org = true;
                    let ops = split_operands(rest);
                    if ops.is_empty() {
                        // Bare form: entry marker only, LC untouched.
                        if entry_mark.is_some() {
                            return Err(error::at_line(
                                "layout::entry_mark",
                                ".org (no operand) may appear only once",
                                sl,
                            ));
                        }
                        entry_mark = Some(lc);
                        items.push(Item {
                            body: ItemBody::Org,
                            ops,
                            addr: lc,
                            size: 0,
                            src: sl.clone(),
                        });
                    } else {
                        let addr = org_operand(&ops, sl)?;
                        if first_org.is_none() {
                            first_org = Some(addr);
                        }
                        lc = addr;
                        items.push(Item {
                            body: ItemBody::Org,
                            ops,
                            addr: lc,
                            size: 0,
                            src: sl.clone(),
                        });
                    }
                }
                ".byte" => {
                    let ops = split_operands(rest);
                    if ops.is_empty() {
                        return Err(error::at_line(
                            "parse::byte",
                            ".byte requires at least 1 operand",
                            sl,
                        ));
                    }
                    let size = ops.len() as u32;
                    items.push(Item {
                        body: ItemBody::Byte,
                        ops,
                        addr: lc,
                        size,
                        src: sl.clone(),
                    });
                    lc += size;
                }
                ".word" => {
                    let ops = split_operands(rest);
                    if ops.is_empty() {
                        return Err(error::at_line(
                            "parse::word",
                            ".word requires at least 1 operand",
                            sl,
                        ));
                    }
                    let size = ops.len() as u32 * 2;
                    items.push(Item {
                        body: ItemBody::Word,
                        ops,
                        addr: lc,
                        size,
                        src: sl.clone(),
                    });
                    lc += size;
                }
                ".string" => {
                    if rest.is_empty() {
                        return Err(error::at_line(
                            "parse::string",
                            ".string expects a quoted string operand",
                            sl,
                        ));
                    }
                    let bytes = decode_string(rest)
                        .map_err(|msg| error::at_line("parse::string", msg, sl))?;
                    let size = bytes.len() as u32 + 1;
                    items.push(Item {
                        body: ItemBody::Str,
                        ops: vec![rest.to_string()],
                        addr: lc,
                        size,
                        src: sl.clone(),
                    });
                    lc += size;
                }
                ".include" => {
                    // The preprocessor consumes these; one surviving here
                    // means assemble() was fed unpreprocessed input.
                    return Err(error::at_line(
                        "parse::include",
                        "unexpected .include after preprocessing",
                        sl,
                    ));
                }
                other => return Err(error::unknown_directive(other, sl)),
            }
        } else {
            let (name, rest) = split_word(stmt);
            let mnem =
                Mnemonic::from_str(name).map_err(|_| error::unknown_instruction(name, sl))?;
            let ops = split_operands(rest);
            if ops.len() != mnem.operands().len() {
                return Err(error::operand_count(mnem, mnem.operands().len(), ops.len(), sl));
            }
            let size = mnem.len();
            items.push(Item {
                body: ItemBody::Instr(mnem),
                ops,
                addr: lc,
                size,
                src: sl.clone(),
            });
            lc += size;
        }

        if lc > MEM_SIZE as u32 {
            return Err(error::image_overflow(sl));
        }
    }

    if !any_org {
        let site = lines
            .first()
            .cloned()
            .unwrap_or_else(|| SrcLine::synthetic("<empty>"));
        return Err(error::missing_org(&site));
    }

    // Bare `.org` wins; otherwise the first `.org <addr>` is the entry.
    let entry = match entry_mark.or(first_org) {
        Some(e) => e as u16,
        None => {
            let site = lines
                .first()
                .cloned()
                .unwrap_or_else(|| SrcLine::synthetic("<empty>"));
            return Err(error::missing_org(&site));
        }
    };

    Ok((items, symbols, entry))
}

fn org_operand(ops: &[String], sl: &SrcLine) -> Result<u32> {
    if ops.len() != 1 {
        return Err(error::at_line(
            "layout::org",
            ".org expects 0 or 1 operand",
            sl,
        ));
    }
    let op = &ops[0];
    if op.starts_with('#') {
        return Err(error::at_line(
            "layout::org",
            ".org operand must not use '#'",
            sl,
        ));
    }
    if is_ident(op) {
        return Err(error::at_line(
            "layout::org",
            ".org operand must be a numeric literal (labels not allowed)",
            sl,
        ));
    }
    let addr = parse_int(op)
        .ok_or_else(|| error::at_line("layout::org", format!("invalid .org address literal: {op}"), sl))?;
    if addr > 0xFFFF {
        return Err(error::at_line("layout::org", ".org out of 16-bit range", sl));
    }
    if addr < ENTRY_STUB_SIZE as u32 {
        return Err(error::at_line(
            "layout::org",
            ".org must be >= 0x0003 (the entry stub owns 0x0000..0x0002)",
            sl,
        ));
    }
    Ok(addr)
}

/// Pass 2: encode items into the image, producing one debug record each.
fn emit(items: &[Item], symbols: &SymbolTable, entry: u16) -> Result<Assembly> {
    let mut image = Image::new();
    let mut records = Vec::with_capacity(items.len() + 1);

    for item in items {
        let span = match item.body {
            ItemBody::Org => continue,
            ItemBody::Byte => emit_bytes(item)?,
            ItemBody::Word => emit_words(item, symbols)?,
            ItemBody::Str => emit_string(item)?,
            ItemBody::Instr(mnem) => encode_instr(mnem, item, symbols)?,
        };
        debug_assert_eq!(span.len() as u32, item.size, "pass 1 sizing must match emission");

        let mut cursor = item.addr;
        for b in &span {
            image.emit(&mut cursor, *b, &item.src)?;
        }

        let kind = match item.body {
            ItemBody::Instr(_) => RecordKind::Code,
            _ => RecordKind::Data,
        };
        records.push(DebugRecord::from_line(kind, item.addr as u16, span, &item.src));
    }

    image.write_stub(entry);
    records.push(DebugRecord::entry_stub(entry));

    Ok(Assembly {
        image,
        records,
        entry,
    })
}

fn emit_bytes(item: &Item) -> Result<Vec<u8>> {
    let mut span = Vec::with_capacity(item.ops.len());
    for op in &item.ops {
        if op.starts_with('#') {
            return Err(error::at_line(
                "emit::byte",
                ".byte elements must not use '#'",
                &item.src,
            ));
        }
        if is_ident(op) {
            return Err(error::at_line(
                "emit::byte",
                ".byte does not allow labels",
                &item.src,
            ));
        }
        let v = parse_int(op).ok_or_else(|| {
            error::at_line("emit::byte", format!("invalid .byte literal: {op}"), &item.src)
        })?;
        if v > 0xFF {
            return Err(error::at_line(
                "emit::byte",
                format!(".byte value out of 8-bit range: {op}"),
                &item.src,
            ));
        }
        span.push(v as u8);
    }
    Ok(span)
}

fn emit_words(item: &Item, symbols: &SymbolTable) -> Result<Vec<u8>> {
    let mut span = Vec::with_capacity(item.ops.len() * 2);
    for op in &item.ops {
        if op.starts_with('#') {
            return Err(error::at_line(
                "emit::word",
                ".word elements must not use '#'",
                &item.src,
            ));
        }
        let v = if is_ident(op) {
            symbols
                .get(op)
                .ok_or_else(|| error::undefined_label(op, &item.src))? as u32
        } else {
            let v = parse_int(op).ok_or_else(|| {
                error::at_line("emit::word", format!("invalid .word literal: {op}"), &item.src)
            })?;
            if v > 0xFFFF {
                return Err(error::at_line(
                    "emit::word",
                    format!(".word value out of 16-bit range: {op}"),
                    &item.src,
                ));
            }
            v
        };
        span.push((v >> 8) as u8);
        span.push((v & 0xFF) as u8);
    }
    Ok(span)
}

fn emit_string(item: &Item) -> Result<Vec<u8>> {
    let mut span = decode_string(&item.ops[0])
        .map_err(|msg| error::at_line("parse::string", msg, &item.src))?;
    span.push(0x00);
    Ok(span)
}

/// Resolved instruction operand.
enum Operand {
    Addr(u16),
    Imm(u8),
    Reg(Reg),
}

impl Operand {
    fn addr(&self) -> u16 {
        match self {
            Operand::Addr(a) => *a,
            _ => unreachable!("operand kind checked during resolution"),
        }
    }

    fn imm(&self) -> u8 {
        match self {
            Operand::Imm(v) => *v,
            _ => unreachable!("operand kind checked during resolution"),
        }
    }

    fn reg(&self) -> u8 {
        match self {
            Operand::Reg(r) => r.code(),
            _ => unreachable!("operand kind checked during resolution"),
        }
    }
}

fn resolve_operand(
    kind: OperandKind,
    op: &str,
    symbols: &SymbolTable,
    sl: &SrcLine,
) -> Result<Operand> {
    match kind {
        OperandKind::Addr16 => {
            if op.starts_with('#') {
                return Err(error::at_line(
                    "emit::operand",
                    "address operand must not start with '#'",
                    sl,
                ));
            }
            if is_ident(op) {
                let addr = symbols.get(op).ok_or_else(|| error::undefined_label(op, sl))?;
                return Ok(Operand::Addr(addr));
            }
            let v = parse_int(op).ok_or_else(|| {
                error::at_line("emit::operand", format!("invalid address literal: {op}"), sl)
            })?;
            if v > 0xFFFF {
                return Err(error::at_line(
                    "emit::operand",
                    format!("address literal out of 16-bit range: {op}"),
                    sl,
                ));
            }
            Ok(Operand::Addr(v as u16))
        }
        OperandKind::Imm8 => {
            let lit = op.strip_prefix('#').ok_or_else(|| {
                error::at_line(
                    "emit::operand",
                    "immediate operand must start with '#'",
                    sl,
                )
            })?;
            let v = parse_int(lit).ok_or_else(|| {
                error::at_line("emit::operand", format!("invalid immediate literal: {op}"), sl)
            })?;
            if v > 0xFF {
                return Err(error::at_line(
                    "emit::operand",
                    format!("immediate out of 8-bit range: {op}"),
                    sl,
                ));
            }
            Ok(Operand::Imm(v as u8))
        }
        OperandKind::Gpr | OperandKind::AnyReg => {
            let reg = Reg::from_str(op).map_err(|_| {
                error::at_line("emit::operand", format!("invalid register '{op}'"), sl)
            })?;
            if kind == OperandKind::Gpr && !reg.is_gpr() {
                return Err(error::at_line(
                    "emit::operand",
                    format!("register '{op}' not allowed here (must be R0..R7)"),
                    sl,
                ));
            }
            Ok(Operand::Reg(reg))
        }
    }
}

/// Encode one instruction into its wire bytes: opcode first, then operands
/// in the fixed per-mnemonic layout (16-bit fields big-endian).
fn encode_instr(mnem: Mnemonic, item: &Item, symbols: &SymbolTable) -> Result<Vec<u8>> {
    let kinds = mnem.operands();
    let mut vals = Vec::with_capacity(kinds.len());
    for (kind, op) in kinds.iter().zip(&item.ops) {
        vals.push(resolve_operand(*kind, op, symbols, &item.src)?);
    }

    let mut span = Vec::with_capacity(mnem.len() as usize);
    span.push(mnem.opcode());
    let push_addr = |span: &mut Vec<u8>, a: u16| {
        span.push((a >> 8) as u8);
        span.push((a & 0xFF) as u8);
    };

    match mnem {
        Mnemonic::Halt | Mnemonic::Ret | Mnemonic::Nop => {}
        Mnemonic::Load => {
            push_addr(&mut span, vals[0].addr());
            span.push(vals[1].reg());
        }
        Mnemonic::Store => {
            span.push(vals[0].reg());
            push_addr(&mut span, vals[1].addr());
        }
        Mnemonic::Storer | Mnemonic::Loadr | Mnemonic::Mulr | Mnemonic::Divr => {
            span.push(vals[0].reg());
            span.push(vals[1].reg());
            span.push(vals[2].reg());
        }
        Mnemonic::Set | Mnemonic::Add | Mnemonic::Sub | Mnemonic::Shl | Mnemonic::Shr => {
            span.push(vals[0].imm());
            span.push(vals[1].reg());
        }
        Mnemonic::Cmp => {
            span.push(vals[0].reg());
            span.push(vals[1].imm());
        }
        Mnemonic::Cmpr | Mnemonic::Addr | Mnemonic::Subr => {
            span.push(vals[0].reg());
            span.push(vals[1].reg());
        }
        Mnemonic::Inc | Mnemonic::Dec | Mnemonic::Push | Mnemonic::Pop => {
            span.push(vals[0].reg());
        }
        Mnemonic::Jmp | Mnemonic::Call | Mnemonic::Jc | Mnemonic::Jnc => {
            push_addr(&mut span, vals[0].addr());
        }
        Mnemonic::Jz | Mnemonic::Jnz => {
            span.push(vals[0].reg());
            push_addr(&mut span, vals[1].addr());
        }
        Mnemonic::Mul | Mnemonic::Div => {
            span.push(vals[0].imm());
            span.push(vals[1].reg());
            span.push(vals[2].reg());
        }
    }

    debug_assert_eq!(span.len() as u32, mnem.len());
    Ok(span)
}

//! Portable code-unit images and disassembly.
//!
//! Image layout (little-endian):
//!
//! | offset | size | field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 2    | runtime magic                           |
//! | 2      | 2    | `\r\n`                                  |
//! | 4      | 4    | flags (always 0: timestamp-based image) |
//! | 8      | 4    | mtime of the code unit                  |
//! | 12     | 4    | payload length                          |
//! | 16     | ..   | tagged code-unit payload                |

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::runtime::{CodeUnit, Constant, OperandKind, Value, COMPARE_OPS};
use crate::{Error, Result};

/// Version marker of the bytecode format this runtime produces.
pub const RUNTIME_MAGIC: u16 = 3413;
pub const HEADER_LEN: usize = 16;

/// Nested code constants deeper than this are rejected on decode.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub magic: u16,
    pub flags: u32,
    pub mtime: u32,
    pub payload_len: u32,
}

impl ImageHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::Image(format!(
                "image is {} bytes, header needs {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if &bytes[2..4] != b"\r\n" {
            return Err(Error::Image("bad magic terminator".to_string()));
        }
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Ok(Self {
            magic: u16::from_le_bytes([bytes[0], bytes[1]]),
            flags: word(4),
            mtime: word(8),
            payload_len: word(12),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&self.mtime.to_le_bytes());
        out.extend_from_slice(&self.payload_len.to_le_bytes());
    }
}

// Payload tags.
const TAG_NONE: u8 = b'N';
const TAG_TRUE: u8 = b'T';
const TAG_FALSE: u8 = b'F';
const TAG_INT: u8 = b'i';
const TAG_FLOAT: u8 = b'g';
const TAG_STR: u8 = b's';
const TAG_BYTES: u8 = b'b';
const TAG_TUPLE: u8 = b'(';
const TAG_CODE: u8 = b'c';

/// Header plus serialized payload for `unit`.
pub fn encode(unit: &CodeUnit) -> Vec<u8> {
    let mut payload = Vec::new();
    put_code(&mut payload, unit);

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    ImageHeader {
        magic: RUNTIME_MAGIC,
        flags: 0,
        mtime: unit.mtime,
        payload_len: payload.len() as u32,
    }
    .write(&mut out);
    out.extend_from_slice(&payload);
    out
}

/// The code unit behind a callable value.
pub fn code_of(value: &Value) -> Result<Arc<CodeUnit>> {
    match value {
        Value::Function(f) => Ok(Arc::clone(&f.code)),
        Value::Method(m) => Ok(Arc::clone(&m.function.code)),
        other => Err(Error::InvalidTarget(other.repr())),
    }
}

/// Image of a callable value; anything else is an invalid target.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let unit = code_of(value)?;
    Ok(encode(&unit))
}

fn put_u32(out: &mut Vec<u8>, n: u32) {
    out.extend_from_slice(&n.to_le_bytes());
}

fn put_blob(out: &mut Vec<u8>, bytes: &[u8]) {
    put_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn put_names(out: &mut Vec<u8>, names: &[String]) {
    put_u32(out, names.len() as u32);
    for n in names {
        put_blob(out, n.as_bytes());
    }
}

fn put_code(out: &mut Vec<u8>, unit: &CodeUnit) {
    out.push(TAG_CODE);
    put_u32(out, unit.argcount);
    put_u32(out, unit.first_line);
    put_u32(out, unit.mtime);
    put_blob(out, unit.name.as_bytes());
    put_blob(out, unit.qualname.as_bytes());
    put_blob(out, unit.filename.as_bytes());
    put_u32(out, unit.constants.len() as u32);
    for c in &unit.constants {
        put_constant(out, c);
    }
    put_names(out, &unit.names);
    put_names(out, &unit.varnames);
    put_blob(out, &unit.bytecode);
    put_u32(out, unit.line_table.len() as u32);
    for (offset, line) in &unit.line_table {
        put_u32(out, *offset);
        put_u32(out, *line);
    }
}

fn put_constant(out: &mut Vec<u8>, c: &Constant) {
    match c {
        Constant::None => out.push(TAG_NONE),
        Constant::Bool(true) => out.push(TAG_TRUE),
        Constant::Bool(false) => out.push(TAG_FALSE),
        Constant::Int(n) => {
            out.push(TAG_INT);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Constant::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Constant::Str(s) => {
            out.push(TAG_STR);
            put_blob(out, s.as_bytes());
        }
        Constant::Bytes(b) => {
            out.push(TAG_BYTES);
            put_blob(out, b);
        }
        Constant::Tuple(items) => {
            out.push(TAG_TUPLE);
            put_u32(out, items.len() as u32);
            for item in items {
                put_constant(out, item);
            }
        }
        Constant::Code(code) => put_code(out, code),
    }
}

/// Parse a full image back into its header and code unit.
pub fn decode(bytes: &[u8]) -> Result<(ImageHeader, CodeUnit)> {
    let header = ImageHeader::parse(bytes)?;
    if header.magic != RUNTIME_MAGIC {
        return Err(Error::Image(format!(
            "unsupported magic {} (expected {})",
            header.magic, RUNTIME_MAGIC
        )));
    }
    let payload = &bytes[HEADER_LEN..];
    if payload.len() != header.payload_len as usize {
        return Err(Error::Image(format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            header.payload_len
        )));
    }
    let mut reader = Reader { bytes: payload, pos: 0 };
    let tag = reader.byte()?;
    if tag != TAG_CODE {
        return Err(Error::Image(format!("payload starts with tag {:#04x}", tag)));
    }
    let unit = reader.code(0)?;
    if reader.pos != payload.len() {
        return Err(Error::Image("trailing bytes after code unit".to_string()));
    }
    Ok((header, unit))
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take(&mut self, n: usize) -> Result<&[u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| Error::Image(format!("truncated payload at byte {}", self.pos)))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn eight(&mut self) -> Result<[u8; 8]> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(buf)
    }

    fn blob(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn string(&mut self) -> Result<String> {
        String::from_utf8(self.blob()?).map_err(|e| Error::Image(e.to_string()))
    }

    fn names(&mut self) -> Result<Vec<String>> {
        let n = self.u32()?;
        (0..n).map(|_| self.string()).collect()
    }

    fn code(&mut self, depth: usize) -> Result<CodeUnit> {
        if depth > MAX_NESTING {
            return Err(Error::Image("code constants nested too deeply".to_string()));
        }
        let argcount = self.u32()?;
        let first_line = self.u32()?;
        let mtime = self.u32()?;
        let name = self.string()?;
        let qualname = self.string()?;
        let filename = self.string()?;
        let n_consts = self.u32()?;
        let constants = (0..n_consts)
            .map(|_| self.constant(depth))
            .collect::<Result<Vec<_>>>()?;
        let names = self.names()?;
        let varnames = self.names()?;
        let bytecode = self.blob()?;
        let n_lines = self.u32()?;
        let line_table = (0..n_lines)
            .map(|_| -> Result<(u32, u32)> { Ok((self.u32()?, self.u32()?)) })
            .collect::<Result<Vec<_>>>()?;
        Ok(CodeUnit {
            name,
            qualname,
            filename,
            first_line,
            argcount,
            constants,
            names,
            varnames,
            bytecode,
            line_table,
            mtime,
        })
    }

    fn constant(&mut self, depth: usize) -> Result<Constant> {
        Ok(match self.byte()? {
            TAG_NONE => Constant::None,
            TAG_TRUE => Constant::Bool(true),
            TAG_FALSE => Constant::Bool(false),
            TAG_INT => Constant::Int(i64::from_le_bytes(self.eight()?)),
            TAG_FLOAT => Constant::Float(f64::from_le_bytes(self.eight()?)),
            TAG_STR => Constant::Str(self.string()?),
            TAG_BYTES => Constant::Bytes(self.blob()?),
            TAG_TUPLE => {
                if depth > MAX_NESTING {
                    return Err(Error::Image("constants nested too deeply".to_string()));
                }
                let n = self.u32()?;
                Constant::Tuple(
                    (0..n)
                        .map(|_| self.constant(depth + 1))
                        .collect::<Result<Vec<_>>>()?,
                )
            }
            TAG_CODE => Constant::Code(Arc::new(self.code(depth + 1)?)),
            other => {
                return Err(Error::Image(format!(
                    "unknown constant tag {:#04x} at byte {}",
                    other,
                    self.pos - 1
                )))
            }
        })
    }
}

/// One line per instruction, then every nested code constant.
pub fn disassemble(unit: &CodeUnit) -> String {
    let mut out = String::new();
    disassemble_into(unit, &mut out);
    out
}

fn disassemble_into(unit: &CodeUnit, out: &mut String) {
    let instructions = unit.instructions();
    let targets: BTreeSet<u32> = instructions
        .iter()
        .filter_map(|ins| match ins.opcode.map(|op| op.operand_kind()) {
            Some(OperandKind::JumpRelative) => relative_target(ins.offset, ins.arg),
            Some(OperandKind::JumpAbsolute) => Some(ins.arg),
            _ => None,
        })
        .collect();

    let mut last_line = None;
    for ins in &instructions {
        let line = unit.line_for_offset(ins.offset);
        let line_field = if last_line != Some(line) {
            if last_line.is_some() {
                out.push('\n');
            }
            last_line = Some(line);
            format!("{:>3}", line)
        } else {
            "   ".to_string()
        };
        let marker = if targets.contains(&ins.offset) { ">>" } else { "" };

        let mut row = format!("{} {:>3} {:>2} {:>4} ", line_field, "", marker, ins.offset);
        match ins.opcode {
            Some(op) => {
                let _ = write!(row, "{:<20}", op.mnemonic());
                if op.has_argument() {
                    let _ = write!(row, " {:>5}", ins.arg);
                    let detail = operand_repr(unit, op.operand_kind(), ins.offset, ins.arg);
                    if !detail.is_empty() {
                        let _ = write!(row, " ({})", detail);
                    }
                }
            }
            None => {
                let _ = write!(row, "<{}>", ins.byte);
            }
        }
        out.push_str(row.trim_end());
        out.push('\n');
    }

    for constant in &unit.constants {
        if let Constant::Code(nested) = constant {
            let _ = write!(out, "\nDisassembly of {}:\n", nested.describe());
            disassemble_into(nested, out);
        }
    }
}

fn operand_repr(unit: &CodeUnit, kind: OperandKind, offset: u32, arg: u32) -> String {
    let idx = arg as usize;
    let missing = || format!("<invalid {}>", arg);
    match kind {
        OperandKind::Const => unit.constants.get(idx).map(Constant::repr).unwrap_or_else(missing),
        OperandKind::Name => unit.names.get(idx).cloned().unwrap_or_else(missing),
        OperandKind::Local => unit.varnames.get(idx).cloned().unwrap_or_else(missing),
        OperandKind::Compare => COMPARE_OPS
            .get(idx)
            .map(|s| s.to_string())
            .unwrap_or_else(missing),
        OperandKind::JumpRelative => relative_target(offset, arg)
            .map(|t| format!("to {}", t))
            .unwrap_or_else(missing),
        OperandKind::JumpAbsolute => format!("to {}", arg),
        OperandKind::Count | OperandKind::None => String::new(),
    }
}

/// Relative jumps count from the next instruction.
fn relative_target(offset: u32, arg: u32) -> Option<u32> {
    offset.checked_add(2)?.checked_add(arg)
}

/// Make `raw` safe to use as a file name stem.
pub fn file_stem(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".repeat(cleaned.len().max(1))
    } else {
        cleaned
    }
}

/// Write `unit`'s image to `<dir>/<stem>.<ext>`, overwriting silently.
pub fn write_image(dir: &Path, stem: &str, ext: &str, unit: &CodeUnit) -> Result<PathBuf> {
    save_image(dir, stem, ext, &encode(unit))
}

/// Write an already encoded image to `<dir>/<stem>.<ext>`.
pub fn save_image(dir: &Path, stem: &str, ext: &str, image: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let file_name = format!("{}.{}", file_stem(stem), ext);
    let path = if dir == Path::new(".") {
        PathBuf::from(&file_name)
    } else {
        dir.join(&file_name)
    };
    std::fs::write(&path, image)?;
    tracing::debug!("Wrote {} ({} bytes)", path.display(), image.len());
    Ok(path)
}

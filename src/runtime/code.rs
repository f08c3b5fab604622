use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Opcodes at or above this value carry an argument byte that matters.
pub const HAVE_ARGUMENT: u8 = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    PopTop,
    Nop,
    BinaryMultiply,
    BinaryAdd,
    BinarySubtract,
    ReturnValue,
    StoreName,
    StoreAttr,
    StoreGlobal,
    LoadConst,
    LoadName,
    BuildTuple,
    BuildList,
    BuildMap,
    LoadAttr,
    CompareOp,
    ImportName,
    JumpForward,
    JumpAbsolute,
    PopJumpIfFalse,
    LoadGlobal,
    LoadFast,
    StoreFast,
    CallFunction,
    MakeFunction,
    ExtendedArg,
}

/// How an instruction's argument is interpreted when disassembling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    None,
    Const,
    Name,
    Local,
    Compare,
    JumpRelative,
    JumpAbsolute,
    Count,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        match self {
            Opcode::PopTop => 1,
            Opcode::Nop => 9,
            Opcode::BinaryMultiply => 20,
            Opcode::BinaryAdd => 23,
            Opcode::BinarySubtract => 24,
            Opcode::ReturnValue => 83,
            Opcode::StoreName => 90,
            Opcode::StoreAttr => 95,
            Opcode::StoreGlobal => 97,
            Opcode::LoadConst => 100,
            Opcode::LoadName => 101,
            Opcode::BuildTuple => 102,
            Opcode::BuildList => 103,
            Opcode::BuildMap => 105,
            Opcode::LoadAttr => 106,
            Opcode::CompareOp => 107,
            Opcode::ImportName => 108,
            Opcode::JumpForward => 110,
            Opcode::JumpAbsolute => 113,
            Opcode::PopJumpIfFalse => 114,
            Opcode::LoadGlobal => 116,
            Opcode::LoadFast => 124,
            Opcode::StoreFast => 125,
            Opcode::CallFunction => 131,
            Opcode::MakeFunction => 132,
            Opcode::ExtendedArg => 144,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Opcode::PopTop,
            9 => Opcode::Nop,
            20 => Opcode::BinaryMultiply,
            23 => Opcode::BinaryAdd,
            24 => Opcode::BinarySubtract,
            83 => Opcode::ReturnValue,
            90 => Opcode::StoreName,
            95 => Opcode::StoreAttr,
            97 => Opcode::StoreGlobal,
            100 => Opcode::LoadConst,
            101 => Opcode::LoadName,
            102 => Opcode::BuildTuple,
            103 => Opcode::BuildList,
            105 => Opcode::BuildMap,
            106 => Opcode::LoadAttr,
            107 => Opcode::CompareOp,
            108 => Opcode::ImportName,
            110 => Opcode::JumpForward,
            113 => Opcode::JumpAbsolute,
            114 => Opcode::PopJumpIfFalse,
            116 => Opcode::LoadGlobal,
            124 => Opcode::LoadFast,
            125 => Opcode::StoreFast,
            131 => Opcode::CallFunction,
            132 => Opcode::MakeFunction,
            144 => Opcode::ExtendedArg,
            _ => return None,
        })
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::PopTop => "POP_TOP",
            Opcode::Nop => "NOP",
            Opcode::BinaryMultiply => "BINARY_MULTIPLY",
            Opcode::BinaryAdd => "BINARY_ADD",
            Opcode::BinarySubtract => "BINARY_SUBTRACT",
            Opcode::ReturnValue => "RETURN_VALUE",
            Opcode::StoreName => "STORE_NAME",
            Opcode::StoreAttr => "STORE_ATTR",
            Opcode::StoreGlobal => "STORE_GLOBAL",
            Opcode::LoadConst => "LOAD_CONST",
            Opcode::LoadName => "LOAD_NAME",
            Opcode::BuildTuple => "BUILD_TUPLE",
            Opcode::BuildList => "BUILD_LIST",
            Opcode::BuildMap => "BUILD_MAP",
            Opcode::LoadAttr => "LOAD_ATTR",
            Opcode::CompareOp => "COMPARE_OP",
            Opcode::ImportName => "IMPORT_NAME",
            Opcode::JumpForward => "JUMP_FORWARD",
            Opcode::JumpAbsolute => "JUMP_ABSOLUTE",
            Opcode::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Opcode::LoadGlobal => "LOAD_GLOBAL",
            Opcode::LoadFast => "LOAD_FAST",
            Opcode::StoreFast => "STORE_FAST",
            Opcode::CallFunction => "CALL_FUNCTION",
            Opcode::MakeFunction => "MAKE_FUNCTION",
            Opcode::ExtendedArg => "EXTENDED_ARG",
        }
    }

    pub fn operand_kind(self) -> OperandKind {
        match self {
            Opcode::LoadConst => OperandKind::Const,
            Opcode::StoreName
            | Opcode::StoreAttr
            | Opcode::StoreGlobal
            | Opcode::LoadName
            | Opcode::LoadAttr
            | Opcode::ImportName
            | Opcode::LoadGlobal => OperandKind::Name,
            Opcode::LoadFast | Opcode::StoreFast => OperandKind::Local,
            Opcode::CompareOp => OperandKind::Compare,
            Opcode::JumpForward => OperandKind::JumpRelative,
            Opcode::JumpAbsolute | Opcode::PopJumpIfFalse => OperandKind::JumpAbsolute,
            Opcode::BuildTuple
            | Opcode::BuildList
            | Opcode::BuildMap
            | Opcode::CallFunction
            | Opcode::MakeFunction
            | Opcode::ExtendedArg => OperandKind::Count,
            _ => OperandKind::None,
        }
    }

    pub fn has_argument(self) -> bool {
        self.byte() >= HAVE_ARGUMENT
    }
}

pub const COMPARE_OPS: [&str; 6] = ["<", "<=", "==", "!=", ">", ">="];

/// Entry of a code unit's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Constant>),
    Code(Arc<CodeUnit>),
}

impl Constant {
    pub fn repr(&self) -> String {
        use super::repr::{repr_bytes, repr_float, repr_str};
        match self {
            Constant::None => "None".to_string(),
            Constant::Bool(true) => "True".to_string(),
            Constant::Bool(false) => "False".to_string(),
            Constant::Int(n) => n.to_string(),
            Constant::Float(f) => repr_float(*f),
            Constant::Str(s) => repr_str(s),
            Constant::Bytes(b) => repr_bytes(b),
            Constant::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Constant::repr).collect();
                if items.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
            Constant::Code(code) => code.describe(),
        }
    }
}

/// A compiled, executable unit of code.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeUnit {
    pub name: String,
    pub qualname: String,
    pub filename: String,
    pub first_line: u32,
    pub argcount: u32,
    pub constants: Vec<Constant>,
    pub names: Vec<String>,
    pub varnames: Vec<String>,
    /// Wordcode: (opcode, arg) byte pairs.
    pub bytecode: Vec<u8>,
    /// (offset, line) pairs, ascending by offset.
    pub line_table: Vec<(u32, u32)>,
    pub mtime: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub offset: u32,
    pub byte: u8,
    pub opcode: Option<Opcode>,
    pub arg: u32,
}

impl CodeUnit {
    pub fn builder(name: &str, filename: &str, first_line: u32) -> CodeBuilder {
        CodeBuilder::new(name, filename, first_line)
    }

    /// Decoded instructions; EXTENDED_ARG prefixes are folded into the
    /// following instruction's argument.
    pub fn instructions(&self) -> Vec<Instruction> {
        let mut out = Vec::with_capacity(self.bytecode.len() / 2);
        let mut extended: u32 = 0;
        for (i, pair) in self.bytecode.chunks(2).enumerate() {
            let byte = pair[0];
            let raw_arg = pair.get(1).copied().unwrap_or(0) as u32;
            let opcode = Opcode::from_byte(byte);
            let arg = (extended << 8) | raw_arg;
            if opcode == Some(Opcode::ExtendedArg) {
                extended = arg;
                continue;
            }
            extended = 0;
            out.push(Instruction {
                offset: (i * 2) as u32,
                byte,
                opcode,
                arg,
            });
        }
        out
    }

    /// Source line active at `offset`.
    pub fn line_for_offset(&self, offset: u32) -> u32 {
        self.line_table
            .iter()
            .take_while(|(start, _)| *start <= offset)
            .last()
            .map(|(_, line)| *line)
            .unwrap_or(self.first_line)
    }

    pub fn describe(&self) -> String {
        format!(
            "<code object {}, file \"{}\", line {}>",
            self.name, self.filename, self.first_line
        )
    }
}

static LAST_MTIME: AtomicU32 = AtomicU32::new(0);

/// Wall-clock seconds, bumped so every code unit gets a strictly larger stamp.
fn next_mtime() -> u32 {
    let now = chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32;
    let mut last = LAST_MTIME.load(Ordering::Relaxed);
    loop {
        let next = now.max(last.saturating_add(1));
        match LAST_MTIME.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

pub struct CodeBuilder {
    unit: CodeUnit,
    current_line: Option<u32>,
}

impl CodeBuilder {
    pub fn new(name: &str, filename: &str, first_line: u32) -> Self {
        Self {
            unit: CodeUnit {
                name: name.to_string(),
                qualname: name.to_string(),
                filename: filename.to_string(),
                first_line,
                argcount: 0,
                constants: Vec::new(),
                names: Vec::new(),
                varnames: Vec::new(),
                bytecode: Vec::new(),
                line_table: Vec::new(),
                mtime: 0,
            },
            current_line: None,
        }
    }

    pub fn qualname(mut self, qualname: &str) -> Self {
        self.unit.qualname = qualname.to_string();
        self
    }

    /// Declare positional parameters; they become the first local slots.
    pub fn params(mut self, params: &[&str]) -> Self {
        self.unit.argcount = params.len() as u32;
        for p in params {
            intern(&mut self.unit.varnames, p);
        }
        self
    }

    /// Instructions emitted after this call belong to `line`.
    pub fn line(mut self, line: u32) -> Self {
        if self.current_line != Some(line) {
            self.unit
                .line_table
                .push((self.unit.bytecode.len() as u32, line));
            self.current_line = Some(line);
        }
        self
    }

    pub fn op(self, opcode: Opcode) -> Self {
        self.op_arg(opcode, 0)
    }

    pub fn op_arg(mut self, opcode: Opcode, arg: u32) -> Self {
        if self.current_line.is_none() {
            let first = self.unit.first_line;
            self = self.line(first);
        }
        let bytes = arg.to_be_bytes();
        let significant = bytes.iter().position(|b| *b != 0).unwrap_or(3);
        for b in &bytes[significant..3] {
            self.unit.bytecode.push(Opcode::ExtendedArg.byte());
            self.unit.bytecode.push(*b);
        }
        self.unit.bytecode.push(opcode.byte());
        self.unit.bytecode.push(bytes[3]);
        self
    }

    pub fn load_const(mut self, constant: Constant) -> Self {
        let idx = match self.unit.constants.iter().position(|c| *c == constant) {
            Some(idx) => idx,
            None => {
                self.unit.constants.push(constant);
                self.unit.constants.len() - 1
            }
        };
        self.op_arg(Opcode::LoadConst, idx as u32)
    }

    pub fn name_op(mut self, opcode: Opcode, name: &str) -> Self {
        let idx = intern(&mut self.unit.names, name);
        self.op_arg(opcode, idx)
    }

    pub fn local_op(mut self, opcode: Opcode, name: &str) -> Self {
        let idx = intern(&mut self.unit.varnames, name);
        self.op_arg(opcode, idx)
    }

    pub fn call(self, argc: u32) -> Self {
        self.op_arg(Opcode::CallFunction, argc)
    }

    pub fn ret(self) -> Self {
        self.op(Opcode::ReturnValue)
    }

    pub fn build(mut self) -> Arc<CodeUnit> {
        self.unit.mtime = next_mtime();
        Arc::new(self.unit)
    }
}

fn intern(table: &mut Vec<String>, name: &str) -> u32 {
    match table.iter().position(|n| n == name) {
        Some(idx) => idx as u32,
        None => {
            table.push(name.to_string());
            (table.len() - 1) as u32
        }
    }
}

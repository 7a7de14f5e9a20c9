//! Bytecode instruction words of the register VM.
//!
//! Every instruction is one 32-bit word, optionally followed by a 32-bit
//! auxiliary word. Operands are packed as:
//!
//! ```text
//!   [ C:8 | B:8 | A:8 | op:8 ]      ABC form
//!   [    D:16   | A:8 | op:8 ]      AD form (D is signed)
//!   [       E:24      | op:8 ]      E form (E is signed)
//! ```

use crate::jit::EmitError;

/// Result/argument count meaning "everything up to the stack top".
pub const MULTRET: i32 = -1;

/// Largest value the coverage hit counter in the E field can hold.
pub const COVERAGE_MAX: i32 = (1 << 23) - 1;

/// Size of one instruction word in bytes.
pub const INSN_SIZE: usize = 4;

/// Opcodes of the register VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Break = 1,
    LoadNil = 2,
    LoadB = 3,
    LoadN = 4,
    LoadK = 5,
    Move = 6,
    GetGlobal = 7,
    SetGlobal = 8,
    GetUpval = 9,
    SetUpval = 10,
    CloseUpvals = 11,
    GetImport = 12,
    GetTable = 13,
    SetTable = 14,
    GetTableKS = 15,
    SetTableKS = 16,
    GetTableN = 17,
    SetTableN = 18,
    NewClosure = 19,
    NameCall = 20,
    Call = 21,
    Return = 22,
    Jump = 23,
    JumpBack = 24,
    JumpIf = 25,
    JumpIfNot = 26,
    JumpIfEq = 27,
    JumpIfLe = 28,
    JumpIfLt = 29,
    JumpIfNotEq = 30,
    JumpIfNotLe = 31,
    JumpIfNotLt = 32,
    Add = 33,
    Sub = 34,
    Mul = 35,
    Div = 36,
    Mod = 37,
    Pow = 38,
    AddK = 39,
    SubK = 40,
    MulK = 41,
    DivK = 42,
    ModK = 43,
    PowK = 44,
    And = 45,
    Or = 46,
    AndK = 47,
    OrK = 48,
    Concat = 49,
    Not = 50,
    Minus = 51,
    Length = 52,
    NewTable = 53,
    DupTable = 54,
    SetList = 55,
    ForNPrep = 56,
    ForNLoop = 57,
    ForGLoop = 58,
    ForGPrepInext = 59,
    ForGPrepNext = 61,
    GetVarargs = 63,
    DupClosure = 64,
    PrepVarargs = 65,
    LoadKX = 66,
    JumpX = 67,
    FastCall = 68,
    Coverage = 69,
    Capture = 70,
    FastCall1 = 73,
    FastCall2 = 74,
    FastCall2K = 75,
    ForGPrep = 76,
}

impl Opcode {
    /// Decode an opcode byte.
    pub fn from_u8(byte: u8) -> Option<Self> {
        use Opcode::*;
        let op = match byte {
            0 => Nop,
            1 => Break,
            2 => LoadNil,
            3 => LoadB,
            4 => LoadN,
            5 => LoadK,
            6 => Move,
            7 => GetGlobal,
            8 => SetGlobal,
            9 => GetUpval,
            10 => SetUpval,
            11 => CloseUpvals,
            12 => GetImport,
            13 => GetTable,
            14 => SetTable,
            15 => GetTableKS,
            16 => SetTableKS,
            17 => GetTableN,
            18 => SetTableN,
            19 => NewClosure,
            20 => NameCall,
            21 => Call,
            22 => Return,
            23 => Jump,
            24 => JumpBack,
            25 => JumpIf,
            26 => JumpIfNot,
            27 => JumpIfEq,
            28 => JumpIfLe,
            29 => JumpIfLt,
            30 => JumpIfNotEq,
            31 => JumpIfNotLe,
            32 => JumpIfNotLt,
            33 => Add,
            34 => Sub,
            35 => Mul,
            36 => Div,
            37 => Mod,
            38 => Pow,
            39 => AddK,
            40 => SubK,
            41 => MulK,
            42 => DivK,
            43 => ModK,
            44 => PowK,
            45 => And,
            46 => Or,
            47 => AndK,
            48 => OrK,
            49 => Concat,
            50 => Not,
            51 => Minus,
            52 => Length,
            53 => NewTable,
            54 => DupTable,
            55 => SetList,
            56 => ForNPrep,
            57 => ForNLoop,
            58 => ForGLoop,
            59 => ForGPrepInext,
            61 => ForGPrepNext,
            63 => GetVarargs,
            64 => DupClosure,
            65 => PrepVarargs,
            66 => LoadKX,
            67 => JumpX,
            68 => FastCall,
            69 => Coverage,
            70 => Capture,
            73 => FastCall1,
            74 => FastCall2,
            75 => FastCall2K,
            76 => ForGPrep,
            _ => return None,
        };
        Some(op)
    }

    /// Number of words this instruction occupies, including its aux word.
    pub fn words(self) -> usize {
        use Opcode::*;
        match self {
            GetGlobal | SetGlobal | GetImport | GetTableKS | SetTableKS | NameCall | JumpIfEq
            | JumpIfLe | JumpIfLt | JumpIfNotEq | JumpIfNotLe | JumpIfNotLt | NewTable
            | SetList | ForGLoop | LoadKX | FastCall2 | FastCall2K => 2,
            _ => 1,
        }
    }
}

/// A decoded instruction word plus its auxiliary word, if the opcode has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insn {
    pub word: u32,
    pub aux: Option<u32>,
}

impl Insn {
    /// Decode the instruction at `pc`.
    pub fn decode(code: &[u32], pc: usize) -> Result<(Opcode, Insn), EmitError> {
        let word = *code.get(pc).ok_or(EmitError::TruncatedInstruction { pc })?;
        let op = Opcode::from_u8(op_byte(word)).ok_or(EmitError::UnknownOpcode {
            pc,
            byte: op_byte(word),
        })?;
        let aux = if op.words() == 2 {
            Some(*code.get(pc + 1).ok_or(EmitError::TruncatedInstruction { pc })?)
        } else {
            None
        };
        Ok((op, Insn { word, aux }))
    }

    pub fn a(&self) -> u8 {
        ((self.word >> 8) & 0xff) as u8
    }

    pub fn b(&self) -> u8 {
        ((self.word >> 16) & 0xff) as u8
    }

    pub fn c(&self) -> u8 {
        (self.word >> 24) as u8
    }

    pub fn d(&self) -> i32 {
        (self.word as i32) >> 16
    }

    pub fn e(&self) -> i32 {
        (self.word as i32) >> 8
    }

    /// The auxiliary word; zero for opcodes without one.
    pub fn aux(&self) -> u32 {
        self.aux.unwrap_or(0)
    }
}

pub fn op_byte(word: u32) -> u8 {
    (word & 0xff) as u8
}

pub fn encode_abc(op: Opcode, a: u8, b: u8, c: u8) -> u32 {
    (op as u32) | ((a as u32) << 8) | ((b as u32) << 16) | ((c as u32) << 24)
}

pub fn encode_ad(op: Opcode, a: u8, d: i16) -> u32 {
    (op as u32) | ((a as u32) << 8) | ((d as u16 as u32) << 16)
}

pub fn encode_e(op: Opcode, e: i32) -> u32 {
    (op as u32) | ((e as u32) << 8)
}

/// Builtin functions known to the fast-call machinery.
///
/// The numeric id indexes `NativeContext::fast_functions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BuiltinId {
    Assert = 1,
    MathAbs = 2,
    MathAcos = 3,
    MathAsin = 4,
    MathAtan2 = 5,
    MathAtan = 6,
    MathCeil = 7,
    MathCosh = 8,
    MathCos = 9,
    MathDeg = 10,
    MathExp = 11,
    MathFloor = 12,
    MathFmod = 13,
    MathFrexp = 14,
    MathLdexp = 15,
    MathLog10 = 16,
    MathLog = 17,
    MathMax = 18,
    MathMin = 19,
    MathModf = 20,
    MathPow = 21,
    MathRad = 22,
    MathSinh = 23,
    MathSin = 24,
    MathSqrt = 25,
    MathTanh = 26,
    MathTan = 27,
}

impl BuiltinId {
    pub fn from_u8(id: u8) -> Option<Self> {
        use BuiltinId::*;
        const ALL: [BuiltinId; 27] = [
            Assert, MathAbs, MathAcos, MathAsin, MathAtan2, MathAtan, MathCeil, MathCosh,
            MathCos, MathDeg, MathExp, MathFloor, MathFmod, MathFrexp, MathLdexp, MathLog10,
            MathLog, MathMax, MathMin, MathModf, MathPow, MathRad, MathSinh, MathSin, MathSqrt,
            MathTanh, MathTan,
        ];
        ALL.iter().copied().find(|b| *b as u8 == id)
    }
}

/// Number of slots in the runtime fast-function table.
pub const BUILTIN_COUNT: usize = 64;

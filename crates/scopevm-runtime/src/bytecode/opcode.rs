//! Bytecode instruction set
//!
//! One opcode byte followed by a fixed, opcode-specific operand encoding.
//! Operand bytes are little-endian.

use crate::value::VarType;

/// Operand encoding that follows an opcode byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    /// No operand bytes
    None,
    /// 8-byte signed integer immediate
    Int,
    /// 8-byte IEEE-754 double immediate
    Double,
    /// u16 index into the constant pool
    Constant,
    /// u16 slot id in the function's local scope
    Slot,
    /// u16 scope id followed by u16 slot id
    ScopeSlot,
    /// i16 branch offset, relative to the operand's own offset
    Branch,
    /// u16 function id
    Function,
}

impl Operands {
    /// Number of operand bytes following the opcode byte
    pub const fn size(self) -> usize {
        match self {
            Operands::None => 0,
            Operands::Int | Operands::Double => 8,
            Operands::Constant | Operands::Slot | Operands::Branch | Operands::Function => 2,
            Operands::ScopeSlot => 4,
        }
    }
}

macro_rules! opcodes {
    ($( $(#[$doc:meta])* $name:ident = $byte:literal, $mnemonic:literal, $operands:ident; )*) => {
        /// Bytecode opcode
        ///
        /// Explicit byte values keep binary images stable across builds.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Opcode {
            $( $(#[$doc])* $name = $byte, )*
        }

        impl Opcode {
            /// Every opcode, in byte order
            pub const ALL: &'static [Opcode] = &[ $( Opcode::$name, )* ];

            /// Assembly mnemonic (e.g. `ILOAD`)
            pub const fn mnemonic(self) -> &'static str {
                match self {
                    $( Opcode::$name => $mnemonic, )*
                }
            }

            /// Operand encoding following the opcode byte
            pub const fn operands(self) -> Operands {
                match self {
                    $( Opcode::$name => Operands::$operands, )*
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            type Error = ();

            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                match byte {
                    $( $byte => Ok(Opcode::$name), )*
                    _ => Err(()),
                }
            }
        }
    };
}

opcodes! {
    // ===== Literal loads =====
    /// Push double immediate [f64]
    DLoad = 1, "DLOAD", Double;
    /// Push int immediate [i64]
    ILoad = 2, "ILOAD", Int;
    /// Push string constant [u16 index]
    SLoad = 3, "SLOAD", Constant;
    /// Push 0.0
    DLoad0 = 4, "DLOAD0", None;
    /// Push 0
    ILoad0 = 5, "ILOAD0", None;
    /// Push ""
    SLoad0 = 6, "SLOAD0", None;
    /// Push 1.0
    DLoad1 = 7, "DLOAD1", None;
    /// Push 1
    ILoad1 = 8, "ILOAD1", None;
    /// Push -1.0
    DLoadM1 = 9, "DLOADM1", None;
    /// Push -1
    ILoadM1 = 10, "ILOADM1", None;

    // ===== Arithmetic =====
    /// Pop b, pop a, push a + b
    DAdd = 11, "DADD", None;
    IAdd = 12, "IADD", None;
    /// Pop b, pop a, push a - b
    DSub = 13, "DSUB", None;
    ISub = 14, "ISUB", None;
    /// Pop b, pop a, push a * b
    DMul = 15, "DMUL", None;
    IMul = 16, "IMUL", None;
    /// Pop b, pop a, push a / b
    DDiv = 17, "DDIV", None;
    IDiv = 18, "IDIV", None;
    /// Pop b, pop a, push a % b
    IMod = 19, "IMOD", None;
    /// Pop a, push -a
    DNeg = 20, "DNEG", None;
    INeg = 21, "INEG", None;
    /// Pop b, pop a, push a | b
    IAOr = 22, "IAOR", None;
    /// Pop b, pop a, push a & b
    IAAnd = 23, "IAAND", None;
    /// Pop b, pop a, push a ^ b
    IAXor = 24, "IAXOR", None;

    // ===== Output =====
    IPrint = 25, "IPRINT", None;
    DPrint = 26, "DPRINT", None;
    SPrint = 27, "SPRINT", None;

    // ===== Conversion =====
    /// int -> double, in place
    I2D = 28, "I2D", None;
    /// double -> int (truncating), in place
    D2I = 29, "D2I", None;
    /// string -> int (decimal parse), in place
    S2I = 30, "S2I", None;

    // ===== Stack manipulation =====
    Swap = 31, "SWAP", None;
    Pop = 32, "POP", None;

    // ===== Local scope, fixed slots =====
    LoadDVar0 = 33, "LOADDVAR0", None;
    LoadDVar1 = 34, "LOADDVAR1", None;
    LoadDVar2 = 35, "LOADDVAR2", None;
    LoadDVar3 = 36, "LOADDVAR3", None;
    LoadIVar0 = 37, "LOADIVAR0", None;
    LoadIVar1 = 38, "LOADIVAR1", None;
    LoadIVar2 = 39, "LOADIVAR2", None;
    LoadIVar3 = 40, "LOADIVAR3", None;
    LoadSVar0 = 41, "LOADSVAR0", None;
    LoadSVar1 = 42, "LOADSVAR1", None;
    LoadSVar2 = 43, "LOADSVAR2", None;
    LoadSVar3 = 44, "LOADSVAR3", None;
    StoreDVar0 = 45, "STOREDVAR0", None;
    StoreDVar1 = 46, "STOREDVAR1", None;
    StoreDVar2 = 47, "STOREDVAR2", None;
    StoreDVar3 = 48, "STOREDVAR3", None;
    StoreIVar0 = 49, "STOREIVAR0", None;
    StoreIVar1 = 50, "STOREIVAR1", None;
    StoreIVar2 = 51, "STOREIVAR2", None;
    StoreIVar3 = 52, "STOREIVAR3", None;
    StoreSVar0 = 53, "STORESVAR0", None;
    StoreSVar1 = 54, "STORESVAR1", None;
    StoreSVar2 = 55, "STORESVAR2", None;
    StoreSVar3 = 56, "STORESVAR3", None;

    // ===== Local scope [u16 slot] =====
    LoadDVar = 57, "LOADDVAR", Slot;
    LoadIVar = 58, "LOADIVAR", Slot;
    LoadSVar = 59, "LOADSVAR", Slot;
    StoreDVar = 60, "STOREDVAR", Slot;
    StoreIVar = 61, "STOREIVAR", Slot;
    StoreSVar = 62, "STORESVAR", Slot;

    // ===== Resolved scope [u16 scope, u16 slot] =====
    LoadCtxDVar = 63, "LOADCTXDVAR", ScopeSlot;
    LoadCtxIVar = 64, "LOADCTXIVAR", ScopeSlot;
    LoadCtxSVar = 65, "LOADCTXSVAR", ScopeSlot;
    StoreCtxDVar = 66, "STORECTXDVAR", ScopeSlot;
    StoreCtxIVar = 67, "STORECTXIVAR", ScopeSlot;
    StoreCtxSVar = 68, "STORECTXSVAR", ScopeSlot;

    // ===== Comparison =====
    /// Pop b, pop a, push sign(a - b) as int
    DCmp = 69, "DCMP", None;
    ICmp = 70, "ICMP", None;

    // ===== Control flow [i16 offset] =====
    /// Unconditional branch
    Ja = 71, "JA", Branch;
    /// Pop b, pop a, branch if a != b
    IfICmpNe = 72, "IFICMPNE", Branch;
    /// Pop b, pop a, branch if a == b
    IfICmpE = 73, "IFICMPE", Branch;
    /// Pop b, pop a, branch if a > b
    IfICmpG = 74, "IFICMPG", Branch;
    /// Pop b, pop a, branch if a >= b
    IfICmpGe = 75, "IFICMPGE", Branch;
    /// Pop b, pop a, branch if a < b
    IfICmpL = 76, "IFICMPL", Branch;
    /// Pop b, pop a, branch if a <= b
    IfICmpLe = 77, "IFICMPLE", Branch;

    // ===== Special =====
    /// Pop any value and write it followed by a newline
    Dump = 78, "DUMP", None;
    /// Terminate the whole program
    Stop = 79, "STOP", None;

    // ===== Functions =====
    /// Call function [u16 function id]
    Call = 80, "CALL", Function;
    /// Return to the caller frame
    Return = 82, "RETURN", None;
    /// Breakpoint marker
    Break = 83, "BREAK", None;
}

impl Opcode {
    /// Total encoded width including the opcode byte
    pub const fn width(self) -> usize {
        1 + self.operands().size()
    }

    /// Whether the opcode is a (conditional or unconditional) branch
    pub const fn is_branch(self) -> bool {
        matches!(self.operands(), Operands::Branch)
    }

    /// Slot addressed by the fixed-slot variable opcodes (`LOADIVAR0` ...)
    pub const fn fixed_slot(self) -> Option<u16> {
        match self as u8 {
            b @ 33..=56 => Some(((b - 33) % 4) as u16),
            _ => None,
        }
    }

    /// Value type a variable load or store transfers
    pub const fn slot_type(self) -> Option<VarType> {
        use Opcode::*;
        match self {
            LoadDVar0 | LoadDVar1 | LoadDVar2 | LoadDVar3 | StoreDVar0 | StoreDVar1
            | StoreDVar2 | StoreDVar3 | LoadDVar | StoreDVar | LoadCtxDVar | StoreCtxDVar => {
                Some(VarType::Double)
            }
            LoadIVar0 | LoadIVar1 | LoadIVar2 | LoadIVar3 | StoreIVar0 | StoreIVar1
            | StoreIVar2 | StoreIVar3 | LoadIVar | StoreIVar | LoadCtxIVar | StoreCtxIVar => {
                Some(VarType::Int)
            }
            LoadSVar0 | LoadSVar1 | LoadSVar2 | LoadSVar3 | StoreSVar0 | StoreSVar1
            | StoreSVar2 | StoreSVar3 | LoadSVar | StoreSVar | LoadCtxSVar | StoreCtxSVar => {
                Some(VarType::String)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

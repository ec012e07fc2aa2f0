//! The decoded method handed to us by the class-file reader.

mod control_flow;
mod descriptor;

pub use self::control_flow::InsnControlFlow;
pub use self::descriptor::{CallShape, MethodInfo, Parameter, call_shape, field_width};
use crate::ast::{BinOp, CompareOp, Constant, Str};
use displaydoc::Display;

#[derive(Clone, Debug)]
pub struct Instruction<'code> {
    pub address: u32,
    pub length: u32,
    pub opcode: Opcode<'code>,
}

impl<'code> Instruction<'code> {
    pub fn new(address: u32, length: u32, opcode: Opcode<'code>) -> Self {
        Self {
            address,
            length,
            opcode,
        }
    }

    pub fn next_address(&self) -> u32 {
        self.address + self.length
    }
}

/// One row of the exception table. `class: None` catches everything (`finally`, `synchronized`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExceptionHandler<'code> {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    pub class: Option<Str<'code>>,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// int
    Int,
    /// long
    Long,
    /// float
    Float,
    /// double
    Double,
    /// reference
    Reference,
    /// byte
    Byte,
    /// char
    Char,
    /// short
    Short,
}

impl ValueKind {
    pub fn width(self) -> u8 {
        match self {
            Self::Long | Self::Double => 2,
            _ => 1,
        }
    }
}

/// Raw operand stack shuffles.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum StackOp {
    /// POP
    Pop,
    /// POP2
    Pop2,
    /// DUP
    Dup,
    /// DUP_X1
    DupX1,
    /// DUP_X2
    DupX2,
    /// DUP2
    Dup2,
    /// DUP2_X1
    Dup2X1,
    /// DUP2_X2
    Dup2X2,
    /// SWAP
    Swap,
}

impl StackOp {
    /// For duplications, `(copied slots, slots skipped below the copy)`.
    pub fn dup_shape(self) -> Option<(u8, u8)> {
        match self {
            Self::Dup => Some((1, 0)),
            Self::DupX1 => Some((1, 1)),
            Self::DupX2 => Some((1, 2)),
            Self::Dup2 => Some((2, 0)),
            Self::Dup2X1 => Some((2, 1)),
            Self::Dup2X2 => Some((2, 2)),
            Self::Pop | Self::Pop2 | Self::Swap => None,
        }
    }

    pub fn popped_slots(self) -> Option<u8> {
        match self {
            Self::Pop => Some(1),
            Self::Pop2 => Some(2),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IfOperand {
    /// `ifeq`-style comparison with zero.
    Zero,
    /// `ifnull`/`ifnonnull`.
    Null,
    /// `if_icmp*`/`if_acmp*`: a second operand of this kind.
    Value(ValueKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

#[derive(Clone, Debug)]
pub enum Opcode<'code> {
    Nop,
    Const(Constant<'code>),
    Load {
        kind: ValueKind,
        slot: u16,
    },
    Store {
        kind: ValueKind,
        slot: u16,
    },
    Iinc {
        slot: u16,
        delta: i16,
    },
    ArrayLoad(ValueKind),
    ArrayStore(ValueKind),
    Stack(StackOp),
    Binary {
        op: BinOp,
        kind: ValueKind,
    },
    Negate(ValueKind),
    Convert {
        from: ValueKind,
        to: ValueKind,
    },
    /// `lcmp`, `fcmpl`, `fcmpg`, `dcmpl`, `dcmpg`.
    Compare {
        kind: ValueKind,
        nan_greater: bool,
    },
    If {
        op: CompareOp,
        operand: IfOperand,
        target: u32,
    },
    Goto(u32),
    Jsr(u32),
    Ret(u16),
    Switch {
        cases: Vec<(i32, u32)>,
        default: u32,
    },
    Return(Option<ValueKind>),
    Throw,
    GetField {
        is_static: bool,
        class: Str<'code>,
        name: Str<'code>,
        descriptor: Str<'code>,
    },
    PutField {
        is_static: bool,
        class: Str<'code>,
        name: Str<'code>,
        descriptor: Str<'code>,
    },
    Invoke {
        kind: InvokeKind,
        class: Str<'code>,
        name: Str<'code>,
        descriptor: Str<'code>,
    },
    New(Str<'code>),
    NewArray {
        element: Str<'code>,
        dimensions: u8,
    },
    ArrayLength,
    CheckCast(Str<'code>),
    InstanceOf(Str<'code>),
    MonitorEnter,
    MonitorExit,
}

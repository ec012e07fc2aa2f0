use super::{ExprId, Str};
use crate::input::{InvokeKind, ValueKind};
use crate::variables::LocalId;
use core::fmt;
use displaydoc::Display;

#[derive(Clone, Debug)]
pub enum Expression<'code> {
    /// A value still sitting on the operand stack, to be filled by the push that produced it.
    FreeOperand {
        width: u8,
    },
    Local(LocalId),
    Const(Constant<'code>),
    ArrayElement {
        array: ExprId,
        index: ExprId,
    },
    ArrayLength {
        array: ExprId,
    },
    NewArray {
        element: Str<'code>,
        lengths: Vec<ExprId>,
    },
    /// `new T[] { .. }`, with `values.len() <= length`.
    ArrayLiteral {
        element: Str<'code>,
        length: i32,
        values: Vec<ExprId>,
    },
    NewUninitialized {
        class: Str<'code>,
    },
    Constructor {
        class: Str<'code>,
        descriptor: Str<'code>,
        arguments: Vec<ExprId>,
    },
    Field {
        // `None` for static fields
        object: Option<ExprId>,
        class: Str<'code>,
        name: Str<'code>,
        descriptor: Str<'code>,
    },
    Call {
        kind: InvokeKind,
        class: Str<'code>,
        name: Str<'code>,
        descriptor: Str<'code>,
        object: Option<ExprId>,
        arguments: Vec<ExprId>,
    },
    InstanceOf {
        object: ExprId,
        class: Str<'code>,
    },
    CheckCast {
        object: ExprId,
        class: Str<'code>,
    },
    Convert {
        value: ExprId,
        from: ValueKind,
        to: ValueKind,
    },
    BinOp {
        op: BinOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Negate {
        value: ExprId,
    },
    Not {
        value: ExprId,
    },
    Compare {
        op: CompareOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    /// `lcmp` and friends: -1, 0 or 1.
    ThreeWay {
        lhs: ExprId,
        rhs: ExprId,
        nan_greater: bool,
    },
    Logical {
        op: LogicalOp,
        lhs: ExprId,
        rhs: ExprId,
    },
    Ternary {
        condition: ExprId,
        branches: [ExprId; 2], // [if_true, if_false]
    },
    /// `target = value` or `target op= value`.
    Assign {
        target: ExprId,
        op: Option<BinOp>,
        value: ExprId,
    },
    Increment {
        target: ExprId,
        op: IncOp,
        prefix: bool,
    },
    MonitorEnter {
        object: ExprId,
    },
    MonitorExit {
        object: ExprId,
    },
}

impl Expression<'_> {
    /// Whether the expression produces a boolean when used as a condition.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            Self::Compare { .. }
                | Self::Logical { .. }
                | Self::Not { .. }
                | Self::InstanceOf { .. }
                | Self::Const(Constant::Bool(_))
        )
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            Self::Local(local) => Some(*local),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Constant<'code> {
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Str<'code>),
    Class(Str<'code>),
}

impl Constant<'_> {
    pub fn width(&self) -> u8 {
        match self {
            Self::Long(_) | Self::Double(_) => 2,
            _ => 1,
        }
    }

    /// `1` for the integral and floating-point ones.
    pub fn is_one(&self) -> bool {
        match *self {
            Self::Int(n) => n == 1,
            Self::Long(n) => n == 1,
            Self::Float(n) => n == 1.0,
            Self::Double(n) => n == 1.0,
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    UnsignedShr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => write!(f, "+"),
            Self::Sub => write!(f, "-"),
            Self::Mul => write!(f, "*"),
            Self::Div => write!(f, "/"),
            Self::Rem => write!(f, "%"),
            Self::And => write!(f, "&"),
            Self::Or => write!(f, "|"),
            Self::Xor => write!(f, "^"),
            Self::Shl => write!(f, "<<"),
            Self::Shr => write!(f, ">>"),
            Self::UnsignedShr => write!(f, ">>>"),
        }
    }
}

impl BinOp {
    pub fn is_shift(self) -> bool {
        matches!(self, Self::Shl | Self::Shr | Self::UnsignedShr)
    }

    pub fn can_throw(self) -> bool {
        matches!(self, Self::Div | Self::Rem)
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// ==
    Eq,
    /// !=
    Ne,
    /// <
    Lt,
    /// >=
    Ge,
    /// >
    Gt,
    /// <=
    Le,
}

impl CompareOp {
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Ge,
            Self::Ge => Self::Lt,
            Self::Gt => Self::Le,
            Self::Le => Self::Gt,
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    /// &&
    And,
    /// ||
    Or,
}

impl LogicalOp {
    pub fn dual(self) -> Self {
        match self {
            Self::And => Self::Or,
            Self::Or => Self::And,
        }
    }
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum IncOp {
    /// ++
    Increment,
    /// --
    Decrement,
}

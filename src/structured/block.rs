use crate::ast::{ExprId, Str};
use crate::flow::JumpId;
use crate::input::StackOp;
use crate::variables::{LocalId, VariableSet};
use core::ops::{Index, IndexMut};
use displaydoc::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug)]
pub struct Block<'code> {
    pub kind: BlockKind<'code>,
    /// Owning parent. `None` for the root of a flow block and for detached blocks.
    pub outer: Option<BlockId>,
    /// Unresolved unconditional edge taken when the block completes.
    pub jump: Option<JumpId>,
    /// Locals whose declaration this block prints.
    pub declare: VariableSet,
}

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum LoopKind {
    /// while
    While,
    /// do-while
    DoWhile,
    /// for
    For,
    /// possible for
    PossFor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaseValue {
    Value(i32),
    Default,
}

#[derive(Debug)]
pub enum BlockKind<'code> {
    Empty,
    /// Evaluates `expr`, leaving `push` slots on the stack (zero for statements).
    Instruction {
        expr: ExprId,
        push: u8,
    },
    Return {
        value: Option<ExprId>,
    },
    Throw {
        exception: ExprId,
    },
    /// Right-leaning: `first` is never sequential and never has a jump.
    Sequential {
        first: BlockId,
        second: BlockId,
    },
    /// `if (cond) trueblock`, where `trueblock` starts out as an empty block with a jump.
    Conditional {
        cond: ExprId,
        trueblock: BlockId,
    },
    IfThenElse {
        cond: ExprId,
        then: BlockId,
        else_: Option<BlockId>,
    },
    Loop {
        kind: LoopKind,
        cond: ExprId,
        init: Option<ExprId>,
        incr: Option<BlockId>,
        body: BlockId,
        labeled: bool,
    },
    Switch {
        selector: ExprId,
        cases: Vec<BlockId>,
        labeled: bool,
    },
    Case {
        value: CaseValue,
        body: BlockId,
        /// Control falls into this case from the previous one.
        fallthrough: bool,
    },
    Try {
        body: BlockId,
        handlers: Vec<BlockId>,
    },
    Catch {
        class: Option<Str<'code>>,
        local: Option<LocalId>,
        body: BlockId,
    },
    Finally {
        body: BlockId,
    },
    /// `object` is filled in once the matching `monitorenter` has been folded.
    Synchronized {
        local: LocalId,
        object: Option<ExprId>,
        body: BlockId,
    },
    Break {
        target: BlockId,
        labeled: bool,
    },
    Continue {
        target: BlockId,
        labeled: bool,
    },
    Special(StackOp),
    /// Subroutine call; `call` is an empty block jumping to the subroutine.
    Jsr {
        call: BlockId,
    },
    Ret {
        local: LocalId,
    },
    Description(String),
}

impl BlockKind<'_> {
    /// Direct children in execution order.
    pub fn children(&self) -> Vec<BlockId> {
        match self {
            Self::Sequential { first, second } => vec![*first, *second],
            Self::Conditional { trueblock, .. } => vec![*trueblock],
            Self::IfThenElse { then, else_, .. } => core::iter::once(*then).chain(*else_).collect(),
            Self::Loop { body, incr, .. } => core::iter::once(*body).chain(*incr).collect(),
            Self::Switch { cases, .. } => cases.clone(),
            Self::Try { body, handlers } => core::iter::once(*body)
                .chain(handlers.iter().copied())
                .collect(),
            Self::Case { body, .. }
            | Self::Catch { body, .. }
            | Self::Finally { body }
            | Self::Synchronized { body, .. } => vec![*body],
            Self::Jsr { call } => vec![*call],
            Self::Empty
            | Self::Instruction { .. }
            | Self::Return { .. }
            | Self::Throw { .. }
            | Self::Break { .. }
            | Self::Continue { .. }
            | Self::Special(_)
            | Self::Ret { .. }
            | Self::Description(_) => Vec::new(),
        }
    }

    fn child_slots(&mut self) -> Vec<&mut BlockId> {
        match self {
            Self::Sequential { first, second } => vec![first, second],
            Self::Conditional { trueblock, .. } => vec![trueblock],
            Self::IfThenElse { then, else_, .. } => core::iter::once(then).chain(else_).collect(),
            Self::Loop { body, incr, .. } => core::iter::once(body).chain(incr).collect(),
            Self::Switch { cases, .. } => cases.iter_mut().collect(),
            Self::Try { body, handlers } => core::iter::once(body).chain(handlers).collect(),
            Self::Case { body, .. }
            | Self::Catch { body, .. }
            | Self::Finally { body }
            | Self::Synchronized { body, .. } => vec![body],
            Self::Jsr { call } => vec![call],
            _ => Vec::new(),
        }
    }

    /// Expressions held directly by the block, in evaluation order.
    pub fn exprs(&self) -> Vec<ExprId> {
        match self {
            Self::Instruction { expr, .. } => vec![*expr],
            Self::Return { value } => value.iter().copied().collect(),
            Self::Throw { exception } => vec![*exception],
            Self::Conditional { cond, .. } | Self::IfThenElse { cond, .. } => vec![*cond],
            Self::Loop { cond, init, .. } => init.iter().copied().chain([*cond]).collect(),
            Self::Switch { selector, .. } => vec![*selector],
            Self::Synchronized { object, .. } => object.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    /// The expression whose free operands are filled from preceding pushes.
    pub fn operand_expr(&self) -> Option<ExprId> {
        match self {
            Self::Instruction { expr, .. } => Some(*expr),
            Self::Return { value } => *value,
            Self::Throw { exception } => Some(*exception),
            Self::Conditional { cond, .. } | Self::IfThenElse { cond, .. } => Some(*cond),
            Self::Switch { selector, .. } => Some(*selector),
            _ => None,
        }
    }

    pub fn is_breakable(&self) -> bool {
        matches!(self, Self::Loop { .. } | Self::Switch { .. })
    }

    pub fn push_width(&self) -> u8 {
        match self {
            Self::Instruction { push, .. } => *push,
            _ => 0,
        }
    }
}

#[derive(Debug, Default)]
pub struct Blocks<'code> {
    blocks: Vec<Block<'code>>,
}

impl<'code> Blocks<'code> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a detached block and adopts its children.
    pub fn alloc(&mut self, kind: BlockKind<'code>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        for child in kind.children() {
            self[child].outer = Some(id);
        }
        self.blocks.push(Block {
            kind,
            outer: None,
            jump: None,
            declare: VariableSet::new(),
        });
        id
    }

    pub fn empty(&mut self) -> BlockId {
        self.alloc(BlockKind::Empty)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Points the child slot holding `old` at `new`.
    pub fn replace_child(&mut self, parent: BlockId, old: BlockId, new: BlockId) {
        for slot in self[parent].kind.child_slots() {
            if *slot == old {
                *slot = new;
            }
        }
        // `old` may already have been adopted by `new`.
        if self[old].outer == Some(parent) {
            self[old].outer = None;
        }
        self[new].outer = Some(parent);
    }
}

impl<'code> Index<BlockId> for Blocks<'code> {
    type Output = Block<'code>;

    fn index(&self, id: BlockId) -> &Self::Output {
        &self.blocks[id.0 as usize]
    }
}

impl<'code> IndexMut<BlockId> for Blocks<'code> {
    fn index_mut(&mut self, id: BlockId) -> &mut Self::Output {
        &mut self.blocks[id.0 as usize]
    }
}

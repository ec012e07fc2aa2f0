use super::{Constant, Expression};
use crate::variables::LocalId;
use core::ops::{Index, IndexMut};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

/// Per-method expression storage. Nodes are never freed; rewrites leave unreachable nodes behind.
#[derive(Debug, Default)]
pub struct Arena<'code> {
    elements: Vec<Expression<'code>>,
}

impl<'code> Arena<'code> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, expr: Expression<'code>) -> ExprId {
        let id = ExprId(self.elements.len() as u32);
        self.elements.push(expr);
        id
    }

    pub fn free(&mut self, width: u8) -> ExprId {
        self.alloc(Expression::FreeOperand { width })
    }

    pub fn local(&mut self, local: LocalId) -> ExprId {
        self.alloc(Expression::Local(local))
    }

    pub fn int(&mut self, value: i32) -> ExprId {
        self.alloc(Expression::Const(Constant::Int(value)))
    }

    pub fn bool(&mut self, value: bool) -> ExprId {
        self.alloc(Expression::Const(Constant::Bool(value)))
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }
}

impl<'code> Index<ExprId> for Arena<'code> {
    type Output = Expression<'code>;

    fn index(&self, id: ExprId) -> &Self::Output {
        &self.elements[id.0 as usize]
    }
}

impl<'code> IndexMut<ExprId> for Arena<'code> {
    fn index_mut(&mut self, id: ExprId) -> &mut Self::Output {
        &mut self.elements[id.0 as usize]
    }
}

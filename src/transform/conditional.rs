use crate::analysis::Analysis;
use crate::ast::{Constant, ExprId, Expression, LogicalOp};
use crate::flow::JumpId;
use crate::structured::{BlockId, BlockKind};

impl Analysis<'_> {
    /// `if (c) push a; else push b;`  =>  `push c ? a : b`, folding `c ? 1 : 0` to `c`.
    pub(super) fn fold_ternary(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::IfThenElse {
            cond,
            then,
            else_: Some(else_),
        } = self.blocks[block].kind
        else {
            return None;
        };
        let (if_true, width) = self.pushed(then)?;
        let (if_false, else_width) = self.pushed(else_)?;
        if width != else_width
            || self.exprs.free_operand_count(if_true) != 0
            || self.exprs.free_operand_count(if_false) != 0
            || !self.blocks[then].declare.is_empty()
            || !self.blocks[else_].declare.is_empty()
        {
            return None;
        }

        let boolean = match (&self.exprs[if_true], &self.exprs[if_false]) {
            (Expression::Const(Constant::Int(1)), Expression::Const(Constant::Int(0))) => Some(true),
            (Expression::Const(Constant::Int(0)), Expression::Const(Constant::Int(1))) => {
                Some(false)
            }
            _ => None,
        };
        let expr = match boolean {
            Some(true) => cond,
            Some(false) => self.exprs.negate(cond),
            None => self.exprs.alloc(Expression::Ternary {
                condition: cond,
                branches: [if_true, if_false],
            }),
        };
        let new = self.instruction(expr, width);
        self.replace_statement(block, new);
        Some(new)
    }

    /// Merges two conditional jumps in a row:
    ///
    /// ```text
    /// if (a) goto X; if (b) goto X;          =>  if (a || b) goto X;
    /// if (a) goto X; if (b) goto Y; goto X;  =>  if (!a && b) goto Y; goto X;
    /// ```
    pub(super) fn combine_if_goto(&mut self, block: BlockId) -> Option<BlockId> {
        let (second_cond, second_jump) = self.conditional_jump(block)?;
        let prev = self.blocks.prev_statement(block)?;
        let (first_cond, first_jump) = self.conditional_jump(prev)?;
        if self.exprs.free_operand_count(second_cond) != 0 || !self.removable(&[prev]) {
            return None;
        }
        let flow = self.flow_of(block)?;

        let first_target = self.graph[first_jump].destination;
        let (op, lhs) = if first_target == self.graph[second_jump].destination {
            (LogicalOp::Or, first_cond)
        } else if self.blocks[block]
            .jump
            .is_some_and(|own| self.graph[own].destination == first_target)
        {
            (LogicalOp::And, self.exprs.negate(first_cond))
        } else {
            return None;
        };

        let combined = self.exprs.alloc(Expression::Logical {
            op,
            lhs,
            rhs: second_cond,
        });
        self.remove_jump(flow, first_jump);
        self.remove_statement(prev);
        self.set_condition(block, combined);
        Some(block)
    }

    /// `(cond, jump)` of `if (cond) goto ..` with nothing else in the branch.
    fn conditional_jump(&self, block: BlockId) -> Option<(ExprId, JumpId)> {
        let BlockKind::Conditional { cond, trueblock } = self.blocks[block].kind else {
            return None;
        };
        if !matches!(self.blocks[trueblock].kind, BlockKind::Empty) {
            return None;
        }
        Some((cond, self.blocks[trueblock].jump?))
    }
}

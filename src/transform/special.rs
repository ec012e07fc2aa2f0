use crate::analysis::Analysis;
use crate::ast::{ExprId, Expression};
use crate::input::StackOp;
use crate::structured::{BlockId, BlockKind};
use crate::variables::LocalId;

impl Analysis<'_> {
    /// `push e; pop`  =>  `e;`, or nothing for a pure `e`.
    pub(super) fn remove_pop(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Special(op) = self.blocks[block].kind else {
            return None;
        };
        let popped = op.popped_slots()?;
        let prev = self.blocks.prev_statement(block)?;
        let (expr, width) = self.pushed(prev)?;
        if width != popped || !self.removable(&[prev]) {
            return None;
        }
        let new = if self.exprs.is_pure(expr) {
            self.empty()
        } else {
            self.instruction(expr, 0)
        };
        Some(self.replace_run(&[prev], block, new))
    }

    /// `push a; push b; swap`  =>  `push b; push a` for locals and constants.
    pub(super) fn remove_swap(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Special(StackOp::Swap) = self.blocks[block].kind else {
            return None;
        };
        let run = self.preceding(block, 2)?;
        let (a, 1) = self.pushed(run[0])? else {
            return None;
        };
        let (b, 1) = self.pushed(run[1])? else {
            return None;
        };
        if !self.is_simple(a) || !self.is_simple(b) || !self.can_remove_statement(block) {
            return None;
        }
        self.blocks[run[0]].kind = BlockKind::Instruction { expr: b, push: 1 };
        self.blocks[run[1]].kind = BlockKind::Instruction { expr: a, push: 1 };
        self.remove_statement(block);
        Some(run[1])
    }

    /// `push a; dup`  =>  `push a; push a` for locals and constants.
    pub(super) fn remove_dup(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Special(op @ (StackOp::Dup | StackOp::Dup2)) = self.blocks[block].kind
        else {
            return None;
        };
        let prev = self.blocks.prev_statement(block)?;
        let (expr, width) = self.pushed(prev)?;
        if Some((width, 0)) != op.dup_shape() || !self.is_simple(expr) {
            return None;
        }
        let duplicated = self.exprs[expr].clone();
        let copy = self.exprs.alloc(duplicated);
        let new = self.instruction(copy, width);
        Some(self.replace_run(&[], block, new))
    }

    /// `push v; dup_x<n>; target = FREE`  =>  `push (target = v)`, where the target takes the
    /// `n` skipped slots as its own operands.
    pub(super) fn fold_dup_store(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Instruction { expr, push: 0 } = self.blocks[block].kind else {
            return None;
        };
        let Expression::Assign { target, value, .. } = self.exprs[expr] else {
            return None;
        };
        let Expression::FreeOperand { width } = self.exprs[value] else {
            return None;
        };
        let run = self.preceding(block, 2)?;
        let BlockKind::Special(op) = self.blocks[run[1]].kind else {
            return None;
        };
        let (copied, skipped) = op.dup_shape()?;
        let (pushed, pushed_width) = self.pushed(run[0])?;
        if copied != width
            || pushed_width != width
            || self.exprs.free_operand_slots(target) != skipped as usize
            || !self.removable(&run)
        {
            return None;
        }
        self.exprs.fill_last_free(expr, pushed, width);
        let new = self.instruction(expr, width);
        Some(self.replace_run(&run, block, new))
    }

    /// `monitorenter(l = o); synchronized (l) { .. }`  =>  `synchronized (o) { .. }`
    pub(super) fn complete_synchronized(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Synchronized {
            local,
            object: None,
            ..
        } = self.blocks[block].kind
        else {
            return None;
        };
        let enter = self.blocks.prev_statement(block)?;
        let expr = self.statement_expr(enter)?;
        let Expression::MonitorEnter { object } = self.exprs[expr] else {
            return None;
        };
        if self.exprs.free_operand_count(object) != 0 {
            return None;
        }

        let (value, run) = match self.exprs[object] {
            Expression::Assign {
                target,
                op: None,
                value,
            } if self.is_local_of_slot(target, local) => (value, vec![enter]),
            Expression::Local(copy) if self.locals.same_slot(copy, local) => {
                let store = self.blocks.prev_statement(enter)?;
                let stored = self.statement_expr(store)?;
                match self.exprs[stored] {
                    Expression::Assign {
                        target,
                        op: None,
                        value,
                    } if self.is_local_of_slot(target, local) => (value, vec![store, enter]),
                    _ => return None,
                }
            }
            _ => return None,
        };
        if !self.removable(&run) {
            return None;
        }
        for statement in run {
            self.remove_statement(statement);
        }
        if let BlockKind::Synchronized { object, .. } = &mut self.blocks[block].kind {
            *object = Some(value);
        }
        Some(block)
    }

    fn is_local_of_slot(&self, expr: ExprId, local: LocalId) -> bool {
        self.exprs[expr]
            .as_local()
            .is_some_and(|other| self.locals.same_slot(other, local))
    }
}

use crate::analysis::Analysis;
use crate::ast::{BinOp, Constant, ExprId, Expression, IncOp};
use crate::structured::{BlockId, BlockKind};

impl Analysis<'_> {
    /// Whether `a` and `b` denote the same storage location. With `free_equal`, two free operands
    /// count as the same value (both copies of one `dup`).
    fn same_place(&self, a: ExprId, b: ExprId, free_equal: bool) -> bool {
        match (&self.exprs[a], &self.exprs[b]) {
            (Expression::Local(x), Expression::Local(y)) => self.locals.same_slot(*x, *y),
            (Expression::Const(x), Expression::Const(y)) => x == y,
            (Expression::FreeOperand { width: x }, Expression::FreeOperand { width: y }) => {
                free_equal && x == y
            }
            (
                Expression::Field {
                    object: x,
                    class: class_x,
                    name: name_x,
                    ..
                },
                Expression::Field {
                    object: y,
                    class: class_y,
                    name: name_y,
                    ..
                },
            ) => {
                class_x == class_y
                    && name_x == name_y
                    && match (x, y) {
                        (None, None) => true,
                        (Some(x), Some(y)) => self.same_place(*x, *y, free_equal),
                        _ => false,
                    }
            }
            (
                Expression::ArrayElement {
                    array: array_x,
                    index: index_x,
                },
                Expression::ArrayElement {
                    array: array_y,
                    index: index_y,
                },
            ) => {
                self.same_place(*array_x, *array_y, free_equal)
                    && self.same_place(*index_x, *index_y, free_equal)
            }
            _ => false,
        }
    }

    /// Unifies the locals of two expressions found to denote the same variable.
    fn merge_places(&mut self, a: ExprId, b: ExprId) {
        let mut left = self.exprs.locals_in(a);
        let right = self.exprs.locals_in(b);
        left.truncate(right.len());
        for (x, y) in left.into_iter().zip(right) {
            self.locals.merge(x, y);
        }
    }

    /// `++`/`--` for `target op= value`, if `value` is one.
    fn step(&self, op: Option<BinOp>, value: ExprId) -> Option<IncOp> {
        let Expression::Const(constant) = self.exprs[value] else {
            return None;
        };
        match op? {
            BinOp::Add if constant.is_one() => Some(IncOp::Increment),
            BinOp::Sub if constant.is_one() => Some(IncOp::Decrement),
            BinOp::Add if constant == Constant::Int(-1) => Some(IncOp::Decrement),
            _ => None,
        }
    }

    /// Whether `place op= v` reads and writes the same place as `place = place op v`: a local,
    /// a static field, or a field of a local.
    fn evaluated_once(&self, place: ExprId) -> bool {
        match self.exprs[place] {
            Expression::Field { object: None, .. } => true,
            Expression::Field {
                object: Some(object),
                ..
            } => matches!(self.exprs[object], Expression::Local(_)),
            _ => self.exprs.is_pure(place),
        }
    }

    /// `x = x op v`  =>  `x op= v`
    pub(super) fn fold_compound(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Instruction { expr, .. } = self.blocks[block].kind else {
            return None;
        };
        let Expression::Assign {
            target,
            op: None,
            value,
        } = self.exprs[expr]
        else {
            return None;
        };
        let Expression::BinOp { op, lhs, rhs } = self.exprs[value] else {
            return None;
        };
        if !self.same_place(target, lhs, false) || !self.evaluated_once(lhs) {
            return None;
        }
        self.merge_places(target, lhs);
        self.exprs[expr] = Expression::Assign {
            target,
            op: Some(op),
            value: rhs,
        };
        Some(block)
    }

    /// `push o; dup; FREE.f = FREE.f op v`  =>  `push o; FREE.f op= v`, likewise for array
    /// elements with `dup2`.
    pub(super) fn fold_compound_through_dup(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Instruction { expr, .. } = self.blocks[block].kind else {
            return None;
        };
        let Expression::Assign {
            target,
            op: None,
            value,
        } = self.exprs[expr]
        else {
            return None;
        };
        let Expression::BinOp { op, lhs, rhs } = self.exprs[value] else {
            return None;
        };
        let slots = self.exprs.free_operand_slots(target);
        if slots == 0
            || self.exprs.free_operand_slots(lhs) != slots
            || self.exprs.free_operand_count(rhs) != 0
            || !self.same_place(target, lhs, true)
        {
            return None;
        }
        let prev = self.blocks.prev_statement(block)?;
        let BlockKind::Special(dup) = self.blocks[prev].kind else {
            return None;
        };
        if dup.dup_shape() != Some((slots as u8, 0)) || !self.removable(&[prev]) {
            return None;
        }
        self.exprs[expr] = Expression::Assign {
            target,
            op: Some(op),
            value: rhs,
        };
        self.remove_statement(prev);
        Some(block)
    }

    /// `push x; x += 1`  =>  `push x++`
    pub(super) fn fold_post_increment(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Instruction { expr, push: 0 } = self.blocks[block].kind else {
            return None;
        };
        let Expression::Assign { target, op, value } = self.exprs[expr] else {
            return None;
        };
        let step = self.step(op, value)?;
        let prev = self.blocks.prev_statement(block)?;
        let (read, width) = self.pushed(prev)?;
        if !matches!(self.exprs[target], Expression::Local(_))
            || !self.same_place(read, target, false)
            || !self.removable(&[prev])
        {
            return None;
        }
        self.merge_places(target, read);
        let increment = self.exprs.alloc(Expression::Increment {
            target,
            op: step,
            prefix: false,
        });
        let new = self.instruction(increment, width);
        Some(self.replace_run(&[prev], block, new))
    }

    /// `push x; dup; x = FREE + 1`  =>  `push x++`. For fields and array elements the location
    /// operands are duplicated first: `push o; dup; push FREE.f; dup_x1; FREE.f = FREE + 1`.
    pub(super) fn fold_post_increment_through_dup(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Instruction { expr, push: 0 } = self.blocks[block].kind else {
            return None;
        };
        let Expression::Assign {
            target,
            op: None,
            value,
        } = self.exprs[expr]
        else {
            return None;
        };
        let Expression::BinOp { op, lhs, rhs } = self.exprs[value] else {
            return None;
        };
        let step = self.step(Some(op), rhs)?;
        let Expression::FreeOperand { width } = self.exprs[lhs] else {
            return None;
        };
        let skipped = self.exprs.free_operand_slots(target);
        if self.exprs.free_operands(expr).last() != Some(&lhs) {
            return None;
        }

        let run = self.preceding(block, if skipped == 0 { 2 } else { 3 })?;
        let [.., read, dup] = run[..] else {
            return None;
        };
        let BlockKind::Special(dup) = self.blocks[dup].kind else {
            return None;
        };
        if dup.dup_shape() != Some((width, skipped as u8)) {
            return None;
        }
        let (read, read_width) = self.pushed(read)?;
        if read_width != width || !self.same_place(read, target, true) {
            return None;
        }
        if skipped > 0 {
            let BlockKind::Special(location) = self.blocks[run[0]].kind else {
                return None;
            };
            if location.dup_shape() != Some((skipped as u8, 0)) {
                return None;
            }
        }
        if !self.removable(&run) {
            return None;
        }
        self.merge_places(target, read);
        let increment = self.exprs.alloc(Expression::Increment {
            target,
            op: step,
            prefix: false,
        });
        let new = self.instruction(increment, width);
        Some(self.replace_run(&run, block, new))
    }

    /// `x += 1; push x`  =>  `push ++x`, and `push (x += 1)`  =>  `push ++x`.
    pub(super) fn fold_pre_increment(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Instruction { expr, push } = self.blocks[block].kind else {
            return None;
        };
        if push == 0 {
            return None;
        }
        if let Expression::Assign { target, op, value } = self.exprs[expr] {
            let step = self.step(op, value)?;
            self.exprs[expr] = Expression::Increment {
                target,
                op: step,
                prefix: true,
            };
            return Some(block);
        }

        let Expression::Local(_) = self.exprs[expr] else {
            return None;
        };
        let prev = self.blocks.prev_statement(block)?;
        let update = self.statement_expr(prev)?;
        let Expression::Assign { target, op, value } = self.exprs[update] else {
            return None;
        };
        let step = self.step(op, value)?;
        if !self.same_place(expr, target, false) || !self.removable(&[prev]) {
            return None;
        }
        self.merge_places(target, expr);
        let increment = self.exprs.alloc(Expression::Increment {
            target,
            op: step,
            prefix: true,
        });
        let new = self.instruction(increment, push);
        Some(self.replace_run(&[prev], block, new))
    }
}

use crate::analysis::Analysis;
use crate::ast::{Constant, ExprId, Expression};
use crate::input::{InvokeKind, StackOp};
use crate::structured::{BlockId, BlockKind};
use rustc_hash::FxHashSet;

impl Analysis<'_> {
    /// `push v; op(.., FREE)`  =>  `op(.., v)`
    pub(super) fn create_expression(&mut self, block: BlockId) -> Option<BlockId> {
        let root = self.blocks[block].kind.operand_expr()?;
        let &leaf = self.exprs.free_operands(root).last()?;
        let prev = self.blocks.prev_statement(block)?;
        let (value, width) = self.pushed(prev)?;
        if self.exprs.free_width(leaf) != width || !self.removable(&[prev]) {
            return None;
        }
        if !self.exprs.is_pure(value) && !self.only_operands_before(root, leaf, value) {
            return None;
        }
        if !self.exprs.fill_last_free(root, value, width) {
            return None;
        }
        self.remove_statement(prev);
        Some(block)
    }

    /// Whether everything `root` evaluates before reaching `leaf` is unaffected by running
    /// `value` later than before.
    pub(crate) fn only_operands_before(&self, root: ExprId, leaf: ExprId, value: ExprId) -> bool {
        let mut writes_locals = false;
        self.exprs.visit(value, &mut |_, expr| {
            writes_locals |= matches!(
                expr,
                Expression::Assign { .. } | Expression::Increment { .. }
            );
        });

        // Assignment targets are written after their value, not read before it.
        let mut targets = FxHashSet::default();
        self.exprs.visit(root, &mut |_, expr| {
            if let Expression::Assign { target, .. } = expr {
                targets.insert(*target);
            }
        });

        let mut reached = false;
        let mut ok = true;
        self.exprs.visit(root, &mut |id, expr| {
            reached |= id == leaf;
            if reached || targets.contains(&id) {
                return;
            }
            ok &= match expr {
                Expression::FreeOperand { .. } | Expression::Const(_) => true,
                Expression::Local(_) => !writes_locals,
                _ => self.exprs.contains(id, leaf),
            };
        });
        ok
    }

    /// `push new T; dup; T.<init>(FREE, args)`  =>  `push new T(args)`
    pub(super) fn fold_constructor(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Instruction { expr, push: 0 } = self.blocks[block].kind else {
            return None;
        };
        let Expression::Call {
            kind: InvokeKind::Special,
            class,
            name,
            descriptor,
            object: Some(object),
            ref arguments,
        } = self.exprs[expr]
        else {
            return None;
        };
        if !name.is_constructor_name() {
            return None;
        }
        let arguments = arguments.clone();

        // `new T(args);` with the result discarded.
        if let Expression::NewUninitialized { class: created } = self.exprs[object] {
            if created != class || self.exprs.free_operand_count(expr) != 0 {
                return None;
            }
            let constructed = self.exprs.alloc(Expression::Constructor {
                class,
                descriptor,
                arguments,
            });
            let new = self.instruction(constructed, 0);
            return Some(self.replace_run(&[], block, new));
        }

        if self.exprs.free_operands(expr) != [object] {
            return None;
        }
        let run = self.preceding(block, 2)?;
        let BlockKind::Special(StackOp::Dup) = self.blocks[run[1]].kind else {
            return None;
        };
        let (created, _) = self.pushed(run[0])?;
        match self.exprs[created] {
            Expression::NewUninitialized { class: created } if created == class => {}
            _ => return None,
        }
        if !self.removable(&run) {
            return None;
        }
        let constructed = self.exprs.alloc(Expression::Constructor {
            class,
            descriptor,
            arguments,
        });
        let new = self.instruction(constructed, 1);
        Some(self.replace_run(&run, block, new))
    }

    /// `push new T[n]; dup; FREE[i] = v`  =>  `push new T[] { .., v }`, while the stores fill the
    /// array in index order.
    pub(super) fn fold_array_literal(&mut self, block: BlockId) -> Option<BlockId> {
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
        let Expression::ArrayElement { array, index } = self.exprs[target] else {
            return None;
        };
        let Expression::Const(Constant::Int(index)) = self.exprs[index] else {
            return None;
        };
        if self.exprs.free_operands(expr) != [array] {
            return None;
        }
        let run = self.preceding(block, 2)?;
        let BlockKind::Special(StackOp::Dup) = self.blocks[run[1]].kind else {
            return None;
        };
        let (created, _) = self.pushed(run[0])?;
        let (element, length, mut values) = match self.exprs[created] {
            Expression::NewArray {
                element,
                ref lengths,
            } => match lengths[..] {
                [length] => match self.exprs[length] {
                    Expression::Const(Constant::Int(length)) => (element, length, Vec::new()),
                    _ => return None,
                },
                _ => return None,
            },
            Expression::ArrayLiteral {
                element,
                length,
                ref values,
            } => (element, length, values.clone()),
            _ => return None,
        };
        if usize::try_from(index).ok() != Some(values.len()) || index >= length {
            return None;
        }
        if !self.removable(&run) {
            return None;
        }
        values.push(value);
        let literal = self.exprs.alloc(Expression::ArrayLiteral {
            element,
            length,
            values,
        });
        let new = self.instruction(literal, 1);
        Some(self.replace_run(&run, block, new))
    }
}

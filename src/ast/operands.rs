use super::{Arena, CompareOp, Constant, ExprId, Expression};
use crate::variables::{LocalId, Locals};

impl<'code> Arena<'code> {
    /// Calls `f` on every node of the tree in evaluation order, parents before children.
    pub fn visit(&self, root: ExprId, f: &mut impl FnMut(ExprId, &Expression<'code>)) {
        f(root, &self[root]);
        for child in self[root].subexprs() {
            self.visit(child, f);
        }
    }

    /// Free operand leaves in evaluation order. The last one reads the top of the stack.
    pub fn free_operands(&self, root: ExprId) -> Vec<ExprId> {
        let mut out = Vec::new();
        self.visit(root, &mut |id, expr| {
            if let Expression::FreeOperand { .. } = expr {
                out.push(id);
            }
        });
        out
    }

    pub fn free_operand_count(&self, root: ExprId) -> usize {
        self.free_operands(root).len()
    }

    pub fn free_operand_slots(&self, root: ExprId) -> usize {
        self.free_operands(root)
            .into_iter()
            .map(|id| self.free_width(id) as usize)
            .sum()
    }

    pub fn free_width(&self, id: ExprId) -> u8 {
        match self[id] {
            Expression::FreeOperand { width } => width,
            _ => 0,
        }
    }

    /// Replaces the last free operand of `root` with the expression `value` of the given width.
    /// Nothing is modified if there is no such operand or its width differs.
    pub fn fill_last_free(&mut self, root: ExprId, value: ExprId, width: u8) -> bool {
        let Some(&leaf) = self.free_operands(root).last() else {
            return false;
        };
        if self.free_width(leaf) != width {
            return false;
        }
        self[leaf] = self[value].clone();
        self.simplify_conditions(root);
        true
    }

    /// Folds comparisons with zero whose left side is a three-way comparison or already a boolean.
    pub fn simplify_conditions(&mut self, root: ExprId) {
        let children: Vec<ExprId> = self[root].subexprs().collect();
        for child in children {
            self.simplify_conditions(child);
        }
        let Expression::Compare { op, lhs, rhs } = self[root] else {
            return;
        };
        if !matches!(self[rhs], Expression::Const(Constant::Int(0))) {
            return;
        }
        match self[lhs] {
            Expression::ThreeWay { lhs, rhs, .. } => {
                self[root] = Expression::Compare { op, lhs, rhs };
            }
            _ if self[lhs].is_boolean() && matches!(op, CompareOp::Eq | CompareOp::Ne) => {
                self[root] = if op == CompareOp::Ne {
                    self[lhs].clone()
                } else {
                    Expression::Not { value: lhs }
                };
            }
            _ => {}
        }
    }

    /// Builds the logical negation of a condition, reusing its operands.
    pub fn negate(&mut self, cond: ExprId) -> ExprId {
        match self[cond].clone() {
            Expression::Compare { op, lhs, rhs } => self.alloc(Expression::Compare {
                op: op.negate(),
                lhs,
                rhs,
            }),
            Expression::Not { value } => value,
            Expression::Logical { op, lhs, rhs } => {
                let lhs = self.negate(lhs);
                let rhs = self.negate(rhs);
                self.alloc(Expression::Logical {
                    op: op.dual(),
                    lhs,
                    rhs,
                })
            }
            Expression::Const(Constant::Bool(value)) => self.bool(!value),
            _ => self.alloc(Expression::Not { value: cond }),
        }
    }

    /// Evaluating the expression has no side effects and cannot throw.
    pub fn is_pure(&self, root: ExprId) -> bool {
        let mut pure = true;
        self.visit(root, &mut |_, expr| {
            pure &= match expr {
                Expression::FreeOperand { .. }
                | Expression::Local(_)
                | Expression::Const(_)
                | Expression::Convert { .. }
                | Expression::Negate { .. }
                | Expression::Not { .. }
                | Expression::Compare { .. }
                | Expression::ThreeWay { .. }
                | Expression::Logical { .. }
                | Expression::Ternary { .. } => true,
                Expression::BinOp { op, .. } => !op.can_throw(),
                _ => false,
            };
        });
        pure
    }

    pub fn is_constant(&self, id: ExprId) -> bool {
        matches!(self[id], Expression::Const(_))
    }

    pub fn contains(&self, root: ExprId, needle: ExprId) -> bool {
        let mut found = false;
        self.visit(root, &mut |id, _| found |= id == needle);
        found
    }

    /// Locals mentioned anywhere in the tree, in evaluation order.
    pub fn locals_in(&self, root: ExprId) -> Vec<LocalId> {
        let mut out = Vec::new();
        self.visit(root, &mut |_, expr| {
            if let Expression::Local(local) = expr {
                out.push(*local);
            }
        });
        out
    }

    pub fn reads_slot(&self, root: ExprId, slot: u16, locals: &Locals) -> bool {
        self.locals_in(root)
            .into_iter()
            .any(|local| locals.slot(local) == Some(slot))
    }

    /// The slot of a local variable expression.
    pub fn local_slot(&self, id: ExprId, locals: &Locals) -> Option<u16> {
        self[id].as_local().and_then(|local| locals.slot(local))
    }

    /// Rewrites the child pointer `old` to `new` somewhere below `root`.
    pub fn replace_subexpr(&mut self, root: ExprId, old: ExprId, new: ExprId) -> bool {
        let children: Vec<ExprId> = self[root].subexprs().collect();
        if children.contains(&old) {
            for child in self[root].subexprs_mut() {
                if *child == old {
                    *child = new;
                }
            }
            return true;
        }
        children
            .into_iter()
            .any(|child| self.replace_subexpr(child, old, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, LogicalOp};

    #[test]
    fn fills_from_the_top() {
        let mut arena = Arena::new();
        let lhs = arena.free(1);
        let rhs = arena.free(1);
        let sum = arena.alloc(Expression::BinOp {
            op: BinOp::Add,
            lhs,
            rhs,
        });
        let one = arena.int(1);
        let two = arena.int(2);
        assert!(arena.fill_last_free(sum, two, 1));
        assert!(matches!(arena[rhs], Expression::Const(Constant::Int(2))));
        assert_eq!(arena.free_operand_count(sum), 1);
        assert!(!arena.fill_last_free(sum, one, 2));
        assert!(arena.fill_last_free(sum, one, 1));
        assert_eq!(arena.free_operand_count(sum), 0);
        assert!(!arena.fill_last_free(sum, one, 1));
    }

    #[test]
    fn three_way_compare_folds() {
        let mut arena = Arena::new();
        let free = arena.free(1);
        let zero = arena.int(0);
        let cond = arena.alloc(Expression::Compare {
            op: CompareOp::Lt,
            lhs: free,
            rhs: zero,
        });
        let a = arena.int(3);
        let b = arena.int(4);
        let cmp = arena.alloc(Expression::ThreeWay {
            lhs: a,
            rhs: b,
            nan_greater: false,
        });
        assert!(arena.fill_last_free(cond, cmp, 1));
        match arena[cond] {
            Expression::Compare {
                op: CompareOp::Lt,
                lhs,
                rhs,
            } => assert_eq!((lhs, rhs), (a, b)),
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negation_applies_de_morgan() {
        let mut arena = Arena::new();
        let a = arena.int(1);
        let b = arena.int(2);
        let lt = arena.alloc(Expression::Compare {
            op: CompareOp::Lt,
            lhs: a,
            rhs: b,
        });
        let flag = arena.bool(true);
        let both = arena.alloc(Expression::Logical {
            op: LogicalOp::And,
            lhs: lt,
            rhs: flag,
        });
        let negated = arena.negate(both);
        let Expression::Logical {
            op: LogicalOp::Or,
            lhs,
            rhs,
        } = arena[negated]
        else {
            panic!("expected ||");
        };
        assert!(matches!(
            arena[lhs],
            Expression::Compare {
                op: CompareOp::Ge,
                ..
            }
        ));
        assert!(matches!(arena[rhs], Expression::Const(Constant::Bool(false))));
        assert!(arena.is_pure(negated));
    }
}

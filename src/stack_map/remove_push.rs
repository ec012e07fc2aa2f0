use crate::analysis::Analysis;
use crate::ast::{ExprId, Expression};
use crate::structured::{BlockId, BlockKind};
use crate::variables::{LocalId, LocalKind};
use log::trace;
use std::collections::BTreeMap;

/// `s = value;` assigning a stack local.
struct Def {
    block: BlockId,
    value: ExprId,
}

/// A read of a stack local inside the expression `root` of `block`.
struct Use {
    block: BlockId,
    root: ExprId,
    leaf: ExprId,
}

#[derive(Default)]
struct Class {
    defs: Vec<Def>,
    uses: Vec<Use>,
}

impl Analysis<'_> {
    /// Inlines stack locals assigned once and read once by the next statement, and drops the ones
    /// never read.
    pub(crate) fn remove_push(&mut self) {
        while self.remove_one_push() {}
    }

    fn remove_one_push(&mut self) -> bool {
        let classes = self.stack_classes();
        for (class, Class { defs, uses }) in classes {
            let [def] = &defs[..] else {
                continue;
            };
            match &uses[..] {
                [] => {
                    trace!("unused stack value {class:?}");
                    self.drop_def(def);
                    return true;
                }
                [user] if self.can_inline(def, user) => {
                    trace!("inlining stack value {class:?}");
                    self.exprs[user.leaf] = self.exprs[def.value].clone();
                    self.remove_statement(def.block);
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    fn stack_classes(&self) -> BTreeMap<LocalId, Class> {
        let root = self.graph[self.entry].block;
        let mut classes: BTreeMap<LocalId, Class> = BTreeMap::new();
        let mut targets = Vec::new();

        let blocks = self.blocks.subtree(root);
        for &block in &blocks {
            let BlockKind::Instruction { expr, push: 0 } = self.blocks[block].kind else {
                continue;
            };
            let Expression::Assign {
                target,
                op: None,
                value,
            } = self.exprs[expr]
            else {
                continue;
            };
            let Some(local) = self.stack_local(target) else {
                continue;
            };
            targets.push(target);
            classes
                .entry(self.locals.class(local))
                .or_default()
                .defs
                .push(Def { block, value });
        }

        for &block in &blocks {
            for root in self.blocks[block].kind.exprs() {
                self.exprs.visit(root, &mut |leaf, expr| {
                    let Expression::Local(local) = *expr else {
                        return;
                    };
                    if self.locals.kind(local) != LocalKind::Stack || targets.contains(&leaf) {
                        return;
                    }
                    classes
                        .entry(self.locals.class(local))
                        .or_default()
                        .uses
                        .push(Use { block, root, leaf });
                });
            }
        }
        classes
    }

    fn stack_local(&self, expr: ExprId) -> Option<LocalId> {
        let local = self.exprs[expr].as_local()?;
        (self.locals.kind(local) == LocalKind::Stack).then_some(local)
    }

    fn can_inline(&self, def: &Def, user: &Use) -> bool {
        if self.blocks.prev_statement(user.block) != Some(def.block)
            || !self.removable(&[def.block])
            || matches!(self.blocks[user.block].kind, BlockKind::Loop { .. })
        {
            return false;
        }
        self.exprs.is_pure(def.value) || self.only_operands_before(user.root, user.leaf, def.value)
    }

    fn drop_def(&mut self, def: &Def) {
        if !self.exprs.is_pure(def.value) {
            self.blocks[def.block].kind = BlockKind::Instruction {
                expr: def.value,
                push: 0,
            };
        } else if self.removable(&[def.block]) {
            self.remove_statement(def.block);
        } else {
            self.blocks[def.block].kind = BlockKind::Empty;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::Analysis;
    use crate::ast::{BinOp, Constant, Expression};
    use crate::options::{AnalysisOptions, Fuel};
    use crate::structured::{BlockId, BlockKind};
    use crate::variables::LocalKind;

    fn chain(analysis: &mut Analysis<'static>, kinds: Vec<BlockKind<'static>>) -> BlockId {
        let blocks: Vec<BlockId> = kinds.into_iter().map(|kind| analysis.alloc(kind)).collect();
        let root = blocks[0];
        let flow = analysis.graph.add_flow(0, 1, root);
        analysis.entry = flow;
        let mut tail = root;
        for &block in &blocks[1..] {
            analysis.wrap_sequential(tail, block);
            tail = block;
        }
        analysis.graph[flow].block
    }

    #[test]
    fn single_reads_are_inlined() {
        let mut analysis = Analysis::new(AnalysisOptions::default(), Fuel::new(100));
        let one = analysis.exprs.int(1);
        let two = analysis.exprs.int(2);
        let lhs = analysis.exprs.free(1);
        let rhs = analysis.exprs.free(1);
        let sum = analysis.exprs.alloc(Expression::BinOp {
            op: BinOp::Add,
            lhs,
            rhs,
        });
        chain(
            &mut analysis,
            vec![
                BlockKind::Instruction { expr: one, push: 1 },
                BlockKind::Instruction { expr: two, push: 1 },
                BlockKind::Return { value: Some(sum) },
            ],
        );
        analysis.map_stack().unwrap();
        analysis.remove_push();

        let root = analysis.graph[analysis.entry].block;
        let BlockKind::Return { value: Some(value) } = analysis.blocks[root].kind else {
            panic!("expected a lone return, got {:?}", analysis.blocks[root].kind);
        };
        assert_eq!(value, sum);
        assert!(matches!(analysis.exprs[lhs], Expression::Const(Constant::Int(1))));
        assert!(matches!(analysis.exprs[rhs], Expression::Const(Constant::Int(2))));
    }

    #[test]
    fn unread_side_effects_become_statements() {
        let mut analysis = Analysis::new(AnalysisOptions::default(), Fuel::new(100));
        let slot = analysis.locals.new_slot(LocalKind::Slot, 1);
        let target = analysis.exprs.local(slot);
        let five = analysis.exprs.int(5);
        let store = analysis.exprs.alloc(Expression::Assign {
            target,
            op: None,
            value: five,
        });
        chain(
            &mut analysis,
            vec![
                BlockKind::Instruction {
                    expr: store,
                    push: 1,
                },
                BlockKind::Return { value: None },
            ],
        );
        analysis.map_stack().unwrap();
        analysis.remove_push();

        let root = analysis.graph[analysis.entry].block;
        let BlockKind::Sequential { first, .. } = analysis.blocks[root].kind else {
            panic!("statement vanished");
        };
        assert!(matches!(
            analysis.blocks[first].kind,
            BlockKind::Instruction { expr, push: 0 } if expr == store
        ));
    }
}

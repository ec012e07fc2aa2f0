//! Decides where each local is declared: at the innermost block enclosing all of its uses.

use crate::analysis::Analysis;
use crate::ast::Expression;
use crate::structured::{BlockId, BlockKind};
use crate::variables::{LocalId, LocalKind, VariableSet};
use std::collections::BTreeMap;

impl Analysis<'_> {
    /// Fills the `declare` sets of the method tree. Parameters and caught exceptions are bound by
    /// the method and catch headers and get no declaration.
    pub(crate) fn place_declarations(&mut self) {
        let root = self.graph[self.entry].block;
        let mut seen: BTreeMap<LocalId, Vec<BlockId>> = BTreeMap::new();
        let mut bound = Vec::new();

        for block in self.blocks.subtree(root) {
            self.blocks[block].declare = VariableSet::new();
            let mut found = Vec::new();
            match self.blocks[block].kind {
                BlockKind::Catch {
                    local: Some(local), ..
                } => bound.push(self.locals.class(local)),
                BlockKind::Synchronized {
                    local,
                    object: None,
                    ..
                }
                | BlockKind::Ret { local } => found.push(local),
                _ => {}
            }
            for expr in self.blocks[block].kind.exprs() {
                self.exprs.visit(expr, &mut |_, expr| {
                    if let Expression::Local(local) = *expr {
                        found.push(local);
                    }
                });
            }
            for local in found {
                let class = self.locals.class(local);
                let blocks = seen.entry(class).or_default();
                if !blocks.contains(&block) {
                    blocks.push(block);
                }
            }
        }

        for (class, blocks) in seen {
            if bound.contains(&class)
                || matches!(
                    self.locals.kind(class),
                    LocalKind::Parameter | LocalKind::This
                )
            {
                continue;
            }
            let Some(scope) = blocks
                .into_iter()
                .reduce(|a, b| self.common_ancestor(a, b))
            else {
                continue;
            };
            self.blocks[scope].declare.add(class);
        }
    }

    fn common_ancestor(&self, a: BlockId, b: BlockId) -> BlockId {
        core::iter::once(a)
            .chain(self.blocks.ancestors(a))
            .find(|&candidate| self.blocks.is_within(b, candidate))
            .unwrap_or(a)
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::Analysis;
    use crate::ast::Expression;
    use crate::options::{AnalysisOptions, Fuel};
    use crate::structured::BlockKind;
    use crate::variables::LocalKind;

    #[test]
    fn declared_where_all_uses_meet() {
        let mut analysis = Analysis::new(AnalysisOptions::default(), Fuel::new(100));
        let first = analysis.locals.new_slot(LocalKind::Slot, 1);
        let second = analysis.locals.new_slot(LocalKind::Slot, 1);
        analysis.locals.merge(first, second);
        let param = analysis.locals.new_slot(LocalKind::Parameter, 0);

        let target = analysis.exprs.local(first);
        let value = analysis.exprs.local(param);
        let store = analysis.exprs.alloc(Expression::Assign {
            target,
            op: None,
            value,
        });
        let store = analysis.alloc(BlockKind::Instruction {
            expr: store,
            push: 0,
        });
        let read = analysis.exprs.local(second);
        let ret = analysis.alloc(BlockKind::Return { value: Some(read) });
        let flow = analysis.graph.add_flow(0, 1, store);
        analysis.entry = flow;
        let seq = analysis.wrap_sequential(store, ret);

        analysis.place_declarations();
        assert!(analysis.blocks[seq].declare.contains(analysis.locals.class(first)));
        assert_eq!(analysis.blocks[seq].declare.len(), 1);
        assert!(analysis.blocks[store].declare.is_empty());
    }
}

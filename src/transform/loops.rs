use crate::analysis::Analysis;
use crate::ast::Expression;
use crate::structured::{BlockId, BlockKind, LoopKind};

impl Analysis<'_> {
    /// `i = 0; while (i < n) { ..; i++ }`  =>  `for (i = 0; i < n; i++) { .. }`
    pub(super) fn fold_for_initializer(&mut self, block: BlockId) -> Option<BlockId> {
        let BlockKind::Loop {
            kind: LoopKind::PossFor,
            cond,
            incr: Some(incr),
            ..
        } = self.blocks[block].kind
        else {
            return None;
        };
        let prev = self.blocks.prev_statement(block)?;
        let init = self.statement_expr(prev)?;
        let Expression::Assign {
            target, op: None, ..
        } = self.exprs[init]
        else {
            return None;
        };
        let slot = self.exprs.local_slot(target, &self.locals)?;
        let BlockKind::Instruction { expr: update, .. } = self.blocks[incr].kind else {
            return None;
        };
        let updated = match self.exprs[update] {
            Expression::Assign { target, .. } | Expression::Increment { target, .. } => target,
            _ => return None,
        };
        if self.exprs.local_slot(updated, &self.locals) != Some(slot)
            || !self.exprs.reads_slot(cond, slot, &self.locals)
            || self.exprs.free_operand_count(init) != 0
            || !self.removable(&[prev])
        {
            return None;
        }
        self.remove_statement(prev);
        if let BlockKind::Loop { kind, init: initializer, .. } = &mut self.blocks[block].kind {
            *kind = LoopKind::For;
            *initializer = Some(init);
        }
        Some(block)
    }

    /// Turns every remaining possible for loop back into a while loop, putting the increment
    /// back at the end of the body.
    pub(crate) fn downgrade_possible_for(&mut self, root: BlockId) {
        for block in self.blocks.subtree(root) {
            let BlockKind::Loop {
                kind: LoopKind::PossFor,
                incr: Some(incr),
                body,
                ..
            } = self.blocks[block].kind
            else {
                continue;
            };
            self.blocks[incr].outer = None;
            let tail = self.blocks.chain_tail(body);
            self.wrap_sequential(tail, incr);
            if let BlockKind::Loop { kind, incr, .. } = &mut self.blocks[block].kind {
                *kind = LoopKind::While;
                *incr = None;
            }
        }
    }
}

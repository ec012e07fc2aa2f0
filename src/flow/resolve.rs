use super::{FlowId, JumpId};
use crate::analysis::Analysis;
use crate::structured::{BlockId, BlockKind, LoopKind};
use log::trace;

impl Analysis<'_> {
    /// Whether completing `block` completes the whole tree of `flow` without taking a jump.
    pub(crate) fn falls_to_end(&self, flow: FlowId, block: BlockId) -> bool {
        let root = self.graph[flow].block;
        self.blocks.falls_to_end_of(block, root)
            && (block == root || self.blocks[root].jump.is_none())
    }

    /// Turns every jump from `flow` to `succ` into structure, so that `succ`'s tree can be appended
    /// after `flow`'s. Jumps no rule handles become breaks out of a `do { } while (false)` wrapper.
    pub(super) fn resolve_jumps_to(&mut self, flow: FlowId, succ: FlowId) {
        let mut pending = self.graph.jumps_to(flow, succ);
        loop {
            let before = pending.len();
            pending.retain(|&jump| !self.resolve_jump(flow, succ, jump));
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }

        if pending.is_empty() && !self.tail_exits(flow) {
            return;
        }
        let wrapper = self.wrap_in_breakable(flow);
        trace!("Wrapping {flow:?} in do/while(false) for {} jumps", pending.len());
        for jump in pending {
            let prev = self.graph[jump].prev;
            let labeled = self.blocks.innermost_breakable(prev) != Some(wrapper);
            if labeled {
                self.set_labeled(wrapper);
            }
            let brk = self.alloc(BlockKind::Break {
                target: wrapper,
                labeled,
            });
            self.replace_jump_with(flow, jump, brk);
        }
    }

    fn resolve_jump(&mut self, flow: FlowId, succ: FlowId, jump: JumpId) -> bool {
        let prev = self.graph[jump].prev;

        if self.falls_to_end(flow, prev) {
            self.remove_jump(flow, jump);
            self.drop_if_empty(prev);
            return true;
        }

        let Some(parent) = self.blocks[prev].outer else {
            return false;
        };
        if let BlockKind::Conditional { cond, trueblock } = self.blocks[parent].kind
            && trueblock == prev
            && matches!(self.blocks[prev].kind, BlockKind::Empty)
        {
            // if (c) goto succ; goto X;  =>  if (!c) goto X;
            if let Some(own) = self.blocks[parent].jump
                && self.graph[own].destination != succ
                && self.falls_to_end(flow, parent)
            {
                self.remove_jump(flow, jump);
                self.move_jump(parent, prev);
                let negated = self.exprs.negate(cond);
                self.set_condition(parent, negated);
                return true;
            }

            // if (c) goto succ; R  =>  if (!c) { R }
            if let Some(seq) = self.blocks[parent].outer
                && let BlockKind::Sequential { first, second } = self.blocks[seq].kind
                && first == parent
                && self.blocks[seq].jump.is_none()
                && self.falls_to_end(flow, seq)
            {
                self.remove_jump(flow, jump);
                let negated = self.exprs.negate(cond);
                let place = self.place_of(seq);
                self.blocks[second].outer = None;
                let ite = self.alloc(BlockKind::IfThenElse {
                    cond: negated,
                    then: second,
                    else_: None,
                });
                self.put(place, seq, ite);
                self.retarget_last_modified(&[seq, parent, prev], ite);
                return true;
            }
        }

        if self.convert_to_else(flow, jump) {
            return true;
        }

        self.break_to_successor(flow, succ, jump)
    }

    /// `if (c) { A; goto succ } R`  =>  `if (c) { A } else { R }`
    fn convert_to_else(&mut self, flow: FlowId, jump: JumpId) -> bool {
        let prev = self.graph[jump].prev;
        let Some(ite) = self.blocks.ancestors(prev).find(|&b| {
            matches!(
                self.blocks[b].kind,
                BlockKind::IfThenElse { else_: None, .. }
            )
        }) else {
            return false;
        };
        let BlockKind::IfThenElse { then, .. } = self.blocks[ite].kind else {
            return false;
        };
        if self.blocks.chain_tail(then) != prev || !self.blocks.falls_to_end_of(prev, then) {
            return false;
        }
        let Some(seq) = self.blocks[ite].outer else {
            return false;
        };
        let BlockKind::Sequential { first, second } = self.blocks[seq].kind else {
            return false;
        };
        if first != ite || self.blocks[seq].jump.is_some() || !self.falls_to_end(flow, seq) {
            return false;
        }

        self.remove_jump(flow, jump);
        self.drop_if_empty(prev);
        let place = self.place_of(seq);
        if let BlockKind::IfThenElse { else_, .. } = &mut self.blocks[ite].kind {
            *else_ = Some(second);
        }
        self.blocks[second].outer = Some(ite);
        self.put(place, seq, ite);
        self.retarget_last_modified(&[seq], ite);
        true
    }

    /// Replaces the jump by a break out of the innermost breakable block that continues at
    /// `succ`.
    fn break_to_successor(&mut self, flow: FlowId, succ: FlowId, jump: JumpId) -> bool {
        let prev = self.graph[jump].prev;
        let innermost = self.blocks.innermost_breakable(prev);
        let target = self
            .blocks
            .ancestors(prev)
            .filter(|&b| self.blocks[b].kind.is_breakable())
            .find(|&b| match self.blocks[b].jump {
                Some(own) => self.graph[own].destination == succ,
                None => self.falls_to_end(flow, b),
            });
        let Some(target) = target else {
            return false;
        };
        let labeled = innermost != Some(target);
        if labeled {
            self.set_labeled(target);
        }
        let brk = self.alloc(BlockKind::Break { target, labeled });
        self.replace_jump_with(flow, jump, brk);
        true
    }

    /// Whether some block on the spine of the root chain leaves through a jump.
    fn tail_exits(&self, flow: FlowId) -> bool {
        let mut current = self.graph[flow].block;
        loop {
            if self.blocks[current].jump.is_some() {
                return true;
            }
            match self.blocks[current].kind {
                BlockKind::Sequential { second, .. } => current = second,
                _ => return false,
            }
        }
    }

    pub(crate) fn wrap_in_breakable(&mut self, flow: FlowId) -> BlockId {
        let root = self.graph[flow].block;
        let cond = self.exprs.bool(false);
        let wrapper = self.alloc(BlockKind::Loop {
            kind: LoopKind::DoWhile,
            cond,
            init: None,
            incr: None,
            body: root,
            labeled: false,
        });
        self.graph[flow].block = wrapper;
        self.graph[flow].last_modified = wrapper;
        wrapper
    }

    pub(crate) fn set_labeled(&mut self, breakable: BlockId) {
        match &mut self.blocks[breakable].kind {
            BlockKind::Loop { labeled, .. } | BlockKind::Switch { labeled, .. } => *labeled = true,
            _ => {}
        }
    }

    pub(crate) fn set_condition(&mut self, block: BlockId, new: crate::ast::ExprId) {
        match &mut self.blocks[block].kind {
            BlockKind::Conditional { cond, .. }
            | BlockKind::IfThenElse { cond, .. }
            | BlockKind::Loop { cond, .. } => *cond = new,
            _ => {}
        }
    }

    /// Drops an empty statement left behind by a removed jump.
    pub(crate) fn drop_if_empty(&mut self, block: BlockId) {
        if matches!(self.blocks[block].kind, BlockKind::Empty)
            && self.blocks[block].jump.is_none()
            && self.can_remove_statement(block)
        {
            self.remove_statement(block);
        }
    }

    pub(crate) fn retarget_last_modified(&mut self, old: &[BlockId], new: BlockId) {
        for flow in self.graph.live_flows() {
            if old.contains(&self.graph[flow].last_modified) {
                self.graph[flow].last_modified = new;
            }
        }
    }
}

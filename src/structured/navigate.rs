use super::{BlockId, BlockKind, Blocks};

impl Blocks<'_> {
    /// Strict ancestors, innermost first.
    pub fn ancestors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        core::iter::successors(self[block].outer, |&b| self[b].outer)
    }

    pub fn is_within(&self, block: BlockId, ancestor: BlockId) -> bool {
        block == ancestor || self.ancestors(block).any(|b| b == ancestor)
    }

    pub fn root_of(&self, block: BlockId) -> BlockId {
        self.ancestors(block).last().unwrap_or(block)
    }

    /// Whether completing `child` normally completes `parent`.
    pub fn completes_parent(&self, parent: BlockId, child: BlockId) -> bool {
        match &self[parent].kind {
            BlockKind::Sequential { second, .. } => *second == child,
            BlockKind::Switch { cases, .. } => cases.last() == Some(&child),
            BlockKind::IfThenElse { .. }
            | BlockKind::Conditional { .. }
            | BlockKind::Case { .. }
            | BlockKind::Try { .. }
            | BlockKind::Catch { .. }
            | BlockKind::Finally { .. }
            | BlockKind::Synchronized { .. } => true,
            // A loop body loops back, a subroutine call returns to the caller.
            _ => false,
        }
    }

    /// Whether completing `block` (ignoring its own jump) reaches the end of `ancestor`. Jumps on
    /// the blocks in between would be taken first, so they make this false.
    pub fn falls_to_end_of(&self, block: BlockId, ancestor: BlockId) -> bool {
        let mut current = block;
        while current != ancestor {
            let Some(parent) = self[current].outer else {
                return false;
            };
            if !self.completes_parent(parent, current) {
                return false;
            }
            if parent != ancestor && self[parent].jump.is_some() {
                return false;
            }
            current = parent;
        }
        true
    }

    /// Statements of the sequential chain starting at `block`.
    pub fn chain(&self, block: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut current = block;
        while let BlockKind::Sequential { first, second } = self[current].kind {
            out.push(first);
            current = second;
        }
        out.push(current);
        out
    }

    pub fn chain_tail(&self, block: BlockId) -> BlockId {
        let mut current = block;
        while let BlockKind::Sequential { second, .. } = self[current].kind {
            current = second;
        }
        current
    }

    /// The statement executed right before `block` in its sequential chain.
    pub fn prev_statement(&self, block: BlockId) -> Option<BlockId> {
        let parent = self[block].outer?;
        let BlockKind::Sequential { first, second } = self[parent].kind else {
            return None;
        };
        if second == block {
            return Some(first);
        }
        let grandparent = self[parent].outer?;
        match self[grandparent].kind {
            BlockKind::Sequential { first, second } if second == parent => Some(first),
            _ => None,
        }
    }

    /// The statement executed right after `block` in its sequential chain.
    pub fn next_statement(&self, block: BlockId) -> Option<BlockId> {
        let parent = self[block].outer?;
        let BlockKind::Sequential { first, second } = self[parent].kind else {
            return None;
        };
        if first != block {
            return None;
        }
        Some(match self[second].kind {
            BlockKind::Sequential { first, .. } => first,
            _ => second,
        })
    }

    pub fn innermost_breakable(&self, block: BlockId) -> Option<BlockId> {
        self.ancestors(block)
            .find(|&b| self[b].kind.is_breakable())
    }

    pub fn innermost_loop(&self, block: BlockId) -> Option<BlockId> {
        self.ancestors(block)
            .find(|&b| matches!(self[b].kind, BlockKind::Loop { .. }))
    }

    /// All blocks of the subtree in pre-order.
    pub fn subtree(&self, block: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack = vec![block];
        while let Some(b) = stack.pop() {
            out.push(b);
            stack.extend(self[b].kind.children().into_iter().rev());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structured::LoopKind;

    fn leaf(blocks: &mut Blocks<'_>) -> BlockId {
        blocks.alloc(BlockKind::Description(String::new()))
    }

    #[test]
    fn chains_are_right_leaning() {
        let mut blocks = Blocks::new();
        let (a, b, c) = (leaf(&mut blocks), leaf(&mut blocks), leaf(&mut blocks));
        let inner = blocks.alloc(BlockKind::Sequential {
            first: b,
            second: c,
        });
        let outer = blocks.alloc(BlockKind::Sequential {
            first: a,
            second: inner,
        });
        assert_eq!(blocks.chain(outer), vec![a, b, c]);
        assert_eq!(blocks.chain_tail(outer), c);
        assert_eq!(blocks.prev_statement(c), Some(b));
        assert_eq!(blocks.prev_statement(b), Some(a));
        assert_eq!(blocks.prev_statement(a), None);
        assert_eq!(blocks.next_statement(a), Some(b));
        assert_eq!(blocks.next_statement(b), Some(c));
        assert_eq!(blocks.next_statement(c), None);
        assert!(blocks.falls_to_end_of(c, outer));
        assert!(!blocks.falls_to_end_of(b, outer));
        assert_eq!(blocks.root_of(c), outer);
        assert_eq!(blocks.subtree(outer), vec![outer, a, inner, b, c]);
    }

    #[test]
    fn loop_bodies_do_not_fall_out() {
        let mut blocks = Blocks::new();
        let body = leaf(&mut blocks);
        let cond = crate::ast::Arena::new().bool(true);
        let looped = blocks.alloc(BlockKind::Loop {
            kind: LoopKind::While,
            cond,
            init: None,
            incr: None,
            body,
            labeled: false,
        });
        assert!(!blocks.falls_to_end_of(body, looped));
        assert_eq!(blocks.innermost_breakable(body), Some(looped));
        assert_eq!(blocks.innermost_loop(looped), None);
    }
}

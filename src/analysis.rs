//! Per-method analysis state and the tree edits shared by every stage.

use crate::ast::Arena;
use crate::flow::{ConsistencyError, FlowGraph, FlowId, JumpId};
use crate::options::{AnalysisOptions, Fuel};
use crate::structured::{BlockId, BlockKind, Blocks};
use crate::variables::{LocalId, Locals};

pub struct Analysis<'code> {
    pub exprs: Arena<'code>,
    pub blocks: Blocks<'code>,
    pub locals: Locals,
    pub graph: FlowGraph,
    pub options: AnalysisOptions,
    pub fuel: Fuel,
    pub entry: FlowId,
    /// Locals bound to the incoming arguments, `this` first.
    pub parameters: Vec<LocalId>,
    pub returns_void: bool,
    /// Number of successful rule applications so far.
    pub rewrites: usize,
    /// First failed consistency check; stops the reduction.
    pub broken: Option<ConsistencyError>,
}

/// Where a block hangs in the forest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Place {
    Child(BlockId),
    Root(FlowId),
    Detached,
}

impl<'code> Analysis<'code> {
    pub fn new(options: AnalysisOptions, fuel: Fuel) -> Self {
        let mut blocks = Blocks::new();
        let graph = FlowGraph::new(&mut blocks);
        Self {
            exprs: Arena::new(),
            blocks,
            locals: Locals::new(),
            graph,
            options,
            fuel,
            entry: FlowId::METHOD_ENTRY,
            parameters: Vec::new(),
            returns_void: true,
            rewrites: 0,
            broken: None,
        }
    }

    pub fn alloc(&mut self, kind: BlockKind<'code>) -> BlockId {
        self.blocks.alloc(kind)
    }

    pub fn place_of(&self, block: BlockId) -> Place {
        match self.blocks[block].outer {
            Some(parent) => Place::Child(parent),
            None => self
                .graph
                .owner_of_root(block)
                .map_or(Place::Detached, Place::Root),
        }
    }

    /// Hangs `new` where `old` used to be. `place` must be the place of `old` before `new` was
    /// allocated, since allocating a wrapper reparents `old`.
    pub fn put(&mut self, place: Place, old: BlockId, new: BlockId) {
        match place {
            Place::Child(parent) => self.blocks.replace_child(parent, old, new),
            Place::Root(flow) => {
                self.graph[flow].block = new;
                self.blocks[new].outer = None;
                if self.graph[flow].last_modified == old {
                    self.graph[flow].last_modified = new;
                }
            }
            Place::Detached => {}
        }
    }

    /// Replaces `old` by an unrelated block `new`.
    pub fn replace_block(&mut self, old: BlockId, new: BlockId) {
        let place = self.place_of(old);
        self.put(place, old, new);
    }

    /// The live flow block whose tree contains `block`.
    pub fn flow_of(&self, block: BlockId) -> Option<FlowId> {
        self.graph.owner_of_root(self.blocks.root_of(block))
    }

    /// Creates a jump from `prev` (inside `flow`) to `destination`.
    pub fn add_jump(&mut self, flow: FlowId, prev: BlockId, destination: FlowId) -> JumpId {
        let jump = self.graph.alloc_jump(destination, prev);
        self.blocks[prev].jump = Some(jump);
        self.graph.link_jump(flow, jump);
        jump
    }

    pub fn remove_jump(&mut self, flow: FlowId, jump: JumpId) {
        let prev = self.graph[jump].prev;
        if self.blocks[prev].jump == Some(jump) {
            self.blocks[prev].jump = None;
        }
        self.graph.unlink_jump(flow, jump);
    }

    /// Moves the jump of `from` onto `to`. The edge is unaffected.
    pub fn move_jump(&mut self, from: BlockId, to: BlockId) {
        if let Some(jump) = self.blocks[from].jump.take() {
            self.blocks[to].jump = Some(jump);
            self.graph[jump].prev = to;
        }
    }

    /// Removes the jump of `prev` and puts `block` (a break, continue or dispatch) in its place.
    pub fn replace_jump_with(&mut self, flow: FlowId, jump: JumpId, block: BlockId) {
        let prev = self.graph[jump].prev;
        self.remove_jump(flow, jump);
        if let BlockKind::Empty = self.blocks[prev].kind {
            self.replace_block(prev, block);
            return;
        }
        let tail = self.blocks.chain_tail(prev);
        if self.blocks[tail].jump.is_some() {
            // Unreachable: the tail leaves before `prev` completes.
            return;
        }
        self.wrap_sequential(tail, block);
    }

    /// Turns `block` into `Sequential(block, next)` in place and returns the sequence.
    pub fn wrap_sequential(&mut self, block: BlockId, next: BlockId) -> BlockId {
        let place = self.place_of(block);
        let seq = self.alloc(BlockKind::Sequential {
            first: block,
            second: next,
        });
        self.put(place, block, seq);
        seq
    }

    /// Inserts `new` right before the statement `block` of its chain.
    pub fn insert_before(&mut self, block: BlockId, new: BlockId) {
        let target = match self.blocks[block].outer {
            Some(parent) => match self.blocks[parent].kind {
                BlockKind::Sequential { first, .. } if first == block => parent,
                _ => block,
            },
            None => block,
        };
        let place = self.place_of(target);
        let seq = self.alloc(BlockKind::Sequential {
            first: new,
            second: target,
        });
        self.put(place, target, seq);
    }

    /// Whether `block` can be dropped from its sequential chain without losing a jump.
    pub fn can_remove_statement(&self, block: BlockId) -> bool {
        let Some(parent) = self.blocks[block].outer else {
            return false;
        };
        let BlockKind::Sequential { first, second } = self.blocks[parent].kind else {
            return false;
        };
        let other = if first == block { second } else { first };
        let exits = [self.blocks[parent].jump, self.blocks[block].jump]
            .into_iter()
            .flatten()
            .count();
        exits == 0 || (exits == 1 && self.blocks[other].jump.is_none())
    }

    /// Drops `block` from its chain; its sibling takes over the parent's position and jumps.
    /// Check `can_remove_statement` first.
    pub fn remove_statement(&mut self, block: BlockId) {
        let Some(parent) = self.blocks[block].outer else {
            return;
        };
        let BlockKind::Sequential { first, second } = self.blocks[parent].kind else {
            return;
        };
        let other = if first == block { second } else { first };
        self.move_jump(parent, other);
        self.move_jump(block, other);
        self.blocks[block].outer = None;
        let place = self.place_of(parent);
        self.put(place, parent, other);
        for flow in self.graph.live_flows() {
            if self.graph[flow].last_modified == block || self.graph[flow].last_modified == parent
            {
                self.graph[flow].last_modified = other;
            }
        }
    }

    /// Replaces the statement `old` by `new`, keeping `old`'s jump.
    pub fn replace_statement(&mut self, old: BlockId, new: BlockId) {
        self.move_jump(old, new);
        self.replace_block(old, new);
        for flow in self.graph.live_flows() {
            if self.graph[flow].last_modified == old {
                self.graph[flow].last_modified = new;
            }
        }
    }

    /// Whether `block` is still attached to some live flow block's tree.
    pub fn is_attached(&self, block: BlockId) -> bool {
        self.flow_of(block).is_some()
    }

    /// Fresh empty block.
    pub fn empty(&mut self) -> BlockId {
        self.blocks.empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;

    fn statement(analysis: &mut Analysis<'_>, value: i32) -> BlockId {
        let expr = analysis.exprs.int(value);
        analysis.alloc(BlockKind::Instruction { expr, push: 0 })
    }

    fn value_of(analysis: &Analysis<'_>, block: BlockId) -> i32 {
        let BlockKind::Instruction { expr, .. } = analysis.blocks[block].kind else {
            panic!("not an instruction");
        };
        match analysis.exprs[expr] {
            Expression::Const(crate::ast::Constant::Int(value)) => value,
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn statements_move_around_roots() {
        let mut analysis = Analysis::new(AnalysisOptions::default(), Fuel::new(100));
        let a = statement(&mut analysis, 1);
        let flow = analysis.graph.add_flow(0, 1, a);
        let b = statement(&mut analysis, 2);
        analysis.wrap_sequential(a, b);
        let c = statement(&mut analysis, 3);
        analysis.insert_before(b, c);

        let root = analysis.graph[flow].block;
        let order: Vec<i32> = analysis
            .blocks
            .chain(root)
            .into_iter()
            .map(|block| value_of(&analysis, block))
            .collect();
        assert_eq!(order, vec![1, 3, 2]);

        let jump = analysis.add_jump(flow, b, FlowId::END_OF_METHOD);
        assert!(analysis.can_remove_statement(b));
        analysis.remove_statement(b);
        assert_eq!(analysis.blocks[c].jump, Some(jump));
        assert_eq!(analysis.graph[jump].prev, c);
        assert_eq!(analysis.blocks.chain(analysis.graph[flow].block), vec![a, c]);

        analysis.remove_jump(flow, jump);
        assert!(analysis.graph[flow].successors.is_empty());
        assert!(analysis.is_attached(c));
    }
}

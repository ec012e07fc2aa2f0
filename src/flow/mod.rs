//! The flow block graph and its reduction into a single structured tree.

mod analyze;
mod build;
mod check;
mod fallback;
mod jump;
mod liveness;
mod resolve;
mod switch;

pub use self::build::BuildError;
pub use self::check::ConsistencyError;
pub use self::jump::{Jump, JumpId};
use crate::structured::{BlockId, Blocks};
use crate::variables::{SlotSet, VariableSet, VariableStack};
use core::ops::{Index, IndexMut};
use rustc_hash::FxHashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowId(u32);

impl FlowId {
    /// Universal exit; `return` jumps here.
    pub const END_OF_METHOD: FlowId = FlowId(0);
    /// Placeholder for "falls to the next address" until every flow block exists.
    pub const NEXT_BY_ADDR: FlowId = FlowId(1);
    /// Predecessor of the entry block.
    pub const METHOD_ENTRY: FlowId = FlowId(2);

    pub fn is_sentinel(self) -> bool {
        self.0 <= Self::METHOD_ENTRY.0
    }
}

/// What is known about the paths from a flow block to one successor.
#[derive(Clone, Debug, Default)]
pub struct SuccessorInfo {
    /// Slots written on every path.
    pub kill: SlotSet,
    /// Locals written on some path and not overwritten afterwards.
    pub gen_set: VariableSet,
    /// Head of the jump chain.
    pub jumps: Option<JumpId>,
}

#[derive(Debug)]
pub struct FlowBlock {
    pub addr: u32,
    pub length: u32,
    pub block: BlockId,
    /// Growth point: the block most recently appended.
    pub last_modified: BlockId,
    pub successors: FxHashMap<FlowId, SuccessorInfo>,
    pub predecessors: Vec<FlowId>,
    /// Locals read before being written.
    pub in_set: VariableSet,
    /// Locals written anywhere in the block.
    pub gen_set: VariableSet,
    /// Abstract stack at entry, filled in by stack mapping.
    pub stack_map: Option<VariableStack>,
    pub alive: bool,
}

impl FlowBlock {
    pub fn end(&self) -> u32 {
        self.addr + self.length
    }

    pub fn in_window(&self, start: u32, end: u32) -> bool {
        self.alive && start <= self.addr && self.addr < end
    }
}

#[derive(Debug)]
pub struct FlowGraph {
    flows: Vec<FlowBlock>,
    jumps: Vec<Jump>,
}

impl FlowGraph {
    pub fn new(blocks: &mut Blocks<'_>) -> Self {
        let mut graph = Self {
            flows: Vec::new(),
            jumps: Vec::new(),
        };
        for _ in 0..=FlowId::METHOD_ENTRY.0 {
            let block = blocks.empty();
            let id = graph.add_flow(u32::MAX, 0, block);
            graph[id].alive = false;
        }
        graph
    }

    pub fn add_flow(&mut self, addr: u32, length: u32, block: BlockId) -> FlowId {
        let id = FlowId(self.flows.len() as u32);
        self.flows.push(FlowBlock {
            addr,
            length,
            block,
            last_modified: block,
            successors: FxHashMap::default(),
            predecessors: Vec::new(),
            in_set: VariableSet::new(),
            gen_set: VariableSet::new(),
            stack_map: None,
            alive: true,
        });
        id
    }

    /// Live flow blocks sorted by address.
    pub fn live_flows(&self) -> Vec<FlowId> {
        let mut out: Vec<FlowId> = (0..self.flows.len() as u32)
            .map(FlowId)
            .filter(|&id| self[id].alive)
            .collect();
        out.sort_by_key(|&id| self[id].addr);
        out
    }

    /// The live flow block covering `addr`.
    pub fn flow_at(&self, addr: u32) -> Option<FlowId> {
        self.live_flows()
            .into_iter()
            .find(|&id| self[id].addr <= addr && addr < self[id].end())
    }

    /// Successors sorted by address.
    pub fn successors_of(&self, flow: FlowId) -> Vec<FlowId> {
        let mut out: Vec<FlowId> = self[flow].successors.keys().copied().collect();
        out.sort_by_key(|&id| (self[id].addr, id));
        out
    }

    /// Live flow block whose structured tree is rooted at `root`.
    pub fn owner_of_root(&self, root: BlockId) -> Option<FlowId> {
        (0..self.flows.len() as u32)
            .map(FlowId)
            .find(|&id| self[id].alive && self[id].block == root)
    }

    pub fn jump_count(&self) -> usize {
        self.flows
            .iter()
            .filter(|flow| flow.alive)
            .flat_map(|flow| flow.successors.values())
            .map(|info| self.chain(info.jumps).len())
            .sum()
    }
}

impl Index<FlowId> for FlowGraph {
    type Output = FlowBlock;

    fn index(&self, id: FlowId) -> &Self::Output {
        &self.flows[id.0 as usize]
    }
}

impl IndexMut<FlowId> for FlowGraph {
    fn index_mut(&mut self, id: FlowId) -> &mut Self::Output {
        &mut self.flows[id.0 as usize]
    }
}

impl Index<JumpId> for FlowGraph {
    type Output = Jump;

    fn index(&self, id: JumpId) -> &Self::Output {
        &self.jumps[id.0 as usize]
    }
}

impl IndexMut<JumpId> for FlowGraph {
    fn index_mut(&mut self, id: JumpId) -> &mut Self::Output {
        &mut self.jumps[id.0 as usize]
    }
}

use super::{FlowGraph, FlowId};
use crate::structured::BlockId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JumpId(pub(super) u32);

/// An unresolved edge from a structured block to a flow block. Jumps with a common source flow
/// block and destination form a singly linked list.
#[derive(Clone, Debug)]
pub struct Jump {
    pub destination: FlowId,
    pub prev: BlockId,
    pub next: Option<JumpId>,
}

impl FlowGraph {
    pub(crate) fn alloc_jump(&mut self, destination: FlowId, prev: BlockId) -> JumpId {
        let id = JumpId(self.jumps.len() as u32);
        self.jumps.push(Jump {
            destination,
            prev,
            next: None,
        });
        id
    }

    pub fn chain(&self, head: Option<JumpId>) -> Vec<JumpId> {
        let mut out = Vec::new();
        let mut current = head;
        while let Some(jump) = current {
            out.push(jump);
            current = self[jump].next;
        }
        out
    }

    /// Re-threads the `next` pointers of `jumps` and returns the new head.
    pub fn relink(&mut self, jumps: &[JumpId]) -> Option<JumpId> {
        for pair in jumps.windows(2) {
            self[pair[0]].next = Some(pair[1]);
        }
        if let Some(&last) = jumps.last() {
            self[last].next = None;
        }
        jumps.first().copied()
    }

    /// Jumps from `from` to `destination`, in chain order.
    pub fn jumps_to(&self, from: FlowId, destination: FlowId) -> Vec<JumpId> {
        self[from]
            .successors
            .get(&destination)
            .map(|info| self.chain(info.jumps))
            .unwrap_or_default()
    }

    /// Appends `jump` to the chain of `from`'s successor `jump.destination`, creating the edge if
    /// needed.
    pub(crate) fn link_jump(&mut self, from: FlowId, jump: JumpId) {
        let destination = self[jump].destination;
        let mut jumps = self.jumps_to(from, destination);
        jumps.push(jump);
        let head = self.relink(&jumps);
        self[from].successors.entry(destination).or_default().jumps = head;
        if !self[destination].predecessors.contains(&from) {
            self[destination].predecessors.push(from);
        }
    }

    /// Removes `jump` from its chain, dropping the edge when the chain becomes empty.
    pub(crate) fn unlink_jump(&mut self, from: FlowId, jump: JumpId) {
        let destination = self[jump].destination;
        let mut jumps = self.jumps_to(from, destination);
        jumps.retain(|&other| other != jump);
        if jumps.is_empty() {
            self.remove_edge(from, destination);
        } else {
            let head = self.relink(&jumps);
            if let Some(info) = self[from].successors.get_mut(&destination) {
                info.jumps = head;
            }
        }
        self[jump].next = None;
    }

    pub(crate) fn remove_edge(&mut self, from: FlowId, destination: FlowId) {
        self[from].successors.remove(&destination);
        self[destination].predecessors.retain(|&pred| pred != from);
    }
}

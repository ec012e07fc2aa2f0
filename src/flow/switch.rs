use super::{FlowId, JumpId};
use crate::analysis::{Analysis, Place};
use crate::structured::{BlockId, BlockKind};
use log::trace;

impl Analysis<'_> {
    /// Merges the case targets of the switch at the growth point of `flow` into the case bodies,
    /// in address order.
    pub(crate) fn analyze_switch(&mut self, flow: FlowId, start: u32, end: u32) -> bool {
        let switch = self.graph[flow].last_modified;
        let BlockKind::Switch { ref cases, .. } = self.blocks[switch].kind else {
            return false;
        };
        let cases = cases.clone();

        let mut changed = false;
        let mut previous: Option<BlockId> = None;
        for (index, &case) in cases.iter().enumerate() {
            let Some((body, jump, target)) = self.pending_case(case) else {
                previous = Some(case);
                continue;
            };
            if target == flow || !self.graph[target].in_window(start, end) {
                break;
            }

            let target_addr = self.graph[target].addr;
            let window_end = cases[index + 1..]
                .iter()
                .filter_map(|&later| self.pending_case(later))
                .map(|(_, _, dest)| self.graph[dest].addr)
                .find(|&addr| addr > target_addr && addr < end)
                .unwrap_or(end);
            changed |= self.analyze(target, target_addr, window_end);

            if self.graph[target].addr != self.graph[flow].end()
                || self.graph[target].predecessors != [flow]
            {
                break;
            }
            let jumps = self.graph.jumps_to(flow, target);
            let fell_in: Vec<_> = jumps.iter().copied().filter(|&other| other != jump).collect();
            let from_previous = |analysis: &Self, other: JumpId| {
                previous.is_some_and(|previous| {
                    analysis
                        .blocks
                        .falls_to_end_of(analysis.graph[other].prev, previous)
                })
            };
            if !fell_in.iter().all(|&other| from_previous(self, other)) {
                break;
            }

            trace!("Switch case at {target_addr:#x} merged");
            let edge = self.graph[flow]
                .successors
                .get(&target)
                .cloned()
                .unwrap_or_default();
            for &other in &fell_in {
                let prev = self.graph[other].prev;
                self.remove_jump(flow, other);
                self.drop_if_empty(prev);
            }
            self.remove_jump(flow, jump);
            self.graph.remove_edge(flow, target);

            let target_root = self.graph[target].block;
            self.put(Place::Child(case), body, target_root);
            if !fell_in.is_empty()
                && let BlockKind::Case { fallthrough, .. } = &mut self.blocks[case].kind
            {
                *fallthrough = true;
            }
            self.absorb(flow, target, &edge);
            self.graph[flow].last_modified = switch;
            self.checkpoint();
            changed = true;
            previous = Some(case);
        }
        changed
    }

    /// A case whose body is still a bare jump: `(body, jump, target)`.
    fn pending_case(&self, case: BlockId) -> Option<(BlockId, JumpId, FlowId)> {
        let BlockKind::Case { body, .. } = self.blocks[case].kind else {
            return None;
        };
        if !matches!(self.blocks[body].kind, BlockKind::Empty) {
            return None;
        }
        let jump = self.blocks[body].jump?;
        Some((body, jump, self.graph[jump].destination))
    }
}

use super::{FlowId, SuccessorInfo};
use crate::analysis::Analysis;
use crate::variables::VariableSet;

impl Analysis<'_> {
    /// Unifies every read in `reads` with the writes of the same slot in `writes`.
    pub(crate) fn merge_by_slot(&mut self, reads: &VariableSet, writes: &VariableSet) {
        for read in reads.iter() {
            let matching: Vec<_> = writes.with_slot_of(read, &self.locals).collect();
            for write in matching {
                self.locals.merge(read, write);
            }
        }
    }

    /// Absorbs `succ` into `flow`. `edge` describes the paths from `flow` into `succ` and has
    /// already been detached. The structured trees are combined by the caller.
    pub(crate) fn absorb(&mut self, flow: FlowId, succ: FlowId, edge: &SuccessorInfo) {
        let succ_in = self.graph[succ].in_set.clone();
        self.merge_by_slot(&succ_in, &edge.gen_set);
        for local in succ_in.without_killed(&edge.kill, &self.locals).iter() {
            self.graph[flow].in_set.add(local);
        }
        let succ_gen = self.graph[succ].gen_set.clone();
        self.graph[flow].gen_set.union_with(&succ_gen);

        self.merge_successors(flow, succ, edge);

        let start = self.graph[flow].addr.min(self.graph[succ].addr);
        let end = self.graph[flow].end().max(self.graph[succ].end());
        self.graph[flow].addr = start;
        self.graph[flow].length = end - start;

        let dead = &mut self.graph[succ];
        dead.alive = false;
        dead.predecessors.clear();
        dead.in_set = VariableSet::new();
    }

    /// Moves the outgoing edges of `succ` to `flow`, composing each with `edge`.
    fn merge_successors(&mut self, flow: FlowId, succ: FlowId, edge: &SuccessorInfo) {
        let outgoing: Vec<(FlowId, SuccessorInfo)> =
            self.graph[succ].successors.drain().collect();
        for (dest, info) in outgoing {
            let mut kill = edge.kill.clone();
            kill.union_with(&info.kill);
            let mut gen_set = info.gen_set.clone();
            gen_set.union_with(&edge.gen_set.without_killed(&info.kill, &self.locals));
            let dest = if dest == succ { flow } else { dest };

            let mut jumps = self.graph.chain(info.jumps);
            let merged = match self.graph[flow].successors.remove(&dest) {
                Some(mut existing) => {
                    existing.kill.intersect_with(&kill);
                    existing.gen_set.union_with(&gen_set);
                    let mut chain = self.graph.chain(existing.jumps);
                    chain.append(&mut jumps);
                    existing.jumps = self.graph.relink(&chain);
                    existing
                }
                None => SuccessorInfo {
                    kill,
                    gen_set,
                    jumps: self.graph.relink(&jumps),
                },
            };
            for jump in self.graph.chain(merged.jumps) {
                self.graph[jump].destination = dest;
            }
            self.graph[flow].successors.insert(dest, merged);

            let preds = &mut self.graph[dest].predecessors;
            preds.retain(|&pred| pred != succ);
            if !preds.contains(&flow) {
                preds.push(flow);
            }
        }
    }

    /// Closing a loop makes the writes on the back edge visible to the reads at the loop head.
    pub(crate) fn merge_back_edge(&mut self, flow: FlowId, back_edge: &SuccessorInfo) {
        let reads = self.graph[flow].in_set.clone();
        self.merge_by_slot(&reads, &back_edge.gen_set);
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::Analysis;
    use crate::flow::{FlowId, SuccessorInfo};
    use crate::options::{AnalysisOptions, Fuel};
    use crate::variables::{LocalKind, SlotSet};

    #[test]
    fn writes_on_the_edge_reach_later_reads() {
        let mut analysis = Analysis::new(AnalysisOptions::default(), Fuel::new(10));
        let store = analysis.locals.new_slot(LocalKind::Slot, 1);
        let load = analysis.locals.new_slot(LocalKind::Slot, 1);
        let other = analysis.locals.new_slot(LocalKind::Slot, 2);

        let a_block = analysis.empty();
        let a = analysis.graph.add_flow(0, 1, a_block);
        let b_block = analysis.empty();
        let b = analysis.graph.add_flow(1, 1, b_block);
        analysis.graph[b].in_set.add(load);
        analysis.graph[b].in_set.add(other);
        let ret = analysis.add_jump(b, b_block, FlowId::END_OF_METHOD);

        let mut kill = SlotSet::new();
        kill.insert(1);
        let edge = SuccessorInfo {
            kill,
            gen_set: [store].into_iter().collect(),
            jumps: None,
        };
        analysis.absorb(a, b, &edge);

        assert!(analysis.locals.same(store, load));
        assert_eq!(analysis.graph[a].in_set.iter().collect::<Vec<_>>(), vec![other]);
        assert_eq!(analysis.graph[a].length, 2);
        assert!(!analysis.graph[b].alive);
        assert_eq!(
            analysis.graph.jumps_to(a, FlowId::END_OF_METHOD),
            vec![ret]
        );
        let info = &analysis.graph[a].successors[&FlowId::END_OF_METHOD];
        assert!(info.kill.contains(1));
        assert!(info.gen_set.contains(store));
        assert_eq!(
            analysis.graph[FlowId::END_OF_METHOD].predecessors,
            vec![a]
        );
    }
}

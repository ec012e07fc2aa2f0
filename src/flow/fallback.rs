use super::FlowId;
use crate::analysis::Analysis;
use crate::ast::Expression;
use crate::structured::{BlockId, BlockKind, CaseValue, LoopKind};
use crate::variables::{LocalId, LocalKind, VariableSet};
use log::warn;

impl Analysis<'_> {
    /// Emits the remaining flow blocks as regions of a dispatcher loop:
    ///
    /// ```text
    /// selector = 0;
    /// while (true) { switch (selector) { case i: region_i } }
    /// ```
    ///
    /// Every jump into region `j` becomes `selector = j; continue;`.
    pub(crate) fn degrade_to_dispatcher(&mut self) {
        let entry = self.entry;
        let mut regions = vec![entry];
        regions.extend(self.graph.live_flows().into_iter().filter(|&flow| flow != entry));
        warn!(
            "Could not structure {} flow blocks, emitting a dispatcher loop",
            regions.len()
        );

        let selector = self.locals.new_synthetic(LocalKind::Selector);
        let mut cases = Vec::with_capacity(regions.len());
        for (index, &flow) in regions.iter().enumerate() {
            let body = self.graph[flow].block;
            cases.push(self.alloc(BlockKind::Case {
                value: CaseValue::Value(index as i32),
                body,
                fallthrough: false,
            }));
        }
        let selector_expr = self.exprs.local(selector);
        let switch = self.alloc(BlockKind::Switch {
            selector: selector_expr,
            cases,
            labeled: false,
        });
        let cond = self.exprs.bool(true);
        let looped = self.alloc(BlockKind::Loop {
            kind: LoopKind::While,
            cond,
            init: None,
            incr: None,
            body: switch,
            labeled: false,
        });
        let init = self.select(selector, 0);
        let root = self.alloc(BlockKind::Sequential {
            first: init,
            second: looped,
        });

        for &flow in &regions {
            for dest in self.graph.successors_of(flow) {
                for jump in self.graph.jumps_to(flow, dest) {
                    let prev = self.graph[jump].prev;
                    if let Some(index) = regions.iter().position(|&region| region == dest) {
                        let labeled = self.blocks.innermost_loop(prev) != Some(looped);
                        if labeled {
                            self.set_labeled(looped);
                        }
                        let assign = self.select(selector, index as i32);
                        let cont = self.alloc(BlockKind::Continue {
                            target: looped,
                            labeled,
                        });
                        let dispatch = self.alloc(BlockKind::Sequential {
                            first: assign,
                            second: cont,
                        });
                        self.replace_jump_with(flow, jump, dispatch);
                    } else if dest == FlowId::END_OF_METHOD
                        && !matches!(self.blocks[prev].kind, BlockKind::Return { .. })
                    {
                        let ret = self.alloc(BlockKind::Return { value: None });
                        self.replace_jump_with(flow, jump, ret);
                    } else {
                        self.remove_jump(flow, jump);
                    }
                }
            }
        }

        for &flow in &regions[1..] {
            self.graph[flow].alive = false;
            self.graph[flow].predecessors.clear();
        }
        // Any region may follow any other, so reads see the writes of every region.
        let mut reads = VariableSet::new();
        let mut writes = VariableSet::new();
        for &flow in &regions {
            reads.union_with(&self.graph[flow].in_set);
            writes.union_with(&self.graph[flow].gen_set);
        }
        self.merge_by_slot(&reads, &writes);
        self.graph[entry].in_set = reads;
        self.graph[entry].gen_set = writes;
        self.graph[entry].predecessors = vec![FlowId::METHOD_ENTRY];
        self.graph[entry].block = root;
        self.graph[entry].last_modified = root;
    }

    fn select(&mut self, selector: LocalId, index: i32) -> BlockId {
        let target = self.exprs.local(selector);
        let value = self.exprs.int(index);
        let expr = self.exprs.alloc(Expression::Assign {
            target,
            op: None,
            value,
        });
        self.alloc(BlockKind::Instruction { expr, push: 0 })
    }
}

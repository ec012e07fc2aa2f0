use super::FlowId;
use crate::analysis::Analysis;
use crate::ast::{ExprId, Expression};
use crate::structured::{BlockId, BlockKind, LoopKind};
use log::trace;
use rustc_hash::FxHashSet;

impl Analysis<'_> {
    /// Reduces the flow blocks reachable from `flow` inside `[start, end)`. Returns whether
    /// anything changed. Stops early once fuel runs out.
    pub(crate) fn analyze(&mut self, flow: FlowId, start: u32, end: u32) -> bool {
        let mut changed = false;
        'reduce: loop {
            if self.broken.is_some() || !self.fuel.tick() {
                return changed;
            }

            let last = self.graph[flow].last_modified;
            if matches!(self.blocks[last].kind, BlockKind::Switch { .. })
                && self.analyze_switch(flow, start, end)
            {
                changed = true;
                continue;
            }

            if self.do_t1(flow, start, end) {
                changed = true;
                continue;
            }

            let successors: Vec<FlowId> = self
                .graph
                .successors_of(flow)
                .into_iter()
                .filter(|&succ| succ != flow && self.graph[succ].in_window(start, end))
                .collect();
            for (index, &succ) in successors.iter().enumerate() {
                let here = &self.graph[flow];
                let there = &self.graph[succ];
                let adjacent = there.addr == here.end() || there.end() == here.addr;
                if adjacent && there.predecessors == [flow] {
                    self.do_t2(flow, succ);
                    changed = true;
                    continue 'reduce;
                }

                if there.addr >= here.end() {
                    let window_start = here.end();
                    let window_end = successors
                        .get(index + 1)
                        .map_or(end, |&next| self.graph[next].addr);
                    if self.analyze(succ, window_start, window_end) {
                        changed = true;
                        continue 'reduce;
                    }
                }
                if self.fuel.is_exhausted() {
                    return changed;
                }
            }
            return changed;
        }
    }

    /// Appends `succ` to `flow`, whose only predecessor it is.
    pub(crate) fn do_t2(&mut self, flow: FlowId, succ: FlowId) {
        trace!(
            "T2: {:#x}..{:#x} <- {:#x}",
            self.graph[flow].addr,
            self.graph[flow].end(),
            self.graph[succ].addr
        );
        let edge = self.graph[flow]
            .successors
            .get(&succ)
            .cloned()
            .unwrap_or_default();
        self.resolve_jumps_to(flow, succ);
        self.graph.remove_edge(flow, succ);

        let old_tail = self.blocks.chain_tail(self.graph[flow].block);
        let succ_root = self.graph[succ].block;
        if matches!(self.blocks[succ_root].kind, BlockKind::Empty) {
            self.move_jump(succ_root, old_tail);
            self.graph[flow].last_modified = old_tail;
        } else {
            self.wrap_sequential(old_tail, succ_root);
            self.graph[flow].last_modified = succ_root;
        }
        self.absorb(flow, succ, &edge);
        self.checkpoint();
        self.transform_from(flow, old_tail);
    }

    /// Closes a loop at `flow` if it jumps to itself and nothing else in the window jumps in.
    pub(crate) fn do_t1(&mut self, flow: FlowId, start: u32, end: u32) -> bool {
        let preds = &self.graph[flow].predecessors;
        if !preds.contains(&flow) {
            return false;
        }
        if preds.iter().any(|&pred| {
            pred != flow && !pred.is_sentinel() && self.graph[pred].in_window(start, end)
        }) {
            return false;
        }
        trace!("T1 at {:#x}", self.graph[flow].addr);

        let back_edge = self.graph[flow]
            .successors
            .get(&flow)
            .cloned()
            .unwrap_or_default();
        self.normalize_root_jump(flow);

        let looped = self
            .close_do_while(flow)
            .or_else(|| self.close_top_test(flow))
            .unwrap_or_else(|| {
                let root = self.graph[flow].block;
                let cond = self.exprs.bool(true);
                self.make_loop(flow, LoopKind::While, cond, root)
            });

        let mut continues = false;
        for jump in self.graph.jumps_to(flow, flow) {
            let prev = self.graph[jump].prev;
            let BlockKind::Loop { body, .. } = self.blocks[looped].kind else {
                break;
            };
            if self.blocks.falls_to_end_of(prev, body) {
                self.remove_jump(flow, jump);
                self.drop_if_empty(prev);
                continue;
            }
            let labeled = self.blocks.innermost_loop(prev) != Some(looped);
            if labeled {
                self.set_labeled(looped);
            }
            let cont = self.alloc(BlockKind::Continue {
                target: looped,
                labeled,
            });
            self.replace_jump_with(flow, jump, cont);
            continues = true;
        }
        self.graph.remove_edge(flow, flow);

        if !continues {
            self.try_possible_for(looped);
        }
        self.merge_back_edge(flow, &back_edge);
        self.graph[flow].last_modified = looped;
        self.checkpoint();
        self.transform_from(flow, looped);
        true
    }

    /// Moves a jump sitting on a sequential root down to the chain tail, where it takes effect.
    fn normalize_root_jump(&mut self, flow: FlowId) {
        let root = self.graph[flow].block;
        let Some(jump) = self.blocks[root].jump else {
            return;
        };
        if !matches!(self.blocks[root].kind, BlockKind::Sequential { .. }) {
            return;
        }
        let mut current = root;
        while let BlockKind::Sequential { second, .. } = self.blocks[current].kind {
            current = second;
            if self.blocks[current].jump.is_some() {
                // Never taken: a block further down leaves first.
                self.remove_jump(flow, jump);
                return;
            }
        }
        self.move_jump(root, current);
    }

    fn make_loop(&mut self, flow: FlowId, kind: LoopKind, cond: ExprId, body: BlockId) -> BlockId {
        let mut body = body;
        if let Some(jump) = self.blocks[body].jump
            && self.graph[jump].destination != flow
        {
            let exit = self.empty();
            self.move_jump(body, exit);
            body = self.alloc(BlockKind::Sequential {
                first: body,
                second: exit,
            });
        }
        let looped = self.alloc(BlockKind::Loop {
            kind,
            cond,
            init: None,
            incr: None,
            body,
            labeled: false,
        });
        self.graph[flow].block = looped;
        looped
    }

    /// `body; if (c) goto self`  =>  `do { body } while (c)`
    fn close_do_while(&mut self, flow: FlowId) -> Option<BlockId> {
        let self_jumps = self.graph.jumps_to(flow, flow);
        let [jump] = self_jumps[..] else {
            return None;
        };
        let trueblock = self.graph[jump].prev;
        let cond_block = self.blocks[trueblock].outer?;
        let BlockKind::Conditional { cond, .. } = self.blocks[cond_block].kind else {
            return None;
        };
        let root = self.graph[flow].block;
        if self.blocks.chain_tail(root) != cond_block || !self.falls_to_end(flow, cond_block) {
            return None;
        }

        self.remove_jump(flow, jump);
        let exit = self.blocks[cond_block].jump.take();
        let body = if cond_block == root {
            self.empty()
        } else {
            self.remove_statement(cond_block);
            self.graph[flow].block
        };
        let looped = self.make_loop(flow, LoopKind::DoWhile, cond, body);
        if let Some(exit) = exit {
            self.blocks[looped].jump = Some(exit);
            self.graph[exit].prev = looped;
        }
        Some(looped)
    }

    /// `if (c) goto out; body`  =>  `while (!c) { body } goto out`
    fn close_top_test(&mut self, flow: FlowId) -> Option<BlockId> {
        let root = self.graph[flow].block;
        let head = self.blocks.chain(root)[0];
        let BlockKind::Conditional { cond, trueblock } = self.blocks[head].kind else {
            return None;
        };
        let exit = self.blocks[trueblock].jump?;
        if self.graph[exit].destination == flow
            || !matches!(self.blocks[trueblock].kind, BlockKind::Empty)
            || self.exprs.free_operand_count(cond) != 0
        {
            return None;
        }
        if head != root && !self.can_remove_statement(head) {
            return None;
        }

        let negated = self.exprs.negate(cond);
        let body = if head == root {
            let body = self.empty();
            self.move_jump(head, body);
            body
        } else {
            self.remove_statement(head);
            self.graph[flow].block
        };
        let looped = self.make_loop(flow, LoopKind::While, negated, body);
        self.move_jump(trueblock, looped);
        Some(looped)
    }

    /// Marks a while loop whose body ends by updating a local the condition reads as a
    /// possible for loop, with that update as its increment.
    fn try_possible_for(&mut self, looped: BlockId) {
        let BlockKind::Loop {
            kind: LoopKind::While,
            cond,
            body,
            ..
        } = self.blocks[looped].kind
        else {
            return;
        };
        let tail = self.blocks.chain_tail(body);
        if tail == body || self.blocks[tail].jump.is_some() {
            return;
        }
        let BlockKind::Instruction { expr, push: 0 } = self.blocks[tail].kind else {
            return;
        };
        let target = match self.exprs[expr] {
            Expression::Assign { target, .. } | Expression::Increment { target, .. } => target,
            _ => return,
        };
        let Some(slot) = self.exprs.local_slot(target, &self.locals) else {
            return;
        };
        if !self.exprs.reads_slot(cond, slot, &self.locals) || !self.can_remove_statement(tail) {
            return;
        }
        self.remove_statement(tail);
        self.blocks[tail].outer = Some(looped);
        if let BlockKind::Loop { kind, incr, .. } = &mut self.blocks[looped].kind {
            *kind = LoopKind::PossFor;
            *incr = Some(tail);
        }
    }

    /// Merges the single remaining flow block with the method exit.
    pub(crate) fn merge_end_block(&mut self, flow: FlowId) {
        for jump in self.graph.jumps_to(flow, FlowId::END_OF_METHOD) {
            let prev = self.graph[jump].prev;
            if self.falls_to_end(flow, prev)
                || matches!(self.blocks[prev].kind, BlockKind::Return { .. })
            {
                self.remove_jump(flow, jump);
                self.drop_if_empty(prev);
            } else {
                let ret = self.alloc(BlockKind::Return { value: None });
                self.replace_jump_with(flow, jump, ret);
            }
        }
        self.graph.remove_edge(flow, FlowId::END_OF_METHOD);
    }

    /// Drops flow blocks that neither the entry nor an exception handler starting at one of
    /// `handlers` reaches. The address range of a dropped block goes to its live neighbour so that
    /// the blocks around it stay adjacent.
    pub(crate) fn remove_dead_flows(&mut self, handlers: &[u32]) {
        let mut reached = FxHashSet::default();
        let mut queue = vec![self.entry];
        queue.extend(handlers.iter().filter_map(|&address| {
            self.graph
                .flow_at(address)
                .filter(|&flow| self.graph[flow].addr == address)
        }));
        while let Some(flow) = queue.pop() {
            if flow.is_sentinel() || !reached.insert(flow) {
                continue;
            }
            queue.extend(self.graph.successors_of(flow));
        }

        let dead: Vec<FlowId> = self
            .graph
            .live_flows()
            .into_iter()
            .filter(|flow| !reached.contains(flow))
            .collect();
        for &flow in &dead {
            trace!("Unreachable code at {:#x}", self.graph[flow].addr);
            for dest in self.graph.successors_of(flow) {
                for jump in self.graph.jumps_to(flow, dest) {
                    self.remove_jump(flow, jump);
                }
            }
            self.graph[flow].alive = false;
        }
        for &flow in &dead {
            for pred in core::mem::take(&mut self.graph[flow].predecessors) {
                if !pred.is_sentinel() {
                    self.graph[pred].successors.remove(&flow);
                }
            }
        }

        // `live_flows` is sorted by address, so runs of dead blocks end up with one neighbour.
        for flow in dead {
            let (addr, end) = (self.graph[flow].addr, self.graph[flow].end());
            let live = self.graph.live_flows();
            if let Some(&before) = live.iter().find(|&&other| self.graph[other].end() == addr) {
                self.graph[before].length += end - addr;
            } else if let Some(&after) = live.iter().find(|&&other| self.graph[other].addr == end) {
                self.graph[after].addr = addr;
                self.graph[after].length += end - addr;
            }
        }
        self.checkpoint();
    }

    /// Runs the reduction from the method entry. Returns whether a single flow block remains.
    pub(crate) fn structure_flows(&mut self) -> bool {
        let entry = self.entry;
        while self.analyze(entry, 0, u32::MAX) {
            if self.fuel.is_exhausted() {
                break;
            }
        }
        self.graph.live_flows() == [entry] && !self.fuel.is_exhausted()
    }
}

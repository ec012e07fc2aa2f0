//! Structuring of the exception table: `try`/`catch`, `finally` subroutines and `synchronized`.

use crate::analysis::Analysis;
use crate::ast::{Expression, Str};
use crate::flow::{FlowId, SuccessorInfo};
use crate::input::{ExceptionHandler, StackOp};
use crate::structured::{BlockId, BlockKind};
use crate::variables::{LocalId, LocalKind};
use log::trace;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExceptionError {
    #[error("No instruction starts at {address}")]
    NoInstruction { address: u32 },

    #[error("Protected range {start}..{end} does not reduce to a single flow block")]
    RangeNotReduced { start: u32, end: u32 },

    #[error("Handler at {handler} is reachable without an exception")]
    HandlerHasPredecessors { handler: u32 },

    #[error("Handler at {handler} does not follow its protected range")]
    HandlerNotAdjacent { handler: u32 },

    #[error("Subroutine at {address} does not start by storing its return address and end with ret")]
    MalformedSubroutine { address: u32 },

    #[error("Subroutine call or return outside a finally block")]
    StraySubroutine,
}

/// One row of the normalized exception table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Entry<'code> {
    start: u32,
    end: u32,
    handler: u32,
    class: Option<Str<'code>>,
}

/// Coalesces adjacent rows with the same handler and class, drops rows protecting their own
/// handler, and orders the rest innermost first.
fn normalize<'code>(handlers: &[ExceptionHandler<'code>]) -> Vec<Entry<'code>> {
    let mut entries: Vec<Entry<'code>> = Vec::new();
    for handler in handlers {
        let entry = Entry {
            start: handler.start,
            end: handler.end,
            handler: handler.handler,
            class: handler.class,
        };
        if let Some(last) = entries.last_mut()
            && last.end == entry.start
            && last.handler == entry.handler
            && last.class == entry.class
        {
            last.end = entry.end;
            continue;
        }
        entries.push(entry);
    }
    entries.retain(|entry| !(entry.start <= entry.handler && entry.handler < entry.end));
    entries.sort_by_key(|entry| (core::cmp::Reverse(entry.start), entry.end));
    entries
}

impl<'code> Analysis<'code> {
    pub(crate) fn analyze_exceptions(
        &mut self,
        handlers: &[ExceptionHandler<'code>],
    ) -> Result<(), ExceptionError> {
        let entries = normalize(handlers);
        let mut try_ranges: FxHashMap<BlockId, (u32, u32)> = FxHashMap::default();

        for (index, entry) in entries.iter().enumerate() {
            trace!(
                "Handler {:#x} for {:#x}..{:#x}",
                entry.handler,
                entry.start,
                entry.end
            );
            let try_flow = self.flow_starting_at(entry.start)?;
            self.analyze(try_flow, entry.start, entry.end.max(entry.handler));
            if self.graph[try_flow].end() < entry.end {
                return Err(ExceptionError::RangeNotReduced {
                    start: entry.start,
                    end: entry.end,
                });
            }

            let handler_flow = self.flow_starting_at(entry.handler)?;
            if !self.graph[handler_flow].predecessors.is_empty() {
                return Err(ExceptionError::HandlerHasPredecessors {
                    handler: entry.handler,
                });
            }
            let boundary = entries[index + 1..]
                .iter()
                .flat_map(|later| [later.start, later.handler])
                .filter(|&address| address > entry.handler)
                .min()
                .unwrap_or(u32::MAX);
            self.analyze(handler_flow, entry.handler, boundary);
            if self.graph[handler_flow].addr != self.graph[try_flow].end() {
                return Err(ExceptionError::HandlerNotAdjacent {
                    handler: entry.handler,
                });
            }

            let root = self.graph[try_flow].block;
            let existing = try_ranges.get(&root) == Some(&(entry.start, entry.end));
            if entry.class.is_none()
                && !existing
                && (self.try_finally(try_flow, handler_flow)?
                    || self.try_synchronized(try_flow, handler_flow))
            {
                continue;
            }

            let catch = self.make_catch(handler_flow, entry.class);
            if existing && let BlockKind::Try { handlers, .. } = &mut self.blocks[root].kind {
                handlers.push(catch);
                self.blocks[catch].outer = Some(root);
            } else {
                let try_block = self.alloc(BlockKind::Try {
                    body: root,
                    handlers: vec![catch],
                });
                self.graph[try_flow].block = try_block;
                try_ranges.insert(try_block, (entry.start, entry.end));
            }
            self.absorb_handler(try_flow, handler_flow);
        }

        self.check_no_subroutines()
    }

    fn flow_starting_at(&self, address: u32) -> Result<FlowId, ExceptionError> {
        self.graph
            .flow_at(address)
            .filter(|&flow| self.graph[flow].addr == address)
            .ok_or(ExceptionError::NoInstruction { address })
    }

    /// Handlers run after any prefix of the protected code, so their reads may see every write
    /// of the try block.
    fn absorb_handler(&mut self, try_flow: FlowId, handler_flow: FlowId) {
        self.absorb_region(try_flow, handler_flow);
        self.checkpoint();
    }

    fn absorb_region(&mut self, try_flow: FlowId, handler_flow: FlowId) {
        let edge = SuccessorInfo {
            gen_set: self.graph[try_flow].gen_set.clone(),
            ..SuccessorInfo::default()
        };
        self.absorb(try_flow, handler_flow, &edge);
        self.graph[try_flow].last_modified = self.graph[try_flow].block;
    }

    /// Wraps the handler body in a catch clause and binds the exception.
    fn make_catch(&mut self, handler_flow: FlowId, class: Option<Str<'code>>) -> BlockId {
        let body = self.graph[handler_flow].block;
        let first = self.blocks.chain(body)[0];
        let (local, body) = if let Some(local) = self.stored_exception(first) {
            (Some(local), self.drop_leading(handler_flow, first))
        } else if let BlockKind::Special(StackOp::Pop) = self.blocks[first].kind {
            (None, self.drop_leading(handler_flow, first))
        } else {
            let local = self.locals.new_synthetic(LocalKind::Exception);
            let expr = self.exprs.local(local);
            let push = self.alloc(BlockKind::Instruction { expr, push: 1 });
            self.insert_before(first, push);
            (Some(local), self.graph[handler_flow].block)
        };
        self.alloc(BlockKind::Catch { class, local, body })
    }

    /// Removes the first statement of the handler and returns the remaining body.
    fn drop_leading(&mut self, handler_flow: FlowId, first: BlockId) -> BlockId {
        if self.can_remove_statement(first) {
            self.remove_statement(first);
        } else {
            let empty = self.empty();
            self.replace_statement(first, empty);
        }
        self.graph[handler_flow].block
    }

    /// `e = <exception>` with a plain local target.
    fn stored_exception(&self, block: BlockId) -> Option<LocalId> {
        let BlockKind::Instruction { expr, push: 0 } = self.blocks[block].kind else {
            return None;
        };
        let Expression::Assign {
            target,
            op: None,
            value,
        } = self.exprs[expr]
        else {
            return None;
        };
        if !matches!(self.exprs[value], Expression::FreeOperand { .. }) {
            return None;
        }
        self.exprs[target].as_local()
    }

    fn rethrows(&self, block: BlockId, exception: LocalId) -> bool {
        match self.blocks[block].kind {
            BlockKind::Throw { exception: thrown } => self.exprs[thrown]
                .as_local()
                .is_some_and(|local| self.locals.same_slot(local, exception)),
            _ => false,
        }
    }

    /// Handler `e = exc; jsr F; throw e` with subroutine `r = ret_addr; body; ret r` becomes
    /// `try { .. } finally { body }`.
    fn try_finally(
        &mut self,
        try_flow: FlowId,
        handler_flow: FlowId,
    ) -> Result<bool, ExceptionError> {
        let chain = self.blocks.chain(self.graph[handler_flow].block);
        let [store, jsr, throw] = chain[..] else {
            return Ok(false);
        };
        let Some(exception) = self.stored_exception(store) else {
            return Ok(false);
        };
        let BlockKind::Jsr { call } = self.blocks[jsr].kind else {
            return Ok(false);
        };
        if !self.rethrows(throw, exception) {
            return Ok(false);
        }
        let Some(call_jump) = self.blocks[call].jump else {
            return Ok(false);
        };
        let subroutine = self.graph[call_jump].destination;
        let address = self.graph[subroutine].addr;

        self.analyze(subroutine, address, u32::MAX);
        let body = self.graph[subroutine].block;
        let statements = self.blocks.chain(body);
        let (Some(&head), Some(&tail)) = (statements.first(), statements.last()) else {
            return Err(ExceptionError::MalformedSubroutine { address });
        };
        let return_address = self.stored_exception(head);
        let matches = match (return_address, &self.blocks[tail].kind) {
            (Some(stored), BlockKind::Ret { local }) => {
                head != tail && self.locals.same_slot(stored, *local)
            }
            _ => false,
        };
        if !matches {
            return Err(ExceptionError::MalformedSubroutine { address });
        }
        trace!("Finally subroutine at {address:#x}");

        for flow in self.graph.live_flows() {
            for jump in self.graph.jumps_to(flow, subroutine) {
                let call = self.graph[jump].prev;
                self.remove_jump(flow, jump);
                if let Some(jsr) = self.blocks[call].outer {
                    self.remove_subroutine_call(jsr);
                }
            }
        }
        if self.graph[subroutine].predecessors.iter().any(|pred| !pred.is_sentinel()) {
            return Err(ExceptionError::MalformedSubroutine { address });
        }

        self.remove_statement_or_empty(tail);
        self.remove_statement_or_empty(head);
        let finally_body = self.graph[subroutine].block;
        let finally = self.alloc(BlockKind::Finally { body: finally_body });
        let protected = self.graph[try_flow].block;
        let try_block = self.alloc(BlockKind::Try {
            body: protected,
            handlers: vec![finally],
        });
        self.graph[try_flow].block = try_block;

        // The subroutine root now belongs to the finally clause, so the graph is only
        // consistent again once both regions are absorbed.
        self.discard_tree(handler_flow);
        self.absorb_region(try_flow, handler_flow);
        self.absorb_region(try_flow, subroutine);
        self.checkpoint();
        Ok(true)
    }

    /// Replaces a `jsr` by an empty statement keeping its fallthrough jump.
    fn remove_subroutine_call(&mut self, jsr: BlockId) {
        if self.blocks[jsr].jump.is_some() {
            let empty = self.empty();
            self.replace_statement(jsr, empty);
        } else {
            self.remove_statement_or_empty(jsr);
        }
    }

    fn remove_statement_or_empty(&mut self, block: BlockId) {
        if self.can_remove_statement(block) {
            self.remove_statement(block);
        } else {
            let empty = self.empty();
            self.replace_statement(block, empty);
        }
    }

    /// Handler `e = exc; monitorexit(L); throw e` turns the protected block into
    /// `synchronized (L) { .. }`.
    fn try_synchronized(&mut self, try_flow: FlowId, handler_flow: FlowId) -> bool {
        let chain = self.blocks.chain(self.graph[handler_flow].block);
        let [store, exit, throw] = chain[..] else {
            return false;
        };
        let Some(exception) = self.stored_exception(store) else {
            return false;
        };
        let Some(monitor) = self.monitor_exit_local(exit) else {
            return false;
        };
        if !self.rethrows(throw, exception) {
            return false;
        }
        trace!("Synchronized on {monitor:?}");

        let body = self.graph[try_flow].block;
        for block in self.blocks.subtree(body) {
            if self
                .monitor_exit_local(block)
                .is_some_and(|local| self.locals.same_slot(local, monitor))
            {
                self.remove_statement_or_empty(block);
            }
        }
        let body = self.graph[try_flow].block;
        let synchronized = self.alloc(BlockKind::Synchronized {
            local: monitor,
            object: None,
            body,
        });
        self.graph[try_flow].block = synchronized;
        self.transform_from(try_flow, body);

        // The handler only releases the monitor.
        self.discard_tree(handler_flow);
        self.absorb_handler(try_flow, handler_flow);
        true
    }

    /// Drops the code of `flow` together with its outgoing jumps.
    fn discard_tree(&mut self, flow: FlowId) {
        for dest in self.graph.successors_of(flow) {
            for jump in self.graph.jumps_to(flow, dest) {
                self.remove_jump(flow, jump);
            }
        }
        let empty = self.empty();
        self.graph[flow].block = empty;
        self.graph[flow].last_modified = empty;
    }

    fn monitor_exit_local(&self, block: BlockId) -> Option<LocalId> {
        let BlockKind::Instruction { expr, .. } = self.blocks[block].kind else {
            return None;
        };
        let Expression::MonitorExit { object } = self.exprs[expr] else {
            return None;
        };
        self.exprs[object].as_local()
    }

    fn check_no_subroutines(&self) -> Result<(), ExceptionError> {
        for flow in self.graph.live_flows() {
            let root = self.graph[flow].block;
            if self
                .blocks
                .subtree(root)
                .into_iter()
                .any(|block| {
                    matches!(
                        self.blocks[block].kind,
                        BlockKind::Jsr { .. } | BlockKind::Ret { .. }
                    )
                })
            {
                return Err(ExceptionError::StraySubroutine);
            }
        }
        Ok(())
    }
}

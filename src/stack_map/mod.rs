//! Threads the abstract operand stack through the finished tree. Values still passed on the stack
//! become synthetic locals; `remove_push` then inlines the ones used exactly once.

mod remove_push;

use crate::analysis::Analysis;
use crate::ast::{Constant, ExprId, Expression};
use crate::structured::{BlockId, BlockKind, CaseValue, LoopKind};
use crate::variables::{LocalKind, StackError, VariableStack};
use rustc_hash::FxHashMap;

/// Stacks seen at the breaks and continues of each breakable block.
#[derive(Default)]
struct Targets {
    breaks: FxHashMap<BlockId, VariableStack>,
    entries: FxHashMap<BlockId, VariableStack>,
}

type Outgoing = Option<VariableStack>;

impl Analysis<'_> {
    /// Maps every stack value of the method tree to a synthetic local. Fails if two paths meet
    /// with stacks of different shapes.
    pub(crate) fn map_stack(&mut self) -> Result<(), StackError> {
        let root = self.graph[self.entry].block;
        self.graph[self.entry].stack_map = Some(VariableStack::EMPTY);
        let mut targets = Targets::default();
        self.map_block(root, VariableStack::EMPTY, &mut targets)?;
        Ok(())
    }

    /// Pops the free operands of `expr` from `stack`, replacing each by its stack local.
    fn consume(&mut self, expr: ExprId, stack: &VariableStack) -> Result<VariableStack, StackError> {
        let free = self.exprs.free_operands(expr);
        if free.is_empty() {
            return Ok(stack.clone());
        }
        let widths: Vec<u8> = free.iter().map(|&leaf| self.exprs.free_width(leaf)).collect();
        let (rest, popped) = stack.pop(&widths)?;
        for (leaf, local) in free.into_iter().zip(popped) {
            self.exprs[leaf] = Expression::Local(local);
        }
        Ok(rest)
    }

    fn join(&mut self, a: Outgoing, b: Outgoing) -> Result<Outgoing, StackError> {
        Ok(match (a, b) {
            (Some(a), Some(b)) => Some(a.merge(&b, &mut self.locals)?),
            (Some(stack), None) | (None, Some(stack)) => Some(stack),
            (None, None) => None,
        })
    }

    fn map_block(
        &mut self,
        block: BlockId,
        stack: VariableStack,
        targets: &mut Targets,
    ) -> Result<Outgoing, StackError> {
        match self.blocks[block].kind {
            BlockKind::Empty | BlockKind::Description(_) | BlockKind::Jsr { .. } => Ok(Some(stack)),
            BlockKind::Instruction { expr, push } => {
                let rest = self.consume(expr, &stack)?;
                if push == 0 {
                    return Ok(Some(rest));
                }
                let local = self.locals.new_synthetic(LocalKind::Stack);
                let target = self.exprs.local(local);
                let assign = self.exprs.alloc(Expression::Assign {
                    target,
                    op: None,
                    value: expr,
                });
                self.blocks[block].kind = BlockKind::Instruction {
                    expr: assign,
                    push: 0,
                };
                Ok(Some(rest.push(local, push)))
            }
            BlockKind::Return { value } => {
                if let Some(value) = value {
                    self.consume(value, &stack)?;
                }
                Ok(None)
            }
            BlockKind::Throw { exception } => {
                self.consume(exception, &stack)?;
                Ok(None)
            }
            BlockKind::Special(op) => {
                let out = stack.execute_special(op)?;
                self.blocks[block].kind = BlockKind::Empty;
                Ok(Some(out))
            }
            BlockKind::Ret { .. } => Ok(None),
            BlockKind::Sequential { first, second } => {
                let between = self.map_block(first, stack, targets)?;
                let reachable = between.is_some();
                let out = self.map_block(
                    second,
                    between.unwrap_or(VariableStack::EMPTY),
                    targets,
                )?;
                Ok(out.filter(|_| reachable))
            }
            BlockKind::Conditional { cond, trueblock } => {
                let rest = self.consume(cond, &stack)?;
                let taken = self.map_block(trueblock, rest.clone(), targets)?;
                self.join(Some(rest), taken)
            }
            BlockKind::IfThenElse { cond, then, else_ } => {
                let rest = self.consume(cond, &stack)?;
                let then_out = self.map_block(then, rest.clone(), targets)?;
                let else_out = match else_ {
                    Some(else_) => self.map_block(else_, rest, targets)?,
                    None => Some(rest),
                };
                self.join(then_out, else_out)
            }
            BlockKind::Loop {
                kind,
                cond,
                init,
                incr,
                body,
                ..
            } => {
                let mut entry = stack;
                if let Some(init) = init {
                    entry = self.consume(init, &entry)?;
                }
                entry = self.consume(cond, &entry)?;
                targets.entries.insert(block, entry.clone());
                let body_out = self.map_block(body, entry.clone(), targets)?;
                if let Some(out) = &body_out {
                    out.merge(&entry, &mut self.locals)?;
                }
                if let Some(incr) = incr {
                    self.map_block(incr, entry.clone(), targets)?;
                }
                let exits = match kind {
                    _ if self.is_bool(cond, true) => None,
                    LoopKind::DoWhile => body_out,
                    LoopKind::While | LoopKind::For | LoopKind::PossFor => Some(entry),
                };
                let breaks = targets.breaks.remove(&block);
                self.join(exits, breaks)
            }
            BlockKind::Switch {
                selector,
                ref cases,
                ..
            } => {
                let cases = cases.clone();
                let rest = self.consume(selector, &stack)?;
                let mut previous: Outgoing = None;
                let mut has_default = false;
                for case in cases {
                    let BlockKind::Case { value, body, .. } = self.blocks[case].kind else {
                        continue;
                    };
                    has_default |= value == CaseValue::Default;
                    let entry = self
                        .join(Some(rest.clone()), previous)?
                        .unwrap_or_else(|| rest.clone());
                    previous = self.map_block(body, entry, targets)?;
                }
                let skipped = (!has_default).then_some(rest);
                let out = self.join(previous, skipped)?;
                let breaks = targets.breaks.remove(&block);
                self.join(out, breaks)
            }
            BlockKind::Case { body, .. }
            | BlockKind::Catch { body, .. }
            | BlockKind::Finally { body } => self.map_block(body, stack, targets),
            BlockKind::Synchronized { object, body, .. } => {
                let rest = match object {
                    Some(object) => self.consume(object, &stack)?,
                    None => stack,
                };
                self.map_block(body, rest, targets)
            }
            BlockKind::Try { body, ref handlers } => {
                let handlers = handlers.clone();
                let mut out = self.map_block(body, stack, targets)?;
                for handler in handlers {
                    // The machine clears the operand stack before entering a handler.
                    let handled = self.map_block(handler, VariableStack::EMPTY, targets)?;
                    out = self.join(out, handled)?;
                }
                Ok(out)
            }
            BlockKind::Break { target, .. } => {
                let merged = match targets.breaks.remove(&target) {
                    Some(seen) => seen.merge(&stack, &mut self.locals)?,
                    None => stack,
                };
                targets.breaks.insert(target, merged);
                Ok(None)
            }
            BlockKind::Continue { target, .. } => {
                if let Some(entry) = targets.entries.get(&target) {
                    entry.merge(&stack, &mut self.locals)?;
                }
                Ok(None)
            }
        }
    }

    fn is_bool(&self, expr: ExprId, value: bool) -> bool {
        matches!(self.exprs[expr], Expression::Const(Constant::Bool(b)) if b == value)
    }
}

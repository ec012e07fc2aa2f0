//! Peephole rules folding short statement sequences into expressions.
//!
//! A rule looks at one statement and the statements right before it. It either rewrites them
//! and returns the statement now standing in their place, or returns `None` without touching
//! anything.

mod assign;
mod conditional;
mod expression;
mod loops;
mod special;

use crate::analysis::Analysis;
use crate::ast::{ExprId, Expression};
use crate::flow::FlowId;
use crate::structured::{BlockId, BlockKind};
use log::debug;

type Rule<'code> = fn(&mut Analysis<'code>, BlockId) -> Option<BlockId>;

impl<'code> Analysis<'code> {
    /// Rules that only need the statements before the one they look at. `dup` waits until the
    /// whole chain is known, so it only runs in the fixpoint.
    fn rules() -> [(&'static str, Rule<'code>); 16] {
        [
            ("create expression", Self::create_expression),
            ("constructor", Self::fold_constructor),
            ("array literal", Self::fold_array_literal),
            ("dup store", Self::fold_dup_store),
            ("pop", Self::remove_pop),
            ("swap", Self::remove_swap),
            ("compound assignment", Self::fold_compound),
            ("field compound assignment", Self::fold_compound_through_dup),
            ("post increment", Self::fold_post_increment),
            ("post increment through dup", Self::fold_post_increment_through_dup),
            ("pre increment", Self::fold_pre_increment),
            ("ternary", Self::fold_ternary),
            ("combine conditions", Self::combine_if_goto),
            ("for initializer", Self::fold_for_initializer),
            ("synchronized object", Self::complete_synchronized),
            ("remove empty", Self::remove_empty),
        ]
    }

    /// Tries every rule on `block` and returns the replacement of the first that matched.
    fn apply_rules(&mut self, block: BlockId, late: bool) -> Option<BlockId> {
        let mut rules = Self::rules().to_vec();
        if late {
            rules.push(("dup", Self::remove_dup));
        }
        for (name, rule) in rules {
            if let Some(replacement) = rule(self, block) {
                self.rewrites += 1;
                if self.options.verbose {
                    debug!("{name}: {block:?} -> {replacement:?}");
                }
                return Some(replacement);
            }
        }
        None
    }

    /// Runs the rules from `start` to the end of its chain, then on every enclosing statement up
    /// to the root of `flow`.
    pub(crate) fn transform_from(&mut self, flow: FlowId, start: BlockId) {
        let root = self.graph[flow].block;
        let mut current = if self.blocks.is_within(start, root) {
            start
        } else {
            root
        };
        loop {
            if !self.fuel.tick() {
                return;
            }
            if let Some(replacement) = self.apply_rules(current, false) {
                current = replacement;
                continue;
            }
            if let Some(next) = self.blocks.next_statement(current) {
                current = next;
                continue;
            }
            match self.enclosing_statement(current) {
                Some(outer) => current = outer,
                None => return,
            }
        }
    }

    /// Applies rules to every block of the tree of `flow` until none matches. Returns the number
    /// of rewrites.
    pub fn transform_to_fixpoint(&mut self, flow: FlowId) -> usize {
        let before = self.rewrites;
        loop {
            let mut changed = false;
            let root = self.graph[flow].block;
            for block in self.blocks.subtree(root) {
                if !self.blocks.is_within(block, self.graph[flow].block) {
                    continue;
                }
                if !self.fuel.tick() {
                    return self.rewrites - before;
                }
                changed |= self.apply_rules(block, true).is_some();
            }
            if !changed {
                return self.rewrites - before;
            }
        }
    }

    /// The closest ancestor that is a statement of some chain, skipping sequential nodes.
    fn enclosing_statement(&self, block: BlockId) -> Option<BlockId> {
        self.blocks
            .ancestors(block)
            .find(|&b| !matches!(self.blocks[b].kind, BlockKind::Sequential { .. }))
    }

    /// `(expr, width)` of a jump-free instruction pushing a value.
    fn pushed(&self, block: BlockId) -> Option<(ExprId, u8)> {
        match self.blocks[block].kind {
            BlockKind::Instruction { expr, push } if push > 0 && self.blocks[block].jump.is_none() => {
                Some((expr, push))
            }
            _ => None,
        }
    }

    /// The expression of an instruction used as a statement.
    fn statement_expr(&self, block: BlockId) -> Option<ExprId> {
        match self.blocks[block].kind {
            BlockKind::Instruction { expr, push: 0 } => Some(expr),
            _ => None,
        }
    }

    /// The `count` statements right before `block`, oldest first.
    fn preceding(&self, block: BlockId, count: usize) -> Option<Vec<BlockId>> {
        let mut out = Vec::with_capacity(count);
        let mut current = block;
        for _ in 0..count {
            current = self.blocks.prev_statement(current)?;
            out.push(current);
        }
        out.reverse();
        Some(out)
    }

    /// Whether all of `statements` can be dropped from their chain.
    pub(crate) fn removable(&self, statements: &[BlockId]) -> bool {
        statements.iter().all(|&statement| {
            self.blocks[statement].jump.is_none()
                && self.blocks[statement].declare.is_empty()
                && self.can_remove_statement(statement)
        })
    }

    /// Drops `statements` (see `removable`) and puts `new` in the place of `last`.
    fn replace_run(&mut self, statements: &[BlockId], last: BlockId, new: BlockId) -> BlockId {
        for &statement in statements {
            self.remove_statement(statement);
        }
        if new != last {
            self.replace_statement(last, new);
        }
        new
    }

    fn instruction(&mut self, expr: ExprId, push: u8) -> BlockId {
        self.alloc(BlockKind::Instruction { expr, push })
    }

    /// A local or constant, which may be duplicated or reordered freely.
    fn is_simple(&self, expr: ExprId) -> bool {
        matches!(self.exprs[expr], Expression::Local(_) | Expression::Const(_))
    }

    /// An empty statement without a jump inside a chain.
    fn remove_empty(&mut self, block: BlockId) -> Option<BlockId> {
        if !matches!(self.blocks[block].kind, BlockKind::Empty)
            || self.blocks[block].jump.is_some()
            || !self.can_remove_statement(block)
        {
            return None;
        }
        let parent = self.blocks[block].outer?;
        let BlockKind::Sequential { first, second } = self.blocks[parent].kind else {
            return None;
        };
        let survivor = if first == block { second } else { first };
        self.remove_statement(block);
        Some(survivor)
    }

    /// Drops the `return;` closing a void method.
    pub(crate) fn remove_trailing_return(&mut self, root: BlockId) {
        if !self.returns_void {
            return;
        }
        let last = self.blocks.chain_tail(root);
        if !matches!(self.blocks[last].kind, BlockKind::Return { value: None })
            || self.blocks[last].jump.is_some()
        {
            return;
        }
        if self.can_remove_statement(last) {
            self.remove_statement(last);
        } else {
            self.blocks[last].kind = BlockKind::Empty;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, CompareOp, Constant, IncOp, LogicalOp, Str};
    use crate::input::{InvokeKind, StackOp};
    use crate::options::{AnalysisOptions, Fuel};
    use crate::variables::{LocalId, LocalKind};
    use noak::MStr;

    fn analysis() -> Analysis<'static> {
        Analysis::new(AnalysisOptions::default(), Fuel::new(10_000))
    }

    fn chain(analysis: &mut Analysis<'static>, kinds: Vec<BlockKind<'static>>) -> FlowId {
        let blocks: Vec<BlockId> = kinds.into_iter().map(|kind| analysis.alloc(kind)).collect();
        let flow = analysis.graph.add_flow(0, 1, blocks[0]);
        let mut tail = blocks[0];
        for &block in &blocks[1..] {
            analysis.wrap_sequential(tail, block);
            tail = block;
        }
        flow
    }

    fn push(analysis: &mut Analysis<'static>, expr: Expression<'static>) -> BlockKind<'static> {
        let expr = analysis.exprs.alloc(expr);
        BlockKind::Instruction { expr, push: 1 }
    }

    fn store(analysis: &mut Analysis<'static>, local: LocalId) -> BlockKind<'static> {
        let target = analysis.exprs.local(local);
        let value = analysis.exprs.free(1);
        let expr = analysis.exprs.alloc(Expression::Assign {
            target,
            op: None,
            value,
        });
        BlockKind::Instruction { expr, push: 0 }
    }

    fn root_expr<'a>(analysis: &'a Analysis<'static>, flow: FlowId) -> &'a Expression<'static> {
        let BlockKind::Instruction { expr, .. } = analysis.blocks[analysis.graph[flow].block].kind
        else {
            panic!("root is not a single instruction");
        };
        &analysis.exprs[expr]
    }

    #[test]
    fn folds_reload_into_compound_assignment() {
        let mut analysis = analysis();
        let read = analysis.locals.new_slot(LocalKind::Slot, 1);
        let write = analysis.locals.new_slot(LocalKind::Slot, 1);
        let load = push(&mut analysis, Expression::Local(read));
        let one = push(&mut analysis, Expression::Const(Constant::Int(1)));
        let lhs = analysis.exprs.free(1);
        let rhs = analysis.exprs.free(1);
        let add = push(&mut analysis, Expression::BinOp {
            op: BinOp::Add,
            lhs,
            rhs,
        });
        let assign = store(&mut analysis, write);
        let flow = chain(&mut analysis, vec![load, one, add, assign]);

        assert!(analysis.transform_to_fixpoint(flow) > 0);
        let Expression::Assign {
            op: Some(BinOp::Add),
            value,
            ..
        } = *root_expr(&analysis, flow)
        else {
            panic!("expected a compound assignment");
        };
        assert!(matches!(analysis.exprs[value], Expression::Const(Constant::Int(1))));
        assert!(analysis.locals.same(read, write));
        assert_eq!(analysis.transform_to_fixpoint(flow), 0);
    }

    #[test]
    fn post_increment_feeds_a_store() {
        let mut analysis = analysis();
        let read = analysis.locals.new_slot(LocalKind::Slot, 1);
        let counter = analysis.locals.new_slot(LocalKind::Slot, 1);
        let result = analysis.locals.new_slot(LocalKind::Slot, 2);
        let load = push(&mut analysis, Expression::Local(read));
        let target = analysis.exprs.local(counter);
        let one = analysis.exprs.int(1);
        let iinc = analysis.exprs.alloc(Expression::Assign {
            target,
            op: Some(BinOp::Add),
            value: one,
        });
        let assign = store(&mut analysis, result);
        let flow = chain(&mut analysis, vec![
            load,
            BlockKind::Instruction { expr: iinc, push: 0 },
            assign,
        ]);

        analysis.transform_to_fixpoint(flow);
        let Expression::Assign { value, .. } = *root_expr(&analysis, flow) else {
            panic!("expected an assignment");
        };
        assert!(matches!(
            analysis.exprs[value],
            Expression::Increment {
                op: IncOp::Increment,
                prefix: false,
                ..
            }
        ));
    }

    #[test]
    fn constructor_result_is_stored() {
        let mut analysis = analysis();
        let class = Str(MStr::from_mutf8(b"T").unwrap());
        let result = analysis.locals.new_slot(LocalKind::Slot, 2);
        let new = push(&mut analysis, Expression::NewUninitialized { class });
        let five = push(&mut analysis, Expression::Const(Constant::Int(5)));
        let object = analysis.exprs.free(1);
        let argument = analysis.exprs.free(1);
        let call = analysis.exprs.alloc(Expression::Call {
            kind: InvokeKind::Special,
            class,
            name: Str(MStr::from_mutf8(b"<init>").unwrap()),
            descriptor: Str(MStr::from_mutf8(b"(I)V").unwrap()),
            object: Some(object),
            arguments: vec![argument],
        });
        let assign = store(&mut analysis, result);
        let flow = chain(&mut analysis, vec![
            new,
            BlockKind::Special(StackOp::Dup),
            five,
            BlockKind::Instruction { expr: call, push: 0 },
            assign,
        ]);

        analysis.transform_to_fixpoint(flow);
        let Expression::Assign { value, .. } = *root_expr(&analysis, flow) else {
            panic!("expected an assignment");
        };
        let Expression::Constructor { ref arguments, .. } = analysis.exprs[value] else {
            panic!("expected a constructor");
        };
        assert_eq!(arguments.len(), 1);
    }

    #[test]
    fn boolean_ternary_becomes_its_condition() {
        let mut analysis = analysis();
        let read = analysis.locals.new_slot(LocalKind::Slot, 1);
        let result = analysis.locals.new_slot(LocalKind::Slot, 2);
        let lhs = analysis.exprs.local(read);
        let rhs = analysis.exprs.int(0);
        let cond = analysis.exprs.alloc(Expression::Compare {
            op: CompareOp::Lt,
            lhs,
            rhs,
        });
        let yes = push(&mut analysis, Expression::Const(Constant::Int(1)));
        let then = analysis.alloc(yes);
        let no = push(&mut analysis, Expression::Const(Constant::Int(0)));
        let else_ = analysis.alloc(no);
        let assign = store(&mut analysis, result);
        let flow = chain(&mut analysis, vec![
            BlockKind::IfThenElse {
                cond,
                then,
                else_: Some(else_),
            },
            assign,
        ]);

        analysis.transform_to_fixpoint(flow);
        let Expression::Assign { value, .. } = *root_expr(&analysis, flow) else {
            panic!("expected an assignment");
        };
        assert!(matches!(
            analysis.exprs[value],
            Expression::Compare {
                op: CompareOp::Lt,
                ..
            }
        ));
    }

    #[test]
    fn conditional_jumps_to_one_target_combine() {
        let mut analysis = analysis();
        let target = analysis.empty();
        let exit = analysis.graph.add_flow(10, 1, target);
        let mut conds = Vec::new();
        let mut trueblocks = Vec::new();
        for slot in [1, 2] {
            let local = analysis.locals.new_slot(LocalKind::Slot, slot);
            let lhs = analysis.exprs.local(local);
            let rhs = analysis.exprs.int(0);
            let cond = analysis.exprs.alloc(Expression::Compare {
                op: CompareOp::Eq,
                lhs,
                rhs,
            });
            let trueblock = analysis.empty();
            trueblocks.push(trueblock);
            conds.push(BlockKind::Conditional { cond, trueblock });
        }
        let flow = chain(&mut analysis, conds);
        for trueblock in trueblocks {
            analysis.add_jump(flow, trueblock, exit);
        }

        analysis.transform_to_fixpoint(flow);
        let root = analysis.graph[flow].block;
        let BlockKind::Conditional { cond, .. } = analysis.blocks[root].kind else {
            panic!("expected a single conditional");
        };
        assert!(matches!(
            analysis.exprs[cond],
            Expression::Logical {
                op: LogicalOp::Or,
                ..
            }
        ));
        assert_eq!(analysis.graph.jumps_to(flow, exit).len(), 1);
        assert!(analysis.check_consistency().is_ok());
    }
}

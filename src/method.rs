//! The per-method entry point: builds the flow graph, structures it and resolves the operand stack.

use crate::analysis::Analysis;
use crate::exceptions::ExceptionError;
use crate::flow::{BuildError, ConsistencyError};
use crate::input::{ExceptionHandler, Instruction, MethodInfo};
use crate::options::{AnalysisOptions, Fuel};
use crate::structured::{BlockId, BlockKind};
use crate::variables::{StackError, VariableSet};
use core::fmt;
use log::{trace, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MethodAnalysisError {
    #[error("While building flow blocks: {0}")]
    Build(#[from] BuildError),

    #[error("While structuring exception handlers: {0}")]
    Exceptions(#[from] ExceptionError),

    #[error("While mapping the operand stack: {0}")]
    Stack(#[from] StackError),

    #[error("While checking consistency: {0}")]
    Consistency(#[from] ConsistencyError),
}

/// The structured tree of one method, together with the arenas it lives in.
pub struct MethodBody<'code> {
    pub analysis: Analysis<'code>,
    pub root: BlockId,
    /// Structuring got stuck and the method was emitted as a dispatcher loop.
    pub degraded: bool,
}

impl fmt::Display for MethodBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.analysis.display(self.root))
    }
}

pub fn analyze_method<'code>(
    method: &MethodInfo<'code>,
    code: &[Instruction<'code>],
    handlers: &[ExceptionHandler<'code>],
    options: AnalysisOptions,
) -> Result<MethodBody<'code>, MethodAnalysisError> {
    trace!("Analyzing {} instructions", code.len());
    let mut analysis = Analysis::build(method, code, options)?;
    let handler_addresses: Vec<u32> = handlers.iter().map(|handler| handler.handler).collect();
    analysis.remove_dead_flows(&handler_addresses);
    analysis.analyze_exceptions(handlers)?;
    let structured = analysis.structure_flows();
    if let Some(error) = analysis.broken.take() {
        return Err(error.into());
    }
    if !structured {
        analysis.degrade_to_dispatcher();
        // The finishing passes get a fresh budget.
        analysis.fuel = options.fuel_for(code.len());
    }

    let entry = analysis.entry;
    analysis.merge_end_block(entry);
    analysis.transform_to_fixpoint(entry);
    analysis.downgrade_possible_for(analysis.graph[entry].block);
    analysis.remove_trailing_return(analysis.graph[entry].block);

    analysis.map_stack()?;
    analysis.remove_push();
    analysis.transform_to_fixpoint(entry);

    let live_in = analysis.graph[entry].in_set.clone();
    let parameters: VariableSet = analysis.parameters.iter().copied().collect();
    analysis.merge_by_slot(&live_in, &parameters);
    analysis.place_declarations();

    if let Some(error) = analysis.broken.take() {
        return Err(error.into());
    }
    if options.check_consistency {
        analysis.check_consistency()?;
    }
    let root = analysis.graph[entry].block;
    Ok(MethodBody {
        analysis,
        root,
        degraded: !structured,
    })
}

/// Like [`analyze_method`], but a method that cannot be analyzed is replaced by a description of
/// the failure so that the surrounding output stays usable.
pub fn analyze_method_or_describe<'code>(
    method: &MethodInfo<'code>,
    code: &[Instruction<'code>],
    handlers: &[ExceptionHandler<'code>],
    options: AnalysisOptions,
) -> MethodBody<'code> {
    match analyze_method(method, code, handlers, options) {
        Ok(body) => body,
        Err(error) => {
            warn!("{error}");
            let mut analysis = Analysis::new(options, Fuel::new(0));
            let root = analysis.alloc(BlockKind::Description(format!("error: {error}")));
            MethodBody {
                analysis,
                root,
                degraded: true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinOp, CompareOp, Str};
    use crate::input::{IfOperand, InvokeKind, Opcode, StackOp, ValueKind};
    use crate::structured::{CaseValue, LoopKind};
    use noak::MStr;
    use proptest::prelude::*;

    fn method(descriptor: &'static [u8]) -> MethodInfo<'static> {
        MethodInfo {
            is_static: true,
            descriptor: MStr::from_mutf8(descriptor).unwrap(),
            max_locals: 4,
        }
    }

    fn load(slot: u16) -> Opcode<'static> {
        Opcode::Load {
            kind: ValueKind::Int,
            slot,
        }
    }

    fn store(slot: u16) -> Opcode<'static> {
        Opcode::Store {
            kind: ValueKind::Int,
            slot,
        }
    }

    fn int(value: i32) -> Opcode<'static> {
        Opcode::Const(crate::ast::Constant::Int(value))
    }

    fn branch(op: CompareOp, target: u32) -> Opcode<'static> {
        Opcode::If {
            op,
            operand: IfOperand::Zero,
            target,
        }
    }

    /// Lays the opcodes out back to back, reading each length from the list.
    fn code(opcodes: Vec<(u32, Opcode<'static>)>) -> Vec<Instruction<'static>> {
        let mut address = 0;
        opcodes
            .into_iter()
            .map(|(length, opcode)| {
                let insn = Instruction::new(address, length, opcode);
                address += length;
                insn
            })
            .collect()
    }

    fn analyze(descriptor: &'static [u8], code: &[Instruction<'static>]) -> MethodBody<'static> {
        analyze_method(&method(descriptor), code, &[], AnalysisOptions::default()).unwrap()
    }

    fn kinds<'a>(body: &'a MethodBody<'static>) -> Vec<&'a BlockKind<'static>> {
        body.analysis
            .blocks
            .subtree(body.root)
            .into_iter()
            .map(|block| &body.analysis.blocks[block].kind)
            .collect()
    }

    #[test]
    fn straight_line_code_stays_in_order() {
        let code = code(vec![
            (1, int(1)),
            (1, store(2)),
            (1, int(2)),
            (1, store(3)),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"()V", &code);
        assert!(!body.degraded);
        assert_eq!(body.analysis.graph.jump_count(), 0);
        assert_eq!(
            body.to_string(),
            "var slot2;\nslot2 = 1;\nvar slot3;\nslot3 = 2;\n"
        );
    }

    #[test]
    fn increment_folds_into_compound_assignment() {
        let code = code(vec![
            (1, load(1)),
            (1, int(1)),
            (
                1,
                Opcode::Binary {
                    op: BinOp::Add,
                    kind: ValueKind::Int,
                },
            ),
            (1, store(1)),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(II)V", &code);
        assert!(kinds(&body).iter().any(|kind| matches!(
            kind,
            BlockKind::Instruction { expr, push: 0 }
                if matches!(body.analysis.exprs[*expr], crate::ast::Expression::Assign { op: Some(_), .. })
        )));
        assert_eq!(body.to_string(), "slot1++;\n");
    }

    #[test]
    fn load_then_iinc_is_a_post_increment() {
        let code = code(vec![
            (1, load(1)),
            (3, Opcode::Iinc { slot: 1, delta: 1 }),
            (1, store(2)),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(II)V", &code);
        assert!(body.to_string().contains("slot2 = slot1++;"));
    }

    #[test]
    fn diamond_becomes_if_else() {
        let code = code(vec![
            (1, load(0)),
            (3, branch(CompareOp::Eq, 9)),
            (1, int(1)),
            (1, store(1)),
            (3, Opcode::Goto(11)),
            (1, int(2)),
            (1, store(1)),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(I)V", &code);
        let kinds = kinds(&body);
        let ifs = kinds
            .iter()
            .filter(|kind| matches!(kind, BlockKind::IfThenElse { else_: Some(_), .. }))
            .count();
        assert_eq!(ifs, 1);
        assert_eq!(body.analysis.graph.jump_count(), 0);
        assert!(!body.to_string().contains("goto"));
    }

    #[test]
    fn early_exit_becomes_break() {
        let code = code(vec![
            (1, load(1)),
            (3, branch(CompareOp::Le, 17)),
            (3, Opcode::Iinc { slot: 2, delta: 1 }),
            (1, load(0)),
            (3, branch(CompareOp::Ne, 17)),
            (3, Opcode::Iinc { slot: 1, delta: -1 }),
            (3, Opcode::Goto(0)),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(II)V", &code);
        let kinds = kinds(&body);
        let loops = kinds
            .iter()
            .filter(|kind| matches!(kind, BlockKind::Loop { .. }))
            .count();
        assert_eq!(loops, 1);
        assert!(kinds.iter().any(|kind| matches!(kind, BlockKind::Break { .. })));
        assert_eq!(body.analysis.graph.jump_count(), 0);
        assert!(!body.degraded);
    }

    #[test]
    fn adjacent_cases_fall_through() {
        let code = code(vec![
            (1, load(0)),
            (
                8,
                Opcode::Switch {
                    cases: vec![(1, 9), (2, 11)],
                    default: 13,
                },
            ),
            (2, Opcode::Iinc { slot: 1, delta: 1 }),
            (2, Opcode::Iinc { slot: 1, delta: 2 }),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(II)V", &code);
        let kinds = kinds(&body);
        let second = kinds.iter().find_map(|kind| match kind {
            BlockKind::Case {
                value: CaseValue::Value(2),
                fallthrough,
                ..
            } => Some(*fallthrough),
            _ => None,
        });
        assert_eq!(second, Some(true));
        let increments = body.to_string().matches("slot1 +=").count()
            + body.to_string().matches("slot1++").count();
        assert_eq!(increments, 2);
    }

    #[test]
    fn fixpoint_is_idempotent() {
        let code = code(vec![
            (1, load(1)),
            (3, branch(CompareOp::Le, 10)),
            (3, Opcode::Iinc { slot: 1, delta: -1 }),
            (3, Opcode::Goto(0)),
            (1, Opcode::Return(None)),
        ]);
        let mut body = analyze(b"(II)V", &code);
        assert!(kinds(&body)
            .iter()
            .any(|kind| matches!(kind, BlockKind::Loop { kind: LoopKind::While, .. })));
        let entry = body.analysis.entry;
        assert_eq!(body.analysis.transform_to_fixpoint(entry), 0);
    }

    #[test]
    fn exhausted_fuel_yields_a_dispatcher() {
        let code = code(vec![
            (3, Opcode::Iinc { slot: 0, delta: 1 }),
            (3, Opcode::Iinc { slot: 1, delta: 1 }),
            (1, Opcode::Return(None)),
        ]);
        let options = AnalysisOptions {
            fuel: Some(1),
            ..AnalysisOptions::default()
        };
        let body = analyze_method(&method(b"(II)V"), &code, &[], options).unwrap();
        assert!(body.degraded);
        let text = body.to_string();
        assert!(text.contains("switch (selector)"), "{text}");
        assert!(text.contains("selector = 0;"), "{text}");
    }

    #[test]
    fn unbalanced_stacks_are_rejected() {
        let code = code(vec![
            (1, load(0)),
            (3, branch(CompareOp::Eq, 6)),
            (1, int(1)),
            (1, int(2)),
            (1, Opcode::Return(Some(ValueKind::Int))),
        ]);
        let result = analyze_method(&method(b"(I)I"), &code, &[], AnalysisOptions::default());
        assert!(matches!(result, Err(MethodAnalysisError::Stack(_))));

        let described =
            analyze_method_or_describe(&method(b"(I)I"), &code, &[], AnalysisOptions::default());
        assert!(described.degraded);
        assert!(described.to_string().starts_with("/* error: While mapping the operand stack"));
    }

    fn name(text: &'static [u8]) -> Str<'static> {
        Str(MStr::from_mutf8(text).unwrap())
    }

    fn call(method: &'static [u8]) -> Opcode<'static> {
        Opcode::Invoke {
            kind: InvokeKind::Static,
            class: name(b"C"),
            name: name(method),
            descriptor: name(b"()V"),
        }
    }

    fn reference(load: bool, slot: u16) -> Opcode<'static> {
        if load {
            Opcode::Load {
                kind: ValueKind::Reference,
                slot,
            }
        } else {
            Opcode::Store {
                kind: ValueKind::Reference,
                slot,
            }
        }
    }

    fn catch_any(start: u32, end: u32, handler: u32) -> ExceptionHandler<'static> {
        ExceptionHandler {
            start,
            end,
            handler,
            class: None,
        }
    }

    fn count(body: &MethodBody<'static>, pred: impl Fn(&BlockKind<'static>) -> bool) -> usize {
        kinds(body).into_iter().filter(|&kind| pred(kind)).count()
    }

    #[test]
    fn static_field_update_is_compound() {
        let field = |is_static| Opcode::GetField {
            is_static,
            class: name(b"C"),
            name: name(b"x"),
            descriptor: name(b"I"),
        };
        let code = code(vec![
            (3, field(true)),
            (1, int(1)),
            (
                1,
                Opcode::Binary {
                    op: BinOp::Add,
                    kind: ValueKind::Int,
                },
            ),
            (
                3,
                Opcode::PutField {
                    is_static: true,
                    class: name(b"C"),
                    name: name(b"x"),
                    descriptor: name(b"I"),
                },
            ),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"()V", &code);
        assert_eq!(body.to_string(), "C.x++;\n");
    }

    #[test]
    fn unreachable_code_is_dropped() {
        let code = code(vec![
            (3, call(b"f")),
            (3, Opcode::Goto(7)),
            (1, Opcode::Nop),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"()V", &code);
        assert!(!body.degraded);
        assert_eq!(body.analysis.graph.jump_count(), 0);
        assert_eq!(body.to_string(), "C.f();\n");
    }

    #[test]
    fn subroutine_becomes_finally() {
        let code = code(vec![
            (3, call(b"f")),
            (3, Opcode::Jsr(15)),
            (3, Opcode::Goto(21)),
            (1, reference(false, 0)),
            (3, Opcode::Jsr(15)),
            (1, reference(true, 0)),
            (1, Opcode::Throw),
            (1, reference(false, 1)),
            (3, call(b"g")),
            (2, Opcode::Ret(1)),
            (1, Opcode::Return(None)),
        ]);
        let options = AnalysisOptions {
            check_consistency: true,
            ..AnalysisOptions::default()
        };
        let body = analyze_method(&method(b"()V"), &code, &[catch_any(0, 6, 9)], options).unwrap();
        assert!(!body.degraded);
        assert_eq!(count(&body, |kind| matches!(kind, BlockKind::Try { .. })), 1);
        assert_eq!(count(&body, |kind| matches!(kind, BlockKind::Finally { .. })), 1);
        assert_eq!(
            count(&body, |kind| matches!(kind, BlockKind::Jsr { .. } | BlockKind::Ret { .. })),
            0
        );
        let text = body.to_string();
        assert!(text.contains("C.f();"), "{text}");
        assert!(text.contains("C.g();"), "{text}");
        assert_eq!(text.matches("C.g();").count(), 1, "{text}");
    }

    #[test]
    fn typed_handler_binds_its_exception() {
        let code = code(vec![
            (3, call(b"f")),
            (3, Opcode::Goto(10)),
            (1, reference(false, 0)),
            (3, call(b"g")),
            (1, Opcode::Return(None)),
        ]);
        let handlers = [ExceptionHandler {
            start: 0,
            end: 3,
            handler: 6,
            class: Some(name(b"java/lang/Exception")),
        }];
        let body =
            analyze_method(&method(b"()V"), &code, &handlers, AnalysisOptions::default()).unwrap();
        assert!(!body.degraded);
        assert_eq!(
            count(&body, |kind| matches!(
                kind,
                BlockKind::Catch {
                    class: Some(_),
                    local: Some(_),
                    ..
                }
            )),
            1
        );
        let text = body.to_string();
        assert!(text.contains("catch (java.lang.Exception "), "{text}");
    }

    #[test]
    fn monitor_handler_becomes_synchronized() {
        let code = code(vec![
            (1, reference(true, 0)),
            (1, Opcode::Stack(StackOp::Dup)),
            (1, reference(false, 1)),
            (1, Opcode::MonitorEnter),
            (3, call(b"f")),
            (1, reference(true, 1)),
            (1, Opcode::MonitorExit),
            (3, Opcode::Goto(17)),
            (1, reference(false, 2)),
            (1, reference(true, 1)),
            (1, Opcode::MonitorExit),
            (1, reference(true, 2)),
            (1, Opcode::Throw),
            (1, Opcode::Return(None)),
        ]);
        let instance = MethodInfo {
            is_static: false,
            ..method(b"()V")
        };
        let handlers = [catch_any(4, 9, 12), catch_any(12, 15, 12)];
        let body = analyze_method(&instance, &code, &handlers, AnalysisOptions::default()).unwrap();
        assert!(!body.degraded);
        assert_eq!(
            count(&body, |kind| matches!(kind, BlockKind::Synchronized { .. })),
            1
        );
        let text = body.to_string();
        assert!(!text.contains("monitorexit"), "{text}");
        assert!(text.contains("C.f();"), "{text}");
    }

    #[test]
    fn counted_loop_becomes_for() {
        let code = code(vec![
            (1, int(0)),
            (1, store(1)),
            (1, load(1)),
            (1, load(0)),
            (
                3,
                Opcode::If {
                    op: CompareOp::Ge,
                    operand: IfOperand::Value(ValueKind::Int),
                    target: 16,
                },
            ),
            (3, call(b"f")),
            (3, Opcode::Iinc { slot: 1, delta: 1 }),
            (3, Opcode::Goto(2)),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(I)V", &code);
        assert_eq!(
            count(&body, |kind| matches!(
                kind,
                BlockKind::Loop {
                    kind: LoopKind::For,
                    init: Some(_),
                    incr: Some(_),
                    ..
                }
            )),
            1
        );
        let text = body.to_string();
        assert!(text.contains("slot1++) {"), "{text}");
    }

    #[test]
    fn bottom_test_becomes_do_while() {
        let code = code(vec![
            (3, Opcode::Iinc { slot: 1, delta: 1 }),
            (1, load(1)),
            (3, branch(CompareOp::Ne, 0)),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(II)V", &code);
        assert_eq!(
            count(&body, |kind| matches!(
                kind,
                BlockKind::Loop {
                    kind: LoopKind::DoWhile,
                    ..
                }
            )),
            1
        );
        assert_eq!(body.analysis.graph.jump_count(), 0);
    }

    #[test]
    fn jump_to_outer_head_is_labeled_continue() {
        let code = code(vec![
            (1, load(0)),
            (3, branch(CompareOp::Eq, 20)),
            (1, load(1)),
            (3, branch(CompareOp::Eq, 14)),
            (1, load(0)),
            (3, branch(CompareOp::Ne, 0)),
            (2, Opcode::Goto(4)),
            (3, Opcode::Iinc { slot: 0, delta: -1 }),
            (3, Opcode::Goto(0)),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(II)V", &code);
        assert!(!body.degraded);
        assert_eq!(body.analysis.graph.jump_count(), 0);
        assert_eq!(count(&body, |kind| matches!(kind, BlockKind::Loop { .. })), 2);
        assert_eq!(
            count(&body, |kind| matches!(kind, BlockKind::Continue { labeled: true, .. })),
            1
        );
    }

    #[test]
    fn forward_exit_from_nested_if_breaks_a_wrapper() {
        let code = code(vec![
            (1, load(0)),
            (3, branch(CompareOp::Eq, 15)),
            (3, Opcode::Iinc { slot: 2, delta: 1 }),
            (1, load(1)),
            (3, branch(CompareOp::Ne, 18)),
            (3, Opcode::Iinc { slot: 3, delta: 1 }),
            (1, Opcode::Nop),
            (3, Opcode::Iinc { slot: 2, delta: 2 }),
            (1, Opcode::Return(None)),
        ]);
        let body = analyze(b"(II)V", &code);
        assert!(!body.degraded);
        assert_eq!(body.analysis.graph.jump_count(), 0);
        let wrappers = count(&body, |kind| match *kind {
            BlockKind::Loop {
                kind: LoopKind::DoWhile,
                cond,
                ..
            } => matches!(
                body.analysis.exprs[cond],
                crate::ast::Expression::Const(crate::ast::Constant::Bool(false))
            ),
            _ => false,
        });
        assert_eq!(wrappers, 1);
        assert_eq!(count(&body, |kind| matches!(kind, BlockKind::Break { .. })), 1);
    }

    #[derive(Clone, Debug)]
    enum Unit {
        Nop,
        Increment,
        Goto(usize),
        Branch(usize),
        Return,
    }

    fn unit() -> impl Strategy<Value = Unit> {
        prop_oneof![
            Just(Unit::Nop),
            Just(Unit::Increment),
            any::<usize>().prop_map(Unit::Goto),
            any::<usize>().prop_map(Unit::Branch),
            Just(Unit::Return),
        ]
    }

    /// Every unit starts at `4 * index`; branches load their operand first.
    fn random_code(units: &[Unit]) -> Vec<Instruction<'static>> {
        let count = units.len() + 1;
        let target = |index: usize| (index % count) as u32 * 4;
        let mut out = Vec::new();
        for (index, unit) in units.iter().enumerate() {
            let address = index as u32 * 4;
            match *unit {
                Unit::Nop => out.push(Instruction::new(address, 4, Opcode::Nop)),
                Unit::Increment => out.push(Instruction::new(
                    address,
                    4,
                    Opcode::Iinc { slot: 1, delta: 1 },
                )),
                Unit::Goto(to) => out.push(Instruction::new(address, 4, Opcode::Goto(target(to)))),
                Unit::Branch(to) => {
                    out.push(Instruction::new(address, 1, load(1)));
                    out.push(Instruction::new(
                        address + 1,
                        3,
                        branch(CompareOp::Lt, target(to)),
                    ));
                }
                Unit::Return => out.push(Instruction::new(address, 4, Opcode::Return(None))),
            }
        }
        out.push(Instruction::new(units.len() as u32 * 4, 4, Opcode::Return(None)));
        out
    }

    proptest! {
        #[test]
        fn any_control_flow_terminates(units in proptest::collection::vec(unit(), 1..12)) {
            let code = random_code(&units);
            let options = AnalysisOptions {
                check_consistency: true,
                ..AnalysisOptions::default()
            };
            let body = analyze_method_or_describe(&method(b"(II)V"), &code, &[], options);
            prop_assert!(!body.to_string().contains("PUSH"));
        }
    }
}

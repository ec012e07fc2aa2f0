use super::FlowId;
use crate::analysis::Analysis;
use crate::ast::{BinOp, Constant, ExprId, Expression};
use crate::input::{IfOperand, Instruction, MethodInfo, Opcode, call_shape, field_width};
use crate::options::AnalysisOptions;
use crate::structured::{BlockId, BlockKind, CaseValue};
use crate::variables::{LocalId, LocalKind, SlotSet};
use log::trace;
use noak::error::DecodeError;
use rustc_hash::FxHashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Failed to parse descriptor: {0}")]
    Noak(#[from] DecodeError),

    #[error("Method has no code")]
    NoCode,

    #[error("Jump to {address}, which is not the start of an instruction")]
    InvalidTarget { address: u32 },

    #[error("Instruction at {address} accesses local slot {slot}, but only {max_locals} exist")]
    SlotOutOfRange {
        address: u32,
        slot: u16,
        max_locals: u16,
    },

    #[error("Execution reaches the end of bytecode")]
    FallsOffEnd,
}

/// Where a freshly built block continues.
enum Target {
    Address(u32),
    Next,
    End,
}

/// One instruction turned into a structured block, with its pending edges and liveness facts.
struct Lowered<'code> {
    kind: BlockKind<'code>,
    own_jump: Option<Target>,
    /// Jumps hanging off child blocks, with their target addresses.
    child_jumps: Vec<(BlockId, u32)>,
    reads: Option<LocalId>,
    writes: Option<LocalId>,
}

impl<'code> Analysis<'code> {
    /// Builds one flow block per instruction, linked by jumps.
    pub fn build(
        method: &MethodInfo<'code>,
        code: &[Instruction<'code>],
        options: AnalysisOptions,
    ) -> Result<Self, BuildError> {
        if code.is_empty() {
            return Err(BuildError::NoCode);
        }
        let fuel = options.fuel_for(code.len());
        let mut analysis = Analysis::new(options, fuel);
        analysis.returns_void = method.returns_void()?;

        for parameter in method.parameters()? {
            let kind = if !method.is_static && parameter.slot == 0 {
                LocalKind::This
            } else {
                LocalKind::Parameter
            };
            let local = analysis.locals.new_slot(kind, parameter.slot);
            analysis.parameters.push(local);
        }

        let mut flows_by_addr = FxHashMap::default();
        let mut pending = Vec::new();
        for insn in code {
            if let Some(slot) = insn.opcode.local_slot()
                && slot >= method.max_locals
            {
                return Err(BuildError::SlotOutOfRange {
                    address: insn.address,
                    slot,
                    max_locals: method.max_locals,
                });
            }

            let lowered = analysis.lower(insn)?;
            let block = analysis.alloc(lowered.kind);
            let flow = analysis.graph.add_flow(insn.address, insn.length, block);
            flows_by_addr.insert(insn.address, flow);

            if let Some(local) = lowered.reads {
                analysis.graph[flow].in_set.add(local);
            }
            if let Some(local) = lowered.writes {
                analysis.graph[flow].gen_set.add(local);
            }
            if let Some(target) = lowered.own_jump {
                pending.push((flow, block, target));
            }
            for (child, address) in lowered.child_jumps {
                pending.push((flow, child, Target::Address(address)));
            }
        }

        for (flow, prev, target) in pending {
            let destination = match target {
                Target::Address(address) => *flows_by_addr
                    .get(&address)
                    .ok_or(BuildError::InvalidTarget { address })?,
                Target::Next => FlowId::NEXT_BY_ADDR,
                Target::End => FlowId::END_OF_METHOD,
            };
            analysis.add_jump(flow, prev, destination);
        }
        analysis.resolve_fallthrough()?;

        // Writes of a single instruction happen on every path out of it.
        for flow in analysis.graph.live_flows() {
            let gen_set = analysis.graph[flow].gen_set.clone();
            let mut kill = SlotSet::new();
            for local in gen_set.iter() {
                if let Some(slot) = analysis.locals.slot(local) {
                    kill.insert(slot);
                }
            }
            for info in analysis.graph[flow].successors.values_mut() {
                info.kill = kill.clone();
                info.gen_set = gen_set.clone();
            }
        }

        let entry = flows_by_addr[&code[0].address];
        analysis.entry = entry;
        analysis.graph[entry]
            .predecessors
            .push(FlowId::METHOD_ENTRY);
        trace!("Built {} flow blocks", code.len());
        Ok(analysis)
    }

    /// Retargets every jump to `NEXT_BY_ADDR` at the flow block that follows its source.
    fn resolve_fallthrough(&mut self) -> Result<(), BuildError> {
        for flow in self.graph.live_flows() {
            let Some(info) = self.graph[flow].successors.remove(&FlowId::NEXT_BY_ADDR) else {
                continue;
            };
            self.graph[FlowId::NEXT_BY_ADDR]
                .predecessors
                .retain(|&pred| pred != flow);
            let next = self
                .graph
                .flow_at(self.graph[flow].end())
                .ok_or(BuildError::FallsOffEnd)?;
            for jump in self.graph.chain(info.jumps) {
                self.graph[jump].destination = next;
                self.graph[jump].next = None;
                self.graph.link_jump(flow, jump);
            }
        }
        Ok(())
    }

    fn lower(&mut self, insn: &Instruction<'code>) -> Result<Lowered<'code>, BuildError> {
        let mut lowered = Lowered {
            kind: BlockKind::Empty,
            own_jump: insn.opcode.control_flow().can_fallthrough.then_some(Target::Next),
            child_jumps: Vec::new(),
            reads: None,
            writes: None,
        };
        let (expr, push) = match insn.opcode.clone() {
            Opcode::Nop => return Ok(lowered),
            Opcode::Const(constant) => {
                let width = constant.width();
                (self.exprs.alloc(Expression::Const(constant)), width)
            }
            Opcode::Load { kind, slot } => {
                let local = self.locals.new_slot(LocalKind::Slot, slot);
                lowered.reads = Some(local);
                (self.exprs.local(local), kind.width())
            }
            Opcode::Store { kind, slot } => {
                let local = self.locals.new_slot(LocalKind::Slot, slot);
                lowered.writes = Some(local);
                let target = self.exprs.local(local);
                let value = self.exprs.free(kind.width());
                (self.assign(target, None, value), 0)
            }
            Opcode::Iinc { slot, delta } => {
                let local = self.locals.new_slot(LocalKind::Slot, slot);
                lowered.reads = Some(local);
                lowered.writes = Some(local);
                let target = self.exprs.local(local);
                let value = self.exprs.int(delta.into());
                (self.assign(target, Some(BinOp::Add), value), 0)
            }
            Opcode::ArrayLoad(kind) => (self.array_element(), kind.width()),
            Opcode::ArrayStore(kind) => {
                let target = self.array_element();
                let value = self.exprs.free(kind.width());
                (self.assign(target, None, value), 0)
            }
            Opcode::Stack(op) => {
                lowered.kind = BlockKind::Special(op);
                return Ok(lowered);
            }
            Opcode::Binary { op, kind } => {
                let lhs = self.exprs.free(kind.width());
                let rhs = self.exprs.free(if op.is_shift() { 1 } else { kind.width() });
                (self.exprs.alloc(Expression::BinOp { op, lhs, rhs }), kind.width())
            }
            Opcode::Negate(kind) => {
                let value = self.exprs.free(kind.width());
                (self.exprs.alloc(Expression::Negate { value }), kind.width())
            }
            Opcode::Convert { from, to } => {
                let value = self.exprs.free(from.width());
                (self.exprs.alloc(Expression::Convert { value, from, to }), to.width())
            }
            Opcode::Compare { kind, nan_greater } => {
                let lhs = self.exprs.free(kind.width());
                let rhs = self.exprs.free(kind.width());
                let expr = self.exprs.alloc(Expression::ThreeWay {
                    lhs,
                    rhs,
                    nan_greater,
                });
                (expr, 1)
            }
            Opcode::If {
                op,
                operand,
                target,
            } => {
                let (lhs, rhs) = match operand {
                    IfOperand::Zero => (self.exprs.free(1), self.exprs.int(0)),
                    IfOperand::Null => (
                        self.exprs.free(1),
                        self.exprs.alloc(Expression::Const(Constant::Null)),
                    ),
                    IfOperand::Value(kind) => {
                        (self.exprs.free(kind.width()), self.exprs.free(kind.width()))
                    }
                };
                let cond = self.exprs.alloc(Expression::Compare { op, lhs, rhs });
                let trueblock = self.empty();
                lowered.child_jumps.push((trueblock, target));
                lowered.kind = BlockKind::Conditional { cond, trueblock };
                return Ok(lowered);
            }
            Opcode::Goto(target) => {
                lowered.own_jump = Some(Target::Address(target));
                return Ok(lowered);
            }
            Opcode::Jsr(target) => {
                let call = self.empty();
                lowered.child_jumps.push((call, target));
                lowered.kind = BlockKind::Jsr { call };
                return Ok(lowered);
            }
            Opcode::Ret(slot) => {
                let local = self.locals.new_slot(LocalKind::Slot, slot);
                lowered.reads = Some(local);
                lowered.kind = BlockKind::Ret { local };
                return Ok(lowered);
            }
            Opcode::Switch { cases, default } => {
                lowered.kind = self.lower_switch(&cases, default, &mut lowered.child_jumps);
                return Ok(lowered);
            }
            Opcode::Return(kind) => {
                let value = kind.map(|kind| self.exprs.free(kind.width()));
                lowered.kind = BlockKind::Return { value };
                lowered.own_jump = Some(Target::End);
                return Ok(lowered);
            }
            Opcode::Throw => {
                let exception = self.exprs.free(1);
                lowered.kind = BlockKind::Throw { exception };
                return Ok(lowered);
            }
            Opcode::GetField {
                is_static,
                class,
                name,
                descriptor,
            } => {
                let object = (!is_static).then(|| self.exprs.free(1));
                let expr = self.exprs.alloc(Expression::Field {
                    object,
                    class,
                    name,
                    descriptor,
                });
                (expr, field_width(descriptor))
            }
            Opcode::PutField {
                is_static,
                class,
                name,
                descriptor,
            } => {
                let object = (!is_static).then(|| self.exprs.free(1));
                let target = self.exprs.alloc(Expression::Field {
                    object,
                    class,
                    name,
                    descriptor,
                });
                let value = self.exprs.free(field_width(descriptor));
                (self.assign(target, None, value), 0)
            }
            Opcode::Invoke {
                kind,
                class,
                name,
                descriptor,
            } => {
                let shape = call_shape(descriptor)?;
                let object = (kind != crate::input::InvokeKind::Static).then(|| self.exprs.free(1));
                let arguments = shape
                    .arguments
                    .iter()
                    .map(|&width| self.exprs.free(width))
                    .collect();
                let expr = self.exprs.alloc(Expression::Call {
                    kind,
                    class,
                    name,
                    descriptor,
                    object,
                    arguments,
                });
                (expr, shape.return_width)
            }
            Opcode::New(class) => (
                self.exprs.alloc(Expression::NewUninitialized { class }),
                1,
            ),
            Opcode::NewArray {
                element,
                dimensions,
            } => {
                let lengths = (0..dimensions.max(1)).map(|_| self.exprs.free(1)).collect();
                (self.exprs.alloc(Expression::NewArray { element, lengths }), 1)
            }
            Opcode::ArrayLength => {
                let array = self.exprs.free(1);
                (self.exprs.alloc(Expression::ArrayLength { array }), 1)
            }
            Opcode::CheckCast(class) => {
                let object = self.exprs.free(1);
                (self.exprs.alloc(Expression::CheckCast { object, class }), 1)
            }
            Opcode::InstanceOf(class) => {
                let object = self.exprs.free(1);
                (self.exprs.alloc(Expression::InstanceOf { object, class }), 1)
            }
            Opcode::MonitorEnter => {
                let object = self.exprs.free(1);
                (self.exprs.alloc(Expression::MonitorEnter { object }), 0)
            }
            Opcode::MonitorExit => {
                let object = self.exprs.free(1);
                (self.exprs.alloc(Expression::MonitorExit { object }), 0)
            }
        };
        lowered.kind = BlockKind::Instruction { expr, push };
        Ok(lowered)
    }

    fn assign(&mut self, target: ExprId, op: Option<BinOp>, value: ExprId) -> ExprId {
        self.exprs.alloc(Expression::Assign { target, op, value })
    }

    fn array_element(&mut self) -> ExprId {
        let array = self.exprs.free(1);
        let index = self.exprs.free(1);
        self.exprs.alloc(Expression::ArrayElement { array, index })
    }

    /// Cases are ordered by target address. Cases sharing a target get an empty body and the
    /// following case is marked as falling through, so only the last one carries the jump.
    fn lower_switch(
        &mut self,
        cases: &[(i32, u32)],
        default: u32,
        child_jumps: &mut Vec<(BlockId, u32)>,
    ) -> BlockKind<'code> {
        let mut ordered: Vec<(CaseValue, u32)> = cases
            .iter()
            .map(|&(value, target)| (CaseValue::Value(value), target))
            .collect();
        ordered.push((CaseValue::Default, default));
        ordered.sort_by_key(|&(value, target)| (target, value == CaseValue::Default));

        let mut blocks = Vec::with_capacity(ordered.len());
        for (index, &(value, target)) in ordered.iter().enumerate() {
            let body = self.empty();
            let shares_next = ordered
                .get(index + 1)
                .is_some_and(|&(_, next)| next == target);
            if !shares_next {
                child_jumps.push((body, target));
            }
            let fallthrough = index > 0 && ordered[index - 1].1 == target;
            blocks.push(self.alloc(BlockKind::Case {
                value,
                body,
                fallthrough,
            }));
        }
        let selector = self.exprs.free(1);
        BlockKind::Switch {
            selector,
            cases: blocks,
            labeled: false,
        }
    }
}

impl Opcode<'_> {
    fn local_slot(&self) -> Option<u16> {
        match *self {
            Self::Load { kind, slot } | Self::Store { kind, slot } => {
                Some(slot + kind.width() as u16 - 1)
            }
            Self::Iinc { slot, .. } | Self::Ret(slot) => Some(slot),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::ValueKind;
    use noak::MStr;

    fn method(descriptor: &'static [u8]) -> MethodInfo<'static> {
        MethodInfo {
            is_static: true,
            descriptor: MStr::from_mutf8(descriptor).unwrap(),
            max_locals: 4,
        }
    }

    #[test]
    fn falls_through_to_next_address() {
        let code = [
            Instruction::new(0, 1, Opcode::Load {
                kind: ValueKind::Int,
                slot: 0,
            }),
            Instruction::new(1, 3, Opcode::If {
                op: crate::ast::CompareOp::Eq,
                operand: IfOperand::Zero,
                target: 5,
            }),
            Instruction::new(4, 1, Opcode::Nop),
            Instruction::new(5, 1, Opcode::Return(None)),
        ];
        let analysis = Analysis::build(&method(b"(I)V"), &code, AnalysisOptions::default()).unwrap();
        let cond = analysis.graph.flow_at(1).unwrap();
        let nop = analysis.graph.flow_at(4).unwrap();
        let ret = analysis.graph.flow_at(5).unwrap();
        assert_eq!(analysis.graph.successors_of(cond), vec![nop, ret]);
        assert_eq!(analysis.graph[ret].predecessors.len(), 2);
        assert_eq!(
            analysis.graph.successors_of(ret),
            vec![FlowId::END_OF_METHOD]
        );
        assert!(analysis.graph[analysis.entry]
            .predecessors
            .contains(&FlowId::METHOD_ENTRY));
        assert!(analysis.graph[FlowId::NEXT_BY_ADDR].predecessors.is_empty());
        assert_eq!(analysis.parameters.len(), 1);
    }

    #[test]
    fn rejects_bad_code() {
        let off_end = [Instruction::new(0, 1, Opcode::Nop)];
        assert!(matches!(
            Analysis::build(&method(b"()V"), &off_end, AnalysisOptions::default()),
            Err(BuildError::FallsOffEnd)
        ));

        let bad_target = [Instruction::new(0, 3, Opcode::Goto(1))];
        assert!(matches!(
            Analysis::build(&method(b"()V"), &bad_target, AnalysisOptions::default()),
            Err(BuildError::InvalidTarget { address: 1 })
        ));

        let bad_slot = [
            Instruction::new(0, 2, Opcode::Iinc { slot: 9, delta: 1 }),
            Instruction::new(2, 1, Opcode::Return(None)),
        ];
        assert!(matches!(
            Analysis::build(&method(b"()V"), &bad_slot, AnalysisOptions::default()),
            Err(BuildError::SlotOutOfRange { slot: 9, .. })
        ));
        assert!(matches!(
            Analysis::build(&method(b"()V"), &[], AnalysisOptions::default()),
            Err(BuildError::NoCode)
        ));
    }

    #[test]
    fn switch_cases_share_targets() {
        let code = [
            Instruction::new(0, 1, Opcode::Load {
                kind: ValueKind::Int,
                slot: 0,
            }),
            Instruction::new(1, 8, Opcode::Switch {
                cases: vec![(2, 10), (1, 9), (3, 9)],
                default: 10,
            }),
            Instruction::new(9, 1, Opcode::Nop),
            Instruction::new(10, 1, Opcode::Return(None)),
        ];
        let analysis = Analysis::build(&method(b"(I)V"), &code, AnalysisOptions::default()).unwrap();
        let switch = analysis.graph.flow_at(1).unwrap();
        let BlockKind::Switch { ref cases, .. } = analysis.blocks[analysis.graph[switch].block].kind
        else {
            panic!("expected a switch");
        };
        let shape: Vec<(CaseValue, bool, bool)> = cases
            .iter()
            .map(|&case| {
                let BlockKind::Case {
                    value,
                    body,
                    fallthrough,
                } = analysis.blocks[case].kind
                else {
                    panic!("expected a case");
                };
                (value, fallthrough, analysis.blocks[body].jump.is_some())
            })
            .collect();
        assert_eq!(
            shape,
            vec![
                (CaseValue::Value(1), false, false),
                (CaseValue::Value(3), true, true),
                (CaseValue::Value(2), false, false),
                (CaseValue::Default, true, true),
            ]
        );
        assert_eq!(analysis.graph.successors_of(switch).len(), 2);
    }
}

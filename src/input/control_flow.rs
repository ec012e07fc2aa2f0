use super::Opcode;

pub struct InsnControlFlow {
    pub can_jump_to: Vec<u32>,
    pub can_fallthrough: bool,
}

impl InsnControlFlow {
    pub fn is_normal(&self) -> bool {
        self.can_jump_to.is_empty() && self.can_fallthrough
    }
}

impl Opcode<'_> {
    pub fn control_flow(&self) -> InsnControlFlow {
        match self {
            // Exits
            Self::Return(_) | Self::Throw | Self::Ret(_) => InsnControlFlow {
                can_jump_to: Vec::new(),
                can_fallthrough: false,
            },

            Self::Goto(target) => InsnControlFlow {
                can_jump_to: vec![*target],
                can_fallthrough: false,
            },
            // A subroutine call resumes at the next instruction once the subroutine returns.
            Self::If { target, .. } | Self::Jsr(target) => InsnControlFlow {
                can_jump_to: vec![*target],
                can_fallthrough: true,
            },
            Self::Switch { cases, default } => InsnControlFlow {
                can_jump_to: core::iter::once(*default)
                    .chain(cases.iter().map(|(_, target)| *target))
                    .collect(),
                can_fallthrough: false,
            },

            _ => InsnControlFlow {
                can_jump_to: Vec::new(),
                can_fallthrough: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CompareOp;
    use crate::input::IfOperand;

    #[test]
    fn branches() {
        let flow = Opcode::If {
            op: CompareOp::Eq,
            operand: IfOperand::Zero,
            target: 12,
        }
        .control_flow();
        assert_eq!(flow.can_jump_to, vec![12]);
        assert!(flow.can_fallthrough);

        let flow = Opcode::Switch {
            cases: vec![(1, 20), (2, 30)],
            default: 40,
        }
        .control_flow();
        assert_eq!(flow.can_jump_to, vec![40, 20, 30]);
        assert!(!flow.can_fallthrough);

        assert!(Opcode::Nop.control_flow().is_normal());
        assert!(!Opcode::Throw.control_flow().can_fallthrough);
    }
}

use super::{ExprId, Expression};

// This iterates only over direct subexpressions, not recursively. The subexpressions are yielded in
// evaluation order, which is also the order in which free operands consume the stack.
//
// Every expression has at most one "head" child followed by a list, which lets both iterators share
// a single return type per variant.

impl Expression<'_> {
    pub fn subexprs(&self) -> impl DoubleEndedIterator<Item = ExprId> {
        let (a, b): (Option<ExprId>, &[ExprId]) = match self {
            Self::ArrayLength { array: expr }
            | Self::InstanceOf { object: expr, .. }
            | Self::CheckCast { object: expr, .. }
            | Self::Convert { value: expr, .. }
            | Self::Negate { value: expr }
            | Self::Not { value: expr }
            | Self::Increment { target: expr, .. }
            | Self::MonitorEnter { object: expr }
            | Self::MonitorExit { object: expr } => (Some(*expr), &[]),

            Self::ArrayElement { array: a, index: b }
            | Self::BinOp { lhs: a, rhs: b, .. }
            | Self::Compare { lhs: a, rhs: b, .. }
            | Self::ThreeWay { lhs: a, rhs: b, .. }
            | Self::Logical { lhs: a, rhs: b, .. }
            | Self::Assign {
                target: a,
                value: b,
                ..
            } => (Some(*a), core::slice::from_ref(b)),

            Self::Ternary {
                condition,
                branches,
            } => (Some(*condition), branches),

            Self::NewArray { lengths: list, .. }
            | Self::ArrayLiteral { values: list, .. }
            | Self::Constructor {
                arguments: list, ..
            } => (None, list),

            Self::Field { object, .. } => (*object, &[]),

            Self::Call {
                object, arguments, ..
            } => (*object, arguments),

            Self::FreeOperand { .. }
            | Self::Local(_)
            | Self::Const(_)
            | Self::NewUninitialized { .. } => (None, &[]),
        };

        a.into_iter().chain(b.iter().copied())
    }

    pub fn subexprs_mut(&mut self) -> impl DoubleEndedIterator<Item = &mut ExprId> {
        let (a, b): (Option<&mut ExprId>, &mut [ExprId]) = match self {
            Self::ArrayLength { array: expr }
            | Self::InstanceOf { object: expr, .. }
            | Self::CheckCast { object: expr, .. }
            | Self::Convert { value: expr, .. }
            | Self::Negate { value: expr }
            | Self::Not { value: expr }
            | Self::Increment { target: expr, .. }
            | Self::MonitorEnter { object: expr }
            | Self::MonitorExit { object: expr } => (Some(expr), &mut []),

            Self::ArrayElement { array: a, index: b }
            | Self::BinOp { lhs: a, rhs: b, .. }
            | Self::Compare { lhs: a, rhs: b, .. }
            | Self::ThreeWay { lhs: a, rhs: b, .. }
            | Self::Logical { lhs: a, rhs: b, .. }
            | Self::Assign {
                target: a,
                value: b,
                ..
            } => (Some(a), core::slice::from_mut(b)),

            Self::Ternary {
                condition,
                branches,
            } => (Some(condition), branches),

            Self::NewArray { lengths: list, .. }
            | Self::ArrayLiteral { values: list, .. }
            | Self::Constructor {
                arguments: list, ..
            } => (None, list),

            Self::Field { object, .. } => (object.as_mut(), &mut []),

            Self::Call {
                object, arguments, ..
            } => (object.as_mut(), arguments),

            Self::FreeOperand { .. }
            | Self::Local(_)
            | Self::Const(_)
            | Self::NewUninitialized { .. } => (None, &mut []),
        };

        a.into_iter().chain(b.iter_mut())
    }
}

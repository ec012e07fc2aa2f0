use super::{LocalId, Locals};
use crate::input::StackOp;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("Stack underflow: {needed} slots needed, {available} available")]
    Underflow { needed: usize, available: usize },

    #[error("Operand of width {expected} reads a value of width {actual}")]
    WidthMismatch { expected: u8, actual: u8 },

    #[error("{op} splits a two-slot value")]
    SplitsWideValue { op: StackOp },

    #[error("Stacks of different shapes meet at a join ({left} vs {right} slots)")]
    MergeMismatch { left: usize, right: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackEntry {
    pub local: LocalId,
    pub width: u8,
}

/// The abstract operand stack: one synthetic local per stack value, bottom first. Operations return
/// new stacks and leave `self` untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariableStack {
    entries: Vec<StackEntry>,
}

impl VariableStack {
    pub const EMPTY: VariableStack = VariableStack {
        entries: Vec::new(),
    };

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn slots(&self) -> usize {
        self.entries.iter().map(|entry| entry.width as usize).sum()
    }

    pub fn entries(&self) -> &[StackEntry] {
        &self.entries
    }

    pub fn push(&self, local: LocalId, width: u8) -> Self {
        let mut entries = self.entries.clone();
        entries.push(StackEntry { local, width });
        Self { entries }
    }

    pub fn peek(&self, count: usize) -> Result<&[StackEntry], StackError> {
        let Some(start) = self.entries.len().checked_sub(count) else {
            return Err(StackError::Underflow {
                needed: count,
                available: self.entries.len(),
            });
        };
        Ok(&self.entries[start..])
    }

    /// Pops one entry per operand. `widths` lists the operands bottom to top, i.e. in evaluation
    /// order; the popped locals are returned in the same order.
    pub fn pop(&self, widths: &[u8]) -> Result<(Self, Vec<LocalId>), StackError> {
        let popped = self.peek(widths.len())?;
        for (entry, &expected) in popped.iter().zip(widths) {
            if entry.width != expected {
                return Err(StackError::WidthMismatch {
                    expected,
                    actual: entry.width,
                });
            }
        }
        let locals = popped.iter().map(|entry| entry.local).collect();
        let entries = self.entries[..self.entries.len() - widths.len()].to_vec();
        Ok((Self { entries }, locals))
    }

    /// Pops the operands and pushes a result in one step.
    pub fn poppush(
        &self,
        widths: &[u8],
        result: Option<(LocalId, u8)>,
    ) -> Result<(Self, Vec<LocalId>), StackError> {
        let (stack, popped) = self.pop(widths)?;
        Ok(match result {
            Some((local, width)) => (stack.push(local, width), popped),
            None => (stack, popped),
        })
    }

    /// Identifies the locals of two stacks reaching the same point.
    pub fn merge(&self, other: &VariableStack, locals: &mut Locals) -> Result<Self, StackError> {
        let mismatch = || StackError::MergeMismatch {
            left: self.slots(),
            right: other.slots(),
        };
        if self.entries.len() != other.entries.len() {
            return Err(mismatch());
        }
        for (a, b) in self.entries.iter().zip(&other.entries) {
            if a.width != b.width {
                return Err(mismatch());
            }
            locals.merge(a.local, b.local);
        }
        Ok(self.clone())
    }

    /// Number of top entries that make up exactly `slots` slots.
    fn entries_for_slots(&self, below: usize, slots: u8, op: StackOp) -> Result<usize, StackError> {
        let mut count = 0;
        let mut taken = 0;
        let available = &self.entries[..self.entries.len() - below];
        while taken < slots as usize {
            let Some(entry) = available.iter().rev().nth(count) else {
                return Err(StackError::Underflow {
                    needed: slots as usize + below,
                    available: self.entries.len(),
                });
            };
            taken += entry.width as usize;
            count += 1;
        }
        if taken != slots as usize {
            return Err(StackError::SplitsWideValue { op });
        }
        Ok(count)
    }

    /// Applies a raw stack shuffle positionally. Duplicated values keep their local, so a
    /// duplicated value ends up being read twice.
    pub fn execute_special(&self, op: StackOp) -> Result<Self, StackError> {
        let len = self.entries.len();
        if let Some(slots) = op.popped_slots() {
            let count = self.entries_for_slots(0, slots, op)?;
            return Ok(Self {
                entries: self.entries[..len - count].to_vec(),
            });
        }
        if let Some((copied, skipped)) = op.dup_shape() {
            let top = self.entries_for_slots(0, copied, op)?;
            let under = if skipped == 0 {
                0
            } else {
                self.entries_for_slots(top, skipped, op)?
            };
            let split = len - top - under;
            let mut entries = self.entries[..split].to_vec();
            entries.extend_from_slice(&self.entries[len - top..]);
            entries.extend_from_slice(&self.entries[split..]);
            return Ok(Self { entries });
        }
        // Swap
        let top = self.peek(2)?;
        if top.iter().any(|entry| entry.width != 1) {
            return Err(StackError::SplitsWideValue { op });
        }
        let mut entries = self.entries.clone();
        entries.swap(len - 1, len - 2);
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::LocalKind;

    fn stack_of(locals: &mut Locals, widths: &[u8]) -> (VariableStack, Vec<LocalId>) {
        let mut stack = VariableStack::EMPTY;
        let mut ids = Vec::new();
        for &width in widths {
            let local = locals.new_synthetic(LocalKind::Stack);
            stack = stack.push(local, width);
            ids.push(local);
        }
        (stack, ids)
    }

    fn order(stack: &VariableStack) -> Vec<LocalId> {
        stack.entries().iter().map(|entry| entry.local).collect()
    }

    #[test]
    fn dup_x1_is_positional() {
        let mut locals = Locals::new();
        let (stack, ids) = stack_of(&mut locals, &[1, 1]);
        let stack = stack.execute_special(StackOp::DupX1).unwrap();
        assert_eq!(order(&stack), vec![ids[1], ids[0], ids[1]]);
    }

    #[test]
    fn dup2_copies_one_wide_value() {
        let mut locals = Locals::new();
        let (stack, ids) = stack_of(&mut locals, &[1, 2]);
        let stack = stack.execute_special(StackOp::Dup2X1).unwrap();
        assert_eq!(order(&stack), vec![ids[1], ids[0], ids[1]]);
        assert_eq!(stack.slots(), 5);
    }

    #[test]
    fn splitting_wide_values_fails() {
        let mut locals = Locals::new();
        let (stack, _) = stack_of(&mut locals, &[2]);
        assert!(matches!(
            stack.execute_special(StackOp::Pop),
            Err(StackError::SplitsWideValue { .. })
        ));
        assert!(matches!(
            stack.execute_special(StackOp::Swap),
            Err(StackError::Underflow { .. })
        ));
        assert!(stack.execute_special(StackOp::Pop2).unwrap().is_empty());
    }

    #[test]
    fn pop_checks_widths() {
        let mut locals = Locals::new();
        let (stack, ids) = stack_of(&mut locals, &[1, 2]);
        let (rest, popped) = stack.pop(&[1, 2]).unwrap();
        assert!(rest.is_empty());
        assert_eq!(popped, ids);
        assert!(matches!(
            stack.pop(&[1]),
            Err(StackError::WidthMismatch {
                expected: 1,
                actual: 2
            })
        ));
        let (_, top) = stack.pop(&[2]).unwrap();
        assert_eq!(top, vec![ids[1]]);
    }

    #[test]
    fn merge_requires_equal_shapes() {
        let mut locals = Locals::new();
        let (left, left_ids) = stack_of(&mut locals, &[1]);
        let (right, right_ids) = stack_of(&mut locals, &[1]);
        left.merge(&right, &mut locals).unwrap();
        assert!(locals.same(left_ids[0], right_ids[0]));

        let (longer, _) = stack_of(&mut locals, &[1, 1]);
        assert!(matches!(
            left.merge(&longer, &mut locals),
            Err(StackError::MergeMismatch { left: 1, right: 2 })
        ));
    }
}

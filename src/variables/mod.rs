//! Local variables, their merge classes, and the sets and stacks that track them.

mod sets;
mod stack;

pub use self::sets::{SlotSet, VariableSet};
pub use self::stack::{StackEntry, StackError, VariableStack};
use crate::union_find::UnionFind;
use displaydoc::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u32);

impl LocalId {
    pub fn index(self) -> u32 {
        self.0
    }
}

/// Ordered by how strongly a kind identifies a merged class: `This` wins over everything.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
pub enum LocalKind {
    /// selector
    Selector,
    /// stack
    Stack,
    /// return address
    ReturnAddress,
    /// slot
    Slot,
    /// exception
    Exception,
    /// parameter
    Parameter,
    /// this
    This,
}

#[derive(Debug)]
struct LocalInfo {
    kind: LocalKind,
    slot: Option<u16>,
}

/// Every local access of the method gets its own `LocalId`. Ids that turn out to denote the same
/// source variable are merged into one class.
#[derive(Debug, Default)]
pub struct Locals {
    infos: Vec<LocalInfo>,
    classes: UnionFind,
}

impl Locals {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, kind: LocalKind, slot: Option<u16>) -> LocalId {
        let id = self.classes.add();
        self.infos.push(LocalInfo { kind, slot });
        LocalId(id)
    }

    pub fn new_slot(&mut self, kind: LocalKind, slot: u16) -> LocalId {
        self.add(kind, Some(slot))
    }

    pub fn new_synthetic(&mut self, kind: LocalKind) -> LocalId {
        self.add(kind, None)
    }

    pub fn slot(&self, local: LocalId) -> Option<u16> {
        self.infos[local.0 as usize].slot
    }

    /// Kind of the whole class `local` belongs to.
    pub fn kind(&self, local: LocalId) -> LocalKind {
        self.infos[self.classes.find(local.0) as usize].kind
    }

    pub fn class(&self, local: LocalId) -> LocalId {
        LocalId(self.classes.find(local.0))
    }

    pub fn same(&self, a: LocalId, b: LocalId) -> bool {
        self.classes.same(a.0, b.0)
    }

    pub fn same_slot(&self, a: LocalId, b: LocalId) -> bool {
        self.slot(a).is_some() && self.slot(a) == self.slot(b)
    }

    pub fn merge(&mut self, a: LocalId, b: LocalId) -> bool {
        let kind = self.kind(a).max(self.kind(b));
        if !self.classes.merge(a.0, b.0) {
            return false;
        }
        let leader = self.classes.resolve(a.0);
        self.infos[leader as usize].kind = kind;
        true
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = LocalId> + use<> {
        (0..self.infos.len() as u32).map(LocalId)
    }
}

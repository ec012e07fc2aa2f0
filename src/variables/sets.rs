use super::{LocalId, Locals};
use rustc_hash::FxHashSet;

/// Slots that are definitely written on a path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotSet(FxHashSet<u16>);

impl SlotSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slot: u16) {
        self.0.insert(slot);
    }

    pub fn contains(&self, slot: u16) -> bool {
        self.0.contains(&slot)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn union_with(&mut self, other: &SlotSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn intersect_with(&mut self, other: &SlotSet) {
        self.0.retain(|slot| other.0.contains(slot));
    }

    pub fn kills(&self, local: LocalId, locals: &Locals) -> bool {
        locals.slot(local).is_some_and(|slot| self.contains(slot))
    }
}

/// Locals by identity, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VariableSet(Vec<LocalId>);

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, local: LocalId) {
        if !self.0.contains(&local) {
            self.0.push(local);
        }
    }

    pub fn contains(&self, local: LocalId) -> bool {
        self.0.contains(&local)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = LocalId> + '_ {
        self.0.iter().copied()
    }

    pub fn union_with(&mut self, other: &VariableSet) {
        for local in other.iter() {
            self.add(local);
        }
    }

    /// Members that live in the same slot as `local`.
    pub fn with_slot_of<'a>(
        &'a self,
        local: LocalId,
        locals: &'a Locals,
    ) -> impl Iterator<Item = LocalId> + 'a {
        self.iter().filter(move |&other| locals.same_slot(local, other))
    }

    /// Drops the members whose slot is overwritten by `kill`.
    pub fn without_killed(&self, kill: &SlotSet, locals: &Locals) -> VariableSet {
        VariableSet(
            self.iter()
                .filter(|&local| !kill.kills(local, locals))
                .collect(),
        )
    }
}

impl FromIterator<LocalId> for VariableSet {
    fn from_iter<I: IntoIterator<Item = LocalId>>(iter: I) -> Self {
        let mut set = VariableSet::new();
        for local in iter {
            set.add(local);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::LocalKind;

    #[test]
    fn kill_filters_by_slot() {
        let mut locals = Locals::new();
        let a = locals.new_slot(LocalKind::Slot, 1);
        let b = locals.new_slot(LocalKind::Slot, 2);
        let c = locals.new_slot(LocalKind::Slot, 1);
        let gen_set: VariableSet = [a, b].into_iter().collect();

        let mut kill = SlotSet::new();
        kill.insert(1);
        let survivors = gen_set.without_killed(&kill, &locals);
        assert_eq!(survivors.iter().collect::<Vec<_>>(), vec![b]);
        assert_eq!(gen_set.with_slot_of(c, &locals).collect::<Vec<_>>(), vec![a]);

        let mut other = SlotSet::new();
        other.insert(2);
        let mut both = kill.clone();
        both.union_with(&other);
        both.intersect_with(&kill);
        assert!(both.contains(1) && !both.contains(2));
    }
}

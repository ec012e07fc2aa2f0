/// Disjoint sets over dense `u32` keys. Keys are allocated on demand, so the set can grow while
/// merges are being recorded.
#[derive(Debug, Default)]
pub struct UnionFind {
    // If `x >= 0`, it's the parent ID. If `x < 0`, it's `-rank`.
    parents_or_ranks: Vec<i32>,
}

impl UnionFind {
    pub fn add(&mut self) -> u32 {
        let key = self.parents_or_ranks.len() as u32;
        self.parents_or_ranks.push(-1);
        key
    }

    pub fn len(&self) -> usize {
        self.parents_or_ranks.len()
    }

    /// Returns `true` if the two keys were in different sets.
    pub fn merge(&mut self, a: u32, b: u32) -> bool {
        let mut a = self.resolve(a);
        let mut b = self.resolve(b);
        if a == b {
            return false;
        }

        let rank_a = self.parents_or_ranks[a as usize];
        let rank_b = self.parents_or_ranks[b as usize];
        if rank_a > rank_b {
            core::mem::swap(&mut a, &mut b);
        } else if rank_a == rank_b {
            self.parents_or_ranks[a as usize] -= 1;
        }
        self.parents_or_ranks[b as usize] = a as i32;
        true
    }

    pub fn resolve(&mut self, mut key: u32) -> u32 {
        let leader = self.find(key);
        while key != leader {
            key = core::mem::replace(&mut self.parents_or_ranks[key as usize], leader as i32) as u32;
        }
        leader
    }

    /// Like `resolve`, but without path compression.
    pub fn find(&self, mut key: u32) -> u32 {
        while self.parents_or_ranks[key as usize] >= 0 {
            key = self.parents_or_ranks[key as usize] as u32;
        }
        key
    }

    pub fn same(&self, a: u32, b: u32) -> bool {
        self.find(a) == self.find(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_transitively() {
        let mut uf = UnionFind::default();
        let keys: Vec<u32> = (0..6).map(|_| uf.add()).collect();
        assert!(uf.merge(keys[0], keys[1]));
        assert!(uf.merge(keys[2], keys[3]));
        assert!(!uf.merge(keys[1], keys[0]));
        assert!(uf.merge(keys[1], keys[3]));
        assert!(uf.same(keys[0], keys[2]));
        assert!(!uf.same(keys[0], keys[4]));
        assert_eq!(uf.resolve(keys[3]), uf.find(keys[0]));
        assert_eq!(uf.len(), 6);
    }
}

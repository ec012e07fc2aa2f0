use super::{FlowId, JumpId};
use crate::analysis::Analysis;
use crate::structured::{BlockId, BlockKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsistencyError {
    #[error("Jump {jump:?} of {flow:?} is filed under {filed:?} but points to {actual:?}")]
    MisfiledJump {
        flow: FlowId,
        jump: JumpId,
        filed: FlowId,
        actual: FlowId,
    },

    #[error("Block {block:?} does not hold its jump {jump:?}")]
    JumpNotHeld { block: BlockId, jump: JumpId },

    #[error("Jump {jump:?} of {flow:?} starts outside its tree")]
    ForeignJump { flow: FlowId, jump: JumpId },

    #[error("Block {block:?} holds jump {jump:?} that no successor lists")]
    UnlistedJump { block: BlockId, jump: JumpId },

    #[error("{flow:?} is missing from the predecessors of {succ:?}")]
    MissingPredecessor { flow: FlowId, succ: FlowId },

    #[error("{pred:?} is recorded as a predecessor of {flow:?} without an edge")]
    StalePredecessor { pred: FlowId, flow: FlowId },

    #[error("Block {block:?} is not linked to its parent")]
    BadParent { block: BlockId },

    #[error("Sequential block {block:?} is not right-leaning or jumps out of its first statement")]
    MalformedSequence { block: BlockId },

    #[error("{count} jumps remain after structuring")]
    UnresolvedJumps { count: usize },
}

impl Analysis<'_> {
    /// Verifies that jumps, edges and parent links agree.
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        for flow in self.graph.live_flows() {
            let root = self.graph[flow].block;
            let mut listed = Vec::new();
            for (&filed, info) in &self.graph[flow].successors {
                if !self.graph[filed].predecessors.contains(&flow) {
                    return Err(ConsistencyError::MissingPredecessor { flow, succ: filed });
                }
                for jump in self.graph.chain(info.jumps) {
                    let actual = self.graph[jump].destination;
                    if actual != filed {
                        return Err(ConsistencyError::MisfiledJump {
                            flow,
                            jump,
                            filed,
                            actual,
                        });
                    }
                    let prev = self.graph[jump].prev;
                    if self.blocks[prev].jump != Some(jump) {
                        return Err(ConsistencyError::JumpNotHeld { block: prev, jump });
                    }
                    if !self.blocks.is_within(prev, root) {
                        return Err(ConsistencyError::ForeignJump { flow, jump });
                    }
                    listed.push(jump);
                }
            }

            for &pred in &self.graph[flow].predecessors {
                if pred.is_sentinel() {
                    continue;
                }
                if !self.graph[pred].alive || !self.graph[pred].successors.contains_key(&flow) {
                    return Err(ConsistencyError::StalePredecessor { pred, flow });
                }
            }

            if self.blocks[root].outer.is_some() {
                return Err(ConsistencyError::BadParent { block: root });
            }
            for block in self.blocks.subtree(root) {
                self.check_block(block, &listed)?;
            }
        }
        Ok(())
    }

    fn check_block(&self, block: BlockId, listed: &[JumpId]) -> Result<(), ConsistencyError> {
        if let Some(jump) = self.blocks[block].jump
            && !listed.contains(&jump)
        {
            return Err(ConsistencyError::UnlistedJump { block, jump });
        }
        for child in self.blocks[block].kind.children() {
            if self.blocks[child].outer != Some(block) {
                return Err(ConsistencyError::BadParent { block: child });
            }
        }
        if let BlockKind::Sequential { first, .. } = self.blocks[block].kind
            && (self.blocks[first].jump.is_some()
                || matches!(self.blocks[first].kind, BlockKind::Sequential { .. }))
        {
            return Err(ConsistencyError::MalformedSequence { block });
        }
        Ok(())
    }

    /// Runs the consistency check after a structural edit when enabled, keeping the first
    /// failure.
    pub(crate) fn checkpoint(&mut self) {
        if !self.options.check_consistency || self.broken.is_some() {
            return;
        }
        if let Err(error) = self.check_consistency() {
            self.broken = Some(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{AnalysisOptions, Fuel};

    #[test]
    fn detects_dangling_jumps() {
        let mut analysis = Analysis::new(AnalysisOptions::default(), Fuel::new(10));
        let a_block = analysis.empty();
        let a = analysis.graph.add_flow(0, 1, a_block);
        let b_block = analysis.empty();
        let b = analysis.graph.add_flow(1, 1, b_block);
        let jump = analysis.add_jump(a, a_block, b);
        assert!(analysis.check_consistency().is_ok());

        analysis.blocks[a_block].jump = None;
        assert!(matches!(
            analysis.check_consistency(),
            Err(ConsistencyError::JumpNotHeld { .. })
        ));
        analysis.blocks[a_block].jump = Some(jump);

        analysis.graph[b].predecessors.clear();
        assert!(matches!(
            analysis.check_consistency(),
            Err(ConsistencyError::MissingPredecessor { .. })
        ));
    }
}

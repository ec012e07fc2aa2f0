//! The output tree: structured blocks stored in a per-method arena, linked to their parents by
//! non-owning `outer` indices.

mod block;
mod navigate;

pub use self::block::{Block, BlockId, BlockKind, Blocks, CaseValue, LoopKind};

mod arena;
mod expression;
mod iterate;
mod operands;
mod str;

pub use self::arena::{Arena, ExprId};
pub use self::expression::*;
pub use self::str::Str;

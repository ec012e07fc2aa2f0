//! Control-flow structuring and operand-stack elimination for JVM method bodies.
//!
//! [`analyze_method`] takes a decoded method and produces a tree of structured statements: loops,
//! conditionals, switches, `try`/`catch`/`finally` and `synchronized` blocks, with every operand
//! stack value either folded into an expression or bound to a declared local.

mod analysis;
pub mod ast;
mod declare;
mod exceptions;
pub mod flow;
pub mod input;
mod method;
mod options;
mod render;
mod stack_map;
pub mod structured;
mod transform;
mod union_find;
pub mod variables;

pub use self::analysis::{Analysis, Place};
pub use self::exceptions::ExceptionError;
pub use self::method::{MethodAnalysisError, MethodBody, analyze_method, analyze_method_or_describe};
pub use self::options::{AnalysisOptions, Fuel};
pub use self::render::Render;

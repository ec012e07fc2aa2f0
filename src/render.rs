//! Debug rendering of a method tree as indented Java-like pseudo-source.

use crate::analysis::Analysis;
use crate::ast::{BinOp, Constant, ExprId, Expression, IncOp};
use crate::input::InvokeKind;
use crate::structured::{BlockId, BlockKind, CaseValue, LoopKind};
use crate::variables::{LocalId, LocalKind};
use core::fmt::{self, Display};
use rustc_hash::{FxHashMap, FxHashSet};

const INDENT: usize = 4;

/// Printable names for every local class reachable from a root block.
struct Names {
    by_class: FxHashMap<LocalId, String>,
}

impl Names {
    fn collect(analysis: &Analysis<'_>, root: BlockId) -> Self {
        let mut names = Self {
            by_class: FxHashMap::default(),
        };
        let mut taken = FxHashSet::default();
        let mut counters: FxHashMap<String, usize> = FxHashMap::default();
        let mut name = |local: LocalId| {
            let class = analysis.locals.class(local);
            if names.by_class.contains_key(&class) {
                return;
            }
            let base = match analysis.locals.kind(class) {
                LocalKind::This => "this".to_string(),
                LocalKind::Parameter | LocalKind::Slot => {
                    match analysis.locals.slot(class).or(analysis.locals.slot(local)) {
                        Some(slot) => format!("slot{slot}"),
                        None => "var".to_string(),
                    }
                }
                LocalKind::Stack => "stack".to_string(),
                LocalKind::Exception => "exc".to_string(),
                LocalKind::ReturnAddress => "retaddr".to_string(),
                LocalKind::Selector => "selector".to_string(),
            };
            let mut unique = base.clone();
            while !taken.insert(unique.clone()) {
                let counter = counters.entry(base.clone()).or_insert(0);
                *counter += 1;
                unique = format!("{base}_{counter}");
            }
            names.by_class.insert(class, unique);
        };

        for &parameter in &analysis.parameters {
            name(parameter);
        }
        for block in analysis.blocks.subtree(root) {
            for local in analysis.blocks[block].declare.iter() {
                name(local);
            }
            match analysis.blocks[block].kind {
                BlockKind::Catch {
                    local: Some(local), ..
                }
                | BlockKind::Synchronized { local, .. }
                | BlockKind::Ret { local } => name(local),
                _ => {}
            }
            for expr in analysis.blocks[block].kind.exprs() {
                for local in analysis.exprs.locals_in(expr) {
                    name(local);
                }
            }
        }
        names
    }
}

/// `Display` adapter returned by [`Analysis::display`].
pub struct Render<'a, 'code> {
    analysis: &'a Analysis<'code>,
    root: BlockId,
    names: Names,
}

impl<'code> Analysis<'code> {
    /// Renders the tree rooted at `root`.
    pub fn display(&self, root: BlockId) -> Render<'_, 'code> {
        Render {
            analysis: self,
            root,
            names: Names::collect(self, root),
        }
    }
}

impl Display for Render<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.block(f, self.root, 0)
    }
}

impl<'a, 'code> Render<'a, 'code> {
    fn name(&self, local: LocalId) -> &str {
        self.names
            .by_class
            .get(&self.analysis.locals.class(local))
            .map_or("?", String::as_str)
    }

    fn label(block: BlockId) -> String {
        format!("label_{}", block.index())
    }

    fn line(&self, f: &mut fmt::Formatter<'_>, indent: usize, text: impl Display) -> fmt::Result {
        writeln!(f, "{:indent$}{text}", "")
    }

    fn block(&self, f: &mut fmt::Formatter<'_>, block: BlockId, indent: usize) -> fmt::Result {
        let analysis = self.analysis;
        for local in analysis.blocks[block].declare.iter() {
            self.line(f, indent, format_args!("var {};", self.name(local)))?;
        }
        let inner = indent + INDENT;
        match analysis.blocks[block].kind {
            BlockKind::Empty => {}
            BlockKind::Instruction { expr, push: 0 } => {
                self.line(f, indent, format_args!("{};", self.statement(expr)))?;
            }
            BlockKind::Instruction { expr, .. } => {
                self.line(f, indent, format_args!("PUSH {};", self.expr(expr)))?;
            }
            BlockKind::Return { value: None } => self.line(f, indent, "return;")?,
            BlockKind::Return { value: Some(value) } => {
                self.line(f, indent, format_args!("return {};", self.expr(value)))?;
            }
            BlockKind::Throw { exception } => {
                self.line(f, indent, format_args!("throw {};", self.expr(exception)))?;
            }
            BlockKind::Sequential { first, second } => {
                self.block(f, first, indent)?;
                self.block(f, second, indent)?;
            }
            BlockKind::Conditional { cond, trueblock } => {
                self.line(f, indent, format_args!("if ({}) {{", self.expr(cond)))?;
                self.block(f, trueblock, inner)?;
                self.line(f, indent, "}")?;
            }
            BlockKind::IfThenElse { cond, then, else_ } => {
                self.line(f, indent, format_args!("if ({}) {{", self.expr(cond)))?;
                self.block(f, then, inner)?;
                if let Some(else_) = else_ {
                    self.line(f, indent, "} else {")?;
                    self.block(f, else_, inner)?;
                }
                self.line(f, indent, "}")?;
            }
            BlockKind::Loop {
                kind,
                cond,
                init,
                incr,
                body,
                labeled,
            } => {
                let label = if labeled {
                    format!("{}: ", Self::label(block))
                } else {
                    String::new()
                };
                let incr_expr = incr.and_then(|incr| match analysis.blocks[incr].kind {
                    BlockKind::Instruction { expr, push: 0 } => Some(expr),
                    _ => None,
                });
                match kind {
                    LoopKind::DoWhile => {
                        self.line(f, indent, format_args!("{label}do {{"))?;
                        self.block(f, body, inner)?;
                        self.line(f, indent, format_args!("}} while ({});", self.expr(cond)))?;
                    }
                    LoopKind::While => {
                        self.line(
                            f,
                            indent,
                            format_args!("{label}while ({}) {{", self.expr(cond)),
                        )?;
                        self.block(f, body, inner)?;
                        self.line(f, indent, "}")?;
                    }
                    LoopKind::For | LoopKind::PossFor => {
                        let init = init.map(|init| self.expr(init).to_string()).unwrap_or_default();
                        let step = incr_expr
                            .map(|incr| self.statement(incr))
                            .unwrap_or_default();
                        self.line(
                            f,
                            indent,
                            format_args!("{label}for ({init}; {}; {step}) {{", self.expr(cond)),
                        )?;
                        self.block(f, body, inner)?;
                        if let (Some(incr), None) = (incr, incr_expr) {
                            self.block(f, incr, inner)?;
                        }
                        self.line(f, indent, "}")?;
                    }
                }
            }
            BlockKind::Switch {
                selector,
                ref cases,
                labeled,
            } => {
                let label = if labeled {
                    format!("{}: ", Self::label(block))
                } else {
                    String::new()
                };
                self.line(
                    f,
                    indent,
                    format_args!("{label}switch ({}) {{", self.expr(selector)),
                )?;
                for &case in cases {
                    self.block(f, case, inner)?;
                }
                self.line(f, indent, "}")?;
            }
            BlockKind::Case { value, body, .. } => {
                match value {
                    CaseValue::Value(value) => self.line(f, indent, format_args!("case {value}:"))?,
                    CaseValue::Default => self.line(f, indent, "default:")?,
                }
                self.block(f, body, inner)?;
            }
            BlockKind::Try { body, ref handlers } => {
                self.line(f, indent, "try {")?;
                self.block(f, body, inner)?;
                for &handler in handlers {
                    match analysis.blocks[handler].kind {
                        BlockKind::Catch { class, local, body } => {
                            let class = class.map_or("any".to_string(), |class| class.dotted().to_string());
                            let binding = local.map_or("_", |local| self.name(local));
                            self.line(f, indent, format_args!("}} catch ({class} {binding}) {{"))?;
                            self.block(f, body, inner)?;
                        }
                        BlockKind::Finally { body } => {
                            self.line(f, indent, "} finally {")?;
                            self.block(f, body, inner)?;
                        }
                        _ => {
                            self.line(f, indent, "} catch {")?;
                            self.block(f, handler, inner)?;
                        }
                    }
                }
                self.line(f, indent, "}")?;
            }
            // Only reachable as the root of a rendering.
            BlockKind::Catch { body, .. } | BlockKind::Finally { body } => {
                self.block(f, body, indent)?;
            }
            BlockKind::Synchronized {
                local,
                object,
                body,
            } => {
                match object {
                    Some(object) => {
                        self.line(f, indent, format_args!("synchronized ({}) {{", self.expr(object)))?
                    }
                    None => {
                        self.line(f, indent, format_args!("synchronized ({}) {{", self.name(local)))?
                    }
                }
                self.block(f, body, inner)?;
                self.line(f, indent, "}")?;
            }
            BlockKind::Break { target, labeled } => {
                if labeled {
                    self.line(f, indent, format_args!("break {};", Self::label(target)))?;
                } else {
                    self.line(f, indent, "break;")?;
                }
            }
            BlockKind::Continue { target, labeled } => {
                if labeled {
                    self.line(f, indent, format_args!("continue {};", Self::label(target)))?;
                } else {
                    self.line(f, indent, "continue;")?;
                }
            }
            BlockKind::Special(op) => self.line(f, indent, format_args!("/* {op} */"))?,
            BlockKind::Jsr { call } => {
                self.line(f, indent, "jsr {")?;
                self.block(f, call, inner)?;
                self.line(f, indent, "}")?;
            }
            BlockKind::Ret { local } => {
                self.line(f, indent, format_args!("ret {};", self.name(local)))?;
            }
            BlockKind::Description(ref text) => {
                self.line(f, indent, format_args!("/* {text} */"))?;
            }
        }
        if let Some(jump) = analysis.blocks[block].jump {
            let destination = analysis.graph[jump].destination;
            self.line(
                f,
                indent,
                format_args!("goto {:#x};", analysis.graph[destination].addr),
            )?;
        }
        Ok(())
    }

    fn expr(&self, expr: ExprId) -> ExprDisplay<'_, 'a, 'code> {
        ExprDisplay { render: self, expr }
    }

    /// `expr` evaluated for its effect only, where `x += 1` reads as `x++`.
    fn statement(&self, expr: ExprId) -> String {
        let exprs = &self.analysis.exprs;
        if let Expression::Assign {
            target,
            op: Some(op),
            value,
        } = exprs[expr]
            && let Expression::Const(Constant::Int(delta)) = exprs[value]
        {
            let step = match (op, delta) {
                (BinOp::Add, 1) | (BinOp::Sub, -1) => Some(IncOp::Increment),
                (BinOp::Add, -1) | (BinOp::Sub, 1) => Some(IncOp::Decrement),
                _ => None,
            };
            if let Some(step) = step {
                return format!("{}{step}", self.expr(target));
            }
        }
        self.expr(expr).to_string()
    }
}

struct ExprDisplay<'r, 'a, 'code> {
    render: &'r Render<'a, 'code>,
    expr: ExprId,
}

impl Display for ExprDisplay<'_, '_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render.write_expr(f, self.expr)
    }
}

impl Render<'_, '_> {
    /// Writes `expr`, parenthesized unless it binds tighter than any operator.
    fn operand(&self, f: &mut fmt::Formatter<'_>, expr: ExprId) -> fmt::Result {
        match self.analysis.exprs[expr] {
            Expression::BinOp { .. }
            | Expression::Compare { .. }
            | Expression::ThreeWay { .. }
            | Expression::Logical { .. }
            | Expression::Ternary { .. }
            | Expression::Assign { .. }
            | Expression::InstanceOf { .. }
            | Expression::CheckCast { .. }
            | Expression::Convert { .. } => write!(f, "({})", self.expr(expr)),
            _ => self.write_expr(f, expr),
        }
    }

    fn arguments(&self, f: &mut fmt::Formatter<'_>, arguments: &[ExprId]) -> fmt::Result {
        write!(f, "(")?;
        for (index, &argument) in arguments.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            self.write_expr(f, argument)?;
        }
        write!(f, ")")
    }

    fn write_expr(&self, f: &mut fmt::Formatter<'_>, expr: ExprId) -> fmt::Result {
        match self.analysis.exprs[expr] {
            Expression::FreeOperand { width } => write!(f, "FREE{width}"),
            Expression::Local(local) => write!(f, "{}", self.name(local)),
            Expression::Const(constant) => match constant {
                Constant::Null => write!(f, "null"),
                Constant::Bool(value) => write!(f, "{value}"),
                Constant::Int(value) => write!(f, "{value}"),
                Constant::Long(value) => write!(f, "{value}L"),
                Constant::Float(value) => write!(f, "{value:?}f"),
                Constant::Double(value) => write!(f, "{value:?}"),
                Constant::String(value) => write!(f, "{:?}", value.to_string()),
                Constant::Class(class) => write!(f, "{}.class", class.dotted()),
            },
            Expression::ArrayElement { array, index } => {
                self.operand(f, array)?;
                write!(f, "[{}]", self.expr(index))
            }
            Expression::ArrayLength { array } => {
                self.operand(f, array)?;
                write!(f, ".length")
            }
            Expression::NewArray {
                element,
                ref lengths,
            } => {
                write!(f, "new {}", element.dotted())?;
                for &length in lengths {
                    write!(f, "[{}]", self.expr(length))?;
                }
                Ok(())
            }
            Expression::ArrayLiteral {
                element,
                ref values,
                ..
            } => {
                write!(f, "new {}[] {{", element.dotted())?;
                for (index, &value) in values.iter().enumerate() {
                    write!(f, "{}{}", if index > 0 { ", " } else { " " }, self.expr(value))?;
                }
                write!(f, " }}")
            }
            Expression::NewUninitialized { class } => write!(f, "new {}", class.dotted()),
            Expression::Constructor {
                class,
                ref arguments,
                ..
            } => {
                write!(f, "new {}", class.dotted())?;
                self.arguments(f, arguments)
            }
            Expression::Field {
                object, class, name, ..
            } => {
                match object {
                    Some(object) => self.operand(f, object)?,
                    None => write!(f, "{}", class.dotted())?,
                }
                write!(f, ".{name}")
            }
            Expression::Call {
                kind,
                class,
                name,
                object,
                ref arguments,
                ..
            } => {
                if name.is_constructor_name() {
                    write!(f, "super")?;
                } else {
                    match (kind, object) {
                        (InvokeKind::Static, _) | (_, None) => write!(f, "{}", class.dotted())?,
                        (_, Some(object)) => self.operand(f, object)?,
                    }
                    write!(f, ".{name}")?;
                }
                self.arguments(f, arguments)
            }
            Expression::InstanceOf { object, class } => {
                self.operand(f, object)?;
                write!(f, " instanceof {}", class.dotted())
            }
            Expression::CheckCast { object, class } => {
                write!(f, "({}) ", class.dotted())?;
                self.operand(f, object)
            }
            Expression::Convert { value, to, .. } => {
                write!(f, "({to}) ")?;
                self.operand(f, value)
            }
            Expression::BinOp { op, lhs, rhs } => {
                self.operand(f, lhs)?;
                write!(f, " {op} ")?;
                self.operand(f, rhs)
            }
            Expression::Negate { value } => {
                write!(f, "-")?;
                self.operand(f, value)
            }
            Expression::Not { value } => {
                write!(f, "!")?;
                self.operand(f, value)
            }
            Expression::Compare { op, lhs, rhs } => {
                self.operand(f, lhs)?;
                write!(f, " {op} ")?;
                self.operand(f, rhs)
            }
            Expression::ThreeWay {
                lhs,
                rhs,
                nan_greater,
            } => {
                let name = if nan_greater { "cmpg" } else { "cmpl" };
                write!(f, "{name}({}, {})", self.expr(lhs), self.expr(rhs))
            }
            Expression::Logical { op, lhs, rhs } => {
                self.operand(f, lhs)?;
                write!(f, " {op} ")?;
                self.operand(f, rhs)
            }
            Expression::Ternary {
                condition,
                branches: [if_true, if_false],
            } => {
                self.operand(f, condition)?;
                write!(f, " ? ")?;
                self.operand(f, if_true)?;
                write!(f, " : ")?;
                self.operand(f, if_false)
            }
            Expression::Assign { target, op, value } => {
                write!(f, "{} ", self.expr(target))?;
                if let Some(op) = op {
                    write!(f, "{op}")?;
                }
                write!(f, "= {}", self.expr(value))
            }
            Expression::Increment { target, op, prefix } => {
                if prefix {
                    write!(f, "{op}{}", self.expr(target))
                } else {
                    write!(f, "{}{op}", self.expr(target))
                }
            }
            Expression::MonitorEnter { object } => {
                write!(f, "monitorenter({})", self.expr(object))
            }
            Expression::MonitorExit { object } => write!(f, "monitorexit({})", self.expr(object)),
        }
    }
}

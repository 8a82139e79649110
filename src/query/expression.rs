//! The typed, serializable, visitor-dispatched expression AST
//! (SPEC_FULL.md §4.1, grounded on
//! `original_source/Beam/Include/Beam/Queries/*Expression.hpp`).

use super::value::{Value, ValueType};
use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Maximum number of distinct parameter slots a translated evaluator can
/// bind (SPEC_FULL.md §9 Design Notes: kept as a crate constant so it can
/// be recompiled without touching translator logic).
pub const MAX_PARAMETERS: usize = 2;

/// Recognized function names and arities (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FunctionName {
    Add,
    Subtract,
    Multiply,
    Divide,
    Less,
    LessEquals,
    Equals,
    NotEquals,
    GreaterEquals,
    Greater,
    Max,
    Min,
}

impl FunctionName {
    pub fn tag(self) -> &'static str {
        match self {
            FunctionName::Add => "+",
            FunctionName::Subtract => "-",
            FunctionName::Multiply => "*",
            FunctionName::Divide => "/",
            FunctionName::Less => "<",
            FunctionName::LessEquals => "<=",
            FunctionName::Equals => "==",
            FunctionName::NotEquals => "!=",
            FunctionName::GreaterEquals => ">=",
            FunctionName::Greater => ">",
            FunctionName::Max => "max",
            FunctionName::Min => "min",
        }
    }

    pub fn arity(self) -> usize {
        2
    }

    fn is_arithmetic(self) -> bool {
        matches!(
            self,
            FunctionName::Add | FunctionName::Subtract | FunctionName::Multiply | FunctionName::Divide
        )
    }

    fn is_comparison(self) -> bool {
        matches!(
            self,
            FunctionName::Less
                | FunctionName::LessEquals
                | FunctionName::Equals
                | FunctionName::NotEquals
                | FunctionName::GreaterEquals
                | FunctionName::Greater
        )
    }

    fn is_min_max(self) -> bool {
        matches!(self, FunctionName::Max | FunctionName::Min)
    }
}

fn is_numeric(ty: ValueType) -> bool {
    matches!(ty, ValueType::Int | ValueType::Double | ValueType::UInt64)
}

/// `int ⊕ double → double`; otherwise operands must match (spec.md §3).
fn promote(left: ValueType, right: ValueType) -> Option<ValueType> {
    if left == right {
        return Some(left);
    }
    match (left, right) {
        (ValueType::Int, ValueType::Double) | (ValueType::Double, ValueType::Int) => {
            Some(ValueType::Double)
        }
        _ => None,
    }
}

/// The shape of a node in the AST. Immutable once built; `Expression`
/// wraps it in an `Arc` for cheap structural sharing.
#[derive(Debug, Clone, PartialEq)]
enum ExprNode {
    Constant(Value),
    Parameter(usize, ValueType),
    Variable(String, ValueType),
    MemberAccess(String, ValueType, Expression),
    Function(FunctionName, ValueType, Vec<Expression>),
    Not(Expression),
    And(Expression, Expression),
    Or(Expression, Expression),
    GlobalDecl(String, Expression, Expression),
    SetVariable(String, Expression),
    Reduce(Expression, Expression, Expression),
}

/// An immutable, shared-reference-counted handle to an expression node
/// (spec.md §3: "An immutable, shared-reference-counted handle to a
/// polymorphic node").
#[derive(Debug, Clone, PartialEq)]
pub struct Expression(Arc<ExprNode>);

impl Expression {
    fn new(node: ExprNode) -> Expression {
        Expression(Arc::new(node))
    }

    /// Constant-time: the declared type, stored at construction.
    pub fn get_type(&self) -> ValueType {
        match &*self.0 {
            ExprNode::Constant(v) => v.value_type(),
            ExprNode::Parameter(_, ty) => *ty,
            ExprNode::Variable(_, ty) => *ty,
            ExprNode::MemberAccess(_, ty, _) => *ty,
            ExprNode::Function(_, ty, _) => *ty,
            ExprNode::Not(_) | ExprNode::And(_, _) | ExprNode::Or(_, _) => ValueType::Bool,
            ExprNode::GlobalDecl(_, _, body) => body.get_type(),
            ExprNode::SetVariable(_, value) => value.get_type(),
            ExprNode::Reduce(reducer, _, _) => reducer.get_type(),
        }
    }

    pub fn constant(value: Value) -> Expression {
        Expression::new(ExprNode::Constant(value))
    }

    /// As a `Constant`, the wrapped value, if this node is one.
    pub fn as_constant(&self) -> Option<&Value> {
        match &*self.0 {
            ExprNode::Constant(v) => Some(v),
            _ => None,
        }
    }

    pub fn parameter(index: usize, ty: ValueType) -> Result<Expression> {
        if index >= MAX_PARAMETERS {
            return Err(QueryError::TypeCompatibility(format!(
                "parameter index {index} exceeds MAX_PARAMETERS ({MAX_PARAMETERS})"
            )));
        }
        Ok(Expression::new(ExprNode::Parameter(index, ty)))
    }

    /// `name`'s scope membership is checked lazily by the
    /// [`super::evaluator::EvaluatorTranslator`] (spec.md §4.2); the AST
    /// itself does not track lexical scope.
    pub fn variable(name: impl Into<String>, ty: ValueType) -> Expression {
        Expression::new(ExprNode::Variable(name.into(), ty))
    }

    /// `target`'s member-table membership ("target is a structure") is
    /// likewise deferred to the host-provided accessor registry consulted
    /// during translation (spec.md §4.2).
    pub fn member_access(name: impl Into<String>, ty: ValueType, target: Expression) -> Expression {
        Expression::new(ExprNode::MemberAccess(name.into(), ty, target))
    }

    pub fn function(name: FunctionName, args: Vec<Expression>) -> Result<Expression> {
        if args.len() != name.arity() {
            return Err(QueryError::TypeCompatibility(format!(
                "function '{}' expects {} argument(s), got {}",
                name.tag(),
                name.arity(),
                args.len()
            )));
        }
        let left_ty = args[0].get_type();
        let right_ty = args[1].get_type();
        let result_ty = if name.is_arithmetic() {
            if !is_numeric(left_ty) || !is_numeric(right_ty) {
                return Err(QueryError::TypeCompatibility(format!(
                    "function '{}' requires numeric operands, got {left_ty}/{right_ty}",
                    name.tag()
                )));
            }
            promote(left_ty, right_ty).ok_or_else(|| {
                QueryError::TypeCompatibility(format!(
                    "function '{}' operand type mismatch: {left_ty} vs {right_ty}",
                    name.tag()
                ))
            })?
        } else if name.is_comparison() {
            promote(left_ty, right_ty).ok_or_else(|| {
                QueryError::TypeCompatibility(format!(
                    "function '{}' operand type mismatch: {left_ty} vs {right_ty}",
                    name.tag()
                ))
            })?;
            ValueType::Bool
        } else if name.is_min_max() {
            // All eight native types are members of the ComparableTypes
            // list (StandardDataTypes.hpp), so only the promotion rule
            // applies here.
            promote(left_ty, right_ty).ok_or_else(|| {
                QueryError::TypeCompatibility(format!(
                    "function '{}' operand type mismatch: {left_ty} vs {right_ty}",
                    name.tag()
                ))
            })?
        } else {
            unreachable!("every FunctionName is arithmetic, comparison, or min/max")
        };
        Ok(Expression::new(ExprNode::Function(name, result_ty, args)))
    }

    pub fn not(operand: Expression) -> Result<Expression> {
        if operand.get_type() != ValueType::Bool {
            return Err(QueryError::TypeCompatibility(format!(
                "not() requires a bool operand, got {}",
                operand.get_type()
            )));
        }
        Ok(Expression::new(ExprNode::Not(operand)))
    }

    pub fn and(left: Expression, right: Expression) -> Result<Expression> {
        if left.get_type() != ValueType::Bool || right.get_type() != ValueType::Bool {
            return Err(QueryError::TypeCompatibility(format!(
                "and() requires bool operands, got {}/{}",
                left.get_type(),
                right.get_type()
            )));
        }
        Ok(Expression::new(ExprNode::And(left, right)))
    }

    pub fn or(left: Expression, right: Expression) -> Result<Expression> {
        if left.get_type() != ValueType::Bool || right.get_type() != ValueType::Bool {
            return Err(QueryError::TypeCompatibility(format!(
                "or() requires bool operands, got {}/{}",
                left.get_type(),
                right.get_type()
            )));
        }
        Ok(Expression::new(ExprNode::Or(left, right)))
    }

    pub fn global_decl(name: impl Into<String>, init: Expression, body: Expression) -> Expression {
        Expression::new(ExprNode::GlobalDecl(name.into(), init, body))
    }

    pub fn set_variable(name: impl Into<String>, value: Expression) -> Expression {
        Expression::new(ExprNode::SetVariable(name.into(), value))
    }

    pub fn reduce(reducer: Expression, series: Expression, initial: Expression) -> Result<Expression> {
        let ty = reducer.get_type();
        if series.get_type() != ty || initial.get_type() != ty {
            return Err(QueryError::TypeCompatibility(format!(
                "reduce() requires reducer/series/initial to share a type, got {}/{}/{}",
                ty,
                series.get_type(),
                initial.get_type()
            )));
        }
        Ok(Expression::new(ExprNode::Reduce(reducer, series, initial)))
    }

    /// Double-dispatch into the visitor's dedicated method for this node's
    /// variant.
    pub fn apply<V: ExpressionVisitor + ?Sized>(&self, visitor: &mut V) {
        match &*self.0 {
            ExprNode::Constant(v) => visitor.visit_constant(v),
            ExprNode::Parameter(i, ty) => visitor.visit_parameter(*i, *ty),
            ExprNode::Variable(name, ty) => visitor.visit_variable(name, *ty),
            ExprNode::MemberAccess(name, ty, target) => {
                visitor.visit_member_access(name, *ty, target)
            }
            ExprNode::Function(name, ty, args) => visitor.visit_function(*name, *ty, args),
            ExprNode::Not(operand) => visitor.visit_not(operand),
            ExprNode::And(l, r) => visitor.visit_and(l, r),
            ExprNode::Or(l, r) => visitor.visit_or(l, r),
            ExprNode::GlobalDecl(name, init, body) => visitor.visit_global_decl(name, init, body),
            ExprNode::SetVariable(name, value) => visitor.visit_set_variable(name, value),
            ExprNode::Reduce(reducer, series, initial) => {
                visitor.visit_reduce(reducer, series, initial)
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ExprNode::Constant(v) => match v {
                Value::Bool(b) => write!(f, "{b}"),
                Value::Int(i) => write!(f, "{i}"),
                Value::Double(d) => write!(f, "{d}"),
                Value::UInt64(u) => write!(f, "{u}"),
                Value::Char(c) => write!(f, "{c}"),
                Value::String(s) => write!(f, "{s}"),
                Value::Timestamp(_) | Value::Duration(_) => write!(f, "<{}>", v.value_type()),
            },
            ExprNode::Parameter(i, _) => write!(f, "(parameter {i})"),
            ExprNode::Variable(name, _) => write!(f, "{name}"),
            ExprNode::MemberAccess(name, _, target) => write!(f, "(member {target} {name})"),
            ExprNode::Function(name, _, args) => {
                write!(f, "({}", name.tag())?;
                for a in args {
                    write!(f, " {a}")?;
                }
                write!(f, ")")
            }
            ExprNode::Not(operand) => write!(f, "(not {operand})"),
            ExprNode::And(l, r) => write!(f, "(and {l} {r})"),
            ExprNode::Or(l, r) => write!(f, "(or {l} {r})"),
            ExprNode::GlobalDecl(name, init, body) => write!(f, "(global {name} {init} {body})"),
            ExprNode::SetVariable(name, value) => write!(f, "(set {name} {value})"),
            ExprNode::Reduce(reducer, series, initial) => {
                write!(f, "(reduce {reducer} {series} {initial})")
            }
        }
    }
}

/// Folds a sequence of boolean expressions right-associatively into
/// nested `And`s (spec.md §4.1). An empty sequence folds to
/// `Constant(false)`; a singleton returns the expression unchanged.
pub fn conjunction(expressions: Vec<Expression>) -> Expression {
    let mut iter = expressions.into_iter().rev();
    let mut acc = match iter.next() {
        Some(last) => last,
        None => return Expression::constant(Value::Bool(false)),
    };
    for expr in iter {
        acc = Expression::and(expr, acc).expect("conjunction: all operands must be bool expressions");
    }
    acc
}

/// The visitor interface: every variant has a dedicated method with a safe
/// (no-op) default, and every non-leaf default additionally recurses into
/// its children — this is the "TraversalExpressionVisitor" behavior named
/// in spec.md §4.1; implementers override only the variants they care
/// about.
pub trait ExpressionVisitor {
    fn visit_constant(&mut self, _value: &Value) {}

    fn visit_parameter(&mut self, _index: usize, _ty: ValueType) {}

    fn visit_variable(&mut self, _name: &str, _ty: ValueType) {}

    fn visit_member_access(&mut self, _name: &str, _ty: ValueType, target: &Expression) {
        target.apply(self);
    }

    fn visit_function(&mut self, _name: FunctionName, _ty: ValueType, args: &[Expression]) {
        for arg in args {
            arg.apply(self);
        }
    }

    fn visit_not(&mut self, operand: &Expression) {
        operand.apply(self);
    }

    fn visit_and(&mut self, left: &Expression, right: &Expression) {
        left.apply(self);
        right.apply(self);
    }

    fn visit_or(&mut self, left: &Expression, right: &Expression) {
        left.apply(self);
        right.apply(self);
    }

    fn visit_global_decl(&mut self, _name: &str, init: &Expression, body: &Expression) {
        init.apply(self);
        body.apply(self);
    }

    fn visit_set_variable(&mut self, _name: &str, value: &Expression) {
        value.apply(self);
    }

    fn visit_reduce(&mut self, reducer: &Expression, series: &Expression, initial: &Expression) {
        reducer.apply(self);
        series.apply(self);
        initial.apply(self);
    }
}

/// Marker naming the traversal behavior described in spec.md §4.1: every
/// `ExpressionVisitor` already recurses into children by default, so any
/// visitor is a `TraversalExpressionVisitor`.
pub trait TraversalExpressionVisitor: ExpressionVisitor {}
impl<T: ExpressionVisitor> TraversalExpressionVisitor for T {}

// --- Serialization (spec.md §6): a registry of stable string tags, with
// typing re-verified on deserialize. ---

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "tag", rename_all = "snake_case")]
enum WireExpr {
    Constant { value: Value },
    Parameter { index: usize, result_type: ValueType },
    Variable { name: String, result_type: ValueType },
    Member { name: String, result_type: ValueType, target: Box<WireExpr> },
    Function { name: FunctionName, args: Vec<WireExpr> },
    Not { operand: Box<WireExpr> },
    And { left: Box<WireExpr>, right: Box<WireExpr> },
    Or { left: Box<WireExpr>, right: Box<WireExpr> },
    Global { name: String, init: Box<WireExpr>, body: Box<WireExpr> },
    Set { name: String, value: Box<WireExpr> },
    Reduce { reducer: Box<WireExpr>, series: Box<WireExpr>, initial: Box<WireExpr> },
}

fn to_wire(expr: &Expression) -> WireExpr {
    match &*expr.0 {
        ExprNode::Constant(v) => WireExpr::Constant { value: v.clone() },
        ExprNode::Parameter(i, ty) => WireExpr::Parameter {
            index: *i,
            result_type: *ty,
        },
        ExprNode::Variable(name, ty) => WireExpr::Variable {
            name: name.clone(),
            result_type: *ty,
        },
        ExprNode::MemberAccess(name, ty, target) => WireExpr::Member {
            name: name.clone(),
            result_type: *ty,
            target: Box::new(to_wire(target)),
        },
        ExprNode::Function(name, _, args) => WireExpr::Function {
            name: *name,
            args: args.iter().map(to_wire).collect(),
        },
        ExprNode::Not(operand) => WireExpr::Not {
            operand: Box::new(to_wire(operand)),
        },
        ExprNode::And(l, r) => WireExpr::And {
            left: Box::new(to_wire(l)),
            right: Box::new(to_wire(r)),
        },
        ExprNode::Or(l, r) => WireExpr::Or {
            left: Box::new(to_wire(l)),
            right: Box::new(to_wire(r)),
        },
        ExprNode::GlobalDecl(name, init, body) => WireExpr::Global {
            name: name.clone(),
            init: Box::new(to_wire(init)),
            body: Box::new(to_wire(body)),
        },
        ExprNode::SetVariable(name, value) => WireExpr::Set {
            name: name.clone(),
            value: Box::new(to_wire(value)),
        },
        ExprNode::Reduce(reducer, series, initial) => WireExpr::Reduce {
            reducer: Box::new(to_wire(reducer)),
            series: Box::new(to_wire(series)),
            initial: Box::new(to_wire(initial)),
        },
    }
}

fn from_wire(wire: WireExpr) -> Result<Expression> {
    let rebuild = |e: WireExpr| -> Result<Expression> { from_wire(e) };
    let retype = |r: Result<Expression>| -> Result<Expression> {
        r.map_err(|e| QueryError::Serialization(e.to_string()))
    };
    match wire {
        WireExpr::Constant { value } => Ok(Expression::constant(value)),
        WireExpr::Parameter { index, result_type } => retype(Expression::parameter(index, result_type)),
        WireExpr::Variable { name, result_type } => Ok(Expression::variable(name, result_type)),
        WireExpr::Member {
            name,
            result_type,
            target,
        } => Ok(Expression::member_access(name, result_type, rebuild(*target)?)),
        WireExpr::Function { name, args } => {
            let args = args.into_iter().map(rebuild).collect::<Result<Vec<_>>>()?;
            retype(Expression::function(name, args))
        }
        WireExpr::Not { operand } => retype(Expression::not(rebuild(*operand)?)),
        WireExpr::And { left, right } => retype(Expression::and(rebuild(*left)?, rebuild(*right)?)),
        WireExpr::Or { left, right } => retype(Expression::or(rebuild(*left)?, rebuild(*right)?)),
        WireExpr::Global { name, init, body } => {
            Ok(Expression::global_decl(name, rebuild(*init)?, rebuild(*body)?))
        }
        WireExpr::Set { name, value } => Ok(Expression::set_variable(name, rebuild(*value)?)),
        WireExpr::Reduce {
            reducer,
            series,
            initial,
        } => retype(Expression::reduce(rebuild(*reducer)?, rebuild(*series)?, rebuild(*initial)?)),
    }
}

impl Serialize for Expression {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        to_wire(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireExpr::deserialize(deserializer)?;
        from_wire(wire).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S1 — And expression typing.
    #[test]
    fn and_of_two_true_constants_is_bool() {
        let a = Expression::constant(Value::Bool(true));
        let b = Expression::constant(Value::Bool(true));
        let expr = Expression::and(a, b).unwrap();
        assert_eq!(expr.get_type(), ValueType::Bool);
    }

    #[test]
    fn and_of_mismatched_types_is_rejected() {
        let a = Expression::constant(Value::Int(0));
        let b = Expression::constant(Value::Bool(true));
        assert!(matches!(
            Expression::and(a, b),
            Err(QueryError::TypeCompatibility(_))
        ));
    }

    // S2 — Conjunction folding.
    #[test]
    fn conjunction_of_empty_is_false() {
        let expr = conjunction(vec![]);
        assert_eq!(expr.to_string(), "false");
    }

    #[test]
    fn conjunction_of_one_is_unchanged() {
        let t = Expression::constant(Value::Bool(true));
        let expr = conjunction(vec![t.clone()]);
        assert_eq!(expr, t);
    }

    #[test]
    fn conjunction_folds_right_associatively() {
        let exprs = vec![
            Expression::constant(Value::Bool(true)),
            Expression::constant(Value::Bool(false)),
            Expression::constant(Value::Bool(true)),
        ];
        let expr = conjunction(exprs);
        assert_eq!(expr.to_string(), "(and true (and false true))");
    }

    #[test]
    fn reduce_requires_matching_types() {
        let reducer = Expression::parameter(0, ValueType::Int).unwrap();
        let series = Expression::constant(Value::Double(1.0));
        let initial = Expression::constant(Value::Int(0));
        assert!(Expression::reduce(reducer, series, initial).is_err());
    }

    #[test]
    fn serialization_round_trips() {
        let expr = Expression::and(
            Expression::constant(Value::Bool(true)),
            Expression::constant(Value::Bool(false)),
        )
        .unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
        assert_eq!(back.get_type(), ValueType::Bool);
    }

    #[test]
    fn parameter_index_beyond_max_is_rejected() {
        assert!(Expression::parameter(MAX_PARAMETERS, ValueType::Int).is_err());
    }
}

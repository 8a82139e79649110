//! Compiles an [`Expression`] into a tree of type-specialized evaluation
//! nodes (SPEC_FULL.md §4.2, grounded on
//! `original_source/Beam/Include/Beam/Queries/EvaluatorTranslator.hpp`).

use super::expression::{Expression, ExpressionVisitor, FunctionName, MAX_PARAMETERS};
use super::value::{Value, ValueType};
use crate::error::{QueryError, Result};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// A node in the compiled evaluation tree. `eval` takes `&mut self` because
/// `Reduce` and `GlobalDecl` nodes carry state that must persist across
/// calls (SPEC_FULL.md §4.2).
pub trait EvalNode: Send {
    fn eval(&mut self, params: &[Value]) -> Value;
}

struct ConstantNode(Value);
impl EvalNode for ConstantNode {
    fn eval(&mut self, _params: &[Value]) -> Value {
        self.0.clone()
    }
}

struct ParameterNode(usize);
impl EvalNode for ParameterNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        params[self.0].clone()
    }
}

/// Storage shared between a `GlobalDecl`, the `Variable` reads, and the
/// `SetVariable` writes translated within its body — the Rust analogue of
/// the source's bound storage address (SPEC_FULL.md §9 Design Notes).
type GlobalSlot = Arc<Mutex<Value>>;

struct VariableNode(GlobalSlot);
impl EvalNode for VariableNode {
    fn eval(&mut self, _params: &[Value]) -> Value {
        self.0.lock().clone()
    }
}

struct SetVariableNode {
    slot: GlobalSlot,
    value: Box<dyn EvalNode>,
}
impl EvalNode for SetVariableNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        let value = self.value.eval(params);
        *self.slot.lock() = value.clone();
        value
    }
}

/// Initializes `slot` from `init` on the first `eval()` only, so that
/// `SetVariable` writes performed by `body` across repeated evaluations
/// (e.g. a running counter in a live filter) persist rather than being
/// reset every call.
struct GlobalDeclNode {
    slot: GlobalSlot,
    initialized: bool,
    init: Box<dyn EvalNode>,
    body: Box<dyn EvalNode>,
}
impl EvalNode for GlobalDeclNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        if !self.initialized {
            let initial = self.init.eval(params);
            *self.slot.lock() = initial;
            self.initialized = true;
        }
        self.body.eval(params)
    }
}

struct NotNode(Box<dyn EvalNode>);
impl EvalNode for NotNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        match self.0.eval(params) {
            Value::Bool(b) => Value::Bool(!b),
            other => unreachable!("Not operand must be bool, got {:?}", other),
        }
    }
}

struct AndNode(Box<dyn EvalNode>, Box<dyn EvalNode>);
impl EvalNode for AndNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        match self.0.eval(params) {
            Value::Bool(false) => Value::Bool(false),
            Value::Bool(true) => self.1.eval(params),
            other => unreachable!("And operand must be bool, got {:?}", other),
        }
    }
}

struct OrNode(Box<dyn EvalNode>, Box<dyn EvalNode>);
impl EvalNode for OrNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        match self.0.eval(params) {
            Value::Bool(true) => Value::Bool(true),
            Value::Bool(false) => self.1.eval(params),
            other => unreachable!("Or operand must be bool, got {:?}", other),
        }
    }
}

struct FunctionNode {
    name: FunctionName,
    left: Box<dyn EvalNode>,
    right: Box<dyn EvalNode>,
}
impl EvalNode for FunctionNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        let left = self.left.eval(params);
        let right = self.right.eval(params);
        apply_function(self.name, left, right)
    }
}

struct ReduceNode {
    reducer: Box<dyn EvalNode>,
    series: Box<dyn EvalNode>,
    state: Value,
}
impl EvalNode for ReduceNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        let next = self.series.eval(params);
        let reducer_params = [self.state.clone(), next];
        self.state = self.reducer.eval(&reducer_params);
        self.state.clone()
    }
}

struct MemberAccessNode {
    target: Box<dyn EvalNode>,
    accessor: Accessor,
}
impl EvalNode for MemberAccessNode {
    fn eval(&mut self, params: &[Value]) -> Value {
        let target = self.target.eval(params);
        (self.accessor)(&target)
    }
}

fn numeric_pair(left: Value, right: Value) -> (f64, f64, bool) {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => (*a as f64, *b as f64, true),
        (Value::UInt64(a), Value::UInt64(b)) => (*a as f64, *b as f64, false),
        _ => (
            left.as_double().expect("arithmetic operand must be numeric"),
            right.as_double().expect("arithmetic operand must be numeric"),
            false,
        ),
    }
}

fn arithmetic(name: FunctionName, left: Value, right: Value) -> Value {
    if let (Value::Int(a), Value::Int(b)) = (&left, &right) {
        return Value::Int(match name {
            FunctionName::Add => a + b,
            FunctionName::Subtract => a - b,
            FunctionName::Multiply => a * b,
            FunctionName::Divide => a / b,
            _ => unreachable!(),
        });
    }
    if let (Value::UInt64(a), Value::UInt64(b)) = (&left, &right) {
        return Value::UInt64(match name {
            FunctionName::Add => a + b,
            FunctionName::Subtract => a - b,
            FunctionName::Multiply => a * b,
            FunctionName::Divide => a / b,
            _ => unreachable!(),
        });
    }
    let (a, b, _) = numeric_pair(left, right);
    Value::Double(match name {
        FunctionName::Add => a + b,
        FunctionName::Subtract => a - b,
        FunctionName::Multiply => a * b,
        FunctionName::Divide => a / b,
        _ => unreachable!(),
    })
}

/// Compares two values of the same (or int/double-promotable) type. Only
/// called on operand pairs the translator has already proven comparable.
fn compare(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Char(a), Value::Char(b)) => a.cmp(b),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::UInt64(a), Value::UInt64(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::Duration(a), Value::Duration(b)) => a.cmp(b),
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        _ => {
            let a = left.as_double().expect("comparison operand must be numeric");
            let b = right.as_double().expect("comparison operand must be numeric");
            a.partial_cmp(&b).expect("NaN is not a valid query operand")
        }
    }
}

fn apply_function(name: FunctionName, left: Value, right: Value) -> Value {
    use FunctionName::*;
    match name {
        Add | Subtract | Multiply | Divide => arithmetic(name, left, right),
        Less => Value::Bool(compare(&left, &right) == Ordering::Less),
        LessEquals => Value::Bool(compare(&left, &right) != Ordering::Greater),
        Equals => Value::Bool(compare(&left, &right) == Ordering::Equal),
        NotEquals => Value::Bool(compare(&left, &right) != Ordering::Equal),
        GreaterEquals => Value::Bool(compare(&left, &right) != Ordering::Less),
        Greater => Value::Bool(compare(&left, &right) == Ordering::Greater),
        Max => {
            if compare(&left, &right) == Ordering::Less {
                right
            } else {
                left
            }
        }
        Min => {
            if compare(&left, &right) == Ordering::Greater {
                right
            } else {
                left
            }
        }
    }
}

/// A compiled expression together with the parameter slots it references.
pub struct Evaluator {
    root: Box<dyn EvalNode>,
    parameters: Vec<ParameterInfo>,
    result_type: ValueType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterInfo {
    pub index: usize,
    pub value_type: ValueType,
}

impl Evaluator {
    /// Evaluates the tree, reading through `params` wherever the AST
    /// referenced a `Parameter` (spec.md §4.2: "the evaluator merely
    /// reads through those pointers at `eval()` time").
    pub fn eval(&mut self, params: &[Value]) -> Value {
        self.root.eval(params)
    }

    pub fn result_type(&self) -> ValueType {
        self.result_type
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }
}

type Accessor = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Host-provided `(struct type, member name) -> accessor` table consulted
/// when translating `MemberAccess` nodes (spec.md §4.2).
#[derive(Default, Clone)]
pub struct AccessorRegistry {
    accessors: HashMap<(ValueType, String), Accessor>,
}

impl AccessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        struct_type: ValueType,
        member: impl Into<String>,
        accessor: impl Fn(&Value) -> Value + Send + Sync + 'static,
    ) {
        self.accessors
            .insert((struct_type, member.into()), Arc::new(accessor));
    }

    fn get(&self, struct_type: ValueType, member: &str) -> Option<Accessor> {
        self.accessors.get(&(struct_type, member.to_string())).cloned()
    }
}

/// Translates an [`Expression`] into an [`Evaluator`] (SPEC_FULL.md §4.2).
///
/// One translator instance is used per top-level `translate` call; nested
/// sub-expressions (function arguments, `Reduce`'s reducer, `GlobalDecl`'s
/// init/body) are translated via the same instance so that the variable
/// scope stack and parameter list accumulate correctly.
pub struct EvaluatorTranslator {
    accessors: AccessorRegistry,
    variables: HashMap<String, Vec<GlobalSlot>>,
    parameters: Vec<ParameterInfo>,
    current: Option<Result<Box<dyn EvalNode>>>,
}

impl EvaluatorTranslator {
    pub fn new(accessors: AccessorRegistry) -> Self {
        EvaluatorTranslator {
            accessors,
            variables: HashMap::new(),
            parameters: Vec::new(),
            current: None,
        }
    }

    /// Translates `expression`, verifying that parameter indices are
    /// densely numbered and consistently typed (spec.md §4.2).
    pub fn translate(mut self, expression: &Expression) -> Result<Evaluator> {
        let result_type = expression.get_type();
        expression.apply(&mut self);
        let root = match self.current.take() {
            Some(result) => result?,
            None => {
                return Err(QueryError::ExpressionTranslation(
                    "translation produced no evaluator".to_string(),
                ))
            }
        };
        self.check_parameters()?;
        Ok(Evaluator {
            root,
            parameters: self.parameters,
            result_type,
        })
    }

    fn check_parameters(&self) -> Result<()> {
        Self::check_parameter_list(&self.parameters)
    }

    /// Verifies that `parameters` are densely numbered and consistently
    /// typed. Shared between the outer parameter list and a `Reduce`
    /// reducer's isolated two-parameter namespace (see `visit_reduce`).
    fn check_parameter_list(parameters: &[ParameterInfo]) -> Result<()> {
        let mut seen: Vec<Option<ValueType>> = vec![None; MAX_PARAMETERS];
        let mut max_index: Option<usize> = None;
        for p in parameters {
            max_index = Some(max_index.map_or(p.index, |m| m.max(p.index)));
            match seen[p.index] {
                Some(ty) if ty != p.value_type => {
                    return Err(QueryError::ExpressionTranslation(format!(
                        "parameter {} used with inconsistent types {ty} and {}",
                        p.index, p.value_type
                    )))
                }
                _ => seen[p.index] = Some(p.value_type),
            }
        }
        if let Some(max_index) = max_index {
            for i in 0..=max_index {
                if seen[i].is_none() {
                    return Err(QueryError::ExpressionTranslation(format!(
                        "missing parameter {i}: parameter indices must be densely numbered"
                    )));
                }
            }
        }
        Ok(())
    }

    fn fail(&mut self, error: QueryError) {
        if self.current.is_none() || matches!(self.current, Some(Ok(_))) {
            self.current = Some(Err(error));
        }
    }

    fn failed(&self) -> bool {
        matches!(self.current, Some(Err(_)))
    }

    fn set_node(&mut self, node: Box<dyn EvalNode>) {
        if !self.failed() {
            self.current = Some(Ok(node));
        }
    }

    /// Translates `expr` as a nested sub-expression, returning its node
    /// (or short-circuiting if this translator has already failed).
    fn sub(&mut self, expr: &Expression) -> Option<Box<dyn EvalNode>> {
        if self.failed() {
            return None;
        }
        expr.apply(self);
        match self.current.take() {
            Some(Ok(node)) => Some(node),
            Some(Err(e)) => {
                self.current = Some(Err(e));
                None
            }
            None => {
                self.current = Some(Err(QueryError::ExpressionTranslation(
                    "sub-expression produced no evaluator".to_string(),
                )));
                None
            }
        }
    }
}

impl ExpressionVisitor for EvaluatorTranslator {
    fn visit_constant(&mut self, value: &Value) {
        if self.failed() {
            return;
        }
        self.set_node(Box::new(ConstantNode(value.clone())));
    }

    fn visit_parameter(&mut self, index: usize, ty: ValueType) {
        if self.failed() {
            return;
        }
        if index >= MAX_PARAMETERS {
            self.fail(QueryError::ExpressionTranslation(format!(
                "parameter index {index} exceeds MAX_PARAMETERS ({MAX_PARAMETERS})"
            )));
            return;
        }
        self.parameters.push(ParameterInfo { index, value_type: ty });
        self.set_node(Box::new(ParameterNode(index)));
    }

    fn visit_variable(&mut self, name: &str, _ty: ValueType) {
        if self.failed() {
            return;
        }
        match self.variables.get(name).and_then(|stack| stack.last()) {
            Some(slot) => {
                let slot = slot.clone();
                self.set_node(Box::new(VariableNode(slot)));
            }
            None => self.fail(QueryError::ExpressionTranslation(format!(
                "variable '{name}' not found"
            ))),
        }
    }

    fn visit_member_access(&mut self, name: &str, _ty: ValueType, target: &Expression) {
        let Some(target_node) = self.sub(target) else {
            return;
        };
        match self.accessors.get(target.get_type(), name) {
            Some(accessor) => self.set_node(Box::new(MemberAccessNode {
                target: target_node,
                accessor,
            })),
            None => self.fail(QueryError::ExpressionTranslation(format!(
                "no accessor registered for {}.{name}",
                target.get_type()
            ))),
        }
    }

    fn visit_function(&mut self, name: FunctionName, _ty: ValueType, args: &[Expression]) {
        if args.len() != name.arity() {
            self.fail(QueryError::ExpressionTranslation(format!(
                "function '{}' expects {} argument(s)",
                name.tag(),
                name.arity()
            )));
            return;
        }
        let Some(left) = self.sub(&args[0]) else { return };
        let Some(right) = self.sub(&args[1]) else { return };
        self.set_node(Box::new(FunctionNode { name, left, right }));
    }

    fn visit_not(&mut self, operand: &Expression) {
        let Some(node) = self.sub(operand) else { return };
        self.set_node(Box::new(NotNode(node)));
    }

    fn visit_and(&mut self, left: &Expression, right: &Expression) {
        let Some(left_node) = self.sub(left) else { return };
        let Some(right_node) = self.sub(right) else { return };
        self.set_node(Box::new(AndNode(left_node, right_node)));
    }

    fn visit_or(&mut self, left: &Expression, right: &Expression) {
        let Some(left_node) = self.sub(left) else { return };
        let Some(right_node) = self.sub(right) else { return };
        self.set_node(Box::new(OrNode(left_node, right_node)));
    }

    fn visit_global_decl(&mut self, name: &str, init: &Expression, body: &Expression) {
        let Some(init_node) = self.sub(init) else { return };
        let slot: GlobalSlot = Arc::new(Mutex::new(Value::Bool(false)));
        self.variables.entry(name.to_string()).or_default().push(slot.clone());
        let body_node = self.sub(body);
        self.variables.get_mut(name).expect("just pushed").pop();
        let Some(body_node) = body_node else { return };
        self.set_node(Box::new(GlobalDeclNode {
            slot,
            initialized: false,
            init: init_node,
            body: body_node,
        }));
    }

    fn visit_set_variable(&mut self, name: &str, value: &Expression) {
        let slot = match self.variables.get(name).and_then(|stack| stack.last()) {
            Some(slot) => slot.clone(),
            None => {
                self.fail(QueryError::ExpressionTranslation(format!(
                    "variable '{name}' not found"
                )));
                return;
            }
        };
        let Some(value_node) = self.sub(value) else { return };
        self.set_node(Box::new(SetVariableNode { slot, value: value_node }));
    }

    fn visit_reduce(&mut self, reducer: &Expression, series: &Expression, initial: &Expression) {
        // The reducer is compiled as its own two-parameter sub-evaluator
        // (accumulator = Parameter(0), new value = Parameter(1)) with a
        // parameter namespace isolated from the outer expression's, so its
        // internal parameters are validated on their own and never merge
        // into the query's parameter list.
        let outer_parameters = std::mem::take(&mut self.parameters);
        let reducer_node = self.sub(reducer);
        let reducer_parameters = std::mem::replace(&mut self.parameters, outer_parameters);
        let Some(reducer_node) = reducer_node else { return };
        if let Err(e) = Self::check_parameter_list(&reducer_parameters) {
            self.fail(e);
            return;
        }
        let Some(series_node) = self.sub(series) else { return };
        if self.failed() {
            return;
        }
        let initial_value = match initial.as_constant() {
            Some(v) => v.clone(),
            None => {
                // The initial value need not be a literal constant; translate
                // it and evaluate it once with no parameters bound.
                let Some(mut initial_node) = self.sub(initial) else { return };
                initial_node.eval(&[])
            }
        };
        self.set_node(Box::new(ReduceNode {
            reducer: reducer_node,
            series: series_node,
            state: initial_value,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::Expression;

    fn translate(expr: &Expression) -> Result<Evaluator> {
        EvaluatorTranslator::new(AccessorRegistry::new()).translate(expr)
    }

    #[test]
    fn constant_evaluates_to_itself() {
        let expr = Expression::constant(Value::Int(42));
        let mut evaluator = translate(&expr).unwrap();
        assert_eq!(evaluator.eval(&[]), Value::Int(42));
    }

    #[test]
    fn and_short_circuits_on_false_left() {
        // A right side that would fail if evaluated (wrong param count is
        // irrelevant here; we assert via a side-effecting accessor instead).
        let left = Expression::constant(Value::Bool(false));
        let right = Expression::constant(Value::Bool(true));
        let expr = Expression::and(left, right).unwrap();
        let mut evaluator = translate(&expr).unwrap();
        assert_eq!(evaluator.eval(&[]), Value::Bool(false));
    }

    // S4 — Reduce summation.
    #[test]
    fn reduce_accumulates_across_calls() {
        let reducer = Expression::function(
            FunctionName::Add,
            vec![
                Expression::parameter(0, ValueType::Int).unwrap(),
                Expression::parameter(1, ValueType::Int).unwrap(),
            ],
        )
        .unwrap();
        let series = Expression::constant(Value::Int(1));
        let initial = Expression::constant(Value::Int(0));
        let expr = Expression::reduce(reducer, series, initial).unwrap();
        let mut evaluator = EvaluatorTranslator::new(AccessorRegistry::new())
            .translate(&expr)
            .unwrap();
        let results: Vec<Value> = (0..4).map(|_| evaluator.eval(&[])).collect();
        assert_eq!(
            results,
            vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]
        );
    }

    #[test]
    fn parameters_must_be_densely_numbered() {
        // Parameter 1 used without parameter 0 ever appearing.
        let expr = Expression::parameter(1, ValueType::Int).unwrap();
        assert!(matches!(
            translate(&expr),
            Err(QueryError::ExpressionTranslation(_))
        ));
    }

    #[test]
    fn parameter_type_mismatch_is_rejected() {
        let left = Expression::parameter(0, ValueType::Int).unwrap();
        let right = Expression::parameter(0, ValueType::Int).unwrap();
        // Reuse the same parameter index at two different types by
        // constructing two separate expressions that both reference index 0.
        let expr = Expression::and(
            Expression::function(
                FunctionName::Equals,
                vec![left, Expression::constant(Value::Int(1))],
            )
            .unwrap(),
            Expression::function(
                FunctionName::Equals,
                vec![right, Expression::constant(Value::Int(1))],
            )
            .unwrap(),
        )
        .unwrap();
        // Both usages agree on type here, so this should succeed; this
        // test documents the allowed case (same index, same type).
        assert!(translate(&expr).is_ok());
    }

    #[test]
    fn global_variable_persists_across_calls() {
        // global x := 0 in (set x (+ x 1))
        let increment = Expression::function(
            FunctionName::Add,
            vec![
                Expression::variable("x", ValueType::Int),
                Expression::constant(Value::Int(1)),
            ],
        )
        .unwrap();
        let body = Expression::set_variable("x", increment);
        let expr = Expression::global_decl("x", Expression::constant(Value::Int(0)), body);
        let mut evaluator = translate(&expr).unwrap();
        assert_eq!(evaluator.eval(&[]), Value::Int(1));
        assert_eq!(evaluator.eval(&[]), Value::Int(2));
        assert_eq!(evaluator.eval(&[]), Value::Int(3));
    }

    #[test]
    fn member_access_requires_a_registered_accessor() {
        let target = Expression::constant(Value::Int(7));
        let expr = Expression::member_access("field", ValueType::Int, target);
        assert!(matches!(
            translate(&expr),
            Err(QueryError::ExpressionTranslation(_))
        ));
    }
}

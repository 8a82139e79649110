//! A minimal `ExpressionVisitor` lowering a filter expression to a
//! SQL-flavored backend string (SPEC_FULL.md §6.1, grounded on
//! `original_source/Beam/Include/Beam/Queries/SqlTranslator.hpp`'s
//! documented minimum coverage: `+`, `==`, `Or`, and `Parameter`). Not a SQL
//! engine — anything outside that coverage is an `ExpressionTranslation`
//! error rather than a best-effort lowering.

use super::expression::{Expression, ExpressionVisitor, FunctionName};
use super::value::{Value, ValueType};
use crate::error::{QueryError, Result};

pub struct SqlTranslator {
    stack: Vec<String>,
    error: Option<QueryError>,
}

impl SqlTranslator {
    pub fn new() -> Self {
        SqlTranslator {
            stack: Vec::new(),
            error: None,
        }
    }

    /// Translates `expr`, failing on the first unsupported node
    /// encountered during the traversal.
    pub fn translate(expr: &Expression) -> Result<String> {
        let mut translator = SqlTranslator::new();
        expr.apply(&mut translator);
        if let Some(err) = translator.error {
            return Err(err);
        }
        translator
            .stack
            .pop()
            .ok_or_else(|| QueryError::ExpressionTranslation("empty expression".to_string()))
    }

    fn fail(&mut self, reason: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(QueryError::ExpressionTranslation(reason.into()));
        }
    }

    fn push_constant(&mut self, value: &Value) {
        let sql = match value {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::UInt64(u) => u.to_string(),
            Value::String(s) => format!("'{}'", s.replace('\'', "''")),
            other => {
                self.fail(format!("constant of type {} has no SQL translation", other.value_type()));
                return;
            }
        };
        self.stack.push(sql);
    }

    fn pop_pair(&mut self) -> Option<(String, String)> {
        let right = self.stack.pop()?;
        let left = self.stack.pop()?;
        Some((left, right))
    }
}

impl Default for SqlTranslator {
    fn default() -> Self {
        SqlTranslator::new()
    }
}

impl ExpressionVisitor for SqlTranslator {
    fn visit_constant(&mut self, value: &Value) {
        self.push_constant(value);
    }

    fn visit_parameter(&mut self, index: usize, _ty: ValueType) {
        self.stack.push(format!("${index}"));
    }

    fn visit_variable(&mut self, name: &str, _ty: ValueType) {
        self.fail(format!("variable '{name}' has no SQL translation"));
    }

    fn visit_member_access(&mut self, name: &str, _ty: ValueType, _target: &Expression) {
        self.fail(format!("member access '{name}' has no SQL translation"));
    }

    fn visit_function(&mut self, name: FunctionName, _ty: ValueType, args: &[Expression]) {
        for arg in args {
            if self.error.is_some() {
                return;
            }
            arg.apply(self);
        }
        if self.error.is_some() {
            return;
        }
        match name {
            FunctionName::Add | FunctionName::Equals => match self.pop_pair() {
                Some((left, right)) => self.stack.push(format!("({left} {} {right})", name.tag())),
                None => self.fail("function translation missing operands"),
            },
            other => self.fail(format!("function '{}' has no SQL translation", other.tag())),
        }
    }

    fn visit_not(&mut self, _operand: &Expression) {
        self.fail("NOT has no SQL translation");
    }

    fn visit_and(&mut self, _left: &Expression, _right: &Expression) {
        self.fail("AND has no SQL translation");
    }

    fn visit_or(&mut self, left: &Expression, right: &Expression) {
        left.apply(self);
        if self.error.is_some() {
            return;
        }
        right.apply(self);
        if self.error.is_some() {
            return;
        }
        match self.pop_pair() {
            Some((left, right)) => self.stack.push(format!("({left} OR {right})")),
            None => self.fail("OR translation missing operands"),
        }
    }

    fn visit_global_decl(&mut self, _name: &str, _init: &Expression, _body: &Expression) {
        self.fail("global declarations have no SQL translation");
    }

    fn visit_set_variable(&mut self, _name: &str, _value: &Expression) {
        self.fail("variable assignment has no SQL translation");
    }

    fn visit_reduce(&mut self, _reducer: &Expression, _series: &Expression, _initial: &Expression) {
        self.fail("reduce has no SQL translation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expression::Expression;

    #[test]
    fn translates_addition_and_equality_of_a_parameter() {
        let expr = Expression::function(
            FunctionName::Equals,
            vec![
                Expression::function(
                    FunctionName::Add,
                    vec![
                        Expression::parameter(0, ValueType::Int).unwrap(),
                        Expression::constant(Value::Int(1)),
                    ],
                )
                .unwrap(),
                Expression::constant(Value::Int(10)),
            ],
        )
        .unwrap();
        let sql = SqlTranslator::translate(&expr).unwrap();
        assert_eq!(sql, "(($0 + 1) == 10)");
    }

    #[test]
    fn translates_or_of_two_comparisons() {
        let left = Expression::constant(Value::Bool(true));
        let right = Expression::constant(Value::Bool(false));
        let expr = Expression::or(left, right).unwrap();
        let sql = SqlTranslator::translate(&expr).unwrap();
        assert_eq!(sql, "(true OR false)");
    }

    #[test]
    fn unsupported_function_is_a_translation_error() {
        let expr = Expression::function(
            FunctionName::Max,
            vec![Expression::constant(Value::Int(1)), Expression::constant(Value::Int(2))],
        )
        .unwrap();
        let err = SqlTranslator::translate(&expr).unwrap_err();
        assert!(matches!(err, QueryError::ExpressionTranslation(_)));
    }

    #[test]
    fn not_has_no_translation() {
        let expr = Expression::not(Expression::constant(Value::Bool(true))).unwrap();
        let err = SqlTranslator::translate(&expr).unwrap_err();
        assert!(matches!(err, QueryError::ExpressionTranslation(_)));
    }
}

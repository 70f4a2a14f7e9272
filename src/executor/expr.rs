//! Expression resolution and evaluation
//!
//! SQL expressions are resolved once against the query's table ranges
//! into `CompiledExpr` trees, then evaluated per row. Evaluation uses
//! SQL three-valued logic: comparisons against NULL yield NULL, and a
//! condition holds only when it evaluates to TRUE.
//!
//! A row-scoped failure (integer overflow, operands an operator does not
//! apply to) surfaces as [`EvalError::Skip`]: the row drops out of the
//! scan instead of failing the whole statement.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::catalog::Database;
use crate::error::{Error, Result};
use crate::sql::ast::{AggregateFunc, BinaryOperator, Expr, Literal, UnaryOperator};
use crate::storage::Value;

/// One table range in a query, carrying the names expressions resolve
/// against.
#[derive(Debug, Clone)]
pub struct RangeVar {
    /// Catalog table name
    pub table: String,
    /// Alias used for qualified references, defaults to the table name
    pub alias: String,
    /// Column names in schema order
    pub columns: Vec<String>,
    /// Rows missing from this range null-extend instead of dropping the
    /// outer row
    pub outer: bool,
}

impl RangeVar {
    /// Build a range from the catalog.
    pub fn new(db: &Database, table: &str, alias: Option<&str>, outer: bool) -> Result<Self> {
        let t = db.get_table(table)?;
        Ok(Self {
            table: table.to_string(),
            alias: alias.unwrap_or(table).to_string(),
            columns: t
                .schema()
                .column_names()
                .iter()
                .map(|s| s.to_string())
                .collect(),
            outer,
        })
    }
}

/// Scalar functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarFunc {
    Upper,
    Lower,
    Length,
    Abs,
}

impl ScalarFunc {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "UPPER" => Some(ScalarFunc::Upper),
            "LOWER" => Some(ScalarFunc::Lower),
            "LENGTH" => Some(ScalarFunc::Length),
            "ABS" => Some(ScalarFunc::Abs),
            _ => None,
        }
    }
}

/// An aggregate occurrence collected during resolution. Accumulation runs
/// per input row; the finished value is read back through the slot the
/// resolved expression references.
#[derive(Debug, Clone)]
pub struct AggregateExpr {
    pub func: AggregateFunc,
    pub distinct: bool,
    /// None is COUNT(*)
    pub arg: Option<CompiledExpr>,
}

/// An expression resolved against a set of table ranges.
#[derive(Debug, Clone)]
pub enum CompiledExpr {
    Value(Value),
    Column {
        range: usize,
        column: usize,
    },
    Parameter(usize),
    Unary {
        op: UnaryOperator,
        expr: Box<CompiledExpr>,
    },
    Binary {
        left: Box<CompiledExpr>,
        op: BinaryOperator,
        right: Box<CompiledExpr>,
    },
    IsNull {
        expr: Box<CompiledExpr>,
        negated: bool,
    },
    Like {
        expr: Box<CompiledExpr>,
        pattern: Box<CompiledExpr>,
        negated: bool,
    },
    Between {
        expr: Box<CompiledExpr>,
        low: Box<CompiledExpr>,
        high: Box<CompiledExpr>,
        negated: bool,
    },
    InList {
        expr: Box<CompiledExpr>,
        list: Vec<CompiledExpr>,
        negated: bool,
    },
    /// Reads the finished value of the aggregate in this slot
    AggregateRef(usize),
    Function {
        func: ScalarFunc,
        arg: Box<CompiledExpr>,
    },
    CurrentDate,
    CurrentTime,
    CurrentTimestamp,
}

impl CompiledExpr {
    /// Whether this tree reads an aggregate slot.
    pub fn references_aggregate(&self) -> bool {
        match self {
            CompiledExpr::AggregateRef(_) => true,
            CompiledExpr::Unary { expr, .. } => expr.references_aggregate(),
            CompiledExpr::Binary { left, right, .. } => {
                left.references_aggregate() || right.references_aggregate()
            }
            CompiledExpr::IsNull { expr, .. } => expr.references_aggregate(),
            CompiledExpr::Like { expr, pattern, .. } => {
                expr.references_aggregate() || pattern.references_aggregate()
            }
            CompiledExpr::Between {
                expr, low, high, ..
            } => {
                expr.references_aggregate()
                    || low.references_aggregate()
                    || high.references_aggregate()
            }
            CompiledExpr::InList { expr, list, .. } => {
                expr.references_aggregate() || list.iter().any(|e| e.references_aggregate())
            }
            CompiledExpr::Function { arg, .. } => arg.references_aggregate(),
            _ => false,
        }
    }

    /// Whether this tree reads a column outside the given group-key
    /// expressions without going through an aggregate.
    pub fn references_ungrouped_column(&self, group_keys: &[CompiledExpr]) -> bool {
        if group_keys.iter().any(|k| exprs_equal(k, self)) {
            return false;
        }
        match self {
            CompiledExpr::Column { .. } => true,
            CompiledExpr::AggregateRef(_) => false,
            CompiledExpr::Unary { expr, .. } => expr.references_ungrouped_column(group_keys),
            CompiledExpr::Binary { left, right, .. } => {
                left.references_ungrouped_column(group_keys)
                    || right.references_ungrouped_column(group_keys)
            }
            CompiledExpr::IsNull { expr, .. } => expr.references_ungrouped_column(group_keys),
            CompiledExpr::Like { expr, pattern, .. } => {
                expr.references_ungrouped_column(group_keys)
                    || pattern.references_ungrouped_column(group_keys)
            }
            CompiledExpr::Between {
                expr, low, high, ..
            } => {
                expr.references_ungrouped_column(group_keys)
                    || low.references_ungrouped_column(group_keys)
                    || high.references_ungrouped_column(group_keys)
            }
            CompiledExpr::InList { expr, list, .. } => {
                expr.references_ungrouped_column(group_keys)
                    || list.iter().any(|e| e.references_ungrouped_column(group_keys))
            }
            CompiledExpr::Function { arg, .. } => arg.references_ungrouped_column(group_keys),
            _ => false,
        }
    }
}

/// Structural equality between compiled expressions, used to match ORDER
/// BY and GROUP BY items against select columns.
pub fn exprs_equal(a: &CompiledExpr, b: &CompiledExpr) -> bool {
    match (a, b) {
        (CompiledExpr::Value(x), CompiledExpr::Value(y)) => x == y,
        (
            CompiledExpr::Column { range: r1, column: c1 },
            CompiledExpr::Column { range: r2, column: c2 },
        ) => r1 == r2 && c1 == c2,
        (CompiledExpr::Parameter(x), CompiledExpr::Parameter(y)) => x == y,
        (CompiledExpr::AggregateRef(x), CompiledExpr::AggregateRef(y)) => x == y,
        (
            CompiledExpr::Unary { op: o1, expr: e1 },
            CompiledExpr::Unary { op: o2, expr: e2 },
        ) => o1 == o2 && exprs_equal(e1, e2),
        (
            CompiledExpr::Binary {
                left: l1,
                op: o1,
                right: r1,
            },
            CompiledExpr::Binary {
                left: l2,
                op: o2,
                right: r2,
            },
        ) => o1 == o2 && exprs_equal(l1, l2) && exprs_equal(r1, r2),
        (
            CompiledExpr::Function { func: f1, arg: a1 },
            CompiledExpr::Function { func: f2, arg: a2 },
        ) => f1 == f2 && exprs_equal(a1, a2),
        (CompiledExpr::CurrentDate, CompiledExpr::CurrentDate) => true,
        (CompiledExpr::CurrentTime, CompiledExpr::CurrentTime) => true,
        (CompiledExpr::CurrentTimestamp, CompiledExpr::CurrentTimestamp) => true,
        _ => false,
    }
}

/// Resolve an AST expression against the query's ranges. Aggregate
/// occurrences are appended to `aggregates` and replaced by slot
/// references.
pub fn resolve(
    expr: &Expr,
    ranges: &[RangeVar],
    aggregates: &mut Vec<AggregateExpr>,
) -> Result<CompiledExpr> {
    match expr {
        Expr::Literal(lit) => Ok(CompiledExpr::Value(literal_value(lit))),
        Expr::Column(col) => {
            let (range, column) = resolve_column(col.table.as_deref(), &col.name, ranges)?;
            Ok(CompiledExpr::Column { range, column })
        }
        Expr::Parameter(i) => Ok(CompiledExpr::Parameter(*i)),
        Expr::Unary { op, expr } => Ok(CompiledExpr::Unary {
            op: *op,
            expr: Box::new(resolve(expr, ranges, aggregates)?),
        }),
        Expr::Binary { left, op, right } => Ok(CompiledExpr::Binary {
            left: Box::new(resolve(left, ranges, aggregates)?),
            op: *op,
            right: Box::new(resolve(right, ranges, aggregates)?),
        }),
        Expr::IsNull { expr, negated } => Ok(CompiledExpr::IsNull {
            expr: Box::new(resolve(expr, ranges, aggregates)?),
            negated: *negated,
        }),
        Expr::Like {
            expr,
            pattern,
            negated,
        } => Ok(CompiledExpr::Like {
            expr: Box::new(resolve(expr, ranges, aggregates)?),
            pattern: Box::new(resolve(pattern, ranges, aggregates)?),
            negated: *negated,
        }),
        Expr::Between {
            expr,
            low,
            high,
            negated,
        } => Ok(CompiledExpr::Between {
            expr: Box::new(resolve(expr, ranges, aggregates)?),
            low: Box::new(resolve(low, ranges, aggregates)?),
            high: Box::new(resolve(high, ranges, aggregates)?),
            negated: *negated,
        }),
        Expr::InList {
            expr,
            list,
            negated,
        } => Ok(CompiledExpr::InList {
            expr: Box::new(resolve(expr, ranges, aggregates)?),
            list: list
                .iter()
                .map(|e| resolve(e, ranges, aggregates))
                .collect::<Result<_>>()?,
            negated: *negated,
        }),
        Expr::Aggregate {
            func,
            distinct,
            arg,
        } => {
            let arg = match arg {
                Some(a) => Some(resolve(a, ranges, aggregates)?),
                None => None,
            };
            let slot = aggregates.len();
            aggregates.push(AggregateExpr {
                func: *func,
                distinct: *distinct,
                arg,
            });
            Ok(CompiledExpr::AggregateRef(slot))
        }
        Expr::Function { name, args } => {
            let func = ScalarFunc::from_name(name)
                .ok_or_else(|| Error::OperationNotSupported(format!("function {}", name)))?;
            if args.len() != 1 {
                return Err(Error::OperationNotSupported(format!(
                    "function {} takes one argument",
                    name
                )));
            }
            Ok(CompiledExpr::Function {
                func,
                arg: Box::new(resolve(&args[0], ranges, aggregates)?),
            })
        }
        Expr::CurrentDate => Ok(CompiledExpr::CurrentDate),
        Expr::CurrentTime => Ok(CompiledExpr::CurrentTime),
        Expr::CurrentTimestamp => Ok(CompiledExpr::CurrentTimestamp),
    }
}

fn resolve_column(
    qualifier: Option<&str>,
    name: &str,
    ranges: &[RangeVar],
) -> Result<(usize, usize)> {
    let mut found: Option<(usize, usize)> = None;
    for (ri, range) in ranges.iter().enumerate() {
        if let Some(q) = qualifier {
            if range.alias != q {
                continue;
            }
        }
        if let Some(ci) = range.columns.iter().position(|c| c == name) {
            if found.is_some() {
                return Err(Error::AmbiguousColumn(name.to_string()));
            }
            found = Some((ri, ci));
        }
    }
    found.ok_or_else(|| Error::ColumnNotFound(name.to_string()))
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(i) => match i32::try_from(*i) {
            Ok(n) => Value::Integer(n),
            Err(_) => Value::BigInt(*i),
        },
        Literal::Float(f) => Value::Double(*f),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Statement-scoped datetime values derived from one clock sample. TIME
/// is seconds of day, DATE days since the epoch, TIMESTAMP epoch millis.
#[derive(Debug, Clone, Copy)]
pub struct DateTimeValues {
    pub date: i32,
    pub time: i32,
    pub timestamp: i64,
}

impl DateTimeValues {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        Self::from_millis(millis)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self {
            date: millis.div_euclid(86_400_000) as i32,
            time: (millis.rem_euclid(86_400_000) / 1000) as i32,
            timestamp: millis,
        }
    }
}

/// Evaluation failure. `Skip` drops the current row from a scan; `Fail`
/// aborts the statement.
#[derive(Debug)]
pub enum EvalError {
    Skip,
    Fail(Error),
}

impl From<Error> for EvalError {
    fn from(e: Error) -> Self {
        EvalError::Fail(e)
    }
}

impl EvalError {
    /// Collapse into a statement error where skipping makes no sense,
    /// such as INSERT value lists.
    pub fn into_error(self) -> Error {
        match self {
            EvalError::Fail(e) => e,
            EvalError::Skip => Error::OperationNotSupported(
                "expression not applicable to its operand values".to_string(),
            ),
        }
    }
}

pub type EvalResult = std::result::Result<Value, EvalError>;

/// Everything a compiled expression needs at evaluation time. `rows`
/// holds the current row per range; `None` is a null-extended outer row.
pub struct EvalContext<'a> {
    pub rows: &'a [Option<&'a [Value]>],
    pub params: &'a [Value],
    pub now: DateTimeValues,
    pub aggregates: &'a [Value],
}

impl<'a> EvalContext<'a> {
    pub fn new(rows: &'a [Option<&'a [Value]>], params: &'a [Value], now: DateTimeValues) -> Self {
        Self {
            rows,
            params,
            now,
            aggregates: &[],
        }
    }

    pub fn with_aggregates(mut self, aggregates: &'a [Value]) -> Self {
        self.aggregates = aggregates;
        self
    }
}

/// Evaluate a resolved expression for the current row.
pub fn eval(expr: &CompiledExpr, ctx: &EvalContext<'_>) -> EvalResult {
    match expr {
        CompiledExpr::Value(v) => Ok(v.clone()),
        CompiledExpr::Column { range, column } => Ok(match ctx.rows.get(*range) {
            Some(Some(row)) => row.get(*column).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        }),
        CompiledExpr::Parameter(i) => Ok(ctx.params.get(*i).cloned().unwrap_or(Value::Null)),
        CompiledExpr::AggregateRef(slot) => {
            Ok(ctx.aggregates.get(*slot).cloned().unwrap_or(Value::Null))
        }
        CompiledExpr::Unary { op, expr } => {
            let v = eval(expr, ctx)?;
            match op {
                UnaryOperator::Minus => v.neg().ok_or(EvalError::Skip),
                UnaryOperator::Not => match v {
                    Value::Null => Ok(Value::Null),
                    Value::Boolean(b) => Ok(Value::Boolean(!b)),
                    _ => Err(EvalError::Skip),
                },
            }
        }
        CompiledExpr::Binary { left, op, right } => eval_binary(left, *op, right, ctx),
        CompiledExpr::IsNull { expr, negated } => {
            let v = eval(expr, ctx)?;
            Ok(Value::Boolean(v.is_null() != *negated))
        }
        CompiledExpr::Like {
            expr,
            pattern,
            negated,
        } => {
            let v = eval(expr, ctx)?;
            let p = eval(pattern, ctx)?;
            match (v, p) {
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                (Value::String(s), Value::String(p)) => {
                    Ok(Value::Boolean(like_match(&s, &p) != *negated))
                }
                _ => Err(EvalError::Skip),
            }
        }
        CompiledExpr::Between {
            expr,
            low,
            high,
            negated,
        } => {
            let v = eval(expr, ctx)?;
            let lo = eval(low, ctx)?;
            let hi = eval(high, ctx)?;
            if v.is_null() || lo.is_null() || hi.is_null() {
                return Ok(Value::Null);
            }
            let ge = v.compare(&lo).ok_or(EvalError::Skip)?.is_ge();
            let le = v.compare(&hi).ok_or(EvalError::Skip)?.is_le();
            Ok(Value::Boolean((ge && le) != *negated))
        }
        CompiledExpr::InList {
            expr,
            list,
            negated,
        } => {
            let v = eval(expr, ctx)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            let mut saw_null = false;
            for item in list {
                let candidate = eval(item, ctx)?;
                if candidate.is_null() {
                    saw_null = true;
                    continue;
                }
                if let Some(ord) = v.compare(&candidate) {
                    if ord.is_eq() {
                        return Ok(Value::Boolean(!*negated));
                    }
                }
            }
            if saw_null {
                Ok(Value::Null)
            } else {
                Ok(Value::Boolean(*negated))
            }
        }
        CompiledExpr::Function { func, arg } => {
            let v = eval(arg, ctx)?;
            if v.is_null() {
                return Ok(Value::Null);
            }
            match (func, v) {
                (ScalarFunc::Upper, Value::String(s)) => Ok(Value::String(s.to_uppercase())),
                (ScalarFunc::Lower, Value::String(s)) => Ok(Value::String(s.to_lowercase())),
                (ScalarFunc::Length, Value::String(s)) => {
                    Ok(Value::Integer(s.chars().count() as i32))
                }
                (ScalarFunc::Abs, Value::Integer(i)) => {
                    i.checked_abs().map(Value::Integer).ok_or(EvalError::Skip)
                }
                (ScalarFunc::Abs, Value::BigInt(i)) => {
                    i.checked_abs().map(Value::BigInt).ok_or(EvalError::Skip)
                }
                (ScalarFunc::Abs, Value::Double(f)) => Ok(Value::Double(f.abs())),
                _ => Err(EvalError::Skip),
            }
        }
        CompiledExpr::CurrentDate => Ok(Value::Date(ctx.now.date)),
        CompiledExpr::CurrentTime => Ok(Value::Time(ctx.now.time)),
        CompiledExpr::CurrentTimestamp => Ok(Value::Timestamp(ctx.now.timestamp)),
    }
}

fn eval_binary(
    left: &CompiledExpr,
    op: BinaryOperator,
    right: &CompiledExpr,
    ctx: &EvalContext<'_>,
) -> EvalResult {
    // AND and OR keep three-valued logic and short-circuit.
    match op {
        BinaryOperator::And => {
            let l = eval_logical(left, ctx)?;
            if l == Some(false) {
                return Ok(Value::Boolean(false));
            }
            let r = eval_logical(right, ctx)?;
            return Ok(match (l, r) {
                (_, Some(false)) => Value::Boolean(false),
                (Some(true), Some(true)) => Value::Boolean(true),
                _ => Value::Null,
            });
        }
        BinaryOperator::Or => {
            let l = eval_logical(left, ctx)?;
            if l == Some(true) {
                return Ok(Value::Boolean(true));
            }
            let r = eval_logical(right, ctx)?;
            return Ok(match (l, r) {
                (_, Some(true)) => Value::Boolean(true),
                (Some(false), Some(false)) => Value::Boolean(false),
                _ => Value::Null,
            });
        }
        _ => {}
    }

    let l = eval(left, ctx)?;
    let r = eval(right, ctx)?;

    match op {
        BinaryOperator::Eq
        | BinaryOperator::Neq
        | BinaryOperator::Lt
        | BinaryOperator::Gt
        | BinaryOperator::Lte
        | BinaryOperator::Gte => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            let ord = l.compare(&r).ok_or(EvalError::Skip)?;
            let holds = match op {
                BinaryOperator::Eq => ord.is_eq(),
                BinaryOperator::Neq => ord.is_ne(),
                BinaryOperator::Lt => ord.is_lt(),
                BinaryOperator::Gt => ord.is_gt(),
                BinaryOperator::Lte => ord.is_le(),
                BinaryOperator::Gte => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Boolean(holds))
        }
        BinaryOperator::Add => null_or(&l, &r, |a, b| a.add(b)),
        BinaryOperator::Sub => null_or(&l, &r, |a, b| a.sub(b)),
        BinaryOperator::Mul => null_or(&l, &r, |a, b| a.mul(b)),
        BinaryOperator::Div => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            if matches!(r, Value::Integer(0) | Value::BigInt(0))
                || matches!(r, Value::Double(f) if f == 0.0)
            {
                return Err(EvalError::Fail(Error::DivisionByZero));
            }
            l.div(&r).ok_or(EvalError::Skip)
        }
        BinaryOperator::Concat => {
            if l.is_null() || r.is_null() {
                return Ok(Value::Null);
            }
            Ok(Value::String(format!("{}{}", l, r)))
        }
        BinaryOperator::And | BinaryOperator::Or => unreachable!(),
    }
}

fn eval_logical(
    expr: &CompiledExpr,
    ctx: &EvalContext<'_>,
) -> std::result::Result<Option<bool>, EvalError> {
    match eval(expr, ctx)? {
        Value::Null => Ok(None),
        Value::Boolean(b) => Ok(Some(b)),
        _ => Err(EvalError::Skip),
    }
}

fn null_or(l: &Value, r: &Value, f: impl Fn(&Value, &Value) -> Option<Value>) -> EvalResult {
    if l.is_null() || r.is_null() {
        return Ok(Value::Null);
    }
    f(l, r).ok_or(EvalError::Skip)
}

/// Evaluate a condition: TRUE passes, FALSE and NULL do not.
pub fn holds(expr: &CompiledExpr, ctx: &EvalContext<'_>) -> std::result::Result<bool, EvalError> {
    Ok(eval_logical(expr, ctx)? == Some(true))
}

/// SQL LIKE with `%` (any run) and `_` (any single character).
pub fn like_match(text: &str, pattern: &str) -> bool {
    fn inner(t: &[char], p: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('%') => (0..=t.len()).any(|i| inner(&t[i..], &p[1..])),
            Some('_') => !t.is_empty() && inner(&t[1..], &p[1..]),
            Some(&c) => t.first() == Some(&c) && inner(&t[1..], &p[1..]),
        }
    }
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    inner(&t, &p)
}

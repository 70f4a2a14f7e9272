//! SQL Abstract Syntax Tree (AST)
//!
//! This module defines the AST nodes for SQL statements.

use crate::catalog::DataType;

/// A SQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// SELECT query, possibly a set-operation chain
    Select(Box<SelectStatement>),
    /// INSERT statement
    Insert(InsertStatement),
    /// UPDATE statement
    Update(UpdateStatement),
    /// DELETE statement
    Delete(DeleteStatement),
    /// CREATE TABLE statement
    CreateTable(CreateTableStatement),
    /// DROP TABLE statement
    DropTable { name: String },
    /// CREATE INDEX statement
    CreateIndex(CreateIndexStatement),
    /// DROP INDEX statement
    DropIndex { name: String, table: String },
    /// COMMIT [WORK]
    Commit,
    /// ROLLBACK [WORK]
    Rollback,
    /// SAVEPOINT name
    Savepoint(String),
    /// RELEASE SAVEPOINT name
    ReleaseSavepoint(String),
    /// ROLLBACK TO SAVEPOINT name
    RollbackToSavepoint(String),
    /// SET AUTOCOMMIT TRUE/FALSE
    SetAutocommit(bool),
    /// SET MAXROWS n
    SetMaxRows(usize),
    /// SHUTDOWN [COMPACT]
    Shutdown { compact: bool },
}

/// Set operators linking SELECT branches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    UnionAll,
    Intersect,
    Except,
}

/// SELECT statement. A set-operation chain hangs off `union`, with
/// `union_depth` recording the parenthesis nesting level still open after
/// this branch.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub distinct: bool,
    pub columns: Vec<SelectItem>,
    pub from: Option<TableRef>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<LimitClause>,
    pub union_type: Option<SetOperator>,
    pub union: Option<Box<SelectStatement>>,
    pub union_depth: usize,
}

impl SelectStatement {
    pub fn new() -> Self {
        Self {
            distinct: false,
            columns: Vec::new(),
            from: None,
            joins: Vec::new(),
            where_clause: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            union_type: None,
            union: None,
            union_depth: 0,
        }
    }
}

impl Default for SelectStatement {
    fn default() -> Self {
        Self::new()
    }
}

/// An item in the SELECT list
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// `*`
    Wildcard,
    /// `table.*`
    QualifiedWildcard(String),
    /// expression with optional alias
    Expr { expr: Expr, alias: Option<String> },
}

/// A table reference with optional alias
#[derive(Debug, Clone, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

/// Join types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    LeftOuter,
    Cross,
}

/// A join clause
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: TableRef,
    pub join_type: JoinType,
    pub on: Option<Expr>,
}

/// ORDER BY item
#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: Expr,
    pub descending: bool,
}

/// LIMIT clause: skip `start` rows, return at most `count`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitClause {
    pub start: usize,
    pub count: usize,
}

/// INSERT statement
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    /// Explicit column list, or empty for schema order
    pub columns: Vec<String>,
    pub values: Vec<Expr>,
}

/// UPDATE statement
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Expr)>,
    pub where_clause: Option<Expr>,
}

/// DELETE statement
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub where_clause: Option<Expr>,
}

/// CREATE TABLE statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub name: String,
    /// Rows go through the shared row cache
    pub cached: bool,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
}

/// Column definition in CREATE TABLE
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
}

/// Table-level constraints
#[derive(Debug, Clone, PartialEq)]
pub enum TableConstraint {
    PrimaryKey(Vec<String>),
    Unique(Vec<String>),
}

/// CREATE INDEX statement
#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStatement {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

/// Literal values in SQL
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

/// Column reference, optionally qualified
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub name: String,
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Or,
    And,
    Eq,
    Neq,
    Lt,
    Gt,
    Lte,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

impl BinaryOperator {
    /// Operator precedence for the expression parser; higher binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOperator::Or => 1,
            BinaryOperator::And => 2,
            BinaryOperator::Eq
            | BinaryOperator::Neq
            | BinaryOperator::Lt
            | BinaryOperator::Gt
            | BinaryOperator::Lte
            | BinaryOperator::Gte => 3,
            BinaryOperator::Add | BinaryOperator::Sub | BinaryOperator::Concat => 4,
            BinaryOperator::Mul | BinaryOperator::Div => 5,
        }
    }

    /// True for operators yielding a boolean result.
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            BinaryOperator::Or
                | BinaryOperator::And
                | BinaryOperator::Eq
                | BinaryOperator::Neq
                | BinaryOperator::Lt
                | BinaryOperator::Gt
                | BinaryOperator::Lte
                | BinaryOperator::Gte
        )
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Minus,
}

/// An expression in SQL
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Column(ColumnRef),
    /// Positional `?` parameter, numbered left to right from zero
    Parameter(usize),
    Unary {
        op: UnaryOperator,
        expr: Box<Expr>,
    },
    Binary {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Aggregate {
        func: AggregateFunc,
        distinct: bool,
        /// None is COUNT(*)
        arg: Option<Box<Expr>>,
    },
    /// Scalar function call (UPPER, LOWER, LENGTH, ABS)
    Function {
        name: String,
        args: Vec<Expr>,
    },
    CurrentDate,
    CurrentTime,
    CurrentTimestamp,
}

impl Expr {
    /// Whether this expression contains an aggregate anywhere.
    pub fn is_aggregated(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Unary { expr, .. } => expr.is_aggregated(),
            Expr::Binary { left, right, .. } => left.is_aggregated() || right.is_aggregated(),
            Expr::IsNull { expr, .. } => expr.is_aggregated(),
            Expr::Like { expr, pattern, .. } => expr.is_aggregated() || pattern.is_aggregated(),
            Expr::Between {
                expr, low, high, ..
            } => expr.is_aggregated() || low.is_aggregated() || high.is_aggregated(),
            Expr::InList { expr, list, .. } => {
                expr.is_aggregated() || list.iter().any(|e| e.is_aggregated())
            }
            Expr::Function { args, .. } => args.iter().any(|e| e.is_aggregated()),
            _ => false,
        }
    }

    /// Whether this expression yields a boolean, making it usable as a
    /// WHERE or HAVING condition.
    pub fn is_conditional(&self) -> bool {
        match self {
            Expr::Binary { op, .. } => op.is_conditional(),
            Expr::Unary {
                op: UnaryOperator::Not,
                ..
            } => true,
            Expr::IsNull { .. } | Expr::Like { .. } | Expr::Between { .. } | Expr::InList { .. } => {
                true
            }
            Expr::Literal(Literal::Boolean(_)) => true,
            _ => false,
        }
    }

    /// Collect every column reference in the expression.
    pub fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Unary { expr, .. } => expr.collect_columns(out),
            Expr::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::IsNull { expr, .. } => expr.collect_columns(out),
            Expr::Like { expr, pattern, .. } => {
                expr.collect_columns(out);
                pattern.collect_columns(out);
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.collect_columns(out);
                low.collect_columns(out);
                high.collect_columns(out);
            }
            Expr::InList { expr, list, .. } => {
                expr.collect_columns(out);
                for e in list {
                    e.collect_columns(out);
                }
            }
            Expr::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.collect_columns(out);
                }
            }
            Expr::Function { args, .. } => {
                for e in args {
                    e.collect_columns(out);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_precedence() {
        assert!(BinaryOperator::Mul.precedence() > BinaryOperator::Add.precedence());
        assert!(BinaryOperator::Add.precedence() > BinaryOperator::Eq.precedence());
        assert!(BinaryOperator::And.precedence() > BinaryOperator::Or.precedence());
    }

    #[test]
    fn test_is_aggregated() {
        let agg = Expr::Binary {
            left: Box::new(Expr::Aggregate {
                func: AggregateFunc::Count,
                distinct: false,
                arg: None,
            }),
            op: BinaryOperator::Add,
            right: Box::new(Expr::Literal(Literal::Integer(1))),
        };
        assert!(agg.is_aggregated());
        assert!(!Expr::Literal(Literal::Integer(1)).is_aggregated());
    }

    #[test]
    fn test_is_conditional() {
        let cond = Expr::Binary {
            left: Box::new(Expr::Column(ColumnRef {
                table: None,
                name: "a".to_string(),
            })),
            op: BinaryOperator::Gt,
            right: Box::new(Expr::Literal(Literal::Integer(1))),
        };
        assert!(cond.is_conditional());

        let arith = Expr::Binary {
            left: Box::new(Expr::Literal(Literal::Integer(1))),
            op: BinaryOperator::Add,
            right: Box::new(Expr::Literal(Literal::Integer(2))),
        };
        assert!(!arith.is_conditional());
    }
}

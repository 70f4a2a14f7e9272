//! SQL Parser
//!
//! This module parses SQL tokens into an AST. Set-operation chains keep
//! their parenthesis nesting depth on each branch; the query compiler
//! validates bracket balance later.

use super::ast::*;
use super::lexer::{Lexer, Token};
use crate::catalog::DataType;
use crate::error::{Error, Result};

/// SQL Parser
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
    /// Number of `?` parameters seen so far, in textual order
    param_count: usize,
}

impl Parser {
    /// Create a new parser from a SQL string
    pub fn new(sql: &str) -> Result<Self> {
        let mut lexer = Lexer::new(sql);
        let tokens = lexer.tokenize()?;
        Ok(Self {
            tokens,
            position: 0,
            param_count: 0,
        })
    }

    /// Parse a single SQL statement
    pub fn parse(&mut self) -> Result<Statement> {
        let stmt = self.parse_statement()?;
        if self.check(&Token::Semicolon) {
            self.advance();
        }
        if !self.is_at_end() {
            return Err(Error::UnexpectedToken {
                expected: "end of statement".to_string(),
                found: format!("{}", self.current()),
            });
        }
        Ok(stmt)
    }

    /// Number of positional parameters in the parsed statement
    pub fn param_count(&self) -> usize {
        self.param_count
    }

    fn parse_statement(&mut self) -> Result<Statement> {
        match self.current() {
            Token::Select | Token::LParen => self.parse_query().map(Statement::Select),
            Token::Insert => self.parse_insert().map(Statement::Insert),
            Token::Update => self.parse_update().map(Statement::Update),
            Token::Delete => self.parse_delete().map(Statement::Delete),
            Token::Create => self.parse_create(),
            Token::Drop => self.parse_drop(),
            Token::Commit => {
                self.advance();
                self.consume(&Token::Work);
                Ok(Statement::Commit)
            }
            Token::Rollback => self.parse_rollback(),
            Token::Savepoint => {
                self.advance();
                let name = self.expect_identifier()?;
                Ok(Statement::Savepoint(name))
            }
            Token::Release => {
                self.advance();
                self.expect(&Token::Savepoint)?;
                let name = self.expect_identifier()?;
                Ok(Statement::ReleaseSavepoint(name))
            }
            Token::Set => self.parse_set(),
            Token::Shutdown => {
                self.advance();
                let compact = self.consume(&Token::Compact);
                Ok(Statement::Shutdown { compact })
            }
            _ => Err(Error::UnexpectedToken {
                expected: "SELECT, INSERT, UPDATE, DELETE, CREATE, DROP, COMMIT, ROLLBACK, \
                           SAVEPOINT, RELEASE, SET, or SHUTDOWN"
                    .to_string(),
                found: format!("{}", self.current()),
            }),
        }
    }

    fn parse_rollback(&mut self) -> Result<Statement> {
        self.expect(&Token::Rollback)?;
        if self.consume(&Token::To) {
            self.expect(&Token::Savepoint)?;
            let name = self.expect_identifier()?;
            return Ok(Statement::RollbackToSavepoint(name));
        }
        self.consume(&Token::Work);
        Ok(Statement::Rollback)
    }

    fn parse_set(&mut self) -> Result<Statement> {
        self.expect(&Token::Set)?;
        match self.current().clone() {
            Token::Autocommit => {
                self.advance();
                let flag = match self.current() {
                    Token::True => true,
                    Token::False => false,
                    other => {
                        return Err(Error::UnexpectedToken {
                            expected: "TRUE or FALSE".to_string(),
                            found: format!("{}", other),
                        })
                    }
                };
                self.advance();
                Ok(Statement::SetAutocommit(flag))
            }
            Token::Maxrows => {
                self.advance();
                let n = self.expect_integer()?;
                Ok(Statement::SetMaxRows(n as usize))
            }
            other => Err(Error::UnexpectedToken {
                expected: "AUTOCOMMIT or MAXROWS".to_string(),
                found: format!("{}", other),
            }),
        }
    }

    // ========== SELECT and set operations ==========

    /// Parse a query: one or more SELECT branches linked by set operators.
    /// Each branch records the parenthesis nesting depth left open after
    /// it; a trailing ORDER BY / LIMIT applies to the whole chain and is
    /// attached to the head branch.
    fn parse_query(&mut self) -> Result<Box<SelectStatement>> {
        let mut depth = 0usize;
        let mut branches: Vec<SelectStatement> = Vec::new();

        loop {
            while self.check(&Token::LParen) {
                self.advance();
                depth += 1;
            }
            let mut select = self.parse_select_core()?;
            while depth > 0 && self.check(&Token::RParen) {
                self.advance();
                depth -= 1;
            }
            select.union_depth = depth;

            let op = match self.current() {
                Token::Union => {
                    self.advance();
                    if self.consume(&Token::All) {
                        Some(SetOperator::UnionAll)
                    } else {
                        Some(SetOperator::Union)
                    }
                }
                Token::Intersect => {
                    self.advance();
                    Some(SetOperator::Intersect)
                }
                Token::Except => {
                    self.advance();
                    Some(SetOperator::Except)
                }
                _ => None,
            };

            match op {
                Some(op) => {
                    select.union_type = Some(op);
                    branches.push(select);
                }
                None => {
                    branches.push(select);
                    break;
                }
            }
        }

        let order_by = if self.consume(&Token::Order) {
            self.expect(&Token::By)?;
            self.parse_order_by_list()?
        } else {
            Vec::new()
        };
        let limit = self.parse_limit_clause()?;

        // Link the chain right-nested and hang the trailing clauses on
        // the head.
        let mut iter = branches.into_iter().rev();
        let mut tail = match iter.next() {
            Some(s) => s,
            None => return Err(Error::UnexpectedEof("SELECT".to_string())),
        };
        for mut branch in iter {
            branch.union = Some(Box::new(tail));
            tail = branch;
        }
        tail.order_by = order_by;
        tail.limit = limit;
        Ok(Box::new(tail))
    }

    /// One SELECT branch without trailing ORDER BY / LIMIT.
    fn parse_select_core(&mut self) -> Result<SelectStatement> {
        self.expect(&Token::Select)?;

        let mut stmt = SelectStatement::new();

        if self.consume(&Token::Distinct) {
            stmt.distinct = true;
        } else {
            self.consume(&Token::All);
        }

        stmt.columns = self.parse_select_list()?;

        if self.consume(&Token::From) {
            stmt.from = Some(self.parse_table_ref()?);
            loop {
                if self.consume(&Token::Comma) {
                    let table = self.parse_table_ref()?;
                    stmt.joins.push(Join {
                        table,
                        join_type: JoinType::Cross,
                        on: None,
                    });
                } else if self.is_join_keyword() {
                    stmt.joins.push(self.parse_join()?);
                } else {
                    break;
                }
            }
        }

        if self.consume(&Token::Where) {
            stmt.where_clause = Some(self.parse_expr()?);
        }

        if self.consume(&Token::Group) {
            self.expect(&Token::By)?;
            stmt.group_by = self.parse_expr_list()?;
        }

        if self.consume(&Token::Having) {
            stmt.having = Some(self.parse_expr()?);
        }

        Ok(stmt)
    }

    fn parse_select_list(&mut self) -> Result<Vec<SelectItem>> {
        let mut items = Vec::new();
        loop {
            items.push(self.parse_select_item()?);
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    fn parse_select_item(&mut self) -> Result<SelectItem> {
        if self.consume(&Token::Asterisk) {
            return Ok(SelectItem::Wildcard);
        }

        // table.*
        if let Token::Identifier(name) = self.current().clone() {
            if self.peek() == Some(&Token::Dot) && self.peek_at(2) == Some(&Token::Asterisk) {
                self.advance();
                self.advance();
                self.advance();
                return Ok(SelectItem::QualifiedWildcard(name));
            }
        }

        let expr = self.parse_expr()?;

        let alias = if self.consume(&Token::As) {
            Some(self.expect_identifier()?)
        } else if let Token::Identifier(name) = self.current().clone() {
            self.advance();
            Some(name)
        } else {
            None
        };

        Ok(SelectItem::Expr { expr, alias })
    }

    fn parse_table_ref(&mut self) -> Result<TableRef> {
        let name = self.expect_identifier()?;
        let alias = if self.consume(&Token::As) {
            Some(self.expect_identifier()?)
        } else if let Token::Identifier(alias) = self.current().clone() {
            self.advance();
            Some(alias)
        } else {
            None
        };
        Ok(TableRef { name, alias })
    }

    fn is_join_keyword(&self) -> bool {
        matches!(
            self.current(),
            Token::Join | Token::Inner | Token::Left | Token::Cross
        )
    }

    fn parse_join(&mut self) -> Result<Join> {
        let join_type = match self.current() {
            Token::Left => {
                self.advance();
                self.consume(&Token::Outer);
                JoinType::LeftOuter
            }
            Token::Inner => {
                self.advance();
                JoinType::Inner
            }
            Token::Cross => {
                self.advance();
                JoinType::Cross
            }
            _ => JoinType::Inner,
        };
        self.expect(&Token::Join)?;
        let table = self.parse_table_ref()?;

        let on = if join_type != JoinType::Cross {
            self.expect(&Token::On)?;
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(Join {
            table,
            join_type,
            on,
        })
    }

    fn parse_order_by_list(&mut self) -> Result<Vec<OrderByItem>> {
        let mut items = Vec::new();
        loop {
            let expr = self.parse_expr()?;
            let descending = if self.consume(&Token::Desc) {
                true
            } else {
                self.consume(&Token::Asc);
                false
            };
            items.push(OrderByItem { expr, descending });
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        Ok(items)
    }

    /// LIMIT count | LIMIT start, count | LIMIT count OFFSET start
    fn parse_limit_clause(&mut self) -> Result<Option<LimitClause>> {
        if !self.consume(&Token::Limit) {
            return Ok(None);
        }
        let first = self.expect_integer()? as usize;
        if self.consume(&Token::Comma) {
            let count = self.expect_integer()? as usize;
            Ok(Some(LimitClause {
                start: first,
                count,
            }))
        } else if self.consume(&Token::Offset) {
            let start = self.expect_integer()? as usize;
            Ok(Some(LimitClause {
                start,
                count: first,
            }))
        } else {
            Ok(Some(LimitClause {
                start: 0,
                count: first,
            }))
        }
    }

    // ========== INSERT / UPDATE / DELETE ==========

    fn parse_insert(&mut self) -> Result<InsertStatement> {
        self.expect(&Token::Insert)?;
        self.expect(&Token::Into)?;
        let table = self.expect_identifier()?;

        let mut columns = Vec::new();
        if self.check(&Token::LParen) {
            self.advance();
            loop {
                columns.push(self.expect_identifier()?);
                if !self.consume(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }

        self.expect(&Token::Values)?;
        self.expect(&Token::LParen)?;
        let values = self.parse_expr_list()?;
        self.expect(&Token::RParen)?;

        Ok(InsertStatement {
            table,
            columns,
            values,
        })
    }

    fn parse_update(&mut self) -> Result<UpdateStatement> {
        self.expect(&Token::Update)?;
        let table = self.expect_identifier()?;
        self.expect(&Token::Set)?;

        let mut assignments = Vec::new();
        loop {
            let column = self.expect_identifier()?;
            self.expect(&Token::Eq)?;
            let expr = self.parse_expr()?;
            assignments.push((column, expr));
            if !self.consume(&Token::Comma) {
                break;
            }
        }

        let where_clause = if self.consume(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(UpdateStatement {
            table,
            assignments,
            where_clause,
        })
    }

    fn parse_delete(&mut self) -> Result<DeleteStatement> {
        self.expect(&Token::Delete)?;
        self.expect(&Token::From)?;
        let table = self.expect_identifier()?;
        let where_clause = if self.consume(&Token::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(DeleteStatement {
            table,
            where_clause,
        })
    }

    // ========== CREATE / DROP ==========

    fn parse_create(&mut self) -> Result<Statement> {
        self.expect(&Token::Create)?;
        match self.current() {
            Token::Unique | Token::Index => {
                let unique = self.consume(&Token::Unique);
                self.expect(&Token::Index)?;
                let name = self.expect_identifier()?;
                self.expect(&Token::On)?;
                let table = self.expect_identifier()?;
                self.expect(&Token::LParen)?;
                let mut columns = Vec::new();
                loop {
                    columns.push(self.expect_identifier()?);
                    if !self.consume(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RParen)?;
                Ok(Statement::CreateIndex(CreateIndexStatement {
                    name,
                    table,
                    columns,
                    unique,
                }))
            }
            _ => self.parse_create_table(),
        }
    }

    fn parse_create_table(&mut self) -> Result<Statement> {
        let cached = if self.consume(&Token::Cached) {
            true
        } else {
            self.consume(&Token::Memory);
            false
        };
        self.expect(&Token::Table)?;
        let name = self.expect_identifier()?;
        self.expect(&Token::LParen)?;

        let mut columns = Vec::new();
        let mut constraints = Vec::new();
        loop {
            match self.current() {
                Token::Primary => {
                    self.advance();
                    self.expect(&Token::Key)?;
                    constraints.push(TableConstraint::PrimaryKey(self.parse_column_name_list()?));
                }
                Token::Unique => {
                    self.advance();
                    constraints.push(TableConstraint::Unique(self.parse_column_name_list()?));
                }
                _ => columns.push(self.parse_column_def()?),
            }
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;

        Ok(Statement::CreateTable(CreateTableStatement {
            name,
            cached,
            columns,
            constraints,
        }))
    }

    fn parse_column_name_list(&mut self) -> Result<Vec<String>> {
        self.expect(&Token::LParen)?;
        let mut names = Vec::new();
        loop {
            names.push(self.expect_identifier()?);
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(names)
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.expect_identifier()?;
        let data_type = self.parse_data_type()?;

        let mut nullable = true;
        let mut primary_key = false;
        loop {
            if self.consume(&Token::Not) {
                self.expect(&Token::Null)?;
                nullable = false;
            } else if self.consume(&Token::Primary) {
                self.expect(&Token::Key)?;
                primary_key = true;
                nullable = false;
            } else {
                break;
            }
        }

        Ok(ColumnDef {
            name,
            data_type,
            nullable,
            primary_key,
        })
    }

    fn parse_data_type(&mut self) -> Result<DataType> {
        let data_type = match self.current() {
            Token::Int | Token::Integer => {
                self.advance();
                DataType::Integer
            }
            Token::BigInt => {
                self.advance();
                DataType::BigInt
            }
            Token::Float | Token::Double => {
                self.advance();
                DataType::Double
            }
            Token::Varchar | Token::Char => {
                self.advance();
                let limit = if self.consume(&Token::LParen) {
                    let n = self.expect_integer()? as usize;
                    self.expect(&Token::RParen)?;
                    Some(n)
                } else {
                    None
                };
                DataType::Varchar(limit)
            }
            Token::Boolean => {
                self.advance();
                DataType::Boolean
            }
            Token::Date => {
                self.advance();
                DataType::Date
            }
            Token::Time => {
                self.advance();
                DataType::Time
            }
            Token::Timestamp => {
                self.advance();
                DataType::Timestamp
            }
            other => {
                return Err(Error::UnexpectedToken {
                    expected: "a data type".to_string(),
                    found: format!("{}", other),
                })
            }
        };
        Ok(data_type)
    }

    fn parse_drop(&mut self) -> Result<Statement> {
        self.expect(&Token::Drop)?;
        match self.current() {
            Token::Table => {
                self.advance();
                let name = self.expect_identifier()?;
                Ok(Statement::DropTable { name })
            }
            Token::Index => {
                self.advance();
                let name = self.expect_identifier()?;
                self.expect(&Token::On)?;
                let table = self.expect_identifier()?;
                Ok(Statement::DropIndex { name, table })
            }
            other => Err(Error::UnexpectedToken {
                expected: "TABLE or INDEX".to_string(),
                found: format!("{}", other),
            }),
        }
    }

    // ========== Expressions ==========

    pub fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_binary_expr(0)
    }

    fn parse_expr_list(&mut self) -> Result<Vec<Expr>> {
        let mut exprs = Vec::new();
        loop {
            exprs.push(self.parse_expr()?);
            if !self.consume(&Token::Comma) {
                break;
            }
        }
        Ok(exprs)
    }

    fn parse_binary_expr(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_unary_expr()?;

        loop {
            if let Some(op) = self.current_binary_op() {
                let prec = op.precedence();
                if prec < min_prec {
                    break;
                }
                self.advance();
                let right = self.parse_binary_expr(prec + 1)?;
                left = Expr::Binary {
                    left: Box::new(left),
                    op,
                    right: Box::new(right),
                };
                continue;
            }

            // Postfix predicates bind at comparison level.
            if min_prec <= 3 {
                if let Some(expr) = self.parse_predicate(left.clone())? {
                    left = expr;
                    continue;
                }
            }
            break;
        }

        Ok(left)
    }

    /// IS [NOT] NULL, [NOT] LIKE, [NOT] BETWEEN, [NOT] IN. Returns None
    /// when the current token starts none of them.
    fn parse_predicate(&mut self, left: Expr) -> Result<Option<Expr>> {
        let negated = match (self.current(), self.peek()) {
            (Token::Not, Some(Token::Like | Token::Between | Token::In)) => {
                self.advance();
                true
            }
            _ => false,
        };

        match self.current() {
            Token::Is => {
                self.advance();
                let negated = self.consume(&Token::Not);
                self.expect(&Token::Null)?;
                Ok(Some(Expr::IsNull {
                    expr: Box::new(left),
                    negated,
                }))
            }
            Token::Like => {
                self.advance();
                let pattern = self.parse_binary_expr(4)?;
                Ok(Some(Expr::Like {
                    expr: Box::new(left),
                    pattern: Box::new(pattern),
                    negated,
                }))
            }
            Token::Between => {
                self.advance();
                let low = self.parse_binary_expr(4)?;
                self.expect(&Token::And)?;
                let high = self.parse_binary_expr(4)?;
                Ok(Some(Expr::Between {
                    expr: Box::new(left),
                    low: Box::new(low),
                    high: Box::new(high),
                    negated,
                }))
            }
            Token::In => {
                self.advance();
                self.expect(&Token::LParen)?;
                let list = self.parse_expr_list()?;
                self.expect(&Token::RParen)?;
                Ok(Some(Expr::InList {
                    expr: Box::new(left),
                    list,
                    negated,
                }))
            }
            _ if negated => Err(Error::UnexpectedToken {
                expected: "LIKE, BETWEEN, or IN after NOT".to_string(),
                found: format!("{}", self.current()),
            }),
            _ => Ok(None),
        }
    }

    fn current_binary_op(&self) -> Option<BinaryOperator> {
        match self.current() {
            Token::Or => Some(BinaryOperator::Or),
            Token::And => Some(BinaryOperator::And),
            Token::Eq => Some(BinaryOperator::Eq),
            Token::Neq => Some(BinaryOperator::Neq),
            Token::Lt => Some(BinaryOperator::Lt),
            Token::Gt => Some(BinaryOperator::Gt),
            Token::Lte => Some(BinaryOperator::Lte),
            Token::Gte => Some(BinaryOperator::Gte),
            Token::Plus => Some(BinaryOperator::Add),
            Token::Minus => Some(BinaryOperator::Sub),
            Token::Asterisk => Some(BinaryOperator::Mul),
            Token::Slash => Some(BinaryOperator::Div),
            Token::Concat => Some(BinaryOperator::Concat),
            _ => None,
        }
    }

    fn parse_unary_expr(&mut self) -> Result<Expr> {
        match self.current() {
            Token::Not => {
                self.advance();
                let expr = self.parse_binary_expr(3)?;
                Ok(Expr::Unary {
                    op: UnaryOperator::Not,
                    expr: Box::new(expr),
                })
            }
            Token::Minus => {
                self.advance();
                let expr = self.parse_unary_expr()?;
                Ok(Expr::Unary {
                    op: UnaryOperator::Minus,
                    expr: Box::new(expr),
                })
            }
            Token::Plus => {
                self.advance();
                self.parse_unary_expr()
            }
            _ => self.parse_primary_expr(),
        }
    }

    fn parse_primary_expr(&mut self) -> Result<Expr> {
        match self.current().clone() {
            Token::IntegerLiteral(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Integer(n)))
            }
            Token::FloatLiteral(n) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(n)))
            }
            Token::StringLiteral(s) => {
                self.advance();
                Ok(Expr::Literal(Literal::String(s)))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Boolean(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Boolean(false)))
            }
            Token::Null => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }
            Token::Question => {
                self.advance();
                let index = self.param_count;
                self.param_count += 1;
                Ok(Expr::Parameter(index))
            }
            Token::CurrentDate => {
                self.advance();
                Ok(Expr::CurrentDate)
            }
            Token::CurrentTime => {
                self.advance();
                Ok(Expr::CurrentTime)
            }
            Token::CurrentTimestamp => {
                self.advance();
                Ok(Expr::CurrentTimestamp)
            }
            Token::Count | Token::Sum | Token::Avg | Token::Min | Token::Max => {
                self.parse_aggregate()
            }
            Token::LParen => {
                self.advance();
                let expr = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(expr)
            }
            Token::Identifier(name) => {
                self.advance();
                // function call
                if self.check(&Token::LParen) {
                    self.advance();
                    let args = if self.check(&Token::RParen) {
                        Vec::new()
                    } else {
                        self.parse_expr_list()?
                    };
                    self.expect(&Token::RParen)?;
                    return Ok(Expr::Function {
                        name: name.to_uppercase(),
                        args,
                    });
                }
                // qualified column
                if self.consume(&Token::Dot) {
                    let column = self.expect_identifier()?;
                    return Ok(Expr::Column(ColumnRef {
                        table: Some(name),
                        name: column,
                    }));
                }
                Ok(Expr::Column(ColumnRef { table: None, name }))
            }
            other => Err(Error::UnexpectedToken {
                expected: "an expression".to_string(),
                found: format!("{}", other),
            }),
        }
    }

    fn parse_aggregate(&mut self) -> Result<Expr> {
        let func = match self.current() {
            Token::Count => AggregateFunc::Count,
            Token::Sum => AggregateFunc::Sum,
            Token::Avg => AggregateFunc::Avg,
            Token::Min => AggregateFunc::Min,
            Token::Max => AggregateFunc::Max,
            other => {
                return Err(Error::UnexpectedToken {
                    expected: "an aggregate function".to_string(),
                    found: format!("{}", other),
                })
            }
        };
        self.advance();
        self.expect(&Token::LParen)?;

        if func == AggregateFunc::Count && self.consume(&Token::Asterisk) {
            self.expect(&Token::RParen)?;
            return Ok(Expr::Aggregate {
                func,
                distinct: false,
                arg: None,
            });
        }

        let distinct = self.consume(&Token::Distinct);
        let arg = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        Ok(Expr::Aggregate {
            func,
            distinct,
            arg: Some(Box::new(arg)),
        })
    }

    // ========== Token helpers ==========

    fn current(&self) -> &Token {
        self.tokens.get(self.position).unwrap_or(&Token::Eof)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position + 1)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.position + offset)
    }

    fn advance(&mut self) {
        if self.position < self.tokens.len() {
            self.position += 1;
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn check(&self, token: &Token) -> bool {
        self.current() == token
    }

    /// Consume the token if it matches; report whether it did.
    fn consume(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token) -> Result<()> {
        if self.check(token) {
            self.advance();
            Ok(())
        } else if self.is_at_end() {
            Err(Error::UnexpectedEof(format!("{}", token)))
        } else {
            Err(Error::UnexpectedToken {
                expected: format!("{}", token),
                found: format!("{}", self.current()),
            })
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.current().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            Token::Eof => Err(Error::UnexpectedEof("an identifier".to_string())),
            other => Err(Error::UnexpectedToken {
                expected: "an identifier".to_string(),
                found: format!("{}", other),
            }),
        }
    }

    fn expect_integer(&mut self) -> Result<i64> {
        match *self.current() {
            Token::IntegerLiteral(n) => {
                self.advance();
                Ok(n)
            }
            Token::Eof => Err(Error::UnexpectedEof("an integer".to_string())),
            ref other => Err(Error::UnexpectedToken {
                expected: "an integer".to_string(),
                found: format!("{}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(sql: &str) -> Statement {
        Parser::new(sql).unwrap().parse().unwrap()
    }

    #[test]
    fn test_simple_select() {
        let stmt = parse("SELECT id, name FROM users WHERE id = 1");
        let select = match stmt {
            Statement::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        };
        assert_eq!(select.columns.len(), 2);
        assert_eq!(select.from.as_ref().unwrap().name, "users");
        assert!(select.where_clause.is_some());
    }

    #[test]
    fn test_select_with_joins() {
        let stmt = parse(
            "SELECT u.name, o.total FROM users u LEFT OUTER JOIN orders o ON u.id = o.user_id",
        );
        let select = match stmt {
            Statement::Select(s) => s,
            _ => unreachable!(),
        };
        assert_eq!(select.joins.len(), 1);
        assert_eq!(select.joins[0].join_type, JoinType::LeftOuter);
        assert!(select.joins[0].on.is_some());
    }

    #[test]
    fn test_union_chain_depths() {
        let stmt = parse("SELECT a FROM t UNION (SELECT b FROM u INTERSECT SELECT c FROM v)");
        let head = match stmt {
            Statement::Select(s) => s,
            _ => unreachable!(),
        };
        assert_eq!(head.union_type, Some(SetOperator::Union));
        assert_eq!(head.union_depth, 0);
        let second = head.union.as_ref().unwrap();
        assert_eq!(second.union_type, Some(SetOperator::Intersect));
        assert_eq!(second.union_depth, 1);
        let third = second.union.as_ref().unwrap();
        assert_eq!(third.union_type, None);
        assert_eq!(third.union_depth, 0);
    }

    #[test]
    fn test_unbalanced_bracket_recorded() {
        // The missing close bracket is detected at query preparation,
        // not here; the parser records the leftover depth.
        let stmt = parse("(SELECT a FROM t UNION SELECT b FROM u");
        let head = match stmt {
            Statement::Select(s) => s,
            _ => unreachable!(),
        };
        let tail = head.union.as_ref().unwrap();
        assert_eq!(tail.union_depth, 1);
    }

    #[test]
    fn test_group_having_order_limit() {
        let stmt = parse(
            "SELECT dept, COUNT(*) FROM emp GROUP BY dept HAVING COUNT(*) > 2 \
             ORDER BY dept DESC LIMIT 5 OFFSET 10",
        );
        let select = match stmt {
            Statement::Select(s) => s,
            _ => unreachable!(),
        };
        assert_eq!(select.group_by.len(), 1);
        assert!(select.having.is_some());
        assert!(select.order_by[0].descending);
        assert_eq!(select.limit, Some(LimitClause { start: 10, count: 5 }));
    }

    #[test]
    fn test_limit_start_count() {
        let stmt = parse("SELECT a FROM t LIMIT 10, 20");
        let select = match stmt {
            Statement::Select(s) => s,
            _ => unreachable!(),
        };
        assert_eq!(
            select.limit,
            Some(LimitClause {
                start: 10,
                count: 20
            })
        );
    }

    #[test]
    fn test_insert_with_parameters() {
        let mut parser = Parser::new("INSERT INTO users (id, name) VALUES (?, ?)").unwrap();
        let stmt = parser.parse().unwrap();
        assert_eq!(parser.param_count(), 2);
        let insert = match stmt {
            Statement::Insert(i) => i,
            _ => unreachable!(),
        };
        assert_eq!(insert.values[0], Expr::Parameter(0));
        assert_eq!(insert.values[1], Expr::Parameter(1));
    }

    #[test]
    fn test_create_cached_table() {
        let stmt = parse(
            "CREATE CACHED TABLE t (id INTEGER PRIMARY KEY, name VARCHAR(50) NOT NULL, \
             UNIQUE (name))",
        );
        let create = match stmt {
            Statement::CreateTable(c) => c,
            _ => unreachable!(),
        };
        assert!(create.cached);
        assert_eq!(create.columns.len(), 2);
        assert!(create.columns[0].primary_key);
        assert!(!create.columns[1].nullable);
        assert_eq!(
            create.constraints,
            vec![TableConstraint::Unique(vec!["name".to_string()])]
        );
    }

    #[test]
    fn test_savepoint_statements() {
        assert_eq!(parse("SAVEPOINT sp1"), Statement::Savepoint("sp1".to_string()));
        assert_eq!(
            parse("RELEASE SAVEPOINT sp1"),
            Statement::ReleaseSavepoint("sp1".to_string())
        );
        assert_eq!(
            parse("ROLLBACK TO SAVEPOINT sp1"),
            Statement::RollbackToSavepoint("sp1".to_string())
        );
        assert_eq!(parse("ROLLBACK WORK"), Statement::Rollback);
    }

    #[test]
    fn test_set_statements() {
        assert_eq!(parse("SET AUTOCOMMIT FALSE"), Statement::SetAutocommit(false));
        assert_eq!(parse("SET MAXROWS 100"), Statement::SetMaxRows(100));
    }

    #[test]
    fn test_shutdown() {
        assert_eq!(parse("SHUTDOWN"), Statement::Shutdown { compact: false });
        assert_eq!(
            parse("SHUTDOWN COMPACT"),
            Statement::Shutdown { compact: true }
        );
    }

    #[test]
    fn test_predicates() {
        let stmt = parse(
            "SELECT a FROM t WHERE a IS NOT NULL AND b LIKE 'x%' AND c BETWEEN 1 AND 10 \
             AND d IN (1, 2, 3)",
        );
        assert!(matches!(stmt, Statement::Select(_)));
    }

    #[test]
    fn test_expression_precedence() {
        let stmt = parse("SELECT a FROM t WHERE a + 1 * 2 = 3");
        let select = match stmt {
            Statement::Select(s) => s,
            _ => unreachable!(),
        };
        // a + (1 * 2), then compared with 3
        match select.where_clause.unwrap() {
            Expr::Binary { op, left, .. } => {
                assert_eq!(op, BinaryOperator::Eq);
                match *left {
                    Expr::Binary { op, .. } => assert_eq!(op, BinaryOperator::Add),
                    other => panic!("expected add, got {:?}", other),
                }
            }
            other => panic!("expected comparison, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_token() {
        let result = Parser::new("SELEKT * FROM t").unwrap().parse();
        assert!(matches!(result, Err(Error::UnexpectedToken { .. })));
    }

    #[test]
    fn test_unexpected_eof() {
        let result = Parser::new("INSERT INTO t").unwrap().parse();
        assert!(matches!(result, Err(Error::UnexpectedEof(_))));
    }
}

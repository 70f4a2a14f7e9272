//! SELECT compilation and evaluation
//!
//! A `Select` is a query compiled against the catalog: ranges, resolved
//! expressions, grouping, ordering, and the set-operation chain. Rows are
//! produced by a backtracking nested-loop join; left outer ranges
//! null-extend when no row matches their join condition.

use std::collections::HashSet;

use indexmap::IndexMap;
use tracing::debug;

use super::expr::{
    eval, exprs_equal, holds, resolve, AggregateExpr, CompiledExpr, DateTimeValues, EvalContext,
    EvalError, RangeVar,
};
use crate::catalog::{DataType, Database};
use crate::error::{Error, Result};
use crate::sql::ast::{
    AggregateFunc, Expr, JoinType, LimitClause, Literal, SelectItem, SelectStatement, SetOperator,
};
use crate::storage::{Table, Value};

/// A materialized query result. Rows may carry hidden trailing sort
/// columns until [`ResultSet::truncate_columns`] cuts them off.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
    pub column_names: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub visible_columns: usize,
}

impl ResultSet {
    pub fn new(column_names: Vec<String>, visible_columns: usize) -> Self {
        Self {
            column_names,
            rows: Vec::new(),
            visible_columns,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Append all rows of `other`.
    pub fn append(&mut self, other: ResultSet) {
        self.rows.extend(other.rows);
    }

    /// Keep the first occurrence of each row.
    pub fn remove_duplicates(&mut self) {
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row.clone()));
    }

    /// Keep only rows that also appear in `other`, once each.
    pub fn remove_different(&mut self, other: &ResultSet) {
        let theirs: HashSet<&Vec<Value>> = other.rows.iter().collect();
        self.remove_duplicates();
        self.rows.retain(|row| theirs.contains(row));
    }

    /// Keep only rows that do not appear in `other`, once each.
    pub fn remove_second(&mut self, other: &ResultSet) {
        let theirs: HashSet<&Vec<Value>> = other.rows.iter().collect();
        self.remove_duplicates();
        self.rows.retain(|row| !theirs.contains(row));
    }

    /// Stable sort by the given column specs. Incomparable values keep
    /// their relative order.
    pub fn sort(&mut self, specs: &[SortSpec]) {
        self.rows.sort_by(|a, b| {
            for spec in specs {
                let ord = a[spec.column]
                    .compare(&b[spec.column])
                    .unwrap_or(std::cmp::Ordering::Equal);
                let ord = if spec.descending { ord.reverse() } else { ord };
                if !ord.is_eq() {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    /// Skip `start` rows and keep at most `count` (0 keeps all).
    pub fn trim(&mut self, start: usize, count: usize) {
        if start > 0 {
            self.rows.drain(..start.min(self.rows.len()));
        }
        if count > 0 {
            self.rows.truncate(count);
        }
    }

    /// Cut hidden sort columns off every row.
    pub fn truncate_columns(&mut self) {
        if self.column_names.len() > self.visible_columns {
            self.column_names.truncate(self.visible_columns);
            for row in &mut self.rows {
                row.truncate(self.visible_columns);
            }
        }
    }
}

/// One resolved sort key.
#[derive(Debug, Clone, Copy)]
pub struct SortSpec {
    pub column: usize,
    pub descending: bool,
}

/// Name and declared type of one result column, reported when a query
/// is prepared. Computed columns carry no declared type.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: Option<DataType>,
}

#[derive(Debug)]
struct CompiledRange {
    range: RangeVar,
    /// Join condition; absent for the first range and cross joins
    condition: Option<CompiledExpr>,
}

/// A compiled SELECT, including its set-operation chain.
#[derive(Debug)]
pub struct Select {
    distinct: bool,
    ranges: Vec<CompiledRange>,
    where_expr: Option<CompiledExpr>,
    /// Visible result columns followed by hidden sort columns
    columns: Vec<CompiledExpr>,
    column_names: Vec<String>,
    visible_columns: usize,
    group_by: Vec<CompiledExpr>,
    having: Option<CompiledExpr>,
    aggregates: Vec<AggregateExpr>,
    sort: Vec<SortSpec>,
    limit: Option<LimitClause>,
    union: Option<(SetOperator, Box<Select>)>,
    union_depth: usize,
}

impl Select {
    /// Compile a parsed SELECT chain against the catalog.
    pub fn compile(db: &Database, stmt: &SelectStatement) -> Result<Select> {
        let mut ranges = Vec::new();
        if let Some(from) = &stmt.from {
            ranges.push(CompiledRange {
                range: RangeVar::new(db, &from.name, from.alias.as_deref(), false)?,
                condition: None,
            });
        }
        for join in &stmt.joins {
            let outer = join.join_type == JoinType::LeftOuter;
            ranges.push(CompiledRange {
                range: RangeVar::new(db, &join.table.name, join.table.alias.as_deref(), outer)?,
                condition: None,
            });
        }

        let range_vars: Vec<RangeVar> = ranges.iter().map(|r| r.range.clone()).collect();

        // Join conditions resolve against every range.
        for (i, join) in stmt.joins.iter().enumerate() {
            if let Some(on) = &join.on {
                let mut none = Vec::new();
                let compiled = resolve(on, &range_vars, &mut none)?;
                if !none.is_empty() {
                    return Err(Error::OperationNotSupported(
                        "aggregate function in join condition".to_string(),
                    ));
                }
                ranges[i + 1].condition = Some(compiled);
            }
        }

        let mut aggregates = Vec::new();

        let items = expand_wildcards(&stmt.columns, &range_vars)?;
        let mut columns = Vec::new();
        let mut column_names = Vec::new();
        for (index, (expr, alias)) in items.iter().enumerate() {
            columns.push(resolve(expr, &range_vars, &mut aggregates)?);
            column_names.push(
                alias
                    .clone()
                    .unwrap_or_else(|| item_name(expr, index)),
            );
        }
        let visible_columns = columns.len();

        let where_expr = match &stmt.where_clause {
            Some(w) => {
                let mut none = Vec::new();
                let compiled = resolve(w, &range_vars, &mut none)?;
                if !none.is_empty() {
                    return Err(Error::OperationNotSupported(
                        "aggregate function in WHERE clause".to_string(),
                    ));
                }
                Some(compiled)
            }
            None => None,
        };

        let group_by = stmt
            .group_by
            .iter()
            .map(|e| {
                let mut none = Vec::new();
                let compiled = resolve(e, &range_vars, &mut none)?;
                if !none.is_empty() {
                    return Err(Error::InvalidGroupBy(
                        "aggregate function in GROUP BY".to_string(),
                    ));
                }
                Ok(compiled)
            })
            .collect::<Result<Vec<_>>>()?;

        let having = match &stmt.having {
            Some(h) => {
                if !h.is_conditional() {
                    return Err(Error::InvalidHaving("not a condition".to_string()));
                }
                Some(resolve(h, &range_vars, &mut aggregates)?)
            }
            None => None,
        };

        let grouped = !group_by.is_empty() || !aggregates.is_empty();
        if grouped {
            for (i, col) in columns.iter().enumerate() {
                if col.references_ungrouped_column(&group_by) {
                    return Err(Error::InvalidGroupBy(column_names[i].clone()));
                }
            }
            if let Some(h) = &having {
                if h.references_ungrouped_column(&group_by) {
                    return Err(Error::InvalidHaving(
                        "column not grouped or aggregated".to_string(),
                    ));
                }
            }
        } else if stmt.having.is_some() {
            return Err(Error::InvalidHaving(
                "HAVING requires grouping or aggregation".to_string(),
            ));
        }

        let union = match (&stmt.union_type, &stmt.union) {
            (Some(op), Some(next)) => Some((*op, Box::new(Select::compile(db, next)?))),
            _ => None,
        };

        let mut select = Select {
            distinct: stmt.distinct,
            ranges,
            where_expr,
            columns,
            column_names,
            visible_columns,
            group_by,
            having,
            aggregates,
            sort: Vec::new(),
            limit: stmt.limit,
            union,
            union_depth: stmt.union_depth,
        };

        select.compile_order_by(stmt, &range_vars)?;
        Ok(select)
    }

    fn compile_order_by(
        &mut self,
        stmt: &SelectStatement,
        range_vars: &[RangeVar],
    ) -> Result<()> {
        let grouped = !self.group_by.is_empty() || !self.aggregates.is_empty();
        for item in &stmt.order_by {
            let column = match &item.expr {
                Expr::Literal(Literal::Integer(n)) => {
                    let n = *n;
                    if n < 1 || n as usize > self.visible_columns {
                        return Err(Error::InvalidOrderBy(format!("column index {}", n)));
                    }
                    (n - 1) as usize
                }
                Expr::Column(c) if c.table.is_none() => {
                    match self.column_names[..self.visible_columns]
                        .iter()
                        .position(|name| name == &c.name)
                    {
                        Some(i) => i,
                        None => self.order_by_expr(&item.expr, range_vars, grouped)?,
                    }
                }
                other => self.order_by_expr(other, range_vars, grouped)?,
            };
            self.sort.push(SortSpec {
                column,
                descending: item.descending,
            });
        }
        Ok(())
    }

    /// Match an ORDER BY expression against the select list, appending it
    /// as a hidden column when it is not there.
    fn order_by_expr(
        &mut self,
        expr: &Expr,
        range_vars: &[RangeVar],
        grouped: bool,
    ) -> Result<usize> {
        let compiled = resolve(expr, range_vars, &mut self.aggregates)?;
        for (i, col) in self.columns[..self.visible_columns].iter().enumerate() {
            if exprs_equal(col, &compiled) {
                return Ok(i);
            }
        }
        if self.distinct {
            return Err(Error::InvalidOrderByInDistinctSelect(item_name(expr, 0)));
        }
        if self.union.is_some() || self.union_depth > 0 {
            return Err(Error::InvalidOrderBy(
                "set-operation query sorts by select-list columns only".to_string(),
            ));
        }
        if grouped && compiled.references_ungrouped_column(&self.group_by) {
            return Err(Error::InvalidOrderBy(item_name(expr, 0)));
        }
        self.columns.push(compiled);
        self.column_names.push(item_name(expr, self.columns.len()));
        Ok(self.columns.len() - 1)
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_names[..self.visible_columns]
    }

    pub fn visible_columns(&self) -> usize {
        self.visible_columns
    }

    /// Metadata for the visible result columns. Types come from the
    /// catalog for plain column references.
    pub fn result_metadata(&self, db: &Database) -> Vec<ColumnMeta> {
        self.columns[..self.visible_columns]
            .iter()
            .zip(&self.column_names)
            .map(|(expr, name)| {
                let data_type = match expr {
                    CompiledExpr::Column { range, column } => db
                        .get_table(&self.ranges[*range].range.table)
                        .ok()
                        .map(|t| t.schema().columns()[*column].data_type.clone()),
                    _ => None,
                };
                ColumnMeta {
                    name: name.clone(),
                    data_type,
                }
            })
            .collect()
    }

    /// Validate the set-operation chain: bracket balance on the tail
    /// branch and matching column counts everywhere.
    pub fn prepare_unions(&self) -> Result<()> {
        let mut tail = self;
        while let Some((_, next)) = &tail.union {
            tail = next;
        }
        if tail.union_depth != 0 {
            return Err(Error::MissingCloseBracket);
        }

        let mut cur = self;
        while let Some((_, next)) = &cur.union {
            if next.visible_columns != self.visible_columns {
                return Err(Error::ColumnCountMismatch(
                    self.visible_columns,
                    next.visible_columns,
                ));
            }
            cur = next;
        }
        Ok(())
    }

    /// Evaluate the query. `max_rows` caps the visible result (0 is
    /// unlimited) and merges with the LIMIT clause.
    pub fn get_result(
        &self,
        db: &Database,
        params: &[Value],
        now: DateTimeValues,
        max_rows: usize,
    ) -> Result<ResultSet> {
        self.prepare_unions()?;

        if self.union.is_none() {
            let (start, count) = merged_limit(self.limit, max_rows);
            let mut rs = self.eval_branch(db, params, now, start, count)?;
            rs.truncate_columns();
            return Ok(rs);
        }

        // Collect branch results, each carrying the operator that links it
        // to the next branch and the bracket depth that operator sits at.
        let mut branches = Vec::new();
        let mut cur = self;
        loop {
            let mut rs = cur.eval_branch(db, params, now, 0, 0)?;
            rs.truncate_columns();
            match &cur.union {
                Some((op, next)) => {
                    branches.push(UnionBranch {
                        result: rs,
                        op: Some(*op),
                        depth: cur.union_depth,
                    });
                    cur = next;
                }
                None => {
                    branches.push(UnionBranch {
                        result: rs,
                        op: None,
                        depth: cur.union_depth,
                    });
                    break;
                }
            }
        }

        // Bracketed sub-chains merge first: collapse runs of operators at
        // the deepest recorded level, then work outwards.
        while branches.len() > 1 {
            let deepest = match branches[..branches.len() - 1].iter().map(|b| b.depth).max() {
                Some(d) => d,
                None => break,
            };
            let mut i = 0;
            while i + 1 < branches.len() {
                if branches[i].depth < deepest {
                    i += 1;
                    continue;
                }
                let mut j = i;
                while j + 1 < branches.len() && branches[j].depth == deepest {
                    j += 1;
                }
                let (op, depth) = (branches[j].op, branches[j].depth);
                let run: Vec<UnionBranch> = branches.drain(i..=j).collect();
                branches.insert(
                    i,
                    UnionBranch {
                        result: merge_run(run)?,
                        op,
                        depth,
                    },
                );
                i += 1;
            }
        }

        let mut acc = match branches.pop() {
            Some(b) => b.result,
            None => return Err(Error::Internal("empty set-operation chain".to_string())),
        };

        acc.sort(&self.sort);
        let (start, count) = merged_limit(self.limit, max_rows);
        acc.trim(start, count);
        debug!(rows = acc.row_count(), "set-operation query evaluated");
        Ok(acc)
    }

    /// Evaluate one branch, ignoring its union link. `start` and `count`
    /// are the final trim bounds (count 0 keeps all rows).
    fn eval_branch(
        &self,
        db: &Database,
        params: &[Value],
        now: DateTimeValues,
        start: usize,
        count: usize,
    ) -> Result<ResultSet> {
        let tables: Vec<&Table> = self
            .ranges
            .iter()
            .map(|r| db.get_table(&r.range.table))
            .collect::<Result<_>>()?;

        let grouped = !self.group_by.is_empty() || !self.aggregates.is_empty();

        let scan = JoinScan {
            ranges: &self.ranges,
            tables,
            where_expr: self.where_expr.as_ref(),
            params,
            now,
        };

        if grouped {
            return self.eval_grouped(&scan, params, now, start, count);
        }

        let mut rs = ResultSet::new(self.column_names.clone(), self.visible_columns);

        // Plain scans can stop as soon as enough rows exist.
        let simple = !self.distinct && self.sort.is_empty();
        let stop_at = if simple && count > 0 {
            Some(start + count)
        } else {
            None
        };

        scan.run(&mut |rows| {
            let ctx = EvalContext::new(rows, params, now);
            let mut out = Vec::with_capacity(self.columns.len());
            for col in &self.columns {
                match eval(col, &ctx) {
                    Ok(v) => out.push(v),
                    Err(EvalError::Skip) => return Ok(true),
                    Err(EvalError::Fail(e)) => return Err(e),
                }
            }
            rs.rows.push(out);
            Ok(stop_at.map_or(true, |n| rs.rows.len() < n))
        })?;

        if self.distinct {
            rs.remove_duplicates();
        }
        rs.sort(&self.sort);
        rs.trim(start, count);
        Ok(rs)
    }

    fn eval_grouped(
        &self,
        scan: &JoinScan<'_>,
        params: &[Value],
        now: DateTimeValues,
        start: usize,
        count: usize,
    ) -> Result<ResultSet> {
        struct GroupEntry {
            /// First row of the group, for group-key column expressions
            reps: Vec<Option<Vec<Value>>>,
            accs: Vec<Accumulator>,
        }

        let mut groups: IndexMap<Vec<Value>, GroupEntry> = IndexMap::new();

        // A query with aggregates but no GROUP BY produces exactly one
        // row even over an empty scan.
        if self.group_by.is_empty() {
            groups.insert(
                Vec::new(),
                GroupEntry {
                    reps: vec![None; self.ranges.len()],
                    accs: self.aggregates.iter().map(Accumulator::new).collect(),
                },
            );
        }

        scan.run(&mut |rows| {
            let ctx = EvalContext::new(rows, params, now);

            let mut key = Vec::with_capacity(self.group_by.len());
            for g in &self.group_by {
                match eval(g, &ctx) {
                    Ok(v) => key.push(v),
                    Err(EvalError::Skip) => return Ok(true),
                    Err(EvalError::Fail(e)) => return Err(e),
                }
            }

            let entry = groups.entry(key).or_insert_with(|| GroupEntry {
                reps: Vec::new(),
                accs: self.aggregates.iter().map(Accumulator::new).collect(),
            });
            if entry.reps.is_empty() || entry.reps.iter().all(|r| r.is_none()) {
                // first row of the group becomes its representative
                entry.reps = rows
                    .iter()
                    .map(|r| r.map(|values| values.to_vec()))
                    .collect();
            }

            for (acc, agg) in entry.accs.iter_mut().zip(&self.aggregates) {
                let arg = match &agg.arg {
                    Some(a) => match eval(a, &ctx) {
                        Ok(v) => Some(v),
                        Err(EvalError::Skip) => return Ok(true),
                        Err(EvalError::Fail(e)) => return Err(e),
                    },
                    None => None,
                };
                acc.add(arg)?;
            }
            Ok(true)
        })?;

        let mut rs = ResultSet::new(self.column_names.clone(), self.visible_columns);
        for (_, entry) in groups {
            let finished: Vec<Value> = entry.accs.into_iter().map(|a| a.finish()).collect();
            let reps: Vec<Option<&[Value]>> = entry
                .reps
                .iter()
                .map(|r| r.as_deref())
                .collect();
            let ctx = EvalContext::new(&reps, params, now).with_aggregates(&finished);

            if let Some(h) = &self.having {
                match holds(h, &ctx) {
                    Ok(true) => {}
                    Ok(false) | Err(EvalError::Skip) => continue,
                    Err(EvalError::Fail(e)) => return Err(e),
                }
            }

            let mut out = Vec::with_capacity(self.columns.len());
            let mut skip = false;
            for col in &self.columns {
                match eval(col, &ctx) {
                    Ok(v) => out.push(v),
                    Err(EvalError::Skip) => {
                        skip = true;
                        break;
                    }
                    Err(EvalError::Fail(e)) => return Err(e),
                }
            }
            if !skip {
                rs.rows.push(out);
            }
        }

        if self.distinct {
            rs.remove_duplicates();
        }
        rs.sort(&self.sort);
        rs.trim(start, count);
        Ok(rs)
    }
}

/// One evaluated branch of a set-operation chain. `op` and `depth`
/// describe the link to the following branch; the tail carries `None`.
struct UnionBranch {
    result: ResultSet,
    op: Option<SetOperator>,
    depth: usize,
}

/// Merge a run of branches whose linking operators all sit at one bracket
/// depth: INTERSECT binds tighter, the rest folds right to left. The last
/// branch's outgoing link is not part of the run.
fn merge_run(mut branches: Vec<UnionBranch>) -> Result<ResultSet> {
    let mut i = 0;
    while i + 1 < branches.len() {
        if branches[i].op == Some(SetOperator::Intersect) {
            let right = branches.remove(i + 1);
            branches[i].result.remove_different(&right.result);
            branches[i].op = right.op;
            branches[i].depth = right.depth;
        } else {
            i += 1;
        }
    }

    let mut acc = match branches.pop() {
        Some(b) => b.result,
        None => return Err(Error::Internal("empty set-operation run".to_string())),
    };
    while let Some(mut branch) = branches.pop() {
        match branch.op {
            Some(SetOperator::Union) => {
                branch.result.append(acc);
                branch.result.remove_duplicates();
            }
            Some(SetOperator::UnionAll) => {
                branch.result.append(acc);
            }
            Some(SetOperator::Except) => {
                branch.result.remove_second(&acc);
            }
            Some(SetOperator::Intersect) | None => {
                return Err(Error::Internal("malformed set-operation chain".to_string()))
            }
        }
        acc = branch.result;
    }
    Ok(acc)
}

/// Merge a LIMIT clause with a session row cap into (start, count);
/// count 0 means unlimited.
fn merged_limit(limit: Option<LimitClause>, max_rows: usize) -> (usize, usize) {
    match limit {
        Some(l) => {
            let count = match (l.count, max_rows) {
                (0, m) => m,
                (c, 0) => c,
                (c, m) => c.min(m),
            };
            (l.start, count)
        }
        None => (0, max_rows),
    }
}

struct JoinScan<'a> {
    ranges: &'a [CompiledRange],
    tables: Vec<&'a Table>,
    where_expr: Option<&'a CompiledExpr>,
    params: &'a [Value],
    now: DateTimeValues,
}

impl<'a> JoinScan<'a> {
    /// Drive the nested-loop join, calling `visit` for each joined row
    /// that passes the WHERE clause. `visit` returns false to stop.
    fn run(&self, visit: &mut dyn FnMut(&[Option<&[Value]>]) -> Result<bool>) -> Result<()> {
        let mut current: Vec<Option<&[Value]>> = vec![None; self.tables.len()];
        self.scan_level(0, &mut current, visit)?;
        Ok(())
    }

    fn scan_level(
        &self,
        depth: usize,
        current: &mut Vec<Option<&'a [Value]>>,
        visit: &mut dyn FnMut(&[Option<&[Value]>]) -> Result<bool>,
    ) -> Result<bool> {
        if depth == self.tables.len() {
            if let Some(w) = self.where_expr {
                let ctx = EvalContext::new(current, self.params, self.now);
                if !condition_passes(w, &ctx)? {
                    return Ok(true);
                }
            }
            return visit(current);
        }

        let range = &self.ranges[depth];
        let mut matched = false;
        for (_, values) in self.tables[depth].rows() {
            current[depth] = Some(values);
            if let Some(cond) = &range.condition {
                let ctx = EvalContext::new(current, self.params, self.now);
                if !condition_passes(cond, &ctx)? {
                    continue;
                }
            }
            matched = true;
            if !self.scan_level(depth + 1, current, visit)? {
                return Ok(false);
            }
        }

        if !matched && range.range.outer {
            current[depth] = None;
            if !self.scan_level(depth + 1, current, visit)? {
                return Ok(false);
            }
        }

        current[depth] = None;
        Ok(true)
    }
}

/// A condition that cannot be evaluated for a row simply excludes it.
fn condition_passes(expr: &CompiledExpr, ctx: &EvalContext<'_>) -> Result<bool> {
    match holds(expr, ctx) {
        Ok(b) => Ok(b),
        Err(EvalError::Skip) => Ok(false),
        Err(EvalError::Fail(e)) => Err(e),
    }
}

/// Incremental aggregate state.
#[derive(Debug)]
struct Accumulator {
    func: AggregateFunc,
    distinct: bool,
    count: i64,
    acc: Option<Value>,
    seen: HashSet<Value>,
}

impl Accumulator {
    fn new(agg: &AggregateExpr) -> Self {
        Self {
            func: agg.func,
            distinct: agg.distinct,
            count: 0,
            acc: None,
            seen: HashSet::new(),
        }
    }

    /// Feed one row. `None` is a COUNT(*) row; NULL arguments are
    /// ignored per SQL aggregate semantics.
    fn add(&mut self, value: Option<Value>) -> Result<()> {
        let value = match value {
            None => {
                self.count += 1;
                return Ok(());
            }
            Some(Value::Null) => return Ok(()),
            Some(v) => v,
        };
        if self.distinct && !self.seen.insert(value.clone()) {
            return Ok(());
        }
        self.count += 1;
        match self.func {
            AggregateFunc::Count => {}
            AggregateFunc::Sum | AggregateFunc::Avg => {
                self.acc = Some(match self.acc.take() {
                    None => value,
                    Some(prev) => prev.add(&value).ok_or_else(|| {
                        Error::OperationNotSupported(
                            "SUM does not apply to these values".to_string(),
                        )
                    })?,
                });
            }
            AggregateFunc::Min => {
                self.acc = Some(match self.acc.take() {
                    None => value,
                    Some(prev) => match value.compare(&prev) {
                        Some(ord) if ord.is_lt() => value,
                        _ => prev,
                    },
                });
            }
            AggregateFunc::Max => {
                self.acc = Some(match self.acc.take() {
                    None => value,
                    Some(prev) => match value.compare(&prev) {
                        Some(ord) if ord.is_gt() => value,
                        _ => prev,
                    },
                });
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self.func {
            AggregateFunc::Count => match i32::try_from(self.count) {
                Ok(n) => Value::Integer(n),
                Err(_) => Value::BigInt(self.count),
            },
            AggregateFunc::Sum | AggregateFunc::Min | AggregateFunc::Max => {
                self.acc.unwrap_or(Value::Null)
            }
            AggregateFunc::Avg => match self.acc {
                Some(sum) if self.count > 0 => sum
                    .div(&Value::BigInt(self.count))
                    .unwrap_or(Value::Null),
                _ => Value::Null,
            },
        }
    }
}

/// Expand `*` and `table.*` into column expressions.
fn expand_wildcards(
    items: &[SelectItem],
    ranges: &[RangeVar],
) -> Result<Vec<(Expr, Option<String>)>> {
    let mut out = Vec::new();
    for item in items {
        match item {
            SelectItem::Wildcard => {
                for range in ranges {
                    push_range_columns(range, &mut out);
                }
                if ranges.is_empty() {
                    return Err(Error::ColumnNotFound("*".to_string()));
                }
            }
            SelectItem::QualifiedWildcard(name) => {
                let range = ranges
                    .iter()
                    .find(|r| &r.alias == name)
                    .ok_or_else(|| Error::TableNotFound(name.clone()))?;
                push_range_columns(range, &mut out);
            }
            SelectItem::Expr { expr, alias } => out.push((expr.clone(), alias.clone())),
        }
    }
    Ok(out)
}

fn push_range_columns(range: &RangeVar, out: &mut Vec<(Expr, Option<String>)>) {
    for col in &range.columns {
        out.push((
            Expr::Column(crate::sql::ast::ColumnRef {
                table: Some(range.alias.clone()),
                name: col.clone(),
            }),
            Some(col.clone()),
        ));
    }
}

fn item_name(expr: &Expr, index: usize) -> String {
    match expr {
        Expr::Column(c) => c.name.clone(),
        Expr::Aggregate { func, .. } => format!("{:?}", func).to_uppercase(),
        Expr::Function { name, .. } => name.clone(),
        _ => format!("C{}", index + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Column, DataType, Schema};
    use crate::sql::{Parser, Statement};

    fn test_db() -> Database {
        let mut db = Database::in_memory("test");

        let mut users = Schema::new();
        users.add_column(Column::new("id", DataType::Integer, 0).primary_key(true));
        users.add_column(Column::new("name", DataType::Varchar(Some(50)), 1));
        users.add_column(Column::new("dept", DataType::Varchar(Some(20)), 2));
        users.add_column(Column::new("salary", DataType::Integer, 3));
        db.create_table(Table::new("users", users, false)).unwrap();

        let mut depts = Schema::new();
        depts.add_column(Column::new("dept", DataType::Varchar(Some(20)), 0));
        depts.add_column(Column::new("budget", DataType::Integer, 1));
        db.create_table(Table::new("depts", depts, false)).unwrap();

        for (id, name, dept, salary) in [
            (1, "ann", "eng", 100),
            (2, "bob", "eng", 80),
            (3, "cid", "ops", 60),
            (4, "dot", "sales", 70),
        ] {
            db.insert_into(
                "users",
                vec![
                    Value::Integer(id),
                    Value::String(name.to_string()),
                    Value::String(dept.to_string()),
                    Value::Integer(salary),
                ],
            )
            .unwrap();
        }
        for (dept, budget) in [("eng", 1000), ("ops", 500)] {
            db.insert_into(
                "depts",
                vec![Value::String(dept.to_string()), Value::Integer(budget)],
            )
            .unwrap();
        }
        db
    }

    fn run(db: &Database, sql: &str) -> Result<ResultSet> {
        let stmt = Parser::new(sql)?.parse()?;
        let select = match stmt {
            Statement::Select(s) => s,
            other => panic!("expected select, got {:?}", other),
        };
        let compiled = Select::compile(db, &select)?;
        compiled.get_result(db, &[], DateTimeValues::from_millis(0), 0)
    }

    fn int_column(rs: &ResultSet, col: usize) -> Vec<i32> {
        rs.rows
            .iter()
            .map(|r| match r[col] {
                Value::Integer(i) => i,
                ref other => panic!("expected integer, got {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_projection_and_where() {
        let db = test_db();
        let rs = run(&db, "SELECT name FROM users WHERE salary > 70").unwrap();
        assert_eq!(rs.column_names, vec!["name"]);
        assert_eq!(rs.row_count(), 2);
    }

    #[test]
    fn test_wildcard() {
        let db = test_db();
        let rs = run(&db, "SELECT * FROM users").unwrap();
        assert_eq!(rs.column_names, vec!["id", "name", "dept", "salary"]);
        assert_eq!(rs.row_count(), 4);
    }

    #[test]
    fn test_inner_join() {
        let db = test_db();
        let rs = run(
            &db,
            "SELECT u.name, d.budget FROM users u JOIN depts d ON u.dept = d.dept",
        )
        .unwrap();
        // sales has no dept row
        assert_eq!(rs.row_count(), 3);
    }

    #[test]
    fn test_left_outer_join_null_extends() {
        let db = test_db();
        let rs = run(
            &db,
            "SELECT u.name, d.budget FROM users u LEFT OUTER JOIN depts d ON u.dept = d.dept \
             ORDER BY u.id",
        )
        .unwrap();
        assert_eq!(rs.row_count(), 4);
        assert_eq!(rs.rows[3][1], Value::Null);
    }

    #[test]
    fn test_group_by_having() {
        let db = test_db();
        let rs = run(
            &db,
            "SELECT dept, COUNT(*), SUM(salary) FROM users GROUP BY dept \
             HAVING COUNT(*) > 1",
        )
        .unwrap();
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.rows[0][0], Value::String("eng".to_string()));
        assert_eq!(rs.rows[0][1], Value::Integer(2));
        assert_eq!(rs.rows[0][2], Value::Integer(180));
    }

    #[test]
    fn test_ungrouped_aggregate_over_empty_scan() {
        let db = test_db();
        let rs = run(&db, "SELECT COUNT(*), MAX(salary) FROM users WHERE id > 99").unwrap();
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.rows[0][0], Value::Integer(0));
        assert_eq!(rs.rows[0][1], Value::Null);
    }

    #[test]
    fn test_invalid_group_by() {
        let db = test_db();
        assert!(matches!(
            run(&db, "SELECT name, COUNT(*) FROM users GROUP BY dept"),
            Err(Error::InvalidGroupBy(_))
        ));
    }

    #[test]
    fn test_invalid_having() {
        let db = test_db();
        assert!(matches!(
            run(&db, "SELECT dept FROM users GROUP BY dept HAVING name = 'ann'"),
            Err(Error::InvalidHaving(_))
        ));
        assert!(matches!(
            run(&db, "SELECT name FROM users HAVING name = 'ann'"),
            Err(Error::InvalidHaving(_))
        ));
    }

    #[test]
    fn test_order_by_and_limit() {
        let db = test_db();
        let rs = run(&db, "SELECT id FROM users ORDER BY salary DESC LIMIT 2").unwrap();
        assert_eq!(int_column(&rs, 0), vec![1, 2]);

        let rs = run(&db, "SELECT id FROM users ORDER BY 1 DESC").unwrap();
        assert_eq!(int_column(&rs, 0), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_order_by_hidden_column_is_trimmed() {
        let db = test_db();
        let rs = run(&db, "SELECT name FROM users ORDER BY salary").unwrap();
        assert_eq!(rs.column_names, vec!["name"]);
        assert_eq!(rs.rows[0].len(), 1);
        assert_eq!(rs.rows[0][0], Value::String("cid".to_string()));
    }

    #[test]
    fn test_distinct() {
        let db = test_db();
        let rs = run(&db, "SELECT DISTINCT dept FROM users").unwrap();
        assert_eq!(rs.row_count(), 3);

        assert!(matches!(
            run(&db, "SELECT DISTINCT dept FROM users ORDER BY salary"),
            Err(Error::InvalidOrderByInDistinctSelect(_))
        ));
    }

    #[test]
    fn test_union_and_union_all() {
        let db = test_db();
        let rs = run(
            &db,
            "SELECT dept FROM users UNION SELECT dept FROM depts",
        )
        .unwrap();
        assert_eq!(rs.row_count(), 3);

        let rs = run(
            &db,
            "SELECT dept FROM users UNION ALL SELECT dept FROM depts",
        )
        .unwrap();
        assert_eq!(rs.row_count(), 6);
    }

    #[test]
    fn test_intersect_and_except() {
        let db = test_db();
        let rs = run(
            &db,
            "SELECT dept FROM users INTERSECT SELECT dept FROM depts",
        )
        .unwrap();
        assert_eq!(rs.row_count(), 2);

        let rs = run(&db, "SELECT dept FROM users EXCEPT SELECT dept FROM depts").unwrap();
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.rows[0][0], Value::String("sales".to_string()));
    }

    #[test]
    fn test_intersect_binds_tighter_than_union() {
        let db = test_db();
        // sales UNION (eng INTERSECT eng-dept rows)
        let rs = run(
            &db,
            "SELECT dept FROM users WHERE dept = 'sales' \
             UNION SELECT dept FROM users INTERSECT SELECT dept FROM depts",
        )
        .unwrap();
        // intersect of user depts and dept rows = {eng, ops}; union adds sales
        assert_eq!(rs.row_count(), 3);
    }

    #[test]
    fn test_brackets_override_intersect_precedence() {
        let db = test_db();
        // without brackets the intersect would bind to the second branch
        let rs = run(
            &db,
            "(SELECT dept FROM users WHERE dept = 'sales' \
             UNION SELECT dept FROM users WHERE dept = 'eng') \
             INTERSECT SELECT dept FROM depts",
        )
        .unwrap();
        // {sales, eng} intersected with {eng, ops}
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.rows[0][0], Value::String("eng".to_string()));
    }

    #[test]
    fn test_bracketed_union_on_the_right() {
        let db = test_db();
        let rs = run(
            &db,
            "SELECT dept FROM depts EXCEPT \
             (SELECT dept FROM users WHERE dept = 'ops' \
              UNION SELECT dept FROM users WHERE dept = 'sales')",
        )
        .unwrap();
        // {eng, ops} minus {ops, sales}
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.rows[0][0], Value::String("eng".to_string()));
    }

    #[test]
    fn test_missing_close_bracket() {
        let db = test_db();
        assert!(matches!(
            run(&db, "(SELECT dept FROM users UNION SELECT dept FROM depts"),
            Err(Error::MissingCloseBracket)
        ));
    }

    #[test]
    fn test_union_column_count_mismatch() {
        let db = test_db();
        assert!(matches!(
            run(&db, "SELECT id, name FROM users UNION SELECT dept FROM depts"),
            Err(Error::ColumnCountMismatch(2, 1))
        ));
    }

    #[test]
    fn test_max_rows_merges_with_limit() {
        let db = test_db();
        let stmt = match Parser::new("SELECT id FROM users ORDER BY id LIMIT 3")
            .unwrap()
            .parse()
            .unwrap()
        {
            Statement::Select(s) => s,
            _ => unreachable!(),
        };
        let compiled = Select::compile(&db, &stmt).unwrap();
        let rs = compiled
            .get_result(&db, &[], DateTimeValues::from_millis(0), 2)
            .unwrap();
        assert_eq!(int_column(&rs, 0), vec![1, 2]);
    }

    #[test]
    fn test_limit_stops_the_scan_early() {
        let db = test_db();
        // the third row divides by zero; LIMIT 2 never reaches it
        let rs = run(&db, "SELECT 100 / (salary - 60) FROM users LIMIT 2").unwrap();
        assert_eq!(rs.row_count(), 2);
        assert!(matches!(
            run(&db, "SELECT 100 / (salary - 60) FROM users"),
            Err(Error::DivisionByZero)
        ));
    }

    #[test]
    fn test_count_beyond_integer_range_widens() {
        let mut acc = Accumulator {
            func: AggregateFunc::Count,
            distinct: false,
            count: 0,
            acc: None,
            seen: HashSet::new(),
        };
        acc.add(None).unwrap();
        assert_eq!(acc.finish(), Value::Integer(1));

        let over = i64::from(i32::MAX) + 1;
        let acc = Accumulator {
            func: AggregateFunc::Count,
            distinct: false,
            count: over,
            acc: None,
            seen: HashSet::new(),
        };
        assert_eq!(acc.finish(), Value::BigInt(over));
    }

    #[test]
    fn test_select_without_from() {
        let db = test_db();
        let rs = run(&db, "SELECT 1 + 1").unwrap();
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.rows[0][0], Value::Integer(2));
    }
}

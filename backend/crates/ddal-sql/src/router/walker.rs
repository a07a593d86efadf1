//! Statement walker: opens a scope per statement and subquery, binds sharded
//! tables, routes them from shard-key predicates and rewrites their names.
//!
//! Scopes never hold references into the tree. A binding records the slot of
//! its table reference in the scope owner's node, and routes are written back
//! into that node when the scope closes.

use super::scope::{Resolution, ScopeKind, ScopeStack, TableBinding, TableSlot};
use super::validator::RoutedTable;
use super::values::{Extracted, RouteSource, ValueReader, ValueSource};
use super::RouterOptions;
use crate::error::{Result, RoutingError};
use crate::params::BoundParams;
use crate::parser::StatementScan;
use ddal_sharding::{RouteContext, RouteInfo, RouteOverride, RouteOverrides, ShardRouter, ShardValue};
use sqlparser::ast::{
    Assignment, BinaryOperator, Delete, Expr, FromTable, Function, FunctionArg, FunctionArgExpr,
    FunctionArgumentClause, FunctionArguments, GroupByExpr, Ident, Insert, JoinConstraint,
    JoinOperator, ObjectName, ObjectNamePart, OrderBy, OrderByKind, Query, Select, SelectItem,
    SetExpr, Statement, TableAlias, TableFactor, TableObject, TableWithJoins, UnaryOperator,
};
use std::collections::BTreeSet;

/// Rewrite decided for one binding when its scope closes.
struct Rewrite {
    slot: TableSlot,
    route: RouteInfo,
    alias: Option<Ident>,
}

/// Call-scoped routing state; one per `route` call.
pub(crate) struct RouteWalker<'a> {
    sql: &'a str,
    rules: &'a dyn ShardRouter,
    overrides: &'a dyn RouteOverrides,
    context: &'a RouteContext,
    options: &'a RouterOptions,
    scan: &'a StatementScan,
    params: Option<&'a BoundParams>,
    scopes: ScopeStack,
    /// Depth of enclosing `NOT` operators within the current query
    negation: usize,
    schemas: BTreeSet<String>,
    routed: Vec<RoutedTable>,
}

impl<'a> RouteWalker<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sql: &'a str,
        rules: &'a dyn ShardRouter,
        overrides: &'a dyn RouteOverrides,
        context: &'a RouteContext,
        options: &'a RouterOptions,
        scan: &'a StatementScan,
        params: Option<&'a BoundParams>,
    ) -> Self {
        Self {
            sql,
            rules,
            overrides,
            context,
            options,
            scan,
            params,
            scopes: ScopeStack::default(),
            negation: 0,
            schemas: BTreeSet::new(),
            routed: Vec::new(),
        }
    }

    /// Walk and rewrite `statement`, returning the physical schemas touched
    /// and the routed tables.
    pub fn walk(mut self, statement: &mut Statement) -> Result<(BTreeSet<String>, Vec<RoutedTable>)> {
        self.walk_statement(statement)?;
        Ok((self.schemas, self.routed))
    }

    fn walk_statement(&mut self, statement: &mut Statement) -> Result<()> {
        match statement {
            Statement::Query(query) => self.walk_query(query),
            Statement::Insert(insert) => self.walk_insert(insert),
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => self.walk_update(table, assignments, selection),
            Statement::Delete(delete) => self.walk_delete(delete),
            _ => Ok(()),
        }
    }

    /// A subquery is routed on its own, so a `NOT` around it does not reach
    /// its predicates.
    fn walk_query(&mut self, query: &mut Query) -> Result<()> {
        let negation = std::mem::take(&mut self.negation);
        let result = self.walk_query_clauses(query);
        self.negation = negation;
        result
    }

    fn walk_query_clauses(&mut self, query: &mut Query) -> Result<()> {
        let Query {
            with,
            body,
            order_by,
            limit,
            limit_by,
            offset,
            fetch,
            ..
        } = query;

        if let Some(with) = with.as_mut() {
            for cte in with.cte_tables.iter_mut() {
                self.walk_query(&mut cte.query)?;
            }
        }

        // ORDER BY and LIMIT see the tables of a plain SELECT body
        let mut tail: Vec<&mut Expr> = Vec::new();
        if let Some(OrderBy {
            kind: OrderByKind::Expressions(exprs),
            ..
        }) = order_by.as_mut()
        {
            tail.extend(exprs.iter_mut().map(|order| &mut order.expr));
        }
        tail.extend(limit.as_mut());
        tail.extend(limit_by.iter_mut());
        tail.extend(offset.as_mut().map(|offset| &mut offset.value));
        tail.extend(fetch.as_mut().and_then(|fetch| fetch.quantity.as_mut()));

        match body.as_mut() {
            SetExpr::Select(select) => self.walk_select(select, tail),
            other => {
                self.walk_set_expr(other)?;
                for expr in tail {
                    self.walk_expr(expr)?;
                }
                Ok(())
            }
        }
    }

    fn walk_set_expr(&mut self, body: &mut SetExpr) -> Result<()> {
        match body {
            SetExpr::Select(select) => self.walk_select(select, Vec::new()),
            SetExpr::Query(query) => self.walk_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.walk_set_expr(left)?;
                self.walk_set_expr(right)
            }
            SetExpr::Values(values) => {
                for row in values.rows.iter_mut() {
                    for expr in row.iter_mut() {
                        self.walk_expr(expr)?;
                    }
                }
                Ok(())
            }
            SetExpr::Insert(statement) | SetExpr::Update(statement) => self.walk_statement(statement),
            _ => Ok(()),
        }
    }

    fn walk_select(&mut self, select: &mut Select, tail: Vec<&mut Expr>) -> Result<()> {
        self.scopes.push(ScopeKind::Select);

        for (slot, factor) in table_factors(&mut select.from).into_iter().enumerate() {
            self.register_factor(slot, factor);
        }
        for table in select.from.iter_mut() {
            self.walk_table_with_joins(table)?;
        }
        for item in select.projection.iter_mut() {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    self.walk_expr(expr)?;
                }
                _ => {}
            }
        }
        if let Some(prewhere) = select.prewhere.as_mut() {
            self.walk_expr(prewhere)?;
        }
        if let Some(selection) = select.selection.as_mut() {
            self.walk_expr(selection)?;
        }
        if let GroupByExpr::Expressions(exprs, _) = &mut select.group_by {
            for expr in exprs.iter_mut() {
                self.walk_expr(expr)?;
            }
        }
        if let Some(having) = select.having.as_mut() {
            self.walk_expr(having)?;
        }
        if let Some(qualify) = select.qualify.as_mut() {
            self.walk_expr(qualify)?;
        }
        for expr in select
            .cluster_by
            .iter_mut()
            .chain(select.distribute_by.iter_mut())
            .chain(select.sort_by.iter_mut())
        {
            self.walk_expr(expr)?;
        }
        for expr in tail {
            self.walk_expr(expr)?;
        }

        let rewrites = self.close_scope()?;
        let mut factors = table_factors(&mut select.from);
        self.apply_to_factors(&mut factors, rewrites);
        Ok(())
    }

    fn walk_insert(&mut self, insert: &mut Insert) -> Result<()> {
        self.scopes.push(ScopeKind::Insert);

        if let TableObject::TableName(name) = &insert.table {
            self.register_table(TableSlot::InsertTarget, name, None);
        }

        // Single- and multi-row inserts route from their column values
        if !insert.columns.is_empty() {
            if let Some(source) = insert.source.as_deref() {
                if let SetExpr::Values(values) = source.body.as_ref() {
                    for row in &values.rows {
                        for (column, expr) in insert.columns.iter().zip(row.iter()) {
                            let key = column.value.to_lowercase();
                            self.on_equality(&key, &column.value, expr)?;
                        }
                    }
                }
            }
        }

        if let Some(source) = insert.source.as_mut() {
            self.walk_query(source)?;
        }

        let rewrites = self.close_scope()?;
        for rewrite in rewrites {
            if let (TableSlot::InsertTarget, TableObject::TableName(name)) = (rewrite.slot, &mut insert.table) {
                rename_table(name, &rewrite.route, self.options.default_schema.as_deref());
            }
        }
        Ok(())
    }

    fn walk_update(
        &mut self,
        table: &mut TableWithJoins,
        assignments: &mut [Assignment],
        selection: &mut Option<Expr>,
    ) -> Result<()> {
        self.scopes.push(ScopeKind::Update);

        let targets = std::slice::from_mut(table);
        for (slot, factor) in table_factors(targets).into_iter().enumerate() {
            self.register_factor(slot, factor);
        }
        self.walk_table_with_joins(table)?;
        for assignment in assignments.iter_mut() {
            self.walk_expr(&mut assignment.value)?;
        }
        if let Some(selection) = selection.as_mut() {
            self.walk_expr(selection)?;
        }

        let rewrites = self.close_scope()?;
        let mut factors = table_factors(std::slice::from_mut(table));
        self.apply_to_factors(&mut factors, rewrites);
        Ok(())
    }

    fn walk_delete(&mut self, delete: &mut Delete) -> Result<()> {
        self.scopes.push(ScopeKind::Delete);

        for (slot, factor) in delete_factors(delete).into_iter().enumerate() {
            self.register_factor(slot, factor);
        }
        match &mut delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => {
                for table in tables.iter_mut() {
                    self.walk_table_with_joins(table)?;
                }
            }
        }
        if let Some(using) = delete.using.as_mut() {
            for table in using.iter_mut() {
                self.walk_table_with_joins(table)?;
            }
        }
        if let Some(selection) = delete.selection.as_mut() {
            self.walk_expr(selection)?;
        }
        for order in delete.order_by.iter_mut() {
            self.walk_expr(&mut order.expr)?;
        }
        if let Some(limit) = delete.limit.as_mut() {
            self.walk_expr(limit)?;
        }

        let rewrites = self.close_scope()?;

        // Multi-table targets (`DELETE t FROM t ..`) name unaliased factors
        // and follow their rename.
        let targets: Vec<(Option<String>, String, RouteInfo)> = {
            let factors = delete_factors(delete);
            rewrites
                .iter()
                .filter_map(|rewrite| {
                    let TableSlot::Factor(slot) = rewrite.slot else {
                        return None;
                    };
                    match factors.get(slot).map(|factor| &**factor) {
                        Some(TableFactor::Table { name, alias: None, .. }) => {
                            let (schema, table) = split_table_name(name)?;
                            Some((
                                schema.map(|ident| ident.value.clone()),
                                table.value.clone(),
                                rewrite.route.clone(),
                            ))
                        }
                        _ => None,
                    }
                })
                .collect()
        };
        let default_schema = self.options.default_schema.as_deref();
        for name in delete.tables.iter_mut() {
            let matched = split_table_name(name).and_then(|(schema, table)| {
                targets.iter().find(|(target_schema, target_table, _)| {
                    target_table.eq_ignore_ascii_case(&table.value)
                        && match (schema, target_schema) {
                            (Some(schema), Some(target)) => schema.value.eq_ignore_ascii_case(target),
                            (None, None) => true,
                            _ => false,
                        }
                })
            });
            if let Some((_, _, route)) = matched {
                rename_table(name, route, default_schema);
            }
        }

        let mut factors = delete_factors(delete);
        self.apply_to_factors(&mut factors, rewrites);
        Ok(())
    }

    /// Derived tables open their own scopes; join conditions belong to the
    /// current one.
    fn walk_table_with_joins(&mut self, table: &mut TableWithJoins) -> Result<()> {
        self.walk_table_factor(&mut table.relation)?;
        for join in table.joins.iter_mut() {
            self.walk_table_factor(&mut join.relation)?;
            for condition in join_conditions(&mut join.join_operator) {
                self.walk_expr(condition)?;
            }
        }
        Ok(())
    }

    fn walk_table_factor(&mut self, factor: &mut TableFactor) -> Result<()> {
        match factor {
            TableFactor::Derived { subquery, .. } => self.walk_query(subquery),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.walk_table_with_joins(table_with_joins),
            _ => Ok(()),
        }
    }

    fn walk_expr(&mut self, expr: &mut Expr) -> Result<()> {
        match expr {
            Expr::BinaryOp { left, op, right } => {
                match op {
                    BinaryOperator::Eq => {
                        if let Some(column) = ColumnRef::from_expr(left) {
                            self.on_equality(&column.key, &column.display, right)?;
                        }
                    }
                    BinaryOperator::Gt
                    | BinaryOperator::GtEq
                    | BinaryOperator::Lt
                    | BinaryOperator::LtEq
                    | BinaryOperator::NotEq => {
                        let op = op.to_string();
                        self.reject_on_shard_key(left, &op, expr_text(left, &op, right))?;
                    }
                    _ => {}
                }
                self.walk_expr(left)?;
                self.walk_expr(right)
            }
            Expr::InList {
                expr: left,
                list,
                negated,
            } => {
                if let Some(column) = ColumnRef::from_expr(left) {
                    self.on_in_list(&column, list, *negated)?;
                }
                self.walk_expr(left)?;
                self.walk_exprs(list)
            }
            Expr::InSubquery {
                expr: left,
                subquery,
                ..
            } => {
                self.reject_on_shard_key(left, "IN (subquery)", format!("{} IN (subquery)", left))?;
                self.walk_expr(left)?;
                self.walk_query(subquery)
            }
            Expr::InUnnest {
                expr: left,
                array_expr,
                ..
            } => {
                self.reject_on_shard_key(left, "IN UNNEST", format!("{} IN UNNEST({})", left, array_expr))?;
                self.walk_expr(left)?;
                self.walk_expr(array_expr)
            }
            Expr::Between {
                expr: left,
                negated,
                low,
                high,
            } => {
                if let Some(column) = ColumnRef::from_expr(left) {
                    self.on_between(&column, *negated, low, high)?;
                }
                self.walk_expr(left)?;
                self.walk_expr(low)?;
                self.walk_expr(high)
            }
            Expr::Like { expr: left, pattern, .. } => {
                self.reject_on_shard_key(left, "LIKE", format!("{} LIKE {}", left, pattern))?;
                self.walk_expr(left)?;
                self.walk_expr(pattern)
            }
            Expr::ILike { expr: left, pattern, .. } => {
                self.reject_on_shard_key(left, "ILIKE", format!("{} ILIKE {}", left, pattern))?;
                self.walk_expr(left)?;
                self.walk_expr(pattern)
            }
            Expr::SimilarTo { expr: left, pattern, .. } => {
                self.reject_on_shard_key(left, "SIMILAR TO", format!("{} SIMILAR TO {}", left, pattern))?;
                self.walk_expr(left)?;
                self.walk_expr(pattern)
            }
            Expr::RLike { expr: left, pattern, .. } => {
                self.reject_on_shard_key(left, "REGEXP", format!("{} REGEXP {}", left, pattern))?;
                self.walk_expr(left)?;
                self.walk_expr(pattern)
            }
            Expr::AnyOp {
                left,
                compare_op,
                right,
                ..
            }
            | Expr::AllOp {
                left,
                compare_op,
                right,
            } => {
                let op = format!("{} ANY/ALL", compare_op);
                self.reject_on_shard_key(left, &op, expr_text(left, &op, right))?;
                self.walk_expr(left)?;
                self.walk_expr(right)
            }
            Expr::IsNull(inner) => {
                self.reject_on_shard_key(inner, "IS NULL", format!("{} IS NULL", inner))?;
                self.walk_expr(inner)
            }
            Expr::IsDistinctFrom(left, right) | Expr::IsNotDistinctFrom(left, right) => {
                let text = format!("{} IS DISTINCT FROM {}", left, right);
                self.reject_on_shard_key(left, "IS DISTINCT FROM", text)?;
                self.walk_expr(left)?;
                self.walk_expr(right)
            }
            Expr::UnaryOp {
                op: UnaryOperator::Not,
                expr: inner,
            } => {
                self.negation += 1;
                let result = self.walk_expr(inner);
                self.negation -= 1;
                result
            }
            Expr::IsNotNull(inner)
            | Expr::IsTrue(inner)
            | Expr::IsNotTrue(inner)
            | Expr::IsFalse(inner)
            | Expr::IsNotFalse(inner)
            | Expr::IsUnknown(inner)
            | Expr::IsNotUnknown(inner)
            | Expr::Nested(inner)
            | Expr::OuterJoin(inner)
            | Expr::Prior(inner)
            | Expr::UnaryOp { expr: inner, .. }
            | Expr::Cast { expr: inner, .. }
            | Expr::IsNormalized { expr: inner, .. }
            | Expr::Extract { expr: inner, .. }
            | Expr::Ceil { expr: inner, .. }
            | Expr::Floor { expr: inner, .. }
            | Expr::Collate { expr: inner, .. }
            | Expr::Named { expr: inner, .. } => self.walk_expr(inner),
            Expr::Convert { expr: inner, styles, .. } => {
                self.walk_expr(inner)?;
                self.walk_exprs(styles)
            }
            Expr::AtTimeZone { timestamp, time_zone } => {
                self.walk_expr(timestamp)?;
                self.walk_expr(time_zone)
            }
            Expr::Position { expr: inner, r#in } => {
                self.walk_expr(inner)?;
                self.walk_expr(r#in)
            }
            Expr::Substring {
                expr: inner,
                substring_from,
                substring_for,
                ..
            } => {
                self.walk_expr(inner)?;
                self.walk_opt(substring_from)?;
                self.walk_opt(substring_for)
            }
            Expr::Trim {
                expr: inner,
                trim_what,
                trim_characters,
                ..
            } => {
                self.walk_expr(inner)?;
                self.walk_opt(trim_what)?;
                match trim_characters {
                    Some(characters) => self.walk_exprs(characters),
                    None => Ok(()),
                }
            }
            Expr::Overlay {
                expr: inner,
                overlay_what,
                overlay_from,
                overlay_for,
            } => {
                self.walk_expr(inner)?;
                self.walk_expr(overlay_what)?;
                self.walk_expr(overlay_from)?;
                self.walk_opt(overlay_for)
            }
            Expr::Case {
                operand,
                conditions,
                else_result,
            } => {
                self.walk_opt(operand)?;
                for when in conditions.iter_mut() {
                    self.walk_expr(&mut when.condition)?;
                    self.walk_expr(&mut when.result)?;
                }
                self.walk_opt(else_result)
            }
            Expr::Function(function) => self.walk_function(function),
            Expr::Tuple(exprs) | Expr::Struct { values: exprs, .. } => self.walk_exprs(exprs),
            Expr::GroupingSets(sets) | Expr::Cube(sets) | Expr::Rollup(sets) => {
                for set in sets.iter_mut() {
                    self.walk_exprs(set)?;
                }
                Ok(())
            }
            Expr::Subquery(query) => self.walk_query(query),
            Expr::Exists { subquery, .. } => self.walk_query(subquery),
            _ => Ok(()),
        }
    }

    fn walk_exprs(&mut self, exprs: &mut [Expr]) -> Result<()> {
        for expr in exprs.iter_mut() {
            self.walk_expr(expr)?;
        }
        Ok(())
    }

    fn walk_opt(&mut self, expr: &mut Option<Box<Expr>>) -> Result<()> {
        match expr {
            Some(expr) => self.walk_expr(expr),
            None => Ok(()),
        }
    }

    fn walk_function(&mut self, function: &mut Function) -> Result<()> {
        match &mut function.args {
            FunctionArguments::Subquery(query) => self.walk_query(query)?,
            FunctionArguments::List(list) => {
                for arg in list.args.iter_mut() {
                    let arg = match arg {
                        FunctionArg::Named { arg, .. } | FunctionArg::Unnamed(arg) => arg,
                        FunctionArg::ExprNamed { name, arg, .. } => {
                            self.walk_expr(name)?;
                            arg
                        }
                    };
                    if let FunctionArgExpr::Expr(expr) = arg {
                        self.walk_expr(expr)?;
                    }
                }
                for clause in list.clauses.iter_mut() {
                    match clause {
                        FunctionArgumentClause::OrderBy(orders) => {
                            for order in orders.iter_mut() {
                                self.walk_expr(&mut order.expr)?;
                            }
                        }
                        FunctionArgumentClause::Limit(expr) => self.walk_expr(expr)?,
                        _ => {}
                    }
                }
            }
            FunctionArguments::None => {}
        }
        if let Some(filter) = function.filter.as_mut() {
            self.walk_expr(filter)?;
        }
        Ok(())
    }

    fn register_factor(&mut self, slot: usize, factor: &TableFactor) {
        if let TableFactor::Table { name, alias, .. } = factor {
            let alias = alias.as_ref().map(|alias| alias.name.value.clone());
            self.register_table(TableSlot::Factor(slot), name, alias);
        }
    }

    /// Bind a table reference in the active scope when the rule engine shards it.
    fn register_table(&mut self, slot: TableSlot, name: &ObjectName, alias: Option<String>) {
        let Some((schema, table)) = split_table_name(name) else {
            return;
        };
        let schema = schema
            .map(|ident| ident.value.clone())
            .or_else(|| self.options.default_schema.clone());

        let config = self
            .rules
            .route_config(self.context, schema.as_deref(), &table.value);
        match config {
            Some(config) if config.is_sharded() => {
                log::debug!(
                    "Bound table '{}' with shard key '{}' at scope depth {}",
                    table.value,
                    config.shard_key(),
                    self.scopes.depth()
                );
                let binding = TableBinding::new(
                    slot,
                    schema,
                    table.value.clone(),
                    table.quote_style,
                    alias,
                    config,
                );
                if let Some(scope) = self.scopes.peek_mut() {
                    scope.register(binding);
                }
            }
            _ => {}
        }
    }

    /// Bound binding for `key`, failing on an ambiguous reference.
    fn bound(&self, key: &str, display: &str) -> Result<Option<usize>> {
        match self.scopes.resolve(key) {
            Resolution::NotFound => Ok(None),
            Resolution::Bound(idx) => Ok(Some(idx)),
            Resolution::Ambiguous => Err(RoutingError::AmbiguousShardKey(format!(
                "shard key '{}' is ambiguous in this scope, source sql is [{}]",
                display, self.sql
            ))),
        }
    }

    fn binding_mut(&mut self, idx: usize) -> Result<&mut TableBinding> {
        self.scopes
            .peek_mut()
            .and_then(|scope| scope.binding_mut(idx))
            .ok_or_else(|| RoutingError::Internal(format!("no open scope for binding {}", idx)))
    }

    fn mark_shard_key(&mut self, idx: usize, display: &str) -> Result<()> {
        let column = display.rsplit('.').next().unwrap_or(display).to_lowercase();
        self.binding_mut(idx)?.shard_key = Some(column);
        Ok(())
    }

    fn reader(&self) -> ValueReader<'a> {
        ValueReader {
            sql: self.sql,
            scan: self.scan,
            params: self.params,
        }
    }

    fn on_equality(&mut self, key: &str, display: &str, right: &Expr) -> Result<()> {
        let Some(idx) = self.bound(key, display)? else {
            return Ok(());
        };
        if self.negation > 0 {
            return Err(self.unsupported(&format!("{} = {}", display, right), "it is under 'not'"));
        }
        self.mark_shard_key(idx, display)?;

        match self.reader().read(display, right)? {
            Extracted::Known(value, source) => {
                self.route_value(idx, &value)?;
                self.record_source(idx, RouteSource::Value(source))
            }
            Extracted::Unknown(param) => {
                log::debug!("Deferred routing of '{}': parameter {} is not bound", display, param);
                self.record_source(idx, RouteSource::Value(ValueSource::Param(param)))
            }
        }
    }

    fn on_in_list(&mut self, column: &ColumnRef, list: &[Expr], negated: bool) -> Result<()> {
        let Some(idx) = self.bound(&column.key, &column.display)? else {
            return Ok(());
        };
        if negated {
            return Err(RoutingError::UnsupportedExpression(format!(
                "shard key expression '{} NOT IN (..)' is not supported for it contains 'not', source sql is [{}]",
                column.display, self.sql
            )));
        }
        if self.negation > 0 {
            return Err(self.unsupported(&format!("{} IN (..)", column.display), "it is under 'not'"));
        }
        if list.is_empty() {
            return Err(RoutingError::UnsupportedExpression(format!(
                "shard key expression '{} IN ()' is not supported for the 'in' list is empty, source sql is [{}]",
                column.display, self.sql
            )));
        }
        self.mark_shard_key(idx, &column.display)?;

        let reader = self.reader();
        for item in list {
            match reader.read(&column.display, item)? {
                Extracted::Known(value, source) => {
                    self.route_value(idx, &value)?;
                    self.record_source(idx, RouteSource::Value(source))?;
                }
                Extracted::Unknown(param) => {
                    log::debug!(
                        "Deferred routing of '{}': parameter {} is not bound",
                        column.display,
                        param
                    );
                    self.record_source(idx, RouteSource::Value(ValueSource::Param(param)))?;
                }
            }
        }
        Ok(())
    }

    fn on_between(&mut self, column: &ColumnRef, negated: bool, low: &Expr, high: &Expr) -> Result<()> {
        let Some(idx) = self.bound(&column.key, &column.display)? else {
            return Ok(());
        };
        let text = format!("{} BETWEEN {} AND {}", column.display, low, high);
        if negated {
            return Err(self.unsupported(&format!("NOT {}", text), "it contains 'not'"));
        }
        if self.negation > 0 {
            return Err(self.unsupported(&text, "it is under 'not'"));
        }
        self.mark_shard_key(idx, &column.display)?;

        let reader = self.reader();
        let (low, low_source) = match reader.read(&column.display, low)? {
            Extracted::Known(value, source) => (Some(value), source),
            Extracted::Unknown(param) => (None, ValueSource::Param(param)),
        };
        let (high, high_source) = match reader.read(&column.display, high)? {
            Extracted::Known(value, source) => (Some(value), source),
            Extracted::Unknown(param) => (None, ValueSource::Param(param)),
        };
        let (Some(low), Some(high)) = (low, high) else {
            log::debug!("Deferred routing of '{}': a range bound is an unbound parameter", text);
            return self.record_source(
                idx,
                RouteSource::Range {
                    low: low_source,
                    high: high_source,
                },
            );
        };

        let (Some(low), Some(high)) = (low.as_i64(), high.as_i64()) else {
            return Err(self.unsupported(&text, "its bounds are not integers"));
        };
        if high < low {
            return Err(self.unsupported(&text, "its range is empty"));
        }
        let span = high as i128 - low as i128 + 1;
        if span > self.options.max_between_span as i128 {
            return Err(self.unsupported(
                &text,
                &format!(
                    "its range of {} values exceeds the limit of {}",
                    span, self.options.max_between_span
                ),
            ));
        }

        for value in low..=high {
            self.route_value(idx, &ShardValue::Int(value))?;
        }
        self.record_source(
            idx,
            RouteSource::Range {
                low: low_source,
                high: high_source,
            },
        )
    }

    /// Operators other than `=`, `IN` and `BETWEEN` cannot carry a shard key.
    fn reject_on_shard_key(&self, left: &Expr, op: &str, text: String) -> Result<()> {
        let Some(column) = ColumnRef::from_expr(left) else {
            return Ok(());
        };
        match self.scopes.resolve(&column.key) {
            Resolution::NotFound => Ok(()),
            Resolution::Bound(_) | Resolution::Ambiguous => {
                Err(self.unsupported(&text, &format!("operator '{}' cannot route shard key '{}'", op, column.display)))
            }
        }
    }

    fn unsupported(&self, text: &str, reason: &str) -> RoutingError {
        RoutingError::UnsupportedExpression(format!(
            "shard key expression '{}' is not supported for {}, source sql is [{}]",
            text, reason, self.sql
        ))
    }

    /// Route one value for a binding. With SQL routing disabled the value is
    /// only recorded.
    fn route_value(&mut self, idx: usize, value: &ShardValue) -> Result<()> {
        let (schema, table) = {
            let binding = self.binding_mut(idx)?;
            (binding.schema.clone(), binding.table.clone())
        };

        if self.overrides.is_sql_routing_disabled() {
            log::debug!(
                "SQL routing disabled: table '{}' shard value {} is not routed",
                table,
                value
            );
            return Ok(());
        }

        let route = self
            .rules
            .route(self.context, schema.as_deref(), &table, Some(value))?
            .ok_or_else(|| {
                RoutingError::RouteNotFound(format!(
                    "no route for table '{}' and shard value {}, source sql is [{}]",
                    table, value, self.sql
                ))
            })?;
        self.accept_route(idx, route, Some(value))
    }

    fn accept_route(&mut self, idx: usize, route: RouteInfo, value: Option<&ShardValue>) -> Result<()> {
        let sql = self.sql;
        let binding = self
            .scopes
            .peek_mut()
            .and_then(|scope| scope.binding_mut(idx))
            .ok_or_else(|| RoutingError::Internal(format!("no open scope for binding {}", idx)))?;

        if let Some(existing) = &binding.route {
            if existing.same_destination(&route) {
                return Ok(());
            }
            let value = value.map(ToString::to_string).unwrap_or_default();
            return Err(RoutingError::ConflictingRoute(format!(
                "table '{}' is routed to both '{}' and '{}' (shard value {}), source sql is [{}]",
                binding.table, existing, route, value, sql
            )));
        }

        log::debug!("Routed table '{}' to '{}'", binding.table, route);
        self.schemas.insert(route.schema().to_string());
        binding.route = Some(route);
        Ok(())
    }

    fn record_source(&mut self, idx: usize, source: RouteSource) -> Result<()> {
        if self.overrides.is_sql_routing_disabled() {
            return Ok(());
        }
        self.binding_mut(idx)?.sources.push(source);
        Ok(())
    }

    /// Pop the active scope, resolve its unconverted bindings through the
    /// default route and the override store, and return the rewrites.
    fn close_scope(&mut self) -> Result<Vec<Rewrite>> {
        let Some(scope) = self.scopes.pop() else {
            return Ok(Vec::new());
        };
        let kind = scope.kind();

        let mut rewrites = Vec::new();
        for mut binding in scope.into_bindings() {
            let route = match binding.route.take() {
                Some(route) => route,
                None => {
                    let route = self.fallback_route(&binding)?;
                    self.schemas.insert(route.schema().to_string());
                    // Default and override routes ignore parameter values
                    binding.sources.clear();
                    route
                }
            };

            let alias = (kind.keeps_table_alias()
                && binding.alias.is_none()
                && !route.table().eq_ignore_ascii_case(&binding.table)
                && self.scan.is_qualifier(&binding.table))
            .then(|| match binding.table_quote {
                Some(quote) => Ident::with_quote(quote, binding.table.clone()),
                None => Ident::new(binding.table.clone()),
            });

            rewrites.push(Rewrite {
                slot: binding.slot,
                route: route.clone(),
                alias,
            });
            self.routed.push(RoutedTable {
                schema: binding.schema,
                table: binding.table,
                route,
                sources: binding.sources,
            });
        }
        Ok(rewrites)
    }

    fn fallback_route(&self, binding: &TableBinding) -> Result<RouteInfo> {
        debug_assert!(!binding.is_converted());
        let schema = binding.schema.as_deref();

        if let Some(route) = self.rules.route(self.context, schema, &binding.table, None)? {
            log::debug!("Table '{}' resolved by its default route '{}'", binding.table, route);
            return Ok(route);
        }

        match self.overrides.route_override(schema, &binding.table) {
            Some(RouteOverride::Route(route)) => {
                log::debug!("Table '{}' resolved by override '{}'", binding.table, route);
                Ok(route)
            }
            Some(RouteOverride::Value(value)) => {
                log::debug!("Table '{}' routed by override value {}", binding.table, value);
                self.rules
                    .route(self.context, schema, &binding.table, Some(&value))?
                    .ok_or_else(|| {
                        RoutingError::RouteNotFound(format!(
                            "override value {} does not route table '{}', source sql is [{}]",
                            value, binding.table, self.sql
                        ))
                    })
            }
            None if binding.shard_key.is_none() => Err(RoutingError::RouteNotFound(format!(
                "No shard value was configured for shard key '{}' in sql [{}]",
                binding.shard_key_column(),
                self.sql
            ))),
            None => Err(RoutingError::RouteNotFound(format!(
                "SQL routing is disabled or the value of shard key '{}' could not be resolved, \
                 and no route override was registered for table '{}'; source sql is [{}]",
                binding.shard_key_column(),
                binding.table,
                self.sql
            ))),
        }
    }

    fn apply_to_factors(&self, factors: &mut [&mut TableFactor], rewrites: Vec<Rewrite>) {
        let default_schema = self.options.default_schema.as_deref();
        for rewrite in rewrites {
            let TableSlot::Factor(slot) = rewrite.slot else {
                continue;
            };
            if let Some(TableFactor::Table { name, alias, .. }) = factors.get_mut(slot).map(|f| &mut **f) {
                rename_table(name, &rewrite.route, default_schema);
                if let Some(table_alias) = rewrite.alias {
                    *alias = Some(TableAlias {
                        name: table_alias,
                        columns: Vec::new(),
                    });
                }
            }
        }
    }
}

/// A column reference on the left of a predicate.
struct ColumnRef {
    /// Lower-cased lookup key, `schema.alias.column` down to `column`
    key: String,
    /// As written
    display: String,
}

impl ColumnRef {
    fn from_expr(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Identifier(ident) => Some(Self {
                key: ident.value.to_lowercase(),
                display: ident.to_string(),
            }),
            Expr::CompoundIdentifier(parts) if !parts.is_empty() => {
                let tail = &parts[parts.len().saturating_sub(3)..];
                Some(Self {
                    key: tail
                        .iter()
                        .map(|part| part.value.to_lowercase())
                        .collect::<Vec<_>>()
                        .join("."),
                    display: parts.iter().map(ToString::to_string).collect::<Vec<_>>().join("."),
                })
            }
            _ => None,
        }
    }
}

fn expr_text(left: &Expr, op: &str, right: &Expr) -> String {
    format!("{} {} {}", left, op, right)
}

/// Every predicate attached to a join: its `ON` clause and, for `ASOF`
/// joins, the match condition.
fn join_conditions(operator: &mut JoinOperator) -> Vec<&mut Expr> {
    match operator {
        JoinOperator::AsOf {
            match_condition,
            constraint,
        } => {
            let mut conditions = vec![match_condition];
            conditions.extend(constraint_expr(constraint));
            conditions
        }
        JoinOperator::Join(constraint)
        | JoinOperator::Inner(constraint)
        | JoinOperator::Left(constraint)
        | JoinOperator::LeftOuter(constraint)
        | JoinOperator::Right(constraint)
        | JoinOperator::RightOuter(constraint)
        | JoinOperator::FullOuter(constraint)
        | JoinOperator::Semi(constraint)
        | JoinOperator::LeftSemi(constraint)
        | JoinOperator::RightSemi(constraint)
        | JoinOperator::Anti(constraint)
        | JoinOperator::LeftAnti(constraint)
        | JoinOperator::RightAnti(constraint) => constraint_expr(constraint).into_iter().collect(),
        JoinOperator::CrossJoin | JoinOperator::CrossApply | JoinOperator::OuterApply => Vec::new(),
    }
}

fn constraint_expr(constraint: &mut JoinConstraint) -> Option<&mut Expr> {
    match constraint {
        JoinConstraint::On(expr) => Some(expr),
        _ => None,
    }
}

#[allow(unreachable_patterns)]
fn part_ident(part: &ObjectNamePart) -> Option<&Ident> {
    match part {
        ObjectNamePart::Identifier(ident) => Some(ident),
        _ => None,
    }
}

#[allow(unreachable_patterns)]
fn part_ident_mut(part: &mut ObjectNamePart) -> Option<&mut Ident> {
    match part {
        ObjectNamePart::Identifier(ident) => Some(ident),
        _ => None,
    }
}

/// `(schema, table)` idents of a `[catalog.][schema.]table` name.
fn split_table_name(name: &ObjectName) -> Option<(Option<&Ident>, &Ident)> {
    let parts = &name.0;
    let table = parts.last().and_then(part_ident)?;
    let schema = match parts.len() {
        0 | 1 => None,
        len => Some(part_ident(&parts[len - 2])?),
    };
    Some((schema, table))
}

/// Write a physical destination into a table name. A name without schema is
/// qualified unless the destination is the default schema.
fn rename_table(name: &mut ObjectName, route: &RouteInfo, default_schema: Option<&str>) {
    let len = name.0.len();
    let mut quote = None;
    if let Some(table) = name.0.last_mut().and_then(part_ident_mut) {
        table.value = route.table().to_string();
        quote = table.quote_style;
    }

    if len >= 2 {
        if let Some(schema) = part_ident_mut(&mut name.0[len - 2]) {
            schema.value = route.schema().to_string();
        }
        return;
    }

    let is_default = default_schema.is_some_and(|schema| schema.eq_ignore_ascii_case(route.schema()));
    if !is_default {
        let schema = match quote {
            Some(quote) => Ident::with_quote(quote, route.schema()),
            None => Ident::new(route.schema()),
        };
        name.0.insert(0, ObjectNamePart::Identifier(schema));
    }
}

/// Table factors of `tables` in a fixed order: each relation, then its joins,
/// descending into nested joins. Derived tables are skipped.
fn table_factors(tables: &mut [TableWithJoins]) -> Vec<&mut TableFactor> {
    let mut factors = Vec::new();
    for table in tables.iter_mut() {
        collect_factors(table, &mut factors);
    }
    factors
}

fn collect_factors<'t>(table: &'t mut TableWithJoins, out: &mut Vec<&'t mut TableFactor>) {
    collect_factor(&mut table.relation, out);
    for join in table.joins.iter_mut() {
        collect_factor(&mut join.relation, out);
    }
}

fn collect_factor<'t>(factor: &'t mut TableFactor, out: &mut Vec<&'t mut TableFactor>) {
    if matches!(factor, TableFactor::Table { .. }) {
        out.push(factor);
    } else if let TableFactor::NestedJoin {
        table_with_joins, ..
    } = factor
    {
        collect_factors(table_with_joins, out);
    }
}

/// DELETE targets: the FROM tables followed by the USING tables.
fn delete_factors(delete: &mut Delete) -> Vec<&mut TableFactor> {
    let mut factors = match &mut delete.from {
        FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => table_factors(tables),
    };
    if let Some(using) = delete.using.as_mut() {
        factors.extend(table_factors(using));
    }
    factors
}

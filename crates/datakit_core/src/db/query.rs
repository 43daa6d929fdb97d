//! Predicate-based query facade over one table.
//!
//! # Responsibility
//! - Build `SELECT` / `DELETE` / `COUNT` statements from equality and
//!   inclusion predicates.
//! - Materialize rows as `FieldMap`s keyed by column name.
//!
//! # Invariants
//! - All identifiers are quoted; all values are bound parameters.
//! - An empty `IN` list matches nothing; an empty `NOT IN` list matches all.

use super::handle::StoreHandle;
use super::DbResult;
use crate::model::{FieldMap, FieldValue};
use log::debug;
use rusqlite::params_from_iter;
use std::time::Instant;

/// One conjunct of a query filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq(String, FieldValue),
    In(String, Vec<FieldValue>),
    NotIn(String, Vec<FieldValue>),
    IsNull(String),
}

/// Result ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Order {
    Asc(String),
    Desc(String),
}

/// Query under construction; executes on `get`, `first`, `delete` or `count`.
#[derive(Debug, Clone)]
pub struct Query {
    store: StoreHandle,
    table: String,
    predicates: Vec<Predicate>,
    columns: Option<Vec<String>>,
    order: Vec<Order>,
    limit: Option<u32>,
    offset: u32,
}

impl Query {
    pub(crate) fn new(store: StoreHandle, table: &str) -> Self {
        Self {
            store,
            table: table.to_string(),
            predicates: Vec::new(),
            columns: None,
            order: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn where_eq(self, column: &str, value: impl Into<FieldValue>) -> Self {
        self.filter(Predicate::Eq(column.to_string(), value.into()))
    }

    pub fn where_in(self, column: &str, values: impl IntoIterator<Item = FieldValue>) -> Self {
        self.filter(Predicate::In(column.to_string(), values.into_iter().collect()))
    }

    pub fn where_not_in(self, column: &str, values: impl IntoIterator<Item = FieldValue>) -> Self {
        self.filter(Predicate::NotIn(
            column.to_string(),
            values.into_iter().collect(),
        ))
    }

    pub fn where_null(self, column: &str) -> Self {
        self.filter(Predicate::IsNull(column.to_string()))
    }

    /// Restricts selected columns; `None` selects all.
    pub fn select(mut self, columns: Option<Vec<String>>) -> Self {
        self.columns = columns;
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    /// Orders newest first by `column`.
    pub fn latest(self, column: &str) -> Self {
        self.order_by(Order::Desc(column.to_string()))
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Returns every matching row.
    pub fn get(&self) -> DbResult<Vec<FieldMap>> {
        let started_at = Instant::now();
        let (sql, binds) = self.select_sql(self.limit);
        let rows = self.store.with_connection(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();

            let mut rows = stmt.query(params_from_iter(binds.iter()))?;
            let mut found = Vec::new();
            while let Some(row) = rows.next()? {
                let mut fields = FieldMap::new();
                for (index, name) in names.iter().enumerate() {
                    fields.insert(name.clone(), FieldValue::from(row.get_ref(index)?));
                }
                found.push(fields);
            }
            Ok(found)
        })?;

        debug!(
            "event=query_get module=db status=ok table={} rows={} duration_ms={}",
            self.table,
            rows.len(),
            started_at.elapsed().as_millis()
        );
        Ok(rows)
    }

    /// Returns the first matching row.
    pub fn first(&self) -> DbResult<Option<FieldMap>> {
        let mut single = self.clone();
        single.limit = Some(1);
        Ok(single.get()?.into_iter().next())
    }

    /// Deletes every matching row; selection, order and paging are ignored.
    pub fn delete(&self) -> DbResult<usize> {
        let (filter, binds) = self.where_sql();
        let sql = format!("DELETE FROM {}{filter};", quote_identifier(&self.table));
        let deleted = self
            .store
            .with_connection(|conn| conn.execute(&sql, params_from_iter(binds.iter())))?;

        debug!(
            "event=query_delete module=db status=ok table={} rows={}",
            self.table, deleted
        );
        Ok(deleted)
    }

    /// Counts matching rows; paging is ignored.
    pub fn count(&self) -> DbResult<u64> {
        let (filter, binds) = self.where_sql();
        let sql = format!(
            "SELECT COUNT(*) FROM {}{filter};",
            quote_identifier(&self.table)
        );
        let count = self.store.with_connection(|conn| {
            conn.query_row(&sql, params_from_iter(binds.iter()), |row| {
                row.get::<_, i64>(0)
            })
        })?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn select_sql(&self, limit: Option<u32>) -> (String, Vec<FieldValue>) {
        let columns = match &self.columns {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .map(|column| quote_identifier(column))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        };
        let (filter, mut binds) = self.where_sql();
        let mut sql = format!(
            "SELECT {columns} FROM {}{filter}",
            quote_identifier(&self.table)
        );

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|order| match order {
                    Order::Asc(column) => format!("{} ASC", quote_identifier(column)),
                    Order::Desc(column) => format!("{} DESC", quote_identifier(column)),
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }

        match limit {
            Some(limit) => {
                sql.push_str(" LIMIT ?");
                binds.push(FieldValue::from(limit));
                if self.offset > 0 {
                    sql.push_str(" OFFSET ?");
                    binds.push(FieldValue::from(self.offset));
                }
            }
            None if self.offset > 0 => {
                sql.push_str(" LIMIT -1 OFFSET ?");
                binds.push(FieldValue::from(self.offset));
            }
            None => {}
        }

        sql.push(';');
        (sql, binds)
    }

    fn where_sql(&self) -> (String, Vec<FieldValue>) {
        if self.predicates.is_empty() {
            return (String::new(), Vec::new());
        }

        let mut binds = Vec::new();
        let clauses = self
            .predicates
            .iter()
            .map(|predicate| match predicate {
                Predicate::Eq(column, value) => {
                    binds.push(value.clone());
                    format!("{} = ?", quote_identifier(column))
                }
                Predicate::In(_, values) if values.is_empty() => "0 = 1".to_string(),
                Predicate::In(column, values) => {
                    binds.extend(values.iter().cloned());
                    format!("{} IN ({})", quote_identifier(column), placeholders(values.len()))
                }
                Predicate::NotIn(_, values) if values.is_empty() => "1 = 1".to_string(),
                Predicate::NotIn(column, values) => {
                    binds.extend(values.iter().cloned());
                    format!(
                        "{} NOT IN ({})",
                        quote_identifier(column),
                        placeholders(values.len())
                    )
                }
                Predicate::IsNull(column) => format!("{} IS NULL", quote_identifier(column)),
            })
            .collect::<Vec<_>>()
            .join(" AND ");

        (format!(" WHERE {clauses}"), binds)
    }
}

/// Quotes one SQL identifier, doubling embedded quotes.
pub(crate) fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

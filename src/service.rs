//! Command orchestration
//!
//! [`Service`] runs find/get/create/update/patch/remove as short chains:
//! validate, stamp derived fields, run hooks, compile, execute, then
//! re-fetch, because writes never return the rows they touched.

use chrono::{SecondsFormat, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::classify;
use crate::key::{display_id, ids_query, row_key};
use crate::lifecycle::{hook_options, HookContext, HookStage};
use crate::query::reconcile::reconcile;
use crate::query::{apply_filters, compile, normalize, resolve, CompiledPredicate, MaterializedView, Paginate, Statement};
use crate::schema::{IdField, Schema};
use crate::storage::{Driver, DriverCell, ResultSet, Row};
use crate::validation::{validate, ValidationMode};
use crate::{Error, Result};
use cqlq::{Controls, ParseOptions, Query, SelectItem};

/// Service options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Splits string identifiers of composite keys
    #[serde(default = "default_separator")]
    pub id_separator: String,
    #[serde(default)]
    pub paginate: Paginate,
    /// Custom event names, passed through untouched
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub materialized_views: Vec<MaterializedView>,
    /// Extra `$` keys accepted in queries
    #[serde(default)]
    pub whitelist: Vec<String>,
}

fn default_separator() -> String {
    ",".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            id_separator: default_separator(),
            paginate: Paginate::default(),
            events: Vec::new(),
            materialized_views: Vec::new(),
            whitelist: Vec::new(),
        }
    }
}

impl ServiceConfig {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.id_separator = separator.into();
        self
    }

    pub fn with_paginate(mut self, paginate: Paginate) -> Self {
        self.paginate = paginate;
        self
    }

    pub fn with_view(mut self, view: MaterializedView) -> Self {
        self.materialized_views.push(view);
        self
    }

    pub fn with_whitelist(mut self, keys: &[&str]) -> Self {
        self.whitelist.extend(keys.iter().map(|k| k.to_string()));
        self
    }
}

/// Per-call parameters
#[derive(Debug, Clone, Default)]
pub struct Params {
    pub query: Map<String, Value>,
    /// Overrides the service page size policy for this call
    pub paginate: Option<Paginate>,
}

impl Params {
    /// Params carrying a query object; anything else is treated as empty
    pub fn query(query: Value) -> Self {
        Self {
            query: match query {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            paginate: None,
        }
    }

    pub fn with_paginate(mut self, paginate: Paginate) -> Self {
        self.paginate = Some(paginate);
        self
    }

    fn flag(&self, key: &str) -> bool {
        self.query.get(key).map_or(false, cqlq::truthy)
    }
}

/// One page of a paginated find
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub data: Vec<Row>,
}

/// Result of [`Service::find`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FindResult {
    Rows(Vec<Row>),
    Page(Page),
}

impl FindResult {
    pub fn data(&self) -> &[Row] {
        match self {
            FindResult::Rows(rows) => rows,
            FindResult::Page(page) => &page.data,
        }
    }

    pub fn into_data(self) -> Vec<Row> {
        match self {
            FindResult::Rows(rows) => rows,
            FindResult::Page(page) => page.data,
        }
    }
}

/// Builds a [`Service`]
#[derive(Default)]
pub struct ServiceBuilder {
    model: Option<Schema>,
    config: ServiceConfig,
    driver: Option<Arc<dyn Driver>>,
}

impl ServiceBuilder {
    pub fn model(mut self, schema: Schema) -> Self {
        self.model = Some(schema);
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn build(self) -> Result<Service> {
        let schema = self
            .model
            .ok_or_else(|| Error::GeneralError("You must provide a model".to_string()))?;

        let driver = DriverCell::new();
        if let Some(d) = self.driver {
            driver.bind(d);
        }

        // Random node id with the multicast bit set, as for v1 uuids
        // generated without a hardware address
        let bytes = uuid::Uuid::new_v4().into_bytes();
        let node = [bytes[0] | 0x01, bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]];

        Ok(Service {
            schema,
            config: self.config,
            driver,
            node,
        })
    }
}

/// CRUD-plus-query service over one table
pub struct Service {
    schema: Schema,
    config: ServiceConfig,
    driver: DriverCell,
    node: [u8; 6],
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("table", &self.schema.table_name)
            .field("config", &self.config)
            .field("driver", &self.driver)
            .finish()
    }
}

impl Service {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::default()
    }

    /// Bind (or swap) the driver used by every call
    pub fn bind(&self, driver: Arc<dyn Driver>) {
        self.driver.bind(driver);
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn events(&self) -> &[String] {
        &self.config.events
    }

    // =========================================================================
    // find / get
    // =========================================================================

    /// Rows matching `params.query`; a `{total, limit, data}` page when a
    /// default page size is in force
    pub async fn find(&self, params: &Params) -> Result<FindResult> {
        let paginate = params.paginate.unwrap_or(self.config.paginate);
        let page = self.find_page(&params.query, &paginate, paginate.is_active()).await?;

        Ok(if paginate.is_active() {
            FindResult::Page(page)
        } else {
            FindResult::Rows(page.data)
        })
    }

    /// The single row identified by `id`
    pub async fn get(&self, id: &Value, params: &Params) -> Result<Row> {
        let mut query = params.query.clone();
        query.extend(self.ids_query(Some(id), None)?);

        let rows = self.find_page(&query, &Paginate::default(), false).await?.data;
        single(rows, id)
    }

    /// Select the statement for a query, building an optional count first
    async fn find_page(&self, raw: &Map<String, Value>, paginate: &Paginate, count: bool) -> Result<Page> {
        let query = normalize(raw, paginate, &self.parse_options())?;
        let controls = &query.controls;

        let mut predicate = compile(&query, &self.schema);
        let view = resolve(&predicate.columns(), &self.config.materialized_views);
        if let Some(view) = view {
            tracing::debug!(table = %self.schema.table_name, view, "routing query to materialized view");
        }
        apply_filters(&mut predicate, &controls.filters, &self.schema);

        let total = if count {
            let mut stmt = self.table_statement(Statement::count, view).with_predicate(predicate.clone());
            stmt.allow_filtering = controls.allow_filtering;
            let result = self.execute(&stmt).await?;
            Some(
                result
                    .rows
                    .first()
                    .and_then(|row| row.get("count"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            )
        } else {
            None
        };

        if controls.limit == Some(0) {
            return Ok(Page {
                total,
                limit: Some(0),
                data: Vec::new(),
            });
        }

        let mut stmt = self.table_statement(Statement::select, view).with_predicate(predicate);
        stmt.select = controls.select.as_ref().map(|items| self.with_id_columns(items));
        stmt.order_by = controls.sort.clone();
        stmt.limit = controls.limit;
        stmt.per_partition_limit = controls.limit_per_partition;
        stmt.allow_filtering = controls.allow_filtering;

        let rows = self.execute(&stmt).await?.rows;
        Ok(Page {
            total,
            limit: controls.limit,
            data: rows,
        })
    }

    // =========================================================================
    // create
    // =========================================================================

    /// Insert one record, or each record of an array
    pub async fn create(&self, data: Value, params: &Params) -> Result<Value> {
        match data {
            Value::Array(items) => {
                let records = items.into_iter().map(into_record).collect::<Result<Vec<_>>>()?;
                let rows = if params.flag("$batch") {
                    self.create_batch(records, params).await?
                } else {
                    try_join_all(records.into_iter().map(|record| self.create_one(record, params))).await?
                };
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }
            other => Ok(Value::Object(self.create_one(into_record(other)?, params).await?)),
        }
    }

    async fn create_one(&self, data: Row, params: &Params) -> Result<Row> {
        let modifiers = self.write_modifiers(&params.query)?;
        let options = hook_options(&params.query);
        let data = self.prepare_insert(data, params, &options)?;

        let stmt = self.insert_statement(&data, &modifiers);
        let result = self.execute(&stmt).await?;
        if !result.applied() {
            tracing::debug!(table = %self.schema.table_name, "insert skipped, row already exists");
        }

        self.run_hook(HookStage::AfterSave, params, Some(&data), &options, None)?;

        if modifiers.controls.no_select {
            return Ok(data);
        }
        self.get(&self.key_of(&data), &self.read_params(params)).await
    }

    async fn create_batch(&self, records: Vec<Row>, params: &Params) -> Result<Vec<Row>> {
        let driver = self.driver.get()?;
        if !driver.supports_batch() {
            return Err(Error::NotImplemented(
                "Batch create requires a batch-capable driver".to_string(),
            ));
        }

        let modifiers = self.write_modifiers(&params.query)?;
        let options = hook_options(&params.query);

        let prepared = records
            .into_iter()
            .map(|data| self.prepare_insert(data, params, &options))
            .collect::<Result<Vec<_>>>()?;
        let statements: Vec<Statement> = prepared.iter().map(|d| self.insert_statement(d, &modifiers)).collect();

        tracing::debug!(table = %self.schema.table_name, statements = statements.len(), "executing batch");
        driver.batch(&statements).await.map_err(classify)?;

        for data in &prepared {
            self.run_hook(HookStage::AfterSave, params, Some(data), &options, None)?;
        }

        if modifiers.controls.no_select {
            return Ok(prepared);
        }
        let read = self.read_params(params);
        try_join_all(prepared.iter().map(|d| {
            let id = self.key_of(d);
            let read = &read;
            async move { self.get(&id, read).await }
        }))
        .await
    }

    fn prepare_insert(&self, mut data: Row, params: &Params, options: &Map<String, Value>) -> Result<Row> {
        validate(&self.schema, &data, ValidationMode::Create)?;
        self.stamp(&mut data, true);
        self.run_hook(HookStage::BeforeSave, params, Some(&data), options, None)?;
        Ok(data)
    }

    fn insert_statement(&self, data: &Row, modifiers: &Query) -> Statement {
        let mut stmt = Statement::insert(&self.schema.keyspace, &self.schema.table_name, data);
        stmt.predicate.if_not_exists = modifiers.if_not_exists();
        stmt.ttl = modifiers.controls.ttl;
        stmt.timestamp = modifiers.controls.timestamp;
        stmt
    }

    // =========================================================================
    // update
    // =========================================================================

    /// Replace every non-key column of the row identified by `id`
    pub async fn update(&self, id: &Value, data: Value, params: &Params) -> Result<Row> {
        let mut data = match data {
            Value::Array(_) => {
                return Err(Error::BadRequest(
                    "Not replacing multiple records. Did you mean `patch`?".to_string(),
                ))
            }
            other => into_record(other)?,
        };

        validate(&self.schema, &data, ValidationMode::Update)?;
        self.stamp(&mut data, false);

        let options = hook_options(&params.query);
        self.run_hook(HookStage::BeforeUpdate, params, Some(&data), &options, Some(id))?;

        let modifiers = self.write_modifiers(&params.query)?;
        let ids = self.ids_query(Some(id), None)?;

        let old = if modifiers.controls.no_select {
            None
        } else {
            Some(self.get(id, &Params::default()).await?)
        };

        let created_at = self.schema.created_at_field();
        let id_field = self.schema.id_field();

        let mut columns: Vec<String> = self.schema.fields.keys().cloned().collect();
        if let Some(old) = &old {
            columns.extend(old.keys().filter(|k| !self.schema.fields.contains_key(*k)).cloned());
        }

        let mut replacement = Row::new();
        for column in columns {
            if id_field.contains(&column) {
                continue;
            }
            match data.get(&column) {
                Some(value) => {
                    replacement.insert(column, value.clone());
                }
                None if created_at.as_deref() == Some(column.as_str()) => {}
                None => {
                    replacement.insert(column, Value::Null);
                }
            }
        }

        let assignments = cqlq::parse_data(&replacement);
        for assignment in &assignments {
            if let cqlq::Assignment::Delta { column, .. } = assignment {
                replacement.remove(column);
            }
        }

        let stmt = self.update_statement(assignments, key_predicate(&ids), &modifiers.controls);
        self.execute(&stmt).await?;

        if let (Some(field), Some(old)) = (&created_at, &old) {
            if replacement.get(field).map_or(true, Value::is_null) {
                replacement.insert(field.clone(), old.get(field).cloned().unwrap_or(Value::Null));
            }
        }
        replacement.extend(ids);
        if let Some(old) = &old {
            reconcile(&self.schema, &data, old, &mut replacement);
        }

        let result = match &modifiers.controls.select {
            Some(items) => items
                .iter()
                .map(|item| {
                    let alias = item.alias();
                    let value = replacement.get(&alias).cloned().unwrap_or(Value::Null);
                    (alias, value)
                })
                .collect(),
            None => replacement,
        };

        self.run_hook(HookStage::AfterUpdate, params, Some(&result), &options, Some(id))?;
        Ok(result)
    }

    // =========================================================================
    // patch
    // =========================================================================

    /// Update the supplied fields of the row identified by `id`, or of every
    /// row matching `params.query` when `id` is `None`
    pub async fn patch(&self, id: Option<&Value>, data: Value, params: &Params) -> Result<Value> {
        let mut data = into_record(data)?;
        validate(&self.schema, &data, ValidationMode::Patch)?;
        self.stamp(&mut data, false);

        let options = hook_options(&params.query);
        self.run_hook(HookStage::BeforeUpdate, params, Some(&data), &options, id)?;

        let mut changes = data.clone();
        let id_field = self.schema.id_field();
        changes.retain(|column, _| !id_field.contains(column));
        let assignments = cqlq::parse_data(&changes);
        if assignments.is_empty() {
            return Err(Error::BadRequest("No fields to update".to_string()));
        }

        let id = id.filter(|v| !v.is_null());
        let result = match id {
            Some(id) => {
                let mut raw = params.query.clone();
                self.promote_conditions(&mut raw);
                raw.extend(self.ids_query(Some(id), None)?);

                let query = cqlq::parse(&raw, &self.parse_options())?;
                let predicate = compile(&query, &self.schema);
                let stmt = self.update_statement(assignments, predicate, &query.controls);
                let outcome = self.execute(&stmt).await?;
                if !outcome.applied() {
                    tracing::debug!(table = %self.schema.table_name, "conditional patch not applied");
                }

                self.run_hook(HookStage::AfterUpdate, params, Some(&data), &options, Some(id))?;
                if query.controls.no_select {
                    return Ok(Value::Object(Map::new()));
                }
                Value::Object(self.get(id, &self.read_params(params)).await?)
            }

            None => {
                let modifiers = self.write_modifiers(&params.query)?;
                let guard = compile(&modifiers, &self.schema);
                let affected = self.affected_keys(&params.query).await?;
                if affected.is_empty() {
                    return Err(Error::not_found("null"));
                }

                try_join_all(affected.iter().map(|key| {
                    let predicate = self.key_tuple_predicate(key, &guard);
                    let stmt = self.update_statement(assignments.clone(), predicate, &modifiers.controls);
                    async move { self.execute(&stmt).await }
                }))
                .await?;

                self.run_hook(HookStage::AfterUpdate, params, Some(&data), &options, None)?;
                if modifiers.controls.no_select {
                    return Ok(Value::Object(Map::new()));
                }
                Value::Array(
                    self.refetch(&affected, params)
                        .await?
                        .into_iter()
                        .map(Value::Object)
                        .collect(),
                )
            }
        };

        Ok(result)
    }

    /// Move plain filter keys into an `$if` clause when none was given
    fn promote_conditions(&self, query: &mut Map<String, Value>) {
        if query.contains_key("$if") {
            return;
        }
        let id_field = self.schema.id_field();
        let promoted: Vec<String> = query
            .keys()
            .filter(|k| !k.starts_with(cqlq::OPERATOR_MARKER) && !id_field.contains(k))
            .cloned()
            .collect();
        if promoted.is_empty() {
            return;
        }

        let mut conditions = Map::new();
        for key in promoted {
            if let Some(value) = query.remove(&key) {
                conditions.insert(key, value);
            }
        }
        query.insert("$if".to_string(), Value::Object(conditions));
    }

    // =========================================================================
    // remove
    // =========================================================================

    /// Delete the row identified by `id`, or every row matching
    /// `params.query` when `id` is `None`; returns what was removed
    pub async fn remove(&self, id: Option<&Value>, params: &Params) -> Result<Value> {
        let options = hook_options(&params.query);
        let id = id.filter(|v| !v.is_null());
        self.run_hook(HookStage::BeforeDelete, params, None, &options, id)?;

        let no_select = params.flag("$noSelect");

        match id {
            Some(id) => {
                let mut raw = params.query.clone();
                raw.extend(self.ids_query(Some(id), None)?);

                let items = if no_select {
                    Vec::new()
                } else {
                    self.find_page(&raw, &Paginate::default(), false).await?.data
                };

                let query = cqlq::parse(&raw, &self.parse_options())?;
                let mut stmt = self
                    .table_statement(Statement::delete, None)
                    .with_predicate(compile(&query, &self.schema));
                stmt.timestamp = query.controls.timestamp;
                self.execute(&stmt).await?;

                self.run_hook(HookStage::AfterDelete, params, None, &options, Some(id))?;
                if no_select {
                    return Ok(Value::Object(Map::new()));
                }
                single(items, id).map(Value::Object)
            }

            None => {
                let modifiers = self.write_modifiers(&params.query)?;
                let guard = compile(&modifiers, &self.schema);
                let rows = self.find_page(&params.query, &Paginate::default(), false).await?.data;
                let keys = distinct_keys(&self.schema, &rows);

                try_join_all(keys.iter().map(|key| {
                    let mut stmt = self
                        .table_statement(Statement::delete, None)
                        .with_predicate(self.key_tuple_predicate(key, &guard));
                    stmt.timestamp = modifiers.controls.timestamp;
                    async move { self.execute(&stmt).await }
                }))
                .await?;

                self.run_hook(HookStage::AfterDelete, params, None, &options, None)?;
                if no_select {
                    return Ok(Value::Object(Map::new()));
                }
                Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
            }
        }
    }

    // =========================================================================
    // helpers
    // =========================================================================

    async fn execute(&self, stmt: &Statement) -> Result<ResultSet> {
        let driver = self.driver.get()?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let (cql, values) = stmt.to_cql();
            tracing::debug!(table = %stmt.table, %cql, params = values.len(), "executing statement");
        }
        driver.execute(stmt).await.map_err(classify)
    }

    fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            whitelist: self.config.whitelist.clone(),
        }
    }

    fn ids_query(&self, id: Option<&Value>, id_list: Option<&[Vec<Value>]>) -> Result<Map<String, Value>> {
        ids_query(&self.schema, &self.config.id_separator, id, id_list)
    }

    fn table_statement(&self, make: fn(&str, &str) -> Statement, view: Option<&str>) -> Statement {
        let stmt = make(&self.schema.keyspace, &self.schema.table_name);
        match view {
            Some(view) => stmt.from_view(view),
            None => stmt,
        }
    }

    fn update_statement(
        &self,
        assignments: Vec<cqlq::Assignment>,
        predicate: CompiledPredicate,
        controls: &Controls,
    ) -> Statement {
        let mut stmt = Statement::update(&self.schema.keyspace, &self.schema.table_name, assignments)
            .with_predicate(predicate);
        stmt.ttl = controls.ttl;
        stmt.timestamp = controls.timestamp;
        stmt
    }

    /// Only the `$`-keys of a query: write modifiers and conditions
    fn write_modifiers(&self, query: &Map<String, Value>) -> Result<Query> {
        let modifiers: Map<String, Value> = query
            .iter()
            .filter(|(k, _)| k.starts_with(cqlq::OPERATOR_MARKER))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(cqlq::parse(&modifiers, &self.parse_options())?)
    }

    /// Params for re-reading rows after a write: only `$select` survives
    fn read_params(&self, params: &Params) -> Params {
        let mut query = Map::new();
        if let Some(select) = params.query.get("$select") {
            query.insert("$select".to_string(), select.clone());
        }
        Params { query, paginate: None }
    }

    fn with_id_columns(&self, items: &[SelectItem]) -> Vec<SelectItem> {
        let mut items = items.to_vec();
        for column in self.schema.key_columns() {
            let item = SelectItem::Column(column);
            if !items.contains(&item) {
                items.push(item);
            }
        }
        items
    }

    /// Identifier of a row as accepted by [`Service::get`]
    fn key_of(&self, row: &Row) -> Value {
        match self.schema.id_field() {
            IdField::Single(column) => row.get(&column).cloned().unwrap_or(Value::Null),
            IdField::Composite(_) => Value::Array(row_key(&self.schema, row)),
        }
    }

    /// Predicate naming one row by its full key, keeping the write
    /// conditions (`IF`, `IF EXISTS`) of `guard`
    fn key_tuple_predicate(&self, key: &[Value], guard: &CompiledPredicate) -> CompiledPredicate {
        let mut predicate = CompiledPredicate {
            conditions: guard.conditions.clone(),
            if_exists: guard.if_exists,
            if_not_exists: guard.if_not_exists,
            ..CompiledPredicate::default()
        };
        for (column, value) in self.schema.key_columns().into_iter().zip(key) {
            predicate.where_eq(column, value.clone());
        }
        predicate
    }

    async fn affected_keys(&self, query: &Map<String, Value>) -> Result<Vec<Vec<Value>>> {
        let rows = self.find_page(query, &Paginate::default(), false).await?.data;
        Ok(distinct_keys(&self.schema, &rows))
    }

    /// Re-read the rows behind `keys`, dropping rows the per-column `$in`
    /// lists pick up that were never touched
    async fn refetch(&self, keys: &[Vec<Value>], params: &Params) -> Result<Vec<Row>> {
        let columns = self.schema.key_columns();
        let id_list: Vec<Vec<Value>> = (0..columns.len())
            .map(|i| {
                let mut seen: Vec<Value> = Vec::new();
                for key in keys {
                    if let Some(v) = key.get(i) {
                        if !seen.contains(v) {
                            seen.push(v.clone());
                        }
                    }
                }
                seen
            })
            .collect();

        let mut query = self.read_params(params).query;
        query.extend(self.ids_query(None, Some(&id_list))?);

        let wanted: BTreeSet<String> = keys.iter().map(|k| display_id(k, "\u{1f}")).collect();
        let rows = self.find_page(&query, &Paginate::default(), false).await?.data;
        Ok(rows
            .into_iter()
            .filter(|row| wanted.contains(&display_id(&row_key(&self.schema, row), "\u{1f}")))
            .collect())
    }

    fn stamp(&self, data: &mut Row, created: bool) {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        if created {
            if let Some(field) = self.schema.created_at_field() {
                data.insert(field, Value::String(now.clone()));
            }
        }
        if let Some(field) = self.schema.updated_at_field() {
            data.insert(field, Value::String(now));
        }
        if let Some(field) = self.schema.version_field() {
            data.insert(field, Value::String(uuid::Uuid::now_v1(&self.node).to_string()));
        }
    }

    fn run_hook(
        &self,
        stage: HookStage,
        params: &Params,
        data: Option<&Row>,
        options: &Map<String, Value>,
        id: Option<&Value>,
    ) -> Result<()> {
        self.schema.hooks.run(&HookContext {
            stage,
            query: &params.query,
            data,
            options,
            id,
        })
    }
}

fn into_record(data: Value) -> Result<Row> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(Error::BadRequest("Data must be an object".to_string())),
    }
}

fn single(mut rows: Vec<Row>, id: &Value) -> Result<Row> {
    if rows.len() == 1 {
        Ok(rows.remove(0))
    } else {
        let id = match id {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Err(Error::not_found(id))
    }
}

fn key_predicate(ids: &Map<String, Value>) -> CompiledPredicate {
    let mut predicate = CompiledPredicate::default();
    for (column, value) in ids {
        predicate.where_eq(column.clone(), value.clone());
    }
    predicate
}

fn distinct_keys(schema: &Schema, rows: &[Row]) -> Vec<Vec<Value>> {
    let mut keys: Vec<Vec<Value>> = Vec::new();
    for row in rows {
        let key = row_key(schema, row);
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    keys
}

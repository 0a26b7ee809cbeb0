//! Result sets: typed, append-only tables of experimental results
//!
//! A result set is one "page" of a notebook: a columnar table of records
//! sharing an evolving schema, plus a table of pending jobs submitted but
//! not yet resolved. The schema is inferred incrementally from the
//! records added to the set. Field additions are monotonic — once a field
//! is known it persists, and rows that predate it are back-filled with
//! the field type's zero value.
//!
//! Records are immutable once added. A finished set cancels its pending
//! jobs and locks against all further mutation.

use std::collections::BTreeMap;

use chrono::Utc;
use log::info;

use sweeplab_core::error::{Error, Result};
use sweeplab_core::record::{meta, Results, ResultsRecord};
use sweeplab_core::value::{FieldMap, Point, StorageType, Value};

/// Reserved column name for job identifiers in the pending table.
pub const JOB_ID: &str = "job_id";

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: StorageType,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: StorageType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// The three record sections, in canonical column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Metadata,
    Parameters,
    ExperimentalResults,
}

/// Ordered field list for one section. `None` until the section has been
/// observed at least once, which is distinct from known-and-empty.
#[derive(Debug, Clone, Default)]
struct SectionSchema {
    fields: Option<Vec<Field>>,
}

impl SectionSchema {
    fn known(&self) -> bool {
        self.fields.is_some()
    }

    fn fields(&self) -> &[Field] {
        self.fields.as_deref().unwrap_or(&[])
    }

    fn get(&self, name: &str) -> Option<&StorageType> {
        self.fields()
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.ty)
    }
}

/// A detached tabular copy of query results. Edits to a table never
/// affect the result set it came from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    fields: Vec<Field>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// The cell at the given row for the named field.
    pub fn value(&self, row: usize, name: &str) -> Option<&Value> {
        let col = self.fields.iter().position(|f| f.name == name)?;
        self.rows.get(row)?.get(col)
    }

    /// All cells of the named column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let col = self.fields.iter().position(|f| f.name == name)?;
        Some(self.rows.iter().map(|r| &r[col]).collect())
    }
}

/// A typed, append-only table of results records plus its pending-job
/// table.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    description: String,
    attributes: BTreeMap<String, String>,

    metadata: SectionSchema,
    parameters: SectionSchema,
    results: SectionSchema,

    meta_columns: BTreeMap<String, Vec<Value>>,
    param_columns: BTreeMap<String, Vec<Value>>,
    result_columns: BTreeMap<String, Vec<Value>>,
    nrows: usize,

    pending_columns: BTreeMap<String, Vec<Value>>,
    pending_jobs: Vec<String>,

    dirty: bool,
    type_changed: bool,
    locked: bool,
}

impl ResultSet {
    /// Create an empty result set. The description defaults to a
    /// datestamp when not provided.
    pub fn new(description: Option<&str>) -> Self {
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| format!("Results collected on {}", Utc::now().to_rfc3339()));
        Self {
            description,
            ..Default::default()
        }
    }

    // ---- description and attributes ----

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: &str) -> Result<()> {
        self.assert_unlocked()?;
        self.description = description.to_string();
        self.dirty = true;
        Ok(())
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        self.assert_unlocked()?;
        self.attributes.insert(key.to_string(), value.into());
        self.dirty = true;
        Ok(())
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn delete_attribute(&mut self, key: &str) -> Result<()> {
        self.assert_unlocked()?;
        self.attributes.remove(key);
        self.dirty = true;
        Ok(())
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    // ---- locking ----

    /// Cancel every pending job (each leaves a cancellation record) and
    /// lock the set against further mutation.
    pub fn finish(&mut self) -> Result<()> {
        if !self.locked {
            for job in self.pending_results() {
                self.cancel_single_pending_result(&job)?;
            }
            self.locked = true;
            self.dirty = true;
        }
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    fn assert_unlocked(&self) -> Result<()> {
        if self.locked {
            return Err(Error::ResultSetLocked);
        }
        Ok(())
    }

    // ---- dirtiness ----

    /// Whether the set has changes a persistent notebook needs to write.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Whether the schema has changed since the last commit, requiring a
    /// persistent backend to rebuild the set's storage.
    pub fn is_type_changed(&self) -> bool {
        self.type_changed
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
        self.type_changed = false;
    }

    // ---- schema ----

    pub fn metadata_names(&self) -> Vec<String> {
        self.metadata.fields().iter().map(|f| f.name.clone()).collect()
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters
            .fields()
            .iter()
            .map(|f| f.name.clone())
            .collect()
    }

    pub fn result_names(&self) -> Vec<String> {
        self.results.fields().iter().map(|f| f.name.clone()).collect()
    }

    pub fn metadata_schema(&self) -> Option<&[Field]> {
        self.metadata.fields.as_deref()
    }

    pub fn parameter_schema(&self) -> Option<&[Field]> {
        self.parameters.fields.as_deref()
    }

    pub fn result_schema(&self) -> Option<&[Field]> {
        self.results.fields.as_deref()
    }

    /// Pre-declare the schema before any record arrives, fixing the
    /// field types up front.
    pub fn set_schema(
        &mut self,
        metadata: Vec<Field>,
        parameters: Vec<Field>,
        results: Vec<Field>,
    ) -> Result<()> {
        self.assert_unlocked()?;
        if self.nrows > 0 || !self.pending_jobs.is_empty() {
            return Err(Error::ResultsStructure(
                "cannot re-declare the schema of a non-empty result set".into(),
            ));
        }
        self.meta_columns = metadata.iter().map(|f| (f.name.clone(), Vec::new())).collect();
        self.param_columns = parameters
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();
        self.result_columns = results.iter().map(|f| (f.name.clone(), Vec::new())).collect();
        self.pending_columns = parameters
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();
        self.metadata.fields = Some(metadata);
        self.parameters.fields = Some(parameters);
        self.results.fields = Some(results);
        self.type_changed = true;
        self.dirty = true;
        Ok(())
    }

    // ---- schema inference ----

    /// Extend a section with newly observed fields. New columns are
    /// back-filled with zero values across existing rows.
    fn extend_section(&mut self, section: Section, observed: &FieldMap) -> Result<()> {
        let schema = match section {
            Section::Metadata => &self.metadata,
            Section::Parameters => &self.parameters,
            Section::ExperimentalResults => &self.results,
        };

        let first_time = !schema.known();
        let mut added: Vec<Field> = Vec::new();

        // the standard metadata fields are always captured, typed from
        // the canonical list rather than the observed values
        if section == Section::Metadata && first_time {
            for name in meta::STANDARD_FIELDS {
                let ty = meta::standard_type(name).expect("standard field has a type");
                added.push(Field::new(name, ty));
            }
        }

        for (name, value) in observed {
            if schema.get(name).is_some() || added.iter().any(|f| &f.name == name) {
                continue;
            }
            let ty = match meta::standard_type(name) {
                Some(ty) if section == Section::Metadata => ty,
                _ => value.storage_type()?,
            };
            added.push(Field::new(name.clone(), ty));
        }

        if added.is_empty() && !first_time {
            return Ok(());
        }

        // rebuild the ordered field list and back-fill the new columns
        let mut fields: Vec<Field> = match section {
            Section::Metadata => self.metadata.fields.take().unwrap_or_default(),
            Section::Parameters => self.parameters.fields.take().unwrap_or_default(),
            Section::ExperimentalResults => self.results.fields.take().unwrap_or_default(),
        };
        for field in added {
            let zero = field.ty.zero();
            match section {
                Section::Metadata => {
                    self.meta_columns
                        .insert(field.name.clone(), vec![zero; self.nrows]);
                }
                Section::Parameters => {
                    self.param_columns
                        .insert(field.name.clone(), vec![zero.clone(); self.nrows]);
                    self.pending_columns
                        .insert(field.name.clone(), vec![zero; self.pending_jobs.len()]);
                }
                Section::ExperimentalResults => {
                    self.result_columns
                        .insert(field.name.clone(), vec![zero; self.nrows]);
                }
            }
            fields.push(field);
        }
        order_fields(&mut fields, section);

        match section {
            Section::Metadata => self.metadata.fields = Some(fields),
            Section::Parameters => self.parameters.fields = Some(fields),
            Section::ExperimentalResults => self.results.fields = Some(fields),
        }
        self.type_changed = true;
        Ok(())
    }

    // ---- adding results ----

    /// Add a single record. New fields extend the schema (with zero
    /// back-fill of earlier rows); the result fields of a failed record
    /// are zeroed regardless of their contents.
    pub fn add_single_result(&mut self, rc: &ResultsRecord) -> Result<()> {
        self.assert_unlocked()?;

        let fields = match &rc.results {
            Results::Fields(fields) => fields,
            Results::Nested(_) => {
                return Err(Error::ResultsStructure(
                    "nested results must be added through a notebook, which flattens them".into(),
                ))
            }
        };

        self.extend_section(Section::Parameters, &rc.parameters)?;
        self.extend_section(Section::Metadata, &rc.metadata)?;
        if rc.success() {
            self.extend_section(Section::ExperimentalResults, fields)?;
        }

        // coerce the full row up front so a bad value can't leave the
        // table partially extended
        let meta_row = coerce_row(self.metadata.fields(), &rc.metadata, false)?;
        let param_row = coerce_row(self.parameters.fields(), &rc.parameters, false)?;
        let result_row = coerce_row(self.results.fields(), fields, !rc.success())?;

        push_row(&mut self.meta_columns, self.metadata.fields(), meta_row);
        push_row(&mut self.param_columns, self.parameters.fields(), param_row);
        push_row(&mut self.result_columns, self.results.fields(), result_row);
        self.nrows += 1;
        self.dirty = true;
        Ok(())
    }

    pub fn number_of_results(&self) -> usize {
        self.nrows
    }

    pub fn is_empty(&self) -> bool {
        self.nrows == 0
    }

    // ---- pending results ----

    /// Record a job submitted at the given point but not yet resolved.
    /// Job identifiers must be unique.
    pub fn add_single_pending_result(&mut self, params: &Point, job_id: &str) -> Result<()> {
        self.assert_unlocked()?;
        if self.pending_jobs.iter().any(|j| j == job_id) {
            return Err(Error::DuplicateJob(job_id.to_string()));
        }

        self.extend_section(Section::Parameters, params)?;

        let missing: Vec<&str> = self
            .parameters
            .fields()
            .iter()
            .map(|f| f.name.as_str())
            .filter(|name| !params.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return Err(Error::ResultsStructure(format!(
                "missing experimental parameters: {}",
                missing.join(", ")
            )));
        }

        let row = coerce_row(self.parameters.fields(), params, false)?;
        push_row(&mut self.pending_columns, self.parameters.fields(), row);
        self.pending_jobs.push(job_id.to_string());
        self.dirty = true;
        Ok(())
    }

    /// The job identifiers of all pending results, in submission order.
    pub fn pending_results(&self) -> Vec<String> {
        self.pending_jobs.clone()
    }

    pub fn number_of_pending_results(&self) -> usize {
        self.pending_jobs.len()
    }

    /// True when every pending result has been resolved or cancelled.
    pub fn ready(&self) -> bool {
        self.pending_jobs.is_empty()
    }

    /// The parameters a pending job was submitted with.
    pub fn pending_result_parameters(&self, job_id: &str) -> Result<Point> {
        let row = self
            .pending_jobs
            .iter()
            .position(|j| j == job_id)
            .ok_or_else(|| Error::PendingResult(job_id.to_string()))?;
        let mut params = Point::new();
        for field in self.parameters.fields() {
            params.insert(
                field.name.clone(),
                self.pending_columns[&field.name][row].clone(),
            );
        }
        Ok(params)
    }

    /// Job ids of the pending results matching the given parameters;
    /// partial matching, with list values treated as disjunctions.
    pub fn pending_results_for(&self, params: &Point) -> Result<Vec<String>> {
        if self.pending_jobs.is_empty() {
            return Ok(Vec::new());
        }
        self.check_query_parameters(params)?;
        Ok(self
            .pending_jobs
            .iter()
            .enumerate()
            .filter(|(row, _)| self.row_matches(&self.pending_columns, *row, params))
            .map(|(_, job)| job.clone())
            .collect())
    }

    /// Drop a resolved job from the pending table. The completed record
    /// itself is stored through the owning notebook.
    pub fn resolve_single_pending_result(&mut self, job_id: &str) -> Result<()> {
        self.assert_unlocked()?;
        self.drop_pending_row(job_id)?;
        self.dirty = true;
        Ok(())
    }

    /// Cancel a pending job, leaving a synthesised failure record with
    /// the distinguished cancellation exception in its place.
    pub fn cancel_single_pending_result(&mut self, job_id: &str) -> Result<()> {
        self.assert_unlocked()?;
        let params = self.pending_result_parameters(job_id)?;
        let rc = ResultsRecord::cancellation(params);
        self.add_single_result(&rc)?;
        self.drop_pending_row(job_id)?;
        info!("cancelled pending result {job_id}");
        self.dirty = true;
        Ok(())
    }

    fn drop_pending_row(&mut self, job_id: &str) -> Result<()> {
        let row = self
            .pending_jobs
            .iter()
            .position(|j| j == job_id)
            .ok_or_else(|| Error::PendingResult(job_id.to_string()))?;
        self.pending_jobs.remove(row);
        for column in self.pending_columns.values_mut() {
            column.remove(row);
        }
        Ok(())
    }

    // ---- queries ----

    fn row_status(&self, row: usize) -> bool {
        self.meta_columns
            .get(meta::STATUS)
            .and_then(|col| col.get(row))
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    fn check_query_parameters(&self, params: &Point) -> Result<()> {
        for name in params.keys() {
            if self.parameters.get(name).is_none() {
                return Err(Error::ResultsStructure(format!(
                    "unexpected experimental parameter '{name}'"
                )));
            }
        }
        Ok(())
    }

    fn row_matches(
        &self,
        columns: &BTreeMap<String, Vec<Value>>,
        row: usize,
        params: &Point,
    ) -> bool {
        params.iter().all(|(name, wanted)| {
            let ty = match self.parameters.get(name) {
                Some(ty) => ty,
                None => return false,
            };
            let cell = &columns[name][row];
            match wanted {
                // a list of values is a disjunction for this field
                Value::List(options) => options.iter().any(|o| cell_matches(ty, cell, o)),
                single => cell_matches(ty, cell, single),
            }
        })
    }

    /// All rows as a detached table, optionally restricted to
    /// successful runs.
    pub fn dataframe(&self, only_successful: bool) -> Table {
        let rows: Vec<usize> = (0..self.nrows)
            .filter(|&row| !only_successful || self.row_status(row))
            .collect();
        self.table_for_rows(&rows)
    }

    /// Rows matching the given parameters as a detached table. Missing
    /// parameter keys are unconstrained; a list value selects rows whose
    /// field matches any of its elements.
    pub fn dataframe_for(&self, params: &Point, only_successful: bool) -> Result<Table> {
        if self.nrows == 0 {
            return Ok(Table::empty());
        }
        self.check_query_parameters(params)?;
        let rows: Vec<usize> = (0..self.nrows)
            .filter(|&row| self.row_matches(&self.param_columns, row, params))
            .filter(|&row| !only_successful || self.row_status(row))
            .collect();
        Ok(self.table_for_rows(&rows))
    }

    fn table_for_rows(&self, rows: &[usize]) -> Table {
        let mut fields = Vec::new();
        fields.extend(self.metadata.fields().iter().cloned());
        fields.extend(self.parameters.fields().iter().cloned());
        fields.extend(self.results.fields().iter().cloned());

        let mut out = Vec::with_capacity(rows.len());
        for &row in rows {
            let mut cells = Vec::with_capacity(fields.len());
            for field in self.metadata.fields() {
                cells.push(self.meta_columns[&field.name][row].clone());
            }
            for field in self.parameters.fields() {
                cells.push(self.param_columns[&field.name][row].clone());
            }
            for field in self.results.fields() {
                cells.push(self.result_columns[&field.name][row].clone());
            }
            out.push(cells);
        }
        Table { fields, rows: out }
    }

    /// All records, reconstituted from the table through the schema.
    pub fn results(&self) -> Vec<ResultsRecord> {
        (0..self.nrows).map(|row| self.record_at(row)).collect()
    }

    /// The records matching the given parameters.
    pub fn results_for(&self, params: &Point) -> Result<Vec<ResultsRecord>> {
        if self.nrows == 0 {
            return Ok(Vec::new());
        }
        self.check_query_parameters(params)?;
        Ok((0..self.nrows)
            .filter(|&row| self.row_matches(&self.param_columns, row, params))
            .map(|row| self.record_at(row))
            .collect())
    }

    fn record_at(&self, row: usize) -> ResultsRecord {
        let mut metadata = FieldMap::new();
        for field in self.metadata.fields() {
            metadata.insert(
                field.name.clone(),
                self.meta_columns[&field.name][row].clone(),
            );
        }
        let mut parameters = Point::new();
        for field in self.parameters.fields() {
            parameters.insert(
                field.name.clone(),
                self.param_columns[&field.name][row].clone(),
            );
        }
        let mut results = FieldMap::new();
        if self.row_status(row) {
            for field in self.results.fields() {
                results.insert(
                    field.name.clone(),
                    self.result_columns[&field.name][row].clone(),
                );
            }
        }
        ResultsRecord::new(parameters, metadata, Results::Fields(results))
    }

    /// The distinct values of a parameter across all stored results, in
    /// order of first appearance.
    pub fn parameter_range(&self, name: &str) -> Result<Vec<Value>> {
        if self.parameters.get(name).is_none() {
            return Err(Error::ResultsStructure(format!(
                "unexpected experimental parameter '{name}'"
            )));
        }
        let mut seen: Vec<Value> = Vec::new();
        for v in &self.param_columns[name] {
            if !seen.contains(v) {
                seen.push(v.clone());
            }
        }
        Ok(seen)
    }

    /// All parameter names mapped to their observed ranges.
    pub fn parameter_space(&self) -> BTreeMap<String, Vec<Value>> {
        self.parameters
            .fields()
            .iter()
            .map(|f| {
                (
                    f.name.clone(),
                    self.parameter_range(&f.name).unwrap_or_default(),
                )
            })
            .collect()
    }

    // ---- restore (persistence) ----

    /// Rebuild a result set from its persisted parts, bypassing
    /// inference. Row widths must match the declared schemas.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        description: String,
        attributes: BTreeMap<String, String>,
        metadata: Option<Vec<Field>>,
        parameters: Option<Vec<Field>>,
        results: Option<Vec<Field>>,
        rows: Vec<Vec<Value>>,
        pending: Vec<(String, Vec<Value>)>,
        locked: bool,
    ) -> Result<ResultSet> {
        let mut rs = ResultSet {
            description,
            attributes,
            locked: false,
            ..Default::default()
        };

        let meta_fields = metadata.clone().unwrap_or_default();
        let param_fields = parameters.clone().unwrap_or_default();
        let result_fields = results.clone().unwrap_or_default();
        let width = meta_fields.len() + param_fields.len() + result_fields.len();

        rs.meta_columns = meta_fields
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();
        rs.param_columns = param_fields
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();
        rs.result_columns = result_fields
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();
        rs.pending_columns = param_fields
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();

        for row in rows {
            if row.len() != width {
                return Err(Error::Format(format!(
                    "row width {} does not match schema width {width}",
                    row.len()
                )));
            }
            let mut cells = row.into_iter();
            for f in &meta_fields {
                rs.meta_columns.get_mut(&f.name).unwrap().push(
                    cells.next().expect("width checked"),
                );
            }
            for f in &param_fields {
                rs.param_columns
                    .get_mut(&f.name)
                    .unwrap()
                    .push(cells.next().expect("width checked"));
            }
            for f in &result_fields {
                rs.result_columns
                    .get_mut(&f.name)
                    .unwrap()
                    .push(cells.next().expect("width checked"));
            }
            rs.nrows += 1;
        }

        for (job_id, row) in pending {
            if row.len() != param_fields.len() {
                return Err(Error::Format(format!(
                    "pending row width {} does not match parameter count {}",
                    row.len(),
                    param_fields.len()
                )));
            }
            for (f, cell) in param_fields.iter().zip(row) {
                rs.pending_columns.get_mut(&f.name).unwrap().push(cell);
            }
            rs.pending_jobs.push(job_id);
        }

        rs.metadata.fields = metadata;
        rs.parameters.fields = parameters;
        rs.results.fields = results;
        rs.locked = locked;
        Ok(rs)
    }
}

fn cell_matches(ty: &StorageType, cell: &Value, wanted: &Value) -> bool {
    ty.coerce(wanted).map(|w| &w == cell).unwrap_or(false)
}

/// Coerce a record section into a row following the field order, zeroing
/// missing fields (and, for `zeroed`, every field regardless).
fn coerce_row(fields: &[Field], values: &FieldMap, zeroed: bool) -> Result<Vec<Value>> {
    fields
        .iter()
        .map(|field| {
            if zeroed {
                return Ok(field.ty.zero());
            }
            match values.get(&field.name) {
                Some(v) => field.ty.coerce(v),
                None => Ok(field.ty.zero()),
            }
        })
        .collect()
}

fn push_row(columns: &mut BTreeMap<String, Vec<Value>>, fields: &[Field], row: Vec<Value>) {
    for (field, cell) in fields.iter().zip(row) {
        columns
            .get_mut(&field.name)
            .expect("schema and columns agree")
            .push(cell);
    }
}

/// Order fields within a section: metadata puts the canonical standard
/// fields first, everything else sorts lexicographically.
fn order_fields(fields: &mut [Field], section: Section) {
    match section {
        Section::Metadata => {
            let rank = |name: &str| {
                meta::STANDARD_FIELDS
                    .iter()
                    .position(|s| *s == name)
                    .unwrap_or(meta::STANDARD_FIELDS.len())
            };
            fields.sort_by(|a, b| {
                rank(&a.name)
                    .cmp(&rank(&b.name))
                    .then_with(|| a.name.cmp(&b.name))
            });
        }
        Section::Parameters | Section::ExperimentalResults => {
            fields.sort_by(|a, b| a.name.cmp(&b.name));
        }
    }
}

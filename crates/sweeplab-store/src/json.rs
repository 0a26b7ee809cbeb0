//! JSON on-disk notebook codec
//!
//! The most basic persistent notebook: a single versioned JSON file,
//! readable by virtually any tooling. Cells are written as plain JSON
//! values and decoded back through the stored schema, so complex
//! numbers, lists, and timestamps round-trip without self-describing
//! tags. Commits write to a temporary file and rename over the old one,
//! so a failed write never corrupts an existing notebook.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Map};

use sweeplab_core::error::{Error, Result};
use sweeplab_core::value::{ScalarKind, StorageType, Value};

use crate::backend::PersistentBackend;
use crate::notebook::Notebook;
use crate::resultset::{Field, ResultSet, JOB_ID};

/// String identifying the writing package in every notebook file.
pub const CREATOR: &str = "sweeplab, computational experiment management for Rust";

/// File-format version this build reads and writes.
pub const FORMAT_VERSION: &str = "1";

/// A notebook persisted to a JSON file.
pub struct JsonBackend {
    path: PathBuf,
}

impl JsonBackend {
    /// Open a persistent notebook: load the file if it exists, create
    /// an empty notebook bound to it otherwise.
    pub fn open(path: impl AsRef<Path>, description: Option<&str>) -> Result<Notebook> {
        let path = path.as_ref().to_path_buf();
        let mut notebook = if path.is_file() && fs::metadata(&path)?.len() > 0 {
            let mut nb = load(&path)?;
            if let Some(d) = description {
                if !nb.is_locked() {
                    nb.set_description(d)?;
                }
            }
            nb
        } else {
            Notebook::new(&path.display().to_string(), description)
        };
        notebook.set_backend(Box::new(JsonBackend { path }));
        Ok(notebook)
    }

    /// Create a fresh persistent notebook, discarding any existing file.
    pub fn create(path: impl AsRef<Path>, description: Option<&str>) -> Result<Notebook> {
        let path = path.as_ref().to_path_buf();
        let mut notebook = Notebook::new(&path.display().to_string(), description);
        notebook.set_backend(Box::new(JsonBackend { path }));
        notebook.commit()?;
        Ok(notebook)
    }
}

impl PersistentBackend for JsonBackend {
    fn commit(&mut self, notebook: &Notebook) -> Result<()> {
        let doc = save(notebook);
        let text = serde_json::to_string_pretty(&doc)
            .map_err(|e| Error::Format(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ---- encoding ----

fn save(nb: &Notebook) -> serde_json::Value {
    let mut sets = Map::new();
    for tag in nb.result_sets() {
        let rs = nb.result_set(&tag).expect("tag listed");
        sets.insert(tag, save_result_set(rs));
    }
    json!({
        "creator": CREATOR,
        "version": FORMAT_VERSION,
        "description": nb.description(),
        "current": nb.current_tag(),
        "locked": nb.is_locked(),
        "resultsets": sets,
    })
}

fn save_result_set(rs: &ResultSet) -> serde_json::Value {
    let records: Vec<serde_json::Value> = rs
        .dataframe(false)
        .rows()
        .iter()
        .map(|row| serde_json::Value::Array(row.iter().map(encode_value).collect()))
        .collect();

    let pending: Vec<serde_json::Value> = rs
        .pending_results()
        .iter()
        .map(|job| {
            let params = rs
                .pending_result_parameters(job)
                .expect("pending job listed");
            let cells: Vec<serde_json::Value> = rs
                .parameter_schema()
                .unwrap_or(&[])
                .iter()
                .map(|f| encode_value(&params[&f.name]))
                .collect();
            json!({ JOB_ID: job, "parameters": cells })
        })
        .collect();

    json!({
        "description": rs.description(),
        "locked": rs.is_locked(),
        "attributes": rs.attributes(),
        "schema": {
            "metadata": rs.metadata_schema().map(encode_fields),
            "parameters": rs.parameter_schema().map(encode_fields),
            "results": rs.result_schema().map(encode_fields),
        },
        "records": records,
        "pending": pending,
    })
}

fn encode_fields(fields: &[Field]) -> serde_json::Value {
    serde_json::Value::Array(
        fields
            .iter()
            .map(|f| json!({ "name": f.name, "type": f.ty.to_string() }))
            .collect(),
    )
}

fn encode_value(v: &Value) -> serde_json::Value {
    match v {
        Value::Int(i) => json!(i),
        Value::Float(f) => json!(f),
        Value::Complex(c) => json!([c.re, c.im]),
        Value::Bool(b) => json!(b),
        Value::String(s) => json!(s),
        Value::Timestamp(t) => json!(t.to_rfc3339()),
        Value::List(vs) => serde_json::Value::Array(vs.iter().map(encode_value).collect()),
    }
}

// ---- decoding ----

fn load(path: &Path) -> Result<Notebook> {
    let text = fs::read_to_string(path)?;
    let doc: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| Error::Format(e.to_string()))?;

    let version = doc
        .get("version")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("(missing)");
    if version != FORMAT_VERSION {
        return Err(Error::NotebookVersion {
            expected: FORMAT_VERSION.to_string(),
            found: version.to_string(),
        });
    }

    let description = str_field(&doc, "description")?.to_string();
    let current = str_field(&doc, "current")?.to_string();
    let locked = doc
        .get("locked")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    let groups = doc
        .get("resultsets")
        .and_then(serde_json::Value::as_object)
        .ok_or_else(|| Error::Format("missing result sets".into()))?;

    let mut sets = BTreeMap::new();
    for (tag, group) in groups {
        sets.insert(tag.clone(), load_result_set(group)?);
    }

    Notebook::from_parts(
        path.display().to_string(),
        description,
        sets,
        current,
        locked,
    )
}

fn load_result_set(group: &serde_json::Value) -> Result<ResultSet> {
    let description = str_field(group, "description")?.to_string();
    let locked = group
        .get("locked")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    let mut attributes = BTreeMap::new();
    if let Some(attrs) = group.get("attributes").and_then(serde_json::Value::as_object) {
        for (k, v) in attrs {
            let v = v
                .as_str()
                .ok_or_else(|| Error::Format(format!("attribute '{k}' is not a string")))?;
            attributes.insert(k.clone(), v.to_string());
        }
    }

    let schema = group
        .get("schema")
        .ok_or_else(|| Error::Format("result set has no schema block".into()))?;
    let metadata = decode_fields(schema.get("metadata"))?;
    let parameters = decode_fields(schema.get("parameters"))?;
    let results = decode_fields(schema.get("results"))?;

    let mut all_fields: Vec<&Field> = Vec::new();
    for section in [&metadata, &parameters, &results] {
        if let Some(fields) = section {
            all_fields.extend(fields.iter());
        }
    }

    let mut rows = Vec::new();
    for row in array_field(group, "records")? {
        let cells = row
            .as_array()
            .ok_or_else(|| Error::Format("record row is not an array".into()))?;
        if cells.len() != all_fields.len() {
            return Err(Error::Format(format!(
                "record row has {} cells, schema has {} fields",
                cells.len(),
                all_fields.len()
            )));
        }
        let decoded: Vec<Value> = cells
            .iter()
            .zip(&all_fields)
            .map(|(cell, field)| decode_value(&field.ty, cell))
            .collect::<Result<_>>()?;
        rows.push(decoded);
    }

    let param_fields = parameters.clone().unwrap_or_default();
    let mut pending = Vec::new();
    for entry in array_field(group, "pending")? {
        let job = str_field(entry, JOB_ID)?.to_string();
        let cells = entry
            .get("parameters")
            .and_then(serde_json::Value::as_array)
            .ok_or_else(|| Error::Format(format!("pending job {job} has no parameters")))?;
        if cells.len() != param_fields.len() {
            return Err(Error::Format(format!(
                "pending row for {job} has {} cells, schema has {} parameters",
                cells.len(),
                param_fields.len()
            )));
        }
        let decoded: Vec<Value> = cells
            .iter()
            .zip(&param_fields)
            .map(|(cell, field)| decode_value(&field.ty, cell))
            .collect::<Result<_>>()?;
        pending.push((job, decoded));
    }

    ResultSet::from_parts(
        description,
        attributes,
        metadata,
        parameters,
        results,
        rows,
        pending,
        locked,
    )
}

fn decode_fields(section: Option<&serde_json::Value>) -> Result<Option<Vec<Field>>> {
    let section = match section {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(section) => section,
    };
    let entries = section
        .as_array()
        .ok_or_else(|| Error::Format("schema section is not an array".into()))?;
    let mut fields = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = str_field(entry, "name")?;
        let ty = StorageType::parse(str_field(entry, "type")?)?;
        fields.push(Field::new(name, ty));
    }
    Ok(Some(fields))
}

fn decode_value(ty: &StorageType, j: &serde_json::Value) -> Result<Value> {
    let mismatch = || Error::Format(format!("cell {j} does not decode as {ty}"));
    match ty {
        StorageType::Scalar(kind) => decode_scalar(*kind, j).ok_or_else(mismatch),
        StorageType::List(kind) => {
            let items = j.as_array().ok_or_else(mismatch)?;
            items
                .iter()
                .map(|item| decode_scalar(*kind, item).ok_or_else(mismatch))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
    }
}

fn decode_scalar(kind: ScalarKind, j: &serde_json::Value) -> Option<Value> {
    match kind {
        ScalarKind::Int => j.as_i64().map(Value::Int),
        ScalarKind::Float => j.as_f64().map(Value::Float),
        ScalarKind::Bool => j.as_bool().map(Value::Bool),
        ScalarKind::String => j.as_str().map(|s| Value::String(s.to_string())),
        ScalarKind::Complex => {
            let parts = j.as_array()?;
            if parts.len() != 2 {
                return None;
            }
            let re = parts[0].as_f64()?;
            let im = parts[1].as_f64()?;
            Some(Value::Complex(num_complex::Complex64::new(re, im)))
        }
    }
}

fn str_field<'a>(j: &'a serde_json::Value, name: &str) -> Result<&'a str> {
    j.get(name)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::Format(format!("missing or non-string field '{name}'")))
}

fn array_field<'a>(j: &'a serde_json::Value, name: &str) -> Result<&'a Vec<serde_json::Value>> {
    j.get(name)
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| Error::Format(format!("missing or non-array field '{name}'")))
}

//! Lenient loaders for collector output.
//!
//! Collector data is messy. A value the loader cannot interpret becomes an
//! absent field, an unreadable timestamp becomes `None`, and a record without a
//! usable `source_id` is still returned so the pipeline can reject it with a
//! reason. Only a payload that is not JSON / CSV at all is an error.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

use crate::error::ReconError;
use crate::model::RawRecord;

/// Parse collector timestamps: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC), or a bare date.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Fill in a missing `record_id` as `#` + the record's content fingerprint, so
/// ids stay stable across pages and loads of the same collector output.
fn with_content_id(mut record: RawRecord) -> RawRecord {
    if record.record_id.is_empty() {
        record.record_id = format!("#{}", record.fingerprint());
    }
    record
}

/// Build a record from one JSON value, tolerating any shape.
pub fn record_from_json(index: usize, value: &Value) -> RawRecord {
    let Some(obj) = value.as_object() else {
        log::warn!("ingest: element {index} is not an object");
        return with_content_id(RawRecord {
            record_id: String::new(),
            source_id: None,
            collected_at: None,
            fields: BTreeMap::new(),
            confidence_hints: BTreeMap::new(),
        });
    };

    let record_id = non_empty(obj.get("record_id").and_then(scalar_to_string)).unwrap_or_default();
    let source_id = non_empty(obj.get("source_id").and_then(scalar_to_string));
    let collected_at = obj.get("collected_at").and_then(Value::as_str).and_then(parse_timestamp);

    let fields = match obj.get("fields") {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), scalar_to_string(v))).collect(),
        Some(_) => {
            log::warn!("ingest: element {index} has malformed fields, treating all as absent");
            BTreeMap::new()
        }
        None => BTreeMap::new(),
    };

    let confidence_hints = obj
        .get("confidence_hints")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| {
                    let hint = v.as_u64().filter(|h| (1..=10).contains(h))?;
                    Some((k.clone(), hint as u8))
                })
                .collect()
        })
        .unwrap_or_default();

    with_content_id(RawRecord {
        record_id,
        source_id,
        collected_at,
        fields,
        confidence_hints,
    })
}

/// Load records from a JSON array, or from JSON Lines (one object per line).
pub fn load_json_records(input: &str) -> Result<Vec<RawRecord>, ReconError> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> =
            serde_json::from_str(trimmed).map_err(|e| ReconError::InputParse(e.to_string()))?;
        return Ok(values.iter().enumerate().map(|(i, v)| record_from_json(i, v)).collect());
    }

    let mut records = Vec::new();
    for (i, line) in input.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| ReconError::InputParse(format!("line {}: {e}", i + 1)))?;
        records.push(record_from_json(i, &value));
    }
    Ok(records)
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

/// Which CSV columns carry record metadata. Every other column is a field.
#[derive(Debug, Clone)]
pub struct CsvColumns {
    pub record_id: String,
    pub source_id: String,
    pub collected_at: String,
}

impl Default for CsvColumns {
    fn default() -> Self {
        Self {
            record_id: "record_id".into(),
            source_id: "source_id".into(),
            collected_at: "collected_at".into(),
        }
    }
}

/// Load records from collector CSV. `source` overrides the source column for
/// single-source exports.
pub fn load_csv_records(
    source: Option<&str>,
    csv_data: &str,
    columns: &CsvColumns,
) -> Result<Vec<RawRecord>, ReconError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ReconError::InputParse(e.to_string()))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let idx = |name: &str| headers.iter().position(|h| h == name);
    let record_id_idx = idx(&columns.record_id);
    let source_idx = idx(&columns.source_id);
    let collected_idx = idx(&columns.collected_at);
    let meta = [record_id_idx, source_idx, collected_idx];

    let mut records = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.map_err(|e| ReconError::InputParse(format!("row {}: {e}", row + 1)))?;
        let cell = |i: Option<usize>| i.and_then(|i| record.get(i)).map(str::trim).filter(|v| !v.is_empty());

        let record_id = cell(record_id_idx).map(str::to_string).unwrap_or_default();
        let source_id = match source {
            Some(s) => Some(s.to_string()),
            None => cell(source_idx).map(str::to_string),
        };
        let collected_at = cell(collected_idx).and_then(parse_timestamp);

        let mut fields = BTreeMap::new();
        for (i, h) in headers.iter().enumerate() {
            if meta.contains(&Some(i)) {
                continue;
            }
            fields.insert(h.clone(), cell(Some(i)).map(str::to_string));
        }

        records.push(with_content_id(RawRecord {
            record_id,
            source_id,
            collected_at,
            fields,
            confidence_hints: BTreeMap::new(),
        }));
    }

    Ok(records)
}

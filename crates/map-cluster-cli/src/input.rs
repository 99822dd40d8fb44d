//! Point file parsing

use crate::CliError;
use map_cluster_lib::LatLng;
use map_cluster_lib::heatmap::WeightedLatLng;
use std::path::Path;

/// One `lat,lng[,weight]` record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    pub location: LatLng,
    pub weight: Option<f64>,
}

impl Record {
    pub fn weighted(&self) -> WeightedLatLng {
        WeightedLatLng::new(self.location, self.weight.unwrap_or(WeightedLatLng::DEFAULT_INTENSITY))
    }
}

pub fn read_records(path: &Path) -> Result<Vec<Record>, CliError> {
    let text = std::fs::read_to_string(path)?;
    let records = parse_records(&text)?;
    tracing::debug!(path = %path.display(), records = records.len(), "read point file");
    Ok(records)
}

/// Blank lines and lines starting with `#` are skipped
pub fn parse_records(text: &str) -> Result<Vec<Record>, CliError> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| parse_record(line).map_err(|reason| CliError::Parse { line: index + 1, reason }))
        .collect()
}

fn parse_record(line: &str) -> Result<Record, String> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if !(2..=3).contains(&fields.len()) {
        return Err(format!("expected `lat,lng[,weight]`, got {} fields", fields.len()));
    }
    let number = |field: &str| {
        field
            .parse::<f64>()
            .map_err(|err| format!("invalid number {field:?}: {err}"))
    };
    let location = LatLng::new(number(fields[0])?, number(fields[1])?);
    if !location.is_finite() {
        return Err(format!("non-finite coordinate {line:?}"));
    }
    let weight = fields.get(2).map(|field| number(field)).transpose()?;
    Ok(Record { location, weight })
}

/// A single `lat,lng` argument
pub fn parse_lat_lng(value: &str) -> Result<LatLng, CliError> {
    let record = parse_record(value).map_err(|reason| CliError::Parse { line: 0, reason })?;
    Ok(record.location)
}

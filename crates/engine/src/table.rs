use crate::error::InvalidInput;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::{BufRead, Read};

/// One observation: its embedding coordinates plus named string fields
/// (sample identifier, group label, anything else the table carried).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingRow {
    pub coordinates: Vec<f64>,
    pub fields: BTreeMap<String, String>,
}

impl EmbeddingRow {
    pub fn new(coordinates: Vec<f64>) -> Self {
        Self {
            coordinates,
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingTable {
    pub coordinate_names: Vec<String>,
    pub rows: Vec<EmbeddingRow>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Tsv,
    Jsonl,
}

pub fn read_table<R: Read>(
    reader: R,
    format: TableFormat,
    coordinate_prefix: &str,
) -> Result<EmbeddingTable, InvalidInput> {
    match format {
        TableFormat::Csv => read_delimited(reader, b',', coordinate_prefix),
        TableFormat::Tsv => read_delimited(reader, b'\t', coordinate_prefix),
        TableFormat::Jsonl => read_jsonl(std::io::BufReader::new(reader), coordinate_prefix),
    }
}

/// Reads a header-first delimited table. Coordinate columns are the columns
/// whose header starts with `coordinate_prefix`, kept in header order.
pub fn read_delimited<R: Read>(
    reader: R,
    delimiter: u8,
    coordinate_prefix: &str,
) -> Result<EmbeddingTable, InvalidInput> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()
        .map_err(csv_parse_error)?
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            if idx == 0 {
                name.trim_start_matches('\u{feff}').to_string()
            } else {
                name.to_string()
            }
        })
        .collect();

    let coordinate_idx: Vec<usize> = headers
        .iter()
        .enumerate()
        .filter(|(_, name)| name.starts_with(coordinate_prefix))
        .map(|(idx, _)| idx)
        .collect();
    if coordinate_idx.is_empty() {
        return Err(InvalidInput::NoCoordinateColumns {
            prefix: coordinate_prefix.to_string(),
        });
    }
    let coordinate_names = coordinate_idx
        .iter()
        .map(|idx| headers[*idx].clone())
        .collect();

    let mut rows = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record.map_err(csv_parse_error)?;

        let mut coordinates = Vec::with_capacity(coordinate_idx.len());
        for idx in &coordinate_idx {
            let column = &headers[*idx];
            let raw = record.get(*idx).unwrap_or("");
            if raw.is_empty() {
                return Err(InvalidInput::MissingField {
                    row,
                    field: column.clone(),
                });
            }
            coordinates.push(parse_coordinate(row, column, raw)?);
        }

        let mut fields = BTreeMap::new();
        for (idx, name) in headers.iter().enumerate() {
            if coordinate_idx.contains(&idx) {
                continue;
            }
            if let Some(value) = record.get(idx).filter(|v| !v.is_empty()) {
                fields.insert(name.clone(), value.to_string());
            }
        }

        rows.push(EmbeddingRow {
            coordinates,
            fields,
        });
    }

    Ok(EmbeddingTable {
        coordinate_names,
        rows,
    })
}

/// Reads one JSON object per line. Coordinate keys are taken from the first
/// row and ordered naturally (`PC2` before `PC10`); every later row must carry
/// exactly the same coordinate keys.
pub fn read_jsonl<R: BufRead>(
    reader: R,
    coordinate_prefix: &str,
) -> Result<EmbeddingTable, InvalidInput> {
    let mut coordinate_names: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    let mut saw_first_non_empty_line = false;

    for (line_idx, line) in reader.lines().enumerate() {
        let line_no = line_idx + 1;
        let mut line = line.map_err(|err| InvalidInput::Parse {
            line: line_no,
            message: err.to_string(),
        })?;
        trim_line_ending(&mut line);
        if !saw_first_non_empty_line {
            strip_utf8_bom(&mut line);
        }
        if line.trim().is_empty() {
            continue;
        }
        saw_first_non_empty_line = true;

        let value: Value = serde_json::from_str(&line).map_err(|err| InvalidInput::Parse {
            line: line_no,
            message: err.to_string(),
        })?;
        let Value::Object(object) = value else {
            return Err(InvalidInput::Parse {
                line: line_no,
                message: "expected a JSON object".to_string(),
            });
        };

        let row = rows.len();
        let names = coordinate_names.get_or_insert_with(|| {
            let mut names: Vec<String> = object
                .keys()
                .filter(|key| key.starts_with(coordinate_prefix))
                .cloned()
                .collect();
            names.sort_by(|left, right| {
                natural_key(left, coordinate_prefix).cmp(&natural_key(right, coordinate_prefix))
            });
            names
        });
        if names.is_empty() {
            return Err(InvalidInput::NoCoordinateColumns {
                prefix: coordinate_prefix.to_string(),
            });
        }

        let present = object
            .keys()
            .filter(|key| key.starts_with(coordinate_prefix))
            .count();
        let mut coordinates = Vec::with_capacity(names.len());
        for name in names.iter() {
            match object.get(name) {
                None | Some(Value::Null) => {
                    return Err(InvalidInput::MissingField {
                        row,
                        field: name.clone(),
                    })
                }
                Some(Value::Number(number)) => match number.as_f64() {
                    Some(v) if v.is_finite() => coordinates.push(v),
                    _ => {
                        return Err(InvalidInput::NonNumeric {
                            row,
                            column: name.clone(),
                            value: number.to_string(),
                        })
                    }
                },
                Some(Value::String(raw)) => coordinates.push(parse_coordinate(row, name, raw)?),
                Some(other) => {
                    return Err(InvalidInput::NonNumeric {
                        row,
                        column: name.clone(),
                        value: other.to_string(),
                    })
                }
            }
        }
        if present != names.len() {
            return Err(InvalidInput::DimensionMismatch {
                row,
                expected: names.len(),
                actual: present,
            });
        }

        let mut fields = BTreeMap::new();
        for (key, value) in &object {
            if key.starts_with(coordinate_prefix) {
                continue;
            }
            match value {
                Value::Null => {}
                Value::String(s) if s.is_empty() => {}
                Value::String(s) => {
                    fields.insert(key.clone(), s.clone());
                }
                other => {
                    fields.insert(key.clone(), other.to_string());
                }
            }
        }

        rows.push(EmbeddingRow {
            coordinates,
            fields,
        });
    }

    Ok(EmbeddingTable {
        coordinate_names: coordinate_names.unwrap_or_default(),
        rows,
    })
}

fn parse_coordinate(row: usize, column: &str, raw: &str) -> Result<f64, InvalidInput> {
    match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(InvalidInput::NonNumeric {
            row,
            column: column.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn natural_key<'a>(name: &'a str, prefix: &str) -> (u64, &'a str) {
    let suffix = &name[prefix.len().min(name.len())..];
    (suffix.parse::<u64>().unwrap_or(u64::MAX), name)
}

fn csv_parse_error(err: csv::Error) -> InvalidInput {
    let line = err
        .position()
        .map(|pos| pos.line() as usize)
        .unwrap_or(0);
    InvalidInput::Parse {
        line,
        message: err.to_string(),
    }
}

fn trim_line_ending(line: &mut String) {
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
}

fn strip_utf8_bom(line: &mut String) {
    if let Some(stripped) = line.strip_prefix('\u{feff}') {
        *line = stripped.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_picks_prefixed_columns_in_header_order() {
        let input = "sample,PC1,dataset,PC2\nA1,1.0,CCLE,2.5\nB1,-3,TCGA,0\n";
        let table = read_delimited(input.as_bytes(), b',', "PC").expect("table");
        assert_eq!(table.coordinate_names, vec!["PC1", "PC2"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].coordinates, vec![1.0, 2.5]);
        assert_eq!(table.rows[1].field("dataset"), Some("TCGA"));
        assert_eq!(table.rows[1].field("sample"), Some("B1"));
    }

    #[test]
    fn tsv_with_bom_and_empty_label() {
        let input = "\u{feff}PC1\tPC2\tsample\tdataset\n0.5\t1\tA1\t\n";
        let table = read_table(input.as_bytes(), TableFormat::Tsv, "PC").expect("table");
        assert_eq!(table.coordinate_names, vec!["PC1", "PC2"]);
        assert_eq!(table.rows[0].field("dataset"), None);
    }

    #[test]
    fn csv_rejects_non_numeric_coordinate() {
        let input = "sample,PC1\nA1,abc\n";
        let err = read_delimited(input.as_bytes(), b',', "PC").unwrap_err();
        assert_eq!(
            err,
            InvalidInput::NonNumeric {
                row: 0,
                column: "PC1".to_string(),
                value: "abc".to_string(),
            }
        );
    }

    #[test]
    fn csv_short_row_reports_missing_coordinate() {
        let input = "sample,PC1,PC2\nA1,1.0\n";
        let err = read_delimited(input.as_bytes(), b',', "PC").unwrap_err();
        assert_eq!(
            err,
            InvalidInput::MissingField {
                row: 0,
                field: "PC2".to_string(),
            }
        );
    }

    #[test]
    fn csv_without_coordinates_is_rejected() {
        let input = "sample,dataset\nA1,CCLE\n";
        let err = read_delimited(input.as_bytes(), b',', "PC").unwrap_err();
        assert!(matches!(err, InvalidInput::NoCoordinateColumns { .. }));
    }

    #[test]
    fn jsonl_orders_coordinates_naturally() {
        let input = concat!(
            "{\"sample\":\"A1\",\"dataset\":\"CCLE\",\"PC10\":3,\"PC2\":2,\"PC1\":1}\n",
            "\n",
            "{\"sample\":\"B1\",\"dataset\":\"TCGA\",\"PC1\":4,\"PC2\":5,\"PC10\":\"6\"}\n",
        );
        let table = read_jsonl(input.as_bytes(), "PC").expect("table");
        assert_eq!(table.coordinate_names, vec!["PC1", "PC2", "PC10"]);
        assert_eq!(table.rows[0].coordinates, vec![1.0, 2.0, 3.0]);
        assert_eq!(table.rows[1].coordinates, vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn jsonl_extra_coordinate_is_dimension_mismatch() {
        let input = concat!(
            "{\"sample\":\"A1\",\"PC1\":1,\"PC2\":2}\n",
            "{\"sample\":\"A2\",\"PC1\":1,\"PC2\":2,\"PC3\":3}\n",
        );
        let err = read_jsonl(input.as_bytes(), "PC").unwrap_err();
        assert_eq!(
            err,
            InvalidInput::DimensionMismatch {
                row: 1,
                expected: 2,
                actual: 3,
            }
        );
    }

    #[test]
    fn jsonl_rejects_non_object_lines() {
        let err = read_jsonl("[1,2]\n".as_bytes(), "PC").unwrap_err();
        assert!(matches!(err, InvalidInput::Parse { line: 1, .. }));
    }
}

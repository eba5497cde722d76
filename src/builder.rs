//! Renderers for the published transaction extract.

use std::collections::BTreeMap;

use crate::{
    error::{PipelineError, Result},
    frame::{Cell, Frame},
    io_utils::SOURCE_DELIMITER,
};

/// Renders `frame` as `;`-delimited text with a header row and exactly one
/// `\n` per record.
pub fn build_csv(frame: &Frame) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(SOURCE_DELIMITER)
        .terminator(csv::Terminator::Any(b'\n'))
        .quote_style(csv::QuoteStyle::Necessary)
        .from_writer(Vec::new());
    writer.write_record(frame.columns())?;
    for row in frame.rows() {
        writer.write_record(row.iter().map(csv_field))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| PipelineError::Io(err.into_error()))?;
    String::from_utf8(bytes).map_err(|err| PipelineError::Encoding(err.to_string()))
}

fn csv_field(cell: &Cell) -> String {
    cell.as_ref().map(|v| v.as_display()).unwrap_or_default()
}

/// Renders `frame` as a compact JSON array with one record per line.
///
/// Columns listed in `decimals_map` are written as bare fixed-point numbers
/// with exactly that many fractional digits; every other value uses its
/// generic JSON encoding.
pub fn build_json(frame: &Frame, decimals_map: &BTreeMap<String, u32>) -> String {
    let keys: Vec<String> = frame
        .columns()
        .iter()
        .map(|name| serde_json::Value::String(name.clone()).to_string())
        .collect();
    let decimals: Vec<Option<usize>> = frame
        .columns()
        .iter()
        .map(|name| decimals_map.get(name).map(|d| *d as usize))
        .collect();

    let mut out = String::from("[");
    let total = frame.len();
    for (ordinal, row) in frame.rows().iter().enumerate() {
        out.push('{');
        for (pos, cell) in row.iter().enumerate() {
            if pos > 0 {
                out.push(',');
            }
            out.push_str(&keys[pos]);
            out.push(':');
            out.push_str(&json_value(cell, decimals[pos]));
        }
        out.push_str("}\n");
        if ordinal + 1 < total {
            out.push(',');
        }
    }
    out.push(']');
    out
}

fn json_value(cell: &Cell, decimals: Option<usize>) -> String {
    match cell {
        None => "null".to_string(),
        Some(value) => match (decimals, value.as_f64()) {
            (Some(places), Some(number)) if number.is_finite() => format!("{number:.places$}"),
            _ => value.to_json(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Value;

    fn typed_frame() -> Frame {
        Frame::from_rows(
            vec!["Name".into(), "Weight".into(), "Count".into()],
            vec![
                vec![
                    Some(Value::String("Jäte \"A\"".into())),
                    Some(Value::Float(3.0)),
                    Some(Value::Integer(2)),
                ],
                vec![Some(Value::String("B;C".into())), None, None],
            ],
        )
        .unwrap()
    }

    #[test]
    fn csv_uses_semicolons_and_plain_newlines() {
        let csv = build_csv(&typed_frame()).unwrap();
        assert_eq!(
            csv,
            "Name;Weight;Count\n\"Jäte \"\"A\"\"\";3.0;2\n\"B;C\";;\n"
        );
        assert_eq!(csv.matches('\n').count(), 3);
        assert!(!csv.contains("\r\n"));
    }

    #[test]
    fn json_applies_fixed_decimals_and_nulls() {
        let decimals: BTreeMap<String, u32> = [("Weight".to_string(), 2)].into_iter().collect();
        let json = build_json(&typed_frame(), &decimals);
        assert_eq!(
            json,
            "[{\"Name\":\"Jäte \\\"A\\\"\",\"Weight\":3.00,\"Count\":2}\n,{\"Name\":\"B;C\",\"Weight\":null,\"Count\":null}\n]"
        );
    }

    #[test]
    fn empty_frame_renders_empty_array() {
        let frame = Frame::new(vec!["A".into()]);
        assert_eq!(build_json(&frame, &BTreeMap::new()), "[]");
        assert_eq!(build_csv(&frame).unwrap(), "A\n");
    }
}

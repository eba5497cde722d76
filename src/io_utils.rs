//! I/O utilities for delimited text decoding and encoding.
//!
//! Every extract, history table, and published CSV passes through this
//! module. It provides:
//!
//! - **Encoding**: label resolution, input decoding, and output transcoding via
//!   `encoding_rs`, defaulting to UTF-8.
//! - **Reader construction**: `open_csv_reader` with the quoting rules used by
//!   the upstream exporter.
//! - **Frame loading**: `read_frame` turns raw bytes into a [`Frame`] of
//!   string cells, with empty fields as nulls.

use std::io::Read;

use encoding_rs::{Encoding, UTF_8};

use crate::{
    data::Value,
    error::{PipelineError, Result},
    frame::Frame,
};

/// Encoding of the exporter's extracts.
pub const SOURCE_ENCODING: &str = "ISO-8859-1";
pub const SOURCE_DELIMITER: u8 = b';';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| PipelineError::Encoding(format!("Unknown encoding '{value}'")))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8, has_headers: bool) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(has_headers)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(PipelineError::Encoding(format!(
            "Failed to decode text with encoding {}",
            encoding.name()
        )))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    decode_record(&headers, encoding)
}

/// Encodes `text` for publication. Characters the target encoding cannot
/// represent are an error rather than being replaced.
pub fn encode_text(text: &str, encoding: &'static Encoding) -> Result<Vec<u8>> {
    let (encoded, _, had_errors) = encoding.encode(text);
    if had_errors {
        return Err(PipelineError::Encoding(format!(
            "Failed to encode text using {}",
            encoding.name()
        )));
    }
    Ok(encoded.into_owned())
}

/// Parses delimited bytes into a frame of string cells.
///
/// Short records are padded with nulls; a record with more fields than the
/// header is malformed.
pub fn read_frame(bytes: &[u8], delimiter: u8, encoding: &'static Encoding) -> Result<Frame> {
    let mut reader = open_csv_reader(bytes, delimiter, true);
    let headers = reader_headers(&mut reader, encoding)?;
    let width = headers.len();
    let mut frame = Frame::new(headers);
    for (ordinal, result) in reader.into_byte_records().enumerate() {
        let record = result?;
        let decoded = decode_record(&record, encoding)?;
        if decoded.len() > width {
            return Err(PipelineError::Malformed(format!(
                "Expected {width} field(s) in line {}, saw {}",
                ordinal + 2,
                decoded.len()
            )));
        }
        let mut row: Vec<Option<Value>> = decoded
            .into_iter()
            .map(|field| {
                if field.is_empty() {
                    None
                } else {
                    Some(Value::String(field))
                }
            })
            .collect();
        row.resize(width, None);
        frame.push_row(row)?;
    }
    Ok(frame)
}

//! Delimited text output. Values are written with their `Display` form;
//! bytearrays are written verbatim and nulls as empty fields.

use dagrel_core::value::{Tuple, Value};

use crate::error::{Error, Result};
use crate::readers::text::delimiter_byte;

pub fn encode(rows: &[Tuple], delimiter: char) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter_byte(delimiter)?)
        .has_headers(false)
        .flexible(true)
        .quote_style(csv::QuoteStyle::Never)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    for row in rows {
        let fields: Vec<Vec<u8>> = row
            .values()
            .iter()
            .map(|v| match v {
                Value::Bytes(b) => b.clone(),
                other => other.to_string().into_bytes(),
            })
            .collect();
        writer.write_record(&fields)?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))
}

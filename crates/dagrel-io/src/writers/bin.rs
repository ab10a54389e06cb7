use dagrel_core::codec::encode_records;
use dagrel_core::value::Tuple;

use crate::error::Result;

pub fn encode(rows: &[Tuple]) -> Result<Vec<u8>> {
    Ok(encode_records(rows)?)
}

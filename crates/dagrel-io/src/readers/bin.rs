//! Binary tuple records (`dagrel_core::codec` framing).

use dagrel_core::codec::decode_records;
use dagrel_core::value::Tuple;

use crate::error::Result;

pub fn decode(bytes: &[u8]) -> Result<Vec<Tuple>> {
    Ok(decode_records(bytes)?)
}

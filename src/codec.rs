//! Binary payload for one sample's expression vector.
//!
//! Layout: a single version byte followed by the bincode encoding of
//! [`ExpressionPayload`]. Floats are stored as their IEEE-754 bits, so values
//! (NaN payloads included) round-trip exactly.

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const PAYLOAD_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionPayload {
    pub genes: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    genes: &'a [String],
    values: &'a [f64],
}

pub fn encode(genes: &[String], values: &[f64]) -> Result<Vec<u8>, KiraError> {
    if genes.len() != values.len() {
        return Err(KiraError::CorruptPayload(format!(
            "{} genes but {} values",
            genes.len(),
            values.len()
        )));
    }
    let body = bincode::serialize(&PayloadRef { genes, values })
        .map_err(|err| KiraError::CorruptPayload(err.to_string()))?;
    let mut bytes = Vec::with_capacity(body.len() + 1);
    bytes.push(PAYLOAD_VERSION);
    bytes.extend_from_slice(&body);
    Ok(bytes)
}

pub fn decode(bytes: &[u8]) -> Result<ExpressionPayload, KiraError> {
    let (version, body) = bytes
        .split_first()
        .ok_or_else(|| KiraError::CorruptPayload("empty payload".to_string()))?;
    if *version != PAYLOAD_VERSION {
        return Err(KiraError::CorruptPayload(format!(
            "unsupported payload version {version}"
        )));
    }
    let payload: ExpressionPayload =
        bincode::deserialize(body).map_err(|err| KiraError::CorruptPayload(err.to_string()))?;
    if payload.genes.len() != payload.values.len() {
        return Err(KiraError::CorruptPayload(
            "gene and value counts differ".to_string(),
        ));
    }
    Ok(payload)
}

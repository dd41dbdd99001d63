//! Dead-letter encoding for batches that cannot be written as Parquet.
//!
//! One JSON object per line, in the canonical form of each event, so the
//! batch can be replayed once the conflict is resolved.

use bytes::Bytes;
use snafu::prelude::*;

use crate::error::{DeadLetterEncodeSnafu, SerializeError};
use crate::event::NormalizedEvent;

/// Encode `events` as NDJSON.
pub fn encode_ndjson(events: &[NormalizedEvent]) -> Result<Bytes, SerializeError> {
    let mut out = Vec::with_capacity(events.len() * 256);
    for event in events {
        serde_json::to_writer(&mut out, &event.to_raw()).context(DeadLetterEncodeSnafu)?;
        out.push(b'\n');
    }
    Ok(Bytes::from(out))
}

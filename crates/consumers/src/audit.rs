//! On-disk auditing of raw dispatcher inputs.

use estuary_disruptor::{AbortReason, Consumer, ConsumerInput, ConsumerOutcome};
use estuary_types::InputSource;
use std::fs;
use std::path::PathBuf;
use tracing::error;

fn source_tag(source: InputSource) -> u8 {
    match source {
        InputSource::Local => 0,
        InputSource::RemotePush => 1,
        InputSource::RemotePull => 2,
    }
}

fn serialize_input(input: &ConsumerInput) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.push(source_tag(input.source()));
    bytes.extend_from_slice(&input.source_id().map_or(0, |id| id.0).to_le_bytes());

    if input.has_blocks() {
        bytes.push(b'B');
        bytes.extend_from_slice(&(input.blocks().len() as u32).to_le_bytes());
        for element in input.blocks() {
            let header = element.block.header_bytes();
            bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&header);
            bytes.extend_from_slice(&(element.block.transactions.len() as u32).to_le_bytes());
            for transaction in &element.block.transactions {
                let tx_bytes = transaction.to_bytes();
                bytes.extend_from_slice(&(tx_bytes.len() as u32).to_le_bytes());
                bytes.extend_from_slice(&tx_bytes);
            }
        }
    } else {
        bytes.push(b'T');
        bytes.extend_from_slice(&(input.transactions().len() as u32).to_le_bytes());
        for element in input.transactions() {
            let tx_bytes = element.transaction.to_bytes();
            bytes.extend_from_slice(&(tx_bytes.len() as u32).to_le_bytes());
            bytes.extend_from_slice(&tx_bytes);
        }
    }
    bytes
}

/// Writes each input's entity bytes to `<directory>/<element id>` before any
/// other consumer touches it.
///
/// The directory (one per dispatcher per boot) is created by the assembly;
/// a write failure aborts the element rather than silently losing the
/// audit trail.
pub fn create_audit_consumer(directory: PathBuf) -> Consumer {
    Box::new(move |input| {
        let path = directory.join(input.element_id().to_string());
        match fs::write(&path, serialize_input(input)) {
            Ok(()) => ConsumerOutcome::Continue,
            Err(io_error) => {
                error!(path = %path.display(), %io_error, "failed to audit dispatcher input");
                ConsumerOutcome::Abort(AbortReason::AuditWriteFailed)
            }
        }
    })
}

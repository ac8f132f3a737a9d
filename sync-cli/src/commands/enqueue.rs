//! Queue a mutation.

use anyhow::{Context, Result};
use std::path::Path;
use sync_types::{EntityRef, NewOperation, OperationId, OperationType, Payload};

use crate::config;

/// Run the enqueue command.
pub async fn run(
    data_dir: &Path,
    entity: EntityRef,
    op_type: OperationType,
    payload: Option<&str>,
    base_version: Option<u64>,
) -> Result<OperationId> {
    let mut new = build(entity, op_type, payload)?;
    if let Some(version) = base_version {
        new = new.with_base_version(version);
    }

    let engine = config::open_engine(data_dir, None).await?;
    let id = engine.enqueue(new).await?;
    let queued = engine.status().pending_count();
    engine.shutdown().await?;

    println!("Queued {}", id);
    println!("  {} operations in the outbox", queued);
    Ok(id)
}

fn build(entity: EntityRef, op_type: OperationType, payload: Option<&str>) -> Result<NewOperation> {
    match op_type {
        OperationType::Delete => {
            if payload.is_some() {
                anyhow::bail!("delete takes no --payload");
            }
            Ok(NewOperation::delete(entity))
        }
        OperationType::Create => Ok(NewOperation::create(entity, parse_payload(payload)?)),
        OperationType::Update => Ok(NewOperation::update(entity, parse_payload(payload)?)),
    }
}

/// Parse a JSON object argument. Absent means an empty payload.
fn parse_payload(payload: Option<&str>) -> Result<Payload> {
    let Some(raw) = payload else {
        return Ok(Payload::new());
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--payload is not valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("--payload must be a JSON object"),
    }
}

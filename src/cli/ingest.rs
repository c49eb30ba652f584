//! CLI `ingest` command: stage artifacts from a JSON or JSONL file.

use anyhow::{Context, Result};
use std::path::Path;

use chronicle::graph::types::ArtifactRecord;
use chronicle::service::GraphService;

/// Parse a JSON array or one-record-per-line JSONL document.
///
/// Records without an `org_id` get `org_id`; records naming another org are
/// kept as-is so ingestion rejects them.
pub fn parse_records(contents: &str, org_id: &str) -> Result<Vec<ArtifactRecord>> {
    let values: Vec<serde_json::Value> = if contents.trim_start().starts_with('[') {
        serde_json::from_str(contents).context("failed to parse JSON array")?
    } else {
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| format!("line {}: invalid JSON", i + 1))
            })
            .collect::<Result<_>>()?
    };

    values
        .into_iter()
        .enumerate()
        .map(|(i, mut value)| {
            if let Some(obj) = value.as_object_mut() {
                obj.entry("org_id")
                    .or_insert_with(|| serde_json::Value::String(org_id.to_string()));
            }
            serde_json::from_value(value).with_context(|| format!("record {}: not an artifact", i + 1))
        })
        .collect()
}

pub async fn ingest(service: &GraphService, org_id: &str, file: &Path, rebuild: bool) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read artifact file: {}", file.display()))?;
    let records = parse_records(&contents, org_id)?;
    println!("Ingesting {} artifacts for org {org_id}...", records.len());

    if rebuild {
        let outcome = service.ingest_and_rebuild(org_id, records).await?;
        println!(
            "Ingested: {} new, {} updated",
            outcome.ingest.new, outcome.ingest.updated
        );
        super::rebuild::print_report(&outcome.rebuild);
    } else {
        let report = service.ingest(org_id, records).await?;
        println!("Ingested: {} new, {} updated", report.new, report.updated);
        println!("Run `chronicle rebuild --org {org_id}` to update the graph.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_records_inherit_org() {
        let input = r##"
{"kind":"issue","foreign_id":"ENG-1","title":"Crash","timestamp":"2025-03-01T00:00:00Z"}

{"org_id":"other","kind":"pull_request","foreign_id":"#2","title":"Fix","timestamp":"2025-03-01T01:00:00Z"}
"##;
        let records = parse_records(input, "acme").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].org_id, "acme");
        assert_eq!(records[1].org_id, "other");
    }

    #[test]
    fn json_array_is_accepted() {
        let input = r#"[{"kind":"doc","foreign_id":"DOC-1","title":"Runbook","timestamp":"2025-03-01T00:00:00Z"}]"#;
        let records = parse_records(input, "acme").unwrap();
        assert_eq!(records[0].foreign_id, "DOC-1");
    }

    #[test]
    fn bad_line_is_reported() {
        let err = parse_records("{not json}\n", "acme").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}

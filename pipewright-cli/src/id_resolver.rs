//! ID resolver module
//!
//! Resolves UUID prefixes to full pipeline ids by querying the daemon, so
//! users can type short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use pipewright_client::DaemonClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a pipeline ID or prefix to a full UUID
///
/// Full UUIDs are returned without a round trip; the daemon answers 404
/// later if they do not exist.
///
/// # Errors
/// Returns an error if:
/// - No pipeline matches the prefix
/// - Multiple pipelines match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_pipeline_id(client: &DaemonClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let pipelines = client
        .list_pipelines()
        .await
        .context("Failed to fetch pipelines for ID resolution")?;

    select_unique(pipelines.iter().map(|p| p.id), id_or_prefix)
}

fn select_unique(ids: impl IntoIterator<Item = Uuid>, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .into_iter()
        .filter(|id| id_or_prefix.matches(*id))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!(
            "No pipeline found with ID starting with '{}'",
            id_or_prefix
        )),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple pipelines: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids() -> Vec<Uuid> {
        [
            "ab12cd34-0000-4000-8000-000000000001",
            "ab12ef56-0000-4000-8000-000000000002",
            "ff000000-0000-4000-8000-000000000003",
        ]
        .iter()
        .map(|s| Uuid::parse_str(s).unwrap())
        .collect()
    }

    #[test]
    fn test_unique_prefix_resolves() {
        let resolved = select_unique(ids(), &IdOrPrefix::parse("ab12c")).unwrap();
        assert_eq!(resolved, ids()[0]);
    }

    #[test]
    fn test_ambiguous_prefix_lists_candidates() {
        let err = select_unique(ids(), &IdOrPrefix::parse("ab12")).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Ambiguous"));
        assert!(message.contains("ab12cd34"));
        assert!(message.contains("ab12ef56"));
    }

    #[test]
    fn test_unknown_prefix() {
        let err = select_unique(ids(), &IdOrPrefix::parse("0123")).unwrap_err();
        assert!(err.to_string().contains("No pipeline found"));
    }
}

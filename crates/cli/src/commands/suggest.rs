// `scriptdesk suggest`: submit an edited script as a pending suggestion.

use std::path::PathBuf;

use clap::Args;
use scriptdesk_common::types::Suggestion;
use scriptdesk_engine::suggestion::SubmitOutcome;
use serde::Serialize;
use uuid::Uuid;

use super::{short_id, CommonArgs};
use crate::context::{self, CliContext};
use crate::output::OutputFormat;

#[derive(Debug, Args)]
pub struct SuggestArgs {
    pub script: Uuid,

    /// The full edited script, as text or a `.json` operation document.
    pub file: PathBuf,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuggestResult {
    pub script_id: Uuid,
    pub submitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<Suggestion>,
}

impl SuggestResult {
    fn from_outcome(script_id: Uuid, outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Submitted(suggestion) => {
                Self { script_id, submitted: true, suggestion: Some(suggestion) }
            }
            SubmitOutcome::NoChanges => Self { script_id, submitted: false, suggestion: None },
        }
    }
}

pub fn run(args: SuggestArgs) -> anyhow::Result<()> {
    let format = OutputFormat::detect(args.common.json);
    let result = suggest(args);
    context::finish(format, result, format_human)
}

fn suggest(args: SuggestArgs) -> anyhow::Result<SuggestResult> {
    let edited = context::read_raw(&args.file)?;
    let ctx = CliContext::load(args.common.as_user)?;
    let actor = ctx.actor()?;
    let outcome = context::block_on(ctx.service.submit_edit(args.script, &actor, &edited))??;
    Ok(SuggestResult::from_outcome(args.script, outcome))
}

fn format_human(result: &SuggestResult) -> String {
    match &result.suggestion {
        Some(suggestion) => format!(
            "Submitted suggestion {} for review ({} ops)",
            suggestion.id,
            suggestion.diff_operations.ops().len()
        ),
        None => format!(
            "No changes against script {}; nothing submitted",
            short_id(&result.script_id.to_string())
        ),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use scriptdesk_common::types::Actor;
    use scriptdesk_engine::store::MemoryStore;
    use scriptdesk_engine::suggestion::SuggestionService;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn unchanged_edit_reports_nothing_submitted() {
        let service = SuggestionService::new(Arc::new(MemoryStore::new()));
        let script = Uuid::new_v4();
        let outcome =
            service.submit_edit(script, &Actor::contributor("ada"), &json!("")).await.unwrap();

        let result = SuggestResult::from_outcome(script, outcome);
        assert!(!result.submitted);
        assert!(format_human(&result).contains("nothing submitted"));
        let encoded = serde_json::to_value(&result).unwrap();
        assert!(encoded.get("suggestion").is_none());
    }

    #[tokio::test]
    async fn submitted_edit_carries_the_suggestion() {
        let service = SuggestionService::new(Arc::new(MemoryStore::new()));
        let script = Uuid::new_v4();
        let outcome = service
            .submit_edit(script, &Actor::contributor("ada"), &json!("FADE IN:\n"))
            .await
            .unwrap();

        let result = SuggestResult::from_outcome(script, outcome);
        assert!(result.submitted);
        let encoded = serde_json::to_value(&result).unwrap();
        assert_eq!(encoded["suggestion"]["status"], "pending");
        assert_eq!(encoded["suggestion"]["author_id"], "ada");
    }
}

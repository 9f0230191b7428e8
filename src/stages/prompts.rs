//! Prompt templates for every stage.
//!
//! Every template asks for a single JSON object so replies go through
//! [`super::parse::json_object`]. Builders only assemble text; they never
//! log or inspect document content.

use crate::types::{
    prefix_chars, ContentUnit, DiagramElement, DocumentClassification, ElementMeta, ImageElement,
    Scenario, ScenarioDraft, StageKind, TableElement,
};
use crate::worker::PromptPayload;

const CLASSIFICATION_SYSTEM: &str = "You classify technical documents. \
Reply with one JSON object with the keys \"document_type\", \"purpose\", \
\"domain\" and \"key_topics\" (a list of short strings). No other text.";

const ELEMENT_SYSTEM: &str = "You analyse one element extracted from a technical document \
and derive software test scenarios from it. Reply with one JSON object: \
{\"analysis\": string, \"test_scenarios\": [{\"title\": string, \"description\": string, \
\"priority\": \"high\"|\"medium\"|\"low\", \"test_cases\": [{\"title\": string, \
\"steps\": string, \"expected_results\": string}]}]}. Use an empty list when the \
element does not suggest any test.";

const GENERATION_SYSTEM: &str = "You are a senior QA engineer. From the document content \
and the analysis provided, write comprehensive test scenarios. Reply with one JSON object: \
{\"summary\": string, \"scenarios\": [{\"title\": string, \"description\": string, \
\"priority\": \"high\"|\"medium\"|\"low\", \"category\": string, \"test_cases\": \
[{\"title\": string, \"steps\": string, \"expected_results\": string}]}]}. Every \
scenario needs at least one test case with numbered steps.";

const SUMMARY_SYSTEM: &str = "You write executive summaries of test plans. \
Reply with one JSON object: {\"summary\": string}. Three to five sentences.";

fn describe_meta(meta: &ElementMeta) -> String {
    let pairs = meta.pairs();
    if pairs.is_empty() {
        return "(no metadata)".to_string();
    }
    pairs
        .iter()
        .map(|(k, v)| format!("- {k}: {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Classification prompt over a text sample and the structure overview.
pub fn classification(unit: &ContentUnit, max_chars: usize) -> PromptPayload {
    let user = format!(
        "Document structure: {}\n\nDocument text (first {max_chars} characters):\n{}",
        unit.structure_summary(),
        prefix_chars(&unit.text, max_chars)
    );
    PromptPayload::text(StageKind::Classification, CLASSIFICATION_SYSTEM, user)
}

/// Per-image prompt; attaches the image when the element carries one.
pub fn image(index: usize, element: &ImageElement) -> PromptPayload {
    let user = format!(
        "Image {} of the document.\nMetadata:\n{}\n\nDescribe what the image shows and which \
         user-visible behaviour it implies.",
        index + 1,
        describe_meta(&element.meta)
    );
    let payload = PromptPayload::text(StageKind::ImageEnrichment, ELEMENT_SYSTEM, user);
    match &element.data {
        Some(source) => payload.with_image(source.clone()),
        None => payload,
    }
}

/// Per-table prompt with the rendered table.
pub fn table(index: usize, element: &TableElement) -> PromptPayload {
    let rendered = element.render();
    let body = if rendered.trim().is_empty() {
        "(table content unavailable)".to_string()
    } else {
        rendered
    };
    let user = format!(
        "Table {} of the document.\nMetadata:\n{}\n\nContent:\n{body}\n\nIdentify the rules, \
         limits and data combinations the table defines.",
        index + 1,
        describe_meta(&element.meta)
    );
    PromptPayload::text(StageKind::TableEnrichment, ELEMENT_SYSTEM, user)
}

/// Per-diagram prompt; attaches the rendering when available.
pub fn diagram(index: usize, element: &DiagramElement) -> PromptPayload {
    let user = format!(
        "Diagram {} of the document.\nMetadata:\n{}\n\nDescribe the flow or structure it shows: \
         components, transitions, decision points.",
        index + 1,
        describe_meta(&element.meta)
    );
    let payload = PromptPayload::text(StageKind::DiagramEnrichment, ELEMENT_SYSTEM, user);
    match &element.data {
        Some(source) => payload.with_image(source.clone()),
        None => payload,
    }
}

/// Inputs to the generation prompt.
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    /// Document text, or `None` when text is suppressed.
    pub text: Option<&'a str>,
    /// Classification, if available.
    pub classification: Option<&'a DocumentClassification>,
    /// Scenarios derived from images and diagrams.
    pub visual_insights: &'a [Scenario],
    /// Scenarios derived from tables.
    pub table_insights: &'a [Scenario],
    /// Number of images in the input.
    pub image_count: usize,
    /// Number of tables in the input.
    pub table_count: usize,
    /// Number of diagrams in the input.
    pub diagram_count: usize,
}

fn render_insights(insights: &[Scenario]) -> String {
    insights
        .iter()
        .map(|s| format!("- {}: {}", s.title, prefix_chars(&s.description, 300)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Main generation prompt.
pub fn generation(ctx: GenerationContext<'_>) -> PromptPayload {
    let mut user = String::new();
    match ctx.text {
        Some(text) => {
            user.push_str("Document content:\n");
            user.push_str(text);
            user.push_str("\n\n");
        }
        None => user.push_str(
            "The document text is unavailable. Base the scenarios only on the analysed \
             images, tables and diagrams below.\n\n",
        ),
    }

    if let Some(classification) = ctx.classification {
        if let Ok(json) = serde_json::to_string(classification) {
            user.push_str("Document classification:\n");
            user.push_str(&json);
            user.push_str("\n\n");
        }
    }

    user.push_str(&format!(
        "The document contains {} image(s), {} table(s) and {} diagram(s).\n",
        ctx.image_count, ctx.table_count, ctx.diagram_count
    ));
    if !ctx.visual_insights.is_empty() {
        user.push_str("\nVisual insights:\n");
        user.push_str(&render_insights(ctx.visual_insights));
        user.push('\n');
    }
    if !ctx.table_insights.is_empty() {
        user.push_str("\nTable insights:\n");
        user.push_str(&render_insights(ctx.table_insights));
        user.push('\n');
    }

    PromptPayload::text(StageKind::Generation, GENERATION_SYSTEM, user)
}

/// Executive summary prompt over a generated draft.
pub fn summary(draft: &ScenarioDraft) -> PromptPayload {
    let body = serde_json::to_string(draft).unwrap_or_default();
    PromptPayload::text(
        StageKind::Synthesis,
        SUMMARY_SYSTEM,
        format!("Test plan ({} scenarios):\n{body}", draft.scenarios.len()),
    )
}

//! Optional AI completion hook.
//!
//! The service is treated as an opaque text completion: a prompt describing
//! the conflict goes in, a JSON document `{"strategy": {...}}` is expected
//! back. Anything that does not parse is logged and dropped by the caller.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::AiConfig;
use crate::errors::StrategyError;
use crate::models::{
    AnalysisResult, Conflict, ResolutionStep, ResolutionStrategy, RiskLevel, StepAction,
    StrategyType,
};

/// A text-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, StrategyError>;

    /// Model identifier recorded on generated strategies.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// HTTP implementation (chat-completions wire format)
// ---------------------------------------------------------------------------

pub struct HttpCompletionService {
    api_url: String,
    model: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpCompletionService {
    /// Build from configuration. The API key must already be resolved from
    /// the environment.
    pub fn from_config(config: &AiConfig) -> Result<Self, StrategyError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                StrategyError::NotConfigured(format!(
                    "API key not set (expected in ${})",
                    config.api_key_env
                ))
            })?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        info!(model = %config.model, "initializing AI completion service");
        Ok(Self {
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key,
            http,
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionService for HttpCompletionService {
    async fn generate(&self, prompt: &str) -> Result<String, StrategyError> {
        debug!(len = prompt.len(), "sending completion request");

        let payload = serde_json::json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt},
            ],
        });

        let resp = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, "completion service returned error");
            return Err(StrategyError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| StrategyError::InvalidResponse(e.to_string()))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| StrategyError::InvalidResponse("response has no content".into()))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

const SYSTEM_PROMPT: &str = "You resolve git merge conflicts. Reply with a single JSON object \
of the form {\"strategy\": {\"name\": str, \"steps\": [...], \"confidence\": float, \
\"risk_level\": str, \"requires_approval\": bool}} and nothing else.";

// ---------------------------------------------------------------------------
// Prompt and response handling
// ---------------------------------------------------------------------------

/// Describe the conflict and its analysis for the completion service.
pub fn build_prompt(conflict: &Conflict, analysis: &AnalysisResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Conflict {} in {} ({} into {})\n",
        conflict.id,
        conflict.file_paths.join(", "),
        conflict.source_ref,
        conflict.target_ref
    ));
    out.push_str(&format!(
        "Type: {}\nRisk: {}\nAlignment: {:.2}\nRoot cause: {}\n",
        conflict.conflict_type, analysis.risk_level, analysis.alignment_score, analysis.root_cause
    ));
    for finding in &analysis.semantic_findings {
        out.push_str(&format!("Finding: {} ({})\n", finding.description, finding.severity));
    }
    for (i, block) in conflict.blocks().iter().enumerate() {
        out.push_str(&format!(
            "\nBlock {} (lines {}-{}):\n--- current\n{}",
            i, block.start_line, block.end_line, block.current_content
        ));
        if let Some(base) = &block.base_content {
            out.push_str(&format!("--- base\n{}", base));
        }
        out.push_str(&format!("--- incoming\n{}", block.incoming_content));
    }
    out.push_str(
        "\nAllowed step actions: git_checkout{path, side: ours|theirs}, git_add{path}, \
         write_file{path, content}, semantic_merge{block_index}, apply_merge{block_index}, \
         manual_edit{path, instructions}. Each step is {\"description\", \"action\", \"params\"}.\n",
    );
    out
}

#[derive(Deserialize)]
struct Envelope {
    strategy: AiStrategy,
}

#[derive(Deserialize)]
struct AiStrategy {
    name: String,
    steps: Vec<AiStep>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    requires_approval: Option<bool>,
}

#[derive(Deserialize)]
struct AiStep {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(flatten)]
    action: StepAction,
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Turn a completion into a strategy. Returns `None` for anything that is
/// not a well-formed `{"strategy": {...}}` document.
pub fn parse_strategy_response(
    response: &str,
    conflict: &Conflict,
    strategy_id: String,
    model: &str,
) -> Option<ResolutionStrategy> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end < start {
        return None;
    }
    let envelope: Envelope = match serde_json::from_str(&response[start..=end]) {
        Ok(e) => e,
        Err(e) => {
            warn!(error = %e, "discarding malformed AI strategy");
            return None;
        }
    };
    let ai = envelope.strategy;
    if ai.steps.is_empty() {
        warn!("discarding AI strategy without steps");
        return None;
    }

    let steps: Vec<ResolutionStep> = ai
        .steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| {
            let description = if step.description.is_empty() {
                step.action.name().to_string()
            } else {
                step.description
            };
            ResolutionStep {
                id: step.id.unwrap_or_else(|| format!("ai{}", i + 1)),
                description,
                action: step.action,
                dependencies: step.dependencies,
            }
        })
        .collect();

    let strategy_type = if steps
        .iter()
        .any(|s| matches!(s.action, StepAction::ManualEdit { .. }))
    {
        StrategyType::ManualResolution
    } else if steps
        .iter()
        .any(|s| matches!(s.action, StepAction::SemanticMerge { .. } | StepAction::WriteFile { .. }))
    {
        StrategyType::SemanticMerge
    } else {
        StrategyType::AcceptIncoming
    };

    let risk = ai
        .risk_level
        .as_deref()
        .and_then(RiskLevel::parse)
        .unwrap_or(RiskLevel::High);

    Some(ResolutionStrategy {
        id: strategy_id,
        conflict_id: conflict.id.clone(),
        name: ai.name,
        strategy_type,
        steps,
        estimated_time_minutes: conflict.estimated_resolution_minutes,
        risk_assessment: risk,
        requires_approval: ai.requires_approval.unwrap_or(true) || risk >= RiskLevel::Medium,
        confidence: ai.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        ai_generated: true,
        model_used: Some(model.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictBlock, ConflictTypeExtended, MarkerStyle, Side};

    fn conflict() -> Conflict {
        let block = ConflictBlock {
            file_path: "app.py".into(),
            start_line: 1,
            end_line: 5,
            current_content: "x = 1\n".into(),
            incoming_content: "x = 2\n".into(),
            base_content: None,
            marker_style: MarkerStyle::Merge,
        };
        Conflict::new("feature", "main", "app.py", ConflictTypeExtended::Content, vec![block])
    }

    #[test]
    fn test_parse_wrapped_response() {
        let response = r#"Sure, here it is:
```json
{"strategy": {"name": "Take theirs", "confidence": 0.8, "risk_level": "low",
  "requires_approval": false,
  "steps": [
    {"description": "checkout", "action": "git_checkout", "params": {"path": "app.py", "side": "theirs"}},
    {"action": "git_add", "params": {"path": "app.py"}, "dependencies": ["ai1"]}
  ]}}
```"#;
        let strategy = parse_strategy_response(response, &conflict(), "s9".into(), "m").unwrap();
        assert!(strategy.ai_generated);
        assert_eq!(strategy.model_used.as_deref(), Some("m"));
        assert_eq!(strategy.risk_assessment, RiskLevel::Low);
        assert!(!strategy.requires_approval);
        assert_eq!(strategy.steps.len(), 2);
        assert_eq!(strategy.steps[1].id, "ai2");
        assert_eq!(strategy.steps[1].description, "git_add");
        assert_eq!(
            strategy.steps[0].action,
            StepAction::GitCheckout {
                path: "app.py".into(),
                side: Side::Theirs
            }
        );
    }

    #[test]
    fn test_malformed_response_is_discarded() {
        let c = conflict();
        assert!(parse_strategy_response("no json here", &c, "s".into(), "m").is_none());
        assert!(parse_strategy_response("{\"answer\": 42}", &c, "s".into(), "m").is_none());
        assert!(parse_strategy_response(
            r#"{"strategy": {"name": "x", "steps": []}}"#,
            &c,
            "s".into(),
            "m"
        )
        .is_none());
        assert!(parse_strategy_response(
            r#"{"strategy": {"name": "x", "steps": [{"action": "rm_rf", "params": {}}]}}"#,
            &c,
            "s".into(),
            "m"
        )
        .is_none());
    }

    #[test]
    fn test_unknown_risk_defaults_to_high_and_approval() {
        let response = r#"{"strategy": {"name": "x", "risk_level": "spicy", "requires_approval": false,
            "steps": [{"action": "manual_edit", "params": {"path": "app.py", "instructions": "fix"}}]}}"#;
        let strategy = parse_strategy_response(response, &conflict(), "s".into(), "m").unwrap();
        assert_eq!(strategy.risk_assessment, RiskLevel::High);
        assert!(strategy.requires_approval);
        assert_eq!(strategy.strategy_type, StrategyType::ManualResolution);
    }

    #[test]
    fn test_prompt_mentions_blocks() {
        let c = conflict();
        let analysis = AnalysisResult {
            conflict_id: c.id.clone(),
            complexity_score: 0.1,
            alignment_score: 0.9,
            risk_level: RiskLevel::Low,
            estimated_resolution_time_minutes: 5,
            is_auto_resolvable: true,
            recommended_strategy_type: StrategyType::AcceptIncoming,
            root_cause: "parallel edit".into(),
            confidence_score: 0.9,
            semantic_findings: vec![],
            compliance_score: None,
        };
        let prompt = build_prompt(&c, &analysis);
        assert!(prompt.contains("Block 0 (lines 1-5)"));
        assert!(prompt.contains("x = 2"));
        assert!(prompt.contains("parallel edit"));
    }

    #[test]
    fn test_missing_key_is_not_configured() {
        let config = AiConfig {
            enabled: true,
            ..AiConfig::default()
        };
        assert!(matches!(
            HttpCompletionService::from_config(&config),
            Err(StrategyError::NotConfigured(_))
        ));
    }
}

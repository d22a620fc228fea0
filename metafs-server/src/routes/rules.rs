//! The renaming-rule management endpoints (spec §4.6, §4.7, §6): reading
//! and replacing the active rule set, previewing what it would do against
//! already-projected files, validating a single rule, and listing the
//! template variables a rule can reference.

use axum::extract::State;
use axum::Json;
use metafs_core::{Rule, RuleConfig, RuleValidation};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::infra::app_state::AppState;
use crate::infra::engine::EngineCommand;

#[derive(Debug, Serialize)]
pub struct GetRulesResponse {
    pub config: RuleConfig,
    pub last_modified: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn get_rules(State(state): State<AppState>) -> Json<GetRulesResponse> {
    let config = state.rules.read().expect("rule config lock poisoned").clone();
    Json(GetRulesResponse {
        last_modified: config.last_modified,
        config,
    })
}

#[derive(Debug, Deserialize)]
pub struct PutRulesRequest {
    pub config: RuleConfig,
}

#[derive(Debug, Serialize)]
pub struct PutRulesResponse {
    pub success: bool,
    pub refreshed: bool,
}

/// Persists a new rule set, swaps it into the live `rules` lock, and asks
/// the engine to refresh so already-projected files are re-evaluated
/// against it (spec §4.6: "a rule save takes effect on the next refresh").
pub async fn put_rules(
    State(state): State<AppState>,
    Json(req): Json<PutRulesRequest>,
) -> AppResult<Json<PutRulesResponse>> {
    for rule in &req.config.rules {
        let validation = RuleConfig::validate_rule(rule, None);
        if !validation.valid {
            return Err(AppError::bad_request(format!(
                "rule '{}' is invalid: {}",
                rule.id,
                validation.errors.join("; ")
            )));
        }
    }

    state.rule_store.save_rules_config(req.config.clone()).await?;
    *state.rules.write().expect("rule config lock poisoned") = req.config;

    let (respond_to, response) = tokio::sync::oneshot::channel();
    let refreshed = if state
        .engine_commands
        .send(EngineCommand::Refresh { respond_to })
        .await
        .is_ok()
    {
        matches!(response.await, Ok(Ok(())))
    } else {
        false
    };

    Ok(Json(PutRulesResponse {
        success: true,
        refreshed,
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct PreviewRequest {
    pub rules: Option<RuleConfig>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct FilePreview {
    pub file_id: String,
    pub source_path: String,
    pub current_virtual_path: String,
    pub proposed_virtual_path: String,
    pub rule_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub previews: Vec<FilePreview>,
    pub total: usize,
    pub limited: bool,
}

const DEFAULT_PREVIEW_LIMIT: usize = 50;
const MAX_PREVIEW_LIMIT: usize = 500;

/// Re-evaluates a candidate rule set (or the currently active one) against
/// a sample of already-known files, without writing anything (spec §4.7).
/// Sample order is the projection's file-id-index insertion order, which
/// is not guaranteed stable across refreshes.
pub async fn preview(
    State(state): State<AppState>,
    Json(req): Json<PreviewRequest>,
) -> AppResult<Json<PreviewResponse>> {
    let requested_limit = req.limit.unwrap_or(DEFAULT_PREVIEW_LIMIT);
    if requested_limit == 0 {
        return Err(AppError::bad_request("limit must be greater than zero"));
    }
    let limit = requested_limit.min(MAX_PREVIEW_LIMIT);

    let rules = match req.rules {
        Some(candidate) => candidate,
        None => state.rules.read().expect("rule config lock poisoned").clone(),
    };

    let projection = state.projection.read().expect("projection lock poisoned");
    let total = projection.known_file_count();
    let samples = projection.sample_files(limit);
    let limited = total > samples.len();

    let previews = samples
        .into_iter()
        .map(|snapshot| {
            let resolved = rules.resolve_virtual_path(&snapshot.metadata);
            FilePreview {
                file_id: snapshot.file_id,
                source_path: snapshot.source_path,
                current_virtual_path: snapshot.current_virtual_path,
                proposed_virtual_path: resolved.path,
                rule_id: resolved.rule_id,
            }
        })
        .collect();

    Ok(Json(PreviewResponse {
        previews,
        total,
        limited,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub rule: Rule,
    pub sample_metadata: Option<std::collections::BTreeMap<String, String>>,
}

pub async fn validate(Json(req): Json<ValidateRequest>) -> Json<RuleValidation> {
    let validation = match &req.sample_metadata {
        Some(sample) => RuleConfig::validate_rule(&req.rule, Some(sample)),
        None => RuleConfig::validate_rule(&req.rule, None),
    };
    Json(validation)
}

#[derive(Debug, Serialize)]
pub struct VariablesResponse {
    pub variables: Vec<&'static str>,
}

/// The fixed set of template variables a rule's path can reference (spec
/// §3 property names plus the synthetic `fileName`/`extension`/`fileType`
/// fields every completed file carries).
pub async fn variables() -> Json<VariablesResponse> {
    Json(VariablesResponse {
        variables: vec![
            "filePath",
            "fileName",
            "extension",
            "fileType",
            "size",
            "mtime",
            "ctime",
            "title",
            "movieYear",
            "year",
            "titles.eng",
            "season",
            "episode",
        ],
    })
}

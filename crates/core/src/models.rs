//! Domain model types shared by detection, analysis, strategy generation,
//! execution and validation.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::ExecutionError;

// ---------------------------------------------------------------------------
// Risk
// ---------------------------------------------------------------------------

/// Ordered risk scale used for conflicts, findings and commits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Weight used when averaging risk across many conflicts.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Critical => 1.0,
            Self::High => 0.7,
            Self::Medium => 0.4,
            Self::Low => 0.1,
            Self::VeryLow => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Lenient parse used for externally supplied values (AI output).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "very_low" => Some(Self::VeryLow),
            "low" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// Categorisation of a detected conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictTypeExtended {
    /// Both sides edited the same lines.
    Content,
    /// Git reported a conflict we could not analyse further.
    Merge,
    /// Both sides changed definitions (signatures, imports).
    Semantic,
    /// Both sides restructured classes or module layout.
    Architectural,
    /// A dependency manifest conflicts.
    Dependency,
    /// A configuration file conflicts.
    Configuration,
    /// Both sides added the same path.
    AddAdd,
    /// One side edited, the other deleted.
    ModifyDelete,
    /// Rename involved on at least one side.
    Rename,
    /// Binary file changed on both sides.
    Binary,
}

impl ConflictTypeExtended {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Merge => "merge",
            Self::Semantic => "semantic",
            Self::Architectural => "architectural",
            Self::Dependency => "dependency",
            Self::Configuration => "configuration",
            Self::AddAdd => "add_add",
            Self::ModifyDelete => "modify_delete",
            Self::Rename => "rename",
            Self::Binary => "binary",
        }
    }

    /// Conflicts of these kinds always go to a human.
    pub fn needs_human(&self) -> bool {
        matches!(
            self,
            Self::Semantic | Self::Architectural | Self::ModifyDelete | Self::Rename | Self::Binary
        )
    }
}

impl std::fmt::Display for ConflictTypeExtended {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which conflict-marker layout a block was written in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MarkerStyle {
    /// `<<<<<<<` / `=======` / `>>>>>>>`.
    Merge,
    /// As `Merge`, plus a `|||||||` base section.
    Diff3,
}

/// One `<<<<<<<` ... `>>>>>>>` region of a merged file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictBlock {
    pub file_path: String,
    /// 1-based line of the `<<<<<<<` marker.
    pub start_line: usize,
    /// 1-based line of the `>>>>>>>` marker.
    pub end_line: usize,
    /// Our side (target branch), each line keeping its terminator.
    pub current_content: String,
    /// Their side (source branch), each line keeping its terminator.
    pub incoming_content: String,
    pub base_content: Option<String>,
    pub marker_style: MarkerStyle,
}

impl ConflictBlock {
    /// Number of content lines on both sides of the block.
    pub fn total_lines(&self) -> usize {
        self.current_content.lines().count() + self.incoming_content.lines().count()
    }

    /// Number of lines the block occupies in the merged file, markers included.
    pub fn span(&self) -> usize {
        self.end_line + 1 - self.start_line
    }
}

/// A conflict detected between two refs.
///
/// Blocks are fixed at construction; analysis components only read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub file_paths: Vec<String>,
    pub conflict_type: ConflictTypeExtended,
    pub risk_level: RiskLevel,
    pub description: String,
    blocks: Vec<ConflictBlock>,
    pub estimated_resolution_minutes: u32,
    /// Branch (or ref) being merged in.
    pub source_ref: String,
    /// Branch (or ref) being merged into.
    pub target_ref: String,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    /// Create a conflict for a single file. The ID is derived from the refs
    /// and the path so re-scanning the same branches yields the same ID.
    pub fn new(
        source_ref: impl Into<String>,
        target_ref: impl Into<String>,
        file_path: impl Into<String>,
        conflict_type: ConflictTypeExtended,
        blocks: Vec<ConflictBlock>,
    ) -> Self {
        let source_ref = source_ref.into();
        let target_ref = target_ref.into();
        let file_path = file_path.into();
        let id = conflict_id(&source_ref, &target_ref, &file_path);
        Self {
            id,
            file_paths: vec![file_path],
            conflict_type,
            risk_level: RiskLevel::Medium,
            description: String::new(),
            blocks,
            estimated_resolution_minutes: 0,
            source_ref,
            target_ref,
            detected_at: Utc::now(),
        }
    }

    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_estimate(mut self, minutes: u32) -> Self {
        self.estimated_resolution_minutes = minutes;
        self
    }

    pub fn blocks(&self) -> &[ConflictBlock] {
        &self.blocks
    }

    pub fn primary_path(&self) -> &str {
        self.file_paths.first().map(String::as_str).unwrap_or("")
    }

    /// Eight-character prefix used in tables and strategy IDs.
    pub fn short_id(&self) -> &str {
        &self.id[..8.min(self.id.len())]
    }
}

fn conflict_id(source_ref: &str, target_ref: &str, file_path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(target_ref.as_bytes());
    hasher.update([0u8]);
    hasher.update(source_ref.as_bytes());
    hasher.update([0u8]);
    hasher.update(file_path.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Kinds of semantic finding beyond the textual diff.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SemanticConflictType {
    SignatureChange,
    FunctionRemoved,
    NameShadowing,
    ImportRemoved,
    ImportShadowing,
    ClassRemoved,
    ClassNameConflict,
}

impl std::fmt::Display for SemanticConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SignatureChange => "signature_change",
            Self::FunctionRemoved => "function_removed",
            Self::NameShadowing => "name_shadowing",
            Self::ImportRemoved => "import_removed",
            Self::ImportShadowing => "import_shadowing",
            Self::ClassRemoved => "class_removed",
            Self::ClassNameConflict => "class_name_conflict",
        };
        f.write_str(s)
    }
}

/// A single semantic finding for one conflict block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticConflictDetail {
    #[serde(rename = "type")]
    pub kind: SemanticConflictType,
    pub description: String,
    pub severity: RiskLevel,
    pub affected_symbols: Vec<String>,
    pub evidence: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Resolution approach recommended for a conflict.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    AcceptIncoming,
    AcceptCurrent,
    SemanticMerge,
    ManualResolution,
    ExpertReview,
}

impl StrategyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AcceptIncoming => "accept_incoming",
            Self::AcceptCurrent => "accept_current",
            Self::SemanticMerge => "semantic_merge",
            Self::ManualResolution => "manual_resolution",
            Self::ExpertReview => "expert_review",
        }
    }
}

impl std::fmt::Display for StrategyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Analysis outcome for one conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub conflict_id: String,
    /// 0 = trivial, 1 = very complex.
    pub complexity_score: f64,
    /// Composite ease-of-resolution metric in [0, 1].
    pub alignment_score: f64,
    pub risk_level: RiskLevel,
    pub estimated_resolution_time_minutes: u32,
    pub is_auto_resolvable: bool,
    pub recommended_strategy_type: StrategyType,
    pub root_cause: String,
    pub confidence_score: f64,
    pub semantic_findings: Vec<SemanticConflictDetail>,
    pub compliance_score: Option<f64>,
}

// ---------------------------------------------------------------------------
// Strategies and plans
// ---------------------------------------------------------------------------

/// Which side `git checkout` should take.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Ours,
    Theirs,
}

impl Side {
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Ours => "--ours",
            Self::Theirs => "--theirs",
        }
    }
}

/// What a resolution step does. Each action carries exactly the fields it
/// needs; block indices refer to [`Conflict::blocks`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum StepAction {
    GitCheckout { path: String, side: Side },
    GitAdd { path: String },
    WriteFile { path: String, content: String },
    SemanticMerge { block_index: usize },
    ApplyMerge { block_index: usize },
    ManualEdit { path: String, instructions: String },
}

impl StepAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GitCheckout { .. } => "git_checkout",
            Self::GitAdd { .. } => "git_add",
            Self::WriteFile { .. } => "write_file",
            Self::SemanticMerge { .. } => "semantic_merge",
            Self::ApplyMerge { .. } => "apply_merge",
            Self::ManualEdit { .. } => "manual_edit",
        }
    }

    /// The repository-relative path the action touches, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::GitCheckout { path, .. }
            | Self::GitAdd { path }
            | Self::WriteFile { path, .. }
            | Self::ManualEdit { path, .. } => Some(path),
            Self::SemanticMerge { .. } | Self::ApplyMerge { .. } => None,
        }
    }
}

/// One step of a strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionStep {
    pub id: String,
    pub description: String,
    #[serde(flatten)]
    pub action: StepAction,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl ResolutionStep {
    pub fn new(id: impl Into<String>, description: impl Into<String>, action: StepAction) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            action,
            dependencies: Vec::new(),
        }
    }

    pub fn after(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }
}

/// A named, ordered way of resolving one conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionStrategy {
    pub id: String,
    pub conflict_id: String,
    pub name: String,
    pub strategy_type: StrategyType,
    pub steps: Vec<ResolutionStep>,
    pub estimated_time_minutes: u32,
    pub risk_assessment: RiskLevel,
    pub requires_approval: bool,
    pub confidence: f64,
    pub ai_generated: bool,
    pub model_used: Option<String>,
}

/// Lifecycle of a resolution plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Status only moves forward: pending -> in_progress -> completed|failed.
    /// A pending plan may also fail directly (rejected before any step ran).
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An executable instance of a strategy, owned by the executor during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionPlan {
    pub id: String,
    pub conflict_id: String,
    pub strategy_id: String,
    pub steps: Vec<ResolutionStep>,
    status: ExecutionStatus,
    /// Index of the next step to execute.
    pub next_step: usize,
    pub failure: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResolutionPlan {
    pub fn new(
        conflict_id: impl Into<String>,
        strategy_id: impl Into<String>,
        steps: Vec<ResolutionStep>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conflict_id: conflict_id.into(),
            strategy_id: strategy_id.into(),
            steps,
            status: ExecutionStatus::Pending,
            next_step: 0,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    /// Move the plan forward. Backwards or repeated transitions are rejected.
    pub fn transition(&mut self, next: ExecutionStatus) -> Result<(), ExecutionError> {
        if !self.status.can_transition_to(next) {
            return Err(ExecutionError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark the plan failed with the given description.
    pub fn fail(&mut self, detail: impl Into<String>) -> Result<(), ExecutionError> {
        self.transition(ExecutionStatus::Failed)?;
        self.failure = Some(detail.into());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Passed,
    Failed,
    Error,
}

impl std::fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Passed => write!(f, "passed"),
            Self::Failed => write!(f, "failed"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of a single validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub component: String,
    pub status: ValidationStatus,
    pub details: String,
    pub score: f64,
}

impl ValidationResult {
    pub fn passed(component: &str, details: impl Into<String>, score: f64) -> Self {
        Self {
            component: component.to_string(),
            status: ValidationStatus::Passed,
            details: details.into(),
            score,
        }
    }

    pub fn failed(component: &str, details: impl Into<String>, score: f64) -> Self {
        Self {
            component: component.to_string(),
            status: ValidationStatus::Failed,
            details: details.into(),
            score,
        }
    }

    pub fn error(component: &str, details: impl Into<String>) -> Self {
        Self {
            component: component.to_string(),
            status: ValidationStatus::Error,
            details: details.into(),
            score: 0.0,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == ValidationStatus::Passed
    }
}

// ---------------------------------------------------------------------------
// Commit history
// ---------------------------------------------------------------------------

/// Conventional-commit type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CommitCategory {
    Feat,
    Fix,
    Docs,
    Style,
    Refactor,
    Perf,
    Test,
    Build,
    Ci,
    Chore,
    Revert,
    Other,
}

impl CommitCategory {
    pub fn from_type(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "feat" | "feature" => Self::Feat,
            "fix" | "bugfix" | "hotfix" => Self::Fix,
            "docs" | "doc" => Self::Docs,
            "style" => Self::Style,
            "refactor" => Self::Refactor,
            "perf" => Self::Perf,
            "test" | "tests" => Self::Test,
            "build" | "deps" => Self::Build,
            "ci" => Self::Ci,
            "chore" => Self::Chore,
            "revert" => Self::Revert,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feat => "feat",
            Self::Fix => "fix",
            Self::Docs => "docs",
            Self::Style => "style",
            Self::Refactor => "refactor",
            Self::Perf => "perf",
            Self::Test => "test",
            Self::Build => "build",
            Self::Ci => "ci",
            Self::Chore => "chore",
            Self::Revert => "revert",
            Self::Other => "other",
        }
    }

    /// Build, CI and chore commits change infrastructure.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Build | Self::Ci | Self::Chore)
    }
}

impl std::fmt::Display for CommitCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A commit from `git log`, enriched in place by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub hash: String,
    pub author: String,
    pub date: DateTime<FixedOffset>,
    pub message: String,
    pub files_changed: Vec<String>,
    pub category: Option<CommitCategory>,
    pub risk_level: Option<RiskLevel>,
    pub is_merge: bool,
    pub breaking: bool,
    pub scope: Option<String>,
}

impl Commit {
    pub fn new(
        hash: impl Into<String>,
        author: impl Into<String>,
        date: DateTime<FixedOffset>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            hash: hash.into(),
            author: author.into(),
            date,
            message: message.into(),
            files_changed: Vec::new(),
            category: None,
            risk_level: None,
            is_merge: false,
            breaking: false,
            scope: None,
        }
    }
}

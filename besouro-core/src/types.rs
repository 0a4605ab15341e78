//! Core domain types for besouro
//!
//! These types represent the developer activity observed in the IDE and the
//! episodes recognized from it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Action** | One observed developer event (edit, file open, test case, test session) |
//! | **File action** | An action bound to a resource path; participates in linking |
//! | **Link** | Back-reference from a file action to the previous action on the same path |
//! | **Increase** | Clamped difference between a metric and its linked predecessor |
//! | **Episode** | A classified window of actions ending in a passing test session |
//!
//! Actions form a closed set of variants. Capability checks
//! ([`Action::as_file_action`], [`Action::as_unit_test`]) group them the way
//! the linker and the classifier need, so a new variant has to be placed
//! explicitly in each capability.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ============================================
// Identity
// ============================================

/// Stable identity of an action, assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(Uuid);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================
// Links
// ============================================

/// Structural metrics of a source file, computed by the static analyzer
/// before the action reaches the core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureMetrics {
    /// Number of methods
    #[serde(default)]
    pub methods: u32,
    /// Number of statements
    #[serde(default)]
    pub statements: u32,
    /// Number of test assertions
    #[serde(default)]
    pub test_assertions: u32,
    /// Number of test methods
    #[serde(default)]
    pub test_methods: u32,
}

/// What the linker remembers about the last file action on a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSnapshot {
    /// Identity of the remembered action
    pub id: ActionId,
    /// When the remembered action happened
    pub timestamp: DateTime<Utc>,
    /// File size in bytes
    pub size: u64,
    /// Structure at that point; `None` for file-open actions
    pub structure: Option<StructureMetrics>,
}

/// Link state of a file action.
///
/// Starts as `Unlinked`; the linker moves it exactly once to `First` (no
/// earlier action on the path) or `Previous`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Link {
    #[default]
    Unlinked,
    First,
    Previous(FileSnapshot),
}

/// Capability shared by resource-bearing, linkable actions.
pub trait FileAction {
    /// Resource path; the linking key.
    fn path(&self) -> &str;

    /// What a later action on the same path is measured against.
    fn snapshot(&self) -> FileSnapshot;

    /// Current link state.
    fn link(&self) -> &Link;

    /// The previous action on the same path, if any.
    fn previous_action(&self) -> Option<&FileSnapshot> {
        match self.link() {
            Link::Previous(snapshot) => Some(snapshot),
            Link::Unlinked | Link::First => None,
        }
    }

    /// Whether the linker has already seen this action.
    fn is_linked(&self) -> bool {
        !matches!(self.link(), Link::Unlinked)
    }

    /// Set the previous action. Allowed once per action.
    fn set_previous_action(&mut self, previous: Option<FileSnapshot>) -> Result<()>;
}

/// Clamped increase of `current` over an optional baseline.
fn increase(current: u64, baseline: Option<u64>) -> u64 {
    baseline.map_or(0, |base| current.saturating_sub(base))
}

fn set_link(id: ActionId, link: &mut Link, previous: Option<FileSnapshot>) -> Result<()> {
    if !matches!(link, Link::Unlinked) {
        return Err(Error::AlreadyLinked(id));
    }
    *link = match previous {
        Some(snapshot) => Link::Previous(snapshot),
        None => Link::First,
    };
    Ok(())
}

// ============================================
// Edits
// ============================================

/// A change to a source file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditAction {
    #[serde(default)]
    pub id: ActionId,
    pub timestamp: DateTime<Utc>,
    /// Resource path (linking key)
    pub path: String,
    /// File size in bytes after the edit
    #[serde(default)]
    pub size: u64,
    /// Structure after the edit
    #[serde(flatten)]
    pub structure: StructureMetrics,
    /// Whether the analyzer classified the file as a test
    #[serde(default)]
    pub is_test: bool,
    #[serde(skip)]
    link: Link,
}

impl EditAction {
    pub fn new(timestamp: DateTime<Utc>, path: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            timestamp,
            path: path.into(),
            size: 0,
            structure: StructureMetrics::default(),
            is_test: false,
            link: Link::Unlinked,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_structure(mut self, structure: StructureMetrics) -> Self {
        self.structure = structure;
        self
    }

    pub fn with_test(mut self, is_test: bool) -> Self {
        self.is_test = is_test;
        self
    }

    fn baseline_structure(&self) -> Option<StructureMetrics> {
        self.previous_action().and_then(|p| p.structure)
    }

    pub fn size_increase(&self) -> u64 {
        increase(self.size, self.previous_action().map(|p| p.size))
    }

    pub fn method_increase(&self) -> u64 {
        let base = self.baseline_structure().map(|s| u64::from(s.methods));
        increase(u64::from(self.structure.methods), base)
    }

    pub fn statement_increase(&self) -> u64 {
        let base = self.baseline_structure().map(|s| u64::from(s.statements));
        increase(u64::from(self.structure.statements), base)
    }

    pub fn test_assertion_increase(&self) -> u64 {
        let base = self.baseline_structure().map(|s| u64::from(s.test_assertions));
        increase(u64::from(self.structure.test_assertions), base)
    }

    pub fn test_method_increase(&self) -> u64 {
        let base = self.baseline_structure().map(|s| u64::from(s.test_methods));
        increase(u64::from(self.structure.test_methods), base)
    }
}

impl FileAction for EditAction {
    fn path(&self) -> &str {
        &self.path
    }

    fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            id: self.id,
            timestamp: self.timestamp,
            size: self.size,
            structure: Some(self.structure),
        }
    }

    fn link(&self) -> &Link {
        &self.link
    }

    fn set_previous_action(&mut self, previous: Option<FileSnapshot>) -> Result<()> {
        set_link(self.id, &mut self.link, previous)
    }
}

// ============================================
// File opens
// ============================================

/// A file opened in the editor. Records size only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOpenedAction {
    #[serde(default)]
    pub id: ActionId,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    #[serde(default)]
    pub size: u64,
    #[serde(skip)]
    link: Link,
}

impl FileOpenedAction {
    pub fn new(timestamp: DateTime<Utc>, path: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            timestamp,
            path: path.into(),
            size: 0,
            link: Link::Unlinked,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }
}

impl FileAction for FileOpenedAction {
    fn path(&self) -> &str {
        &self.path
    }

    fn snapshot(&self) -> FileSnapshot {
        FileSnapshot {
            id: self.id,
            timestamp: self.timestamp,
            size: self.size,
            structure: None,
        }
    }

    fn link(&self) -> &Link {
        &self.link
    }

    fn set_previous_action(&mut self, previous: Option<FileSnapshot>) -> Result<()> {
        set_link(self.id, &mut self.link, previous)
    }
}

// ============================================
// Unit tests
// ============================================

/// Capability shared by test-outcome-bearing actions.
pub trait UnitTestAction {
    fn is_successful(&self) -> bool;
}

/// A single test case result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTestCaseAction {
    #[serde(default)]
    pub id: ActionId,
    pub timestamp: DateTime<Utc>,
    /// Qualified test name
    pub test_name: String,
    pub successful: bool,
}

impl UnitTestCaseAction {
    pub fn new(timestamp: DateTime<Utc>, test_name: impl Into<String>, successful: bool) -> Self {
        Self {
            id: ActionId::new(),
            timestamp,
            test_name: test_name.into(),
            successful,
        }
    }
}

impl UnitTestAction for UnitTestCaseAction {
    fn is_successful(&self) -> bool {
        self.successful
    }
}

/// A whole test run. A successful one closes an episode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTestSessionAction {
    #[serde(default)]
    pub id: ActionId,
    pub timestamp: DateTime<Utc>,
    /// Launch configuration name, when the IDE reports one
    #[serde(default)]
    pub run_name: Option<String>,
    pub successful: bool,
}

impl UnitTestSessionAction {
    pub fn new(timestamp: DateTime<Utc>, successful: bool) -> Self {
        Self {
            id: ActionId::new(),
            timestamp,
            run_name: None,
            successful,
        }
    }

    pub fn with_run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }
}

impl UnitTestAction for UnitTestSessionAction {
    fn is_successful(&self) -> bool {
        self.successful
    }
}

// ============================================
// Actions
// ============================================

/// One observed developer event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Edit(EditAction),
    FileOpened(FileOpenedAction),
    UnitTestCase(UnitTestCaseAction),
    UnitTestSession(UnitTestSessionAction),
}

impl Action {
    pub fn id(&self) -> ActionId {
        match self {
            Action::Edit(a) => a.id,
            Action::FileOpened(a) => a.id,
            Action::UnitTestCase(a) => a.id,
            Action::UnitTestSession(a) => a.id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Action::Edit(a) => a.timestamp,
            Action::FileOpened(a) => a.timestamp,
            Action::UnitTestCase(a) => a.timestamp,
            Action::UnitTestSession(a) => a.timestamp,
        }
    }

    /// Identifier used in logs and fact templates
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Edit(_) => "edit",
            Action::FileOpened(_) => "file_opened",
            Action::UnitTestCase(_) => "unit_test_case",
            Action::UnitTestSession(_) => "unit_test_session",
        }
    }

    pub fn as_file_action(&self) -> Option<&dyn FileAction> {
        match self {
            Action::Edit(a) => Some(a),
            Action::FileOpened(a) => Some(a),
            Action::UnitTestCase(_) | Action::UnitTestSession(_) => None,
        }
    }

    pub fn as_file_action_mut(&mut self) -> Option<&mut dyn FileAction> {
        match self {
            Action::Edit(a) => Some(a),
            Action::FileOpened(a) => Some(a),
            Action::UnitTestCase(_) | Action::UnitTestSession(_) => None,
        }
    }

    pub fn as_unit_test(&self) -> Option<&dyn UnitTestAction> {
        match self {
            Action::UnitTestCase(a) => Some(a),
            Action::UnitTestSession(a) => Some(a),
            Action::Edit(_) | Action::FileOpened(_) => None,
        }
    }

    /// Whether this action ends the current episode window.
    pub fn is_passing_session(&self) -> bool {
        matches!(self, Action::UnitTestSession(s) if s.is_successful())
    }
}

impl From<EditAction> for Action {
    fn from(action: EditAction) -> Self {
        Action::Edit(action)
    }
}

impl From<FileOpenedAction> for Action {
    fn from(action: FileOpenedAction) -> Self {
        Action::FileOpened(action)
    }
}

impl From<UnitTestCaseAction> for Action {
    fn from(action: UnitTestCaseAction) -> Self {
        Action::UnitTestCase(action)
    }
}

impl From<UnitTestSessionAction> for Action {
    fn from(action: UnitTestSessionAction) -> Self {
        Action::UnitTestSession(action)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ts = self.timestamp().format("%H:%M:%S");
        match self {
            Action::Edit(a) => write!(
                f,
                "{ts} EDIT {} {}B (+{}B) methods={} (+{}) statements={} (+{}){}",
                a.path,
                a.size,
                a.size_increase(),
                a.structure.methods,
                a.method_increase(),
                a.structure.statements,
                a.statement_increase(),
                if a.is_test { " test" } else { "" }
            ),
            Action::FileOpened(a) => write!(f, "{ts} OPEN {} {}B", a.path, a.size),
            Action::UnitTestCase(a) => write!(
                f,
                "{ts} TEST {} {}",
                a.test_name,
                if a.successful { "OK" } else { "FAIL" }
            ),
            Action::UnitTestSession(a) => write!(
                f,
                "{ts} SESSION {}{}",
                if a.successful { "OK" } else { "FAIL" },
                a.run_name
                    .as_deref()
                    .map(|n| format!(" ({n})"))
                    .unwrap_or_default()
            ),
        }
    }
}

// ============================================
// Episodes
// ============================================

/// A classified window of developer activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    /// Category label from the rule set (e.g. "test-first")
    pub category: String,
    /// Type label within the category (e.g. "1")
    #[serde(rename = "type")]
    pub kind: String,
    /// Number of actions in the classified window
    pub action_count: usize,
    /// Timestamp of the first action in the window
    pub started_at: DateTime<Utc>,
    /// Timestamp of the passing test session that closed the window
    pub ended_at: DateTime<Utc>,
}

impl Episode {
    /// Window duration in seconds
    pub fn duration_secs(&self) -> i64 {
        self.ended_at
            .signed_duration_since(self.started_at)
            .num_seconds()
    }
}

impl std::fmt::Display for Episode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[episode] {} {}", self.category, self.kind)
    }
}

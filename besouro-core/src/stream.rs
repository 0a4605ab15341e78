//! Episode classifier stream
//!
//! The stream owns the linker, the episode window buffer and the recognized
//! episodes. Actions are pushed one at a time; a passing test session closes
//! the window:
//!
//! ```text
//! add_action ──► link ──► buffer ──► passing session? ──no──► (accumulate)
//!                                         │
//!                                        yes
//!                                         ▼
//!                 reset ► assert(project(buffer)) ► run ► query
//!                                         │
//!                                         ▼
//!                        record episodes, clear buffer
//! ```
//!
//! Access is single threaded; callers serialize `add_action` themselves.
//! Classification failures leave the buffer intact and keep every episode
//! recorded so far.

use crate::config::Config;
use crate::error::Result;
use crate::facts;
use crate::inference::{InferenceEngine, RuleEngine};
use crate::link::ActionLinker;
use crate::types::{Action, Episode};

/// Name of the query that yields `(category, type)` rows.
pub const CLASSIFICATION_QUERY: &str = "episode-classification-query";

/// Streaming episode classifier.
#[derive(Debug)]
pub struct EpisodeClassifierStream<E: InferenceEngine = RuleEngine> {
    engine: E,
    linker: ActionLinker,
    actions: Vec<Action>,
    episodes: Vec<Episode>,
}

impl EpisodeClassifierStream<RuleEngine> {
    /// Stream over the built-in rule set.
    pub fn new() -> Result<Self> {
        Ok(Self::with_engine(RuleEngine::builtin()?))
    }

    /// Stream over the rules and limits named by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.engine.validate()?;
        let rules = config.rules.load()?;
        Ok(Self::with_engine(RuleEngine::new(rules, &config.engine)))
    }
}

impl<E: InferenceEngine> EpisodeClassifierStream<E> {
    pub fn with_engine(engine: E) -> Self {
        Self {
            engine,
            linker: ActionLinker::new(),
            actions: Vec::new(),
            episodes: Vec::new(),
        }
    }

    /// Ingest one action.
    ///
    /// A passing test session classifies the buffered window, records the
    /// resulting episodes and starts a new window. Any error leaves the
    /// buffer and the recorded episodes as they were.
    pub fn add_action(&mut self, mut action: Action) -> Result<()> {
        self.linker.link(&mut action)?;
        tracing::info!(kind = action.kind(), id = %action.id(), "[action] {}", action);

        let closes_window = action.is_passing_session();
        self.actions.push(action);

        if !closes_window {
            return Ok(());
        }

        let recognized = self.classify_pending()?;
        for episode in &recognized {
            tracing::info!(
                category = %episode.category,
                kind = %episode.kind,
                actions = episode.action_count,
                "{}",
                episode
            );
        }
        if recognized.is_empty() {
            tracing::debug!(actions = self.actions.len(), "Window closed without an episode");
        }

        self.episodes.extend(recognized);
        self.actions.clear();
        Ok(())
    }

    /// Classify the current buffer without recording or clearing it.
    pub fn classify_pending(&mut self) -> Result<Vec<Episode>> {
        let (Some(first), Some(last)) = (self.actions.first(), self.actions.last()) else {
            return Ok(Vec::new());
        };
        let started_at = first.timestamp();
        let ended_at = last.timestamp();

        let facts = facts::project(&self.actions)?;
        for fact in &facts {
            tracing::trace!(%fact, "Projected fact");
        }

        self.engine.reset();
        self.engine.assert_facts(&facts)?;
        let fired = self.engine.run()?;
        tracing::debug!(fired, facts = facts.len(), "Classified window");

        let mut episodes = Vec::new();
        for row in self.engine.query(CLASSIFICATION_QUERY, &[])? {
            episodes.push(Episode {
                category: row.get_str("category")?.to_string(),
                kind: row.get_str("type")?.to_string(),
                action_count: self.actions.len(),
                started_at,
                ended_at,
            });
        }
        Ok(episodes)
    }

    /// Actions in the current, unclassified window.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Every episode recognized so far, in recognition order.
    pub fn recognized_episodes(&self) -> &[Episode] {
        &self.episodes
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn linker(&self) -> &ActionLinker {
        &self.linker
    }
}

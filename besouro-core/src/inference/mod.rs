//! Forward-chaining inference
//!
//! The classifier talks to a rule engine through the [`InferenceEngine`]
//! capability: reset, assert facts, run to a fixed point, query. The
//! built-in [`RuleEngine`] evaluates a [`RuleSet`] loaded once at
//! construction.
//!
//! ## Evaluation
//!
//! ```text
//! ┌───────────┐  assert   ┌────────────┐   match    ┌──────────────┐
//! │ projected │ ───────►  │  fact base │ ─────────► │  activations │
//! │   facts   │           │ (deduped)  │ ◄───────── │ (agenda)     │
//! └───────────┘           └────────────┘   fire one └──────────────┘
//!                               │
//!                               ▼ query
//!                         ┌────────────┐
//!                         │ QueryResult│
//!                         └────────────┘
//! ```
//!
//! Matching is incremental. Every fact, asserted or derived, is joined once
//! against the rules that mention its template, and each new fact tuple
//! becomes an activation on the agenda. Each cycle fires the first
//! activation ordered by salience (highest first), then rule declaration
//! order, then fact order. Negated patterns are checked again right before
//! firing; facts are never retracted during a run, so an activation blocked
//! once stays blocked. A rule fires at most once per matched fact tuple and
//! the run ends when the agenda is empty.

mod expr;
mod query;
mod ruleset;

pub use query::{QueryResult, QueryRow};
pub use ruleset::{RuleSet, SOURCE_FILES};

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::facts::{Fact, Value};
use ruleset::{Pattern, Term};

/// Variable bindings while matching a rule or query.
pub(crate) type Bindings = BTreeMap<String, Value>;

/// Capability the classifier needs from a rule engine.
pub trait InferenceEngine {
    /// Drop all facts and derived state.
    fn reset(&mut self);

    /// Add facts in the given order.
    fn assert_facts(&mut self, facts: &[Fact]) -> Result<()>;

    /// Fire rules until none applies. Returns the number of rules fired.
    fn run(&mut self) -> Result<usize>;

    /// Evaluate a named query against the fact base left by [`run`](Self::run).
    fn query(&mut self, name: &str, params: &[Value]) -> Result<QueryResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Empty,
    Asserted,
    Ran,
    Queried,
}

/// One way a rule or query matched: the facts it used and its bindings.
#[derive(Debug)]
struct Match {
    facts: Vec<usize>,
    bindings: Bindings,
}

/// Pending rule firing, in agenda order: salience, rule index, fact tuple.
type Activation = (Reverse<i64>, usize, Vec<usize>);

/// Restricts a join to tuples that contain one particular new fact.
///
/// Patterns before `position` only see older facts and patterns after it see
/// facts up to and including `fact`, so a tuple is produced exactly once: at
/// the first position where the new fact appears.
#[derive(Debug, Clone, Copy)]
struct Pivot {
    position: usize,
    fact: usize,
}

/// Rule evaluator over a fixed [`RuleSet`].
#[derive(Debug)]
pub struct RuleEngine {
    rules: RuleSet,
    /// Positive patterns by template, as (rule index, pattern position).
    triggers: HashMap<String, Vec<(usize, usize)>>,
    facts: Vec<Fact>,
    known: HashSet<Fact>,
    by_template: HashMap<String, Vec<usize>>,
    /// Facts below this id have been joined against the rules.
    propagated: usize,
    agenda: BTreeSet<Activation>,
    /// Facts handed to `assert_facts` since the last reset.
    asserted: usize,
    max_cycles: usize,
    state: EngineState,
}

impl RuleEngine {
    pub fn new(rules: RuleSet, config: &EngineConfig) -> Self {
        let mut triggers: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (rule_index, rule) in rules.rules.iter().enumerate() {
            for (position, pattern) in rule.patterns.iter().enumerate() {
                if !pattern.negated {
                    triggers
                        .entry(pattern.template.clone())
                        .or_default()
                        .push((rule_index, position));
                }
            }
        }

        tracing::info!(
            rules = rules.rules.len(),
            fingerprint = rules.fingerprint(),
            max_cycles = config.max_cycles,
            "Rule engine ready"
        );

        Self {
            rules,
            triggers,
            facts: Vec::new(),
            known: HashSet::new(),
            by_template: HashMap::new(),
            propagated: 0,
            agenda: BTreeSet::new(),
            asserted: 0,
            max_cycles: config.max_cycles,
            state: EngineState::Empty,
        }
    }

    /// Engine over the built-in rule set with default limits.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(RuleSet::builtin()?, &EngineConfig::default()))
    }

    pub fn rule_set(&self) -> &RuleSet {
        &self.rules
    }

    /// Current fact base, asserted and derived, in assertion order.
    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Firings one `run()` may perform before it gives up.
    ///
    /// Scales with the asserted facts so that a long window gets a
    /// proportionally larger budget.
    pub fn firing_limit(&self) -> usize {
        self.max_cycles.saturating_mul(self.asserted.max(1))
    }

    fn check_fact(&self, fact: &Fact) -> Result<()> {
        let declared = self.rules.slots_of(&fact.template).ok_or_else(|| {
            Error::Inference(format!("no template for fact {:?}", fact.template))
        })?;
        if declared.len() != fact.slots.len()
            || declared.iter().any(|slot| !fact.slots.contains_key(slot))
        {
            return Err(Error::Inference(format!(
                "fact {fact} does not fit template slots {declared:?}"
            )));
        }
        Ok(())
    }

    /// Add a fact unless an identical one exists. Returns whether it was new.
    fn insert(&mut self, fact: Fact) -> bool {
        if self.known.contains(&fact) {
            return false;
        }
        let id = self.facts.len();
        self.by_template
            .entry(fact.template.clone())
            .or_default()
            .push(id);
        self.known.insert(fact.clone());
        self.facts.push(fact);
        true
    }

    /// Ids of the facts of one template, ascending.
    fn ids_of(&self, template: &str) -> &[usize] {
        self.by_template
            .get(template)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Extend `bindings` so that `pattern` matches `fact`, if possible.
    fn unify(pattern: &Pattern, fact: &Fact, bindings: &Bindings) -> Result<Option<Bindings>> {
        if pattern.template != fact.template {
            return Ok(None);
        }

        let mut extended = bindings.clone();
        for (slot, term) in &pattern.slots {
            let Some(value) = fact.get(slot) else {
                return Ok(None);
            };
            match term {
                Term::Lit(literal) => {
                    if literal != value {
                        return Ok(None);
                    }
                }
                Term::Var(var) => match extended.get(var) {
                    Some(bound) if bound != value => return Ok(None),
                    Some(_) => {}
                    None => {
                        extended.insert(var.clone(), value.clone());
                    }
                },
            }
        }

        if let Some(test) = &pattern.test {
            match test.eval(&extended).map_err(|e| {
                Error::Inference(format!("test on {:?} failed: {e}", pattern.template))
            })? {
                Value::Bool(true) => {}
                Value::Bool(false) => return Ok(None),
                other => {
                    return Err(Error::Inference(format!(
                        "test on {:?} produced a {}, expected a boolean",
                        pattern.template,
                        other.type_name()
                    )))
                }
            }
        }

        Ok(Some(extended))
    }

    /// Whether a negated pattern is contradicted by some fact.
    fn blocked(&self, pattern: &Pattern, bindings: &Bindings) -> Result<bool> {
        for &id in self.ids_of(&pattern.template) {
            if Self::unify(pattern, &self.facts[id], bindings)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn search(
        &self,
        patterns: &[Pattern],
        position: usize,
        pivot: Option<Pivot>,
        bindings: &Bindings,
        used: &mut Vec<usize>,
        out: &mut Vec<Match>,
    ) -> Result<()> {
        let Some(pattern) = patterns.get(position) else {
            out.push(Match {
                facts: used.clone(),
                bindings: bindings.clone(),
            });
            return Ok(());
        };

        if pattern.negated {
            if self.blocked(pattern, bindings)? {
                return Ok(());
            }
            return self.search(patterns, position + 1, pivot, bindings, used, out);
        }

        let all = self.ids_of(&pattern.template);
        let candidates = match pivot {
            None => all,
            Some(p) if position < p.position => &all[..all.partition_point(|&id| id < p.fact)],
            Some(p) if position > p.position => &all[..all.partition_point(|&id| id <= p.fact)],
            Some(p) => {
                let at = all.partition_point(|&id| id < p.fact);
                &all[at..all.partition_point(|&id| id <= p.fact)]
            }
        };

        for &id in candidates {
            if let Some(extended) = Self::unify(pattern, &self.facts[id], bindings)? {
                used.push(id);
                self.search(patterns, position + 1, pivot, &extended, used, out)?;
                used.pop();
            }
        }
        Ok(())
    }

    /// Join fact `id` against every rule pattern of its template.
    fn propagate(&mut self, id: usize) -> Result<()> {
        let Some(triggers) = self.triggers.get(&self.facts[id].template) else {
            return Ok(());
        };

        let mut activations = Vec::new();
        for &(rule_index, position) in triggers {
            let rule = &self.rules.rules[rule_index];
            let mut found = Vec::new();
            self.search(
                &rule.patterns,
                0,
                Some(Pivot { position, fact: id }),
                &Bindings::new(),
                &mut Vec::new(),
                &mut found,
            )?;
            activations.extend(
                found
                    .into_iter()
                    .map(|m| (Reverse(rule.salience), rule_index, m.facts)),
            );
        }
        self.agenda.extend(activations);
        Ok(())
    }

    /// Rebuild the bindings of an activation against the current fact base.
    /// `None` when a negated pattern has been contradicted since it was queued.
    fn replay(&self, rule_index: usize, facts: &[usize]) -> Result<Option<Bindings>> {
        let rule = &self.rules.rules[rule_index];
        let mut bindings = Bindings::new();
        let mut matched = facts.iter();
        for pattern in &rule.patterns {
            if pattern.negated {
                if self.blocked(pattern, &bindings)? {
                    return Ok(None);
                }
                continue;
            }
            let extended = match matched.next() {
                Some(&id) => Self::unify(pattern, &self.facts[id], &bindings)?,
                None => None,
            };
            bindings = extended.ok_or_else(|| {
                Error::Inference(format!("rule {:?}: stale activation {facts:?}", rule.name))
            })?;
        }
        Ok(Some(bindings))
    }

    fn fire(&mut self, rule_index: usize, facts: &[usize], bindings: &Bindings) -> Result<()> {
        let rule = &self.rules.rules[rule_index];
        let mut derived = Vec::with_capacity(rule.assertions.len());
        for assertion in &rule.assertions {
            let mut fact = Fact::new(assertion.template.as_str());
            for (slot, term) in &assertion.slots {
                let value = match term {
                    Term::Lit(value) => value.clone(),
                    Term::Var(var) => bindings.get(var).cloned().ok_or_else(|| {
                        Error::Inference(format!("rule {:?}: ?{var} is not bound", rule.name))
                    })?,
                };
                fact.slots.insert(slot.clone(), value);
            }
            derived.push(fact);
        }

        tracing::trace!(rule = %rule.name, facts = ?facts, "Firing rule");
        for fact in derived {
            if self.insert(fact) {
                tracing::trace!(fact = %self.facts[self.facts.len() - 1], "Derived fact");
            }
        }
        Ok(())
    }
}

impl InferenceEngine for RuleEngine {
    fn reset(&mut self) {
        self.facts.clear();
        self.known.clear();
        self.by_template.clear();
        self.propagated = 0;
        self.agenda.clear();
        self.asserted = 0;
        self.state = EngineState::Empty;
    }

    fn assert_facts(&mut self, facts: &[Fact]) -> Result<()> {
        for fact in facts {
            self.check_fact(fact)?;
        }
        for fact in facts {
            self.insert(fact.clone());
        }
        self.asserted += facts.len();
        self.state = EngineState::Asserted;
        Ok(())
    }

    fn run(&mut self) -> Result<usize> {
        let limit = self.firing_limit();
        let mut fired = 0;
        loop {
            while self.propagated < self.facts.len() {
                self.propagate(self.propagated)?;
                self.propagated += 1;
            }

            let Some((_, rule_index, facts)) = self.agenda.pop_first() else {
                break;
            };
            let Some(bindings) = self.replay(rule_index, &facts)? else {
                continue;
            };
            if fired >= limit {
                return Err(Error::Inference(format!(
                    "firing limit of {limit} reached for {} asserted facts (last: {:?})",
                    self.asserted, self.rules.rules[rule_index].name
                )));
            }
            self.fire(rule_index, &facts, &bindings)?;
            fired += 1;
        }
        tracing::debug!(fired, facts = self.facts.len(), "Inference complete");
        self.state = EngineState::Ran;
        Ok(fired)
    }

    fn query(&mut self, name: &str, params: &[Value]) -> Result<QueryResult> {
        if self.state != EngineState::Ran {
            return Err(Error::Inference(format!(
                "query {name:?} requires a run() since the last reset, assert or query"
            )));
        }
        let query = self
            .rules
            .queries
            .get(name)
            .ok_or_else(|| Error::Inference(format!("unknown query {name:?}")))?;
        if query.params.len() != params.len() {
            return Err(Error::Inference(format!(
                "query {name:?} takes {} parameters, got {}",
                query.params.len(),
                params.len()
            )));
        }

        let bindings: Bindings = query
            .params
            .iter()
            .cloned()
            .zip(params.iter().cloned())
            .collect();
        let mut found = Vec::new();
        self.search(&query.patterns, 0, None, &bindings, &mut Vec::new(), &mut found)?;

        let mut rows = Vec::with_capacity(found.len());
        for m in found {
            let mut fields = BTreeMap::new();
            for (field, var) in &query.select {
                let value = m.bindings.get(var).cloned().ok_or_else(|| {
                    Error::Inference(format!("query {name:?}: ?{var} is not bound"))
                })?;
                fields.insert(field.clone(), value);
            }
            rows.push(QueryRow::new(fields));
        }

        tracing::debug!(query = name, rows = rows.len(), "Query evaluated");
        self.state = EngineState::Queried;
        Ok(QueryResult::new(rows))
    }
}

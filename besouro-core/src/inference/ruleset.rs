//! Rule set loading and validation
//!
//! A rule set is assembled from three TOML sources, in order:
//!
//! 1. `actions.toml` - templates of the facts projected from actions
//! 2. `episode.toml` - episode vocabulary (derived templates and rules)
//! 3. `classifier.toml` - classification rules and queries
//!
//! All three share one format (`[[template]]`, `[[rule]]`, `[[query]]`)
//! and are merged into a single namespace. Everything that can be checked
//! without facts is checked here, so a rule set that loads will not fail
//! on unknown templates, unknown slots or unbound variables at run time.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::expr::Expr;
use crate::error::{Error, Result};
use crate::facts::Value;

/// File names of the three rule sources, in load order.
pub const SOURCE_FILES: [&str; 3] = ["actions.toml", "episode.toml", "classifier.toml"];

const BUILTIN_SOURCES: [(&str, &str); 3] = [
    ("actions.toml", include_str!("../../rules/actions.toml")),
    ("episode.toml", include_str!("../../rules/episode.toml")),
    ("classifier.toml", include_str!("../../rules/classifier.toml")),
];

// ============================================
// Source format
// ============================================

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RuleSource {
    #[serde(default, rename = "template")]
    templates: Vec<TemplateDef>,
    #[serde(default, rename = "rule")]
    rules: Vec<RuleDef>,
    #[serde(default, rename = "query")]
    queries: Vec<QueryDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateDef {
    name: String,
    slots: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PatternDef {
    fact: String,
    #[serde(default)]
    slots: BTreeMap<String, Value>,
    #[serde(default, rename = "where")]
    test: Option<String>,
    #[serde(default)]
    not: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AssertDef {
    fact: String,
    #[serde(default)]
    slots: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDef {
    name: String,
    #[serde(default)]
    salience: i64,
    when: Vec<PatternDef>,
    then: Vec<AssertDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryDef {
    name: String,
    #[serde(default)]
    params: Vec<String>,
    when: Vec<PatternDef>,
    select: BTreeMap<String, String>,
}

// ============================================
// Compiled form
// ============================================

/// A slot pattern or assertion value.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Term {
    Var(String),
    Lit(Value),
}

impl Term {
    fn from_value(value: Value) -> std::result::Result<Self, String> {
        match value {
            Value::Str(s) if s.starts_with('?') => parse_var(&s).map(Term::Var),
            other => Ok(Term::Lit(other)),
        }
    }
}

fn parse_var(text: &str) -> std::result::Result<String, String> {
    let name = text
        .strip_prefix('?')
        .ok_or_else(|| format!("{text:?} is not a variable"))?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid variable name {text:?}"));
    }
    Ok(name.to_string())
}

#[derive(Debug, Clone)]
pub(crate) struct Pattern {
    pub template: String,
    pub slots: Vec<(String, Term)>,
    pub test: Option<Expr>,
    pub negated: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Assertion {
    pub template: String,
    pub slots: Vec<(String, Term)>,
}

#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub name: String,
    pub salience: i64,
    pub patterns: Vec<Pattern>,
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone)]
pub(crate) struct Query {
    pub params: Vec<String>,
    pub patterns: Vec<Pattern>,
    /// Output field name and the variable it reads.
    pub select: Vec<(String, String)>,
}

/// A validated, immutable rule set.
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub(crate) templates: BTreeMap<String, Vec<String>>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) queries: BTreeMap<String, Query>,
    fingerprint: String,
}

impl RuleSet {
    /// The rule set shipped with besouro.
    pub fn builtin() -> Result<Self> {
        Self::from_sources(&BUILTIN_SOURCES)
    }

    /// Load `actions.toml`, `episode.toml` and `classifier.toml` from `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut texts = Vec::with_capacity(SOURCE_FILES.len());
        for name in SOURCE_FILES {
            let path = dir.join(name);
            let text = std::fs::read_to_string(&path).map_err(|e| {
                Error::rule_set(name, format!("cannot read {}: {}", path.display(), e))
            })?;
            texts.push((name, text));
        }
        let sources: Vec<(&str, &str)> = texts
            .iter()
            .map(|(name, text)| (*name, text.as_str()))
            .collect();
        Self::from_sources(&sources)
    }

    /// Build a rule set from `(source name, TOML text)` pairs, in load order.
    pub fn from_sources(sources: &[(&str, &str)]) -> Result<Self> {
        let mut hasher = Sha256::new();
        let mut parsed = Vec::with_capacity(sources.len());
        for (name, text) in sources {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(text.as_bytes());
            hasher.update([0u8]);
            let source: RuleSource = toml::from_str(text)
                .map_err(|e| Error::rule_set(name, format!("invalid TOML: {e}")))?;
            parsed.push((*name, source));
        }

        // Templates first, so rules in any source may use any template.
        let mut templates: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, source) in &parsed {
            for def in &source.templates {
                if templates.contains_key(&def.name) {
                    return Err(Error::rule_set(
                        name,
                        format!("duplicate template {:?}", def.name),
                    ));
                }
                let unique: BTreeSet<&String> = def.slots.iter().collect();
                if unique.len() != def.slots.len() {
                    return Err(Error::rule_set(
                        name,
                        format!("template {:?} declares a slot twice", def.name),
                    ));
                }
                templates.insert(def.name.clone(), def.slots.clone());
            }
        }

        let mut rules = Vec::new();
        let mut rule_names = BTreeSet::new();
        let mut queries = BTreeMap::new();
        for (name, source) in parsed {
            for def in source.rules {
                if !rule_names.insert(def.name.clone()) {
                    return Err(Error::rule_set(
                        name,
                        format!("duplicate rule {:?}", def.name),
                    ));
                }
                let rule = compile_rule(&templates, def)
                    .map_err(|message| Error::rule_set(name, message))?;
                rules.push(rule);
            }
            for def in source.queries {
                if queries.contains_key(&def.name) {
                    return Err(Error::rule_set(
                        name,
                        format!("duplicate query {:?}", def.name),
                    ));
                }
                let query_name = def.name.clone();
                let query = compile_query(&templates, def)
                    .map_err(|message| Error::rule_set(name, message))?;
                queries.insert(query_name, query);
            }
        }

        let fingerprint = hex::encode(hasher.finalize());
        tracing::debug!(
            templates = templates.len(),
            rules = rules.len(),
            queries = queries.len(),
            fingerprint = %fingerprint,
            "Loaded rule set"
        );

        Ok(Self {
            templates,
            rules,
            queries,
            fingerprint,
        })
    }

    /// SHA-256 over the source names and texts, hex encoded.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn rule_names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.name.as_str())
    }

    pub fn query_names(&self) -> impl Iterator<Item = &str> {
        self.queries.keys().map(String::as_str)
    }

    pub(crate) fn slots_of(&self, template: &str) -> Option<&[String]> {
        self.templates.get(template).map(Vec::as_slice)
    }
}

// ============================================
// Compilation
// ============================================

type CompileResult<T> = std::result::Result<T, String>;

fn compile_slots(
    templates: &BTreeMap<String, Vec<String>>,
    fact: &str,
    slots: BTreeMap<String, Value>,
) -> CompileResult<Vec<(String, Term)>> {
    let declared = templates
        .get(fact)
        .ok_or_else(|| format!("unknown template {fact:?}"))?;
    slots
        .into_iter()
        .map(|(slot, value)| {
            if !declared.contains(&slot) {
                return Err(format!("template {fact:?} has no slot {slot:?}"));
            }
            Ok((slot, Term::from_value(value)?))
        })
        .collect()
}

/// Compile patterns in order, tracking which variables are bound.
fn compile_patterns(
    templates: &BTreeMap<String, Vec<String>>,
    defs: Vec<PatternDef>,
    bound: &mut BTreeSet<String>,
) -> CompileResult<Vec<Pattern>> {
    let mut patterns = Vec::with_capacity(defs.len());
    for def in defs {
        let slots = compile_slots(templates, &def.fact, def.slots)?;
        let test = def
            .test
            .as_deref()
            .map(Expr::parse)
            .transpose()
            .map_err(|e| format!("bad test on {:?}: {e}", def.fact))?;

        let mut visible = bound.clone();
        for (_, term) in &slots {
            if let Term::Var(var) = term {
                visible.insert(var.clone());
            }
        }
        if let Some(test) = &test {
            if let Some(unbound) = test.variables().into_iter().find(|v| !visible.contains(*v)) {
                return Err(format!(
                    "test on {:?} uses unbound variable ?{unbound}",
                    def.fact
                ));
            }
        }
        if !def.not {
            *bound = visible;
        }

        patterns.push(Pattern {
            template: def.fact,
            slots,
            test,
            negated: def.not,
        });
    }
    Ok(patterns)
}

fn compile_rule(templates: &BTreeMap<String, Vec<String>>, def: RuleDef) -> CompileResult<Rule> {
    let context = |e: String| format!("rule {:?}: {e}", def.name);
    let mut bound = BTreeSet::new();
    let patterns = compile_patterns(templates, def.when, &mut bound).map_err(context)?;

    let mut assertions = Vec::with_capacity(def.then.len());
    for assert in def.then {
        let slots = compile_slots(templates, &assert.fact, assert.slots).map_err(context)?;
        let declared = &templates[&assert.fact];
        if slots.len() != declared.len() {
            return Err(context(format!(
                "assertion of {:?} must set every slot {:?}",
                assert.fact, declared
            )));
        }
        for (slot, term) in &slots {
            if let Term::Var(var) = term {
                if !bound.contains(var) {
                    return Err(context(format!("slot {slot:?} uses unbound variable ?{var}")));
                }
            }
        }
        assertions.push(Assertion {
            template: assert.fact,
            slots,
        });
    }
    if assertions.is_empty() {
        return Err(context("rule asserts nothing".to_string()));
    }

    Ok(Rule {
        name: def.name,
        salience: def.salience,
        patterns,
        assertions,
    })
}

fn compile_query(templates: &BTreeMap<String, Vec<String>>, def: QueryDef) -> CompileResult<Query> {
    let context = |e: String| format!("query {:?}: {e}", def.name);
    let params = def
        .params
        .iter()
        .map(|p| parse_var(p))
        .collect::<CompileResult<Vec<_>>>()
        .map_err(context)?;
    let mut bound: BTreeSet<String> = params.iter().cloned().collect();
    let patterns = compile_patterns(templates, def.when, &mut bound).map_err(context)?;

    let mut select = Vec::with_capacity(def.select.len());
    for (field, var) in def.select {
        let var = parse_var(&var).map_err(context)?;
        if !bound.contains(&var) {
            return Err(context(format!("field {field:?} uses unbound variable ?{var}")));
        }
        select.push((field, var));
    }

    Ok(Query {
        params,
        patterns,
        select,
    })
}

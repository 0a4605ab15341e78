//! Integration tests for the episode classifier
//!
//! Every test drives a fresh stream through the public API and checks the
//! episodes recognized by the built-in rule set. Fixture logs live in
//! `tests/fixtures/logs/`.

use besouro_core::config::{Config, RulesConfig};
use besouro_core::ingest::read_action_log;
use besouro_core::{
    Action, EditAction, Episode, EpisodeClassifierStream, Error, FileOpenedAction, RuleSet,
    StructureMetrics, UnitTestCaseAction, UnitTestSessionAction,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::PathBuf;
use tempfile::TempDir;

const PRODUCTION: &str = "src/main/Foo.java";
const TEST: &str = "src/test/FooTest.java";

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/logs")
        .join(name)
}

fn builtin_rules_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("rules")
}

/// Builds actions with increasing timestamps.
struct Script {
    clock: DateTime<Utc>,
}

impl Script {
    fn new() -> Self {
        Self {
            clock: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += Duration::seconds(15);
        self.clock
    }

    fn production(&mut self, methods: u32, statements: u32) -> Action {
        EditAction::new(self.tick(), PRODUCTION)
            .with_size(u64::from(methods * 40 + statements * 10))
            .with_structure(StructureMetrics {
                methods,
                statements,
                ..Default::default()
            })
            .into()
    }

    fn test(&mut self, test_methods: u32, test_assertions: u32) -> Action {
        EditAction::new(self.tick(), TEST)
            .with_size(u64::from(test_methods * 50 + test_assertions * 5))
            .with_test(true)
            .with_structure(StructureMetrics {
                test_methods,
                test_assertions,
                ..Default::default()
            })
            .into()
    }

    fn session(&mut self, successful: bool) -> Action {
        UnitTestSessionAction::new(self.tick(), successful)
            .with_run_name("FooTest")
            .into()
    }
}

/// A stream whose linker already knows both files:
/// `Foo.java` with 2 methods and 5 statements, `FooTest.java` with one
/// test method and one assertion.
fn primed_stream(script: &mut Script) -> EpisodeClassifierStream {
    let mut stream = EpisodeClassifierStream::new().expect("built-in rules should load");
    let baseline = [script.test(1, 1), script.production(2, 5), script.session(true)];
    for action in baseline {
        stream.add_action(action).unwrap();
    }
    assert_eq!(stream.recognized_episodes().len(), 1);
    stream
}

/// Feed one window (closed by a passing session) and return its episodes.
fn classify_window(actions: impl FnOnce(&mut Script) -> Vec<Action>) -> Vec<(String, String)> {
    let mut script = Script::new();
    let mut stream = primed_stream(&mut script);
    let before = stream.recognized_episodes().len();

    let mut window = actions(&mut script);
    window.push(script.session(true));
    for action in window {
        stream.add_action(action).unwrap();
    }
    assert!(stream.actions().is_empty());

    stream.recognized_episodes()[before..]
        .iter()
        .map(|e| (e.category.clone(), e.kind.clone()))
        .collect()
}

fn episode(category: &str, kind: &str) -> Vec<(String, String)> {
    vec![(category.to_string(), kind.to_string())]
}

// ============================================
// Built-in vocabulary
// ============================================

#[test]
fn test_test_first_with_red_session() {
    let episodes = classify_window(|s| vec![s.test(2, 2), s.session(false), s.production(3, 6)]);
    assert_eq!(episodes, episode("test-first", "1"));
}

#[test]
fn test_test_first_without_red_session() {
    let episodes = classify_window(|s| vec![s.test(2, 2), s.production(3, 6)]);
    assert_eq!(episodes, episode("test-first", "2"));
}

#[test]
fn test_test_last() {
    let episodes = classify_window(|s| vec![s.production(3, 6), s.test(2, 2)]);
    assert_eq!(episodes, episode("test-last", "1"));
}

#[test]
fn test_production_only() {
    let episodes = classify_window(|s| vec![s.production(3, 6)]);
    assert_eq!(episodes, episode("production", "1"));
}

#[test]
fn test_production_with_flat_test_edits() {
    let episodes = classify_window(|s| vec![s.production(2, 7), s.test(1, 1)]);
    assert_eq!(episodes, episode("production", "2"));
}

#[test]
fn test_test_addition_only() {
    let episodes = classify_window(|s| vec![s.test(1, 3)]);
    assert_eq!(episodes, episode("test-addition", "1"));
}

#[test]
fn test_test_addition_with_flat_production_edits() {
    let episodes = classify_window(|s| vec![s.test(2, 1), s.production(2, 5)]);
    assert_eq!(episodes, episode("test-addition", "2"));
}

#[test]
fn test_refactoring_of_tests() {
    let episodes = classify_window(|s| vec![s.test(1, 1)]);
    assert_eq!(episodes, episode("refactoring", "1"));
}

#[test]
fn test_refactoring_of_production_code_that_shrinks() {
    // decreases clamp to zero, so shrinking is not growth
    let episodes = classify_window(|s| vec![s.production(1, 3)]);
    assert_eq!(episodes, episode("refactoring", "2"));
}

#[test]
fn test_refactoring_of_both() {
    let episodes = classify_window(|s| vec![s.production(2, 5), s.test(1, 1)]);
    assert_eq!(episodes, episode("refactoring", "3"));
}

#[test]
fn test_regression() {
    let episodes = classify_window(|s| vec![s.session(false)]);
    assert_eq!(episodes, episode("regression", "1"));
}

#[test]
fn test_test_cases_alone_yield_nothing() {
    let episodes = classify_window(|s| {
        vec![UnitTestCaseAction::new(s.tick(), "FooTest.testAdd", true).into()]
    });
    assert!(episodes.is_empty());
}

// ============================================
// Stream behaviour
// ============================================

#[test]
fn test_size_growth_alone_is_not_growth() {
    let mut stream = EpisodeClassifierStream::new().unwrap();
    let ts = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

    stream
        .add_action(EditAction::new(ts, "F").with_size(50).into())
        .unwrap();
    stream
        .add_action(EditAction::new(ts, "F").with_size(150).into())
        .unwrap();
    stream
        .add_action(UnitTestSessionAction::new(ts, true).into())
        .unwrap();

    let recognized: Vec<_> = stream
        .recognized_episodes()
        .iter()
        .map(|e| (e.category.as_str(), e.kind.as_str()))
        .collect();
    assert_eq!(recognized, vec![("refactoring", "2")]);
    assert!(stream.actions().is_empty());
}

#[test]
fn test_windows_are_classified_independently() {
    let mut script = Script::new();
    let mut stream = primed_stream(&mut script);

    for action in [script.test(2, 2), script.session(true)] {
        stream.add_action(action).unwrap();
    }
    for action in [script.production(3, 6), script.session(true)] {
        stream.add_action(action).unwrap();
    }

    let labels: Vec<String> = stream
        .recognized_episodes()
        .iter()
        .map(Episode::to_string)
        .collect();
    assert_eq!(
        labels,
        vec![
            "[episode] refactoring 3",
            "[episode] test-addition 1",
            "[episode] production 1",
        ]
    );
}

#[test]
fn test_file_open_baseline_only_tracks_size() {
    let mut script = Script::new();
    let mut stream = EpisodeClassifierStream::new().unwrap();

    let open = FileOpenedAction::new(script.tick(), PRODUCTION).with_size(100);
    stream.add_action(open.into()).unwrap();
    stream.add_action(script.production(4, 9)).unwrap();

    let Action::Edit(edit) = &stream.actions()[1] else {
        panic!("expected an edit");
    };
    assert_eq!(edit.size_increase(), 160 + 90 - 100);
    assert_eq!(edit.method_increase(), 0);
    assert_eq!(edit.statement_increase(), 0);

    stream.add_action(script.session(true)).unwrap();
    assert_eq!(stream.recognized_episodes()[0].category, "refactoring");
    assert_eq!(stream.recognized_episodes()[0].kind, "2");
}

#[test]
fn test_pending_classification_matches_recorded() {
    let mut script = Script::new();
    let mut stream = primed_stream(&mut script);
    stream.add_action(script.test(2, 2)).unwrap();
    stream.add_action(script.production(3, 6)).unwrap();

    let pending = stream.classify_pending().unwrap();
    assert_eq!(pending, stream.classify_pending().unwrap());
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].category, "test-first");

    stream.add_action(script.session(true)).unwrap();
    let recorded = stream.recognized_episodes().last().unwrap();
    assert_eq!(recorded.category, pending[0].category);
    assert_eq!(recorded.kind, pending[0].kind);
    assert_eq!(recorded.action_count, pending[0].action_count + 1);
}

// ============================================
// Long windows
// ============================================

/// Edit number `n` of a window that spreads edits over `files` paths. Every
/// revisit of a path adds one method (or one test method).
fn spread_edit(script: &mut Script, n: u32, files: u32, is_test: bool) -> Action {
    let revision = n / files + 1;
    let (path, structure) = if is_test {
        (
            format!("src/test/Module{}Test.java", n % files),
            StructureMetrics {
                test_methods: revision,
                test_assertions: revision,
                ..Default::default()
            },
        )
    } else {
        (
            format!("src/main/Module{}.java", n % files),
            StructureMetrics {
                methods: revision,
                statements: revision * 3,
                ..Default::default()
            },
        )
    };
    EditAction::new(script.tick(), path)
        .with_size(u64::from(revision) * 120)
        .with_test(is_test)
        .with_structure(structure)
        .into()
}

fn replay(stream: &mut EpisodeClassifierStream, actions: impl IntoIterator<Item = Action>) {
    for action in actions {
        stream.add_action(action).unwrap();
    }
}

#[test]
fn test_hundreds_of_production_edits() {
    let mut script = Script::new();
    let mut stream = EpisodeClassifierStream::new().unwrap();

    let edits: Vec<Action> = (0..600).map(|n| spread_edit(&mut script, n, 50, false)).collect();
    replay(&mut stream, edits);
    assert_eq!(stream.actions().len(), 600);
    assert_eq!(stream.linker().tracked_paths(), 50);

    stream.add_action(script.session(true)).unwrap();

    let recognized = stream.recognized_episodes();
    assert_eq!(recognized.len(), 1);
    assert_eq!(recognized[0].to_string(), "[episode] production 1");
    assert_eq!(recognized[0].action_count, 601);
    assert!(stream.actions().is_empty());
}

#[test]
fn test_hundreds_of_tests_then_production() {
    let mut script = Script::new();
    let mut stream = EpisodeClassifierStream::new().unwrap();

    let tests: Vec<Action> = (0..200).map(|n| spread_edit(&mut script, n, 20, true)).collect();
    let red = script.session(false);
    let production: Vec<Action> = (0..200).map(|n| spread_edit(&mut script, n, 20, false)).collect();
    replay(&mut stream, tests);
    replay(&mut stream, [red]);
    replay(&mut stream, production);
    stream.add_action(script.session(true)).unwrap();

    let recognized = stream.recognized_episodes();
    assert_eq!(recognized.len(), 1);
    assert_eq!(recognized[0].to_string(), "[episode] test-first 1");
    assert_eq!(recognized[0].action_count, 402);
}

#[test]
fn test_window_larger_than_a_fixed_firing_budget() {
    let mut script = Script::new();
    let mut stream = EpisodeClassifierStream::new().unwrap();

    // about two vocabulary firings per edit, well past 10k for the window
    let edits: Vec<Action> = (0..6_000).map(|n| spread_edit(&mut script, n, 50, false)).collect();
    replay(&mut stream, edits);
    stream.add_action(script.session(true)).unwrap();

    assert!(stream.actions().is_empty());
    assert_eq!(stream.recognized_episodes().len(), 1);
    assert_eq!(stream.recognized_episodes()[0].action_count, 6_001);

    // the stream keeps working afterwards
    replay(&mut stream, [spread_edit(&mut script, 6_000, 50, true), script.session(true)]);
    assert_eq!(stream.recognized_episodes().len(), 2);
    assert_eq!(stream.recognized_episodes()[1].category, "refactoring");
}

// ============================================
// Action logs
// ============================================

#[test]
fn test_fixture_log_end_to_end() {
    let log = read_action_log(&fixture_path("tdd-session.jsonl")).expect("fixture should read");
    assert!(log.warnings.is_empty(), "{:?}", log.warnings);
    assert_eq!(log.actions.len(), 11);

    let mut stream = EpisodeClassifierStream::new().unwrap();
    for action in log.actions {
        stream.add_action(action).unwrap();
    }

    let episodes = stream.recognized_episodes();
    assert_eq!(episodes.len(), 2);

    assert_eq!(episodes[0].to_string(), "[episode] refactoring 3");
    assert_eq!(episodes[0].action_count, 4);
    assert_eq!(episodes[0].duration_secs(), 70);

    assert_eq!(episodes[1].to_string(), "[episode] test-first 1");
    assert_eq!(episodes[1].action_count, 6);
    assert_eq!(
        episodes[1].ended_at,
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 4, 0).unwrap()
    );

    assert_eq!(stream.actions().len(), 1);
}

// ============================================
// Rule sets
// ============================================

#[test]
fn test_builtin_rules_match_shipped_files() {
    let from_dir = RuleSet::from_dir(&builtin_rules_dir()).unwrap();
    assert_eq!(from_dir.fingerprint(), RuleSet::builtin().unwrap().fingerprint());
}

#[test]
fn test_custom_rule_directory() {
    let dir = TempDir::new().unwrap();
    for name in ["actions.toml", "episode.toml"] {
        std::fs::copy(builtin_rules_dir().join(name), dir.path().join(name)).unwrap();
    }
    std::fs::write(
        dir.path().join("classifier.toml"),
        r#"
[[rule]]
name = "any-edit"
when = [{ fact = "edit" }, { fact = "episode", not = true }]
then = [{ fact = "episode", slots = { category = "busy", type = "1" } }]

[[query]]
name = "episode-classification-query"
when = [{ fact = "episode", slots = { category = "?c", type = "?t" } }]
select = { category = "?c", type = "?t" }
"#,
    )
    .unwrap();

    let config = Config {
        rules: RulesConfig {
            dir: Some(dir.path().to_path_buf()),
        },
        ..Default::default()
    };
    let mut stream = EpisodeClassifierStream::from_config(&config).unwrap();
    let mut script = Script::new();
    for action in [script.production(1, 1), script.session(true)] {
        stream.add_action(action).unwrap();
    }
    assert_eq!(stream.recognized_episodes()[0].to_string(), "[episode] busy 1");
}

#[test]
fn test_broken_rule_directory_fails_construction() {
    let dir = TempDir::new().unwrap();
    for name in ["actions.toml", "episode.toml"] {
        std::fs::copy(builtin_rules_dir().join(name), dir.path().join(name)).unwrap();
    }
    std::fs::write(
        dir.path().join("classifier.toml"),
        r#"
[[rule]]
name = "typo"
when = [{ fact = "edits" }]
then = [{ fact = "episode", slots = { category = "x", type = "1" } }]
"#,
    )
    .unwrap();

    let config = Config {
        rules: RulesConfig {
            dir: Some(dir.path().to_path_buf()),
        },
        ..Default::default()
    };
    match EpisodeClassifierStream::from_config(&config) {
        Err(Error::RuleSet { source_name, .. }) => assert_eq!(source_name, "classifier.toml"),
        other => panic!("expected a rule set error, got {other:?}"),
    }
}

#[test]
fn test_rule_type_error_keeps_window() {
    let dir = TempDir::new().unwrap();
    for name in ["actions.toml", "episode.toml"] {
        std::fs::copy(builtin_rules_dir().join(name), dir.path().join(name)).unwrap();
    }
    std::fs::write(
        dir.path().join("classifier.toml"),
        r#"
[[rule]]
name = "named-edit"
when = [{ fact = "edit", slots = { index = "?i" }, where = '?i == "x"' }]
then = [{ fact = "episode", slots = { category = "named", type = "1" } }]

[[query]]
name = "episode-classification-query"
when = [{ fact = "episode", slots = { category = "?c", type = "?t" } }]
select = { category = "?c", type = "?t" }
"#,
    )
    .unwrap();

    let config = Config {
        rules: RulesConfig {
            dir: Some(dir.path().to_path_buf()),
        },
        ..Default::default()
    };
    let mut stream = EpisodeClassifierStream::from_config(&config).unwrap();
    let mut script = Script::new();
    stream.add_action(script.production(1, 1)).unwrap();

    let err = stream.add_action(script.session(true)).unwrap_err();
    assert!(matches!(err, Error::Inference(_)), "{err}");
    assert!(err.to_string().contains("cannot compare"), "{err}");
    assert_eq!(stream.actions().len(), 2);
    assert!(stream.recognized_episodes().is_empty());
}

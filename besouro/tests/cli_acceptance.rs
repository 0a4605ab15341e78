use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

struct CliTestEnv {
    _temp_dir: TempDir,
    base: PathBuf,
    home: PathBuf,
    xdg_config: PathBuf,
    xdg_state: PathBuf,
}

impl CliTestEnv {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let base = temp_dir.path().to_path_buf();
        let home = base.join("home");
        let xdg_config = base.join("xdg-config");
        let xdg_state = base.join("xdg-state");

        fs::create_dir_all(&home).expect("failed to create HOME");
        fs::create_dir_all(&xdg_config).expect("failed to create XDG_CONFIG_HOME");
        fs::create_dir_all(&xdg_state).expect("failed to create XDG_STATE_HOME");

        Self {
            _temp_dir: temp_dir,
            base,
            home,
            xdg_config,
            xdg_state,
        }
    }

    fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.base.join(name);
        fs::write(&path, content).expect("failed to write test file");
        path
    }
}

fn fixture_log() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../besouro-core/tests/fixtures/logs/tdd-session.jsonl")
}

fn builtin_rules() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../besouro-core/rules")
}

fn run_bin(env: &CliTestEnv, args: &[&str]) -> Output {
    let bin_path = PathBuf::from(assert_cmd::cargo::cargo_bin!("besouro"));

    Command::new(bin_path)
        .args(args)
        .env("HOME", &env.home)
        .env("XDG_CONFIG_HOME", &env.xdg_config)
        .env("XDG_STATE_HOME", &env.xdg_state)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("failed to execute besouro: {e}"))
}

fn assert_success(args: &[&str], output: &Output) {
    if output.status.success() {
        return;
    }

    let rendered_args = args
        .iter()
        .map(|arg| OsString::from(arg).to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    panic!(
        "besouro {rendered_args} failed\nstatus: {}\nstdout:\n{}\nstderr:\n{}",
        output.status, stdout, stderr
    );
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[test]
fn replays_fixture_log_as_text() {
    let env = CliTestEnv::new();
    let log = path_arg(&fixture_log());
    let args = [log.as_str()];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[episode] refactoring 3  (4 actions, 70s)"));
    assert!(
        stdout.contains("[episode] test-first 1  (6 actions, 120s)"),
        "unexpected stdout:\n{stdout}"
    );
    assert!(stdout.contains("2 episode(s) recognized, 1 action(s) pending, 0 warning(s)"));

    let log_files: Vec<String> = fs::read_dir(env.xdg_state.join("besouro"))
        .expect("log directory should be created under XDG_STATE_HOME")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(log_files.len(), 1, "log files: {log_files:?}");
    assert!(log_files[0].starts_with("besouro.log.20"));
}

#[test]
fn replays_fixture_log_as_json_with_facts() {
    let env = CliTestEnv::new();
    let log = path_arg(&fixture_log());
    let args = [log.as_str(), "--format", "json", "--dump-facts"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let value: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let episodes = value["episodes"].as_array().expect("episodes array");
    assert_eq!(episodes.len(), 2);
    assert_eq!(episodes[1]["category"], "test-first");
    assert_eq!(episodes[1]["type"], "1");
    assert_eq!(value["pending_actions"], 1);

    let windows = value["windows"].as_array().expect("windows array");
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0]["closed_by"], 4);
    let facts: Vec<&str> = windows[1]["facts"]
        .as_array()
        .expect("facts array")
        .iter()
        .filter_map(|f| f.as_str())
        .collect();
    assert!(facts.iter().any(|f| f.starts_with("(failed-session")));
    assert!(facts.contains(&"(episode (category \"test-first\") (type \"1\"))"));
}

#[test]
fn malformed_lines_are_reported_but_skipped() {
    let env = CliTestEnv::new();
    let log = env.write(
        "broken.jsonl",
        concat!(
            "{\"kind\":\"unit_test_session\",\"timestamp\":\"2024-03-01T10:00:00Z\",\"successful\":false}\n",
            "this is not json\n",
            "{\"kind\":\"unit_test_session\",\"timestamp\":\"2024-03-01T10:00:10Z\",\"successful\":true}\n",
        ),
    );
    let log = path_arg(&log);
    let args = [log.as_str()];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("warning: parse error at line 2"));
    assert!(stdout.contains("[episode] regression 1"));
    assert!(stdout.contains("1 warning(s)"));
}

#[test]
fn list_rules_shows_classification_query() {
    let env = CliTestEnv::new();
    let args = ["--list-rules"];

    let output = run_bin(&env, &args);
    assert_success(&args, &output);

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("  - test-first-1"));
    assert!(stdout.contains("  - episode-classification-query"));
}

#[test]
fn broken_rule_directory_exits_non_zero() {
    let env = CliTestEnv::new();
    let rules = env.base.join("rules");
    fs::create_dir_all(&rules).expect("failed to create rules dir");
    for name in ["actions.toml", "episode.toml"] {
        fs::copy(builtin_rules().join(name), rules.join(name)).expect("failed to copy rules");
    }
    fs::write(rules.join("classifier.toml"), "[[rule]\n").expect("failed to write rules");

    let log = path_arg(&fixture_log());
    let rules_arg = path_arg(&rules);
    let output = run_bin(&env, &[log.as_str(), "--rules", rules_arg.as_str()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to load rule set"), "stderr:\n{stderr}");
}

#[test]
fn missing_log_exits_non_zero() {
    let env = CliTestEnv::new();
    let missing = path_arg(&env.base.join("missing.jsonl"));

    let output = run_bin(&env, &[missing.as_str()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read action log"), "stderr:\n{stderr}");
}

#[test]
fn rule_type_error_fails_classification() {
    let env = CliTestEnv::new();
    let rules = env.base.join("rules");
    fs::create_dir_all(&rules).expect("failed to create rules dir");
    for name in ["actions.toml", "episode.toml"] {
        fs::copy(builtin_rules().join(name), rules.join(name)).expect("failed to copy rules");
    }
    // loads fine, but compares an integer slot with a string at run time
    fs::write(
        rules.join("classifier.toml"),
        r#"
[[rule]]
name = "named-edit"
when = [{ fact = "edit", slots = { index = "?i" }, where = '?i == "x"' }]
then = [{ fact = "episode", slots = { category = "named", type = "1" } }]

[[query]]
name = "episode-classification-query"
when = [{ fact = "episode", slots = { category = "?category", type = "?type" } }]
select = { category = "?category", type = "?type" }
"#,
    )
    .expect("failed to write rules");

    let log = path_arg(&fixture_log());
    let rules_arg = path_arg(&rules);
    let output = run_bin(&env, &[log.as_str(), "--rules", rules_arg.as_str()]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("failed to classify action 4 of 11"),
        "stderr:\n{stderr}"
    );
    assert!(stderr.contains("inference error"), "stderr:\n{stderr}");
}

use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const API_KEY_VARS: [&str; 7] = [
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "GEMINI_API_KEY",
    "AI_API_KEY",
    "DEEPSEEK_API_KEY",
    "DIGEST_MODEL",
    "AI_MODEL",
];

fn digest_cmd(tmp: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chat-digest");
    cmd.current_dir(tmp)
        .env("HOME", tmp)
        .env("DIGEST_HOME", tmp.join("digest"))
        .env("DIGEST_PROVIDER", "local");
    for var in API_KEY_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn write_transcript(path: &Path) {
    let raw = r#"[
  {"id":"1","author":"alice","channel_id":"200","server_id":"100","timestamp":"2024-05-01T12:00:00Z","content":"We shipped the v2.1 release with the new staking dashboard"},
  {"id":"2","author":"bob","channel_id":"200","server_id":"100","timestamp":"2024-05-01T12:03:00Z","content":"Merged the fix for the bridge timeout in the relayer service","reply_to":"1"},
  {"id":"3","author":"carol","channel_id":"200","server_id":"100","timestamp":"2024-05-01T12:05:00Z","content":""}
]"#;
    fs::write(path, raw).expect("write transcript");
}

#[test]
fn digest_writes_markdown_and_diagnostics() {
    let tmp = tempdir().expect("tempdir");
    let input = tmp.path().join("transcript.json");
    write_transcript(&input);
    let output = tmp.path().join("out/digest.md");

    digest_cmd(tmp.path())
        .arg("digest")
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("digest: ok"))
        .stdout(predicate::str::contains("generator=local"));

    let markdown = fs::read_to_string(&output).expect("read digest");
    assert!(markdown.starts_with("# Community Digest"));
    assert!(markdown.contains("**Development**"));
    assert!(markdown.contains("https://discord.com/channels/100/200/2"));

    let diagnostics = tmp.path().join("out/digest.diagnostics.json");
    let raw = fs::read_to_string(diagnostics).expect("read diagnostics");
    let diag: serde_json::Value = serde_json::from_str(&raw).expect("diagnostics json");
    assert_eq!(diag["messages"], 2);
    assert_eq!(diag["skipped_empty_messages"], 1);
    assert_eq!(diag["generator"], "local");

    let audit = tmp.path().join("digest/logs/audit.log");
    let audit_raw = fs::read_to_string(audit).expect("read audit log");
    assert!(audit_raw.contains("\"phase\":\"digest\""));
}

#[test]
fn digest_defaults_output_into_digest_home() {
    let tmp = tempdir().expect("tempdir");
    let input = tmp.path().join("transcript.json");
    write_transcript(&input);

    digest_cmd(tmp.path())
        .args(["digest", "--format", "json", "--json", "--input"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"command\": \"digest\""));

    let entries: Vec<_> = fs::read_dir(tmp.path().join("digest/output"))
        .expect("output dir")
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    let summary = entries
        .iter()
        .find(|name| name.starts_with("digest-") && name.ends_with(".json") && !name.contains("diagnostics"))
        .expect("summary json");
    let raw = fs::read_to_string(tmp.path().join("digest/output").join(summary)).expect("read");
    let parsed: serde_json::Value = serde_json::from_str(&raw).expect("summary json");
    assert_eq!(parsed["title"], "Community Digest");
    assert!(parsed["sections"].as_array().is_some_and(|s| !s.is_empty()));
}

#[test]
fn digest_of_empty_transcript_reports_no_activity() {
    let tmp = tempdir().expect("tempdir");
    let input = tmp.path().join("empty.json");
    fs::write(&input, "[]").expect("write empty transcript");
    let output = tmp.path().join("empty.md");

    digest_cmd(tmp.path())
        .arg("digest")
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();

    let markdown = fs::read_to_string(&output).expect("read digest");
    assert!(markdown.contains("No notable activity in this window."));
}

#[test]
fn digest_rejects_duplicate_message_ids() {
    let tmp = tempdir().expect("tempdir");
    let input = tmp.path().join("dupes.jsonl");
    let line = r#"{"id":"7","author":"alice","channel_id":"200","server_id":"100","timestamp":"2024-05-01T12:00:00Z","content":"deploy finished on the staging cluster"}"#;
    fs::write(&input, format!("{line}\n{line}\n")).expect("write transcript");

    digest_cmd(tmp.path())
        .arg("digest")
        .arg("--input")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("duplicate message id `7`"));
}

#[test]
fn digest_reports_exported_messages_without_id() {
    let tmp = tempdir().expect("tempdir");
    let input = tmp.path().join("export.json");
    let raw = r#"{
  "guild": {"id": "100"},
  "channel": {"id": "200", "name": "dev"},
  "messages": [
    {"timestamp": "2024-05-01T12:00:00+00:00", "content": "pinned a message", "author": {"name": "bot"}},
    {"id": "9", "timestamp": "2024-05-01T12:01:00+00:00", "content": "Released node 5.0.20 with the mempool fix", "author": {"name": "alice"}}
  ]
}"#;
    fs::write(&input, raw).expect("write export");
    let output = tmp.path().join("out/digest.md");

    digest_cmd(tmp.path())
        .arg("digest")
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "warning: skipped 1 exported message(s) without an id",
        ));

    let raw = fs::read_to_string(tmp.path().join("out/digest.diagnostics.json"))
        .expect("read diagnostics");
    let diag: serde_json::Value = serde_json::from_str(&raw).expect("diagnostics json");
    assert_eq!(diag["messages"], 1);
    assert_eq!(diag["skipped_missing_id_messages"], 1);
}

use std::time::Duration;

use crate::config::RuntimeConfig;

/// Line-oriented stand-in for the evaluator. Sources containing `BROKEN`
/// fail to compile, paths containing `private` are denied and everything
/// else is permitted. `RULES_VERSION` is set by `fake_evaluator`.
pub const SCRIPTED_EVALUATOR: &str = r#"
printf '{"id":-1,"status":"ok"}\n'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"action":"load_ruleset"'*BROKEN*)
      printf '{"id":%s,"status":"ok","result":{},"errors":["Unexpected BROKEN"],"warnings":[]}\n' "$id" ;;
    *'"action":"load_ruleset"'*)
      printf '{"id":%s,"status":"ok","result":{"rulesVersion":%s},"errors":[],"warnings":[]}\n' "$id" "$RULES_VERSION" ;;
    *'"action":"verify"'*private*)
      printf '{"id":%s,"status":"ok","result":{"permit":false},"errors":[],"warnings":[]}\n' "$id" ;;
    *)
      printf '{"id":%s,"status":"ok","result":{"permit":true},"errors":[],"warnings":[]}\n' "$id" ;;
  esac
done
"#;

pub struct FakeEvaluator {
    _dir: tempfile::TempDir,
    pub config: RuntimeConfig,
}

/// Runs `script` through `/bin/sh` in place of `java -jar ... serve`.
pub fn fake_evaluator(script: &str, rules_version: i64) -> FakeEvaluator {
    let dir = tempfile::tempdir().unwrap();
    let jar_path = dir.path().join("rules.jar");
    std::fs::write(&jar_path, b"").unwrap();
    let script = format!("RULES_VERSION={rules_version}\n{script}");
    FakeEvaluator {
        config: RuntimeConfig {
            java_binary: "/bin/sh".to_string(),
            java_args: vec!["-c".to_string(), script, "fake-evaluator".to_string()],
            jar_path,
            auto_download: false,
            startup_timeout: Duration::from_secs(10),
            ..Default::default()
        },
        _dir: dir,
    }
}

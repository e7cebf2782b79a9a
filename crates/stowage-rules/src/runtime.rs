use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::auth::auth_expression;
use crate::config::RuntimeConfig;
use crate::download::ensure_evaluator_binary;
use crate::errors::{Result, RulesError};
use crate::expression::ExpressionValue;
use crate::firestore::DocumentFetcher;
use crate::message::{
    FirestoreDataResponse, LoadRulesetContext, READY_REQUEST_ID, RulesSource, RuntimeAction,
    RuntimeActionBundle, RuntimeActionResponse, STORAGE_SERVICE, VerifyContext, encode_request,
};
use crate::ruleset::{
    LoadRulesetOutcome, RulesetVerificationOpts, StorageRulesIssues, StorageRulesetInstance,
    VerifyOutcome,
};

/// Pause after every write to the evaluator's stdin, taken while the write
/// lock is still held. Without it the evaluator drops responses when many
/// requests arrive back to back.
pub const WRITE_GRACE_DELAY: Duration = Duration::from_millis(15);

/// Marker the JVM prints on stderr when it cannot open the jar.
const FATAL_STDERR_MARKER: &str = "jarfile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeState {
    NotStarted,
    Starting,
    Alive,
    Stopped,
}

type PendingMap = HashMap<i64, oneshot::Sender<Result<RuntimeActionResponse>>>;

/// Handle to the long-lived rules evaluator process.
#[derive(Clone)]
pub struct StorageRulesRuntime {
    config: RuntimeConfig,
    state: Arc<RwLock<RuntimeState>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    pending: Arc<Mutex<PendingMap>>,
    ruleset_count: Arc<AtomicU64>,
    request_count: Arc<AtomicI64>,
    kill_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    exit_task: Arc<Mutex<Option<JoinHandle<()>>>>,
    fetcher: Option<Arc<dyn DocumentFetcher>>,
}

impl StorageRulesRuntime {
    pub fn new(config: RuntimeConfig, fetcher: Option<Arc<dyn DocumentFetcher>>) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(RuntimeState::NotStarted)),
            stdin: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            ruleset_count: Arc::new(AtomicU64::new(0)),
            request_count: Arc::new(AtomicI64::new(0)),
            kill_tx: Arc::new(Mutex::new(None)),
            exit_task: Arc::new(Mutex::new(None)),
            fetcher,
        }
    }

    pub async fn state(&self) -> RuntimeState {
        self.state.read().await.clone()
    }

    pub async fn is_alive(&self) -> bool {
        *self.state.read().await == RuntimeState::Alive
    }

    async fn set_state(&self, state: RuntimeState) {
        *self.state.write().await = state;
    }

    /// Spawns the evaluator and waits for its ready message. Calling it on a
    /// live or starting runtime does nothing.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if matches!(*state, RuntimeState::Alive | RuntimeState::Starting) {
                return Ok(());
            }
            *state = RuntimeState::Starting;
        }

        match self.spawn().await {
            Ok(()) => {
                let mut state = self.state.write().await;
                if *state != RuntimeState::Starting {
                    return Err(RulesError::ProcessExited);
                }
                *state = RuntimeState::Alive;
                info!("rules evaluator started");
                Ok(())
            }
            Err(err) => {
                self.stop().await;
                self.set_state(RuntimeState::Stopped).await;
                Err(err)
            }
        }
    }

    async fn spawn(&self) -> Result<()> {
        let jar_path = ensure_evaluator_binary(&self.config).await?;
        debug!(java = %self.config.java_binary, jar = %jar_path.display(), "spawning rules evaluator");

        let mut child = Command::new(&self.config.java_binary)
            .args(self.config.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(RulesError::Spawn)?;

        let stdin = child.stdin.take().ok_or(RulesError::NotRunning)?;
        let stdout = child.stdout.take().ok_or(RulesError::NotRunning)?;
        let stderr = child.stderr.take().ok_or(RulesError::NotRunning)?;

        let (ready_tx, ready_rx) = oneshot::channel();
        self.pending.lock().await.insert(READY_REQUEST_ID, ready_tx);
        *self.stdin.lock().await = Some(stdin);

        let (fatal_tx, fatal_rx) = oneshot::channel();
        self.spawn_stdout_reader(stdout);
        spawn_stderr_reader(stderr, fatal_tx);
        self.spawn_exit_watcher(child).await;

        tokio::select! {
            ready = ready_rx => match ready {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(RulesError::ProcessExited),
            },
            Ok(message) = fatal_rx => Err(RulesError::FatalStartup(message)),
            _ = time::sleep(self.config.startup_timeout) => {
                Err(RulesError::StartupTimeout(self.config.startup_timeout))
            }
        }
    }

    fn spawn_stdout_reader(&self, stdout: ChildStdout) {
        let pending = self.pending.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => dispatch_line(&pending, line.trim()).await,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(error = %err, "failed to read rules evaluator output");
                        break;
                    }
                }
            }
        });
    }

    async fn spawn_exit_watcher(&self, mut child: Child) {
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        *self.kill_tx.lock().await = Some(kill_tx);

        let this = self.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => debug!(%status, "rules evaluator exited"),
                    Err(err) => warn!(error = %err, "failed to wait for rules evaluator"),
                },
                _ = kill_rx => {
                    if let Err(err) = child.start_kill() {
                        debug!(error = %err, "rules evaluator already gone");
                    }
                    let _ = child.wait().await;
                }
            }

            this.set_state(RuntimeState::Stopped).await;
            this.stdin.lock().await.take();
            this.fail_all(&RulesError::ProcessExited).await;
        });
        *self.exit_task.lock().await = Some(task);
    }

    /// Drops every in-flight request; waiters observe `ProcessExited`.
    async fn fail_all(&self, err: &RulesError) {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        pending.clear();
        if count > 0 {
            debug!(%err, count, "abandoned pending rules requests");
        }
    }

    /// Kills the evaluator and waits for it to exit.
    pub async fn stop(&self) {
        debug!("stopping rules runtime");
        if let Some(kill_tx) = self.kill_tx.lock().await.take() {
            let _ = kill_tx.send(());
        }
        let task = self.exit_task.lock().await.take();
        if let Some(task) = task
            && let Err(err) = task.await
        {
            warn!(error = %err, "rules evaluator exit watcher failed");
        }
    }

    async fn send_request(
        &self,
        bundle: &RuntimeActionBundle,
        override_id: Option<i64>,
    ) -> Result<RuntimeActionResponse> {
        let id = override_id.unwrap_or_else(|| self.request_count.fetch_add(1, Ordering::Relaxed));
        let line = encode_request(bundle, id)?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if override_id.is_none() && pending.contains_key(&id) {
                return Err(RulesError::StaleRequestId(id));
            }
            pending.insert(id, tx);
        }

        if let Err(err) = self.write_line(&line).await {
            self.pending.lock().await.remove(&id);
            return Err(err);
        }

        rx.await.map_err(|_| RulesError::ProcessExited)?
    }

    /// Writes one request line. Writers are serialized and each holds the
    /// lock for `WRITE_GRACE_DELAY` after its write.
    async fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = self.stdin.lock().await;
        let Some(writer) = stdin.as_mut() else {
            return Err(RulesError::NotRunning);
        };
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
        time::sleep(WRITE_GRACE_DELAY).await;
        Ok(())
    }

    /// Compiles `source` under a fresh ruleset name. Compile errors come
    /// back as issues with no ruleset.
    pub async fn load_ruleset(&self, source: RulesSource) -> Result<LoadRulesetOutcome> {
        let ruleset_name = self.ruleset_count.fetch_add(1, Ordering::Relaxed).to_string();
        let bundle = RuntimeActionBundle::Action(RuntimeAction::LoadRuleset {
            context: LoadRulesetContext {
                ruleset_name: ruleset_name.clone(),
                source,
            },
        });

        let response = self.send_request(&bundle, None).await?;
        let issues = StorageRulesIssues::from_response(&response);
        if !response.errors.is_empty() {
            return Ok(LoadRulesetOutcome {
                ruleset: None,
                issues,
            });
        }

        let rules_version = response
            .result
            .as_ref()
            .and_then(|result| result.rules_version)
            .unwrap_or(1);
        Ok(LoadRulesetOutcome {
            ruleset: Some(StorageRulesetInstance::new(
                self.clone(),
                rules_version,
                ruleset_name,
            )),
            issues,
        })
    }

    pub async fn verify_with_ruleset(
        &self,
        ruleset_name: &str,
        opts: RulesetVerificationOpts,
        overrides: BTreeMap<String, ExpressionValue>,
    ) -> Result<VerifyOutcome> {
        let path = normalize_rules_path(&opts.path);

        let mut variables = BTreeMap::new();
        variables.insert("resource".to_string(), ExpressionValue::from(opts.before.as_ref()));
        variables.insert("request".to_string(), request_expression(&path, &opts));
        variables.extend(overrides);

        let bundle = RuntimeActionBundle::Action(RuntimeAction::Verify {
            context: VerifyContext {
                ruleset_name: ruleset_name.to_string(),
                service: STORAGE_SERVICE,
                path,
                method: opts.method,
                delimiter: opts.delimiter.clone(),
                variables,
            },
        });

        self.complete_verify(&opts.project_id, bundle).await
    }

    async fn complete_verify(
        &self,
        project_id: &str,
        mut bundle: RuntimeActionBundle,
    ) -> Result<VerifyOutcome> {
        let mut override_id = None;
        loop {
            let response = self.send_request(&bundle, override_id).await?;

            if let Some(context) = response.context.as_ref() {
                let id = response
                    .server_request_id
                    .or(response.id)
                    .ok_or_else(|| RulesError::Runtime {
                        status: response.status.clone().unwrap_or_default(),
                        message: "continuation without request id".to_string(),
                    })?;
                let data = self.fetch_document(project_id, &context.path).await;
                bundle = RuntimeActionBundle::DataResponse(data);
                override_id = Some(id);
                continue;
            }

            let issues = StorageRulesIssues::from_response(&response);
            let permitted = if issues.errors.is_empty() {
                response.result.as_ref().and_then(|result| result.permit)
            } else {
                None
            };
            return Ok(VerifyOutcome { permitted, issues });
        }
    }

    async fn fetch_document(&self, project_id: &str, path: &str) -> FirestoreDataResponse {
        let Some(fetcher) = self.fetcher.as_ref() else {
            debug!(path, "no firestore emulator for rules document lookup");
            return FirestoreDataResponse::not_found();
        };

        let full_path = format!("projects/{project_id}{path}");
        match fetcher.get_document(&full_path).await {
            Ok(Some(document)) => FirestoreDataResponse::found(document),
            Ok(None) => FirestoreDataResponse::not_found(),
            Err(err) => {
                debug!(path = %full_path, error = %err, "rules document lookup failed");
                FirestoreDataResponse::not_found()
            }
        }
    }
}

async fn dispatch_line(pending: &Mutex<PendingMap>, line: &str) {
    if line.is_empty() {
        return;
    }

    let response = match serde_json::from_str::<RuntimeActionResponse>(line) {
        Ok(response) => response,
        Err(_) => {
            info!(target: "stowage::rules::evaluator", "{line}");
            return;
        }
    };

    let Some(id) = response.correlation_id() else {
        debug!(line, "rules evaluator response without id");
        return;
    };

    let Some(waiter) = pending.lock().await.remove(&id) else {
        debug!(id, line, "no waiter for rules evaluator response");
        return;
    };

    let result = if !response.is_ok() && response.action.is_none() {
        let status = response.status.clone().unwrap_or_default();
        let message = response.message.clone().unwrap_or_default();
        warn!(id, status = %status, message = %message, errors = ?response.errors, "rules evaluator error");
        Err(RulesError::Runtime { status, message })
    } else {
        Ok(response)
    };

    let _ = waiter.send(result);
}

fn spawn_stderr_reader(stderr: ChildStderr, fatal_tx: oneshot::Sender<String>) {
    tokio::spawn(async move {
        let mut fatal_tx = Some(fatal_tx);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.contains(FATAL_STDERR_MARKER) {
                error!(message = %line, "rules evaluator failed to start");
                if let Some(tx) = fatal_tx.take() {
                    let _ = tx.send(line);
                }
            } else {
                warn!(message = %line, "unexpected rules runtime error");
            }
        }
    });
}

/// Adds the leading `/` and drops a trailing one.
fn normalize_rules_path(path: &str) -> String {
    let mut path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

fn request_expression(path: &str, opts: &RulesetVerificationOpts) -> ExpressionValue {
    ExpressionValue::map([
        ("path".to_string(), ExpressionValue::path(path)),
        ("time".to_string(), ExpressionValue::timestamp(&chrono::Utc::now())),
        ("resource".to_string(), ExpressionValue::from(opts.after.as_ref())),
        ("auth".to_string(), auth_expression(opts.token.as_deref())),
    ])
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;

    use async_trait::async_trait;

    use super::*;
    use crate::firestore::Document;
    use crate::ruleset::{LIST_REQUIRES_V2, RulesetOperationMethod};
    use crate::testing::{SCRIPTED_EVALUATOR, fake_evaluator};

    const FETCH_THEN_PERMIT: &str = r#"
printf '{"id":-1,"status":"ok"}\n'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"action":"load_ruleset"'*)
      printf '{"id":%s,"status":"ok","result":{"rulesVersion":2},"errors":[],"warnings":[]}\n' "$id" ;;
    *'"action":"verify"'*)
      printf '{"server_request_id":%s,"action":"fetch_firestore_document","status":"ok","context":{"path":"/databases/(default)/documents/users/u1"}}\n' "$id" ;;
    *'"status":"ok"'*)
      printf '{"id":%s,"status":"ok","result":{"permit":true},"errors":[],"warnings":[]}\n' "$id" ;;
    *)
      printf '{"id":%s,"status":"ok","result":{"permit":false},"errors":[],"warnings":[]}\n' "$id" ;;
  esac
done
"#;

    const EXIT_ON_VERIFY: &str = r#"
printf '{"id":-1,"status":"ok"}\n'
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  case "$line" in
    *'"action":"verify"'*) exit 0 ;;
    *) printf '{"id":%s,"status":"ok","result":{"rulesVersion":2},"errors":[],"warnings":[]}\n' "$id" ;;
  esac
done
"#;

    const MISSING_JAR: &str = r#"
printf 'Error: Unable to access jarfile rules.jar\n' >&2
sleep 5
"#;

    fn opts(method: RulesetOperationMethod) -> RulesetVerificationOpts {
        RulesetVerificationOpts {
            before: None,
            after: None,
            token: None,
            method,
            path: "b/demo/o/a.txt".to_string(),
            delimiter: None,
            project_id: "demo-project".to_string(),
        }
    }

    #[derive(Default)]
    struct RecordingFetcher {
        paths: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DocumentFetcher for RecordingFetcher {
        async fn get_document(&self, path: &str) -> Result<Option<Document>> {
            self.paths.lock().unwrap().push(path.to_string());
            Ok(Some(Document {
                name: path.to_string(),
                fields: serde_json::json!({}),
            }))
        }
    }

    #[test]
    fn rules_paths_are_rooted_without_trailing_slash() {
        assert_eq!(normalize_rules_path("b/demo/o/"), "/b/demo/o");
        assert_eq!(normalize_rules_path("/b/demo/o/a"), "/b/demo/o/a");
        assert_eq!(normalize_rules_path(""), "/");
    }

    #[tokio::test]
    async fn start_is_idempotent_and_verify_permits() {
        let fake = fake_evaluator(SCRIPTED_EVALUATOR, 2);
        let runtime = StorageRulesRuntime::new(fake.config.clone(), None);
        assert_eq!(runtime.state().await, RuntimeState::NotStarted);

        runtime.start().await.unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.is_alive().await);

        let loaded = runtime
            .load_ruleset(RulesSource::single("storage.rules", "rules_version = '2';"))
            .await
            .unwrap();
        let ruleset = loaded.ruleset.unwrap();
        assert_eq!(ruleset.rules_version(), 2);
        assert_eq!(ruleset.name(), "0");

        let outcome = ruleset
            .verify(opts(RulesetOperationMethod::Get), BTreeMap::new())
            .await
            .unwrap();
        assert!(outcome.is_permitted());

        runtime.stop().await;
        assert_eq!(runtime.state().await, RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn concurrent_verifies_are_matched_by_id() {
        let fake = fake_evaluator(SCRIPTED_EVALUATOR, 2);
        let runtime = StorageRulesRuntime::new(fake.config.clone(), None);
        runtime.start().await.unwrap();
        let ruleset = runtime
            .load_ruleset(RulesSource::single("storage.rules", ""))
            .await
            .unwrap()
            .ruleset
            .unwrap();

        let mut tasks = Vec::new();
        for _ in 0..5 {
            let ruleset = ruleset.clone();
            tasks.push(tokio::spawn(async move {
                ruleset
                    .verify(opts(RulesetOperationMethod::Get), BTreeMap::new())
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_permitted());
        }
        runtime.stop().await;
    }

    #[tokio::test]
    async fn list_is_denied_before_rules_version_two() {
        let fake = fake_evaluator(SCRIPTED_EVALUATOR, 1);
        let runtime = StorageRulesRuntime::new(fake.config.clone(), None);
        runtime.start().await.unwrap();
        let ruleset = runtime
            .load_ruleset(RulesSource::single("storage.rules", ""))
            .await
            .unwrap()
            .ruleset
            .unwrap();

        let outcome = ruleset
            .verify(opts(RulesetOperationMethod::List), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.permitted, Some(false));
        assert_eq!(outcome.issues.warnings, vec![LIST_REQUIRES_V2]);

        let outcome = ruleset
            .verify(opts(RulesetOperationMethod::Get), BTreeMap::new())
            .await
            .unwrap();
        assert!(outcome.is_permitted());
        runtime.stop().await;
    }

    #[tokio::test]
    async fn continuation_fetches_document_and_resumes() {
        let fake = fake_evaluator(FETCH_THEN_PERMIT, 2);
        let fetcher = Arc::new(RecordingFetcher::default());
        let runtime = StorageRulesRuntime::new(fake.config.clone(), Some(fetcher.clone()));
        runtime.start().await.unwrap();
        let ruleset = runtime
            .load_ruleset(RulesSource::single("storage.rules", ""))
            .await
            .unwrap()
            .ruleset
            .unwrap();

        let outcome = ruleset
            .verify(opts(RulesetOperationMethod::Get), BTreeMap::new())
            .await
            .unwrap();
        assert!(outcome.is_permitted());
        assert_eq!(
            *fetcher.paths.lock().unwrap(),
            vec!["projects/demo-project/databases/(default)/documents/users/u1"]
        );
        runtime.stop().await;
    }

    #[tokio::test]
    async fn missing_document_is_a_valid_answer() {
        let fake = fake_evaluator(FETCH_THEN_PERMIT, 2);
        let runtime = StorageRulesRuntime::new(fake.config.clone(), None);
        runtime.start().await.unwrap();
        let ruleset = runtime
            .load_ruleset(RulesSource::single("storage.rules", ""))
            .await
            .unwrap()
            .ruleset
            .unwrap();

        let outcome = ruleset
            .verify(opts(RulesetOperationMethod::Get), BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(outcome.permitted, Some(false));
        runtime.stop().await;
    }

    #[tokio::test]
    async fn exit_abandons_pending_requests() {
        let fake = fake_evaluator(EXIT_ON_VERIFY, 2);
        let runtime = StorageRulesRuntime::new(fake.config.clone(), None);
        runtime.start().await.unwrap();
        let ruleset = runtime
            .load_ruleset(RulesSource::single("storage.rules", ""))
            .await
            .unwrap()
            .ruleset
            .unwrap();

        let err = ruleset
            .verify(opts(RulesetOperationMethod::Get), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RulesError::ProcessExited));

        time::timeout(Duration::from_secs(5), async {
            while runtime.is_alive().await {
                time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(runtime.state().await, RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn jarfile_on_stderr_is_fatal() {
        let fake = fake_evaluator(MISSING_JAR, 2);
        let runtime = StorageRulesRuntime::new(fake.config.clone(), None);
        let err = runtime.start().await.unwrap_err();
        assert!(matches!(err, RulesError::FatalStartup(_)));
        assert_eq!(runtime.state().await, RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn missing_binary_without_download_fails_closed() {
        let runtime = StorageRulesRuntime::new(
            RuntimeConfig {
                jar_path: PathBuf::from("/nonexistent/rules.jar"),
                auto_download: false,
                ..Default::default()
            },
            None,
        );
        let err = runtime.start().await.unwrap_err();
        assert!(matches!(err, RulesError::BinaryMissing(_)));
        assert!(!runtime.is_alive().await);
    }

    #[tokio::test]
    async fn response_with_null_issue_lists_reaches_waiter() {
        let pending = Mutex::new(PendingMap::new());
        let (tx, rx) = oneshot::channel();
        pending.lock().await.insert(5, tx);

        dispatch_line(
            &pending,
            r#"{"id":5,"status":"ok","result":{"permit":true},"errors":null,"warnings":null}"#,
        )
        .await;

        assert!(pending.lock().await.is_empty());
        let response = rx.await.unwrap().unwrap();
        assert!(response.errors.is_empty());
        assert_eq!(response.result.and_then(|result| result.permit), Some(true));
    }
}

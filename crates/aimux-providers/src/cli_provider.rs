//! CLI transport: runs a provider's local command-line tool instead of
//! calling its HTTP API.
//!
//! The prompt is passed as a single argument (no shell). Each CLI family
//! has its own argument layout; credentials travel as environment variables.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use aimux_core::config::ProviderConfig;
use aimux_core::error::AiError;
use aimux_core::types::{ChatMessage, ChatRole, ProviderId, TokenUsage};

use crate::registry::{enablement_hint, find, CliSpec};
use crate::traits::{GenerationRequest, GenerationResponse, TokenStream, Transport};

/// Timeout for one CLI invocation.
pub const CLI_TIMEOUT: Duration = Duration::from_secs(60);

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const HELP_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Static CLI capabilities for `id`, if the provider ships a CLI.
pub fn cli_capabilities(id: ProviderId) -> Option<&'static CliSpec> {
    find(id).cli.as_ref()
}

/// Output from a CLI command.
#[derive(Debug)]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CliOutput {
    /// Check if command succeeded (exit code 0).
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Error from [`run_command`], before it is attributed to a provider.
#[derive(Debug)]
pub enum CliRunError {
    NotFound,
    Timeout(Duration),
    Io(std::io::Error),
}

/// Run a command with piped output and a timeout. The child is killed when
/// the timeout fires.
pub async fn run_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    working_dir: Option<&PathBuf>,
    timeout_duration: Duration,
) -> Result<CliOutput, CliRunError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }

    let mut child = command.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CliRunError::NotFound
        } else {
            CliRunError::Io(e)
        }
    })?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let result = timeout(timeout_duration, async {
        // Drain both pipes concurrently so a full buffer on one cannot block the child.
        let stdout_handle = async move {
            let mut stdout = String::new();
            if let Some(mut out) = stdout_pipe {
                out.read_to_string(&mut stdout).await?;
            }
            Ok::<_, std::io::Error>(stdout)
        };

        let stderr_handle = async move {
            let mut stderr = String::new();
            if let Some(mut err) = stderr_pipe {
                err.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>(stderr)
        };

        let (stdout_result, stderr_result) = tokio::join!(stdout_handle, stderr_handle);
        let stdout = stdout_result?;
        let stderr = stderr_result?;

        let status = child.wait().await?;

        Ok::<_, std::io::Error>(CliOutput {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    })
    .await;

    match result {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(CliRunError::Io(e)),
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            Err(CliRunError::Timeout(timeout_duration))
        }
    }
}

/// Whether `command` can be executed: `--version` first, then `--help`.
pub async fn cli_available(command: &str) -> bool {
    for (flag, limit) in [("--version", VERSION_PROBE_TIMEOUT), ("--help", HELP_PROBE_TIMEOUT)] {
        match run_command(command, &[flag.to_string()], &[], None, limit).await {
            Ok(output) if output.success() => return true,
            Err(CliRunError::NotFound) => return false,
            _ => continue,
        }
    }
    false
}

/// Pull the answer out of CLI output: the outermost JSON object's `text`,
/// `content` or `response` field if present, otherwise trimmed stdout.
pub fn parse_response(stdout: &str) -> String {
    if let (Some(start), Some(end)) = (stdout.find('{'), stdout.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&stdout[start..=end]) {
                for key in ["text", "content", "response"] {
                    if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                        return text.to_string();
                    }
                }
            }
        }
    }
    stdout.trim().to_string()
}

/// Strip effort suffixes like `" high"` or `"(medium)"` that codex rejects.
pub fn clean_codex_model(model: &str) -> String {
    let mut cleaned = model.to_string();
    for tag in ["(medium)", "(high)", "(low)"] {
        cleaned = cleaned.replace(tag, "");
    }
    let trimmed = cleaned.trim();
    if let Some((head, tail)) = trimmed.rsplit_once(char::is_whitespace) {
        if ["medium", "high", "low", "fast", "slow"]
            .iter()
            .any(|s| tail.eq_ignore_ascii_case(s))
        {
            return head.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Flatten a conversation into one prompt. A lone user turn is passed
/// through unchanged.
pub fn flatten_messages(messages: &[ChatMessage]) -> String {
    match messages {
        [only] if only.role == ChatRole::User => only.content.clone(),
        _ => messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

// ─────────────────────────────────────────────
// CliProvider
// ─────────────────────────────────────────────

/// Transport that shells out (without a shell) to a provider CLI.
pub struct CliProvider {
    provider: ProviderId,
    command: String,
    extra_args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    timeout: Duration,
    spec: &'static CliSpec,
    kind: String,
}

impl std::fmt::Debug for CliProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CliProvider")
            .field("provider", &self.provider)
            .field("command", &self.command)
            .field("extra_args", &self.extra_args)
            .field("working_dir", &self.working_dir)
            .field("env", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}

impl CliProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, AiError> {
        let spec = cli_capabilities(config.id).ok_or_else(|| AiError::ProviderDisabled {
            provider: config.id,
            hint: format!("{} has no CLI mode. {}", find(config.id).display_name, enablement_hint(config)),
        })?;
        let c = &config.credentials;
        let command = c
            .cli_command
            .clone()
            .unwrap_or_else(|| spec.command.to_string());

        Ok(CliProvider {
            provider: config.id,
            kind: format!("cli:{}", command),
            command,
            extra_args: c.cli_args.clone(),
            working_dir: c.cli_working_directory.as_ref().map(PathBuf::from),
            env: cli_env(config),
            timeout: CLI_TIMEOUT,
            spec,
        })
    }

    pub fn spec(&self) -> &'static CliSpec {
        self.spec
    }

    /// Argument vector for one invocation.
    pub fn build_args(&self, model: &str, prompt: &str) -> Vec<String> {
        let mut args = Vec::new();
        match self.provider {
            ProviderId::Google => {
                args.extend(["generate".to_string(), "--model".to_string(), model.to_string()]);
                args.extend(self.extra_args.iter().cloned());
                args.extend(["--prompt".to_string(), prompt.to_string()]);
            }
            ProviderId::Anthropic => {
                args.extend(["--model".to_string(), model.to_string()]);
                args.extend(self.extra_args.iter().cloned());
                args.push(prompt.to_string());
            }
            _ => {
                args.extend(["--model".to_string(), clean_codex_model(model)]);
                args.extend(self.extra_args.iter().cloned());
                args.push(prompt.to_string());
            }
        }
        args
    }

    fn run_error(&self, err: CliRunError) -> AiError {
        let message = match err {
            CliRunError::NotFound => format!(
                "CLI execution failed: command '{}' not found. {}",
                self.command, self.spec.install_hint
            ),
            CliRunError::Timeout(limit) => format!(
                "CLI execution failed: timed out after {}s",
                limit.as_secs()
            ),
            CliRunError::Io(e) => format!("CLI execution failed: {}", e),
        };
        AiError::Transport {
            provider: self.provider,
            message,
            code: Some("cli".into()),
            retryable: false,
        }
    }

    fn spawn_streaming(&self, args: &[String]) -> Result<Child, AiError> {
        let mut command = Command::new(&self.command);
        command
            .args(args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command.spawn().map_err(|e| {
            self.run_error(if e.kind() == std::io::ErrorKind::NotFound {
                CliRunError::NotFound
            } else {
                CliRunError::Io(e)
            })
        })
    }
}

/// Credential environment for the child process.
fn cli_env(config: &ProviderConfig) -> Vec<(String, String)> {
    let c = &config.credentials;
    let mut env = Vec::new();
    let mut push = |key: &str, value: &Option<String>| {
        if let Some(v) = value {
            env.push((key.to_string(), v.clone()));
        }
    };
    match config.id {
        ProviderId::Google => {
            push("GEMINI_API_KEY", &c.api_key);
            push("GOOGLE_API_KEY", &c.api_key);
            if c.use_gcloud_adc {
                push("GOOGLE_CLOUD_PROJECT", &c.project);
                push("GOOGLE_CLOUD_LOCATION", &c.location);
            }
        }
        ProviderId::Anthropic => push("ANTHROPIC_API_KEY", &c.api_key),
        _ => {
            push("OPENAI_API_KEY", &c.api_key);
            push("OPENAI_ORGANIZATION", &c.organization);
        }
    }
    env
}

struct CliStreamState {
    lines: tokio::io::Lines<BufReader<ChildStdout>>,
    child: Child,
    stderr: Option<JoinHandle<String>>,
    provider: ProviderId,
    finished: bool,
}

#[async_trait]
impl Transport for CliProvider {
    fn provider(&self) -> ProviderId {
        self.provider
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerationRequest,
    ) -> Result<GenerationResponse, AiError> {
        let prompt = flatten_messages(&request.messages);
        let args = self.build_args(model, &prompt);
        debug!(provider = %self.provider, command = %self.command, model = %model, "Running CLI");

        let output = run_command(
            &self.command,
            &args,
            &self.env,
            self.working_dir.as_ref(),
            self.timeout,
        )
        .await
        .map_err(|e| self.run_error(e))?;

        if !output.success() {
            let detail = if output.stderr.trim().is_empty() {
                format!("exit code {}", output.exit_code)
            } else {
                output.stderr.trim().to_string()
            };
            warn!(provider = %self.provider, exit_code = output.exit_code, "CLI exited with failure");
            return Err(AiError::Transport {
                provider: self.provider,
                message: format!("CLI execution failed: {}", detail),
                code: Some(output.exit_code.to_string()),
                retryable: false,
            });
        }

        let text = parse_response(&output.stdout);
        Ok(GenerationResponse {
            messages: vec![ChatMessage::assistant(text.clone())],
            text,
            finish_reason: Some("stop".into()),
            usage: TokenUsage::default(),
            tool_calls: Vec::new(),
            warnings: Vec::new(),
        })
    }

    async fn stream(&self, model: &str, request: &GenerationRequest) -> Result<TokenStream, AiError> {
        if !self.spec.supports_streaming {
            return Err(AiError::Unsupported {
                provider: self.provider,
                capability: aimux_core::error::CapabilityKind::Streaming,
            });
        }
        let prompt = flatten_messages(&request.messages);
        let args = self.build_args(model, &prompt);
        let mut child = self.spawn_streaming(&args)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AiError::transport(self.provider, "CLI stdout unavailable"))?;
        let stderr = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = err.read_to_string(&mut buf).await;
                buf
            })
        });

        let state = CliStreamState {
            lines: BufReader::new(stdout).lines(),
            child,
            stderr,
            provider: self.provider,
            finished: false,
        };

        Ok(stream::unfold(state, |mut st| async move {
            if st.finished {
                return None;
            }
            match st.lines.next_line().await {
                Ok(Some(line)) => Some((Ok(format!("{}\n", line)), st)),
                Ok(None) => {
                    st.finished = true;
                    let status = st.child.wait().await;
                    let stderr = match st.stderr.take() {
                        Some(handle) => handle.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    match status {
                        Ok(s) if s.success() => None,
                        Ok(s) => {
                            let detail = if stderr.trim().is_empty() {
                                format!("exit code {}", s.code().unwrap_or(-1))
                            } else {
                                stderr.trim().to_string()
                            };
                            let err = AiError::transport(
                                st.provider,
                                format!("CLI execution failed: {}", detail),
                            );
                            Some((Err(err), st))
                        }
                        Err(e) => {
                            let err = AiError::transport(
                                st.provider,
                                format!("CLI execution failed: {}", e),
                            );
                            Some((Err(err), st))
                        }
                    }
                }
                Err(e) => {
                    st.finished = true;
                    let err =
                        AiError::transport(st.provider, format!("CLI execution failed: {}", e));
                    Some((Err(err), st))
                }
            }
        })
        .boxed())
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

//! 外部コマンドの実行
//!
//! 出力はサービスの `Step` に流しつつ保持し、失敗時のエラーに含める。
//! キャンセルされると子プロセスに SIGTERM を送り、猶予後に kill する。

use crate::error::{AppError, AppResult};
use crate::output::Step;
use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

/// SIGTERM 後に終了を待つ時間
const TERM_GRACE: Duration = Duration::from_secs(10);

/// 実行するコマンド
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// `bash -c <script>`。`verbose` なら `-xvc` でトレースを有効にする
    pub fn bash(script: impl Into<String>, verbose: bool) -> Self {
        let flags = if verbose { "-xvc" } else { "-c" };
        Self::new("bash").arg(flags).arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `bash -c` の場合はスクリプト部分
    pub fn script(&self) -> Option<&str> {
        match self.args.as_slice() {
            [flags, script] if self.program == "bash" && flags.ends_with('c') => Some(script),
            _ => None,
        }
    }

    /// ログ表示用のコマンドライン
    pub fn display(&self) -> String {
        if let Some(script) = self.script() {
            return script.to_string();
        }
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// 終了したコマンドの出力
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// コマンドを実行する。終了コードが 0 以外なら `AppError::Subprocess`
    async fn run(&self, spec: &CommandSpec, step: &Step) -> AppResult<CommandOutput>;
}

/// tokio::process による実装
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    #[tracing::instrument(skip_all, fields(service = %step.service(), program = %spec.program))]
    async fn run(&self, spec: &CommandSpec, step: &Step) -> AppResult<CommandOutput> {
        tracing::debug!(command = %spec.display(), cwd = ?spec.cwd, "Running command");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| AppError::Subprocess {
            command: spec.display(),
            status: None,
            stdout: String::new(),
            stderr: format!("起動できません: {}", e),
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let cancel = step.cancel_token().clone();

        let finished = tokio::select! {
            result = async {
                let (out, err) =
                    tokio::join!(forward_lines(stdout, step), forward_lines(stderr, step));
                let status = child.wait().await;
                (out, err, status)
            } => Some(result),
            _ = cancel.cancelled() => None,
        };

        let Some((stdout, stderr, status)) = finished else {
            tracing::warn!(command = %spec.display(), "Cancelled, terminating child process");
            terminate(&mut child).await;
            return Err(AppError::Cancelled);
        };

        let status = status?;
        if !status.success() {
            return Err(AppError::Subprocess {
                command: spec.display(),
                status: status.code(),
                stdout,
                stderr,
            });
        }

        Ok(CommandOutput {
            status: status.code(),
            stdout,
            stderr,
        })
    }
}

/// 行単位でステップに流す。UTF-8 でない行も置換して EOF まで読み切る
async fn forward_lines<R: AsyncRead + Unpin>(reader: Option<R>, step: &Step) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut captured = String::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                step.emit(line);
                captured.push_str(line);
                captured.push('\n');
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read command output");
                break;
            }
        }
    }
    captured
}

async fn terminate(child: &mut Child) {
    if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
        if signal::kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok()
            && tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok()
        {
            return;
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Child process already exited");
    }
}

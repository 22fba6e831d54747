//! session-manager-plugin との橋渡し
//!
//! ECS ExecuteCommand が返したセッションを plugin に渡し、端末の入出力を
//! そのままつなぐ。Ctrl-C は plugin に転送し、このプロセスは終了しない。

use anyhow::Context;
use flotilla_cloud_aws::ExecSession;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

pub const PLUGIN_BINARY: &str = "session-manager-plugin";
const START_SESSION: &str = "StartSession";
const ERROR_MARKER: &[u8] = b"ERROR";

/// PATH から plugin を探す
pub fn find_plugin() -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(PLUGIN_BINARY))
        .find(|candidate| candidate.is_file())
}

/// plugin がなければインストール方法を添えてエラーにする
pub fn require_plugin() -> anyhow::Result<PathBuf> {
    find_plugin().ok_or_else(|| {
        anyhow::anyhow!(
            "{} が見つかりません\n\
             インストール方法: https://docs.aws.amazon.com/systems-manager/latest/userguide/session-manager-working-with-install-plugin.html",
            PLUGIN_BINARY
        )
    })
}

/// 出力中の "ERROR" を、チャンク境界をまたいでも検出する
#[derive(Debug, Default)]
struct ErrorScanner {
    tail: Vec<u8>,
    found: bool,
}

impl ErrorScanner {
    fn feed(&mut self, chunk: &[u8]) {
        if self.found {
            return;
        }
        let mut window = std::mem::take(&mut self.tail);
        window.extend_from_slice(chunk);
        self.found = window
            .windows(ERROR_MARKER.len())
            .any(|w| w == ERROR_MARKER);
        let keep = window.len().min(ERROR_MARKER.len() - 1);
        self.tail = window[window.len() - keep..].to_vec();
    }
}

/// plugin を起動し、終了するまで端末をつなぐ
#[tracing::instrument(skip(plugin, session), fields(session_id = %session.session_id))]
pub async fn start_session(
    plugin: &Path,
    session: &ExecSession,
    region: &str,
) -> anyhow::Result<()> {
    let document = session.to_json()?;
    let mut child = Command::new(plugin)
        .arg(document)
        .arg(region)
        .arg(START_SESSION)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("{} を起動できません", PLUGIN_BINARY))?;

    let pid = child.id();
    let mut stdout = child
        .stdout
        .take()
        .context("plugin の標準出力を取得できません")?;

    let relay = tokio::spawn(async move {
        let mut scanner = ErrorScanner::default();
        let mut terminal = tokio::io::stdout();
        let mut buf = [0u8; 4096];
        loop {
            let n = stdout.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            scanner.feed(&buf[..n]);
            terminal.write_all(&buf[..n]).await?;
            terminal.flush().await?;
        }
        Ok::<bool, std::io::Error>(scanner.found)
    });

    let status = loop {
        tokio::select! {
            status = child.wait() => break status?,
            _ = tokio::signal::ctrl_c() => {
                if let Some(pid) = pid {
                    tracing::debug!(pid, "Forwarding SIGINT to session-manager-plugin");
                    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
                }
            }
        }
    };

    let saw_error = relay.await??;
    if saw_error {
        anyhow::bail!("セッションがエラーで終了しました");
    }
    if !status.success() {
        anyhow::bail!("セッションが異常終了しました ({})", status);
    }
    Ok(())
}

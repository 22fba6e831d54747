use crate::GlobalArgs;
use colored::Colorize;
use std::path::Path;

/// ssh の ControlMaster ソケット（環境ディレクトリ直下）
pub const CONTROL_SOCKET: &str = "bastion.sock";

/// ssh の終了コードを解釈する
///
/// 255 はソケットに接続できない、つまりトンネルが開いていないことを示す。
pub fn check_exit(code: Option<i32>, output: &str) -> anyhow::Result<()> {
    match code {
        Some(0) => Ok(()),
        Some(255) => anyhow::bail!("トンネルを閉じられません: トンネルは有効ではありません"),
        other => {
            tracing::debug!(output = %output, "ssh output");
            match other {
                Some(code) => anyhow::bail!("トンネルを閉じられません (終了コード {})", code),
                None => anyhow::bail!("トンネルを閉じられません (シグナルで終了しました)"),
            }
        }
    }
}

pub async fn handle_down(global: &GlobalArgs) -> anyhow::Result<()> {
    let project = flotilla_core::load_project()?;
    let env = global
        .env
        .clone()
        .or_else(|| project.env.clone())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| anyhow::anyhow!("env を指定してください (--env または FLOTILLA_ENV)"))?;
    let env_dir = project.env_dir(&env);

    close(&env_dir).await?;
    println!("{}", "✓ トンネルを閉じました".green());
    Ok(())
}

async fn close(env_dir: &Path) -> anyhow::Result<()> {
    if !env_dir.is_dir() {
        anyhow::bail!("フォルダ '{}' にアクセスできません", env_dir.display());
    }
    println!("{}", env_dir.display());

    let output = tokio::process::Command::new("ssh")
        .args(["-S", CONTROL_SOCKET, "-O", "exit", ""])
        .current_dir(env_dir)
        .output()
        .await?;

    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    check_exit(output.status.code(), &text)
}

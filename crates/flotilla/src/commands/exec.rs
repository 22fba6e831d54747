use crate::GlobalArgs;
use crate::ssm;
use crate::utils;
use colored::Colorize;

/// コマンド省略時に起動するシェル
pub const DEFAULT_COMMAND: &str = "/bin/sh";

/// `-- ` 以降の引数を1つのコマンド文字列にする
pub fn join_command(command: &[String]) -> String {
    if command.is_empty() {
        DEFAULT_COMMAND.to_string()
    } else {
        command.join(" ")
    }
}

pub async fn handle(
    global: &GlobalArgs,
    service: &str,
    ecs_cluster: Option<String>,
    command: Vec<String>,
) -> anyhow::Result<()> {
    let plugin = ssm::require_plugin()?;
    let ws = utils::load_workspace(global)?;

    let cluster = ecs_cluster.unwrap_or_else(|| ws.settings.default_cluster());
    let ecs_service = format!("{}-{}", ws.settings.env, service);
    let command = join_command(&command);
    tracing::info!(
        service = %ecs_service,
        cluster = %cluster,
        region = %ws.settings.aws_region,
        profile = %ws.settings.aws_profile,
        "Executing command in container"
    );

    let session = utils::aws_session(&ws.settings, None, None).await;
    let ecs = session.ecs();

    println!("{}", "コンテナに接続しています...".blue());
    let task = ecs.running_task(&cluster, &ecs_service).await?;
    tracing::debug!(task = %task, "Found running task");

    println!("{} {}", "コマンドを実行しています:".blue(), command.cyan());
    let exec = ecs.execute_command(&cluster, &task, service, &command).await?;

    ssm::start_session(&plugin, &exec, session.region()).await
}

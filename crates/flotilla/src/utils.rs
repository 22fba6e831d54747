use crate::GlobalArgs;
use anyhow::Context;
use colored::Colorize;
use flotilla_apps::{
    AppContext, AppError, Confirm, TerminalOutput, TerminalPrompt, aws_collaborators,
};
use flotilla_cloud_aws::{AwsSession, SessionOptions, registry_host};
use flotilla_core::{
    CancellationToken, DependencyGraph, NodeState, Project, RunReport, RunSettings, ServiceKind,
    ServiceNode,
};
use std::sync::Arc;

/// 読み込んだプロジェクトと確定済みの設定
pub struct Workspace {
    pub project: Project,
    pub settings: Arc<RunSettings>,
    pub graph: DependencyGraph<ServiceNode>,
}

impl Workspace {
    /// サービス名からノードを探す
    pub fn service(&self, name: &str) -> anyhow::Result<&ServiceNode> {
        self.project.service(name).ok_or_else(|| {
            anyhow::anyhow!(
                "サービス '{}' が見つかりません\n利用可能なサービス: {}",
                name,
                self.project.service_names().join(", ")
            )
        })
    }
}

/// flotilla.kdl を読み込み、設定と依存グラフを確定する
pub fn load_workspace(global: &GlobalArgs) -> anyhow::Result<Workspace> {
    let project = flotilla_core::load_project()?;
    let settings = RunSettings::resolve(&project, &global.overrides())?;
    let graph = flotilla_core::build_graph(&project)?;
    Ok(Workspace {
        project,
        settings: Arc::new(settings),
        graph,
    })
}

/// 読み込んだ設定の概要を表示
pub fn print_settings(ws: &Workspace) {
    if let Some(file) = flotilla_core::discovery::config_file_in(&ws.project.root_dir) {
        println!("📄 設定ファイル: {}", file.display().to_string().cyan());
    }
    let s = &ws.settings;
    println!(
        "  環境: {}  名前空間: {}  リージョン: {}  プロファイル: {}",
        s.env.cyan(),
        s.namespace.cyan(),
        s.aws_region.cyan(),
        s.aws_profile.cyan()
    );
}

pub async fn aws_session(
    settings: &RunSettings,
    region: Option<&str>,
    profile: Option<&str>,
) -> AwsSession {
    AwsSession::load(SessionOptions {
        region: region.unwrap_or(&settings.aws_region).to_string(),
        profile: Some(profile.unwrap_or(&settings.aws_profile).to_string()),
        endpoint_url: settings.endpoint_url.clone(),
    })
    .await
}

/// 説明表示用のレジストリ（AWS に問い合わせない）
pub fn placeholder_registry(settings: &RunSettings) -> String {
    settings
        .docker_registry
        .clone()
        .unwrap_or_else(|| registry_host("<aws_account_id>", &settings.aws_region))
}

/// ビルドするコンテナがレジストリ未指定のまま残っているか
fn needs_registry(graph: &DependencyGraph<ServiceNode>) -> bool {
    graph.names().filter_map(|name| graph.node(name)).any(|node| match &node.kind {
        ServiceKind::Container(config) => {
            config.image.is_none() && config.docker_registry.is_none()
        }
        _ => false,
    })
}

/// ECR レジストリのアドレスをトラバーサル前に一度だけ確定する
pub async fn resolve_registry(
    settings: &RunSettings,
    session: &AwsSession,
    graph: &DependencyGraph<ServiceNode>,
) -> anyhow::Result<String> {
    if let Some(registry) = &settings.docker_registry {
        return Ok(registry.clone());
    }
    if !needs_registry(graph) {
        return Ok(placeholder_registry(settings));
    }
    let registry = session
        .ecr()
        .registry_address(&settings.aws_region)
        .await
        .context("ECR レジストリのアドレスを取得できません")?;
    tracing::debug!(registry = %registry, "Resolved ECR registry");
    Ok(registry)
}

/// AWS と Docker を使うパイプライン用のコンテキストを組み立てる
///
/// リージョンやプロファイルを個別に持つ ECS サービスには専用のクライアントを用意する。
pub async fn app_context(
    ws: &Workspace,
    session: &AwsSession,
    registry: String,
    prompt: Arc<dyn Confirm>,
) -> anyhow::Result<AppContext> {
    let collaborators = aws_collaborators(session, prompt.clone())?;
    let mut ctx = AppContext::new(ws.settings.clone(), registry, collaborators);

    for node in &ws.project.services {
        let ServiceKind::Container(config) = &node.kind else {
            continue;
        };
        if config.aws_region.is_none() && config.aws_profile.is_none() {
            continue;
        }
        tracing::debug!(
            service = %node.name,
            region = ?config.aws_region,
            profile = ?config.aws_profile,
            "Using a dedicated AWS session"
        );
        let own = aws_session(
            &ws.settings,
            config.aws_region.as_deref(),
            config.aws_profile.as_deref(),
        )
        .await;
        ctx = ctx.with_service_collaborators(&node.name, aws_collaborators(&own, prompt.clone())?);
    }

    Ok(ctx)
}

/// 端末出力と、その表示を止めて確認を取るプロンプト
pub fn terminal(ws: &Workspace, global: &GlobalArgs) -> (Arc<TerminalOutput>, Arc<dyn Confirm>) {
    let output = Arc::new(TerminalOutput::new(global.plain_text || ws.project.plain_text));
    let prompt: Arc<dyn Confirm> =
        Arc::new(TerminalPrompt::serialized(Some(output.multi_progress())));
    (output, prompt)
}

/// Ctrl-C でトラバーサルをキャンセルする
pub fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "中断しています...".yellow());
            token.cancel();
        }
    });
}

/// 実行結果をまとめて表示し、失敗があればエラーを返す
pub fn conclude(report: RunReport<AppError>, success: &str) -> anyhow::Result<()> {
    if report.is_success() {
        println!();
        println!("{}", format!("✓ {}", success).green().bold());
        return Ok(());
    }

    println!();
    let skipped = report.names_in(NodeState::Skipped);
    if !skipped.is_empty() {
        println!("{} {}", "スキップ:".yellow(), skipped.join(", "));
    }

    let user_cancelled = !report.failures().is_empty()
        && report
            .failures()
            .iter()
            .all(|(_, f)| f.error().is_some_and(AppError::is_user_cancelled));

    match report.into_result() {
        Err(e) if user_cancelled => {
            println!("{}", "ユーザーの操作により中止しました".yellow());
            Err(anyhow::Error::new(e))
        }
        Err(e) => Err(anyhow::Error::new(e)),
        Ok(()) => Ok(()),
    }
}

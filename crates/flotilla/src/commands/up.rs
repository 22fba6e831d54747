use crate::GlobalArgs;
use crate::utils;
use colored::Colorize;
use flotilla_apps::{Confirm, Driver, FixedAnswer, OutputAggregator};
use flotilla_core::{ServiceKind, ServiceNode};
use std::sync::Arc;

pub async fn handle_apps(global: &GlobalArgs, explain: bool) -> anyhow::Result<()> {
    let ws = utils::load_workspace(global)?;
    let session = utils::aws_session(&ws.settings, None, None).await;

    if explain {
        // レジストリは AWS に問い合わせずに表示用の値を使う
        let prompt: Arc<dyn Confirm> = Arc::new(FixedAnswer(false));
        let ctx =
            utils::app_context(&ws, &session, utils::placeholder_registry(&ws.settings), prompt)
                .await?;
        let (output, _) = utils::terminal(&ws, global);
        let driver = Driver::new(Arc::new(ctx), OutputAggregator::new(output));
        for text in driver.explain(&ws.graph)? {
            println!("{}", text);
        }
        return Ok(());
    }

    println!("{}", "アプリをデプロイしています...".blue().bold());
    utils::print_settings(&ws);
    print_plan(ws.project.services.iter());

    let registry = utils::resolve_registry(&ws.settings, &session, &ws.graph).await?;
    let (output, prompt) = utils::terminal(&ws, global);
    let ctx = utils::app_context(&ws, &session, registry, prompt).await?;

    println!();
    let driver = Driver::new(Arc::new(ctx), OutputAggregator::new(output));
    utils::cancel_on_ctrl_c(driver.cancellation_token());
    let report = driver.up(&ws.graph).await;

    utils::conclude(report, "デプロイが完了しました!")
}

fn print_plan<'a>(services: impl Iterator<Item = &'a ServiceNode>) {
    println!();
    println!("{}", "対象サービス:".bold());
    for node in services {
        let detail = match &node.kind {
            ServiceKind::Container(config) => config
                .image
                .clone()
                .unwrap_or_else(|| "ビルドしてデプロイ".to_string()),
            ServiceKind::Function(config) => format!("node {}", config.node_version),
            ServiceKind::Alias => "実行なし".to_string(),
        };
        let deps = if node.depends_on.is_empty() {
            String::new()
        } else {
            format!(" ← {}", node.depends_on.join(", "))
        };
        println!(
            "  • {} [{}] {}{}",
            node.name.cyan(),
            node.kind.label(),
            detail.dimmed(),
            deps
        );
    }
}

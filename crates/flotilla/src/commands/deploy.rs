use crate::GlobalArgs;
use crate::utils;
use colored::Colorize;
use flotilla_apps::{Driver, OutputAggregator};
use flotilla_core::{ServiceKind, ServiceNode};
use std::sync::Arc;

/// `deploy` のコマンドライン上書き値
#[derive(Debug, Default)]
pub struct DeployOverrides {
    pub image: Option<String>,
    pub ecs_cluster: Option<String>,
    pub task_definition_arn: Option<String>,
}

impl DeployOverrides {
    fn is_empty(&self) -> bool {
        self.image.is_none() && self.ecs_cluster.is_none() && self.task_definition_arn.is_none()
    }

    /// ECS サービスの設定に上書き値を適用する
    pub fn apply(self, mut node: ServiceNode) -> anyhow::Result<ServiceNode> {
        if self.is_empty() {
            return Ok(node);
        }
        let label = node.kind.label();
        let name = node.name.clone();
        let ServiceKind::Container(config) = &mut node.kind else {
            anyhow::bail!(
                "--image、--ecs-cluster、--task-definition-arn は ECS サービスでのみ使用できます ({} は {})",
                name,
                label
            );
        };
        if let Some(image) = self.image {
            config.image = Some(image);
        }
        if let Some(cluster) = self.ecs_cluster {
            config.cluster = Some(cluster);
        }
        if let Some(arn) = self.task_definition_arn {
            config.task_definition_arn = Some(arn);
        }
        Ok(node)
    }
}

pub async fn handle(
    global: &GlobalArgs,
    service: &str,
    overrides: DeployOverrides,
) -> anyhow::Result<()> {
    let ws = utils::load_workspace(global)?;
    let node = overrides.apply(ws.service(service)?.clone())?;

    println!(
        "{}",
        format!("{} をデプロイしています...", service).blue().bold()
    );
    utils::print_settings(&ws);
    if let ServiceKind::Container(config) = &node.kind
        && let Some(image) = &config.image
    {
        println!("  イメージ: {} (ビルドとプッシュはスキップ)", image.cyan());
    }

    let session = utils::aws_session(&ws.settings, None, None).await;
    let single = flotilla_core::DependencyGraph::build(vec![ServiceNode {
        depends_on: Vec::new(),
        ..node.clone()
    }])?;
    let registry = utils::resolve_registry(&ws.settings, &session, &single).await?;
    let (output, prompt) = utils::terminal(&ws, global);
    let ctx = utils::app_context(&ws, &session, registry, prompt).await?;

    println!();
    let driver = Driver::new(Arc::new(ctx), OutputAggregator::new(output));
    utils::cancel_on_ctrl_c(driver.cancellation_token());
    driver.up_one(&node).await?;

    println!();
    println!(
        "{}",
        format!("✓ {} のデプロイが完了しました", service).green().bold()
    );
    Ok(())
}

use crate::GlobalArgs;
use crate::terraform::{StackSettings, Terraform};
use crate::utils::{self, Workspace};
use anyhow::Context;
use colored::Colorize;
use flotilla_apps::{CommandRunner, Driver, OutputAggregator, SystemRunner};
use flotilla_cloud_aws::AwsSession;
use std::sync::Arc;

/// インフラを指す予約名
pub const INFRA: &str = "infra";

/// 削除対象
#[derive(Debug, Clone, PartialEq)]
pub enum Target<'a> {
    All,
    Infra,
    App(&'a str),
}

impl<'a> Target<'a> {
    /// 全体の削除は `--auto-approve` なしでは行わない
    pub fn parse(app: Option<&'a str>, auto_approve: bool) -> anyhow::Result<Self> {
        match app {
            Some(INFRA) => Ok(Target::Infra),
            Some(name) => Ok(Target::App(name)),
            None if auto_approve => Ok(Target::All),
            None => anyhow::bail!(
                "全アプリとインフラを削除するには --auto-approve を指定してください\n\
                 1つのアプリだけを削除する場合: flotilla down <app>"
            ),
        }
    }
}

pub async fn handle(
    global: &GlobalArgs,
    app: Option<&str>,
    auto_approve: bool,
) -> anyhow::Result<()> {
    let target = Target::parse(app, auto_approve)?;
    let ws = utils::load_workspace(global)?;
    let session = utils::aws_session(&ws.settings, None, None).await;

    match target {
        Target::App(name) => destroy_app(&ws, &session, global, name, auto_approve).await,
        Target::Infra => destroy_infra(&ws, global).await,
        Target::All => {
            destroy_apps(&ws, &session, global).await?;
            destroy_infra(&ws, global).await?;
            println!();
            println!("{}", "✓ 全ての削除が完了しました!".green().bold());
            Ok(())
        }
    }
}

async fn destroy_app(
    ws: &Workspace,
    session: &AwsSession,
    global: &GlobalArgs,
    name: &str,
    auto_approve: bool,
) -> anyhow::Result<()> {
    let node = ws.service(name)?.clone();
    println!("{}", format!("{} を削除しています...", name).blue().bold());
    utils::print_settings(ws);

    let (output, prompt) = utils::terminal(ws, global);
    let registry = utils::placeholder_registry(&ws.settings);
    let ctx = utils::app_context(ws, session, registry, prompt).await?;
    let driver = Driver::new(Arc::new(ctx), OutputAggregator::new(output));
    utils::cancel_on_ctrl_c(driver.cancellation_token());

    println!();
    driver.down_one(&node, auto_approve).await?;

    println!();
    println!("{}", format!("✓ {} の削除が完了しました", name).green().bold());
    Ok(())
}

async fn destroy_apps(
    ws: &Workspace,
    session: &AwsSession,
    global: &GlobalArgs,
) -> anyhow::Result<()> {
    println!("{}", "アプリを削除しています...".blue().bold());
    utils::print_settings(ws);

    let (output, prompt) = utils::terminal(ws, global);
    let registry = utils::placeholder_registry(&ws.settings);
    let ctx = utils::app_context(ws, session, registry, prompt).await?;
    let driver = Driver::new(Arc::new(ctx), OutputAggregator::new(output));
    utils::cancel_on_ctrl_c(driver.cancellation_token());

    println!();
    let report = driver.down(&ws.graph, true).await;
    utils::conclude(report, "アプリの削除が完了しました")
}

/// `terraform "infra"` スタックを削除する
async fn destroy_infra(ws: &Workspace, global: &GlobalArgs) -> anyhow::Result<()> {
    let stack = StackSettings::resolve(&ws.settings, ws.project.terraform.get(INFRA));
    tracing::info!(
        version = %stack.version,
        profile = %stack.aws_profile,
        "Destroying infra stack"
    );

    let session =
        utils::aws_session(&ws.settings, Some(&stack.aws_region), Some(&stack.aws_profile))
            .await;
    let credentials = session
        .credentials()
        .await
        .context("AWS の認証情報を取得できません")?;

    println!();
    println!("{}", "インフラを削除しています...".blue().bold());
    println!("  terraform destroy を実行します ({})", ws.settings.env_dir().display().to_string().cyan());

    let spec = Terraform::destroy(&ws.settings, &stack, &credentials).command();
    let (output, _) = utils::terminal(ws, global);
    let step = OutputAggregator::new(output)
        .step("terraform", flotilla_core::CancellationToken::new());
    utils::cancel_on_ctrl_c(step.cancel_token().clone());

    step.begin("terraform destroy");
    match SystemRunner.run(&spec, &step).await {
        Ok(_) => step.done("インフラの削除が完了しました"),
        Err(e) => {
            step.fail(&e.to_string());
            return Err(e).context("terraform destroy に失敗しました");
        }
    }
    Ok(())
}

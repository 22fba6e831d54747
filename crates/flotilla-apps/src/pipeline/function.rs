//! Serverless Framework のパイプライン
//!
//! nvm で Node.js を揃え、`npx serverless` を bash 経由で実行する。

use super::AppPipeline;
use crate::context::AppContext;
use crate::error::AppResult;
use crate::output::Step;
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use flotilla_core::{FrameworkVersion, FunctionConfig, RunSettings};
use std::path::PathBuf;
use std::sync::Arc;

pub struct FunctionPipeline {
    name: String,
    config: FunctionConfig,
    settings: Arc<RunSettings>,
    path: PathBuf,
    nvm_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl FunctionPipeline {
    pub fn new(name: &str, config: FunctionConfig, ctx: &AppContext) -> Self {
        let settings = ctx.settings.clone();
        Self {
            name: name.to_string(),
            path: settings.service_dir(name, config.path.as_deref()),
            runner: ctx.collaborators_for(name).runner.clone(),
            nvm_dir: ctx.nvm_dir.clone(),
            config,
            settings,
        }
    }

    fn region(&self) -> &str {
        self.config
            .aws_region
            .as_deref()
            .unwrap_or(&self.settings.aws_region)
    }

    fn profile(&self) -> &str {
        self.config
            .aws_profile
            .as_deref()
            .unwrap_or(&self.settings.aws_profile)
    }

    fn nvm_sh(&self) -> String {
        self.nvm_dir.join("nvm.sh").display().to_string()
    }

    /// 使用する Node.js のバージョン。`.nvmrc` があればそちらを優先する
    pub fn node_version(&self) -> AppResult<String> {
        let nvmrc = self.path.join(".nvmrc");
        if nvmrc.is_file() {
            let version = std::fs::read_to_string(&nvmrc)?.trim().to_string();
            if !version.is_empty() {
                return Ok(version);
            }
        }
        Ok(self.config.node_version.clone())
    }

    /// nvm を読み込み、指定バージョンの Node.js で `body` を実行するスクリプト
    fn with_node(&self, node: &str, body: &str) -> String {
        let body = if self.config.use_yarn {
            body.replace("npm", "yarn").replace("npx", "yarn")
        } else {
            body.to_string()
        };
        format!("source {} && nvm use {} && {}", self.nvm_sh(), node, body)
    }

    fn in_service_dir(&self, spec: CommandSpec) -> CommandSpec {
        spec.current_dir(&self.path)
    }

    pub fn install_node_command(&self, node: &str) -> CommandSpec {
        let script = format!("source {} && nvm install {}", self.nvm_sh(), node);
        self.in_service_dir(CommandSpec::bash(script, false))
    }

    pub fn npm_install_command(&self, node: &str) -> CommandSpec {
        let script = self.with_node(node, "npm install --save-dev");
        self.in_service_dir(CommandSpec::bash(script, false))
    }

    /// `serverless deploy` / `serverless remove`
    fn lifecycle_command(&self, node: &str, action: &str, force: bool) -> CommandSpec {
        let body = match self.config.framework {
            FrameworkVersion::V3 => format!(
                "npx serverless {} --config={} --param=\"service={}\" --region={} --aws-profile={} --stage={} --verbose",
                action,
                self.config.file,
                self.name,
                self.region(),
                self.profile(),
                self.settings.env
            ),
            FrameworkVersion::Legacy => format!(
                "npx serverless {} --config {} --service {} --verbose --region {} --aws-profile {} --stage {}",
                action,
                self.config.file,
                self.name,
                self.region(),
                self.profile(),
                self.settings.env
            ),
        };

        let mut script = self.with_node(node, &body);
        if force {
            script.push_str(" --force");
        }
        self.in_service_dir(CommandSpec::bash(script, self.settings.is_verbose()))
    }

    pub fn deploy_command(&self, node: &str) -> CommandSpec {
        self.lifecycle_command(node, "deploy", self.config.force)
    }

    pub fn remove_command(&self, node: &str) -> CommandSpec {
        self.lifecycle_command(node, "remove", false)
    }

    fn domain_command(&self, node: &str, action: &str) -> CommandSpec {
        let body = format!(
            "npx serverless {} --verbose --region {} --aws-profile {} --stage {}",
            action,
            self.region(),
            self.profile(),
            self.settings.env
        );
        self.in_service_dir(CommandSpec::bash(
            self.with_node(node, &body),
            self.settings.is_verbose(),
        ))
    }

    pub fn create_domain_command(&self, node: &str) -> CommandSpec {
        self.domain_command(node, "create_domain")
    }

    pub fn remove_domain_command(&self, node: &str) -> CommandSpec {
        self.domain_command(node, "delete_domain")
    }

    /// 指定バージョンの nvm がなければインストールする
    async fn ensure_nvm(&self, step: &Step) -> AppResult<()> {
        let expected = &self.settings.nvm_version;
        if self.nvm_dir.join("nvm.sh").is_file() {
            let script = format!("source {} && nvm --version", self.nvm_sh());
            let check = CommandSpec::bash(script, false).current_dir(&self.settings.root_dir);
            let found = self.runner.run(&check, step).await?;
            if found.stdout.trim() == expected {
                tracing::debug!(version = %expected, "nvm is up to date");
                return Ok(());
            }
            tracing::debug!(
                expected = %expected,
                found = %found.stdout.trim(),
                "nvm version mismatch"
            );
        }

        step.emit(&format!("nvm {} をインストールしています...", expected));
        let install = CommandSpec::bash(
            format!(
                "curl -o- https://raw.githubusercontent.com/nvm-sh/nvm/v{}/install.sh | bash",
                expected
            ),
            false,
        )
        .current_dir(&self.settings.root_dir);
        self.runner.run(&install, step).await?;
        Ok(())
    }

    /// Node.js を用意し、使用するバージョンを返す
    async fn prepare_node(&self, step: &Step) -> AppResult<String> {
        self.ensure_nvm(step).await?;
        let node = self.node_version()?;
        self.runner.run(&self.install_node_command(&node), step).await?;
        Ok(node)
    }

    pub async fn create_domain(&self, step: &Step) -> AppResult<()> {
        let node = self.prepare_node(step).await?;
        step.emit("カスタムドメインを作成しています...");
        self.runner.run(&self.create_domain_command(&node), step).await?;
        Ok(())
    }

    pub async fn remove_domain(&self, step: &Step) -> AppResult<()> {
        let node = self.prepare_node(step).await?;
        step.emit("カスタムドメインを削除しています...");
        self.runner.run(&self.remove_domain_command(&node), step).await?;
        Ok(())
    }
}

#[async_trait]
impl AppPipeline for FunctionPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build(&self, _step: &Step) -> AppResult<()> {
        Ok(())
    }

    async fn push(&self, _step: &Step) -> AppResult<()> {
        Ok(())
    }

    async fn deploy(&self, step: &Step) -> AppResult<()> {
        let node = self.prepare_node(step).await?;

        step.emit("依存パッケージをインストールしています...");
        self.runner.run(&self.npm_install_command(&node), step).await?;

        if self.config.create_custom_domain {
            step.emit("カスタムドメインを作成しています...");
            self.runner.run(&self.create_domain_command(&node), step).await?;
        }

        step.emit("serverless deploy を実行しています...");
        self.runner.run(&self.deploy_command(&node), step).await?;
        Ok(())
    }

    async fn destroy(&self, step: &Step, _auto_approve: bool) -> AppResult<()> {
        let node = self.prepare_node(step).await?;

        step.emit("serverless remove を実行しています...");
        self.runner.run(&self.remove_command(&node), step).await?;

        if self.config.create_custom_domain {
            step.emit("カスタムドメインを削除しています...");
            self.runner.run(&self.remove_domain_command(&node), step).await?;
        }
        Ok(())
    }

    fn explain(&self) -> AppResult<String> {
        let node = self.node_version()?;

        let mut commands = vec![
            self.install_node_command(&node),
            self.npm_install_command(&node),
        ];
        if self.config.create_custom_domain {
            commands.push(self.create_domain_command(&node));
        }
        commands.push(self.deploy_command(&node));

        let mut lines = vec![
            format!("# {} (serverless)", self.name),
            format!("cd {}", self.path.display()),
        ];
        lines.extend(commands.iter().map(CommandSpec::display));
        Ok(lines.join("\n") + "\n")
    }
}

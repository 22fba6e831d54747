//! Terraform の実行
//!
//! `native` では PATH 上の terraform を、`docker` では `hashicorp/terraform`
//! イメージを使う。どちらも環境ディレクトリ (`.infra/env/{env}`) で実行する。

use flotilla_apps::CommandSpec;
use flotilla_cloud_aws::SessionCredentials;
use flotilla_core::{RunSettings, Runtime, TerraformStack};
use std::path::PathBuf;

pub const TERRAFORM_IMAGE: &str = "hashicorp/terraform";

/// 解決済みの `terraform "<stack>"` 設定
#[derive(Debug, Clone, PartialEq)]
pub struct StackSettings {
    pub version: String,
    pub aws_profile: String,
    pub aws_region: String,
}

impl StackSettings {
    /// スタックで未指定の値はプロジェクト全体の設定を使う
    pub fn resolve(settings: &RunSettings, stack: Option<&TerraformStack>) -> Self {
        let pick = |value: Option<&String>, fallback: &str| {
            value
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| fallback.to_string())
        };
        Self {
            version: pick(stack.and_then(|s| s.version.as_ref()), &settings.terraform_version),
            aws_profile: pick(stack.and_then(|s| s.aws_profile.as_ref()), &settings.aws_profile),
            aws_region: pick(stack.and_then(|s| s.aws_region.as_ref()), &settings.aws_region),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Terraform {
    pub version: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub runtime: Runtime,
    pub infra_dir: PathBuf,
    pub env_dir: PathBuf,
    /// `~/.aws` をコンテナにマウントするためのホームディレクトリ
    pub home_dir: Option<PathBuf>,
}

impl Terraform {
    /// `terraform destroy -auto-approve`
    pub fn destroy(
        settings: &RunSettings,
        stack: &StackSettings,
        credentials: &SessionCredentials,
    ) -> Self {
        Self {
            version: stack.version.clone(),
            args: vec!["destroy".to_string(), "-auto-approve".to_string()],
            env: destroy_env(settings, stack, credentials),
            runtime: settings.prefer_runtime,
            infra_dir: settings.infra_dir(),
            env_dir: settings.env_dir(),
            home_dir: dirs::home_dir(),
        }
    }

    pub fn command(&self) -> CommandSpec {
        let spec = match self.runtime {
            Runtime::Native => CommandSpec::new("terraform")
                .args(&self.args)
                .current_dir(&self.env_dir),
            Runtime::Docker | Runtime::DockerArm64 => self.docker_command(),
        };
        self.env
            .iter()
            .fold(spec, |spec, (key, value)| spec.env(key, value))
    }

    /// 環境変数の値は `-e NAME` で docker クライアントの環境から渡す
    fn docker_command(&self) -> CommandSpec {
        let infra = self.infra_dir.display().to_string();
        let mut spec = CommandSpec::new("docker")
            .args(["run", "--rm", "-i"])
            .arg("-v")
            .arg(format!("{}:{}", infra, infra))
            .arg("-w")
            .arg(self.env_dir.display().to_string());

        if let Some(home) = &self.home_dir {
            spec = spec
                .arg("-v")
                .arg(format!("{}:/root/.aws:ro", home.join(".aws").display()));
        }
        for (key, _) in &self.env {
            spec = spec.arg("-e").arg(key);
        }

        spec.arg(format!("{}:{}", TERRAFORM_IMAGE, self.version))
            .args(&self.args)
            .current_dir(&self.env_dir)
    }
}

fn destroy_env(
    settings: &RunSettings,
    stack: &StackSettings,
    credentials: &SessionCredentials,
) -> Vec<(String, String)> {
    let passthrough = |name: &str| std::env::var(name).unwrap_or_default();
    let mut env = vec![
        ("ENV".to_string(), settings.env.clone()),
        ("AWS_PROFILE".to_string(), stack.aws_profile.clone()),
        ("AWS_REGION".to_string(), stack.aws_region.clone()),
        ("TF_LOG".to_string(), passthrough("TF_LOG")),
        ("TF_LOG_PATH".to_string(), passthrough("TF_LOG_PATH")),
    ];
    env.extend(
        credentials
            .env_vars()
            .into_iter()
            .map(|(key, value)| (key.to_string(), value)),
    );
    env
}

//! プロジェクト定義

use super::service::ServiceNode;
use crate::error::{FlotillaError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_APPS_PATH: &str = "apps";
pub const DEFAULT_NVM_VERSION: &str = "0.39.7";
pub const DEFAULT_TERRAFORM_VERSION: &str = "1.5.7";

/// ツールの実行方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Runtime {
    #[default]
    Native,
    Docker,
    /// arm64 イメージをビルドする Docker ランタイム
    DockerArm64,
}

impl Runtime {
    /// Docker ビルドのターゲットプラットフォーム
    pub fn platform(&self) -> &'static str {
        match self {
            Runtime::DockerArm64 => "linux/arm64",
            _ => "linux/amd64",
        }
    }
}

impl FromStr for Runtime {
    type Err = FlotillaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "native" => Ok(Runtime::Native),
            "docker" => Ok(Runtime::Docker),
            "docker-arm64" => Ok(Runtime::DockerArm64),
            other => Err(FlotillaError::InvalidValue {
                node: "prefer_runtime".to_string(),
                message: format!("'{}' (native, docker, docker-arm64 のいずれか)", other),
            }),
        }
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Runtime::Native => "native",
            Runtime::Docker => "docker",
            Runtime::DockerArm64 => "docker-arm64",
        };
        f.write_str(s)
    }
}

/// Terraform スタック設定
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerraformStack {
    pub version: Option<String>,
    pub aws_profile: Option<String>,
    pub aws_region: Option<String>,
}

/// flotilla.kdl から読み込んだプロジェクト全体
///
/// ファイルに書かれた内容そのもの。実行時に必要な値の補完と検証は
/// [`RunSettings::resolve`](super::RunSettings::resolve) で一度だけ行う。
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub name: String,
    pub env: Option<String>,
    pub namespace: Option<String>,
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
    pub endpoint_url: Option<String>,
    pub docker_registry: Option<String>,
    pub tag: Option<String>,
    pub root_dir: PathBuf,
    pub apps_path: PathBuf,
    pub prefer_runtime: Runtime,
    pub nvm_version: String,
    pub terraform_version: String,
    pub plain_text: bool,
    /// 宣言順のサービス一覧
    pub services: Vec<ServiceNode>,
    pub terraform: BTreeMap<String, TerraformStack>,
}

impl Project {
    pub fn new(name: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            env: None,
            namespace: None,
            aws_region: None,
            aws_profile: None,
            endpoint_url: None,
            docker_registry: None,
            tag: None,
            root_dir: root_dir.into(),
            apps_path: PathBuf::from(DEFAULT_APPS_PATH),
            prefer_runtime: Runtime::default(),
            nvm_version: DEFAULT_NVM_VERSION.to_string(),
            terraform_version: DEFAULT_TERRAFORM_VERSION.to_string(),
            plain_text: false,
            services: Vec::new(),
            terraform: BTreeMap::new(),
        }
    }

    pub fn service(&self, name: &str) -> Option<&ServiceNode> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name.as_str()).collect()
    }

    /// インフラ定義のディレクトリ (`.infra`)
    pub fn infra_dir(&self) -> PathBuf {
        self.root_dir.join(".infra")
    }

    /// 環境ごとの Terraform ディレクトリ (`.infra/env/{env}`)
    pub fn env_dir(&self, env: &str) -> PathBuf {
        self.infra_dir().join("env").join(env)
    }
}

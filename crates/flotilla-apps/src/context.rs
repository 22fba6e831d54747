use crate::backend::{ImageBuild, Orchestrator, Registry};
use crate::process::CommandRunner;
use crate::prompt::Confirm;
use flotilla_core::RunSettings;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// パイプラインが使う外部コラボレータ一式
#[derive(Clone)]
pub struct Collaborators {
    pub builder: Arc<dyn ImageBuild>,
    pub registry: Arc<dyn Registry>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub runner: Arc<dyn CommandRunner>,
    pub prompt: Arc<dyn Confirm>,
}

/// 1回の実行で共有される読み取り専用の状態
///
/// トラバーサル開始前に確定し、以後は変更しない。
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<RunSettings>,
    /// 解決済みのレジストリ (`{account}.dkr.ecr.{region}.amazonaws.com`)
    pub docker_registry: String,
    /// nvm のインストール先
    pub nvm_dir: PathBuf,
    pub collaborators: Collaborators,
    /// リージョンやプロファイルを個別に指定したサービス用のコラボレータ
    pub service_collaborators: HashMap<String, Collaborators>,
}

impl AppContext {
    pub fn new(
        settings: Arc<RunSettings>,
        docker_registry: impl Into<String>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            settings,
            docker_registry: docker_registry.into(),
            nvm_dir: default_nvm_dir(),
            collaborators,
            service_collaborators: HashMap::new(),
        }
    }

    pub fn with_nvm_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.nvm_dir = dir.into();
        self
    }

    pub fn with_service_collaborators(
        mut self,
        service: impl Into<String>,
        collaborators: Collaborators,
    ) -> Self {
        self.service_collaborators.insert(service.into(), collaborators);
        self
    }

    pub fn collaborators_for(&self, service: &str) -> &Collaborators {
        self.service_collaborators
            .get(service)
            .unwrap_or(&self.collaborators)
    }
}

/// `NVM_DIR`、なければ `~/.nvm`
pub fn default_nvm_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("NVM_DIR").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .map(|home| home.join(".nvm"))
        .unwrap_or_else(|| PathBuf::from(".nvm"))
}

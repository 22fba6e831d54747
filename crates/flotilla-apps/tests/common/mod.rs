//! パイプラインとドライバのテスト用の偽コラボレータ

#![allow(dead_code)]

use async_trait::async_trait;
use flotilla_apps::{
    AppContext, AppResult, BackendResult, Collaborators, CommandOutput, CommandRunner, CommandSpec,
    Confirm, ImageBuild, MemoryOutput, Orchestrator, OutputAggregator, Registry, Step,
};
use flotilla_build::{BuildError, BuildSpec};
use flotilla_cloud_aws::AwsError;
use flotilla_core::{RunSettings, Runtime};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const REGISTRY: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com";

/// 全コラボレータへの呼び出しを順番に記録する
#[derive(Default)]
pub struct CallLog(Mutex<Vec<String>>);

impl CallLog {
    pub fn push(&self, call: impl Into<String>) {
        self.0.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, call: &str) -> Option<usize> {
        self.calls().iter().position(|c| c == call)
    }
}

pub struct FakeBuilder {
    log: Arc<CallLog>,
    pub specs: Mutex<Vec<BuildSpec>>,
    pub fail_for: Option<String>,
}

impl FakeBuilder {
    pub fn new(log: Arc<CallLog>) -> Self {
        Self {
            log,
            specs: Mutex::new(Vec::new()),
            fail_for: None,
        }
    }

    /// `service` のビルドだけを失敗させる
    pub fn failing(log: Arc<CallLog>, service: &str) -> Self {
        Self {
            fail_for: Some(service.to_string()),
            ..Self::new(log)
        }
    }
}

#[async_trait]
impl ImageBuild for FakeBuilder {
    async fn build(&self, spec: &BuildSpec, step: &Step) -> BackendResult<()> {
        let service = step.service().to_string();
        self.log.push(format!("build:{}", service));
        self.specs.lock().unwrap().push(spec.clone());
        if self.fail_for.as_deref() == Some(service.as_str()) {
            return Err(BuildError::BuildFailed(format!("{} failed to compile", service)).into());
        }
        step.emit("Successfully built");
        Ok(())
    }
}

pub struct FakeRegistry {
    log: Arc<CallLog>,
    pub repositories: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn ensure_repository(&self, name: &str) -> BackendResult<String> {
        self.repositories.lock().unwrap().push(name.to_string());
        Ok(format!("{}/{}", REGISTRY, name))
    }

    async fn push(&self, image: &str, tags: &[String], step: &Step) -> BackendResult<()> {
        self.log.push(format!("push:{}", step.service()));
        self.pushes
            .lock()
            .unwrap()
            .push((image.to_string(), tags.to_vec()));
        Ok(())
    }
}

pub struct FakeOrchestrator {
    log: Arc<CallLog>,
    /// 存在する ECS サービス名
    pub services: Vec<String>,
    /// `list_task_definitions` が返す ARN（全ファミリー共通）
    pub definitions: Vec<String>,
    pub cluster_exists: bool,
    pub stable: bool,
    pub registered: Mutex<Vec<(String, String, String)>>,
    pub updated: Mutex<Vec<(String, String, String)>>,
    pub waited: Mutex<Vec<(String, Duration)>>,
    pub shortened: Mutex<Vec<String>>,
    pub deregistered: Mutex<Vec<String>>,
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn resolve_service(&self, cluster: &str, candidates: &[String]) -> BackendResult<String> {
        if !self.cluster_exists {
            return Err(AwsError::ClusterNotFound(cluster.to_string()).into());
        }
        candidates
            .iter()
            .find(|c| self.services.contains(c))
            .cloned()
            .ok_or_else(|| {
                AwsError::ServiceNotFound {
                    cluster: cluster.to_string(),
                    candidates: candidates.to_vec(),
                }
                .into()
            })
    }

    async fn latest_task_definition(
        &self,
        family: &str,
        _cluster: &str,
        _service: &str,
    ) -> BackendResult<String> {
        Ok(format!("arn:aws:ecs:us-east-1:123:task-definition/{}:7", family))
    }

    async fn register_with_image(
        &self,
        task_definition: &str,
        container: &str,
        image: &str,
    ) -> BackendResult<String> {
        self.log.push(format!("deploy:{}", container));
        self.registered.lock().unwrap().push((
            task_definition.to_string(),
            container.to_string(),
            image.to_string(),
        ));
        Ok(format!("{}-next", task_definition))
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> BackendResult<()> {
        self.updated.lock().unwrap().push((
            cluster.to_string(),
            service.to_string(),
            task_definition.to_string(),
        ));
        Ok(())
    }

    async fn wait_stable(
        &self,
        _cluster: &str,
        service: &str,
        timeout: Duration,
    ) -> BackendResult<()> {
        self.waited
            .lock()
            .unwrap()
            .push((service.to_string(), timeout));
        if !self.stable {
            return Err(AwsError::Timeout {
                what: format!("service {} to become stable", service),
                seconds: timeout.as_secs(),
            }
            .into());
        }
        Ok(())
    }

    async fn shorten_health_checks(&self, _cluster: &str, service: &str) -> BackendResult<()> {
        self.shortened.lock().unwrap().push(service.to_string());
        Ok(())
    }

    async fn list_task_definitions(&self, family: &str) -> BackendResult<Vec<String>> {
        self.log.push(format!("list:{}", family));
        Ok(self.definitions.clone())
    }

    async fn deregister_task_definition(&self, arn: &str) -> BackendResult<()> {
        self.log.push(format!("deregister:{}", arn));
        self.deregistered.lock().unwrap().push(arn.to_string());
        Ok(())
    }
}

pub struct FakeRunner {
    log: Arc<CallLog>,
    pub commands: Mutex<Vec<CommandSpec>>,
    /// `nvm --version` の出力
    pub nvm_version: String,
}

impl FakeRunner {
    pub fn with_version(log: Arc<CallLog>, nvm_version: &str) -> Self {
        Self {
            log,
            commands: Mutex::new(Vec::new()),
            nvm_version: nvm_version.to_string(),
        }
    }

    pub fn scripts(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap()
            .iter()
            .map(CommandSpec::display)
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec, step: &Step) -> AppResult<CommandOutput> {
        self.log.push(format!("run:{}", step.service()));
        self.commands.lock().unwrap().push(spec.clone());
        let stdout = if spec.display().ends_with("nvm --version") {
            format!("{}\n", self.nvm_version)
        } else {
            String::new()
        };
        Ok(CommandOutput {
            status: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

pub struct ScriptedPrompt {
    pub answer: bool,
    pub asked: Mutex<Vec<(String, Vec<String>)>>,
}

#[async_trait]
impl Confirm for ScriptedPrompt {
    async fn confirm(&self, message: &str, items: &[String]) -> AppResult<bool> {
        self.asked
            .lock()
            .unwrap()
            .push((message.to_string(), items.to_vec()));
        Ok(self.answer)
    }
}

pub fn settings(root: &Path) -> RunSettings {
    RunSettings {
        project_name: "acme".to_string(),
        env: "dev".to_string(),
        namespace: "acme".to_string(),
        aws_region: "us-east-1".to_string(),
        aws_profile: "acme-dev".to_string(),
        endpoint_url: None,
        docker_registry: Some(REGISTRY.to_string()),
        tag: "abc1234".to_string(),
        root_dir: root.to_path_buf(),
        apps_path: PathBuf::from("apps"),
        prefer_runtime: Runtime::Native,
        nvm_version: "0.39.7".to_string(),
        terraform_version: "1.5.7".to_string(),
        log_level: "info".to_string(),
    }
}

/// 偽コラボレータ一式と出力
pub struct Harness {
    pub log: Arc<CallLog>,
    pub builder: Arc<FakeBuilder>,
    pub registry: Arc<FakeRegistry>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub runner: Arc<FakeRunner>,
    pub prompt: Arc<ScriptedPrompt>,
    pub output: Arc<MemoryOutput>,
    pub root: PathBuf,
    pub nvm_dir: PathBuf,
}

impl Harness {
    pub fn new(root: &Path) -> Self {
        let log = Arc::new(CallLog::default());
        Self {
            builder: Arc::new(FakeBuilder::new(log.clone())),
            registry: Arc::new(FakeRegistry {
                log: log.clone(),
                repositories: Mutex::new(Vec::new()),
                pushes: Mutex::new(Vec::new()),
            }),
            orchestrator: Arc::new(FakeOrchestrator {
                log: log.clone(),
                services: vec![
                    "dev-acme-db".to_string(),
                    "dev-acme-web".to_string(),
                    "dev-acme-worker".to_string(),
                    "dev-api".to_string(),
                ],
                definitions: vec![
                    "arn:aws:ecs:us-east-1:123:task-definition/dev-web:2".to_string(),
                    "arn:aws:ecs:us-east-1:123:task-definition/dev-web:1".to_string(),
                ],
                cluster_exists: true,
                stable: true,
                registered: Mutex::new(Vec::new()),
                updated: Mutex::new(Vec::new()),
                waited: Mutex::new(Vec::new()),
                shortened: Mutex::new(Vec::new()),
                deregistered: Mutex::new(Vec::new()),
            }),
            runner: Arc::new(FakeRunner::with_version(log.clone(), "0.39.7")),
            prompt: Arc::new(ScriptedPrompt {
                answer: false,
                asked: Mutex::new(Vec::new()),
            }),
            output: Arc::new(MemoryOutput::new()),
            root: root.to_path_buf(),
            nvm_dir: root.join(".nvm"),
            log,
        }
    }

    pub fn with_orchestrator(mut self, orchestrator: FakeOrchestrator) -> Self {
        self.orchestrator = Arc::new(orchestrator);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            builder: self.builder.clone(),
            registry: self.registry.clone(),
            orchestrator: self.orchestrator.clone(),
            runner: self.runner.clone(),
            prompt: self.prompt.clone(),
        }
    }

    pub fn context(&self) -> AppContext {
        AppContext::new(Arc::new(settings(&self.root)), REGISTRY, self.collaborators())
            .with_nvm_dir(&self.nvm_dir)
    }

    pub fn aggregator(&self) -> OutputAggregator {
        OutputAggregator::new(self.output.clone())
    }

    pub fn step(&self, service: &str) -> Step {
        self.aggregator().step(service, CancellationToken::new())
    }
}

/// 既定値をもとに一部だけ変えた偽オーケストレータ
pub fn orchestrator_from(base: &FakeOrchestrator, log: Arc<CallLog>) -> FakeOrchestrator {
    FakeOrchestrator {
        log,
        services: base.services.clone(),
        definitions: base.definitions.clone(),
        cluster_exists: base.cluster_exists,
        stable: base.stable,
        registered: Mutex::new(Vec::new()),
        updated: Mutex::new(Vec::new()),
        waited: Mutex::new(Vec::new()),
        shortened: Mutex::new(Vec::new()),
        deregistered: Mutex::new(Vec::new()),
    }
}

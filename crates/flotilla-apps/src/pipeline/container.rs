//! ECS サービスのパイプライン
//!
//! Docker イメージをビルドして ECR にプッシュし、タスク定義の新しい
//! リビジョンを登録して ECS サービスを更新する。

use super::{AppPipeline, cancellable};
use crate::context::{AppContext, Collaborators};
use crate::error::{AppError, AppResult, BackendError};
use crate::output::Step;
use async_trait::async_trait;
use flotilla_build::BuildSpec;
use flotilla_cloud_aws::{UNSAFE_HEALTH_CHECK, service_name_candidates};
use flotilla_core::{ContainerConfig, RunSettings};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct ContainerPipeline {
    name: String,
    config: ContainerConfig,
    settings: Arc<RunSettings>,
    /// サービスのソースディレクトリ（絶対パス）
    path: PathBuf,
    cluster: String,
    registry: String,
    collaborators: Collaborators,
}

impl ContainerPipeline {
    /// 未指定の値をプロジェクト設定から補う
    pub fn new(name: &str, config: ContainerConfig, ctx: &AppContext) -> Self {
        let settings = ctx.settings.clone();
        let path = settings.service_dir(name, config.path.as_deref());
        let cluster = config
            .cluster
            .clone()
            .unwrap_or_else(|| settings.default_cluster());
        let registry = config
            .docker_registry
            .clone()
            .unwrap_or_else(|| ctx.docker_registry.clone());

        Self {
            name: name.to_string(),
            collaborators: ctx.collaborators_for(name).clone(),
            config,
            settings,
            path,
            cluster,
            registry,
        }
    }

    /// `{namespace}-{service}`
    pub fn image_name(&self) -> String {
        format!("{}-{}", self.settings.namespace, self.name)
    }

    /// `{registry}/{namespace}-{service}`
    pub fn image_uri(&self) -> String {
        format!("{}/{}", self.registry, self.image_name())
    }

    fn latest_tag(&self) -> String {
        format!("{}-latest", self.settings.env)
    }

    /// タスク定義のファミリー (`{env}-{service}`)
    pub fn family(&self) -> String {
        format!("{}-{}", self.settings.env, self.name)
    }

    /// デプロイするイメージ。指定がなければ `{env}-latest` タグ
    pub fn deploy_image(&self) -> String {
        self.config
            .image
            .clone()
            .unwrap_or_else(|| format!("{}:{}", self.image_uri(), self.latest_tag()))
    }

    pub fn build_spec(&self) -> BuildSpec {
        let image_uri = self.image_uri();
        let cache_image = format!("{}:{}", image_uri, self.latest_tag());
        let relative = self
            .path
            .strip_prefix(&self.settings.root_dir)
            .unwrap_or(&self.path)
            .to_string_lossy()
            .into_owned();

        let build_args = BTreeMap::from([
            ("PROJECT_PATH".to_string(), relative.clone()),
            ("APP_PATH".to_string(), relative),
            ("APP_NAME".to_string(), self.name.clone()),
            ("CACHE_IMAGE".to_string(), cache_image.clone()),
            ("TAG".to_string(), self.settings.tag.clone()),
        ]);

        BuildSpec {
            context_dir: self.settings.root_dir.clone(),
            dockerfile: self.path.join("Dockerfile"),
            tags: vec![
                self.image_name(),
                format!("{}:{}", image_uri, self.settings.tag),
                cache_image.clone(),
            ],
            build_args,
            cache_from: vec![cache_image],
            platform: self.settings.prefer_runtime.platform().to_string(),
        }
    }

    fn push_tags(&self) -> Vec<String> {
        vec![self.settings.tag.clone(), self.latest_tag()]
    }

    fn service_candidates(&self) -> Vec<String> {
        match &self.config.service_name {
            Some(name) => vec![name.clone()],
            None => {
                service_name_candidates(&self.settings.env, &self.settings.namespace, &self.name)
            }
        }
    }

    fn upstream(&self) -> impl Fn(BackendError) -> AppError + Copy + '_ {
        move |e| AppError::upstream(&self.name, e)
    }
}

#[async_trait]
impl AppPipeline for ContainerPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build(&self, step: &Step) -> AppResult<()> {
        if let Some(image) = &self.config.image {
            step.emit(&format!("イメージのビルドをスキップします (使用イメージ: {})", image));
            return Ok(());
        }

        let spec = self.build_spec();
        step.emit(&format!("イメージをビルドしています: {}", spec.tags.join(", ")));
        tracing::debug!(
            service = %self.name,
            dockerfile = %spec.dockerfile.display(),
            "Building image"
        );

        cancellable(step, async {
            self.collaborators
                .builder
                .build(&spec, step)
                .await
                .map_err(self.upstream())
        })
        .await
    }

    async fn push(&self, step: &Step) -> AppResult<()> {
        if let Some(image) = &self.config.image {
            step.emit(&format!("イメージのプッシュをスキップします (使用イメージ: {})", image));
            return Ok(());
        }

        let upstream = self.upstream();
        cancellable(step, async {
            let registry = &self.collaborators.registry;
            let repository = registry
                .ensure_repository(&self.image_name())
                .await
                .map_err(upstream)?;
            tracing::debug!(service = %self.name, repository = %repository, "Using ECR repository");

            registry
                .push(&self.image_uri(), &self.push_tags(), step)
                .await
                .map_err(upstream)
        })
        .await
    }

    async fn deploy(&self, step: &Step) -> AppResult<()> {
        if self.config.skip_deploy {
            step.emit("デプロイはスキップされました (skip_deploy)");
            return Ok(());
        }
        if self.config.unsafe_mode {
            tracing::warn!(
                service = %self.name,
                "Unsafe deployment: health checks will be shortened"
            );
            step.emit(&format!("高速デプロイ (unsafe): {}", UNSAFE_HEALTH_CHECK));
        }

        let image = self.deploy_image();
        let upstream = self.upstream();
        let orchestrator = &self.collaborators.orchestrator;

        cancellable(step, async {
            let service = orchestrator
                .resolve_service(&self.cluster, &self.service_candidates())
                .await
                .map_err(upstream)?;
            step.emit(&format!("ECS {} / {} にデプロイします: {}", self.cluster, service, image));

            let base = match &self.config.task_definition_arn {
                Some(arn) => arn.clone(),
                None => orchestrator
                    .latest_task_definition(&self.family(), &self.cluster, &service)
                    .await
                    .map_err(upstream)?,
            };

            let revision = orchestrator
                .register_with_image(&base, &self.name, &image)
                .await
                .map_err(upstream)?;
            step.emit(&format!("タスク定義を登録しました: {}", revision));

            orchestrator
                .update_service(&self.cluster, &service, &revision)
                .await
                .map_err(upstream)?;

            if self.config.unsafe_mode {
                orchestrator
                    .shorten_health_checks(&self.cluster, &service)
                    .await
                    .map_err(upstream)?;
            }

            step.emit("サービスが安定するのを待っています...");
            orchestrator
                .wait_stable(&self.cluster, &service, Duration::from_secs(self.config.timeout))
                .await
                .map_err(upstream)
        })
        .await
    }

    async fn destroy(&self, step: &Step, auto_approve: bool) -> AppResult<()> {
        let upstream = self.upstream();
        let orchestrator = &self.collaborators.orchestrator;
        let family = self.family();

        let definitions = cancellable(step, async {
            orchestrator
                .list_task_definitions(&family)
                .await
                .map_err(upstream)
        })
        .await?;

        if definitions.is_empty() {
            step.emit(&format!("削除するタスク定義はありません ({})", family));
            return Ok(());
        }

        if !auto_approve {
            let message = format!("{}: 次のタスク定義を削除します", self.name);
            let approved = self
                .collaborators
                .prompt
                .confirm(&message, &definitions)
                .await?;
            if !approved {
                return Err(AppError::UserCancelled(format!("{} の削除を中止しました", self.name)));
            }
        }

        cancellable(step, async {
            for arn in &definitions {
                orchestrator
                    .deregister_task_definition(arn)
                    .await
                    .map_err(upstream)?;
                step.emit(&format!("登録解除: {}", arn));
            }
            Ok(())
        })
        .await
    }

    fn explain(&self) -> AppResult<String> {
        let mut lines = vec![format!("# {} (ecs)", self.name)];

        match &self.config.image {
            Some(image) => {
                lines.push(format!("# ビルドとプッシュはスキップ (使用イメージ: {})", image))
            }
            None => {
                let spec = self.build_spec();
                let mut build = format!(
                    "docker build --platform {} -f {}",
                    spec.platform,
                    spec.dockerfile.display()
                );
                for (key, value) in &spec.build_args {
                    build.push_str(&format!(" --build-arg {}={}", key, value));
                }
                for cache in &spec.cache_from {
                    build.push_str(&format!(" --cache-from {}", cache));
                }
                for tag in &spec.tags {
                    build.push_str(&format!(" -t {}", tag));
                }
                build.push_str(&format!(" {}", spec.context_dir.display()));
                lines.push(build);

                lines.push(format!(
                    "aws ecr describe-repositories --repository-names {name} || aws ecr create-repository --repository-name {name}",
                    name = self.image_name()
                ));
                lines.push(format!(
                    "aws ecr get-login-password --region {} --profile {} | docker login --username AWS --password-stdin {}",
                    self.settings.aws_region, self.settings.aws_profile, self.registry
                ));
                for tag in self.push_tags() {
                    lines.push(format!("docker push {}:{}", self.image_uri(), tag));
                }
            }
        }

        if self.config.skip_deploy {
            lines.push("# デプロイはスキップ (skip_deploy)".to_string());
        } else {
            let service = self
                .service_candidates()
                .into_iter()
                .next()
                .unwrap_or_else(|| self.name.clone());
            let task_definition = self
                .config
                .task_definition_arn
                .clone()
                .unwrap_or_else(|| self.family());
            lines.push(format!(
                "# {} のコンテナ {} のイメージを {} に差し替えて登録",
                task_definition,
                self.name,
                self.deploy_image()
            ));
            lines.push(format!(
                "aws ecs update-service --cluster {} --service {} --task-definition <new revision> --force-new-deployment",
                self.cluster, service
            ));
            lines.push(format!(
                "aws ecs wait services-stable --cluster {} --services {}",
                self.cluster, service
            ));
        }

        Ok(lines.join("\n") + "\n")
    }
}

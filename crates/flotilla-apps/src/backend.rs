//! パイプラインが使う外部コラボレータの境界
//!
//! イメージビルド、レジストリ、ECS をそれぞれトレイトで切り出し、
//! 本番では Docker と AWS SDK の実装を、テストでは記録用の偽物を差し込む。

use crate::context::Collaborators;
use crate::error::BackendResult;
use crate::output::Step;
use crate::process::SystemRunner;
use crate::prompt::Confirm;
use async_trait::async_trait;
use flotilla_build::{BuildSpec, ImageBuilder, ImagePusher, ecr_credentials};
use flotilla_cloud_aws::{
    AwsSession, EcrClient, EcsClient, ElbClient, UNSAFE_HEALTH_CHECK, swap_image, task_family,
};
use std::sync::Arc;
use std::time::Duration;

/// ローカルの Docker デーモンと AWS セッションからコラボレータを組み立てる
pub fn aws_collaborators(
    session: &AwsSession,
    prompt: Arc<dyn Confirm>,
) -> BackendResult<Collaborators> {
    Ok(Collaborators {
        builder: Arc::new(DockerImageBuild::new(ImageBuilder::connect()?)),
        registry: Arc::new(EcrRegistry::new(session.ecr(), ImagePusher::connect()?)),
        orchestrator: Arc::new(EcsOrchestrator::new(session.ecs(), session.elb())),
        runner: Arc::new(SystemRunner),
        prompt,
    })
}

#[async_trait]
pub trait ImageBuild: Send + Sync {
    async fn build(&self, spec: &BuildSpec, step: &Step) -> BackendResult<()>;
}

#[async_trait]
pub trait Registry: Send + Sync {
    /// リポジトリがなければ作成し、URI を返す
    async fn ensure_repository(&self, name: &str) -> BackendResult<String>;

    /// `image` の各タグをプッシュする
    async fn push(&self, image: &str, tags: &[String], step: &Step) -> BackendResult<()>;
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// 候補のうち最初に存在する ECS サービス名
    async fn resolve_service(&self, cluster: &str, candidates: &[String]) -> BackendResult<String>;

    /// ファミリーの最新リビジョン。なければサービスが現在使っているタスク定義
    async fn latest_task_definition(
        &self,
        family: &str,
        cluster: &str,
        service: &str,
    ) -> BackendResult<String>;

    /// `container` のイメージを差し替えた新しいリビジョンを登録し、ARN を返す
    async fn register_with_image(
        &self,
        task_definition: &str,
        container: &str,
        image: &str,
    ) -> BackendResult<String>;

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> BackendResult<()>;

    async fn wait_stable(
        &self,
        cluster: &str,
        service: &str,
        timeout: Duration,
    ) -> BackendResult<()>;

    /// ロードバランサのヘルスチェックを短縮する（unsafe モード）
    async fn shorten_health_checks(&self, cluster: &str, service: &str) -> BackendResult<()>;

    /// ファミリーのタスク定義（新しい順）
    async fn list_task_definitions(&self, family: &str) -> BackendResult<Vec<String>>;

    async fn deregister_task_definition(&self, arn: &str) -> BackendResult<()>;
}

/// Docker デーモンでのビルド
pub struct DockerImageBuild {
    builder: ImageBuilder,
}

impl DockerImageBuild {
    pub fn new(builder: ImageBuilder) -> Self {
        Self { builder }
    }
}

#[async_trait]
impl ImageBuild for DockerImageBuild {
    async fn build(&self, spec: &BuildSpec, step: &Step) -> BackendResult<()> {
        Ok(self.builder.build(spec, step).await?)
    }
}

/// ECR へのプッシュ
pub struct EcrRegistry {
    ecr: EcrClient,
    pusher: ImagePusher,
}

impl EcrRegistry {
    pub fn new(ecr: EcrClient, pusher: ImagePusher) -> Self {
        Self { ecr, pusher }
    }
}

#[async_trait]
impl Registry for EcrRegistry {
    async fn ensure_repository(&self, name: &str) -> BackendResult<String> {
        Ok(self.ecr.ensure_repository(name).await?)
    }

    async fn push(&self, image: &str, tags: &[String], step: &Step) -> BackendResult<()> {
        let auth = self.ecr.authorization().await?;
        let credentials = ecr_credentials(&auth.token, &auth.proxy_endpoint)?;
        for tag in tags {
            self.pusher
                .push(image, tag, Some(credentials.clone()), step)
                .await?;
        }
        Ok(())
    }
}

/// ECS と ELB によるデプロイ
pub struct EcsOrchestrator {
    ecs: EcsClient,
    elb: ElbClient,
}

impl EcsOrchestrator {
    pub fn new(ecs: EcsClient, elb: ElbClient) -> Self {
        Self { ecs, elb }
    }
}

#[async_trait]
impl Orchestrator for EcsOrchestrator {
    async fn resolve_service(&self, cluster: &str, candidates: &[String]) -> BackendResult<String> {
        Ok(self.ecs.resolve_service_name(cluster, candidates).await?)
    }

    async fn latest_task_definition(
        &self,
        family: &str,
        cluster: &str,
        service: &str,
    ) -> BackendResult<String> {
        if let Some(latest) = self.list_task_definitions(family).await?.into_iter().next() {
            return Ok(latest);
        }
        tracing::debug!(
            family = %family,
            "No revisions in family, using the service's task definition"
        );
        Ok(self.ecs.current_task_definition(cluster, service).await?)
    }

    async fn register_with_image(
        &self,
        task_definition: &str,
        container: &str,
        image: &str,
    ) -> BackendResult<String> {
        let base = self.ecs.describe_task_definition(task_definition).await?;
        let containers = swap_image(base.container_definitions(), container, image)?;
        Ok(self.ecs.register_task_definition(&base, containers).await?)
    }

    async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> BackendResult<()> {
        Ok(self.ecs.update_service(cluster, service, task_definition).await?)
    }

    async fn wait_stable(
        &self,
        cluster: &str,
        service: &str,
        timeout: Duration,
    ) -> BackendResult<()> {
        Ok(self.ecs.wait_stable(cluster, service, timeout).await?)
    }

    async fn shorten_health_checks(&self, cluster: &str, service: &str) -> BackendResult<()> {
        for arn in self.ecs.target_group_arns(cluster, service).await? {
            self.elb.set_health_check(&arn, UNSAFE_HEALTH_CHECK).await?;
        }
        Ok(())
    }

    async fn list_task_definitions(&self, family: &str) -> BackendResult<Vec<String>> {
        // FamilyPrefix は前方一致なので `dev-web` に `dev-webhook` が混ざる
        Ok(self
            .ecs
            .list_task_definitions(family)
            .await?
            .into_iter()
            .filter(|arn| task_family(arn) == Some(family))
            .collect())
    }

    async fn deregister_task_definition(&self, arn: &str) -> BackendResult<()> {
        Ok(self.ecs.deregister_task_definition(arn).await?)
    }
}

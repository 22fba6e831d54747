//! ECS operations used by the container pipeline and `exec`

use crate::error::{AwsError, Result};
use aws_sdk_ecs::types::{ContainerDefinition, DesiredStatus, SortOrder, TaskDefinition};
use serde::Serialize;
use std::time::Duration;

/// Interval between DescribeServices polls while waiting for a deployment
pub const STABILITY_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Service names tried, in order, when looking up an app's ECS service
pub fn service_name_candidates(env: &str, namespace: &str, app: &str) -> Vec<String> {
    vec![
        format!("{}-{}-{}", env, namespace, app),
        format!("{}-{}", env, app),
        app.to_string(),
    ]
}

/// Replace the image of the container that belongs to `service`
///
/// The container named like the service wins. A task definition with a
/// single container uses that container regardless of its name.
pub fn swap_image(
    containers: &[ContainerDefinition],
    service: &str,
    image: &str,
) -> Result<Vec<ContainerDefinition>> {
    let index = containers
        .iter()
        .position(|c| c.name() == Some(service))
        .or(if containers.len() == 1 { Some(0) } else { None })
        .ok_or_else(|| {
            AwsError::missing(
                "DescribeTaskDefinition",
                format!("no container named {} in task definition", service),
            )
        })?;

    let mut updated = containers.to_vec();
    updated[index].image = Some(image.to_string());
    Ok(updated)
}

/// Family part of a task definition ARN
///
/// `arn:aws:ecs:us-east-1:123:task-definition/dev-web:12` -> `dev-web`
pub fn task_family(arn: &str) -> Option<&str> {
    let revisioned = arn.rsplit_once('/').map_or(arn, |(_, rest)| rest);
    revisioned.rsplit_once(':').map(|(family, _)| family)
}

/// Session Manager parameters returned by ExecuteCommand
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExecSession {
    pub session_id: String,
    pub stream_url: String,
    pub token_value: String,
}

impl ExecSession {
    /// JSON document expected by `session-manager-plugin`
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone)]
pub struct EcsClient {
    client: aws_sdk_ecs::Client,
}

impl EcsClient {
    pub fn new(client: aws_sdk_ecs::Client) -> Self {
        Self { client }
    }

    /// Return the first candidate that exists as a service in `cluster`
    #[tracing::instrument(skip(self))]
    pub async fn resolve_service_name(
        &self,
        cluster: &str,
        candidates: &[String],
    ) -> Result<String> {
        for candidate in candidates {
            let result = self
                .client
                .list_tasks()
                .cluster(cluster)
                .desired_status(DesiredStatus::Running)
                .service_name(candidate)
                .send()
                .await;

            match result {
                Ok(_) => {
                    tracing::debug!(service = %candidate, "ECS service found");
                    return Ok(candidate.clone());
                }
                Err(err) => {
                    let err = err.into_service_error();
                    if err.is_cluster_not_found_exception() {
                        return Err(AwsError::ClusterNotFound(cluster.to_string()));
                    }
                    if err.is_service_not_found_exception() {
                        tracing::debug!(
                            service = %candidate,
                            "ECS service not found, trying next name"
                        );
                        continue;
                    }
                    return Err(AwsError::api("ListTasks", err));
                }
            }
        }

        Err(AwsError::ServiceNotFound {
            cluster: cluster.to_string(),
            candidates: candidates.to_vec(),
        })
    }

    /// Task definition ARN currently used by a service
    pub async fn current_task_definition(&self, cluster: &str, service: &str) -> Result<String> {
        let described = self.describe_service(cluster, service).await?;
        described
            .task_definition()
            .map(str::to_string)
            .ok_or_else(|| AwsError::missing("DescribeServices", "service has no task definition"))
    }

    pub async fn describe_task_definition(&self, arn: &str) -> Result<TaskDefinition> {
        let output = self
            .client
            .describe_task_definition()
            .task_definition(arn)
            .send()
            .await
            .map_err(|e| AwsError::api("DescribeTaskDefinition", e.into_service_error()))?;
        output
            .task_definition()
            .cloned()
            .ok_or_else(|| AwsError::missing("DescribeTaskDefinition", "task definition is empty"))
    }

    /// Register a new revision of `base` with the given containers
    #[tracing::instrument(skip_all, fields(family = ?base.family()))]
    pub async fn register_task_definition(
        &self,
        base: &TaskDefinition,
        containers: Vec<ContainerDefinition>,
    ) -> Result<String> {
        let output = self
            .client
            .register_task_definition()
            .set_family(base.family.clone())
            .set_task_role_arn(base.task_role_arn.clone())
            .set_execution_role_arn(base.execution_role_arn.clone())
            .set_network_mode(base.network_mode.clone())
            .set_container_definitions(Some(containers))
            .set_volumes(base.volumes.clone())
            .set_placement_constraints(base.placement_constraints.clone())
            .set_requires_compatibilities(base.requires_compatibilities.clone())
            .set_cpu(base.cpu.clone())
            .set_memory(base.memory.clone())
            .set_runtime_platform(base.runtime_platform.clone())
            .set_ephemeral_storage(base.ephemeral_storage.clone())
            .send()
            .await
            .map_err(|e| AwsError::api("RegisterTaskDefinition", e.into_service_error()))?;

        let arn = output
            .task_definition()
            .and_then(|def| def.task_definition_arn())
            .ok_or_else(|| AwsError::missing("RegisterTaskDefinition", "task definition ARN is empty"))?;
        tracing::info!(arn = %arn, "Registered task definition");
        Ok(arn.to_string())
    }

    /// Point a service at a task definition and start a new deployment
    #[tracing::instrument(skip(self))]
    pub async fn update_service(
        &self,
        cluster: &str,
        service: &str,
        task_definition: &str,
    ) -> Result<()> {
        self.client
            .update_service()
            .cluster(cluster)
            .service(service)
            .task_definition(task_definition)
            .force_new_deployment(true)
            .send()
            .await
            .map_err(|e| AwsError::api("UpdateService", e.into_service_error()))?;
        Ok(())
    }

    /// Poll until the service has a single deployment with all tasks running
    pub async fn wait_stable(&self, cluster: &str, service: &str, timeout: Duration) -> Result<()> {
        let poll = async {
            loop {
                let described = self.describe_service(cluster, service).await?;
                let deployments = described.deployments().len();
                let running = described.running_count();
                let desired = described.desired_count();
                tracing::debug!(
                    service = %service,
                    deployments,
                    running,
                    desired,
                    "Waiting for service"
                );

                if deployments == 1 && running == desired {
                    return Ok::<(), AwsError>(());
                }
                tokio::time::sleep(STABILITY_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| AwsError::Timeout {
                what: format!("service {} to become stable", service),
                seconds: timeout.as_secs(),
            })?
    }

    /// Target groups attached to a service's load balancers
    pub async fn target_group_arns(&self, cluster: &str, service: &str) -> Result<Vec<String>> {
        let described = self.describe_service(cluster, service).await?;
        Ok(described
            .load_balancers()
            .iter()
            .filter_map(|lb| lb.target_group_arn())
            .map(str::to_string)
            .collect())
    }

    /// All task definition ARNs in families starting with `prefix`, newest first
    pub async fn list_task_definitions(&self, prefix: &str) -> Result<Vec<String>> {
        let mut arns = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .list_task_definitions()
                .family_prefix(prefix)
                .sort(SortOrder::Desc)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| AwsError::api("ListTaskDefinitions", e.into_service_error()))?;

            arns.extend(output.task_definition_arns().iter().cloned());
            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        Ok(arns)
    }

    pub async fn deregister_task_definition(&self, arn: &str) -> Result<()> {
        self.client
            .deregister_task_definition()
            .task_definition(arn)
            .send()
            .await
            .map_err(|e| AwsError::api("DeregisterTaskDefinition", e.into_service_error()))?;
        Ok(())
    }

    /// ARN of one running task of a service
    pub async fn running_task(&self, cluster: &str, service: &str) -> Result<String> {
        let output = self
            .client
            .list_tasks()
            .cluster(cluster)
            .service_name(service)
            .desired_status(DesiredStatus::Running)
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_cluster_not_found_exception() {
                    AwsError::ClusterNotFound(cluster.to_string())
                } else {
                    AwsError::api("ListTasks", err)
                }
            })?;

        output
            .task_arns()
            .first()
            .cloned()
            .ok_or_else(|| AwsError::TaskNotFound {
                cluster: cluster.to_string(),
                service: service.to_string(),
            })
    }

    /// Open an interactive ECS Exec session
    #[tracing::instrument(skip(self))]
    pub async fn execute_command(
        &self,
        cluster: &str,
        task: &str,
        container: &str,
        command: &str,
    ) -> Result<ExecSession> {
        let output = self
            .client
            .execute_command()
            .cluster(cluster)
            .task(task)
            .container(container)
            .command(command)
            .interactive(true)
            .send()
            .await
            .map_err(|e| AwsError::api("ExecuteCommand", e.into_service_error()))?;

        let session = output
            .session()
            .ok_or_else(|| AwsError::missing("ExecuteCommand", "session is empty"))?;
        let field = |value: Option<&str>, name: &str| {
            value
                .map(str::to_string)
                .ok_or_else(|| AwsError::missing("ExecuteCommand", format!("{} is empty", name)))
        };

        Ok(ExecSession {
            session_id: field(session.session_id(), "session id")?,
            stream_url: field(session.stream_url(), "stream url")?,
            token_value: field(session.token_value(), "token value")?,
        })
    }

    async fn describe_service(
        &self,
        cluster: &str,
        service: &str,
    ) -> Result<aws_sdk_ecs::types::Service> {
        let output = self
            .client
            .describe_services()
            .cluster(cluster)
            .services(service)
            .send()
            .await
            .map_err(|e| {
                let err = e.into_service_error();
                if err.is_cluster_not_found_exception() {
                    AwsError::ClusterNotFound(cluster.to_string())
                } else {
                    AwsError::api("DescribeServices", err)
                }
            })?;

        output
            .services()
            .first()
            .cloned()
            .ok_or_else(|| AwsError::ServiceNotFound {
                cluster: cluster.to_string(),
                candidates: vec![service.to_string()],
            })
    }
}

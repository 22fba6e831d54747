//! ECR operations: repositories, registry address and login tokens

use crate::error::{AwsError, Result};

/// Login data returned by GetAuthorizationToken
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryAuth {
    /// Base64 encoded `AWS:<password>`
    pub token: String,
    /// e.g. `https://123456789012.dkr.ecr.us-east-1.amazonaws.com`
    pub proxy_endpoint: String,
}

#[derive(Debug, Clone)]
pub struct EcrClient {
    client: aws_sdk_ecr::Client,
}

impl EcrClient {
    pub fn new(client: aws_sdk_ecr::Client) -> Self {
        Self { client }
    }

    /// Return the repository URI, creating the repository when it does not exist
    #[tracing::instrument(skip(self))]
    pub async fn ensure_repository(&self, name: &str) -> Result<String> {
        match self
            .client
            .describe_repositories()
            .repository_names(name)
            .send()
            .await
        {
            Ok(output) => output
                .repositories()
                .first()
                .and_then(|repo| repo.repository_uri())
                .map(str::to_string)
                .ok_or_else(|| AwsError::missing("DescribeRepositories", "repository URI is empty")),
            Err(err) => {
                let err = err.into_service_error();
                if !err.is_repository_not_found_exception() {
                    return Err(AwsError::api("DescribeRepositories", err));
                }

                tracing::info!(repository = %name, "Creating ECR repository");
                let created = self
                    .client
                    .create_repository()
                    .repository_name(name)
                    .send()
                    .await
                    .map_err(|e| AwsError::api("CreateRepository", e.into_service_error()))?;
                created
                    .repository()
                    .and_then(|repo| repo.repository_uri())
                    .map(str::to_string)
                    .ok_or_else(|| AwsError::missing("CreateRepository", "repository URI is empty"))
            }
        }
    }

    /// Fetch a registry login token
    pub async fn authorization(&self) -> Result<RegistryAuth> {
        let output = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|e| AwsError::api("GetAuthorizationToken", e.into_service_error()))?;

        let data = output
            .authorization_data()
            .first()
            .ok_or_else(|| AwsError::missing("GetAuthorizationToken", "no authorization data"))?;

        Ok(RegistryAuth {
            token: data
                .authorization_token()
                .ok_or_else(|| AwsError::missing("GetAuthorizationToken", "token is empty"))?
                .to_string(),
            proxy_endpoint: data
                .proxy_endpoint()
                .ok_or_else(|| AwsError::missing("GetAuthorizationToken", "proxy endpoint is empty"))?
                .to_string(),
        })
    }

    /// Private registry host of the current account
    pub async fn registry_address(&self, region: &str) -> Result<String> {
        let output = self
            .client
            .describe_registry()
            .send()
            .await
            .map_err(|e| AwsError::api("DescribeRegistry", e.into_service_error()))?;
        let registry_id = output
            .registry_id()
            .ok_or_else(|| AwsError::missing("DescribeRegistry", "registry id is empty"))?;
        Ok(registry_host(registry_id, region))
    }
}

pub fn registry_host(registry_id: &str, region: &str) -> String {
    format!("{}.dkr.ecr.{}.amazonaws.com", registry_id, region)
}

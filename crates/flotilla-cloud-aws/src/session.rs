//! Shared AWS configuration
//!
//! Loads one `SdkConfig` per run and hands out service clients built from it.

use crate::ecr::EcrClient;
use crate::ecs::EcsClient;
use crate::elb::ElbClient;
use crate::error::{AwsError, Result};
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::ProvideCredentials;

/// Where and as whom to talk to AWS
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOptions {
    pub region: String,
    pub profile: Option<String>,
    /// Custom endpoint, e.g. LocalStack
    pub endpoint_url: Option<String>,
}

/// Resolved static credentials, exported to subprocesses such as terraform
#[derive(Clone, PartialEq)]
pub struct SessionCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl SessionCredentials {
    /// Environment variables understood by the AWS CLI and terraform
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            ("AWS_ACCESS_KEY_ID", self.access_key_id.clone()),
            ("AWS_SECRET_ACCESS_KEY", self.secret_access_key.clone()),
        ];
        if let Some(token) = &self.session_token {
            vars.push(("AWS_SESSION_TOKEN", token.clone()));
        }
        vars
    }
}

#[derive(Debug, Clone)]
pub struct AwsSession {
    config: SdkConfig,
    options: SessionOptions,
}

impl AwsSession {
    #[tracing::instrument(skip_all, fields(region = %options.region, profile = ?options.profile))]
    pub async fn load(options: SessionOptions) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(options.region.clone()));
        if let Some(profile) = &options.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint) = &options.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let config = loader.load().await;
        tracing::debug!("AWS configuration loaded");
        Self { config, options }
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn region(&self) -> &str {
        &self.options.region
    }

    pub fn profile(&self) -> Option<&str> {
        self.options.profile.as_deref()
    }

    /// Resolve credentials through the configured provider chain
    pub async fn credentials(&self) -> Result<SessionCredentials> {
        let provider = self
            .config
            .credentials_provider()
            .ok_or_else(|| AwsError::Credentials("no credentials provider configured".to_string()))?;
        let credentials = provider
            .provide_credentials()
            .await
            .map_err(|e| AwsError::Credentials(e.to_string()))?;

        Ok(SessionCredentials {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().map(str::to_string),
        })
    }

    pub fn ecs(&self) -> EcsClient {
        EcsClient::new(aws_sdk_ecs::Client::new(&self.config))
    }

    pub fn ecr(&self) -> EcrClient {
        EcrClient::new(aws_sdk_ecr::Client::new(&self.config))
    }

    pub fn elb(&self) -> ElbClient {
        ElbClient::new(aws_sdk_elasticloadbalancingv2::Client::new(&self.config))
    }
}

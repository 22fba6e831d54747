//! Target group health check tuning for unsafe deploys

use crate::error::{AwsError, Result};

/// Health check settings applied in unsafe mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthCheck {
    pub interval_secs: i32,
    pub timeout_secs: i32,
    pub healthy_threshold: i32,
    pub unhealthy_threshold: i32,
}

pub const UNSAFE_HEALTH_CHECK: HealthCheck = HealthCheck {
    interval_secs: 5,
    timeout_secs: 2,
    healthy_threshold: 2,
    unhealthy_threshold: 2,
};

impl std::fmt::Display for HealthCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health Check Interval: {}s, Health Check Timeout: {}s, Healthy Threshold: {}, Unhealthy Threshold: {}",
            self.interval_secs, self.timeout_secs, self.healthy_threshold, self.unhealthy_threshold
        )
    }
}

#[derive(Debug, Clone)]
pub struct ElbClient {
    client: aws_sdk_elasticloadbalancingv2::Client,
}

impl ElbClient {
    pub fn new(client: aws_sdk_elasticloadbalancingv2::Client) -> Self {
        Self { client }
    }

    #[tracing::instrument(skip(self))]
    pub async fn set_health_check(&self, target_group_arn: &str, check: HealthCheck) -> Result<()> {
        self.client
            .modify_target_group()
            .target_group_arn(target_group_arn)
            .health_check_interval_seconds(check.interval_secs)
            .health_check_timeout_seconds(check.timeout_secs)
            .healthy_threshold_count(check.healthy_threshold)
            .unhealthy_threshold_count(check.unhealthy_threshold)
            .send()
            .await
            .map_err(|e| AwsError::api("ModifyTargetGroup", e.into_service_error()))?;
        Ok(())
    }
}

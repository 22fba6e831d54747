//! AWS clients for Flotilla
//!
//! Thin wrappers over the AWS SDK for the operations the pipelines need:
//! ECS service rollout and teardown, ECS Exec sessions, ECR login and
//! repository management, and target group health check tuning.

pub mod ecr;
pub mod ecs;
pub mod elb;
pub mod error;
pub mod session;

pub use ecr::{EcrClient, RegistryAuth, registry_host};
pub use ecs::{EcsClient, ExecSession, service_name_candidates, swap_image, task_family};
pub use elb::{ElbClient, HealthCheck, UNSAFE_HEALTH_CHECK};
pub use error::{AwsError, Result};
pub use session::{AwsSession, SessionCredentials, SessionOptions};

//! Flotilla Docker Image Build functionality
//!
//! This crate provides Docker image build capabilities for Flotilla,
//! including build context creation, image building with build args and
//! cache sources, and image pushing to ECR.

pub mod auth;
pub mod builder;
pub mod context;
pub mod error;
pub mod pusher;

pub use auth::{ecr_credentials, extract_registry};
pub use builder::{BuildSpec, ImageBuilder};
pub use context::{BuildContext, ContextBuilder};
pub use error::{BuildError, BuildResult};
pub use pusher::{ImagePusher, split_image_tag, validate_tag};

/// ビルドやプッシュの進捗を1行ずつ受け取る出力先
pub trait LogSink: Send + Sync {
    fn line(&self, text: &str);
}

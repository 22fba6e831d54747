//! サービス種別ごとのライフサイクル実装
//!
//! 3種類のバックエンド（ECS / Serverless / エイリアス）を共通の
//! `Build → Push → Deploy`、`Destroy`、`Explain` で扱う。

mod alias;
mod container;
mod function;

pub use alias::AliasPipeline;
pub use container::ContainerPipeline;
pub use function::FunctionPipeline;

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::output::Step;
use async_trait::async_trait;
use flotilla_core::{ServiceKind, ServiceNode};
use std::future::Future;

#[async_trait]
pub trait AppPipeline: Send + Sync {
    fn name(&self) -> &str;

    async fn build(&self, step: &Step) -> AppResult<()>;

    async fn push(&self, step: &Step) -> AppResult<()>;

    async fn deploy(&self, step: &Step) -> AppResult<()>;

    /// `auto_approve` が false なら削除前に確認する
    async fn destroy(&self, step: &Step, auto_approve: bool) -> AppResult<()>;

    /// 実行内容をシェルコマンドとして説明する。副作用はない
    fn explain(&self) -> AppResult<String>;
}

/// ノードの種別に応じたパイプラインを作成
pub fn pipeline_for(node: &ServiceNode, ctx: &AppContext) -> Box<dyn AppPipeline> {
    match &node.kind {
        ServiceKind::Container(config) => {
            Box::new(ContainerPipeline::new(&node.name, config.clone(), ctx))
        }
        ServiceKind::Function(config) => {
            Box::new(FunctionPipeline::new(&node.name, config.clone(), ctx))
        }
        ServiceKind::Alias => Box::new(AliasPipeline::new(&node.name)),
    }
}

/// ステップのキャンセルと競争させる
///
/// キャンセルされた場合、実行中の future は破棄される。
pub(crate) async fn cancellable<T>(
    step: &Step,
    future: impl Future<Output = AppResult<T>>,
) -> AppResult<T> {
    tokio::select! {
        result = future => result,
        _ = step.cancel_token().cancelled() => Err(AppError::Cancelled),
    }
}

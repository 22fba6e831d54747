//! 依存順にパイプラインを実行するドライバ
//!
//! Up は `build → push → deploy`、Down は `destroy` をノードごとに実行する。
//! 順序と並行性はスケジューラが決め、ドライバは1ノード分の手順だけを持つ。

use crate::context::AppContext;
use crate::error::{AppError, AppResult};
use crate::output::{OutputAggregator, Step};
use crate::pipeline::pipeline_for;
use flotilla_core::{DependencyGraph, Direction, RunReport, Scheduler, ServiceNode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct Driver {
    ctx: Arc<AppContext>,
    output: OutputAggregator,
    scheduler: Scheduler,
}

impl Driver {
    pub fn new(ctx: Arc<AppContext>, output: OutputAggregator) -> Self {
        Self {
            ctx,
            output,
            scheduler: Scheduler::new(),
        }
    }

    /// 外部からキャンセルできるスケジューラを使う
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.scheduler.cancellation_token()
    }

    /// 全サービスを依存順に立ち上げる
    pub async fn up(&self, graph: &DependencyGraph<ServiceNode>) -> RunReport<AppError> {
        self.traverse(graph, Direction::Up, false).await
    }

    /// 全サービスを逆順に削除する
    pub async fn down(
        &self,
        graph: &DependencyGraph<ServiceNode>,
        auto_approve: bool,
    ) -> RunReport<AppError> {
        self.traverse(graph, Direction::Down, auto_approve).await
    }

    async fn traverse(
        &self,
        graph: &DependencyGraph<ServiceNode>,
        direction: Direction,
        auto_approve: bool,
    ) -> RunReport<AppError> {
        self.scheduler
            .run(graph, direction, |name, cancel| {
                let node = graph.node(&name).cloned();
                let ctx = self.ctx.clone();
                let step = self.output.step(&name, cancel);
                async move {
                    let node = node.ok_or_else(|| AppError::NotFound(name.clone()))?;
                    match direction {
                        Direction::Up => run_up(&node, &ctx, &step).await,
                        Direction::Down => run_down(&node, &ctx, &step, auto_approve).await,
                    }
                }
            })
            .await
    }

    /// 1サービスだけを立ち上げる（依存関係は見ない）
    pub async fn up_one(&self, node: &ServiceNode) -> AppResult<()> {
        let step = self.step_for(node);
        run_up(node, &self.ctx, &step).await
    }

    /// 1サービスだけを削除する
    pub async fn down_one(&self, node: &ServiceNode, auto_approve: bool) -> AppResult<()> {
        let step = self.step_for(node);
        run_down(node, &self.ctx, &step, auto_approve).await
    }

    fn step_for(&self, node: &ServiceNode) -> Step {
        let cancel = self.scheduler.cancellation_token().child_token();
        self.output.step(&node.name, cancel)
    }

    /// 依存順に各サービスの実行内容を返す
    ///
    /// 説明を作れないサービスがあれば、そのサービス名を付けたエラーを返す。
    pub fn explain(&self, graph: &DependencyGraph<ServiceNode>) -> AppResult<Vec<String>> {
        graph
            .ready_sets(Direction::Up)
            .flatten()
            .filter_map(|name| graph.node(&name))
            .map(|node| {
                pipeline_for(node, &self.ctx).explain().map_err(|e| {
                    tracing::warn!(service = %node.name, error = %e, "Cannot explain service");
                    AppError::Validation(format!("{}: {}", node.name, e))
                })
            })
            .collect()
    }
}

async fn run_up(node: &ServiceNode, ctx: &AppContext, step: &Step) -> AppResult<()> {
    let pipeline = pipeline_for(node, ctx);
    step.begin(&format!("起動しています ({})", node.kind.label()));

    let result = async {
        pipeline.build(step).await?;
        pipeline.push(step).await?;
        pipeline.deploy(step).await
    }
    .await;

    finish(step, &result, "デプロイ完了");
    result
}

async fn run_down(
    node: &ServiceNode,
    ctx: &AppContext,
    step: &Step,
    auto_approve: bool,
) -> AppResult<()> {
    let pipeline = pipeline_for(node, ctx);
    step.begin(&format!("削除しています ({})", node.kind.label()));

    let result = pipeline.destroy(step, auto_approve).await;
    finish(step, &result, "削除完了");
    result
}

fn finish(step: &Step, result: &AppResult<()>, success: &str) {
    match result {
        Ok(()) => step.done(success),
        Err(e) if e.is_user_cancelled() => step.fail(&e.to_string()),
        Err(e) => {
            tracing::error!(service = %step.service(), error = %e, "Pipeline failed");
            step.fail(&e.to_string());
        }
    }
}

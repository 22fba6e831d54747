//! グラフスケジューラ
//!
//! 依存グラフを指定方向にたどり、準備ができたノードごとに呼び出し側の
//! タスクを並行実行します。失敗したノードから到達できるノードはスキップし、
//! 無関係な枝はそのまま続行します。

use crate::graph::{DependencyGraph, Direction, GraphNode};
use futures_util::FutureExt;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// ノードごとの実行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeState::Succeeded | NodeState::Failed | NodeState::Skipped
        )
    }
}

/// ノードの失敗理由
#[derive(Debug)]
pub enum TaskFailure<E> {
    /// タスクがエラーを返した
    Task(E),
    /// キャンセル後にタスクがエラーで終了した
    Cancelled(E),
    /// タスクがパニックした
    Panicked(String),
}

impl<E> TaskFailure<E> {
    /// タスクが返したエラー
    pub fn error(&self) -> Option<&E> {
        match self {
            TaskFailure::Task(e) | TaskFailure::Cancelled(e) => Some(e),
            TaskFailure::Panicked(_) => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskFailure::Cancelled(_))
    }
}

impl<E: fmt::Display> fmt::Display for TaskFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Task(e) => write!(f, "{}", e),
            TaskFailure::Cancelled(e) => write!(f, "中断されました: {}", e),
            TaskFailure::Panicked(msg) => write!(f, "タスクがパニックしました: {}", msg),
        }
    }
}

/// 1回の実行結果
#[derive(Debug)]
pub struct RunReport<E> {
    pub direction: Direction,
    states: BTreeMap<String, NodeState>,
    failures: Vec<(String, TaskFailure<E>)>,
    cancelled: bool,
}

impl<E> RunReport<E> {
    pub fn state(&self, name: &str) -> Option<NodeState> {
        self.states.get(name).copied()
    }

    pub fn states(&self) -> &BTreeMap<String, NodeState> {
        &self.states
    }

    /// 完了順の失敗一覧
    pub fn failures(&self) -> &[(String, TaskFailure<E>)] {
        &self.failures
    }

    pub fn names_in(&self, state: NodeState) -> Vec<&str> {
        self.states
            .iter()
            .filter(|(_, s)| **s == state)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    /// 失敗をまとめたエラーに変換する
    ///
    /// キャンセルされた実行は、失敗がなくてもエラーになる。
    pub fn into_result(self) -> Result<(), AggregatedError<E>> {
        if self.failures.is_empty() && !self.cancelled {
            return Ok(());
        }
        Err(AggregatedError {
            failures: self.failures,
            cancelled: self.cancelled,
        })
    }
}

/// 複数ノードの失敗をまとめたエラー
#[derive(Debug)]
pub struct AggregatedError<E> {
    pub failures: Vec<(String, TaskFailure<E>)>,
    /// 実行がキャンセルされた
    pub cancelled: bool,
}

impl<E> AggregatedError<E> {
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl<E: fmt::Display> fmt::Display for AggregatedError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cancelled && self.failures.is_empty() {
            return write!(f, "実行がキャンセルされました");
        }
        write!(f, "{} 個のサービスが失敗しました", self.failures.len())?;
        if self.cancelled {
            write!(f, " (キャンセル済み)")?;
        }
        for (name, failure) in &self.failures {
            write!(f, "\n  - {}: {}", name, failure)?;
        }
        Ok(())
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for AggregatedError<E> {}

/// 依存順の並行実行を行うスケジューラ
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 外部のキャンセルトークンに従うスケジューラを作成
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// グラフを指定方向にたどってタスクを実行する
    ///
    /// タスクにはノード名と子キャンセルトークンが渡される。同時実行数の上限は
    /// 設けず、グラフの形だけが並行度を決める。全ノードが終了状態になると戻る。
    pub async fn run<N, F, Fut, E>(
        &self,
        graph: &DependencyGraph<N>,
        direction: Direction,
        task: F,
    ) -> RunReport<E>
    where
        N: GraphNode,
        F: Fn(String, CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Send + 'static,
    {
        let mut states: BTreeMap<String, NodeState> = graph
            .names()
            .map(|name| (name.to_string(), NodeState::Pending))
            .collect();
        let mut remaining: HashMap<String, usize> = graph
            .names()
            .map(|name| (name.to_string(), graph.predecessors(name, direction).len()))
            .collect();
        let mut failures = Vec::new();
        let mut set = JoinSet::new();

        let launch = |name: &str,
                      states: &mut BTreeMap<String, NodeState>,
                      set: &mut JoinSet<(String, std::thread::Result<Result<(), E>>)>| {
            if self.cancel.is_cancelled() {
                debug!(service = %name, "Run cancelled, not launching");
                states.insert(name.to_string(), NodeState::Skipped);
                return;
            }
            info!(service = %name, ?direction, "Starting task");
            states.insert(name.to_string(), NodeState::Running);
            let future = task(name.to_string(), self.cancel.child_token());
            let name = name.to_string();
            set.spawn(async move {
                let outcome = AssertUnwindSafe(future).catch_unwind().await;
                (name, outcome)
            });
        };

        let mut initial: Vec<&str> = graph
            .names()
            .filter(|name| remaining.get(*name) == Some(&0))
            .collect();
        initial.sort_unstable();
        for name in initial {
            launch(name, &mut states, &mut set);
        }

        while let Some(joined) = set.join_next().await {
            let (name, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "Task could not be joined");
                    continue;
                }
            };

            match outcome {
                Ok(Ok(())) => {
                    info!(service = %name, "Task succeeded");
                    states.insert(name.clone(), NodeState::Succeeded);
                    for successor in graph.successors(&name, direction) {
                        let Some(count) = remaining.get_mut(successor) else {
                            continue;
                        };
                        *count -= 1;
                        if *count == 0 && states.get(successor) == Some(&NodeState::Pending) {
                            launch(successor, &mut states, &mut set);
                        }
                    }
                }
                Ok(Err(e)) => {
                    let failure = if self.cancel.is_cancelled() {
                        TaskFailure::Cancelled(e)
                    } else {
                        TaskFailure::Task(e)
                    };
                    warn!(service = %name, cancelled = failure.is_cancelled(), "Task failed");
                    states.insert(name.clone(), NodeState::Failed);
                    skip_reachable(graph, &name, direction, &mut states);
                    failures.push((name, failure));
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(service = %name, panic = %message, "Task panicked");
                    states.insert(name.clone(), NodeState::Failed);
                    skip_reachable(graph, &name, direction, &mut states);
                    failures.push((name, TaskFailure::Panicked(message)));
                }
            }
        }

        for (name, state) in states.iter_mut() {
            match state {
                NodeState::Pending => *state = NodeState::Skipped,
                NodeState::Running => {
                    *state = NodeState::Failed;
                    failures.push((
                        name.clone(),
                        TaskFailure::Panicked("タスクが中断されました".to_string()),
                    ));
                }
                _ => {}
            }
        }

        RunReport {
            direction,
            states,
            failures,
            cancelled: self.cancel.is_cancelled(),
        }
    }
}

fn skip_reachable<N: GraphNode>(
    graph: &DependencyGraph<N>,
    failed: &str,
    direction: Direction,
    states: &mut BTreeMap<String, NodeState>,
) {
    for name in graph.reachable_from(failed, direction) {
        if let Some(state) = states.get_mut(&name)
            && *state == NodeState::Pending
        {
            debug!(service = %name, failed = %failed, "Skipping because an upstream task failed");
            *state = NodeState::Skipped;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

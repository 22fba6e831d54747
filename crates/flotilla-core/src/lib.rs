//! Flotilla core
//!
//! プロジェクト定義の読み込み、依存グラフ、依存順の並行スケジューラを提供します。

pub mod discovery;
pub mod error;
pub mod graph;
pub mod loader;
pub mod model;
pub mod parser;
pub mod scheduler;

pub use discovery::{find_project_root, find_project_root_from};
pub use error::{FlotillaError, GraphError, Result};
pub use graph::{DependencyGraph, Direction, GraphNode, ReadySets};
pub use loader::{build_graph, load_project, load_project_from_root};
pub use model::*;
pub use scheduler::{AggregatedError, NodeState, RunReport, Scheduler, TaskFailure};
pub use tokio_util::sync::CancellationToken;

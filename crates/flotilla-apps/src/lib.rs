//! Flotilla のサービスパイプライン
//!
//! サービス種別ごとのライフサイクル（ビルド、プッシュ、デプロイ、削除、説明）と、
//! それを依存順に並行実行するドライバを提供します。

pub mod backend;
pub mod context;
pub mod driver;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod prompt;

pub use backend::{ImageBuild, Orchestrator, Registry, aws_collaborators};
pub use context::{AppContext, Collaborators, default_nvm_dir};
pub use driver::Driver;
pub use error::{AppError, AppResult, BackendError, BackendResult};
pub use output::{MemoryOutput, OutputAggregator, OutputSink, Step, TerminalOutput};
pub use pipeline::{AliasPipeline, AppPipeline, ContainerPipeline, FunctionPipeline, pipeline_for};
pub use process::{CommandOutput, CommandRunner, CommandSpec, SystemRunner};
pub use prompt::{Confirm, FixedAnswer, SerializedConfirm, TerminalPrompt};

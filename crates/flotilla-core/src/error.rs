use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlotillaError {
    #[error("KDLパースエラー: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("ファイル読み込みエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("無効な設定: {0}")]
    InvalidConfig(String),

    #[error("'{node}' の値が不正です: {message}")]
    InvalidValue { node: String, message: String },

    #[error(
        "プロジェクトルートが見つかりません\n探索開始位置: {0}\nヒント: flotilla.kdl ファイルを含むディレクトリで実行してください"
    )]
    ProjectRootNotFound(PathBuf),

    #[error("サービスが見つかりません: {0}")]
    ServiceNotFound(String),

    #[error("{0} が指定されていません")]
    MissingSetting(&'static str),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// 依存グラフの構造エラー
///
/// スケジューリング開始前に検出され、どのタスクも実行されない。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("サービス '{0}' が重複して定義されています")]
    DuplicateService(String),

    #[error("サービス '{service}' が未定義のサービス '{missing}' に依存しています")]
    UnknownDependency { service: String, missing: String },

    #[error("循環依存が検出されました: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

pub type Result<T> = std::result::Result<T, FlotillaError>;

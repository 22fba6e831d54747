use flotilla_build::BuildError;
use flotilla_cloud_aws::AwsError;
use flotilla_core::FlotillaError;
use thiserror::Error;

/// 外部コラボレータ（Docker / AWS）が返すエラー
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{}", .0.user_message())]
    Build(#[from] BuildError),

    #[error(transparent)]
    Aws(#[from] AwsError),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// サービス単位のパイプラインエラー
///
/// グラフ構造のエラー以外は全て1ノードに閉じ、スケジューラが集約して報告する。
#[derive(Error, Debug)]
pub enum AppError {
    #[error("設定エラー: {0}")]
    Validation(String),

    #[error("見つかりません: {0}")]
    NotFound(String),

    #[error("コマンドが失敗しました ({}): {command}{}", describe_status(.status), describe_output(.stdout, .stderr))]
    Subprocess {
        command: String,
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("タイムアウトしました: {what} ({seconds}秒)")]
    Timeout { what: String, seconds: u64 },

    #[error("中止しました: {0}")]
    UserCancelled(String),

    #[error("実行がキャンセルされました")]
    Cancelled,

    #[error("{service}: {source}")]
    Upstream {
        service: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Config(#[from] FlotillaError),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// コラボレータのエラーをサービス名付きで分類する
    ///
    /// クラスタやサービスが存在しない場合は `NotFound`、待機の期限切れは `Timeout`。
    pub fn upstream(service: &str, source: impl Into<BackendError>) -> Self {
        match source.into() {
            BackendError::Aws(err) if err.is_not_found() => {
                AppError::NotFound(format!("{}: {}", service, err))
            }
            BackendError::Aws(AwsError::Timeout { what, seconds }) => {
                AppError::Timeout { what, seconds }
            }
            source => AppError::Upstream {
                service: service.to_string(),
                source,
            },
        }
    }

    /// 利用者が意図的に中止したか
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, AppError::UserCancelled(_))
    }
}

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("終了コード {}", code),
        None => "シグナルで終了".to_string(),
    }
}

fn describe_output(stdout: &str, stderr: &str) -> String {
    let mut out = String::new();
    for text in [stderr.trim(), stdout.trim()] {
        if !text.is_empty() {
            out.push('\n');
            out.push_str(text);
        }
    }
    out
}

pub type AppResult<T> = std::result::Result<T, AppError>;

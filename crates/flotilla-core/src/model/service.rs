//! サービス定義

use std::path::PathBuf;

/// デフォルトのデプロイ待機タイムアウト（秒）
pub const DEFAULT_DEPLOY_TIMEOUT_SECS: u64 = 300;

/// デフォルトの Serverless 設定ファイル
pub const DEFAULT_SERVERLESS_FILE: &str = "serverless.yml";

/// デフォルトの Node.js バージョン
pub const DEFAULT_NODE_VERSION: &str = "20";

/// 依存グラフに参加する1サービス
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceNode {
    pub name: String,
    pub depends_on: Vec<String>,
    pub kind: ServiceKind,
}

impl ServiceNode {
    pub fn new(name: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            kind,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }
}

/// サービスの種類
///
/// 種類ごとの設定を保持する閉じた列挙型。パイプラインの選択はこの値への
/// `match` で一度だけ行う。
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceKind {
    /// ECS 上のコンテナサービス
    Container(ContainerConfig),
    /// Serverless Framework でデプロイする関数群
    Function(FunctionConfig),
    /// 依存関係をまとめるだけのプレースホルダ
    Alias,
}

impl ServiceKind {
    /// 設定ファイル上のノード名
    pub fn label(&self) -> &'static str {
        match self {
            ServiceKind::Container(_) => "ecs",
            ServiceKind::Function(_) => "serverless",
            ServiceKind::Alias => "alias",
        }
    }
}

/// ECS サービスの設定
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    /// プロジェクトルートからの相対パス（未指定なら `{apps_path}/{name}`）
    pub path: Option<PathBuf>,
    /// 明示的なイメージ。指定時はビルドとプッシュを行わない
    pub image: Option<String>,
    /// ECS クラスタ名（未指定なら `{env}-{namespace}`）
    pub cluster: Option<String>,
    pub docker_registry: Option<String>,
    /// デプロイ安定化待ちのタイムアウト（秒）
    pub timeout: u64,
    pub skip_deploy: bool,
    /// ヘルスチェックを短縮して高速にデプロイする
    pub unsafe_mode: bool,
    pub task_definition_arn: Option<String>,
    /// ECS サービス名（未指定なら候補から解決）
    pub service_name: Option<String>,
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            path: None,
            image: None,
            cluster: None,
            docker_registry: None,
            timeout: DEFAULT_DEPLOY_TIMEOUT_SECS,
            skip_deploy: false,
            unsafe_mode: false,
            task_definition_arn: None,
            service_name: None,
            aws_region: None,
            aws_profile: None,
        }
    }
}

/// Serverless Framework のメジャーバージョン
///
/// v3 でフラグの書式が変わったため、コマンド生成時に切り替える。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameworkVersion {
    #[default]
    Legacy,
    V3,
}

impl FrameworkVersion {
    /// "3" や "3.38.0" のような表記からメジャーバージョンを判定
    pub fn parse(value: &str) -> Option<Self> {
        let major = value.trim().split('.').next()?.parse::<u32>().ok()?;
        Some(if major >= 3 {
            FrameworkVersion::V3
        } else {
            FrameworkVersion::Legacy
        })
    }
}

/// Serverless サービスの設定
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionConfig {
    pub path: Option<PathBuf>,
    pub node_version: String,
    pub framework: FrameworkVersion,
    /// Serverless 設定ファイル名
    pub file: String,
    pub use_yarn: bool,
    pub force: bool,
    pub create_custom_domain: bool,
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
}

impl Default for FunctionConfig {
    fn default() -> Self {
        Self {
            path: None,
            node_version: DEFAULT_NODE_VERSION.to_string(),
            framework: FrameworkVersion::default(),
            file: DEFAULT_SERVERLESS_FILE.to_string(),
            use_yarn: false,
            force: false,
            create_custom_domain: false,
            aws_region: None,
            aws_profile: None,
        }
    }
}

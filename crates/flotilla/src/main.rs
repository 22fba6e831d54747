mod commands;
mod ssm;
mod terraform;
mod utils;

use clap::{Args, Parser, Subcommand};
use flotilla_core::{Overrides, Runtime};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flotilla")]
#[command(about = "依存関係の順にクラウドアプリを立ち上げ、片付ける", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// 全コマンド共通のオプション（flotilla.kdl の値を上書きする）
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// ログレベル (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "FLOTILLA_LOG_LEVEL")]
    pub log_level: Option<String>,
    /// 環境名 (dev, stg, prod など)
    #[arg(long, global = true, env = "FLOTILLA_ENV")]
    pub env: Option<String>,
    /// 名前空間
    #[arg(long, global = true, env = "FLOTILLA_NAMESPACE")]
    pub namespace: Option<String>,
    /// AWS リージョン
    #[arg(long, global = true, env = "AWS_REGION")]
    pub aws_region: Option<String>,
    /// AWS プロファイル
    #[arg(long, global = true, env = "AWS_PROFILE")]
    pub aws_profile: Option<String>,
    /// イメージタグ（未指定なら git の短縮ハッシュ）
    #[arg(long, global = true, env = "FLOTILLA_TAG")]
    pub tag: Option<String>,
    /// Docker レジストリ（未指定なら ECR から解決）
    #[arg(long, global = true, env = "DOCKER_REGISTRY")]
    pub docker_registry: Option<String>,
    /// ツールの実行方法 (native, docker, docker-arm64)
    #[arg(long, global = true, value_parser = parse_runtime)]
    pub prefer_runtime: Option<Runtime>,
    /// スピナーを使わずに出力する
    #[arg(long, global = true)]
    pub plain_text: bool,
}

impl GlobalArgs {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            env: self.env.clone(),
            namespace: self.namespace.clone(),
            aws_region: self.aws_region.clone(),
            aws_profile: self.aws_profile.clone(),
            tag: self.tag.clone(),
            docker_registry: self.docker_registry.clone(),
            prefer_runtime: self.prefer_runtime,
            log_level: self.log_level.clone(),
        }
    }
}

fn parse_runtime(value: &str) -> Result<Runtime, String> {
    value.parse::<Runtime>().map_err(|e| e.to_string())
}

#[derive(Subcommand)]
enum Commands {
    /// アプリを立ち上げる
    #[command(subcommand)]
    Up(UpCommands),
    /// 1つのサービスをビルドしてデプロイ
    Deploy {
        /// サービス名
        service: String,
        /// デプロイするイメージ（指定時はビルドとプッシュを行わない）
        #[arg(long)]
        image: Option<String>,
        /// ECS クラスタ名
        #[arg(long)]
        ecs_cluster: Option<String>,
        /// 元にするタスク定義の ARN
        #[arg(long)]
        task_definition_arn: Option<String>,
    },
    /// アプリとインフラを削除
    ///
    /// アプリ名を省略すると全アプリを逆順に削除し、続けてインフラを削除する。
    /// `down infra` はインフラだけを削除する。
    Down {
        /// アプリ名、または infra
        app: Option<String>,
        /// 確認せずに削除する（全体の削除には必須）
        #[arg(long)]
        auto_approve: bool,
    },
    /// ECS タスクのコンテナ内でコマンドを実行
    Exec {
        /// サービス名
        service: String,
        /// ECS クラスタ名
        #[arg(long)]
        ecs_cluster: Option<String>,
        /// 実行するコマンド（-- 以降）。省略時は /bin/sh
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// SSH トンネルの管理
    #[command(subcommand)]
    Tunnel(TunnelCommands),
    /// 環境変数から AWS プロファイルを ~/.aws/credentials に追加
    AwsProfile,
    /// バージョン情報を表示
    Version,
}

#[derive(Subcommand)]
enum UpCommands {
    /// 全アプリを依存順にデプロイ
    Apps {
        /// 実行せずに各アプリの実行内容を表示
        #[arg(long)]
        explain: bool,
    },
}

#[derive(Subcommand)]
enum TunnelCommands {
    /// トンネルを閉じる
    Down,
}

fn init_tracing(log_level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.unwrap_or("warn")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.global.log_level.as_deref());

    let global = cli.global;
    match cli.command {
        Commands::Version => {
            println!("flotilla {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::AwsProfile => {
            commands::aws_profile::handle(&global)?;
        }
        Commands::Up(UpCommands::Apps { explain }) => {
            commands::up::handle_apps(&global, explain).await?;
        }
        Commands::Deploy {
            service,
            image,
            ecs_cluster,
            task_definition_arn,
        } => {
            let overrides = commands::deploy::DeployOverrides {
                image,
                ecs_cluster,
                task_definition_arn,
            };
            commands::deploy::handle(&global, &service, overrides).await?;
        }
        Commands::Down { app, auto_approve } => {
            commands::down::handle(&global, app.as_deref(), auto_approve).await?;
        }
        Commands::Exec {
            service,
            ecs_cluster,
            command,
        } => {
            commands::exec::handle(&global, &service, ecs_cluster, command).await?;
        }
        Commands::Tunnel(TunnelCommands::Down) => {
            commands::tunnel::handle_down(&global).await?;
        }
    }

    Ok(())
}

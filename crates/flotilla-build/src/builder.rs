use crate::context::ContextBuilder;
use crate::error::{BuildError, BuildResult};
use crate::LogSink;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// 1回のイメージビルドの指定
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BuildSpec {
    /// ビルドコンテキストのディレクトリ
    pub context_dir: PathBuf,
    pub dockerfile: PathBuf,
    /// 付与するタグ。先頭のタグでビルドし、残りは後から付ける
    pub tags: Vec<String>,
    pub build_args: BTreeMap<String, String>,
    pub cache_from: Vec<String>,
    /// 例: linux/amd64
    pub platform: String,
}

pub struct ImageBuilder {
    docker: Docker,
}

impl ImageBuilder {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// ローカルの Docker デーモンに接続して作成
    pub fn connect() -> BuildResult<Self> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    /// イメージをビルドし、全てのタグを付ける
    pub async fn build(&self, spec: &BuildSpec, sink: &dyn LogSink) -> BuildResult<()> {
        let Some((primary, extra_tags)) = spec.tags.split_first() else {
            return Err(BuildError::InvalidConfig(
                "at least one tag is required".to_string(),
            ));
        };

        let context = ContextBuilder::create_context(&spec.context_dir, &spec.dockerfile)?;
        tracing::info!(image = %primary, platform = %spec.platform, "Building image");

        let build_args: HashMap<&str, &str> = spec
            .build_args
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let cache_from: Vec<&str> = spec.cache_from.iter().map(String::as_str).collect();

        #[allow(deprecated)]
        let options = bollard::image::BuildImageOptions {
            dockerfile: context.dockerfile.as_str(),
            t: primary.as_str(),
            buildargs: build_args,
            cachefrom: cache_from,
            platform: spec.platform.as_str(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        tracing::debug!("Build args: {:?}", spec.build_args);

        use bytes::Bytes;
        use http_body_util::{Either, Full};
        let body = Full::new(Bytes::from(context.archive));
        let mut stream = self
            .docker
            .build_image(options, None, Some(Either::Left(body)));

        while let Some(msg) = stream.next().await {
            let output = msg.map_err(BuildError::DockerConnection)?;
            Self::handle_build_output(output, sink)?;
        }

        for tag in extra_tags {
            self.tag(primary, tag).await?;
        }

        tracing::info!("Successfully built: {}", primary);
        Ok(())
    }

    /// 既存イメージに別名を付ける
    async fn tag(&self, source: &str, target: &str) -> BuildResult<()> {
        let (repo, tag) = crate::pusher::split_image_tag(target);
        tracing::debug!(source = %source, repo = %repo, tag = %tag, "Tagging image");

        #[allow(deprecated)]
        let options = bollard::image::TagImageOptions { repo, tag };
        self.docker.tag_image(source, Some(options)).await?;
        Ok(())
    }

    /// ビルド出力の処理
    fn handle_build_output(
        output: bollard::models::BuildInfo,
        sink: &dyn LogSink,
    ) -> BuildResult<()> {
        if let Some(stream) = output.stream {
            for line in stream.lines().filter(|l| !l.trim().is_empty()) {
                sink.line(line);
            }
        }

        if let Some(error_detail) = output.error_detail {
            let error_msg = error_detail
                .message
                .or(output.error)
                .unwrap_or_else(|| "Unknown build error".to_string());
            return Err(BuildError::BuildFailed(error_msg));
        }

        if let Some(error) = output.error {
            return Err(BuildError::BuildFailed(error));
        }

        if let Some(status) = output.status {
            sink.line(&status);
        }

        Ok(())
    }
}

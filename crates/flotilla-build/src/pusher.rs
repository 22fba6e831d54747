//! イメージプッシュ処理
//!
//! ビルドしたイメージをコンテナレジストリにプッシュします。

use crate::LogSink;
use crate::error::{BuildError, BuildResult};
use bollard::Docker;
use bollard::auth::DockerCredentials;
use bollard::models::PushImageInfo;
use futures_util::StreamExt;

/// イメージプッシュを実行するハンドラ
pub struct ImagePusher {
    docker: Docker,
}

impl ImagePusher {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect() -> BuildResult<Self> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    /// イメージをレジストリにプッシュ
    ///
    /// # Arguments
    /// * `image` - イメージ名（レジストリ込み、タグなし）
    /// * `tag` - イメージタグ
    /// * `credentials` - レジストリの認証情報
    ///
    /// # Returns
    /// プッシュ成功時は完全なイメージ名を返す
    pub async fn push(
        &self,
        image: &str,
        tag: &str,
        credentials: Option<DockerCredentials>,
        sink: &dyn LogSink,
    ) -> BuildResult<String> {
        let full_image = format!("{}:{}", image, tag);
        validate_tag(tag)?;

        #[allow(deprecated)]
        let options = bollard::image::PushImageOptions::<String> {
            tag: tag.to_string(),
        };

        sink.line(&format!("→ {}", full_image));
        tracing::info!(image = %full_image, "Pushing image");

        #[allow(deprecated)]
        let mut stream = self.docker.push_image(image, Some(options), credentials);

        let mut last_status = String::new();
        let mut error_message: Option<String> = None;

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(err) = info.error {
                        error_message = Some(err);
                    } else {
                        handle_progress(&info, &mut last_status, sink);
                    }
                }
                Err(e) => {
                    return Err(BuildError::PushFailed {
                        message: e.to_string(),
                    });
                }
            }
        }

        if let Some(err) = error_message {
            return Err(BuildError::PushFailed { message: err });
        }

        Ok(full_image)
    }
}

/// プッシュ進捗を表示
///
/// レイヤーごとの転送量は出さず、状態が変わった時だけ1行出力する。
fn handle_progress(info: &PushImageInfo, last_status: &mut String, sink: &dyn LogSink) {
    let Some(status) = &info.status else {
        return;
    };
    match status.as_str() {
        // 準備中と転送中は表示をスキップ（ノイズ軽減）
        "Preparing" | "Waiting" | "Pushing" => {}
        "Pushed" | "Layer already exists" => {
            sink.line(&format!("✓ {}", status));
        }
        _ => {
            if status != last_status {
                sink.line(status);
                *last_status = status.clone();
            }
        }
    }
}

/// タグのバリデーション
///
/// Docker タグの制約:
/// - 128文字以下
/// - 英数字、ピリオド、ハイフン、アンダースコアのみ
/// - 先頭はピリオドまたはハイフンではない
pub fn validate_tag(tag: &str) -> BuildResult<()> {
    if tag.is_empty() {
        return Err(BuildError::InvalidTag {
            tag: "(empty)".to_string(),
        });
    }

    if tag.len() > 128 {
        return Err(BuildError::InvalidTag {
            tag: format!("Tag too long ({} characters, max 128)", tag.len()),
        });
    }

    if tag.starts_with('.') || tag.starts_with('-') {
        return Err(BuildError::InvalidTag {
            tag: tag.to_string(),
        });
    }

    if let Some(c) = tag
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '.' | '-' | '_'))
    {
        return Err(BuildError::InvalidTag {
            tag: format!("Invalid character '{}' in tag: {}", c, tag),
        });
    }

    Ok(())
}

/// イメージ名とタグを分離
///
/// # Examples
/// - `123.dkr.ecr.us-east-1.amazonaws.com/acme-web:dev-latest` -> `("123.dkr.ecr.us-east-1.amazonaws.com/acme-web", "dev-latest")`
/// - `acme-web` -> `("acme-web", "latest")`
/// - `localhost:5000/app` -> `("localhost:5000/app", "latest")`
pub fn split_image_tag(image: &str) -> (String, String) {
    if let Some(pos) = image.rfind(':') {
        let potential_tag = &image[pos + 1..];
        let potential_image = &image[..pos];

        // ポート番号は / を含まない純粋な数字
        if !potential_tag.contains('/') && !potential_tag.chars().all(|c| c.is_ascii_digit()) {
            return (potential_image.to_string(), potential_tag.to_string());
        }
    }

    (image.to_string(), "latest".to_string())
}

use crate::GlobalArgs;
use anyhow::Context;
use colored::Colorize;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

/// LOCALSTACK_ENDPOINT が未指定のときの LocalStack
pub const DEFAULT_LOCALSTACK_ENDPOINT: &str = "http://127.0.0.1:4566";

/// ~/.aws/credentials に追加する1プロファイル
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileEntry {
    pub name: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    pub endpoint_url: Option<String>,
}

impl ProfileEntry {
    /// 環境変数（リージョンとプロファイルはコマンドラインの値を優先）から作る
    pub fn from_env(region: Option<&str>, profile: Option<&str>) -> anyhow::Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let (Some(access_key_id), Some(secret_access_key), Some(region), Some(name)) = (
            var("AWS_ACCESS_KEY_ID"),
            var("AWS_SECRET_ACCESS_KEY"),
            region.map(str::to_string).or_else(|| var("AWS_REGION")),
            profile.map(str::to_string).or_else(|| var("AWS_PROFILE")),
        ) else {
            anyhow::bail!(
                "AWS_ACCESS_KEY_ID、AWS_SECRET_ACCESS_KEY、AWS_REGION、AWS_PROFILE を設定してください"
            );
        };

        let localstack =
            var("LOCALSTACK").is_some_and(|v| matches!(v.as_str(), "1" | "true" | "TRUE"));
        let endpoint_url = localstack.then(|| {
            var("LOCALSTACK_ENDPOINT").unwrap_or_else(|| DEFAULT_LOCALSTACK_ENDPOINT.to_string())
        });

        Ok(Self {
            name,
            access_key_id,
            secret_access_key,
            region,
            endpoint_url,
        })
    }

    pub fn render(&self) -> String {
        let mut section = format!(
            "[{}]\naws_access_key_id = {}\naws_secret_access_key = {}\nregion = {}\n",
            self.name, self.access_key_id, self.secret_access_key, self.region
        );
        if let Some(endpoint) = &self.endpoint_url {
            section.push_str(&format!("endpoint_url = {}\n", endpoint));
        }
        section.push('\n');
        section
    }
}

pub fn credentials_path() -> anyhow::Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("ホームディレクトリが見つかりません"))?;
    Ok(home.join(".aws").join("credentials"))
}

/// 資格情報ファイルの末尾にプロファイルを追加する（新規作成時は 0600）
pub fn append_profile(path: &Path, entry: &ProfileEntry) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("{} を作成できません", dir.display()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)
        .with_context(|| format!("{} を開けません", path.display()))?;
    file.write_all(entry.render().as_bytes())
        .with_context(|| format!("{} に書き込めません", path.display()))?;
    Ok(())
}

pub fn handle(global: &GlobalArgs) -> anyhow::Result<()> {
    let entry =
        ProfileEntry::from_env(global.aws_region.as_deref(), global.aws_profile.as_deref())?;
    let path = credentials_path()?;
    append_profile(&path, &entry)?;
    println!(
        "{} AWS プロファイル `{}` を {} に追加しました",
        "✓".green(),
        entry.name.cyan(),
        path.display()
    );
    Ok(())
}

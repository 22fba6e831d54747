//! 実行時設定の解決

use super::project::{Project, Runtime};
use crate::error::{FlotillaError, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// CLI フラグや環境変数から渡される上書き値
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub env: Option<String>,
    pub namespace: Option<String>,
    pub aws_region: Option<String>,
    pub aws_profile: Option<String>,
    pub tag: Option<String>,
    pub docker_registry: Option<String>,
    pub prefer_runtime: Option<Runtime>,
    pub log_level: Option<String>,
}

/// 1回の実行で使う確定済みの設定
///
/// トラバーサル開始前に一度だけ作られ、以降は読み取り専用で共有される。
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub project_name: String,
    pub env: String,
    pub namespace: String,
    pub aws_region: String,
    pub aws_profile: String,
    pub endpoint_url: Option<String>,
    pub docker_registry: Option<String>,
    pub tag: String,
    pub root_dir: PathBuf,
    pub apps_path: PathBuf,
    pub prefer_runtime: Runtime,
    pub nvm_version: String,
    pub terraform_version: String,
    pub log_level: String,
}

impl RunSettings {
    /// プロジェクト定義と上書き値から設定を確定する
    ///
    /// 優先順位: 上書き値 > flotilla.kdl > デフォルト。
    /// AWS プロファイルが未指定の場合は `terraform "infra"` のプロファイルを引き継ぐ。
    pub fn resolve(project: &Project, overrides: &Overrides) -> Result<Self> {
        let env = pick(&overrides.env, &project.env).ok_or(FlotillaError::MissingSetting("env"))?;
        let namespace = pick(&overrides.namespace, &project.namespace)
            .ok_or(FlotillaError::MissingSetting("namespace"))?;
        let aws_region = pick(&overrides.aws_region, &project.aws_region)
            .ok_or(FlotillaError::MissingSetting("aws_region"))?;

        let aws_profile = match pick(&overrides.aws_profile, &project.aws_profile) {
            Some(profile) => profile,
            None => {
                let inherited = project
                    .terraform
                    .get("infra")
                    .and_then(|tf| tf.aws_profile.clone())
                    .filter(|p| !p.is_empty())
                    .ok_or(FlotillaError::MissingSetting("aws_profile"))?;
                debug!(profile = %inherited, "Inherited AWS profile from terraform infra stack");
                inherited
            }
        };

        let tag = pick(&overrides.tag, &project.tag)
            .or_else(|| detect_git_tag(&project.root_dir))
            .unwrap_or_else(|| {
                warn!("Could not determine tag from git, falling back to 'latest'");
                "latest".to_string()
            });

        Ok(Self {
            project_name: project.name.clone(),
            env,
            namespace,
            aws_region,
            aws_profile,
            endpoint_url: project.endpoint_url.clone(),
            docker_registry: pick(&overrides.docker_registry, &project.docker_registry),
            tag,
            root_dir: project.root_dir.clone(),
            apps_path: project.apps_path.clone(),
            prefer_runtime: overrides.prefer_runtime.unwrap_or(project.prefer_runtime),
            nvm_version: project.nvm_version.clone(),
            terraform_version: project.terraform_version.clone(),
            log_level: overrides
                .log_level
                .clone()
                .unwrap_or_else(|| "info".to_string()),
        })
    }

    /// デフォルトの ECS クラスタ名 (`{env}-{namespace}`)
    pub fn default_cluster(&self) -> String {
        format!("{}-{}", self.env, self.namespace)
    }

    /// `.infra/env/{env}`
    pub fn env_dir(&self) -> PathBuf {
        self.root_dir.join(".infra").join("env").join(&self.env)
    }

    pub fn infra_dir(&self) -> PathBuf {
        self.root_dir.join(".infra")
    }

    /// サービスのソースディレクトリ
    ///
    /// 未指定なら `{apps_path}/{name}`、相対パスはプロジェクトルート基準。
    pub fn service_dir(&self, name: &str, configured: Option<&Path>) -> PathBuf {
        match configured {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.root_dir.join(path),
            None => self.root_dir.join(&self.apps_path).join(name),
        }
    }

    /// デバッグ出力を有効にするログレベルか
    pub fn is_verbose(&self) -> bool {
        matches!(self.log_level.as_str(), "debug" | "trace")
    }
}

fn pick(primary: &Option<String>, fallback: &Option<String>) -> Option<String> {
    primary
        .as_ref()
        .filter(|v| !v.is_empty())
        .or_else(|| fallback.as_ref().filter(|v| !v.is_empty()))
        .cloned()
}

/// `git rev-parse --short HEAD` からタグを決定
pub fn detect_git_tag(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!sha.is_empty()).then_some(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TerraformStack;

    fn project() -> Project {
        let mut project = Project::new("demo", "/nonexistent/demo");
        project.env = Some("dev".to_string());
        project.namespace = Some("acme".to_string());
        project.aws_region = Some("us-east-1".to_string());
        project.aws_profile = Some("acme-dev".to_string());
        project.tag = Some("abc123".to_string());
        project
    }

    #[test]
    fn test_resolve_from_project() {
        let settings = RunSettings::resolve(&project(), &Overrides::default()).unwrap();
        assert_eq!(settings.env, "dev");
        assert_eq!(settings.namespace, "acme");
        assert_eq!(settings.aws_profile, "acme-dev");
        assert_eq!(settings.tag, "abc123");
        assert_eq!(settings.default_cluster(), "dev-acme");
    }

    #[test]
    fn test_overrides_win() {
        let overrides = Overrides {
            env: Some("prod".to_string()),
            tag: Some("v2".to_string()),
            ..Default::default()
        };
        let settings = RunSettings::resolve(&project(), &overrides).unwrap();
        assert_eq!(settings.env, "prod");
        assert_eq!(settings.tag, "v2");
        assert_eq!(settings.default_cluster(), "prod-acme");
    }

    #[test]
    fn test_profile_inherited_from_infra() {
        let mut project = project();
        project.aws_profile = None;
        project.terraform.insert(
            "infra".to_string(),
            TerraformStack {
                aws_profile: Some("infra-profile".to_string()),
                ..Default::default()
            },
        );
        let settings = RunSettings::resolve(&project, &Overrides::default()).unwrap();
        assert_eq!(settings.aws_profile, "infra-profile");
    }

    #[test]
    fn test_missing_profile_is_error() {
        let mut project = project();
        project.aws_profile = None;
        let err = RunSettings::resolve(&project, &Overrides::default()).unwrap_err();
        assert!(matches!(err, FlotillaError::MissingSetting("aws_profile")));
    }

    #[test]
    fn test_missing_env_is_error() {
        let mut project = project();
        project.env = None;
        let err = RunSettings::resolve(&project, &Overrides::default()).unwrap_err();
        assert!(matches!(err, FlotillaError::MissingSetting("env")));
    }

    #[test]
    fn test_service_dir() {
        let settings = RunSettings::resolve(&project(), &Overrides::default()).unwrap();
        assert_eq!(
            settings.service_dir("web", None),
            PathBuf::from("/nonexistent/demo/apps/web")
        );
        assert_eq!(
            settings.service_dir("web", Some(Path::new("services/web"))),
            PathBuf::from("/nonexistent/demo/services/web")
        );
        assert_eq!(
            settings.service_dir("web", Some(Path::new("/srv/web"))),
            PathBuf::from("/srv/web")
        );
    }

    #[test]
    fn test_verbose_levels() {
        let overrides = Overrides {
            log_level: Some("trace".to_string()),
            ..Default::default()
        };
        let settings = RunSettings::resolve(&project(), &overrides).unwrap();
        assert!(settings.is_verbose());
    }
}

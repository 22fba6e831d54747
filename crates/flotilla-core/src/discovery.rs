//! プロジェクトルートの発見

use crate::error::{FlotillaError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub const CONFIG_FILE: &str = "flotilla.kdl";
pub const CONFIG_DIR_FILE: &str = ".flotilla/flotilla.kdl";
pub const PROJECT_ROOT_ENV: &str = "FLOTILLA_PROJECT_ROOT";

/// ディレクトリ直下の設定ファイルを返す
pub fn config_file_in(dir: &Path) -> Option<PathBuf> {
    [CONFIG_FILE, CONFIG_DIR_FILE]
        .iter()
        .map(|f| dir.join(f))
        .find(|p| p.exists())
}

/// プロジェクトルートを検出
///
/// 以下の優先順位で検索:
/// 1. 環境変数 FLOTILLA_PROJECT_ROOT
/// 2. カレントディレクトリから上に向かって flotilla.kdl または .flotilla/flotilla.kdl を探す
#[tracing::instrument]
pub fn find_project_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var(PROJECT_ROOT_ENV) {
        let path = PathBuf::from(&root);
        debug!(env_root = %root, "Checking FLOTILLA_PROJECT_ROOT");
        if config_file_in(&path).is_some() {
            info!(project_root = %path.display(), "Found project root from environment variable");
            return Ok(path);
        }
    }

    let start_dir = std::env::current_dir()?;
    find_project_root_from(&start_dir)
}

/// 指定ディレクトリから上に向かってプロジェクトルートを探す
pub fn find_project_root_from(start_dir: &Path) -> Result<PathBuf> {
    let mut current = start_dir.to_path_buf();
    debug!(start_dir = %start_dir.display(), "Searching for project root");

    loop {
        if let Some(file) = config_file_in(&current) {
            info!(project_root = %current.display(), file = %file.display(), "Found project root");
            return Ok(current);
        }

        if !current.pop() {
            break;
        }
    }

    warn!(start_dir = %start_dir.display(), "Project root not found");
    Err(FlotillaError::ProjectRootNotFound(start_dir.to_path_buf()))
}

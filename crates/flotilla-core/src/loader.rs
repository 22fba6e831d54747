//! 統合ローダー
//!
//! プロジェクトルートの発見、パース、依存グラフの検証をまとめて行う。

use crate::discovery::{config_file_in, find_project_root};
use crate::error::{FlotillaError, Result};
use crate::graph::DependencyGraph;
use crate::model::{Project, ServiceNode};
use crate::parser::parse_kdl_file;
use std::path::Path;
use tracing::{info, instrument};

/// カレントディレクトリからプロジェクトをロード
#[instrument]
pub fn load_project() -> Result<Project> {
    let project_root = find_project_root()?;
    load_project_from_root(&project_root)
}

/// 指定されたルートディレクトリからプロジェクトをロード
#[instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn load_project_from_root(project_root: &Path) -> Result<Project> {
    let file = config_file_in(project_root)
        .ok_or_else(|| FlotillaError::ProjectRootNotFound(project_root.to_path_buf()))?;
    let project = parse_kdl_file(&file, project_root)?;
    info!(
        project = %project.name,
        services = project.services.len(),
        "Project loaded"
    );
    Ok(project)
}

/// プロジェクトのサービスから依存グラフを構築
pub fn build_graph(project: &Project) -> Result<DependencyGraph<ServiceNode>> {
    Ok(DependencyGraph::build(project.services.iter().cloned())?)
}

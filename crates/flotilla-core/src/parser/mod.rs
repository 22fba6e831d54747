//! KDLパーサー
//!
//! flotilla.kdl をパースして [`Project`] を生成します。

mod service;

use service::{parse_alias, parse_ecs, parse_serverless, parse_terraform};

use crate::error::{FlotillaError, Result};
use crate::model::{Project, ServiceKind, ServiceNode};
use kdl::{KdlDocument, KdlNode};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// KDLファイルをパースして Project を生成
pub fn parse_kdl_file<P: AsRef<Path>>(path: P, root_dir: &Path) -> Result<Project> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_kdl_string(&content, root_dir)
}

/// KDL文字列をパース
///
/// 同じ名前が複数の種類で定義された場合は serverless > alias > ecs の順で
/// 優先し、警告を出す。
pub fn parse_kdl_string(content: &str, root_dir: &Path) -> Result<Project> {
    let doc: KdlDocument = content.parse()?;

    let default_name = root_dir
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unnamed")
        .to_string();
    let mut project = Project::new(default_name, root_dir);

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                if let Some(name) = first_string(node) {
                    project.name = name;
                }
            }
            "env" => project.env = first_string(node),
            "namespace" => project.namespace = first_string(node),
            "aws_region" => project.aws_region = first_string(node),
            "aws_profile" => project.aws_profile = first_string(node),
            "endpoint_url" => project.endpoint_url = first_string(node),
            "docker_registry" => project.docker_registry = first_string(node),
            "tag" => project.tag = first_string(node),
            "apps_path" => {
                if let Some(path) = first_string(node) {
                    project.apps_path = PathBuf::from(path);
                }
            }
            "prefer_runtime" => {
                if let Some(runtime) = first_string(node) {
                    project.prefer_runtime = runtime.parse()?;
                }
            }
            "nvm_version" => {
                if let Some(version) = first_string(node) {
                    project.nvm_version = version;
                }
            }
            "terraform_version" => {
                if let Some(version) = first_string(node) {
                    project.terraform_version = version;
                }
            }
            "plain_text" => project.plain_text = flag(node),
            "terraform" => {
                let (stack_name, stack) = parse_terraform(node)?;
                project.terraform.insert(stack_name, stack);
            }
            "ecs" => {
                let (name, deps, config) = parse_ecs(node)?;
                insert_service(
                    &mut project.services,
                    ServiceNode::new(name, ServiceKind::Container(config)).with_dependencies(deps),
                );
            }
            "serverless" => {
                let (name, deps, config) = parse_serverless(node)?;
                insert_service(
                    &mut project.services,
                    ServiceNode::new(name, ServiceKind::Function(config)).with_dependencies(deps),
                );
            }
            "alias" => {
                let (name, deps) = parse_alias(node)?;
                insert_service(
                    &mut project.services,
                    ServiceNode::new(name, ServiceKind::Alias).with_dependencies(deps),
                );
            }
            other => {
                debug!(node = %other, "Skipping unknown node");
            }
        }
    }

    Ok(project)
}

fn precedence(kind: &ServiceKind) -> u8 {
    match kind {
        ServiceKind::Function(_) => 3,
        ServiceKind::Alias => 2,
        ServiceKind::Container(_) => 1,
    }
}

/// 宣言位置を保ったままサービスを追加する
fn insert_service(services: &mut Vec<ServiceNode>, node: ServiceNode) {
    let Some(existing) = services.iter_mut().find(|s| s.name == node.name) else {
        services.push(node);
        return;
    };

    let keep_existing = precedence(&existing.kind) >= precedence(&node.kind);
    let (kept, dropped) = if keep_existing {
        (existing.kind.label(), node.kind.label())
    } else {
        (node.kind.label(), existing.kind.label())
    };
    warn!(
        service = %node.name,
        kept = kept,
        ignored = dropped,
        "Service is defined under multiple kinds"
    );
    if !keep_existing {
        *existing = node;
    }
}

/// 最初の引数を文字列として取得
pub(crate) fn first_string(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

/// 全ての引数を文字列として取得
pub(crate) fn all_strings(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string().map(|s| s.to_string()))
        .collect()
}

/// 真偽値フラグ。引数なしのノードは true とみなす
pub(crate) fn flag(node: &KdlNode) -> bool {
    match node.entries().first() {
        None => true,
        Some(entry) => entry.value().as_bool().unwrap_or(false),
    }
}

/// 最初の引数を非負整数として取得
pub(crate) fn first_u64(node: &KdlNode) -> Result<Option<u64>> {
    let Some(entry) = node.entries().first() else {
        return Ok(None);
    };
    if let Some(value) = entry.value().as_integer() {
        return u64::try_from(value)
            .map(Some)
            .map_err(|_| FlotillaError::InvalidValue {
                node: node.name().value().to_string(),
                message: format!("{} は 0 以上の整数である必要があります", value),
            });
    }
    // 文字列で書かれた数値も受け付ける
    if let Some(text) = entry.value().as_string() {
        return text
            .parse::<u64>()
            .map(Some)
            .map_err(|_| FlotillaError::InvalidValue {
                node: node.name().value().to_string(),
                message: format!("'{}' は整数ではありません", text),
            });
    }
    Ok(None)
}

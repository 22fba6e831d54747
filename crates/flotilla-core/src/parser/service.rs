//! サービスノードのパース

use super::{all_strings, first_string, first_u64, flag};
use crate::error::{FlotillaError, Result};
use crate::model::{ContainerConfig, FrameworkVersion, FunctionConfig, TerraformStack};
use kdl::KdlNode;
use std::path::PathBuf;

fn node_name(node: &KdlNode) -> Result<String> {
    first_string(node).ok_or_else(|| {
        FlotillaError::InvalidConfig(format!("{} requires a name", node.name().value()))
    })
}

/// ecs ノードをパース
pub fn parse_ecs(node: &KdlNode) -> Result<(String, Vec<String>, ContainerConfig)> {
    let name = node_name(node)?;
    let mut deps = Vec::new();
    let mut config = ContainerConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends_on" => deps.extend(all_strings(child)),
                "path" => config.path = first_string(child).map(PathBuf::from),
                "image" => config.image = first_string(child),
                "cluster" => config.cluster = first_string(child),
                "docker_registry" => config.docker_registry = first_string(child),
                "timeout" => {
                    if let Some(timeout) = first_u64(child)? {
                        config.timeout = timeout;
                    }
                }
                "skip_deploy" => config.skip_deploy = flag(child),
                "unsafe" => config.unsafe_mode = flag(child),
                "task_definition_arn" => config.task_definition_arn = first_string(child),
                "service_name" => config.service_name = first_string(child),
                "aws_region" => config.aws_region = first_string(child),
                "aws_profile" => config.aws_profile = first_string(child),
                _ => {}
            }
        }
    }

    Ok((name, deps, config))
}

/// serverless ノードをパース
pub fn parse_serverless(node: &KdlNode) -> Result<(String, Vec<String>, FunctionConfig)> {
    let name = node_name(node)?;
    let mut deps = Vec::new();
    let mut config = FunctionConfig::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "depends_on" => deps.extend(all_strings(child)),
                "path" => config.path = first_string(child).map(PathBuf::from),
                "node_version" => {
                    if let Some(version) = first_string(child) {
                        config.node_version = version;
                    }
                }
                "serverless_version" => {
                    let raw = first_string(child).or_else(|| {
                        child
                            .entries()
                            .first()
                            .and_then(|e| e.value().as_integer())
                            .map(|v| v.to_string())
                    });
                    if let Some(raw) = raw {
                        config.framework = FrameworkVersion::parse(&raw).ok_or_else(|| {
                            FlotillaError::InvalidValue {
                                node: "serverless_version".to_string(),
                                message: format!("'{}' はバージョン番号ではありません", raw),
                            }
                        })?;
                    }
                }
                "file" => {
                    if let Some(file) = first_string(child) {
                        config.file = file;
                    }
                }
                "use_yarn" => config.use_yarn = flag(child),
                "force" => config.force = flag(child),
                "create_custom_domain" => config.create_custom_domain = flag(child),
                "aws_region" => config.aws_region = first_string(child),
                "aws_profile" => config.aws_profile = first_string(child),
                _ => {}
            }
        }
    }

    Ok((name, deps, config))
}

/// alias ノードをパース
pub fn parse_alias(node: &KdlNode) -> Result<(String, Vec<String>)> {
    let name = node_name(node)?;
    let deps = node
        .children()
        .map(|children| {
            children
                .nodes()
                .iter()
                .filter(|c| c.name().value() == "depends_on")
                .flat_map(all_strings)
                .collect()
        })
        .unwrap_or_default();
    Ok((name, deps))
}

/// terraform ノードをパース
pub fn parse_terraform(node: &KdlNode) -> Result<(String, TerraformStack)> {
    let name = node_name(node)?;
    let mut stack = TerraformStack::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "version" => stack.version = first_string(child),
                "aws_profile" => stack.aws_profile = first_string(child),
                "aws_region" => stack.aws_region = first_string(child),
                _ => {}
            }
        }
    }

    Ok((name, stack))
}

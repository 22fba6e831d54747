//! ビルドコンテキストの作成
//!
//! コンテキストディレクトリを .dockerignore に従って tar.gz にまとめます。

use crate::error::{BuildError, BuildResult};
use flate2::Compression;
use flate2::write::GzEncoder;
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Builder;

/// コンテキスト外の Dockerfile を格納する名前
const EXTERNAL_DOCKERFILE: &str = ".flotilla.Dockerfile";

/// 作成したビルドコンテキスト
#[derive(Debug)]
pub struct BuildContext {
    /// tar.gz データ
    pub archive: Vec<u8>,
    /// アーカイブ内の Dockerfile パス
    pub dockerfile: String,
}

pub struct ContextBuilder;

impl ContextBuilder {
    /// ビルドコンテキストをtar.gzアーカイブとして作成
    pub fn create_context(
        context_path: &Path,
        dockerfile_path: &Path,
    ) -> BuildResult<BuildContext> {
        if !context_path.is_dir() {
            return Err(BuildError::ContextNotFound(context_path.to_path_buf()));
        }
        if !dockerfile_path.is_file() {
            return Err(BuildError::DockerfileNotFound(dockerfile_path.to_path_buf()));
        }

        tracing::debug!("Creating build context from: {}", context_path.display());

        let ignore = IgnoreRules::load(context_path)?;
        let mut files = Vec::new();
        collect_files(context_path, Path::new(""), &ignore, &mut files)?;

        let dockerfile_rel = dockerfile_path
            .strip_prefix(context_path)
            .ok()
            .map(Path::to_path_buf);

        let mut archive_data = Vec::new();
        let dockerfile_name;
        {
            let encoder = GzEncoder::new(&mut archive_data, Compression::default());
            let mut tar = Builder::new(encoder);

            for rel in &files {
                tar.append_path_with_name(context_path.join(rel), rel)?;
            }

            dockerfile_name = match dockerfile_rel {
                Some(rel) if files.contains(&rel) => to_archive_path(&rel),
                // コンテキスト外、または .dockerignore で除外された Dockerfile
                other => {
                    let name = other
                        .map(|rel| to_archive_path(&rel))
                        .unwrap_or_else(|| EXTERNAL_DOCKERFILE.to_string());
                    let content = fs::read(dockerfile_path)?;
                    let mut header = tar::Header::new_gnu();
                    header.set_path(&name).map_err(|e| {
                        BuildError::InvalidConfig(format!("Failed to set Dockerfile path: {}", e))
                    })?;
                    header.set_size(content.len() as u64);
                    header.set_mode(0o644);
                    header.set_cksum();
                    tar.append(&header, &content[..])?;
                    name
                }
            };

            tar.into_inner()?.finish()?;
        }

        tracing::debug!(
            files = files.len(),
            bytes = archive_data.len(),
            "Build context created"
        );
        Self::check_context_size(archive_data.len());

        Ok(BuildContext {
            archive: archive_data,
            dockerfile: dockerfile_name,
        })
    }

    /// コンテキストサイズのチェックと警告
    fn check_context_size(size: usize) {
        const MAX_CONTEXT_SIZE: usize = 500 * 1024 * 1024; // 500MB

        if size > MAX_CONTEXT_SIZE {
            tracing::warn!(
                "警告: ビルドコンテキストが大きすぎます（{}MB）\n\
                 .dockerignoreファイルで不要なファイルを除外することを推奨します。",
                size / 1024 / 1024
            );
        }
    }
}

fn to_archive_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn collect_files(
    root: &Path,
    rel: &Path,
    ignore: &IgnoreRules,
    files: &mut Vec<PathBuf>,
) -> BuildResult<()> {
    let mut entries: Vec<_> = fs::read_dir(root.join(rel))?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let child = rel.join(entry.file_name());
        if ignore.is_ignored(&child) {
            continue;
        }
        if entry.file_type()?.is_dir() {
            collect_files(root, &child, ignore, files)?;
        } else {
            files.push(child);
        }
    }
    Ok(())
}

/// .dockerignore のルール
#[derive(Debug, Default)]
struct IgnoreRules {
    rules: Vec<(Pattern, bool)>,
}

impl IgnoreRules {
    fn load(context_path: &Path) -> BuildResult<Self> {
        let path = context_path.join(".dockerignore");
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::parse(&fs::read_to_string(path)?))
    }

    fn parse(content: &str) -> Self {
        let rules = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|line| {
                let (negated, pattern) = match line.strip_prefix('!') {
                    Some(rest) => (true, rest),
                    None => (false, line),
                };
                let pattern = pattern.trim_start_matches("./").trim_matches('/');
                match Pattern::new(pattern) {
                    Ok(p) => Some((p, negated)),
                    Err(e) => {
                        tracing::warn!(
                            pattern = %line,
                            error = %e,
                            "Ignoring invalid .dockerignore pattern"
                        );
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    /// パス自体か、その親ディレクトリのいずれかがパターンに一致すれば除外
    fn is_ignored(&self, rel: &Path) -> bool {
        let candidate = to_archive_path(rel);
        let mut ignored = false;
        for (pattern, negated) in &self.rules {
            let matched = pattern.matches(&candidate)
                || rel
                    .ancestors()
                    .skip(1)
                    .filter(|a| !a.as_os_str().is_empty())
                    .any(|a| pattern.matches(&to_archive_path(a)));
            if matched {
                ignored = !negated;
            }
        }
        ignored
    }
}

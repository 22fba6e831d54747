use super::AppPipeline;
use crate::error::AppResult;
use crate::output::Step;
use async_trait::async_trait;

/// 何もしないサービス。依存関係をまとめる目印として使う
pub struct AliasPipeline {
    name: String,
}

impl AliasPipeline {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl AppPipeline for AliasPipeline {
    fn name(&self) -> &str {
        &self.name
    }

    async fn build(&self, _step: &Step) -> AppResult<()> {
        Ok(())
    }

    async fn push(&self, _step: &Step) -> AppResult<()> {
        Ok(())
    }

    async fn deploy(&self, _step: &Step) -> AppResult<()> {
        Ok(())
    }

    async fn destroy(&self, _step: &Step, _auto_approve: bool) -> AppResult<()> {
        Ok(())
    }

    fn explain(&self) -> AppResult<String> {
        Ok(format!("# {} (alias)\n# 実行するコマンドはありません\n", self.name))
    }
}

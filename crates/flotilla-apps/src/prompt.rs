//! 破壊的操作の確認プロンプト

use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use indicatif::MultiProgress;
use std::io::Write;
use tokio::sync::Mutex;

#[async_trait]
pub trait Confirm: Send + Sync {
    /// `items` を列挙してから `[y/N]` で確認する
    async fn confirm(&self, message: &str, items: &[String]) -> AppResult<bool>;
}

/// 確認を1つずつ順番に行うラッパー
///
/// 並行に走る複数サービスから同時に呼ばれても、内側のプロンプトに入れるのは
/// 常に1つだけ。
pub struct SerializedConfirm<C> {
    lock: Mutex<()>,
    inner: C,
}

impl<C: Confirm> SerializedConfirm<C> {
    pub fn new(inner: C) -> Self {
        Self {
            lock: Mutex::new(()),
            inner,
        }
    }
}

#[async_trait]
impl<C: Confirm> Confirm for SerializedConfirm<C> {
    async fn confirm(&self, message: &str, items: &[String]) -> AppResult<bool> {
        let _guard = self.lock.lock().await;
        self.inner.confirm(message, items).await
    }
}

/// 標準入力で確認するプロンプト
///
/// 表示中はスピナーを止める。並行実行では `SerializedConfirm` で包んで使う。
pub struct TerminalPrompt {
    multi: Option<MultiProgress>,
}

impl TerminalPrompt {
    pub fn new(multi: Option<MultiProgress>) -> Self {
        Self { multi }
    }

    /// 順番待ち付きのプロンプト
    pub fn serialized(multi: Option<MultiProgress>) -> SerializedConfirm<Self> {
        SerializedConfirm::new(Self::new(multi))
    }
}

#[async_trait]
impl Confirm for TerminalPrompt {
    async fn confirm(&self, message: &str, items: &[String]) -> AppResult<bool> {
        let message = message.to_string();
        let items = items.to_vec();
        let multi = self.multi.clone();

        let answer = tokio::task::spawn_blocking(move || {
            let ask = || -> std::io::Result<String> {
                let mut out = std::io::stdout().lock();
                writeln!(out, "{}", message)?;
                for item in &items {
                    writeln!(out, "  • {}", item)?;
                }
                write!(out, "続行しますか？ [y/N]: ")?;
                out.flush()?;
                drop(out);

                let mut input = String::new();
                std::io::stdin().read_line(&mut input)?;
                Ok(input)
            };
            match multi {
                Some(multi) => multi.suspend(ask),
                None => ask(),
            }
        })
        .await
        .map_err(|e| AppError::Io(std::io::Error::other(e)))??;

        Ok(is_yes(&answer))
    }
}

/// 常に同じ答えを返すプロンプト
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

#[async_trait]
impl Confirm for FixedAnswer {
    async fn confirm(&self, _message: &str, _items: &[String]) -> AppResult<bool> {
        Ok(self.0)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

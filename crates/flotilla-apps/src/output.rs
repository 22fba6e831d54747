//! 並行実行されるステップの出力を、発生元のサービス名付きで1行ずつ出す
//!
//! 出力は行単位でバッファされ、完結した行だけがまとめて書き出される。
//! 末尾の改行のない断片はステップ終了時に書き出す。

use colored::Colorize;
use flotilla_build::LogSink;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// ステップ出力の書き出し先
pub trait OutputSink: Send + Sync {
    /// ステップ開始
    fn begin(&self, _service: &str, _title: &str) {}

    /// 完結した1行
    fn line(&self, service: &str, text: &str);

    /// ステップ終了
    fn end(&self, _service: &str, _success: bool, _message: &str) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// ターミナル出力
///
/// スピナーと行出力を `MultiProgress` 経由で描画し、表示が崩れないようにする。
/// `plain` の場合はスピナーを使わず、行をそのまま標準出力に書く。
pub struct TerminalOutput {
    multi: MultiProgress,
    plain: bool,
    spinners: Mutex<HashMap<String, ProgressBar>>,
}

impl TerminalOutput {
    pub fn new(plain: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            plain,
            spinners: Mutex::new(HashMap::new()),
        }
    }

    /// プロンプト表示時にスピナーを一時停止するためのハンドル
    pub fn multi_progress(&self) -> MultiProgress {
        self.multi.clone()
    }

    fn print(&self, text: String) {
        if self.plain {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}", text);
        } else if let Err(e) = self.multi.println(text) {
            tracing::debug!(error = %e, "Failed to print progress line");
        }
    }
}

impl OutputSink for TerminalOutput {
    fn begin(&self, service: &str, title: &str) {
        if self.plain {
            self.print(format!("{} {}", format!("[{}]", service).cyan(), title));
            return;
        }

        let spinner = self.multi.add(ProgressBar::new_spinner());
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {prefix:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_prefix(service.to_string());
        spinner.set_message(title.to_string());
        spinner.enable_steady_tick(Duration::from_millis(120));
        lock(&self.spinners).insert(service.to_string(), spinner);
    }

    fn line(&self, service: &str, text: &str) {
        self.print(format!("{} {}", format!("[{}]", service).cyan(), text));
    }

    fn end(&self, service: &str, success: bool, message: &str) {
        let mark = if success { "✓".green() } else { "✗".red() };
        match lock(&self.spinners).remove(service) {
            Some(spinner) => spinner.finish_with_message(format!("{} {}", mark, message)),
            None => self.print(format!("{} {} {}", mark, format!("[{}]", service).cyan(), message)),
        }
    }
}

/// 行をメモリに溜める出力先
///
/// 各行は `[service] text` 形式で保存される。
#[derive(Default)]
pub struct MemoryOutput {
    lines: Mutex<Vec<String>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    /// 指定サービスの行だけを取り出す（プレフィックスなし）
    pub fn lines_for(&self, service: &str) -> Vec<String> {
        let prefix = format!("[{}] ", service);
        lock(&self.lines)
            .iter()
            .filter_map(|l| l.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

impl OutputSink for MemoryOutput {
    fn line(&self, service: &str, text: &str) {
        lock(&self.lines).push(format!("[{}] {}", service, text));
    }

    fn end(&self, service: &str, success: bool, message: &str) {
        let mark = if success { "✓" } else { "✗" };
        lock(&self.lines).push(format!("[{}] {} {}", service, mark, message));
    }
}

/// サービスごとの `Step` を払い出す
#[derive(Clone)]
pub struct OutputAggregator {
    sink: Arc<dyn OutputSink>,
}

impl OutputAggregator {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self { sink }
    }

    pub fn step(&self, service: &str, cancel: CancellationToken) -> Step {
        Step {
            service: service.to_string(),
            sink: self.sink.clone(),
            buffer: Mutex::new(String::new()),
            cancel,
        }
    }
}

/// 1サービス分の出力とキャンセル通知
pub struct Step {
    service: String,
    sink: Arc<dyn OutputSink>,
    buffer: Mutex<String>,
    cancel: CancellationToken,
}

impl Step {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn begin(&self, title: &str) {
        self.sink.begin(&self.service, title);
    }

    /// 任意の断片を書き込む。改行までたまった分だけ出力される
    pub fn write(&self, chunk: &str) {
        let mut buffer = lock(&self.buffer);
        buffer.push_str(chunk);
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            self.sink.line(&self.service, line);
        }
    }

    /// 1行を書き込む
    pub fn emit(&self, text: &str) {
        self.write(text);
        self.write("\n");
    }

    /// 改行のない断片を書き出す
    pub fn flush(&self) {
        let mut buffer = lock(&self.buffer);
        if !buffer.is_empty() {
            let rest = std::mem::take(&mut *buffer);
            self.sink.line(&self.service, rest.trim_end_matches('\r'));
        }
    }

    pub fn done(&self, message: &str) {
        self.flush();
        self.sink.end(&self.service, true, message);
    }

    pub fn fail(&self, message: &str) {
        self.flush();
        self.sink.end(&self.service, false, message);
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        self.flush();
    }
}

impl LogSink for Step {
    fn line(&self, text: &str) {
        self.emit(text);
    }
}

//! モデル定義
//!
//! Flotilla で使用されるデータモデルを定義します。

mod project;
mod service;
mod settings;

pub use project::*;
pub use service::*;
pub use settings::*;

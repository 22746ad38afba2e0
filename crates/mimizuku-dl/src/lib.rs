//! OWL DL タブロー推論エンジン
//!
//! このクレートは Mimizuku の推論層を提供します:
//! - 依存集合とバックジャンプ付きタブロー探索
//! - 完備グラフとアンドゥトレイル
//! - ブロッキングによる停止保証
//! - 概念充足可能性キャッシュ
//! - 増分更新トラッカ

pub mod blocking;
pub mod cache;
pub mod dependency;
pub mod graph;
pub mod kb;
pub mod reasoner;
pub mod tableau;
pub mod tracker;

pub use blocking::{Blocking, BlockingStrategy};
pub use cache::{CacheFeatures, CacheSafety, ConceptCache};
pub use dependency::DependencySet;
pub use graph::{Clash, CompletionGraph, EdgeId, NodeId, NodeName, TrailMark};
pub use kb::KnowledgeBase;
pub use reasoner::{DlReasoner, ReasonerConfig, ReasonerStats};
pub use tableau::{SearchLimits, SearchStats, Tableau, Verdict};
pub use tracker::{Change, ChangeTracker};

use mimizuku_core::CoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DlError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Reasoning incomplete (timeout or cancellation): {0}")]
    Timeout(String),
}

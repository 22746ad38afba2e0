//! OWL DL 語彙モデルと式正規化
//!
//! このクレートは Mimizuku 推論エンジンの語彙層を提供します:
//! - クラス式・プロパティ式・公理の表層モデル
//! - ハッシュコンシングされた NNF 概念プール
//! - ロール階層 (RBox) と特性フラグ
//! - 表現力プロファイル (expressivity)

pub mod model;
pub mod term;
pub mod rbox;
pub mod expressivity;
pub mod datatype;

pub use model::{
    Axiom, ClassExpression, Individual, Iri, Literal, Ontology, PropertyExpression,
};
pub use term::{ConceptData, ConceptId, ConceptPool};
pub use rbox::{RoleBox, RoleId};
pub use expressivity::Expressivity;
pub use datatype::{DatatypeReasoner, SimpleDatatypeReasoner};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Malformed term: {0}")]
    MalformedTerm(String),

    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),
}

//! Impls - ports の実装
//!
//! - **JsonFileTaskStore**: 本番用のローカル永続化
//! - **InMemoryTaskStore**: テスト・開発用

pub mod json_file_store;
pub mod memory_store;

pub use self::json_file_store::JsonFileTaskStore;
pub use self::memory_store::InMemoryTaskStore;

//! recall-core
//!
//! 永続 task engine と spaced-repetition scheduling の core。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, memo, card, review, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, MemoStore, CardStore, StatsStore, CardGenerator, Clock）
//! - **app**: アプリケーションロジック（builder, runner, worker_loop, reaper_loop, services）
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry, TaskFactory, PayloadCodec）
//! - **tasks**: task 実装（memo generation）
//! - **srs**: 復習間隔の計算
//! - **impls**: store 実装（in-memory / SQLite）
//! - **config / observability**: 設定ファイルと tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod srs;
pub mod tasks;
pub mod typed;

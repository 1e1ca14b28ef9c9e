//! # emberdb
//!
//! An embeddable, persistent key-value storage engine built on a
//! **Log-Structured Merge Tree (LSM-tree)** architecture. Designed for
//! fast writes and crash-safe operation.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     Engine                           │
//! │  ┌────────────┐  ┌──────────────┐  ┌─────────────┐  │
//! │  │  Active     │  │   Flushing   │  │    Runs     │  │
//! │  │  Memtable   │  │   Memtable   │  │  (on disk)  │  │
//! │  └─────┬───────┘  └──────┬───────┘  └──────┬──────┘  │
//! │        │   freeze        │   flush         │         │
//! │        └─────────►       └────────►        │         │
//! │                                            │         │
//! │  ┌──────────────────────────────────────────┘         │
//! │  │  Compaction (merges the two newest runs)          │
//! │  └───────────────────────────────────────────────────┘│
//! │                                                      │
//! │  ┌──────────────────────────────────────────────────┐ │
//! │  │     Filter (fixed-size, never cleared)           │ │
//! │  └──────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Core storage engine — open, read, write, flush, compact |
//! | [`ordered_index`] | In-memory, hand-rolled binary search tree behind the memtable |
//! | [`run`] | Immutable, sorted, on-disk sequences with a sparse index |
//! | [`filter`] | Fixed-size probabilistic membership filter |
//! | [`wal`] | Line-delimited, pipe-separated write-ahead log with replay |
//!
//! ## Key Features
//!
//! - **Write-ahead logging** — every mutation is persisted to a WAL before
//!   being acknowledged, guaranteeing durability and crash recovery.
//! - **Tombstone deletes** — deletes shadow older copies regardless of
//!   whether the key was present in the active memtable.
//! - **Probabilistic filter lookups** — a single engine-wide filter gives a
//!   fast negative-lookup shortcut ahead of any on-disk scan.
//! - **CRC32 record integrity** — every Run payload record is checksummed.
//! - **Bounded compaction** — the background compactor merges the two
//!   newest runs on a configurable period, keeping the read-side fan-out
//!   small without a full-tree rewrite.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use emberdb::engine::{Engine, EngineConfig};
//!
//! let config = EngineConfig::default();
//! let engine = Engine::open("/tmp/my_db", config).unwrap();
//!
//! // Write
//! engine.put(b"hello", b"world").unwrap();
//!
//! // Read
//! assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
//!
//! // Delete
//! engine.delete(b"hello").unwrap();
//! assert_eq!(engine.get(b"hello").unwrap(), None);
//!
//! // Graceful shutdown
//! engine.close().unwrap();
//! ```

#![allow(dead_code)]

pub mod engine;
pub mod filter;
pub mod ordered_index;
pub mod run;
pub mod wal;

pub use engine::{Engine, EngineConfig, EngineError, EngineStats};

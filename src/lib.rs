//! # Code Index
//!
//! Incremental indexing of a local source tree into a remote conversation
//! context (an OpenAI-compatible Threads API).
//!
//! Each run scans the project root, hashes every candidate file, and only
//! re-chunks and re-uploads files whose content changed or whose previous
//! upload did not complete. Per-chunk upload results are persisted as they
//! arrive, so a failed chunk never loses its siblings' progress and a
//! status report is always available.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌──────────┐
//! │ Scanner  │──▶│  Change  │──▶│ Chunker │──▶│  Upload  │──▶ Threads API
//! │ globs    │   │ sha-256  │   │ windows │   │ per chunk│
//! └──────────┘   └────┬─────┘   └────┬────┘   └────┬─────┘
//!                     │              │             │
//!                     ▼              ▼             ▼
//!                ┌─────────────────────────────────────┐
//!                │   IndexStore (SQLite / in-memory)   │
//!                └─────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cidx init
//! cidx project add demo ./my-repo      # prints the project id
//! cidx index <project-id>
//! cidx status <project-id> --json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Error taxonomy |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`models`] | Projects, files, chunks, statuses |
//! | [`scanner`] | Include/exclude/size/binary filtering of the tree |
//! | [`change`] | Content hashing and regeneration decisions |
//! | [`chunk`] | Overlapping fixed-size text windows |
//! | [`remote`] | Knowledge-store abstraction and Threads client |
//! | [`upload`] | Per-chunk upload with failure isolation |
//! | [`status`] | File/project status aggregation and reports |
//! | [`ingest`] | Indexing run orchestration |
//! | [`progress`] | Progress reporting on stderr |
//! | [`store`] | Persistence trait, SQLite and in-memory stores |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |
//! | [`project`] | Project registration commands |
//! | [`report`] | Status report rendering |

pub mod change;
pub mod chunk;
pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod project;
pub mod remote;
pub mod report;
pub mod scanner;
pub mod status;
pub mod store;
pub mod upload;

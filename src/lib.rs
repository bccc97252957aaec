//! # Ticket Harness
//!
//! Turns heterogeneous exports of historical support tickets into a
//! searchable semantic index, and answers "what fixed this before?" with
//! ranked similar tickets and an optional generated recommendation.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌──────────────┐
//! │  Sources  │──▶│ Normalizer │──▶│ Documents │──▶│ Vector Index │
//! │ csv/json/ │   │  snapshot  │   │   JSONL   │   │ flat + ids + │
//! │   xlsx    │   │    CSV     │   │           │   │   metadata   │
//! └───────────┘   └────────────┘   └───────────┘   └──────┬───────┘
//!                                                         │
//!                                 ┌───────────────────────┤
//!                                 ▼                       ▼
//!                           ┌──────────┐           ┌────────────┐
//!                           │   CLI    │           │    HTTP    │
//!                           │  (tix)   │           │ /search    │
//!                           └──────────┘           │ /recommend │
//!                                                  └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! tix prepare                       # read sources, write snapshot + documents
//! tix build                         # embed documents, persist the index
//! tix search "VPN keeps dropping"
//! tix serve                         # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Pipeline error taxonomy |
//! | [`models`] | Core data types |
//! | [`sources`] | Tabular source reader |
//! | [`normalize`] | Column, id, date, and text normalization |
//! | [`documents`] | Document builder |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Exact inner-product index and persistence |
//! | [`candidates`] | Candidate assembly and status badges |
//! | [`generation`] | Text generation and recommendations |
//! | [`ingest`] | Batch pipeline stages |
//! | [`search`] | CLI search and recommend |
//! | [`server`] | HTTP query service |

pub mod candidates;
pub mod config;
pub mod documents;
pub mod embedding;
pub mod error;
pub mod generation;
mod http;
pub mod index;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod search;
pub mod server;
pub mod sources;

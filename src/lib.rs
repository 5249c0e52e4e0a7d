//! docmux - ranked, deduplicated search across many documentation sources.
//!
//! One free-text query is expanded into variants, each variant is run
//! against a full-text engine, and the merged candidates are classified,
//! scored by match tier and source boosts, filtered by dialect, and cut
//! down to a diverse, deterministic result list. The engine is any
//! [`Retriever`]; a [Tantivy](https://github.com/quickwit-oss/tantivy)
//! index and an in-memory scan ship with the crate.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docmux::{DataDir, RankingConfig, SearchIndex};
//! use docmux::search::{SearchOptions, Searcher};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config = RankingConfig::load_or_default(&data_dir.config_file(None));
//! let index = Arc::new(SearchIndex::open(&data_dir.index_dir().unwrap()).unwrap());
//!
//! let outcome = Searcher::new(&config, index)
//!     .search("wizard", &SearchOptions::default());
//! for r in &outcome.results {
//!     println!("{}:{} ({:.1})", r.library_id, r.candidate.path, r.final_score);
//! }
//! if let Some(reason) = outcome.reason {
//!     println!("{}", reason.hint());
//! }
//! ```

pub mod classify;
pub mod cli;
pub mod config;
pub mod data_dir;
pub mod doc_id;
pub mod error;
pub mod expand;
pub mod flavor;
pub mod ingest;
pub mod memory;
pub mod retriever;
pub mod score;
pub mod search;
pub mod select;
pub mod similarity;
pub mod tantivy_index;
pub mod text_util;

pub use config::RankingConfig;
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use error::{Error, Result};
pub use memory::MemoryRetriever;
pub use retriever::{CandidateDocument, Retriever, ScoreOrder};
pub use search::{SearchOptions, SearchOutcome, search_with_fallback};
pub use tantivy_index::{IndexDocument, SearchIndex};

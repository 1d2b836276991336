pub mod config;
pub mod edge;
pub mod error;
pub mod grammar;
pub mod ingest;
pub mod level;
pub mod node;
pub mod reference;
pub mod report;
pub mod schema;
pub mod storage;
pub mod verify;
pub mod writer;

pub use config::{ConcurrencyConfig, DocumentDefaults, IngestConfig, WriterConfig};
pub use edge::{Edge, EdgeType};
pub use error::{Error, Result};
pub use grammar::{GrammarConfig, NumberingGrammar};
pub use ingest::{DocumentMeta, IngestPipeline, SourceDocument};
pub use level::LevelKind;
pub use node::{Node, NodeId, NodeKind};
pub use reference::{CitationConfig, ReferenceResolver, UnresolvedReference};
pub use report::{ErrorKind, FailureEntry, RunReport};
pub use schema::{SchemaConfig, SchemaRegistry};
pub use storage::{GraphStats, GraphStore, NodeQuery, SqliteGraphStore};
pub use verify::{verify_nesting, VerifyReport};
pub use writer::{GraphWriter, RetryPolicy, WriteReport};

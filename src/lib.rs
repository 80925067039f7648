pub mod core;
pub mod storage;
pub mod analysis;
pub mod schema;
pub mod index;
pub mod search;
pub mod query;
pub mod writer;
pub mod parallel;

pub use crate::core::config::Config;
pub use crate::core::database::Database;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{Row, RowId};
pub use crate::query::ast::{Relation, SearchStatement, SortOrder};
pub use crate::schema::schema::{FieldDefinition, FieldType, OnDelete, TableStructure, TableType};

/*
┌──────────────────────────────────────── FLATBASE ─────────────────────────────────────────┐
│                                                                                            │
│  Database (core::database)                                                                 │
│  • config: Config              • catalog: ProjectCatalog      • locks: Arc<LockManager>    │
│  • indexer: TextIndexer        • storage: StorageLayout       • file lock on .lock         │
│                                                                                            │
│        │ parse (query::definition / query::parser)                                         │
│        ▼                                                                                   │
│  ┌──────────────────────┐     ┌────────────────────────┐     ┌──────────────────────────┐  │
│  │ QueryEngine          │     │ MutationCoordinator    │     │ TextIndexer              │  │
│  │ (search::executor)   │◄────│ (writer::mutation)     │────►│ (parallel::indexer)      │  │
│  │ • QueryPlanner plan  │     │ • validate / unique    │     │ • crossbeam queues       │  │
│  │ • ClauseFilter       │     │ • DeletePlan cascade   │     │ • txtinstrs/ journals    │  │
│  │ • results pipeline   │     │ • row_index            │     │ • Analyzer::full_text    │  │
│  └──────────┬───────────┘     └───────────┬────────────┘     └────────────┬─────────────┘  │
│             ▼                             ▼                               ▼                │
│  ┌────────────────────────────────────────────────────────────────────────────────────┐   │
│  │ TableContext (core::table): structures{N} + RowStore + FieldIndexManager           │   │
│  │   RowStore        data.flaa1 / data.flaa2           (storage::segment)             │   │
│  │   FieldIndex      {field}_indexes.flaa1 / .flaa2    value -> roaring ids           │   │
│  │   LikeIndex       likeindexes/{field}/{char}/{id}                                  │   │
│  │   TextIndex       tindexes/{field}/{word}/{id} = term frequency                    │   │
│  └────────────────────────────────────────────────────────────────────────────────────┘   │
│                                                                                            │
│  Lock order: projects -> project -> tables sorted by name (core::locks)                    │
└────────────────────────────────────────────────────────────────────────────────────────────┘
*/

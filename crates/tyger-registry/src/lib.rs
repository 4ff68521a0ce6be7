//! The buffer registry (C5) and codespec registry (C6): eTag-guarded
//! record stores layered on [`tyger_store::RecordStore`], generalizing
//! a single-plan `StateStore`
//! to many independently keyed, independently versioned records.

mod buffer;
mod codespec;

pub use buffer::{BufferPatch, BufferRecord, BufferRegistry, PurgeQueue, TagFilters};
pub use codespec::{CodespecHistory, CodespecRegistry, PutOutcome};

//! Query descriptor layer.
//!
//! Call arguments (typed builders or the RPC encoding) are validated against
//! entity metadata and normalized into [`QueryDescriptor`]s.

pub mod criteria;
pub mod descriptor;
pub mod filter;
pub mod rpc;

pub use criteria::{Direction, Query, SortKey, sort_from_json};
pub use descriptor::{
    Count, Delete, DescriptorBuilder, Insert, QueryDescriptor, Select, Update, Upsert, ValueRows,
};
pub use filter::{Comparison, Filter};
pub use rpc::{RpcQuery, conflict_paths_from_json};

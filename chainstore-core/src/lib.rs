//! chainstore core - Shared Types
//!
//! Plain data types shared by every other crate in the workspace: object
//! identifiers, the object-type table, immutable snapshots, the tri-state
//! [`Lookup`] result, the error taxonomy, configuration, and the contract of
//! the remote object database ([`DatabaseApi`]).
//!
//! Nothing here performs I/O or owns long-lived state. The cache engine
//! itself lives in `chainstore-cache`.

pub mod config;
pub mod error;
pub mod id;
pub mod kind;
pub mod lookup;
pub mod remote;
pub mod snapshot;
pub mod time;
pub mod validation;

pub use config::{ConfigLoadError, StoreConfig};
pub use error::{ConfigError, RpcError, StoreError, StoreResult, SyncError, ValidationError};
pub use id::{ObjectId, VoteId, IMPLEMENTATION_SPACE, PROTOCOL_SPACE, RELATIVE_PROTOCOL_SPACE};
pub use kind::{KindTable, ObjectKind, TypeTable};
pub use lookup::Lookup;
pub use remote::{DatabaseApi, FullAccount, RpcResult, SubscriptionHandler, UpdateEntry};
pub use snapshot::{deep_merge, id_set, Snapshot};
pub use time::{format_chain_time, parse_chain_time};
pub use validation::{is_account_name, validate_account_name};

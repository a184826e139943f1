//! chainstore cache - Client-Side Consistency Cache
//!
//! A [`ChainStore`] sits between application code and a remote blockchain
//! object database reached through [`DatabaseApi`](chainstore_core::DatabaseApi).
//! It answers reads synchronously from an in-memory Object Table, fetches
//! misses in the background with at most one outstanding request per key,
//! keeps secondary indices (name, symbol, key, vote id, address) and
//! denormalized parent links current as objects arrive, and tells
//! observers about changes at most once per dispatch window.
//!
//! # Example
//!
//! ```ignore
//! let store = ChainStore::with_defaults(Arc::new(api))?;
//! store.init().await?;
//!
//! match store.get_account("alice")? {
//!     Lookup::Found(account) => println!("{:?}", account.get("name")),
//!     Lookup::Missing => println!("no such account"),
//!     Lookup::Loading => {} // an observer fires once it arrives
//! }
//!
//! let assets = store.fetch_assets(&["BTS", "1.3.121"]).await?;
//! ```

mod account;
mod clock;
mod coalescer;
mod dispatch;
mod fetch;
mod history;
mod index;
mod lifecycle;
mod resolver;
mod state;
mod store;
mod table;
mod votes;

pub use account::{member_status, MemberStatus};
pub use clock::{participation_rate, ClockOffsets};
pub use coalescer::Observer;
pub use index::{Index, IndexEntry, KeyedFlights};
pub use state::SyncState;
pub use store::ChainStore;
pub use table::{ObjectTable, Resolution};

pub use chainstore_core::{Lookup, ObjectId, Snapshot, StoreConfig, StoreError, StoreResult, VoteId};
pub use chainstore_events::DomainEvent;

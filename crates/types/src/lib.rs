//! Domain types shared across the estuary ingest pipeline.
//!
//! These are plain data types with no behavior beyond construction,
//! canonical serialization, and hashing: entity hashes, heights, timestamps,
//! difficulty and chain score arithmetic, blocks and transactions, and the
//! hashed "element" wrappers the pipelines decorate as an input moves
//! through the consumer chain.

mod block;
mod difficulty;
mod element;
mod hash;
mod identity;
mod range;
mod score;
mod source;
mod time;
mod transaction;

pub use block::Block;
pub use difficulty::Difficulty;
pub use element::{BlockElement, TransactionElement, TransactionInfo};
pub use hash::{compute_merkle_root, Hash, HexError};
pub use identity::{Address, NodeId, PublicKey};
pub use range::{AnnotatedBlockRange, AnnotatedTransactionRange, Height};
pub use score::{ChainScore, ScoreDelta};
pub use source::InputSource;
pub use time::{system_time_supplier, Timestamp, TimeSupplier};
pub use transaction::Transaction;

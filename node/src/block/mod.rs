pub(crate) mod buffer;
pub(crate) mod builder;
pub(crate) mod types;

pub use buffer::{BufferError, TrxBuffer};
pub use builder::{BlockBuildError, BlockBuilder, BlockSink};
pub use types::block::{Block, BlockHeader};
pub use types::trx::{Trx, TrxBundle};

mod root;
mod shard;

pub use root::Config;
pub use shard::Shard;

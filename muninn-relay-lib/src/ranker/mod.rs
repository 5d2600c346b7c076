mod probe;
mod select;

pub use probe::{decode_bloat, encode_bloat, udping, BAD_PING, PING_LEN};
pub use select::{closest_not_exceeding, select_best};

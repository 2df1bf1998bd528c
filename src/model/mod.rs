//! Data & utilities: the key/value types, identifiers, and the byte buffer
//! used to frame wire messages. Grounded in
//! `original_source/src/common/{key,value,request}.h`, reshaped into owned,
//! immutable Rust value types per spec §3.

mod buffer;
mod ids;
mod key;
mod request;
mod value;

pub use buffer::ByteBuffer;
pub use ids::{EdgeIdx, RequestId};
pub use key::Key;
pub use request::Request;
pub use value::Value;

/// 32-bit byte counts, per spec §3.
pub type ObjectSize = u32;
pub type KeySize = u32;
pub type ValueSize = u32;

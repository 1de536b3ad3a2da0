//! Persistence primitives shared by the stores.

pub mod atomic;
pub mod record_store;
pub mod vector_index;

pub use atomic::{write_atomic, write_json_atomic};
pub use record_store::{
    RawRecord, RecordWrite, SqliteRecordStore, decode_records, decode_vector, encode_vector,
};
pub use vector_index::{VectorHit, VectorIndex, cosine_similarity};

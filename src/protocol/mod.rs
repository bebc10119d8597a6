//! Wire protocol shared by every broadcast transport

pub mod codec;

pub use codec::{
    decode_payload, encode_snapshot, FrameReader, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE, MAGIC,
    VERSION,
};

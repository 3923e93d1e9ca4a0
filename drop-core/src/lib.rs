//! codedrop protocol core.
//! No network I/O: hosts own the sockets and the clock and call into these helpers.

pub mod code;
pub mod integrity;
pub mod logging;
pub mod protocol;
pub mod registry;
pub mod wire;

pub use code::{generate_code, is_valid_code, CODE_ALPHABET, CODE_LEN};
pub use integrity::{compress, decompress, verify_checksum, ChecksumMismatch, Compressed};
pub use protocol::{
    sanitize_filename, sanitize_relative_path, Command, CommandError, ObjectKind, ObjectMetadata,
    PathError, Response, ResponseParseError,
};
pub use registry::{PeerRecord, Registry, DEFAULT_PEER_TTL, DEFAULT_SWEEP_INTERVAL};
pub use wire::{decode_metadata, encode_metadata, is_ack, MetadataDecodeError, MetadataEncodeError, ACK};

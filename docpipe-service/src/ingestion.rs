//! In-process ingestion helpers: content hashing, sentence segmentation and
//! the transient blob store that holds uploads until they are finalized.

pub mod blob;
pub mod hash;
pub mod segment;

pub use blob::BlobStore;
pub use hash::compute_content_hash;
pub use segment::split_sentences;

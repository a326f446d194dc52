pub mod blob_id;
pub mod error;

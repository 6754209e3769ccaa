mod object_store;
mod s3_store;

pub use object_store::{ObjectStore, StoredObject};
pub use s3_store::{create_s3_client, S3ObjectStore};

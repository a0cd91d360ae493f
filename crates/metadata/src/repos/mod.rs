//! Repository traits for metadata operations.

pub mod clients;
pub mod upload_records;
pub mod usage;

pub use clients::ClientRepo;
pub use upload_records::UploadRecordRepo;
pub use usage::UsageRepo;

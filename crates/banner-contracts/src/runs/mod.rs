pub mod receipts;
pub mod revisions;
pub mod summary;

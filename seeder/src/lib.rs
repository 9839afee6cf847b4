//! Metro demo dataset seeding: load the bundled demo dataset, convert ISO
//! date strings into store timestamps, and upsert each collection into
//! Firestore as one atomic batch.

pub mod bundle;
pub mod config;
pub mod credentials;
pub mod dataset;
pub mod dates;
pub mod firestore;
pub mod import;
pub mod store;
pub mod types;

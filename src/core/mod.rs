pub mod codec;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod instance;
pub mod reconcile;
pub mod schedule;
pub mod schema;
pub mod store;
pub mod time;

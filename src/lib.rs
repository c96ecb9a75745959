pub mod bridge;
pub mod cache;
pub mod config;
pub mod content;
pub mod embedded;
pub mod gateway;
pub mod ledger;
pub mod security;
pub mod sync;

pub use bridge::{BridgeMessage, Envelope, OriginGuard};
pub use config::BridgeConfig;
pub use content::ContentStore;
pub use ledger::{ChangeLedger, FieldChange, FieldType};
pub use sync::SyncCoordinator;

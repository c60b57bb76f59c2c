pub mod collaborators;
pub mod events;
pub mod gateway;
pub mod init;
pub mod lifecycle;
pub mod teams;
pub mod temporal;

pub use events::{ClearReport, EventSyncEngine, ReconcileReport};
pub use gateway::{HttpGateway, RemoteGateway};

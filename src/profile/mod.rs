//! Profile records, their persistent store and their secret files.

pub mod secrets;
pub mod store;
pub mod types;

pub use secrets::SecretStore;
pub use store::ProfileRepository;
pub use types::{
    ActionKind, ActionOutcome, PortMapping, Profile, ProfileStatus, ProfileStore, ResourceLimits,
    Resources, RuntimeStatus,
};

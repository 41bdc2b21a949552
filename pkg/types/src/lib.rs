//! Shared data model for the Inferno runtime: the VM record, the image
//! config carried into the guest as `run.json`, Kiln's own configuration,
//! the exit record merged from guest and VMM disposition, and the secret
//! store's wire types.

pub mod config;
pub mod exit;
pub mod secret;
pub mod validate;
pub mod vm;
pub mod volume;

pub use config::{ImageConfig, KilnConfig};
pub use exit::{ExitRecord, KilnExitStatus, KilnPartial};
pub use secret::{Secret, SecretMetadata};
pub use vm::{CpuKind, ResourceSpec, VmRecord};
pub use volume::{Mounts, UserConfig, Volume};

mod credentials;
pub mod engine;
pub mod paths;
pub mod remote;
pub mod transfer;

pub use credentials::CredentialsError;
pub use engine::{SyncEngine, SyncError, SyncOutcome};
pub use remote::{DriveRemote, RemoteDrive, RemoteError, RemoteImage, RemoteStream};

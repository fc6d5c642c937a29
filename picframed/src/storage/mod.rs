pub mod budget;
mod token_store;

pub use budget::{
    BudgetError, StorageBudget, StorageState, SystemVolumeProbe, VolumeProbe, VolumeUsage,
};
pub use token_store::{OAuthState, TokenStore, TokenStoreError};
pub(crate) use token_store::now_unix;

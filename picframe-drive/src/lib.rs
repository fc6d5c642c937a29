mod client;
mod oauth;

pub use client::{
    About, ApiErrorClass, ByteStream, DriveClient, DriveError, DriveFile, DriveUser, FileList,
    folder_images_query,
};
pub use oauth::{ClientSecrets, DRIVE_READONLY_SCOPE, OAuthClient, OAuthError, OAuthToken};

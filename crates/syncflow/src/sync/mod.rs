pub mod collaborators;
pub mod manual;
pub mod settings;
pub mod trigger;

pub use collaborators::{
    Activity, ActivityFetcher, ConfigProvider, SpreadsheetAccess, SpreadsheetInfo, TokenRefresher,
};
pub use manual::ManualSyncProcessor;
pub use settings::{OAuthCredentials, ProcessingConfig, Provider, RefreshedToken};
pub use trigger::{request_manual_sync, TriggerError};

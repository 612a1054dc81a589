pub mod config;
pub mod credentials;
pub mod endpoint;
pub mod error;
pub mod events;

pub use config::*;
pub use credentials::{Credential, CredentialEntry, CredentialProvider, InMemoryCredentials};
pub use endpoint::{
    normalize_server_url, BackendKind, CacheSettings, Endpoint, EndpointRegistry, ServerSettings,
    ServerVersion, WebhookImplementation, CLOUD_API_URL, CLOUD_SERVER_URL,
};
pub use error::{CoreError, Result};
pub use events::{
    ChangeType, EventKind, Head, HeadRevision, NormalizedEvent, ReindexRequest, RepositoryRef,
    Revision,
};

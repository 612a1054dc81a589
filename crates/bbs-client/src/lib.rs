//! Bitbucket Cloud and Server API clients
//!
//! Requests go through an [`AuthenticatedTransport`] that applies the retry
//! policy and shared connection limits. Listings are drained through the
//! [`PageCursor`] implementations, and expensive lookups go through the
//! per-endpoint [`EndpointCaches`].

pub mod api;
pub mod auth;
pub mod caches;
pub mod cloud;
pub mod error;
pub mod lazy;
pub mod models;
pub mod pagination;
pub mod server;
pub mod status;
pub mod transport;
mod urls;

pub use api::{BitbucketApi, ClientContext, ClientFactory};
pub use auth::{
    authenticator_for, AnonymousAuthenticator, Authenticator, BasicAuthenticator,
    BearerAuthenticator,
};
pub use caches::EndpointCaches;
pub use cloud::CloudClient;
pub use error::{ApiError, Result};
pub use lazy::{CommitResolver, LazyCommit};
pub use models::*;
pub use pagination::{fetch_all, page_size, CloudPage, PageCursor, ServerPage};
pub use server::ServerClient;
pub use status::{bounded_key, bounded_name};
pub use transport::{AuthenticatedTransport, ConnectionPool};

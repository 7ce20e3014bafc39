//! HTTP implementations of the flow collaborators.

pub mod backend;
pub mod identity;

pub use backend::HttpBackendGateway;
pub use identity::IdentityToolkitProvider;

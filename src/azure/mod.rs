//! Azure Resource Manager access: credentials, resource identifiers and the REST client.

pub mod auth;
pub mod client;
pub mod error;
pub mod resource_id;

pub use auth::{AuthSettings, AuthSource, CloudEnvironment, ResolvedCredentials, TokenCredential};
pub use client::{
    ArmClient, ArmClientExt, ArmRequest, ArmResponse, ClientSettings, HttpMethod, PollSettings,
    RestClient,
};
pub use error::{AzureError, AzureResult};
pub use resource_id::{expand_template, ResourceId};

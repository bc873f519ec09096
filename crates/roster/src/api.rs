//! Multi-credential access to the remote platform API.
//!
//! This module provides:
//! - [`Credential`] and [`CredentialPool`] with round-robin rotation
//! - [`CallGateway`], which paces, retries and classifies single calls
//! - [`BatchRequestCompiler`] implementations that bundle paginated sub-calls
//! - typed payloads ([`RemoteEntity`], [`ContentItem`], [`Page`])

pub mod credential;
pub mod error;
pub mod gateway;
pub mod methods;
pub mod privilege;
pub mod rate_limit;
pub mod script;
pub mod transport;
pub mod types;

pub use credential::{Credential, CredentialPool, CredentialStatus};
pub use error::{ApiError, ErrorClass, classify_code, short_error_message};
pub use gateway::{CallGateway, CallStatsSnapshot, GatewayPolicy};
pub use methods::Endpoint;
pub use privilege::{Privilege, PrivilegeError, filter_privileged};
pub use rate_limit::ApiRateLimiter;
pub use script::{
    BatchRequestCompiler, MAX_SUBCALLS_PER_SCRIPT, PageWindow, ScriptCompiler, SequentialCompiler,
    SubCall, fetch_fanout, fetch_window,
};
#[cfg(feature = "http")]
pub use transport::HttpRemoteApi;
pub use transport::{Params, RemoteApi};
pub use types::{
    ContentItem, EngagementHit, Page, Profile, RemoteEntity, decode_conversation_members,
    decode_page,
};

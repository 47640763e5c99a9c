//! # azcollection - Idempotent Azure Resource Manager modules
//!
//! azcollection provides Azure resource modules with the Ansible module interface:
//! each module takes a parameter map, makes the addressed resource match it, and
//! reports whether anything changed together with the resulting state.
//!
//! ## Core Concepts
//!
//! - **Modules**: one per resource type, plus generic REST modules for any ARM path
//! - **Argument specs**: declared parameters, validated before any network call
//! - **Resource definitions**: how a module's parameters map onto an ARM resource
//! - **Reconciler**: fetch, compare, then at most one create, update or delete
//! - **Client**: authenticated ARM transport with retries and long-running operation polling
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │          CLI harness (run / exec / list / doc)            │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │   Module registry  ──►  ArgumentSpec::validate            │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │   Reconciler (fetch → plan → mutate → report)             │
//! └───────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │   ArmClient (auth, retry, LRO polling)  ──►  ARM REST     │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use azcollection::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let registry = ModuleRegistry::with_builtins();
//!     let mut params = ModuleParams::new();
//!     params.insert("name".into(), json!("foo"));
//!     params.insert("location".into(), json!("eastus"));
//!
//!     let output = registry
//!         .execute("azure_rm_resourcegroup", &params, &ModuleContext::new())
//!         .await?;
//!     println!("{}", output.to_result_json());
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use crate::azure::{
        ArmClient, ArmClientExt, ArmRequest, ArmResponse, AzureError, HttpMethod, ResourceId,
        RestClient,
    };
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::modules::{
        ArgumentSpec, Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams,
        ModuleRegistry, ModuleResult, ParamExt, ParamSpec, ParamType,
    };
    pub use crate::reconcile::{
        Action, DesiredState, FieldRule, Outcome, Reconciler, ResourceDefinition, TagPolicy,
    };
}

pub mod azure;
pub mod config;
pub mod error;
pub mod modules;
pub mod reconcile;
pub mod retry;

pub use error::{Error, Result};

/// Version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Gateway API translation core for Portico
//!
//! This crate turns a snapshot of Gateway API resources into proxy
//! configuration:
//!
//! - **Query**: attaches routes to listeners, resolves backends, secrets and
//!   delegated routes while enforcing ReferenceGrants
//! - **Builder**: merges listeners by port and flattens routes into an IR of
//!   filter chains and virtual hosts
//! - **Translator**: lowers the IR to listeners, route configurations and
//!   clusters, running extension passes at fixed hook points
//! - **Reports**: accumulates conditions and builds Gateway API status

pub mod backend_map;
pub mod builder;
pub mod extensions;
pub mod gateway;
pub mod hostname;
pub mod ir;
pub mod parent_ref;
pub mod proxy;
pub mod query;
pub mod reports;
pub mod store;
pub mod tls;
pub mod translator;

// Bridge portico_common types into this crate's namespace.
pub(crate) use portico_common::{gateway_api, wellknown, Error};

pub use gateway::{GatewayTranslator, TranslationOutput};
pub use store::{ResourceStore, Snapshot};

/// Namespace/name pair used as a map key
pub type QualifiedName = (String, String);

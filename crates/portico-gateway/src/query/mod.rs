//! Query engine
//!
//! Answers the questions translation asks of a [`Snapshot`]:
//! which routes attach to which listener, what a backend ref resolves to,
//! which Secret a certificate ref names, and what tree a delegating
//! HTTPRoute expands into. Every cross-namespace answer is gated by a
//! ReferenceGrant.

mod backends;
mod delegation;
mod routes;

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use portico_common::config::Settings;
use portico_common::ObjectSource;
use thiserror::Error;

use crate::backend_map::BackendMap;
use crate::extensions::ExtensionRegistry;
use crate::gateway_api::{HttpRoute, ParentReference, TcpRoute};
use crate::ir::BackendObjectIr;
use crate::store::Snapshot;
use crate::wellknown::reason;

pub use backends::ResolvedBackend;
pub use routes::{ListenerResult, RouteError, RoutesForGateway};

/// Errors raised while resolving references and attaching routes
///
/// Each variant maps to the Gateway API condition reason it is reported as.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The referenced kind cannot be used here
    #[error("{group_kind} is not a supported kind")]
    InvalidKind {
        /// `group/kind` of the reference
        group_kind: String,
    },

    /// Cross-namespace reference without a matching ReferenceGrant
    #[error("reference from namespace {from_namespace} to {target} is not permitted by any ReferenceGrant")]
    MissingReferenceGrant {
        /// Namespace of the referencing object
        from_namespace: String,
        /// Referenced object
        target: String,
    },

    /// The referenced object does not exist
    #[error("{target} not found")]
    NotFound {
        /// Referenced object
        target: String,
    },

    /// A field holds a value that cannot be translated
    #[error("{message}")]
    UnsupportedValue {
        /// What is unsupported
        message: String,
    },

    /// A delegation ref matched no routes
    #[error("delegation to {target} matched no routes")]
    UnresolvedReference {
        /// The delegation target
        target: String,
    },

    /// A delegation ref closes a cycle
    #[error("delegation to {target} forms a cycle")]
    CyclicReference {
        /// The route that was revisited
        target: String,
    },

    /// No listener allows this route's kind or namespace
    #[error("no listener allows {kind} from namespace {namespace}")]
    NotAllowedByListeners {
        /// Route kind
        kind: String,
        /// Route namespace
        namespace: String,
    },

    /// No listener matched the parent ref's section name and port
    #[error("no listener matches the parent ref")]
    NoMatchingParent,

    /// Listener and route hostnames do not intersect
    #[error("no listener hostname intersects the route hostnames")]
    NoMatchingListenerHostname,

    /// Listener uses `from: Selector` without a selector
    #[error("listener {listener} selects namespaces but has no selector")]
    MissingSelector {
        /// Listener name
        listener: String,
    },
}

impl QueryError {
    /// Condition reason this error is reported with
    pub fn reason(&self) -> &'static str {
        match self {
            QueryError::InvalidKind { .. } => reason::INVALID_KIND,
            QueryError::MissingReferenceGrant { .. } => reason::REF_NOT_PERMITTED,
            QueryError::NotFound { .. } => reason::BACKEND_NOT_FOUND,
            QueryError::UnsupportedValue { .. } => reason::UNSUPPORTED_VALUE,
            QueryError::UnresolvedReference { .. } => reason::UNRESOLVED_REFERENCE,
            QueryError::CyclicReference { .. } => reason::CYCLIC_REFERENCE,
            QueryError::NotAllowedByListeners { .. } => reason::NOT_ALLOWED_BY_LISTENERS,
            QueryError::NoMatchingParent => reason::NO_MATCHING_PARENT,
            QueryError::NoMatchingListenerHostname => reason::NO_MATCHING_LISTENER_HOSTNAME,
            QueryError::MissingSelector { .. } => reason::MISSING_SELECTOR,
        }
    }

    /// Whether this error prevents the route from attaching at all
    ///
    /// Attachment errors are reported as `Accepted=False`; the rest as
    /// `ResolvedRefs=False`.
    pub fn is_attachment_error(&self) -> bool {
        matches!(
            self,
            QueryError::NotAllowedByListeners { .. }
                | QueryError::NoMatchingParent
                | QueryError::NoMatchingListenerHostname
        )
    }
}

impl From<QueryError> for portico_common::Error {
    fn from(err: QueryError) -> Self {
        portico_common::Error::validation_for("route", err.to_string())
    }
}

/// Order creation timestamps oldest first; objects without one sort last
pub fn by_age(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// A route of any supported kind
#[derive(Clone, Debug)]
pub enum RouteObject {
    /// HTTPRoute
    Http(Arc<HttpRoute>),
    /// TCPRoute
    Tcp(Arc<TcpRoute>),
}

impl RouteObject {
    /// Object source of the route
    pub fn source(&self) -> ObjectSource {
        match self {
            RouteObject::Http(r) => ObjectSource::from_resource(r.as_ref()),
            RouteObject::Tcp(r) => ObjectSource::from_resource(r.as_ref()),
        }
    }

    /// Route namespace
    pub fn namespace(&self) -> String {
        match self {
            RouteObject::Http(r) => r.namespace().unwrap_or_default(),
            RouteObject::Tcp(r) => r.namespace().unwrap_or_default(),
        }
    }

    /// Route name
    pub fn name(&self) -> String {
        match self {
            RouteObject::Http(r) => r.name_any(),
            RouteObject::Tcp(r) => r.name_any(),
        }
    }

    /// `metadata.generation`
    pub fn generation(&self) -> Option<i64> {
        match self {
            RouteObject::Http(r) => r.metadata.generation,
            RouteObject::Tcp(r) => r.metadata.generation,
        }
    }

    /// `metadata.creationTimestamp`
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let ts = match self {
            RouteObject::Http(r) => r.metadata.creation_timestamp.as_ref(),
            RouteObject::Tcp(r) => r.metadata.creation_timestamp.as_ref(),
        };
        ts.map(|t| t.0)
    }

    /// Parent refs declared on the route
    pub fn parent_refs(&self) -> &[ParentReference] {
        match self {
            RouteObject::Http(r) => &r.spec.parent_refs,
            RouteObject::Tcp(r) => &r.spec.parent_refs,
        }
    }

    /// The HTTPRoute, if this is one
    pub fn as_http(&self) -> Option<&Arc<HttpRoute>> {
        match self {
            RouteObject::Http(r) => Some(r),
            RouteObject::Tcp(_) => None,
        }
    }

    /// The TCPRoute, if this is one
    pub fn as_tcp(&self) -> Option<&Arc<TcpRoute>> {
        match self {
            RouteObject::Tcp(r) => Some(r),
            RouteObject::Http(_) => None,
        }
    }
}

/// A route attached to a listener, with its references resolved
#[derive(Clone, Debug)]
pub struct RouteInfo {
    /// The route
    pub object: RouteObject,
    /// Ref this route attached through: a Gateway ref, or the delegating
    /// HTTPRoute for children
    pub parent_ref: ParentReference,
    /// Gateway ref of the listener at the root of the chain
    pub listener_parent_ref: ParentReference,
    /// Hostnames after intersection with the listener
    pub hostnames: Vec<String>,
    /// Resolved non-route backends
    pub backends: BackendMap<BackendObjectIr>,
    /// Delegated children per HTTPRoute backend ref
    pub children: BackendMap<Vec<Arc<RouteInfo>>>,
    /// Delegation errors that did not replace a resolution, such as a cycle
    /// through one member of a wildcard delegation
    pub delegation_errors: Vec<QueryError>,
}

impl RouteInfo {
    /// Whether this route was reached through delegation
    pub fn is_delegated(&self) -> bool {
        self.parent_ref != self.listener_parent_ref
    }
}

/// Read-only queries against a snapshot
pub struct GatewayQueries<'a> {
    snapshot: &'a Snapshot,
    registry: &'a ExtensionRegistry,
    settings: &'a Settings,
}

impl<'a> GatewayQueries<'a> {
    /// Create a query engine over a snapshot
    pub fn new(
        snapshot: &'a Snapshot,
        registry: &'a ExtensionRegistry,
        settings: &'a Settings,
    ) -> Self {
        Self {
            snapshot,
            registry,
            settings,
        }
    }

    /// The snapshot queries run against
    pub fn snapshot(&self) -> &'a Snapshot {
        self.snapshot
    }

    /// The extension registry backend kinds are resolved through
    pub fn registry(&self) -> &'a ExtensionRegistry {
        self.registry
    }

    /// Translator settings
    pub fn settings(&self) -> &'a Settings {
        self.settings
    }
}

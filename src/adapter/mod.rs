//! Resource adapter layer
//!
//! Adapters translate between the local graph's requests and a remote API's
//! wire format; transports carry the resulting wire requests.

mod cancel;
mod paginator;
mod rest;
mod traits;
mod transport;
mod types;

pub use cancel::CancellationToken;
pub use paginator::{FnPaginator, LimitOffsetPaginator, PagePerPagePaginator, Paginator};
pub use rest::{pluralize, RestAdapter};
pub use traits::{AdapterCapabilities, AdapterError, ResourceAdapter};
pub use transport::{HttpTransport, Transport, TransportError};
pub use types::{
    Method, Representation, Representations, RequestContext, RequestTarget, WireRequest,
    WireResponse,
};

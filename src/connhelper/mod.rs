pub mod buildx;

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock, RwLock};

use futures::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

pub use buildx::{CommandConn, buildx};

/// A bidirectional byte stream to a build daemon.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Connection for T {}

pub type ContextDialer = Arc<dyn Fn() -> BoxFuture<'static, io::Result<Box<dyn Connection>>> + Send + Sync>;

/// Builds a helper from a parsed address; registered per URL scheme.
pub type HelperFactory = fn(&Url) -> Result<ConnectionHelper, ConnHelperError>;

#[derive(thiserror::Error, Debug)]
pub enum ConnHelperError {
    #[error("invalid connection address {addr:?}: {source}")]
    InvalidUrl {
        addr: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{scheme} connection helper does not support path elements: {url}")]
    PathNotSupported { scheme: &'static str, url: String },
    #[error("{scheme} connection helper does not support query or fragment: {url}")]
    QueryNotSupported { scheme: &'static str, url: String },
}

/// Dialer for one builder address. Creating it runs nothing.
#[derive(Clone)]
pub struct ConnectionHelper {
    pub context_dialer: ContextDialer,
}

impl ConnectionHelper {
    pub fn new(context_dialer: ContextDialer) -> Self {
        Self { context_dialer }
    }

    pub fn dial(&self) -> BoxFuture<'static, io::Result<Box<dyn Connection>>> {
        (self.context_dialer)()
    }
}

impl fmt::Debug for ConnectionHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHelper").finish_non_exhaustive()
    }
}

/// Scheme to factory table.
#[derive(Default)]
pub struct ConnectionHelperRegistry {
    helpers: RwLock<HashMap<String, HelperFactory>>,
}

impl ConnectionHelperRegistry {
    pub fn register(&self, scheme: &str, factory: HelperFactory) {
        let mut helpers = self.helpers.write().unwrap_or_else(|e| e.into_inner());
        helpers.insert(scheme.to_ascii_lowercase(), factory);
    }

    /// `Ok(None)` when no helper claims the address's scheme.
    pub fn get(&self, addr: &str) -> Result<Option<ConnectionHelper>, ConnHelperError> {
        let url = Url::parse(addr).map_err(|source| ConnHelperError::InvalidUrl {
            addr: addr.to_string(),
            source,
        })?;
        let factory = {
            let helpers = self.helpers.read().unwrap_or_else(|e| e.into_inner());
            helpers.get(url.scheme()).copied()
        };
        factory.map(|f| f(&url)).transpose()
    }
}

fn default_registry() -> &'static ConnectionHelperRegistry {
    static REGISTRY: OnceLock<ConnectionHelperRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let registry = ConnectionHelperRegistry::default();
        registry.register(buildx::SCHEME, buildx);
        registry
    })
}

pub fn register_connection_helper(scheme: &str, factory: HelperFactory) {
    default_registry().register(scheme, factory);
}

pub fn get_connection_helper(addr: &str) -> Result<Option<ConnectionHelper>, ConnHelperError> {
    default_registry().get(addr)
}

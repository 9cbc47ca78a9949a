// homedash-api: health probes for the local services behind the dashboard

pub mod error;
pub mod probe;
pub mod transport;

pub use error::Error;
pub use probe::{BridgeInfo, HealthClient, ProbeReport, ProbeTarget, ProxyHealth};
pub use transport::{DEFAULT_PROBE_TIMEOUT, TransportConfig};

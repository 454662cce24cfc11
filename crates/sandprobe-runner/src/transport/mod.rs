//! Concrete transports and construction from configuration.

pub mod http;
pub mod process;

use std::sync::Arc;

use sandprobe_core::{HarnessConfig, HarnessError, Result, TransportKind};
use tracing::info;

use crate::invoke::TargetInvoker;

pub use http::HttpTransport;
pub use process::ProcessTransport;

/// Build the transport named by `[transport]`.
pub fn build_invoker(config: &HarnessConfig) -> Result<Arc<dyn TargetInvoker>> {
    let transport = &config.transport;
    match transport.kind {
        TransportKind::Process => {
            info!(launcher = ?transport.launcher, "using process transport");
            Ok(Arc::new(
                ProcessTransport::new()
                    .with_launcher(transport.launcher.clone())
                    .with_default_dir(&config.sandbox.dir),
            ))
        }
        TransportKind::Http => {
            let endpoint = transport.endpoint.clone().ok_or_else(|| {
                HarnessError::config("transport.endpoint is required for the http transport")
            })?;
            let api_key = match &transport.api_key_env {
                Some(var) => Some(std::env::var(var).map_err(|_| {
                    HarnessError::TransportSetup(format!("environment variable {var} is not set"))
                })?),
                None => None,
            };
            info!(endpoint = %endpoint, "using http transport");
            Ok(Arc::new(HttpTransport::new(endpoint, api_key)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_process_by_default() {
        let invoker = build_invoker(&HarnessConfig::default()).unwrap();
        assert_eq!(invoker.name(), "process");
    }

    #[test]
    fn test_build_http_requires_endpoint() {
        let mut cfg = HarnessConfig::default();
        cfg.transport.kind = TransportKind::Http;
        assert!(build_invoker(&cfg).is_err());

        cfg.transport.endpoint = Some("http://127.0.0.1:50055/execute".into());
        assert_eq!(build_invoker(&cfg).unwrap().name(), "http");
    }

    #[test]
    fn test_missing_api_key_env_is_setup_error() {
        let mut cfg = HarnessConfig::default();
        cfg.transport.kind = TransportKind::Http;
        cfg.transport.endpoint = Some("http://127.0.0.1:50055/execute".into());
        cfg.transport.api_key_env = Some("SANDPROBE_TEST_KEY_THAT_IS_NOT_SET".into());
        let err = build_invoker(&cfg).err().unwrap();
        assert!(matches!(err, HarnessError::TransportSetup(_)));
    }
}

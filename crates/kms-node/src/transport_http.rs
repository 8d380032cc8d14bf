//! The concrete [`Transport`]: each send is a JSON POST to the target peer's HTTP server.
//! A single peer being unreachable is logged and surfaced as [`TransportError::Request`],
//! never panics — callers decide whether the surviving peer count still clears threshold
//! (§7's transient transport failure category).

use async_trait::async_trait;

use kms_core::operator::Operator;
use kms_core::transport::{
    AckMessage, AuthenticatedEnvelope, BroadcastMessage, CommitmentMessage, ShareMessage, Transport,
    TransportError,
};

pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self { client: reqwest::Client::new() }
    }
}

impl HttpTransport {
    async fn post<T: serde::Serialize>(
        &self,
        to: &Operator,
        path: &str,
        envelope: &AuthenticatedEnvelope<T>,
    ) -> Result<(), TransportError> {
        let url = format!("http://{}{}", to.socket, path);
        let response = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| TransportError::Request(to.address, e.to_string()))?;

        if !response.status().is_success() {
            return Err(TransportError::Request(
                to.address,
                format!("peer returned status {}", response.status()),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_commitment(
        &self,
        to: &Operator,
        envelope: AuthenticatedEnvelope<CommitmentMessage>,
    ) -> Result<(), TransportError> {
        self.post(to, "/dkg/commitment", &envelope).await
    }

    async fn send_share(
        &self,
        to: &Operator,
        envelope: AuthenticatedEnvelope<ShareMessage>,
    ) -> Result<(), TransportError> {
        self.post(to, "/dkg/share", &envelope).await
    }

    async fn send_ack(
        &self,
        to: &Operator,
        envelope: AuthenticatedEnvelope<AckMessage>,
    ) -> Result<(), TransportError> {
        self.post(to, "/dkg/ack", &envelope).await
    }

    async fn send_broadcast(
        &self,
        to: &Operator,
        envelope: AuthenticatedEnvelope<BroadcastMessage>,
    ) -> Result<(), TransportError> {
        self.post(to, "/dkg/broadcast", &envelope).await
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sdclink.dev

//! HTTP discovery-proxy client (for networks where multicast is blocked).
//!
//! Carries the same six logical operations as the UDP engine, but as
//! HTTP POST request/response bodies against a configured proxy URL. The
//! bodies are the Wire Codec's envelopes, so a proxy speaking the UDP
//! dialect needs no translation layer.

use crate::config::{ADDRESS_ALL, ADDRESS_ANONYMOUS};
use crate::error::{Error, Result};
use crate::protocol;
use crate::protocol::types::{Action, Envelope, ProbeResolveMatch, QName, Scope, Service};
use std::net::SocketAddr;
use std::time::Duration;

/// Request timeout applied to every proxy exchange.
const PROXY_TIMEOUT: Duration = Duration::from_secs(10);

/// Unicast HTTP client for a central discovery proxy.
pub struct ProxyClient {
    url: String,
    client: reqwest::blocking::Client,
}

impl ProxyClient {
    /// Client for a plain (or default-trust TLS) proxy URL.
    pub fn new(url: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(PROXY_TIMEOUT)
            .build()
            .map_err(|err| Error::Proxy(err.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    /// Client trusting an additional PEM root certificate (private PKI
    /// deployments).
    pub fn with_root_certificate(url: &str, cert_pem: &[u8]) -> Result<Self> {
        let cert = reqwest::Certificate::from_pem(cert_pem)
            .map_err(|err| Error::Proxy(err.to_string()))?;
        let client = reqwest::blocking::Client::builder()
            .add_root_certificate(cert)
            .timeout(PROXY_TIMEOUT)
            .build()
            .map_err(|err| Error::Proxy(err.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            client,
        })
    }

    /// The configured proxy URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Announce a service to the proxy (Hello).
    pub fn publish(&self, service: &Service) -> Result<()> {
        let mut envelope = Envelope::new(Action::Hello);
        envelope.addr_to = Some(ADDRESS_ALL.to_string());
        envelope.epr = service.epr.clone();
        envelope.types = service.types.clone();
        envelope.scopes = service.scopes.clone();
        envelope.x_addrs = service.x_addrs.clone();
        envelope.metadata_version = service.metadata_version;
        envelope.instance_id = service.instance_id;
        envelope.message_number = service.message_number;
        self.post(&envelope)?;
        Ok(())
    }

    /// De-announce a service (Bye).
    pub fn clear(&self, epr: &str) -> Result<()> {
        let mut envelope = Envelope::new(Action::Bye);
        envelope.addr_to = Some(ADDRESS_ALL.to_string());
        envelope.epr = epr.to_string();
        self.post(&envelope)?;
        Ok(())
    }

    /// Query the proxy for matching services (Probe -> ProbeMatches).
    pub fn search(
        &self,
        types: Option<&[QName]>,
        scopes: Option<&[Scope]>,
    ) -> Result<Vec<Service>> {
        let mut envelope = Envelope::new(Action::Probe);
        envelope.addr_to = Some(ADDRESS_ALL.to_string());
        envelope.addr_reply_to = Some(ADDRESS_ANONYMOUS.to_string());
        envelope.types = types.map(<[QName]>::to_vec).unwrap_or_default();
        envelope.scopes = scopes.map(<[Scope]>::to_vec).unwrap_or_default();

        match self.post(&envelope)? {
            Some(reply) if reply.action == Action::ProbeMatches => Ok(reply
                .probe_resolve_matches
                .iter()
                .filter(|m| !m.epr.is_empty())
                .map(|m| match_to_service(m, &reply))
                .collect()),
            Some(reply) => Err(Error::Proxy(format!(
                "unexpected {} response to Probe",
                reply.action
            ))),
            None => Ok(Vec::new()),
        }
    }

    /// Resolve one endpoint reference (Resolve -> ResolveMatches).
    pub fn resolve(&self, epr: &str) -> Result<Option<Service>> {
        let mut envelope = Envelope::new(Action::Resolve);
        envelope.addr_to = Some(ADDRESS_ALL.to_string());
        envelope.epr = epr.to_string();

        match self.post(&envelope)? {
            Some(reply) if reply.action == Action::ResolveMatches => Ok(reply
                .probe_resolve_matches
                .iter()
                .find(|m| !m.epr.is_empty())
                .map(|m| match_to_service(m, &reply))),
            Some(reply) => Err(Error::Proxy(format!(
                "unexpected {} response to Resolve",
                reply.action
            ))),
            None => Ok(None),
        }
    }

    /// POST one envelope; decode a non-empty response body.
    fn post(&self, envelope: &Envelope) -> Result<Option<Envelope>> {
        let body = protocol::encode(envelope)?;
        log::debug!(
            "[proxy] POST {} -> {}",
            envelope.action,
            self.url
        );
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/soap+xml")
            .body(body)
            .send()
            .map_err(|err| Error::Proxy(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Proxy(format!("HTTP status {}", status)));
        }
        let bytes = response
            .bytes()
            .map_err(|err| Error::Proxy(err.to_string()))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        // Source address is only used for logging inside decode.
        let placeholder: SocketAddr = SocketAddr::from(([0, 0, 0, 0], 0));
        match protocol::decode(&bytes, placeholder) {
            Some(reply) => Ok(Some(reply)),
            None => Err(Error::Decode(
                "proxy response is not a discovery envelope".to_string(),
            )),
        }
    }
}

fn match_to_service(m: &ProbeResolveMatch, reply: &Envelope) -> Service {
    Service {
        epr: m.epr.clone(),
        types: m.types.clone(),
        scopes: m.scopes.clone(),
        x_addrs: m.x_addrs.clone(),
        instance_id: reply.instance_id,
        message_number: reply.message_number,
        metadata_version: m.metadata_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_to_service_carries_app_sequence() {
        let mut reply = Envelope::new(Action::ProbeMatches);
        reply.instance_id = 42;
        reply.message_number = 7;
        let m = ProbeResolveMatch {
            epr: "urn:uuid:svc".to_string(),
            types: vec![QName::new("http://example.org/x", "T")],
            scopes: vec![Scope::new("http://example.org/s")],
            x_addrs: vec!["http://h/x".to_string()],
            metadata_version: 3,
        };
        let service = match_to_service(&m, &reply);
        assert_eq!(service.epr, "urn:uuid:svc");
        assert_eq!(service.instance_id, 42);
        assert_eq!(service.message_number, 7);
        assert_eq!(service.metadata_version, 3);
    }

    #[test]
    fn test_client_construction() {
        let client = ProxyClient::new("http://proxy.local:8080/discovery")
            .expect("client construction should succeed");
        assert_eq!(client.url(), "http://proxy.local:8080/discovery");
    }

    #[test]
    fn test_invalid_certificate_is_an_error() {
        let result = ProxyClient::with_root_certificate(
            "https://proxy.local/discovery",
            b"not a pem certificate",
        );
        assert!(matches!(result, Err(Error::Proxy(_))));
    }
}

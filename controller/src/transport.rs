use std::{future::Future, time::Duration};

use zonelight_common::{wire, ResponseBody, TransportError};

/// HTTP access to the lighting controller. Every call carries its own timeout
/// and failures come back as values.
pub trait ZoneTransport: Send + Sync + 'static {
    fn fetch_status(
        &self,
        address: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<ResponseBody, TransportError>> + Send;

    fn send_command(
        &self,
        url: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[derive(Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }
}

impl ZoneTransport for HttpTransport {
    async fn fetch_status(&self, address: &str, timeout: Duration) -> Result<ResponseBody, TransportError> {
        let response = self
            .client
            .get(wire::status_url(address))
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify(address, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(|err| classify(address, err))?;
        Ok(match String::from_utf8(bytes.to_vec()) {
            Ok(text) => ResponseBody::Text(text),
            Err(err) => ResponseBody::Bytes(err.into_bytes()),
        })
    }

    async fn send_command(&self, url: &str, timeout: Duration) -> Result<(), TransportError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| classify(url, err))?;

        let status = response.status().as_u16();
        let text = response.text().await.map_err(|err| classify(url, err))?;
        wire::check_command_reply(status, &text)
    }
}

fn classify(address: &str, err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout {
            address: address.to_string(),
        }
    } else if err.is_decode() || err.is_body() {
        TransportError::MalformedBody(err.to_string())
    } else {
        TransportError::Connect {
            address: address.to_string(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, net::SocketAddr};

    use super::*;
    use axum::{extract::Query, routing::get, Router};
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;
    use zonelight_common::types::ParameterSet;

    async fn fake_controller() -> SocketAddr {
        let app = Router::new()
            .route(
                "/getController",
                get(|| async {
                    r#"[{"num":1,"pattern":"march","isOn":true,"colorStr":"255&0&0"},{"num":2,"pattern":"off"}]"#
                }),
            )
            .route(
                "/setPattern",
                get(|Query(params): Query<HashMap<String, String>>| async move {
                    if params.get("patternType").map(String::as_str) == Some("off") {
                        "Command Received"
                    } else {
                        "Unknown pattern"
                    }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn reads_zone_status_from_controller() {
        let addr = fake_controller().await;
        let transport = HttpTransport::new().unwrap();

        let body = transport
            .fetch_status(&addr.to_string(), Duration::from_secs(2))
            .await
            .unwrap();
        let zone = wire::find_zone(body, 1).unwrap();
        assert_eq!(zone.pattern.as_deref(), Some("march"));
        assert_eq!(zone.colors(), "255,0,0");
    }

    #[tokio::test]
    async fn command_needs_acknowledgement() {
        let addr = fake_controller().await;
        let transport = HttpTransport::new().unwrap();
        let timeout = Duration::from_secs(2);

        let off = ParameterSet::off(1).command_url(&addr.to_string());
        assert_eq!(transport.send_command(&off, timeout).await, Ok(()));

        let mut on = ParameterSet::off(1);
        on.pattern_type = "march".to_string();
        on.colors = "255,0,0".to_string();
        let result = transport.send_command(&on.command_url(&addr.to_string()), timeout).await;
        assert_eq!(result, Err(TransportError::Rejected("Unknown pattern".to_string())));
    }

    #[tokio::test]
    async fn unreachable_controller_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new().unwrap();
        let result = transport
            .fetch_status(&addr.to_string(), Duration::from_millis(500))
            .await;
        assert!(matches!(
            result,
            Err(TransportError::Connect { .. } | TransportError::Timeout { .. })
        ));
    }
}

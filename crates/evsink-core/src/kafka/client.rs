//! Client settings shared by every rdkafka handle the pipeline creates.

use crate::config::KafkaConfig;
use rdkafka::ClientConfig;

/// Build a `ClientConfig` with bootstrap servers, client id and security
/// settings applied. Callers add role-specific settings on top.
pub fn base_client_config(config: &KafkaConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();

    client_config
        .set("bootstrap.servers", config.bootstrap_list())
        .set("client.id", &config.client_id);

    if let Some(ref protocol) = config.security.protocol {
        client_config.set("security.protocol", protocol);
    }
    if let Some(ref mechanism) = config.security.sasl_mechanism {
        client_config.set("sasl.mechanism", mechanism);
    }
    if let Some(ref username) = config.security.sasl_username {
        client_config.set("sasl.username", username);
    }
    if let Some(ref password) = config.security.sasl_password {
        client_config.set("sasl.password", password);
    }
    if let Some(ref path) = config.security.ssl_ca_location {
        client_config.set("ssl.ca.location", path.to_string_lossy().as_ref());
    }
    if let Some(ref path) = config.security.ssl_cert_location {
        client_config.set("ssl.certificate.location", path.to_string_lossy().as_ref());
    }
    if let Some(ref path) = config.security.ssl_key_location {
        client_config.set("ssl.key.location", path.to_string_lossy().as_ref());
    }

    client_config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KafkaSecurityConfig;

    #[test]
    fn test_base_client_config() {
        let config = KafkaConfig {
            bootstrap_servers: vec!["a:9092".into(), "b:9092".into()],
            client_id: "evsink".into(),
            security: KafkaSecurityConfig {
                protocol: Some("SASL_SSL".into()),
                sasl_mechanism: Some("SCRAM-SHA-256".into()),
                ..KafkaSecurityConfig::default()
            },
            ..KafkaConfig::default()
        };

        let client_config = base_client_config(&config);
        assert_eq!(client_config.get("bootstrap.servers"), Some("a:9092,b:9092"));
        assert_eq!(client_config.get("client.id"), Some("evsink"));
        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("sasl.mechanism"), Some("SCRAM-SHA-256"));
        assert_eq!(client_config.get("sasl.username"), None);
    }
}

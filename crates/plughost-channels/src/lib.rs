//! # PlugHost Channels
//! Transport implementations.

pub mod cli;
pub mod whatsapp;

use std::sync::Arc;

use plughost_core::config::TransportConfig;
use plughost_core::error::{PlugHostError, Result};
use plughost_core::traits::Transport;
use tokio::sync::mpsc;

pub use cli::CliTransport;
pub use whatsapp::WhatsAppTransport;

/// A configured transport plus its operator command feed, if it has one.
pub struct TransportHandle {
    pub transport: Arc<dyn Transport>,
    pub admin_lines: Option<mpsc::UnboundedReceiver<String>>,
}

/// Create a transport from configuration.
pub fn create_transport(config: &TransportConfig) -> Result<TransportHandle> {
    match config.kind.as_str() {
        "cli" => {
            let cli = CliTransport::new(config.cli.clone());
            let admin_lines = cli.admin_lines();
            Ok(TransportHandle {
                transport: Arc::new(cli),
                admin_lines,
            })
        }
        "whatsapp" => {
            let wa = config
                .whatsapp
                .clone()
                .ok_or_else(|| PlugHostError::Config("[transport.whatsapp] section missing".into()))?;
            Ok(TransportHandle {
                transport: Arc::new(WhatsAppTransport::new(wa)?),
                admin_lines: None,
            })
        }
        other => Err(PlugHostError::Config(format!("Unknown transport: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plughost_core::config::WhatsAppTransportConfig;

    #[test]
    fn test_create_transport() {
        let cli = create_transport(&TransportConfig::default()).unwrap();
        assert_eq!(cli.transport.name(), "cli");
        assert!(cli.admin_lines.is_some());

        let mut config = TransportConfig {
            kind: "whatsapp".into(),
            ..TransportConfig::default()
        };
        assert!(matches!(create_transport(&config), Err(PlugHostError::Config(_))));

        config.whatsapp = Some(WhatsAppTransportConfig {
            access_token: "t".into(),
            phone_number_id: "1".into(),
            webhook_verify_token: String::new(),
            api_base: "https://graph.facebook.com/v21.0".into(),
        });
        let wa = create_transport(&config).unwrap();
        assert_eq!(wa.transport.name(), "whatsapp");
        assert!(wa.admin_lines.is_none());

        config.kind = "telegram".into();
        assert!(create_transport(&config).is_err());
    }
}

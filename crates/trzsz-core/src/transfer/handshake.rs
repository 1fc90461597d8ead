//! The action/config exchange that opens every session.
//!
//! The server announces itself with the trigger marker; the client replies
//! with an `ACT` frame carrying its confirmation and capabilities, and the
//! server answers with the `CFG` frame that fixes the codec for both sides.

use tracing::debug;

use crate::error::{Result, TrzszError};
use crate::protocol::{FrameTag, TransferAction, TransferConfig};

use super::Transfer;

impl Transfer {
    /// Client side: confirm or decline the announced transfer.
    pub async fn send_action(&self, confirm: bool, remote_is_windows: bool) -> Result<()> {
        let action = TransferAction::new(confirm, remote_is_windows);
        let json = serde_json::to_vec(&action)
            .map_err(|e| TrzszError::protocol(format!("failed to encode action: {e}")))?;
        self.send_frame(FrameTag::Act, &json).await
    }

    /// Server side: wait for the client's action.
    pub async fn recv_action(&self) -> Result<TransferAction> {
        let payload = self.recv_expect(FrameTag::Act).await?;
        let action: TransferAction = serde_json::from_slice(&payload)
            .map_err(|e| TrzszError::protocol(format!("malformed action: {e}")))?;
        debug!(
            version = %action.version,
            confirm = action.confirm,
            binary = action.support_binary,
            directory = action.support_directory,
            "client action received"
        );
        Ok(action)
    }

    /// Server side: fix and announce the session configuration.
    ///
    /// The caller has already reconciled the config against the client's
    /// capabilities; this applies it locally and puts it on the wire.
    pub async fn send_config(&self, config: TransferConfig) -> Result<()> {
        let json = serde_json::to_vec(&config)
            .map_err(|e| TrzszError::protocol(format!("failed to encode config: {e}")))?;
        // The CFG frame itself still travels in the pre-handshake codec.
        self.send_frame(FrameTag::Cfg, &json).await?;
        self.apply_config(config)
    }

    /// Client side: receive the configuration and fix the codec.
    pub async fn recv_config(&self) -> Result<TransferConfig> {
        let payload = self.recv_expect(FrameTag::Cfg).await?;
        let config: TransferConfig = serde_json::from_slice(&payload)
            .map_err(|e| TrzszError::protocol(format!("malformed config: {e}")))?;
        debug!(
            binary = config.binary,
            directory = config.directory,
            overwrite = config.overwrite,
            max_buf_size = config.max_buf_size,
            "session config received"
        );
        self.apply_config(config.clone())?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escape::EscapeTable;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    fn transfer_pair() -> (Transfer, Transfer) {
        let (a_tx, a_rx) = mpsc::channel::<Bytes>(64);
        let (b_tx, b_rx) = mpsc::channel::<Bytes>(64);
        (Transfer::new(a_rx, b_tx), Transfer::new(b_rx, a_tx))
    }

    #[tokio::test]
    async fn action_exchange() {
        let (client, server) = transfer_pair();
        client.send_action(true, false).await.unwrap();
        let action = server.recv_action().await.unwrap();
        assert!(action.confirm);
        assert!(action.support_binary);
        assert!(action.support_directory);
    }

    #[tokio::test]
    async fn declined_action_carries_confirm_false() {
        let (client, server) = transfer_pair();
        client.send_action(false, false).await.unwrap();
        let action = server.recv_action().await.unwrap();
        assert!(!action.confirm);
    }

    #[tokio::test]
    async fn config_exchange_fixes_both_codecs() {
        let (client, server) = transfer_pair();

        let config = TransferConfig {
            binary: false,
            escape_table: EscapeTable::all(),
            directory: true,
            overwrite: true,
            ..Default::default()
        };
        server.send_config(config).await.unwrap();
        let received = client.recv_config().await.unwrap();
        assert!(received.directory);
        assert!(received.overwrite);
        assert_eq!(received.escape_table, EscapeTable::all());

        // Frames after the exchange use the escaped codec on both sides.
        client.send_frame(FrameTag::Succ, b"ok").await.unwrap();
        assert_eq!(server.recv_succ().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let (client, server) = transfer_pair();

        // A binary config carrying an escape table violates the handshake
        // invariant and must not be applied.
        let config = TransferConfig {
            binary: true,
            escape_table: EscapeTable::all(),
            ..Default::default()
        };
        let json = serde_json::to_vec(&config).unwrap();
        server.send_frame(FrameTag::Cfg, &json).await.unwrap();
        assert!(client.recv_config().await.is_err());
    }
}

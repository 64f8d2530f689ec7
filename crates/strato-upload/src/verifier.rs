//! Pre-upload block verification.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use strato_api::{CryptoProvider, DriveApi, MetricName, MetricRecord, Telemetry};
use strato_types::{Error, Result, RevisionUid};

/// Verifies encrypted blocks before they leave the machine.
///
/// The verifier fetches `{verificationCode, contentKeyPacket}` once per
/// revision, then for every block runs a decryption probe (catching
/// bit-flip style corruption between encryption and upload) and derives the
/// verification token the server checks on receipt:
/// `verificationCode XOR encryptedBlock`, zero-padded on length mismatch.
pub struct BlockVerifier {
    api: DriveApi,
    crypto: Arc<dyn CryptoProvider>,
    telemetry: Arc<dyn Telemetry>,
    revision_uid: RevisionUid,
    material: OnceCell<(Vec<u8>, Vec<u8>)>,
}

impl BlockVerifier {
    /// Build a verifier for one draft revision.
    pub fn new(
        api: DriveApi,
        crypto: Arc<dyn CryptoProvider>,
        telemetry: Arc<dyn Telemetry>,
        revision_uid: RevisionUid,
    ) -> Self {
        Self {
            api,
            crypto,
            telemetry,
            revision_uid,
            material: OnceCell::new(),
        }
    }

    async fn material(&self, cancel: &CancellationToken) -> Result<&(Vec<u8>, Vec<u8>)> {
        self.material
            .get_or_try_init(|| async {
                let data = self
                    .api
                    .verification_data(&self.revision_uid, cancel)
                    .await?;
                let code = BASE64.decode(&data.verification_code).map_err(|e| {
                    Error::Integrity {
                        debug: Some(format!("verification code is not base64: {e}")),
                    }
                })?;
                let packet = BASE64.decode(&data.content_key_packet).map_err(|e| {
                    Error::Integrity {
                        debug: Some(format!("content key packet is not base64: {e}")),
                    }
                })?;
                Ok((code, packet))
            })
            .await
    }

    /// Probe one encrypted block and produce its base64 verification token.
    pub async fn verify_block(
        &self,
        encrypted_block: &[u8],
        cancel: &CancellationToken,
    ) -> Result<String> {
        let (code, packet) = self.material(cancel).await?;

        if let Err(error) = self.crypto.decrypt_block(encrypted_block, packet).await {
            self.telemetry
                .log_event(MetricRecord::new(MetricName::BlockVerificationError));
            return Err(Error::Integrity {
                debug: Some(format!("block failed its decryption probe: {error}")),
            });
        }

        let token: Vec<u8> = code
            .iter()
            .enumerate()
            .map(|(i, byte)| byte ^ encrypted_block.get(i).copied().unwrap_or(0))
            .collect();
        Ok(BASE64.encode(token))
    }
}

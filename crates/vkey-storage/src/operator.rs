//! OpenDAL Operator factory for the recovery blob store backends

use opendal::layers::{LoggingLayer, RetryLayer, TimeoutLayer};
use opendal::Operator;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use vkey_core::config::RemoteConfig;
use vkey_core::{VaultError, VaultResult};

/// Build an operator over the user's Google Drive, scoped to `cfg.root` and
/// authenticated with the session bearer token.
pub fn build_gdrive_operator(
    cfg: &RemoteConfig,
    access_token: &SecretString,
) -> VaultResult<Operator> {
    // opendal 0.55: builders use the consuming pattern (methods take `self`)
    let builder = opendal::services::Gdrive::default()
        .root(&cfg.root)
        .access_token(access_token.expose_secret());

    let op = Operator::new(builder)
        .map_err(|e| VaultError::Config(format!("creating gdrive operator: {e}")))?
        .finish();
    Ok(with_transport_layers(op, cfg))
}

/// Build an in-process operator. Every client built from the returned
/// operator (or its clones) sees the same data.
pub fn build_memory_operator(cfg: &RemoteConfig) -> VaultResult<Operator> {
    let builder = opendal::services::Memory::default().root(&cfg.root);
    let op = Operator::new(builder)
        .map_err(|e| VaultError::Config(format!("creating memory operator: {e}")))?
        .finish();
    Ok(with_transport_layers(op, cfg))
}

/// Bound every request by `timeout_secs` and retry transient transport
/// failures up to `max_retries` times. Callers above this layer never retry.
fn with_transport_layers(op: Operator, cfg: &RemoteConfig) -> Operator {
    let op = op
        .layer(TimeoutLayer::new().with_timeout(Duration::from_secs(cfg.timeout_secs)))
        .layer(LoggingLayer::default());
    if cfg.max_retries == 0 {
        return op;
    }
    op.layer(
        RetryLayer::new()
            .with_max_times(cfg.max_retries)
            .with_jitter(),
    )
}

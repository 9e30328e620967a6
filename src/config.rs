//! Startup configuration.
//!
//! Every flag can also be set through the environment variable named next to
//! it, which is how the Deployment manifest usually configures the webhook.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::health::METRICS_PORT;
use crate::webhooks::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT};

/// Cosign admission webhook
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// File containing the x509 certificate for HTTPS
    #[arg(long = "tlsCertFile", env = "TLS_CERT_FILE", default_value = WEBHOOK_CERT_PATH)]
    pub tls_cert_file: PathBuf,

    /// File containing the x509 private key matching --tlsCertFile
    #[arg(long = "tlsKeyFile", env = "TLS_KEY_FILE", default_value = WEBHOOK_KEY_PATH)]
    pub tls_key_file: PathBuf,

    /// Port of the TLS decision endpoint
    #[arg(long, env = "WEBHOOK_PORT", default_value_t = WEBHOOK_PORT)]
    pub port: u16,

    /// Port of the plain HTTP health and metrics endpoint
    #[arg(long, env = "METRICS_PORT", default_value_t = METRICS_PORT)]
    pub metrics_port: u16,

    /// Upper bound in seconds for each secret, credential and registry call
    #[arg(long, env = "COLLABORATOR_TIMEOUT_SECS", default_value_t = 30)]
    pub collaborator_timeout_secs: u64,

    /// Seconds to wait for in-flight requests during shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    pub shutdown_grace_secs: u64,
}

impl Config {
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.collaborator_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

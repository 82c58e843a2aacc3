use crate::error::StartupError;
use crate::ledger::IndexLedger;
use crate::responder::Responder;
use crate::trust::TrustMaterial;
use clap::{Parser, crate_authors};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(
    author = crate_authors!("\n"),
    before_help = "This script answers OCSP requests from an OpenSSL index file.",
    after_help = "A config file is required for the script to work.",
    help_template = "\
    {name} {version}
    Authors: {author-section}
    {before-help}
    About: {about-with-newline}
    {usage-heading} {usage}

    {all-args}{after-help}
    "
)]
#[command(version, author, about, long_about = None)]
pub(crate) struct Cli {
    #[arg(default_value = "config.toml")]
    pub(crate) config_path: PathBuf,
}

pub(crate) const DEFAULT_INDEX: &str = "index.txt";
pub(crate) const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub(crate) const DEFAULT_PORT: u16 = 8888;
pub(crate) const DEFAULT_VALIDITY_DAYS: u16 = 1;

#[derive(Deserialize, Debug)]
pub(crate) struct Fileconfig {
    pub(crate) index: Option<PathBuf>,
    pub(crate) itkey: PathBuf,
    pub(crate) itcert: PathBuf,
    pub(crate) cacert: PathBuf,
    pub(crate) strict: Option<bool>,
    pub(crate) address: Option<String>,
    pub(crate) port: Option<u16>,
    pub(crate) validitydays: Option<u16>,
}

/// State shared by every request handler.
pub(crate) struct Config {
    pub(crate) responder: Responder,
    pub(crate) strict: bool,
    pub(crate) address: IpAddr,
    pub(crate) port: u16,
}

impl Config {
    /// Loads the trust material and fails before anything is served if it is unusable.
    pub(crate) fn from_file(config: Fileconfig) -> Result<Self, StartupError> {
        let validitydays = config.validitydays.unwrap_or(DEFAULT_VALIDITY_DAYS);
        if validitydays == 0 {
            return Err(StartupError::Config(
                "validitydays must be at least 1".to_string(),
            ));
        }
        let address = config.address.as_deref().unwrap_or(DEFAULT_ADDRESS);
        let address: IpAddr = address
            .parse()
            .map_err(|e| StartupError::Config(format!("invalid address {address}: {e}")))?;
        let trust = TrustMaterial::load(&config.cacert, &config.itcert, &config.itkey)?;
        let index = config.index.unwrap_or_else(|| PathBuf::from(DEFAULT_INDEX));
        let ledger = IndexLedger::new(index);
        if !ledger.path().exists() {
            eprintln!(
                "Index file {} does not exist yet, requests will fail until it does.",
                ledger.path().display()
            );
        }
        Ok(Config {
            responder: Responder::new(Arc::new(trust), Box::new(ledger), validitydays),
            strict: config.strict.unwrap_or(false),
            address,
            port: config.port.unwrap_or(DEFAULT_PORT),
        })
    }
}

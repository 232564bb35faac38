//! Cloud environment codes and their base URLs.
//!
//! Carbon Black Cloud is hosted in several regional stacks. Each API key
//! belongs to exactly one of them, and the console shows the short code
//! (e.g. `PROD05`) next to the key. This module is a pure lookup table.
//!
//! Reference: <https://developer.carbonblack.com/reference/carbon-black-cloud/authentication/#building-your-base-urls>

use std::fmt;
use std::str::FromStr;

use crate::error::CbcError;

/// A Carbon Black Cloud hosting environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[value(rename_all = "UPPER")]
pub enum Environment {
    /// Early access program.
    Eap1,
    /// US, legacy dashboard host.
    Prod01,
    /// US.
    Prod02,
    /// US (default for most tenants).
    Prod05,
    /// EU (Frankfurt).
    Prod06,
    /// Japan / Asia-Pacific north.
    Prodnrt,
    /// Australia.
    Prodsyd,
    /// United Kingdom.
    Produk,
    /// US government cloud.
    Govcloud,
}

impl Environment {
    /// Every known environment, in console order.
    pub const ALL: [Environment; 9] = [
        Environment::Eap1,
        Environment::Prod01,
        Environment::Prod02,
        Environment::Prod05,
        Environment::Prod06,
        Environment::Prodnrt,
        Environment::Prodsyd,
        Environment::Produk,
        Environment::Govcloud,
    ];

    /// Base URL for this environment, without a trailing slash.
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Eap1 => "https://defense-eap01.conferdeploy.net",
            Environment::Prod01 => "https://dashboard.confer.net",
            Environment::Prod02 => "https://defense.conferdeploy.net",
            Environment::Prod05 => "https://defense-prod05.conferdeploy.net",
            Environment::Prod06 => "https://defense-eu.conferdeploy.net",
            Environment::Prodnrt => "https://defense-prodnrt.conferdeploy.net",
            Environment::Prodsyd => "https://defense-prodsyd.conferdeploy.net",
            Environment::Produk => "https://ew2.carbonblack.vmware.com",
            Environment::Govcloud => "https://gprd1usgw1.carbonblack-us-gov.vmware.com",
        }
    }

    /// The short console code, e.g. `"PROD05"`.
    pub fn code(self) -> &'static str {
        match self {
            Environment::Eap1 => "EAP1",
            Environment::Prod01 => "PROD01",
            Environment::Prod02 => "PROD02",
            Environment::Prod05 => "PROD05",
            Environment::Prod06 => "PROD06",
            Environment::Prodnrt => "PRODNRT",
            Environment::Prodsyd => "PRODSYD",
            Environment::Produk => "PRODUK",
            Environment::Govcloud => "GOVCLOUD",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Environment {
    type Err = CbcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Environment::ALL
            .into_iter()
            .find(|env| env.code().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CbcError::Config(format!("unknown environment code '{wanted}'")))
    }
}

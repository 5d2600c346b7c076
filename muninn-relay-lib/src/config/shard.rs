use std::fmt;
use std::str::FromStr;

use crate::error::RelayError;

/// Game-server region. Selects the regional HTTPS endpoint the proxy
/// uses to measure its request bloat; the endpoints are regional
/// DynamoDB hosts, which answer `/ping` cheaply and sit close to the
/// game shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shard {
    Na,
    Lan,
    Las,
    Euw,
    Eune,
    Oce,
    Ru,
    Tr,
    Jp,
    Kr,
}

impl Shard {
    pub const ALL: [Shard; 10] = [
        Shard::Na,
        Shard::Lan,
        Shard::Las,
        Shard::Euw,
        Shard::Eune,
        Shard::Oce,
        Shard::Ru,
        Shard::Tr,
        Shard::Jp,
        Shard::Kr,
    ];

    /// Host used for the bloat measurement of this shard.
    pub fn bloat_host(self) -> &'static str {
        match self {
            Shard::Na => "dynamodb.us-east-2.amazonaws.com",
            Shard::Lan => "dynamodb.us-east-1.amazonaws.com",
            Shard::Las => "dynamodb.sa-east-1.amazonaws.com",
            Shard::Euw | Shard::Eune => "dynamodb.eu-central-1.amazonaws.com",
            Shard::Oce => "dynamodb.ap-southeast-2.amazonaws.com",
            Shard::Ru => "dynamodb.eu-north-1.amazonaws.com",
            Shard::Tr => "dynamodb.eu-south-1.amazonaws.com",
            Shard::Jp => "dynamodb.ap-northeast-1.amazonaws.com",
            Shard::Kr => "dynamodb.ap-northeast-2.amazonaws.com",
        }
    }
}

impl FromStr for Shard {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NA" => Ok(Shard::Na),
            "LAN" => Ok(Shard::Lan),
            "LAS" => Ok(Shard::Las),
            "EUW" => Ok(Shard::Euw),
            "EUNE" => Ok(Shard::Eune),
            "OCE" => Ok(Shard::Oce),
            "RU" => Ok(Shard::Ru),
            "TR" => Ok(Shard::Tr),
            "JP" => Ok(Shard::Jp),
            "KR" => Ok(Shard::Kr),
            other => Err(RelayError::Config(format!(
                "unknown server {other:?}; known servers: NA, LAN, LAS, EUW, EUNE, OCE, RU, TR, JP, KR"
            ))),
        }
    }
}

impl fmt::Display for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Shard::Na => "NA",
            Shard::Lan => "LAN",
            Shard::Las => "LAS",
            Shard::Euw => "EUW",
            Shard::Eune => "EUNE",
            Shard::Oce => "OCE",
            Shard::Ru => "RU",
            Shard::Tr => "TR",
            Shard::Jp => "JP",
            Shard::Kr => "KR",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("euw".parse::<Shard>().ok(), Some(Shard::Euw));
        assert_eq!("Kr".parse::<Shard>().ok(), Some(Shard::Kr));
    }

    #[test]
    fn rejects_unknown_server() {
        assert!("PBE".parse::<Shard>().is_err());
    }

    #[test]
    fn euw_and_eune_share_a_host() {
        assert_eq!(Shard::Euw.bloat_host(), Shard::Eune.bloat_host());
    }
}

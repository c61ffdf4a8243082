use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown table service {candidate:?}")]
pub struct UnknownService {
    pub(crate) candidate: String,
}

/// The closed set of lookup services a table may answer for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Service {
    Alias,
    Domain,
    Credentials,
    Netaddr,
    Userinfo,
    Source,
    Mailaddr,
    Addrname,
    Mailaddrmap,
    Auth,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Alias => "alias",
            Self::Domain => "domain",
            Self::Credentials => "credentials",
            Self::Netaddr => "netaddr",
            Self::Userinfo => "userinfo",
            Self::Source => "source",
            Self::Mailaddr => "mailaddr",
            Self::Addrname => "addrname",
            Self::Mailaddrmap => "mailaddrmap",
            Self::Auth => "auth",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        fmt.write_str(self.name())
    }
}

impl FromStr for Service {
    type Err = UnknownService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alias" => Ok(Self::Alias),
            "domain" => Ok(Self::Domain),
            "credentials" => Ok(Self::Credentials),
            "netaddr" => Ok(Self::Netaddr),
            "userinfo" => Ok(Self::Userinfo),
            "source" => Ok(Self::Source),
            "mailaddr" => Ok(Self::Mailaddr),
            "addrname" => Ok(Self::Addrname),
            "mailaddrmap" => Ok(Self::Mailaddrmap),
            "auth" => Ok(Self::Auth),
            other => Err(UnknownService {
                candidate: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Service {
    type Error = UnknownService;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

impl From<Service> for String {
    fn from(service: Service) -> String {
        service.name().to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names_round_trip() {
        for service in [
            Service::Alias,
            Service::Domain,
            Service::Credentials,
            Service::Netaddr,
            Service::Userinfo,
            Service::Source,
            Service::Mailaddr,
            Service::Addrname,
            Service::Mailaddrmap,
            Service::Auth,
        ] {
            assert_eq!(service.name().parse::<Service>(), Ok(service));
        }
    }

    #[test]
    fn unknown_names_are_rejected() {
        let err = "aliases".parse::<Service>().unwrap_err();
        assert_eq!(err.to_string(), "unknown table service \"aliases\"");
    }
}

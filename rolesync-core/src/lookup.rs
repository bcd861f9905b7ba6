//! Identity lookup queries (`discord:ID`, `hero:NAME`, `website:NAME`, `<@ID>`).

use crate::error::ValidationError;
use crate::identity::MemberId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

static MENTION: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"^<@!?([0-9]+)>$"));

/// Which datastore column a lookup key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    /// Platform identity.
    Discord,
    /// In-game hero name.
    Hero,
    /// Website username.
    Website,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupKind::Discord => "discord",
            LookupKind::Hero => "hero",
            LookupKind::Website => "website",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LookupKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discord" => Ok(LookupKind::Discord),
            "hero" => Ok(LookupKind::Hero),
            "website" => Ok(LookupKind::Website),
            other => Err(ValidationError::InvalidValue {
                field: "kind".to_string(),
                reason: format!("unknown lookup kind '{}'", other),
            }),
        }
    }
}

/// A reference to an account, either a platform mention or a `kind:key` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityQuery {
    Mention(MemberId),
    By { kind: LookupKind, key: String },
}

impl FromStr for IdentityQuery {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(mention) = MENTION.as_ref() {
            if let Some(caps) = mention.captures(s) {
                if let Some(id) = caps.get(1) {
                    return Ok(IdentityQuery::Mention(MemberId::from(id.as_str())));
                }
            }
        }

        let mut parts = s.splitn(2, ':');
        match (parts.next(), parts.next()) {
            (Some(kind), Some(key)) if !key.is_empty() && !key.contains(':') => {
                Ok(IdentityQuery::By {
                    kind: kind.parse()?,
                    key: key.to_string(),
                })
            }
            _ => Err(ValidationError::InvalidValue {
                field: "query".to_string(),
                reason: "expected TYPE:KEY (e.g. website:Makahost or hero:RoyalMaka) or a mention"
                    .to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mention() -> Result<(), ValidationError> {
        assert_eq!(
            "<@12345>".parse::<IdentityQuery>()?,
            IdentityQuery::Mention("12345".into())
        );
        assert_eq!(
            "<@!777>".parse::<IdentityQuery>()?,
            IdentityQuery::Mention("777".into())
        );
        Ok(())
    }

    #[test]
    fn test_parse_kind_key() -> Result<(), ValidationError> {
        assert_eq!(
            "hero:RoyalMaka".parse::<IdentityQuery>()?,
            IdentityQuery::By {
                kind: LookupKind::Hero,
                key: "RoyalMaka".to_string()
            }
        );
        assert_eq!(
            "Website:Makahost".parse::<IdentityQuery>()?,
            IdentityQuery::By {
                kind: LookupKind::Website,
                key: "Makahost".to_string()
            }
        );
        Ok(())
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("RoyalMaka".parse::<IdentityQuery>().is_err());
        assert!("hero:".parse::<IdentityQuery>().is_err());
        assert!("a:b:c".parse::<IdentityQuery>().is_err());
        assert!("guild:x".parse::<IdentityQuery>().is_err());
    }
}

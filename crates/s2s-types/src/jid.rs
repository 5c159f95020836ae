//! Minimal JID handling: enough to extract routing domains and to reject
//! identities that name a user or resource where a bare server is required.

use std::fmt;
use std::str::FromStr;

use crate::error::ParseError;

/// An address of the form `[node@]domain[/resource]`.
///
/// The domain part is normalised to lowercase. Node and resource are kept
/// verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Jid {
    node: Option<String>,
    domain: String,
    resource: Option<String>,
}

impl Jid {
    /// Builds a bare server JID from a domain.
    pub fn domain_only(domain: &str) -> Result<Self, ParseError> {
        let jid: Jid = domain.parse()?;
        if jid.is_server() {
            Ok(jid)
        } else {
            Err(ParseError::Jid(domain.to_string()))
        }
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Returns `true` when the JID has neither node nor resource.
    pub fn is_server(&self) -> bool {
        self.node.is_none() && self.resource.is_none()
    }
}

impl FromStr for Jid {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::Jid(s.to_string());

        let (bare, resource) = match s.split_once('/') {
            Some((bare, resource)) if !resource.is_empty() => (bare, Some(resource.to_string())),
            Some(_) => return Err(invalid()),
            None => (s, None),
        };

        let (node, domain) = match bare.split_once('@') {
            Some((node, domain)) if !node.is_empty() => (Some(node.to_string()), domain),
            Some(_) => return Err(invalid()),
            None => (None, bare),
        };

        let domain = domain.trim_end_matches('.');
        if domain.is_empty()
            || domain.len() > 1023
            || domain
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '@' | '/' | '<' | '>' | '\'' | '"'))
        {
            return Err(invalid());
        }

        Ok(Self {
            node,
            domain: domain.to_lowercase(),
            resource,
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(node) = &self.node {
            write!(f, "{node}@")?;
        }
        f.write_str(&self.domain)?;
        if let Some(resource) = &self.resource {
            write!(f, "/{resource}")?;
        }
        Ok(())
    }
}

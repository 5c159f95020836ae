//! Candidate address lists handed over by the resolver.
//!
//! A list is comma-separated; each entry is `[v6]:port`, `[v6]`,
//! `host:port`, `host`, or a bare IPv6 address (two or more colons and no
//! brackets, never carrying a port).

use std::collections::VecDeque;
use std::fmt;

/// One address to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parses a candidate list, skipping entries that cannot be used.
pub fn parse_candidates(list: &str, default_port: u16) -> VecDeque<Candidate> {
    list.split(',')
        .filter_map(|entry| parse_candidate(entry.trim(), default_port))
        .collect()
}

fn parse_candidate(entry: &str, default_port: u16) -> Option<Candidate> {
    if entry.is_empty() {
        return None;
    }

    if let Some(rest) = entry.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => default_port,
            None => return None,
        };
        return non_empty(host, port);
    }

    if entry.matches(':').count() >= 2 {
        return non_empty(entry, default_port);
    }

    match entry.split_once(':') {
        Some((host, port)) => non_empty(host, port.parse().ok()?),
        None => non_empty(entry, default_port),
    }
}

fn non_empty(host: &str, port: u16) -> Option<Candidate> {
    (!host.is_empty()).then(|| Candidate {
        host: host.to_string(),
        port,
    })
}

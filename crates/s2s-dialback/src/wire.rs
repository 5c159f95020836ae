//! Builders and readers for the protocol elements the core exchanges.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use s2s_types::{ns, ChallengeId, Element, Jid};

use crate::error::WireError;

/// A parsed `db:result` or `db:verify` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DialbackElement {
    pub to: String,
    pub from: String,
    pub id: Option<ChallengeId>,
    /// The `type` attribute; absent on requests.
    pub kind: Option<String>,
    /// Element body; the key on requests, empty on replies.
    pub key: String,
}

impl DialbackElement {
    pub fn parse(el: &Element) -> Result<Self, WireError> {
        Ok(Self {
            to: server_domain(el, "to")?,
            from: server_domain(el, "from")?,
            id: el.attr("id").map(ChallengeId::from),
            kind: el.attr("type").map(str::to_string),
            key: el.text().trim().to_string(),
        })
    }

    pub fn is_valid(&self) -> bool {
        self.kind.as_deref() == Some("valid")
    }

    pub fn is_reply(&self) -> bool {
        self.kind.is_some()
    }
}

fn server_domain(el: &Element, attr: &'static str) -> Result<String, WireError> {
    let value = el.attr(attr).ok_or(WireError::MissingAttribute(attr))?;
    Jid::domain_only(value)
        .map(|jid| jid.domain().to_string())
        .map_err(|_| WireError::NotADomain {
            attr,
            value: value.to_string(),
        })
}

fn jid_domain(el: &Element, attr: &'static str) -> Result<String, WireError> {
    let value = el.attr(attr).ok_or(WireError::MissingAttribute(attr))?;
    value
        .parse::<Jid>()
        .map(|jid| jid.domain().to_string())
        .map_err(|_| WireError::NotADomain {
            attr,
            value: value.to_string(),
        })
}

/// Routing domains `(to, from)` of an ordinary stanza.
pub(crate) fn stanza_domains(el: &Element) -> Result<(String, String), WireError> {
    Ok((jid_domain(el, "to")?, jid_domain(el, "from")?))
}

fn typed(valid: bool) -> &'static str {
    if valid {
        "valid"
    } else {
        "invalid"
    }
}

pub(crate) fn db_result(to: &str, from: &str, key: &str) -> Element {
    Element::new("result", ns::DIALBACK)
        .with_attr("to", to)
        .with_attr("from", from)
        .with_text(key)
}

pub(crate) fn db_result_reply(to: &str, from: &str, valid: bool) -> Element {
    Element::new("result", ns::DIALBACK)
        .with_attr("to", to)
        .with_attr("from", from)
        .with_attr("type", typed(valid))
}

pub(crate) fn db_verify(to: &str, from: &str, id: &ChallengeId, key: &str) -> Element {
    Element::new("verify", ns::DIALBACK)
        .with_attr("to", to)
        .with_attr("from", from)
        .with_attr("id", id.as_str())
        .with_text(key)
}

pub(crate) fn db_verify_reply(to: &str, from: &str, id: &ChallengeId, valid: bool) -> Element {
    Element::new("verify", ns::DIALBACK)
        .with_attr("to", to)
        .with_attr("from", from)
        .with_attr("id", id.as_str())
        .with_attr("type", typed(valid))
}

pub(crate) fn is_verify(el: &Element) -> bool {
    el.is("verify", ns::DIALBACK)
}

/// The `<stream:features/>` an inbound stream advertises.
pub(crate) fn features(starttls: bool, sasl_external: bool) -> Element {
    let mut features = Element::new("features", ns::STREAM);
    if starttls {
        features = features.with_child(Element::new("starttls", ns::TLS));
    }
    if sasl_external {
        features = features.with_child(
            Element::new("mechanisms", ns::SASL)
                .with_child(Element::new("mechanism", ns::SASL).with_text("EXTERNAL")),
        );
    }
    features
}

/// Whether a received feature set advertises SASL EXTERNAL.
pub(crate) fn offers_sasl_external(features: &Element) -> bool {
    features
        .get_child("mechanisms", ns::SASL)
        .map(|mechanisms| {
            mechanisms
                .children()
                .filter(|m| m.is("mechanism", ns::SASL))
                .any(|m| m.text().trim().eq_ignore_ascii_case("EXTERNAL"))
        })
        .unwrap_or(false)
}

pub(crate) fn offers_starttls(features: &Element) -> bool {
    features.get_child("starttls", ns::TLS).is_some()
}

pub(crate) fn starttls() -> Element {
    Element::new("starttls", ns::TLS)
}

pub(crate) fn tls_proceed() -> Element {
    Element::new("proceed", ns::TLS)
}

pub(crate) fn tls_failure() -> Element {
    Element::new("failure", ns::TLS)
}

pub(crate) fn sasl_auth_external(identity: &str) -> Element {
    Element::new("auth", ns::SASL)
        .with_attr("mechanism", "EXTERNAL")
        .with_text(BASE64.encode(identity.as_bytes()))
}

pub(crate) fn sasl_success() -> Element {
    Element::new("success", ns::SASL)
}

pub(crate) fn sasl_failure(condition: &str) -> Element {
    Element::new("failure", ns::SASL).with_child(Element::new(condition, ns::SASL))
}

/// Decodes the authorization identity of a SASL EXTERNAL `<auth/>`.
pub(crate) fn decode_sasl_identity(payload: &str) -> Result<Jid, WireError> {
    let bytes = BASE64
        .decode(payload.trim())
        .map_err(|_| WireError::Encoding)?;
    let text = String::from_utf8(bytes).map_err(|_| WireError::Encoding)?;
    text.parse().map_err(|_| WireError::NotADomain {
        attr: "authzid",
        value: text,
    })
}

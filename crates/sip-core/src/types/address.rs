//! Name-addr values: the `"Display Name" <uri>;params` form shared by
//! From, To, Contact, Route and Record-Route
//! ([RFC 3261 Section 20.10](https://datatracker.ietf.org/doc/html/rfc3261#section-20.10)).

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::types::param::{find_param, Param};
use crate::types::uri::Uri;

/// A URI with optional display name and header parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Optional display name, stored unquoted
    pub display_name: Option<String>,
    /// The address itself
    pub uri: Uri,
    /// Header parameters (tag, expires, q, ...), ordered
    pub params: Vec<Param>,
}

impl Address {
    /// An address with no display name and no parameters.
    pub fn new(uri: Uri) -> Self {
        Address {
            display_name: None,
            uri,
            params: Vec::new(),
        }
    }

    /// An address with a display name.
    pub fn new_with_display_name(name: impl Into<String>, uri: Uri) -> Self {
        Address {
            display_name: Some(name.into()),
            uri,
            params: Vec::new(),
        }
    }

    /// The `tag` parameter, when present.
    pub fn tag(&self) -> Option<&str> {
        match find_param(&self.params, "tag") {
            Some(Param::Tag(tag)) => Some(tag),
            _ => None,
        }
    }

    /// Sets or replaces the `tag` parameter.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        for param in self.params.iter_mut() {
            if param.name() == "tag" {
                *param = Param::Tag(tag);
                return;
            }
        }
        self.params.push(Param::Tag(tag));
    }

    /// Looks up an arbitrary parameter by name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        find_param(&self.params, name)
    }

    // A display name consisting only of token characters may be rendered
    // bare; anything else needs quoting.
    fn display_name_needs_quoting(name: &str) -> bool {
        name.is_empty()
            || !name
                .bytes()
                .all(|b| crate::types::method::is_token_byte(b) || b == b' ')
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.display_name {
            Some(name) if Self::display_name_needs_quoting(name) => {
                write!(f, "\"{}\" ", name.replace('\\', "\\\\").replace('"', "\\\""))?;
                write!(f, "<{}>", self.uri)?;
            }
            Some(name) => write!(f, "{} <{}>", name, self.uri)?,
            // Always use the bracketed form so URI parameters cannot be
            // confused with header parameters.
            None => write!(f, "<{}>", self.uri)?,
        }
        for param in &self.params {
            write!(f, ";{}", param)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn renders_bracketed_without_display_name() {
        let addr = Address::new(Uri::from_str("sip:alice@atlanta.com;transport=tcp").unwrap());
        assert_eq!(addr.to_string(), "<sip:alice@atlanta.com;transport=tcp>");
    }

    #[test]
    fn quotes_display_names_with_specials() {
        let mut addr = Address::new_with_display_name(
            "Bob, Esq.",
            Uri::from_str("sip:bob@biloxi.com").unwrap(),
        );
        addr.set_tag("a6c85cf");
        assert_eq!(
            addr.to_string(),
            "\"Bob, Esq.\" <sip:bob@biloxi.com>;tag=a6c85cf"
        );
    }

    #[test]
    fn tag_roundtrip() {
        let mut addr = Address::new(Uri::from_str("sip:carol@chicago.com").unwrap());
        assert_eq!(addr.tag(), None);
        addr.set_tag("1928301774");
        assert_eq!(addr.tag(), Some("1928301774"));
        addr.set_tag("replaced");
        assert_eq!(addr.tag(), Some("replaced"));
        assert_eq!(addr.params.len(), 1);
    }
}

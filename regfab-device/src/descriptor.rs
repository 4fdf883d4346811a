//! Hand-written recursive-descent parser for the device descriptor grammar
//! (SPEC_FULL.md §6): `(backendType:address?key1=value1&key2=value2&...)`.
//! Grounded in [`regfab_catalogue::MapFileParser`]'s own line-at-a-time
//! approach rather than a parser-combinator dependency: the grammar is small
//! enough that splitting on `(`/`)`, `:`, `?` and `&` in turn is clearer than
//! a crate for it would be.

use std::collections::HashMap;

use regfab_types::LogicError;

/// A parsed `(backendType:address?key=value&...)` descriptor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub backend_type: String,
    pub address: String,
    pub parameters: HashMap<String, String>,
}

/// Parses one descriptor string. Whitespace around the whole string is
/// ignored; nothing inside the parentheses is trimmed, since map file paths
/// and addresses may legitimately start or end with characters that look
/// like whitespace to a careless trim.
pub fn parse(text: &str) -> Result<Descriptor, LogicError> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')')).ok_or_else(|| LogicError::DescriptorParse {
        descriptor: text.to_string(),
        message: "descriptor must be enclosed in parentheses".into(),
    })?;

    let (head, query) = match inner.split_once('?') {
        Some((h, q)) => (h, Some(q)),
        None => (inner, None),
    };

    let (backend_type, address) = head.split_once(':').ok_or_else(|| LogicError::DescriptorParse {
        descriptor: text.to_string(),
        message: "missing ':' between backend type and address".into(),
    })?;
    if backend_type.is_empty() {
        return Err(LogicError::DescriptorParse { descriptor: text.to_string(), message: "backend type must not be empty".into() });
    }

    let mut parameters = HashMap::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|s| !s.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| LogicError::DescriptorParse {
                descriptor: text.to_string(),
                message: format!("malformed key=value pair '{pair}'"),
            })?;
            if key.is_empty() {
                return Err(LogicError::DescriptorParse { descriptor: text.to_string(), message: "parameter key must not be empty".into() });
            }
            parameters.insert(key.to_string(), value.to_string());
        }
    }

    Ok(Descriptor { backend_type: backend_type.to_string(), address: address.to_string(), parameters })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_backend_type_and_address_only() {
        let d = parse("(shared-dummy:my-instance)").unwrap();
        assert_eq!(d.backend_type, "shared-dummy");
        assert_eq!(d.address, "my-instance");
        assert!(d.parameters.is_empty());
    }

    #[test]
    fn parses_parameters() {
        let d = parse("(rebot:localhost:1234?map=/tmp/x.map&timeout=5)").unwrap();
        assert_eq!(d.backend_type, "rebot");
        assert_eq!(d.address, "localhost:1234");
        assert_eq!(d.parameters.get("map").map(String::as_str), Some("/tmp/x.map"));
        assert_eq!(d.parameters.get("timeout").map(String::as_str), Some("5"));
    }

    #[test]
    fn rejects_missing_parens() {
        assert!(parse("shared-dummy:x").is_err());
    }

    #[test]
    fn rejects_missing_colon() {
        assert!(parse("(shared-dummy)").is_err());
    }

    #[test]
    fn rejects_malformed_parameter() {
        assert!(parse("(rebot:x?map)").is_err());
        assert!(parse("(rebot:x?=v)").is_err());
    }
}

//! Structural edits on YAML documents.
//!
//! Config mutations (consuming an invite, seeding the bootstrap admin) work
//! on the parsed document tree and re-encode it, so key order survives and
//! an edit can never corrupt surrounding structure the way text substitution
//! could.

use serde_yaml::{Mapping, Sequence, Value};

use crate::error::{Error, Result};

/// Parse a config document into its root mapping. An empty document is an
/// empty mapping; any other non-mapping root is an error.
pub fn parse_document(data: &[u8]) -> Result<Mapping> {
    let value: Value = serde_yaml::from_slice(data)?;

    match value {
        Value::Null => Ok(Mapping::new()),
        Value::Mapping(map) => Ok(map),
        _ => Err(Error::Config("root is not a yaml mapping".to_string())),
    }
}

pub fn encode(doc: &Mapping) -> Result<Vec<u8>> {
    Ok(serde_yaml::to_string(doc)?.into_bytes())
}

/// Get the mapping under `key`, inserting an empty one if the key is absent
/// or holds a non-mapping value.
pub fn ensure_mapping<'a>(map: &'a mut Mapping, key: &str) -> &'a mut Mapping {
    let slot = map
        .entry(Value::from(key))
        .or_insert_with(|| Value::Mapping(Mapping::new()));

    if !slot.is_mapping() {
        *slot = Value::Mapping(Mapping::new());
    }

    slot.as_mapping_mut().expect("slot was just made a mapping")
}

/// Get the sequence under `key`, inserting an empty one if the key is absent
/// or holds a non-sequence value.
pub fn ensure_sequence<'a>(map: &'a mut Mapping, key: &str) -> &'a mut Sequence {
    let slot = map
        .entry(Value::from(key))
        .or_insert_with(|| Value::Sequence(Sequence::new()));

    if !slot.is_sequence() {
        *slot = Value::Sequence(Sequence::new());
    }

    slot.as_sequence_mut().expect("slot was just made a sequence")
}

/// Append a scalar to a sequence unless an equal scalar is already present.
pub fn append_unique(seq: &mut Sequence, value: &str) -> bool {
    if seq.iter().any(|entry| entry.as_str() == Some(value)) {
        return false;
    }

    seq.push(Value::from(value));

    true
}

pub fn set_bool(map: &mut Mapping, key: &str, value: bool) {
    map.insert(Value::from(key), Value::from(value));
}

pub fn remove_key(map: &mut Mapping, key: &str) -> bool {
    map.remove(Value::from(key)).is_some()
}

/// The `(key, value)` pairs of a mapping whose keys and values are both
/// strings, skipping anything else.
pub fn string_entries(map: &Mapping) -> impl Iterator<Item = (&str, &str)> {
    map.iter()
        .filter_map(|(k, v)| Some((k.as_str()?, v.as_str()?)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_empty_document() {
        assert!(parse_document(b"").unwrap().is_empty());
        assert!(parse_document(b"# only a comment\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_rejects_non_mapping_root() {
        assert!(parse_document(b"- a\n- b\n").is_err());
    }

    #[test]
    fn test_ensure_mapping_inserts_and_reuses() {
        let mut doc = parse_document(b"users:\n  alice: {}\n").unwrap();

        let users = ensure_mapping(&mut doc, "users");
        assert_eq!(users.len(), 1);

        ensure_mapping(&mut doc, "invites");
        assert!(doc.contains_key(Value::from("invites")));
    }

    #[test]
    fn test_append_unique() {
        let mut doc = Mapping::new();
        let keys = ensure_sequence(&mut doc, "keys");

        assert!(append_unique(keys, "ssh-ed25519 AAAA one"));
        assert!(!append_unique(keys, "ssh-ed25519 AAAA one"));
        assert!(append_unique(keys, "ssh-ed25519 AAAA two"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_remove_key() {
        let mut doc = parse_document(b"invites:\n  tok: alice\n").unwrap();
        let invites = ensure_mapping(&mut doc, "invites");

        assert!(remove_key(invites, "tok"));
        assert!(!remove_key(invites, "tok"));
        assert!(invites.is_empty());
    }

    #[test]
    fn test_edits_preserve_key_order() {
        let mut doc =
            parse_document(b"users:\n  alice: {}\ngroups: {}\nrepos: {}\n").unwrap();

        let users = ensure_mapping(&mut doc, "users");
        ensure_mapping(users, "bob");

        let out = String::from_utf8(encode(&doc).unwrap()).unwrap();
        let users_at = out.find("users:").unwrap();
        let groups_at = out.find("groups:").unwrap();
        let repos_at = out.find("repos:").unwrap();

        assert!(users_at < groups_at && groups_at < repos_at, "{out}");
    }
}

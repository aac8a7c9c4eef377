// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Tagged-JSON codec.
//!
//! Plain scalars travel as themselves; everything else is wrapped as
//! `{"__type__": tag, "__schema__": version, ...fields}`. The decoder
//! mirrors the encoder and additionally tolerates tags emitted by older
//! peers (legacy field names, missing trailing fields).

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map as JsonMap, Number, Value as Json};

use crate::error::{Result, WireError};
use crate::refs::{Ref, StreamRef};
use crate::value::Value;

/// Version stamped into every emitted tag. The decoder accepts this and
/// every version below it.
pub const SCHEMA_VERSION: u64 = 1;

/// Atoms rehydrated by default. Everything else decodes to a literal
/// string unless the allowlist says otherwise, so a hostile peer cannot
/// grow the host's symbol table.
pub const MINIMAL_ATOMS: &[&str] = &["ok", "error", "nil", "true", "false"];

/// Which `atom` tags rehydrate into [`Value::Atom`] on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomAllowlist {
    #[default]
    Minimal,
    All,
    Custom(BTreeSet<String>),
}

impl AtomAllowlist {
    pub fn permits(&self, name: &str) -> bool {
        match self {
            AtomAllowlist::Minimal => MINIMAL_ATOMS.contains(&name),
            AtomAllowlist::All => true,
            AtomAllowlist::Custom(set) => set.contains(name),
        }
    }
}

fn tag(name: &str, fields: Vec<(&str, Json)>) -> Json {
    let mut obj = JsonMap::new();
    obj.insert("__type__".into(), Json::String(name.into()));
    obj.insert("__schema__".into(), Json::Number(Number::from(SCHEMA_VERSION)));
    for (k, v) in fields {
        obj.insert(k.into(), v);
    }
    Json::Object(obj)
}

/// Encodes a host value into its wire form.
///
/// Total for every supported value; fails with [`WireError::Serialization`]
/// for values that have no wire mapping (opaque handles, callbacks that
/// were never registered).
pub fn encode_value(value: &Value) -> Result<Json> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        // Non-finite floats have no JSON number form; they ride a tag.
        Value::Float(f) if f.is_infinite() && *f > 0.0 => {
            Ok(tag("special_float", vec![("value", json!("infinity"))]))
        }
        Value::Float(f) if f.is_infinite() => {
            Ok(tag("special_float", vec![("value", json!("neg_infinity"))]))
        }
        Value::Float(f) if f.is_nan() => {
            Ok(tag("special_float", vec![("value", json!("nan"))]))
        }
        Value::Atom(name) => Ok(tag("atom", vec![("value", json!(name))])),
        Value::Int(i) => Ok(Json::Number(Number::from(*i))),
        Value::Float(f) => Ok(Json::Number(
            Number::from_f64(*f).expect("finite float checked above"),
        )),
        Value::Str(s) => Ok(Json::String(s.clone())),
        // The explicit wrapper wins over the UTF-8 sniff below.
        Value::Bytes(b) => Ok(tag("bytes", vec![("data", json!(BASE64.encode(b)))])),
        Value::Binary(b) => match std::str::from_utf8(b) {
            Ok(s) => Ok(Json::String(s.to_string())),
            Err(_) => Ok(tag("bytes", vec![("data", json!(BASE64.encode(b)))])),
        },
        Value::List(items) => Ok(Json::Array(encode_all(items)?)),
        Value::Tuple(items) => Ok(tag("tuple", vec![("elements", Json::Array(encode_all(items)?))])),
        // Sets go out in canonical order even when built by hand, the same
        // ordering the worker emits.
        Value::Set(items) => {
            let sorted = crate::value::canonicalize(items.clone());
            Ok(tag("set", vec![("elements", Json::Array(encode_all(&sorted)?))]))
        }
        Value::FrozenSet(items) => {
            let sorted = crate::value::canonicalize(items.clone());
            Ok(tag("frozenset", vec![("elements", Json::Array(encode_all(&sorted)?))]))
        }
        Value::Date(d) => Ok(tag("date", vec![("value", json!(d.to_string()))])),
        Value::Time(t) => Ok(tag("time", vec![("value", json!(t.to_string()))])),
        Value::DateTime(dt) => Ok(tag("datetime", vec![("value", json!(dt.to_rfc3339()))])),
        Value::Complex { re, im } => {
            Ok(tag("complex", vec![("real", json!(re)), ("imag", json!(im))]))
        }
        Value::Map(pairs) => encode_map(pairs),
        Value::Ref(r) => Ok(r.to_wire()),
        Value::Stream(s) => Ok(s.to_wire()),
        Value::Callback(cb) => {
            let id = cb.id.as_ref().ok_or_else(|| {
                WireError::Serialization(
                    "callback has not been registered; encode it through the runtime codec".into(),
                )
            })?;
            let mut fields = vec![("callback_id", json!(id)), ("arity", json!(cb.arity))];
            if let Some(addr) = &cb.address {
                fields.push(("address", json!(addr)));
            }
            Ok(tag("callback", fields))
        }
        Value::Opaque { type_name } => Err(WireError::Serialization(format!(
            "value of type `{type_name}` has no wire mapping"
        ))),
    }
}

fn encode_all(items: &[Value]) -> Result<Vec<Json>> {
    items.iter().map(encode_value).collect()
}

/// String- and atom-keyed maps collapse to plain objects (atom keys become
/// strings); any other key forces the explicit pair-list tag, because a
/// JSON object cannot carry non-string keys.
fn encode_map(pairs: &[(Value, Value)]) -> Result<Json> {
    let plain_keys = pairs
        .iter()
        .all(|(k, _)| matches!(k, Value::Str(_) | Value::Atom(_)));
    if plain_keys {
        let mut obj = JsonMap::new();
        for (k, v) in pairs {
            let key = match k {
                Value::Str(s) | Value::Atom(s) => s.clone(),
                _ => unreachable!("checked above"),
            };
            obj.insert(key, encode_value(v)?);
        }
        return Ok(Json::Object(obj));
    }
    let encoded: Result<Vec<Json>> = pairs
        .iter()
        .map(|(k, v)| Ok(Json::Array(vec![encode_value(k)?, encode_value(v)?])))
        .collect();
    Ok(tag("dict", vec![("pairs", Json::Array(encoded?))]))
}

/// Decodes a wire value back into a host value.
///
/// `atom` tags outside `allowlist` decode to the literal string. Unknown
/// tags decode to a plain map rather than failing, so newer minor fields
/// from old or future peers never break the session.
pub fn decode_value(value: &Json, allowlist: &AtomAllowlist) -> Result<Value> {
    match value {
        Json::Null => Ok(Value::Null),
        Json::Bool(b) => Ok(Value::Bool(*b)),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else {
                Ok(Value::Float(n.as_f64().ok_or_else(|| {
                    WireError::Decode(format!("unrepresentable number {n}"))
                })?))
            }
        }
        Json::String(s) => Ok(Value::Str(s.clone())),
        Json::Array(items) => Ok(Value::List(
            items
                .iter()
                .map(|v| decode_value(v, allowlist))
                .collect::<Result<Vec<_>>>()?,
        )),
        Json::Object(obj) => match obj.get("__type__").and_then(Json::as_str) {
            Some(tag_name) => decode_tagged(tag_name, obj, value, allowlist),
            None => decode_plain_map(obj, allowlist),
        },
    }
}

fn decode_tagged(
    tag_name: &str,
    obj: &JsonMap<String, Json>,
    raw: &Json,
    allowlist: &AtomAllowlist,
) -> Result<Value> {
    check_schema(obj)?;
    match tag_name {
        "atom" | "symbol" => {
            let name = obj.get("value").and_then(Json::as_str).unwrap_or_default();
            if allowlist.permits(name) {
                Ok(Value::Atom(name.to_string()))
            } else {
                Ok(Value::Str(name.to_string()))
            }
        }
        "tuple" => Ok(Value::Tuple(decode_elements(obj, allowlist)?)),
        "set" => Ok(Value::set(decode_elements(obj, allowlist)?)),
        "frozenset" => Ok(Value::frozen_set(decode_elements(obj, allowlist)?)),
        "bytes" => {
            // Older peers used `value` for the payload field.
            let data = obj
                .get("data")
                .or_else(|| obj.get("value"))
                .and_then(Json::as_str)
                .ok_or_else(|| WireError::Decode("bytes tag missing `data`".into()))?;
            let bytes = BASE64
                .decode(data)
                .map_err(|e| WireError::Decode(format!("bytes tag has invalid base64: {e}")))?;
            Ok(Value::Binary(bytes))
        }
        "complex" => {
            let re = field_f64(obj, "real")?;
            let im = field_f64(obj, "imag")?;
            Ok(Value::Complex { re, im })
        }
        "datetime" => decode_datetime(field_value_str(obj, "datetime")?),
        "date" => {
            let s = field_value_str(obj, "date")?;
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Value::Date)
                .map_err(|e| WireError::Decode(format!("invalid date `{s}`: {e}")))
        }
        "time" => {
            let s = field_value_str(obj, "time")?;
            NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                .map(Value::Time)
                .map_err(|e| WireError::Decode(format!("invalid time `{s}`: {e}")))
        }
        "special_float" => match obj.get("value").and_then(Json::as_str) {
            Some("infinity") => Ok(Value::Float(f64::INFINITY)),
            Some("neg_infinity") => Ok(Value::Float(f64::NEG_INFINITY)),
            Some("nan") => Ok(Value::Float(f64::NAN)),
            other => Err(WireError::Decode(format!(
                "special_float with unknown value {other:?}"
            ))),
        },
        // Legacy spellings from schema-0 peers.
        "infinity" => Ok(Value::Float(f64::INFINITY)),
        "neg_infinity" => Ok(Value::Float(f64::NEG_INFINITY)),
        "nan" => Ok(Value::Float(f64::NAN)),
        "dict" => {
            let pairs = obj
                .get("pairs")
                .and_then(Json::as_array)
                .ok_or_else(|| WireError::Decode("dict tag missing `pairs`".into()))?;
            let mut decoded = Vec::with_capacity(pairs.len());
            for pair in pairs {
                let kv = pair
                    .as_array()
                    .filter(|kv| kv.len() == 2)
                    .ok_or_else(|| WireError::Decode("dict pair must be a 2-element array".into()))?;
                decoded.push((
                    decode_value(&kv[0], allowlist)?,
                    decode_value(&kv[1], allowlist)?,
                ));
            }
            Ok(Value::Map(decoded))
        }
        "ref" => {
            // A ref that the peer marked as iterable is a stream ref even
            // under the plain tag name.
            if obj.contains_key("stream_type") {
                Ok(Value::Stream(StreamRef::from_wire(raw)?))
            } else {
                Ok(Value::Ref(Ref::from_wire(raw)?))
            }
        }
        "stream_ref" => Ok(Value::Stream(StreamRef::from_wire(raw)?)),
        "callback" => {
            let id = obj
                .get("callback_id")
                .or_else(|| obj.get("ref_id"))
                .and_then(Json::as_str)
                .ok_or_else(|| WireError::Decode("callback tag missing `callback_id`".into()))?;
            let arity = obj.get("arity").and_then(Json::as_u64).unwrap_or(0) as usize;
            let address = obj.get("address").and_then(Json::as_str).map(str::to_string);
            Ok(Value::Callback(crate::value::Callback::registered(
                id, arity, address,
            )))
        }
        // Unknown tag: keep the payload readable instead of failing, the
        // way the worker side treats tags it does not know.
        _ => decode_plain_map(obj, allowlist),
    }
}

fn decode_plain_map(obj: &JsonMap<String, Json>, allowlist: &AtomAllowlist) -> Result<Value> {
    let mut pairs = Vec::with_capacity(obj.len());
    for (k, v) in obj {
        pairs.push((Value::Str(k.clone()), decode_value(v, allowlist)?));
    }
    Ok(Value::Map(pairs))
}

fn decode_elements(obj: &JsonMap<String, Json>, allowlist: &AtomAllowlist) -> Result<Vec<Value>> {
    let elements = obj
        .get("elements")
        .or_else(|| obj.get("value"))
        .and_then(Json::as_array)
        .cloned()
        .unwrap_or_default();
    elements.iter().map(|v| decode_value(v, allowlist)).collect()
}

fn decode_datetime(s: &str) -> Result<Value> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(Value::DateTime(dt));
    }
    // Workers commonly emit naive timestamps; read them as UTC.
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Value::DateTime(naive.and_utc().fixed_offset()))
        .map_err(|e| WireError::Decode(format!("invalid datetime `{s}`: {e}")))
}

fn field_value_str<'a>(obj: &'a JsonMap<String, Json>, tag_name: &str) -> Result<&'a str> {
    obj.get("value")
        .and_then(Json::as_str)
        .ok_or_else(|| WireError::Decode(format!("{tag_name} tag missing `value`")))
}

fn field_f64(obj: &JsonMap<String, Json>, key: &str) -> Result<f64> {
    obj.get(key)
        .and_then(Json::as_f64)
        .ok_or_else(|| WireError::Decode(format!("complex tag missing `{key}`")))
}

fn check_schema(obj: &JsonMap<String, Json>) -> Result<()> {
    // Absent schema means a pre-versioning peer; anything up to the current
    // version is fine.
    match obj.get("__schema__").and_then(Json::as_u64) {
        Some(v) if v > SCHEMA_VERSION => Err(WireError::Decode(format!(
            "wire value uses schema {v}, newer than supported {SCHEMA_VERSION}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refs::StreamKind;
    use crate::value::Callback;

    fn roundtrip(v: Value) -> Value {
        let wire = encode_value(&v).expect("encode");
        decode_value(&wire, &AtomAllowlist::All).expect("decode")
    }

    #[test]
    fn test_scalar_roundtrips() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Int(-42),
            Value::Float(1.5),
            Value::Str("hello".into()),
        ] {
            assert_eq!(roundtrip(v.clone()), v);
        }
    }

    #[test]
    fn test_special_float_roundtrips() {
        assert_eq!(roundtrip(Value::Float(f64::INFINITY)), Value::Float(f64::INFINITY));
        assert_eq!(
            roundtrip(Value::Float(f64::NEG_INFINITY)),
            Value::Float(f64::NEG_INFINITY)
        );
        match roundtrip(Value::Float(f64::NAN)) {
            Value::Float(f) => assert!(f.is_nan()),
            other => panic!("expected float, got {other:?}"),
        }
    }

    #[test]
    fn test_special_float_tagged_before_generic_number() {
        let wire = encode_value(&Value::Float(f64::INFINITY)).unwrap();
        assert_eq!(wire["__type__"], "special_float");
        assert_eq!(wire["value"], "infinity");
    }

    #[test]
    fn test_tuple_of_atom_and_binary_matches_wire_shape() {
        // The canonical interop vector: a 2-tuple of a symbol and a
        // non-UTF-8 binary.
        let v = Value::Tuple(vec![Value::atom("ok"), Value::Binary(vec![1, 2, 255])]);
        let wire = encode_value(&v).unwrap();
        assert_eq!(
            wire,
            serde_json::json!({
                "__type__": "tuple",
                "__schema__": 1,
                "elements": [
                    {"__type__": "atom", "__schema__": 1, "value": "ok"},
                    {"__type__": "bytes", "__schema__": 1, "data": "AQL/"}
                ]
            })
        );
    }

    #[test]
    fn test_utf8_binary_passes_through_as_string() {
        let wire = encode_value(&Value::Binary(b"hello".to_vec())).unwrap();
        assert_eq!(wire, serde_json::json!("hello"));
    }

    #[test]
    fn test_bytes_wrapper_beats_utf8_sniff() {
        let wire = encode_value(&Value::Bytes(b"hello".to_vec())).unwrap();
        assert_eq!(wire["__type__"], "bytes");
        assert_eq!(wire["data"], "aGVsbG8=");
    }

    #[test]
    fn test_nested_composite_roundtrip() {
        // A tuple of sets of bytes, and a dict keyed by tuples.
        let v = Value::Tuple(vec![
            Value::set(vec![
                Value::Bytes(vec![0, 159]),
                Value::Bytes(vec![1, 2]),
            ]),
            Value::Map(vec![(
                Value::Tuple(vec![Value::Int(1), Value::Int(2)]),
                Value::Str("point".into()),
            )]),
        ]);
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn test_hand_built_set_encodes_canonically() {
        let unsorted = Value::Set(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        let wire = encode_value(&unsorted).unwrap();
        assert_eq!(wire["elements"], serde_json::json!([1, 2, 3]));
        assert_eq!(roundtrip(unsorted), Value::set(vec![Value::Int(1), Value::Int(2), Value::Int(3)]));
    }

    #[test]
    fn test_string_keyed_map_is_plain_object() {
        let v = Value::Map(vec![
            (Value::Str("a".into()), Value::Int(1)),
            (Value::atom("ok"), Value::Int(2)),
        ]);
        let wire = encode_value(&v).unwrap();
        assert_eq!(wire, serde_json::json!({"a": 1, "ok": 2}));
    }

    #[test]
    fn test_non_string_keyed_map_uses_dict_tag() {
        let v = Value::Map(vec![(Value::Int(7), Value::Str("seven".into()))]);
        let wire = encode_value(&v).unwrap();
        assert_eq!(wire["__type__"], "dict");
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn test_atom_allowlist_gates_rehydration() {
        let wire = encode_value(&Value::atom("launch_missiles")).unwrap();
        let minimal = decode_value(&wire, &AtomAllowlist::Minimal).unwrap();
        assert_eq!(minimal, Value::Str("launch_missiles".into()));

        let all = decode_value(&wire, &AtomAllowlist::All).unwrap();
        assert_eq!(all, Value::Atom("launch_missiles".into()));

        let ok = decode_value(&encode_value(&Value::atom("ok")).unwrap(), &AtomAllowlist::Minimal)
            .unwrap();
        assert_eq!(ok, Value::Atom("ok".into()));
    }

    #[test]
    fn test_custom_allowlist() {
        let mut set = BTreeSet::new();
        set.insert("custom".to_string());
        let allow = AtomAllowlist::Custom(set);
        let wire = encode_value(&Value::atom("custom")).unwrap();
        assert_eq!(decode_value(&wire, &allow).unwrap(), Value::Atom("custom".into()));
        let wire = encode_value(&Value::atom("ok")).unwrap();
        assert_eq!(decode_value(&wire, &allow).unwrap(), Value::Str("ok".into()));
    }

    #[test]
    fn test_temporal_roundtrips() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2025, 3, 14).unwrap());
        let time = Value::Time(NaiveTime::from_hms_milli_opt(9, 26, 53, 590).unwrap());
        let dt = Value::DateTime(
            DateTime::parse_from_rfc3339("2025-03-14T09:26:53.590+02:00").unwrap(),
        );
        assert_eq!(roundtrip(date.clone()), date);
        assert_eq!(roundtrip(time.clone()), time);
        assert_eq!(roundtrip(dt.clone()), dt);
    }

    #[test]
    fn test_naive_datetime_decodes_as_utc() {
        let wire = serde_json::json!({
            "__type__": "datetime", "__schema__": 1, "value": "2024-01-01T10:00:00"
        });
        match decode_value(&wire, &AtomAllowlist::Minimal).unwrap() {
            Value::DateTime(dt) => assert_eq!(dt.to_rfc3339(), "2024-01-01T10:00:00+00:00"),
            other => panic!("expected datetime, got {other:?}"),
        }
    }

    #[test]
    fn test_complex_roundtrip() {
        let v = Value::Complex { re: 1.0, im: -2.5 };
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn test_ref_decode_requires_identity() {
        let wire = serde_json::json!({"__type__": "ref", "__schema__": 1, "id": "x"});
        assert!(decode_value(&wire, &AtomAllowlist::Minimal).is_err());
    }

    #[test]
    fn test_stream_ref_roundtrip() {
        let v = Value::Stream(StreamRef::new(Ref::new("it_1", "s1"), StreamKind::Iterator));
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn test_unregistered_callback_fails_to_encode() {
        let v = Value::Callback(Callback::local(1, |_| Ok(Value::Null)));
        assert!(matches!(encode_value(&v), Err(WireError::Serialization(_))));
    }

    #[test]
    fn test_registered_callback_roundtrip() {
        let v = Value::Callback(Callback::registered("cb_9", 2, Some("host:50051".into())));
        let wire = encode_value(&v).unwrap();
        assert_eq!(wire["callback_id"], "cb_9");
        assert_eq!(wire["arity"], 2);
        assert_eq!(roundtrip(v.clone()), v);
    }

    #[test]
    fn test_opaque_fails_with_type_name() {
        let err = encode_value(&Value::Opaque { type_name: "PosixFd".into() }).unwrap_err();
        assert!(err.to_string().contains("PosixFd"));
    }

    #[test]
    fn test_unknown_tag_decodes_to_map() {
        let wire = serde_json::json!({
            "__type__": "hologram", "__schema__": 1, "x": 1
        });
        match decode_value(&wire, &AtomAllowlist::Minimal).unwrap() {
            Value::Map(pairs) => assert!(pairs.iter().any(|(k, _)| k == &Value::Str("x".into()))),
            other => panic!("expected map, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_schema_field_is_tolerated() {
        let wire = serde_json::json!({"__type__": "tuple", "elements": [1, 2]});
        assert_eq!(
            decode_value(&wire, &AtomAllowlist::Minimal).unwrap(),
            Value::Tuple(vec![Value::Int(1), Value::Int(2)])
        );
    }

    #[test]
    fn test_future_schema_is_rejected() {
        let wire = serde_json::json!({"__type__": "tuple", "__schema__": 99, "elements": []});
        assert!(decode_value(&wire, &AtomAllowlist::Minimal).is_err());
    }

    #[test]
    fn test_legacy_elements_field_name() {
        let wire = serde_json::json!({"__type__": "tuple", "__schema__": 1, "value": [1]});
        assert_eq!(
            decode_value(&wire, &AtomAllowlist::Minimal).unwrap(),
            Value::Tuple(vec![Value::Int(1)])
        );
    }
}

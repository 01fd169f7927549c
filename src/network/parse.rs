//! Decoding of received datagrams back into value lists.

use chrono::prelude::*;
use chrono::Duration;

use crate::api::{Cdtime, Identifier, Value, ValueList};
use crate::errors::{NetworkError, ParseError};
use crate::network::crypto::{self, PasswordLookup};
use crate::network::{
    SecurityLevel, DS_TYPE_ABSOLUTE, DS_TYPE_COUNTER, DS_TYPE_DERIVE, DS_TYPE_GAUGE,
    TYPE_ENCRYPT_AES256, TYPE_HOST, TYPE_INTERVAL, TYPE_INTERVAL_HR, TYPE_PLUGIN,
    TYPE_PLUGIN_INSTANCE, TYPE_SIGN_SHA256, TYPE_TIME, TYPE_TIME_HR, TYPE_TYPE,
    TYPE_TYPE_INSTANCE, TYPE_VALUES,
};
use crate::typesdb::TypesDb;

/// Options for [`parse`](fn.parse.html).
#[derive(Default)]
pub struct ParseOpts<'a> {
    /// Passwords for verifying signed and decrypting encrypted datagrams.
    /// Without a lookup every envelope is rejected.
    pub password_lookup: Option<&'a dyn PasswordLookup>,

    /// The weakest protection still accepted.
    pub security_level: SecurityLevel,

    /// When present, parsed value lists get their data source names from
    /// the data set registered under their type.
    pub typesdb: Option<&'a TypesDb>,
}

/// Parses one datagram into the value lists it contains.
///
/// A signature or encryption envelope is honored when it is the first part;
/// exactly one envelope layer is allowed. Identifier, time and interval
/// parts carry state from one value list to the next, a values part emits a
/// value list, unknown part types are skipped. On error, the lists decoded
/// up to that point travel inside the [`ParseError`](../../errors/struct.ParseError.html).
pub fn parse(b: &[u8], opts: ParseOpts) -> Result<Vec<ValueList>, ParseError> {
    if b.len() >= 4 {
        match u16::from_be_bytes([b[0], b[1]]) {
            TYPE_SIGN_SHA256 => return parse_signed(b, &opts),
            TYPE_ENCRYPT_AES256 => return parse_encrypted(b, &opts),
            _ => {}
        }
    }

    require_level(SecurityLevel::None, opts.security_level)?;
    parse_parts(b, &opts)
}

fn require_level(
    observed: SecurityLevel,
    required: SecurityLevel,
) -> Result<(), NetworkError> {
    if observed < required {
        return Err(NetworkError::SecurityTooLow { observed, required });
    }
    Ok(())
}

fn parse_signed(b: &[u8], opts: &ParseOpts) -> Result<Vec<ValueList>, ParseError> {
    let length = usize::from(u16::from_be_bytes([b[2], b[3]]));
    if length <= 4 + 32 || length > b.len() {
        return Err(NetworkError::Invalid("bad signature part length").into());
    }

    require_level(SecurityLevel::Sign, opts.security_level)?;

    let lookup = opts
        .password_lookup
        .ok_or(NetworkError::Invalid("signed datagram but no password lookup configured"))?;

    // The part holds digest and username; the signed payload is everything
    // after the part.
    crypto::verify(&b[4..length], &b[length..], lookup)?;
    parse_parts(&b[length..], opts)
}

fn parse_encrypted(b: &[u8], opts: &ParseOpts) -> Result<Vec<ValueList>, ParseError> {
    let length = usize::from(u16::from_be_bytes([b[2], b[3]]));
    if length < 42 || length != b.len() {
        return Err(NetworkError::Invalid("bad encryption part length").into());
    }

    let lookup = opts
        .password_lookup
        .ok_or(NetworkError::Invalid("encrypted datagram but no password lookup configured"))?;

    let plaintext = crypto::decrypt(&b[4..], lookup)?;
    parse_parts(&plaintext, opts)
}

/// Decoder state carried from part to part. The `*_hr` flags remember
/// whether the current emission already saw a high-resolution part, which
/// outranks the legacy seconds encoding.
#[derive(Default)]
struct State {
    identifier: Identifier,
    time: Option<DateTime<Utc>>,
    time_hr: bool,
    interval: Option<Duration>,
    interval_hr: bool,
}

fn parse_parts(b: &[u8], opts: &ParseOpts) -> Result<Vec<ValueList>, ParseError> {
    let mut out = Vec::new();
    match walk_parts(b, opts, &mut out) {
        Ok(()) => Ok(out),
        Err(kind) => Err(ParseError {
            kind,
            value_lists: out,
        }),
    }
}

fn walk_parts(
    b: &[u8],
    opts: &ParseOpts,
    out: &mut Vec<ValueList>,
) -> Result<(), NetworkError> {
    let mut state = State::default();
    let mut rest = b;

    while !rest.is_empty() {
        if rest.len() < 4 {
            return Err(NetworkError::Invalid("truncated part header"));
        }
        let part_type = u16::from_be_bytes([rest[0], rest[1]]);
        let length = usize::from(u16::from_be_bytes([rest[2], rest[3]]));
        if length < 5 {
            return Err(NetworkError::Invalid("part length below minimum"));
        }
        if length > rest.len() {
            return Err(NetworkError::Invalid("part length exceeds datagram"));
        }

        let payload = &rest[4..length];
        rest = &rest[length..];

        match part_type {
            TYPE_HOST => state.identifier.host = parse_string(payload)?,
            TYPE_PLUGIN => state.identifier.plugin = parse_string(payload)?,
            TYPE_PLUGIN_INSTANCE => state.identifier.plugin_instance = parse_string(payload)?,
            TYPE_TYPE => state.identifier.type_ = parse_string(payload)?,
            TYPE_TYPE_INSTANCE => state.identifier.type_instance = parse_string(payload)?,

            TYPE_TIME => {
                let secs = parse_int(payload)?;
                if !state.time_hr {
                    state.time = Some(Utc.timestamp(secs as i64, 0));
                }
            }
            TYPE_TIME_HR => {
                state.time = Some(Cdtime(parse_int(payload)?).into());
                state.time_hr = true;
            }
            TYPE_INTERVAL => {
                let secs = parse_int(payload)?;
                if !state.interval_hr {
                    state.interval = Some(Duration::seconds(secs as i64));
                }
            }
            TYPE_INTERVAL_HR => {
                state.interval = Some(Cdtime(parse_int(payload)?).into());
                state.interval_hr = true;
            }

            TYPE_VALUES => {
                let values = match parse_values(payload) {
                    Ok(values) => values,
                    // An unsupported value type loses this value list only;
                    // the rest of the datagram is still good.
                    Err(NetworkError::Unsupported(_)) => {
                        state.time_hr = false;
                        state.interval_hr = false;
                        continue;
                    }
                    Err(err) => return Err(err),
                };

                let mut vl = ValueList {
                    identifier: state.identifier.clone(),
                    time: state.time,
                    interval: state.interval.unwrap_or_else(Duration::zero),
                    values,
                    dsnames: None,
                    meta: None,
                };
                if let Some(db) = opts.typesdb {
                    if let Some(set) = db.get(&vl.identifier.type_) {
                        if set.sources.len() == vl.values.len() {
                            vl.dsnames =
                                Some(set.sources.iter().map(|s| s.name.clone()).collect());
                        }
                    }
                }
                out.push(vl);

                // The high-resolution tie break is per emission.
                state.time_hr = false;
                state.interval_hr = false;
            }

            TYPE_SIGN_SHA256 | TYPE_ENCRYPT_AES256 => {
                return Err(NetworkError::Invalid("security envelope not outermost"));
            }

            // Ignore unknown part types.
            _ => {}
        }
    }

    Ok(())
}

fn parse_string(payload: &[u8]) -> Result<String, NetworkError> {
    match payload.split_last() {
        Some((0, contents)) => String::from_utf8(contents.to_vec())
            .map_err(|_| NetworkError::Invalid("string part is not valid UTF-8")),
        _ => Err(NetworkError::Invalid("string part is not NUL terminated")),
    }
}

fn parse_int(payload: &[u8]) -> Result<u64, NetworkError> {
    if payload.len() != 8 {
        return Err(NetworkError::Invalid("integer part must be 12 bytes"));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(payload);
    Ok(u64::from_be_bytes(bytes))
}

fn parse_values(payload: &[u8]) -> Result<Vec<Value>, NetworkError> {
    if payload.len() < 2 {
        return Err(NetworkError::Invalid("values part truncated"));
    }
    let count = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
    // The count must agree with the part length; a lying count would read
    // out of bounds otherwise.
    if payload.len() != 2 + 9 * count {
        return Err(NetworkError::Invalid("values count disagrees with part length"));
    }

    let tags = &payload[2..2 + count];
    let cells = &payload[2 + count..];
    let mut values = Vec::with_capacity(count);

    for (i, &tag) in tags.iter().enumerate() {
        let mut cell = [0u8; 8];
        cell.copy_from_slice(&cells[8 * i..8 * i + 8]);
        let value = match tag {
            DS_TYPE_COUNTER => Value::Counter(u64::from_be_bytes(cell)),
            DS_TYPE_GAUGE => Value::Gauge(f64::from_le_bytes(cell)),
            DS_TYPE_DERIVE => Value::Derive(i64::from_be_bytes(cell)),
            DS_TYPE_ABSOLUTE => {
                return Err(NetworkError::Unsupported("absolute values"));
            }
            _ => return Err(NetworkError::Invalid("unknown value type")),
        };
        values.push(value);
    }

    Ok(values)
}

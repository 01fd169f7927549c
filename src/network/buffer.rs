//! The state-compressing datagram encoder.

use chrono::prelude::*;
use chrono::Duration;

use crate::api::{Cdtime, Value, ValueList};
use crate::errors::NetworkError;
use crate::network::crypto;
use crate::network::{
    DS_TYPE_COUNTER, DS_TYPE_DERIVE, DS_TYPE_GAUGE, TYPE_HOST, TYPE_INTERVAL_HR, TYPE_PLUGIN,
    TYPE_PLUGIN_INSTANCE, TYPE_TIME_HR, TYPE_TYPE, TYPE_TYPE_INSTANCE, TYPE_VALUES,
};

/// Default datagram size, collectd's IPv6-safe buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 1452;

/// The exact little-endian encoding of a NaN gauge on the wire.
const NAN_BYTES: [u8; 8] = [0, 0, 0, 0, 0, 0, 0xf8, 0x7f];

#[derive(Debug, Clone)]
struct Credentials {
    username: String,
    password: String,
}

/// What has already been emitted into the current datagram. A value list
/// field is only written when it differs from this shadow copy.
#[derive(Debug, Clone, Default)]
struct State {
    host: String,
    plugin: String,
    plugin_instance: String,
    type_: String,
    type_instance: String,
    time: Option<DateTime<Utc>>,
    interval: Option<Duration>,
}

/// Accumulates the binary representation of multiple value lists, within a
/// fixed datagram budget.
///
/// `write` appends one value list, eliding every part whose value matches
/// the previous one. When a list does not fit, the buffer is rolled back to
/// its previous contents and [`NotEnoughSpace`](../../errors/enum.NetworkError.html)
/// is returned; the caller flushes the pending datagram with `finish` and
/// retries. A signed or encrypted buffer reserves the envelope overhead up
/// front, so finished datagrams never exceed the configured size.
#[derive(Debug)]
pub struct Buffer {
    buffer: Vec<u8>,
    state: State,
    size: usize,
    credentials: Option<Credentials>,
    encrypt: bool,
}

impl Buffer {
    /// A plain-text buffer of `size` bytes.
    pub fn new(size: usize) -> Buffer {
        Buffer {
            buffer: Vec::with_capacity(size),
            state: State::default(),
            size,
            credentials: None,
            encrypt: false,
        }
    }

    /// A buffer whose datagrams are signed on `finish`. The signature part
    /// costs `36 + username` bytes, which are taken out of the budget.
    pub fn signed<U, P>(size: usize, username: U, password: P) -> Buffer
    where
        U: Into<String>,
        P: Into<String>,
    {
        let username = username.into();
        let overhead = 36 + username.len();
        Buffer {
            buffer: Vec::with_capacity(size),
            state: State::default(),
            size: size.saturating_sub(overhead),
            credentials: Some(Credentials {
                username,
                password: password.into(),
            }),
            encrypt: false,
        }
    }

    /// A buffer whose datagrams are encrypted on `finish`. The encryption
    /// part costs `42 + username` bytes on top of the payload.
    pub fn encrypted<U, P>(size: usize, username: U, password: P) -> Buffer
    where
        U: Into<String>,
        P: Into<String>,
    {
        let username = username.into();
        let overhead = 42 + username.len();
        Buffer {
            buffer: Vec::with_capacity(size),
            state: State::default(),
            size: size.saturating_sub(overhead),
            credentials: Some(Credentials {
                username,
                password: password.into(),
            }),
            encrypt: true,
        }
    }

    /// The number of bytes still available in the buffer.
    pub fn free(&self) -> usize {
        self.size.saturating_sub(self.buffer.len())
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Appends a value list. On failure the buffer and the shadow state are
    /// exactly as before the call.
    pub fn write(&mut self, vl: &ValueList) -> Result<(), NetworkError> {
        vl.check().map_err(NetworkError::from)?;

        let length = self.buffer.len();
        let state = self.state.clone();
        self.write_value_list(vl).map_err(|err| {
            self.buffer.truncate(length);
            self.state = state;
            err
        })
    }

    /// Drains the buffer into one datagram, wrapping it in the configured
    /// envelope. The shadow state is reset, so the next datagram starts with
    /// a full set of identifier parts. An empty buffer yields no bytes.
    pub fn finish(&mut self) -> Result<Vec<u8>, NetworkError> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }

        let payload = ::std::mem::replace(&mut self.buffer, Vec::with_capacity(self.size));
        self.state = State::default();

        match self.credentials {
            None => Ok(payload),
            Some(ref c) if self.encrypt => crypto::encrypt(&payload, &c.username, &c.password),
            Some(ref c) => Ok(crypto::sign(&payload, &c.username, &c.password)),
        }
    }

    fn write_value_list(&mut self, vl: &ValueList) -> Result<(), NetworkError> {
        self.write_identifier(vl)?;
        self.write_time(vl.time.unwrap_or_else(Utc::now))?;
        self.write_interval(vl.interval)?;
        self.write_values(&vl.values)
    }

    fn write_identifier(&mut self, vl: &ValueList) -> Result<(), NetworkError> {
        let id = &vl.identifier;
        if id.host != self.state.host {
            self.write_string(TYPE_HOST, &id.host)?;
            self.state.host = id.host.clone();
        }
        if id.plugin != self.state.plugin {
            self.write_string(TYPE_PLUGIN, &id.plugin)?;
            self.state.plugin = id.plugin.clone();
        }
        if id.plugin_instance != self.state.plugin_instance {
            self.write_string(TYPE_PLUGIN_INSTANCE, &id.plugin_instance)?;
            self.state.plugin_instance = id.plugin_instance.clone();
        }
        if id.type_ != self.state.type_ {
            self.write_string(TYPE_TYPE, &id.type_)?;
            self.state.type_ = id.type_.clone();
        }
        if id.type_instance != self.state.type_instance {
            self.write_string(TYPE_TYPE_INSTANCE, &id.type_instance)?;
            self.state.type_instance = id.type_instance.clone();
        }
        Ok(())
    }

    fn write_time(&mut self, time: DateTime<Utc>) -> Result<(), NetworkError> {
        if self.state.time == Some(time) {
            return Ok(());
        }
        self.write_int(TYPE_TIME_HR, Cdtime::from(time).0)?;
        self.state.time = Some(time);
        Ok(())
    }

    fn write_interval(&mut self, interval: Duration) -> Result<(), NetworkError> {
        if self.state.interval == Some(interval) {
            return Ok(());
        }
        self.write_int(TYPE_INTERVAL_HR, Cdtime::from(interval).0)?;
        self.state.interval = Some(interval);
        Ok(())
    }

    fn write_values(&mut self, values: &[Value]) -> Result<(), NetworkError> {
        let size = 6 + 9 * values.len();
        if size > self.free() {
            return Err(NetworkError::NotEnoughSpace {
                need: size,
                free: self.free(),
            });
        }

        self.buffer.extend_from_slice(&TYPE_VALUES.to_be_bytes());
        self.buffer.extend_from_slice(&(size as u16).to_be_bytes());
        self.buffer
            .extend_from_slice(&(values.len() as u16).to_be_bytes());

        for value in values {
            let tag = match *value {
                Value::Counter(_) => DS_TYPE_COUNTER,
                Value::Gauge(_) => DS_TYPE_GAUGE,
                Value::Derive(_) => DS_TYPE_DERIVE,
            };
            self.buffer.push(tag);
        }

        for value in values {
            match *value {
                Value::Counter(x) => self.buffer.extend_from_slice(&x.to_be_bytes()),
                Value::Derive(x) => self.buffer.extend_from_slice(&x.to_be_bytes()),
                // The protocol encodes gauges in little endian, unlike every
                // other numeric field.
                Value::Gauge(x) => {
                    if x.is_nan() {
                        self.buffer.extend_from_slice(&NAN_BYTES);
                    } else {
                        self.buffer.extend_from_slice(&x.to_le_bytes());
                    }
                }
            }
        }

        Ok(())
    }

    fn write_string(&mut self, part_type: u16, s: &str) -> Result<(), NetworkError> {
        // The terminating NUL is on the wire, so the part is one byte longer
        // than header plus string.
        let size = 4 + s.len() + 1;
        if size > self.free() {
            return Err(NetworkError::NotEnoughSpace {
                need: size,
                free: self.free(),
            });
        }

        self.buffer.extend_from_slice(&part_type.to_be_bytes());
        self.buffer.extend_from_slice(&(size as u16).to_be_bytes());
        self.buffer.extend_from_slice(s.as_bytes());
        self.buffer.push(0);
        Ok(())
    }

    fn write_int(&mut self, part_type: u16, n: u64) -> Result<(), NetworkError> {
        let size = 12;
        if size > self.free() {
            return Err(NetworkError::NotEnoughSpace {
                need: size,
                free: self.free(),
            });
        }

        self.buffer.extend_from_slice(&part_type.to_be_bytes());
        self.buffer.extend_from_slice(&(size as u16).to_be_bytes());
        self.buffer.extend_from_slice(&n.to_be_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ValueListBuilder;

    fn scratch() -> Buffer {
        Buffer::new(DEFAULT_BUFFER_SIZE)
    }

    #[test]
    fn test_write_value_list_compresses() {
        let mut buffer = scratch();

        let vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .time(Utc.timestamp(1426076671, 123_000_000)) // Wed Mar 11 13:24:31 CET 2015
            .interval(Duration::seconds(10))
            .values(vec![Value::Derive(1)])
            .build()
            .unwrap();
        buffer.write(&vl).unwrap();

        // Much the same fields, to exercise the compression.
        let vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .plugin_instance("test")
            .time(Utc.timestamp(1426076681, 234_000_000)) // Wed Mar 11 13:24:41 CET 2015
            .interval(Duration::seconds(10))
            .values(vec![Value::Derive(2)])
            .build()
            .unwrap();
        buffer.write(&vl).unwrap();

        let want: &[u8] = &[
            // vl1
            0, 0, 0, 16, b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.', b'c', b'o', b'm', 0, //
            0, 2, 0, 11, b'g', b'o', b'l', b'a', b'n', b'g', 0, //
            0, 4, 0, 10, b'g', b'a', b'u', b'g', b'e', 0, //
            0, 8, 0, 12, 0x15, 0x40, 0x0c, 0xff, 0xc7, 0xdf, 0x3b, 0x64, //
            0, 9, 0, 12, 0, 0, 0, 0x02, 0x80, 0, 0, 0, //
            0, 6, 0, 15, 0, 1, 2, 0, 0, 0, 0, 0, 0, 0, 1, //
            // vl2: only the parts that changed
            0, 3, 0, 9, b't', b'e', b's', b't', 0, //
            0, 8, 0, 12, 0x15, 0x40, 0x0d, 0x02, 0x4e, 0xf9, 0xdb, 0x22, //
            0, 6, 0, 15, 0, 1, 2, 0, 0, 0, 0, 0, 0, 0, 2, //
        ];
        assert_eq!(&buffer.buffer[..], want);
    }

    #[test]
    fn test_write_time() {
        let mut buffer = scratch();
        buffer
            .write_time(Utc.timestamp(1426083986, 314_000_000)) // Wed Mar 11 15:26:26 CET 2015
            .unwrap();

        // 1426083986.314 * 2^30 -> 0x1540142494189374
        let want: &[u8] = &[
            0, 8, 0, 12, 0x15, 0x40, 0x14, 0x24, 0x94, 0x18, 0x93, 0x74,
        ];
        assert_eq!(&buffer.buffer[..], want);
    }

    #[test]
    fn test_write_values() {
        let mut buffer = scratch();
        buffer
            .write_values(&[
                Value::Gauge(42.0),
                Value::Derive(31337),
                Value::Gauge(::std::f64::NAN),
            ])
            .unwrap();

        let want: &[u8] = &[
            0, 6, // part type
            0, 33, // part length
            0, 3, // number of values
            1, 2, 1, // gauge, derive, gauge
            0, 0, 0, 0, 0, 0, 0x45, 0x40, // 42.0
            0, 0, 0, 0, 0, 0, 0x7a, 0x69, // 31337
            0, 0, 0, 0, 0, 0, 0xf8, 0x7f, // NaN
        ];
        assert_eq!(&buffer.buffer[..], want);
    }

    #[test]
    fn test_write_counter() {
        let mut buffer = scratch();
        buffer.write_values(&[Value::Counter(384)]).unwrap();

        let want: &[u8] = &[0, 6, 0, 15, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0x80];
        assert_eq!(&buffer.buffer[..], want);
    }

    #[test]
    fn test_write_string() {
        let mut buffer = scratch();
        buffer.write_string(0xf007, "foo").unwrap();

        let want: &[u8] = &[0xf0, 0x07, 0, 8, b'f', b'o', b'o', 0];
        assert_eq!(&buffer.buffer[..], want);
    }

    #[test]
    fn test_write_int() {
        let mut buffer = scratch();
        buffer.write_int(23, 384).unwrap();

        let want: &[u8] = &[0, 23, 0, 12, 0, 0, 0, 0, 0, 0, 1, 0x80];
        assert_eq!(&buffer.buffer[..], want);
    }

    #[test]
    fn test_write_rolls_back_on_overflow() {
        let mut buffer = Buffer::new(128);

        let vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .time(Utc.timestamp(1426076671, 0))
            .values(vec![Value::Gauge(42.0)])
            .build()
            .unwrap();
        buffer.write(&vl).unwrap();
        let len = buffer.buffer.len();

        // A different identifier needs new string parts and cannot fit.
        let vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .plugin_instance("this-instance-does-not-fit-anymore")
            .time(Utc.timestamp(1426076671, 0))
            .values(vec![Value::Gauge(42.0)])
            .build()
            .unwrap();
        match buffer.write(&vl) {
            Err(NetworkError::NotEnoughSpace { .. }) => {}
            result => panic!("unexpected result: {:?}", result),
        }
        assert_eq!(buffer.buffer.len(), len);

        // The shadow state was rolled back too: after a finish, the same
        // list encodes from scratch and fits.
        buffer.finish().unwrap();
        buffer.write(&vl).unwrap();
    }

    #[test]
    fn test_write_oversized_value_list() {
        let mut buffer = Buffer::new(64);
        let vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .type_instance("a-rather-long-type-instance-name-that-will-not-fit")
            .values(vec![Value::Gauge(42.0)])
            .build()
            .unwrap();
        assert!(buffer.write(&vl).is_err());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_write_rejects_invalid_value_list() {
        let mut buffer = scratch();
        let mut vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .values(vec![Value::Gauge(42.0)])
            .build()
            .unwrap();
        vl.values.clear();

        match buffer.write(&vl) {
            Err(NetworkError::BadValueList(_)) => {}
            result => panic!("unexpected result: {:?}", result),
        }
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_finish_resets_state() {
        let mut buffer = scratch();
        let vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .time(Utc.timestamp(1426076671, 0))
            .values(vec![Value::Derive(1)])
            .build()
            .unwrap();

        buffer.write(&vl).unwrap();
        let first = buffer.finish().unwrap();
        assert!(buffer.is_empty());

        // The identifier is re-emitted in full after a finish.
        buffer.write(&vl).unwrap();
        let second = buffer.finish().unwrap();
        assert_eq!(first, second);

        assert!(buffer.finish().unwrap().is_empty());
    }

    #[test]
    fn test_signed_buffer_respects_budget() {
        let username = "admin";
        let mut buffer = Buffer::signed(DEFAULT_BUFFER_SIZE, username, "admin");
        assert_eq!(buffer.free(), DEFAULT_BUFFER_SIZE - 36 - username.len());

        let vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .time(Utc.timestamp(1426076671, 0))
            .values(vec![Value::Gauge(42.0)])
            .build()
            .unwrap();
        buffer.write(&vl).unwrap();

        let datagram = buffer.finish().unwrap();
        assert_eq!(&datagram[0..2], &[0x02, 0x00]);
        assert!(datagram.len() <= DEFAULT_BUFFER_SIZE);
    }

    #[test]
    fn test_encrypted_buffer_respects_budget() {
        let username = "admin";
        let mut buffer = Buffer::encrypted(DEFAULT_BUFFER_SIZE, username, "admin");
        assert_eq!(buffer.free(), DEFAULT_BUFFER_SIZE - 42 - username.len());

        let vl = ValueListBuilder::new("example.com", "golang", "gauge")
            .time(Utc.timestamp(1426076671, 0))
            .values(vec![Value::Gauge(42.0)])
            .build()
            .unwrap();
        buffer.write(&vl).unwrap();

        let datagram = buffer.finish().unwrap();
        assert_eq!(&datagram[0..2], &[0x02, 0x10]);
        assert!(datagram.len() <= DEFAULT_BUFFER_SIZE);
    }
}

//! The core collectd data model: values, identifiers and value lists.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::prelude::*;
use chrono::Duration;
use failure::Error;

use crate::errors::{InvalidIdentifier, ValueListError};
use crate::meta;

pub use self::cdtime::Cdtime;

mod cdtime;

/// The value that a plugin reports can be any one of the following types
#[derive(Debug, Clone, Copy)]
pub enum Value {
    /// A COUNTER value is for continuous incrementing counters like the ifInOctets counter in a
    /// router. The COUNTER data source assumes that the observed value never decreases, except
    /// when it overflows. If a counter is reset to zero, for example because an application was
    /// restarted, the wrap-around calculation may result in a huge rate. Thus setting a reasonable
    /// maximum value is essential when using COUNTER data sources.
    Counter(u64),

    /// A GAUGE value is simply stored as-is. This is the right choice for values which may
    /// increase as well as decrease, such as temperatures or the amount of memory used. A NaN
    /// gauge means the observation is missing and survives the wire format as NaN.
    Gauge(f64),

    /// DERIVE will store the derivative of the observed values source. If the data type has a
    /// minimum of zero, negative rates will be discarded. Using DERIVE is a good idea for
    /// measuring cgroup's cpuacct.usage as that stores the total number of CPU nanoseconds by all
    /// tasks in the cgroup; the change (derivative) in CPU nanoseconds is more interesting than
    /// the current value.
    Derive(i64),
}

// Two missing observations compare equal, so a decoded value list can be
// compared against the one that was encoded.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (*self, *other) {
            (Value::Counter(a), Value::Counter(b)) => a == b,
            (Value::Derive(a), Value::Derive(b)) => a == b,
            (Value::Gauge(a), Value::Gauge(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Value::Counter(x) => write!(f, "{}", x),
            Value::Gauge(x) => write!(f, "{}", x),
            Value::Derive(x) => write!(f, "{}", x),
        }
    }
}

/// Names one metric stream. The two instance fields are optional; an empty
/// string means absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Identifier {
    /// The hostname the values were collected on. May contain `-`.
    pub host: String,

    /// The plugin that collected the values, e.g. `cpu` or `df`.
    pub plugin: String,

    /// Distinguishes entities that yield metrics. Each core would be a different instance of the
    /// same plugin, as each core reports "idle", "user", "system" metrics.
    pub plugin_instance: String,

    /// The data-set name from types.db; determines how many values are expected and how they
    /// should be interpreted.
    pub type_: String,

    /// The type instance is used to separate values of identical type which nonetheless belong to
    /// one another. For instance, even though "free", "used", and "total" all have types of
    /// "memory" they are different type instances.
    pub type_instance: String,
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.plugin)?;
        if !self.plugin_instance.is_empty() {
            write!(f, "-{}", self.plugin_instance)?;
        }
        write!(f, "/{}", self.type_)?;
        if !self.type_instance.is_empty() {
            write!(f, "-{}", self.type_instance)?;
        }
        Ok(())
    }
}

impl FromStr for Identifier {
    type Err = InvalidIdentifier;

    /// Parses the canonical `host/plugin[-instance]/type[-instance]` form.
    /// The instance is everything after the first dash, which is why valid
    /// plugin and type names contain none.
    fn from_str(s: &str) -> Result<Identifier, InvalidIdentifier> {
        let segments: Vec<&str> = s.split('/').collect();
        if segments.len() != 3 {
            return Err(InvalidIdentifier(s.to_owned()));
        }

        let (plugin, plugin_instance) = split_instance(segments[1]);
        let (type_, type_instance) = split_instance(segments[2]);
        Ok(Identifier {
            host: segments[0].to_owned(),
            plugin: plugin.to_owned(),
            plugin_instance: plugin_instance.to_owned(),
            type_: type_.to_owned(),
            type_instance: type_instance.to_owned(),
        })
    }
}

fn split_instance(s: &str) -> (&str, &str) {
    match s.find('-') {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    }
}

/// One observation of one metric: an identifier plus the values seen at one
/// instant.
///
/// Cloning is a deep copy (the values vector and the meta map included), so
/// every consumer of a clone is isolated from later mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueList {
    pub identifier: Identifier,

    /// The instant the values were observed. `None` means "now", resolved
    /// when the list is serialized.
    pub time: Option<DateTime<Utc>>,

    /// The interval in which new values are to be expected.
    pub interval: Duration,

    /// The observed values, never empty.
    pub values: Vec<Value>,

    /// Optional data source names, one per value. Not carried by the wire
    /// format; the server can recover them from a types.db registry.
    pub dsnames: Option<Vec<String>>,

    /// Optional metadata. Not carried by the wire format.
    pub meta: Option<meta::Data>,
}

impl ValueList {
    /// Returns the name of the data source at `index`, or collectd's
    /// conventional `"value"` when no names are configured.
    pub fn dsname(&self, index: usize) -> &str {
        self.dsnames
            .as_ref()
            .and_then(|names| names.get(index))
            .map(|name| name.as_str())
            .unwrap_or("value")
    }

    /// Validates the data-model invariants. Called before emission; a list
    /// that fails here is rejected without touching the buffer.
    pub fn check(&self) -> Result<(), ValueListError> {
        if self.values.is_empty() {
            return Err(ValueListError::NoValues);
        }

        check_field("host", &self.identifier.host, false)?;
        check_field("plugin", &self.identifier.plugin, false)?;
        check_field("type", &self.identifier.type_, false)?;
        check_field("plugin instance", &self.identifier.plugin_instance, true)?;
        check_field("type instance", &self.identifier.type_instance, true)?;

        if self.identifier.plugin.contains('-') {
            return Err(ValueListError::ReservedCharacter {
                field: "plugin",
                character: '-',
            });
        }
        if self.identifier.type_.contains('-') {
            return Err(ValueListError::ReservedCharacter {
                field: "type",
                character: '-',
            });
        }

        if self.interval <= Duration::zero() {
            return Err(ValueListError::NonPositiveInterval);
        }

        if let Some(ref names) = self.dsnames {
            if names.len() != self.values.len() {
                return Err(ValueListError::DsNameMismatch {
                    names: names.len(),
                    values: self.values.len(),
                });
            }
            let mut seen = HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    return Err(ValueListError::DuplicateDsName(name.clone()));
                }
            }
        }

        Ok(())
    }
}

fn check_field(
    name: &'static str,
    value: &str,
    may_be_empty: bool,
) -> Result<(), ValueListError> {
    if !may_be_empty && value.is_empty() {
        return Err(ValueListError::EmptyField(name));
    }
    if value.contains('/') {
        return Err(ValueListError::ReservedCharacter {
            field: name,
            character: '/',
        });
    }
    Ok(())
}

/// Assembles a [`ValueList`] step by step, validating the result.
///
/// ```
/// use collectd::api::{Value, ValueListBuilder};
///
/// let vl = ValueListBuilder::new("localhost", "load", "load")
///     .values(vec![Value::Gauge(0.25)])
///     .build()
///     .unwrap();
/// assert_eq!(vl.identifier.to_string(), "localhost/load/load");
/// ```
#[derive(Debug, Clone)]
pub struct ValueListBuilder {
    identifier: Identifier,
    time: Option<DateTime<Utc>>,
    interval: Option<Duration>,
    values: Vec<Value>,
    dsnames: Option<Vec<String>>,
    meta: Option<meta::Data>,
}

impl ValueListBuilder {
    pub fn new<H, P, T>(host: H, plugin: P, type_: T) -> ValueListBuilder
    where
        H: Into<String>,
        P: Into<String>,
        T: Into<String>,
    {
        ValueListBuilder {
            identifier: Identifier {
                host: host.into(),
                plugin: plugin.into(),
                plugin_instance: String::new(),
                type_: type_.into(),
                type_instance: String::new(),
            },
            time: None,
            interval: None,
            values: Vec::new(),
            dsnames: None,
            meta: None,
        }
    }

    /// A set of observed values that belong to the same plugin and type instance
    pub fn values(mut self, values: Vec<Value>) -> ValueListBuilder {
        self.values = values;
        self
    }

    pub fn plugin_instance<S: Into<String>>(mut self, instance: S) -> ValueListBuilder {
        self.identifier.plugin_instance = instance.into();
        self
    }

    pub fn type_instance<S: Into<String>>(mut self, instance: S) -> ValueListBuilder {
        self.identifier.type_instance = instance.into();
        self
    }

    /// The timestamp at which the value was collected. When not set the list
    /// is stamped with the wall clock at serialization time.
    pub fn time(mut self, time: DateTime<Utc>) -> ValueListBuilder {
        self.time = Some(time);
        self
    }

    /// The interval in which new values are to be expected. Defaults to
    /// collectd's global default of ten seconds.
    pub fn interval(mut self, interval: Duration) -> ValueListBuilder {
        self.interval = Some(interval);
        self
    }

    pub fn dsnames(mut self, names: Vec<String>) -> ValueListBuilder {
        self.dsnames = Some(names);
        self
    }

    pub fn meta(mut self, meta: meta::Data) -> ValueListBuilder {
        self.meta = Some(meta);
        self
    }

    pub fn build(self) -> Result<ValueList, ValueListError> {
        let vl = ValueList {
            identifier: self.identifier,
            time: self.time,
            interval: self.interval.unwrap_or_else(|| Duration::seconds(10)),
            values: self.values,
            dsnames: self.dsnames,
            meta: self.meta,
        };
        vl.check()?;
        Ok(vl)
    }
}

/// Consumes value lists on the receiving side. The server invokes `write`
/// from many tasks at once, so implementations must tolerate concurrent
/// calls.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(&self, vl: ValueList) -> Result<(), Error>;
}

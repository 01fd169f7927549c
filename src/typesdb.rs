//! Parser for collectd's `types.db` data-set registry.
//!
//! Each line registers a data set: a name followed by one data source per
//! value, `name:TYPE:min:max`, separated by commas or whitespace. `U` stands
//! for an unbounded minimum or maximum. See types.db(5).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

/// How the values of a data source are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceType {
    Absolute,
    Counter,
    Derive,
    Gauge,
}

impl FromStr for SourceType {
    type Err = ();

    fn from_str(s: &str) -> Result<SourceType, ()> {
        match s.to_ascii_lowercase().as_str() {
            "absolute" => Ok(SourceType::Absolute),
            "counter" => Ok(SourceType::Counter),
            "derive" => Ok(SourceType::Derive),
            "gauge" => Ok(SourceType::Gauge),
            _ => Err(()),
        }
    }
}

/// One data source of a data set.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSource {
    pub name: String,
    pub source_type: SourceType,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// A named data set: the shape a value list of this type must have.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSet {
    pub name: String,
    pub sources: Vec<DataSource>,
}

#[derive(Fail, Debug)]
pub enum TypesDbError {
    #[fail(display = "line {}: {}", line, message)]
    Malformed { line: usize, message: String },

    #[fail(display = "{}", _0)]
    Io(#[cause] io::Error),
}

impl From<io::Error> for TypesDbError {
    fn from(err: io::Error) -> TypesDbError {
        TypesDbError::Io(err)
    }
}

/// The parsed registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypesDb {
    sets: HashMap<String, DataSet>,
}

impl TypesDb {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<TypesDb, TypesDbError> {
        let contents = fs::read_to_string(path)?;
        contents.parse()
    }

    pub fn get(&self, name: &str) -> Option<&DataSet> {
        self.sets.get(name)
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}

impl FromStr for TypesDb {
    type Err = TypesDbError;

    fn from_str(s: &str) -> Result<TypesDb, TypesDbError> {
        let mut sets = HashMap::new();
        for (index, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let set = parse_data_set(line).map_err(|message| TypesDbError::Malformed {
                line: index + 1,
                message,
            })?;
            sets.insert(set.name.clone(), set);
        }
        Ok(TypesDb { sets })
    }
}

fn parse_data_set(line: &str) -> Result<DataSet, String> {
    let mut fields = line
        .split(|c| c == '\t' || c == ' ' || c == ',')
        .filter(|f| !f.is_empty());

    let name = fields
        .next()
        .ok_or_else(|| "empty data-set line".to_owned())?;

    let mut sources = Vec::new();
    for field in fields {
        sources.push(parse_data_source(field)?);
    }
    if sources.is_empty() {
        return Err(format!("data set {:?} has no data sources", name));
    }

    Ok(DataSet {
        name: name.to_owned(),
        sources,
    })
}

fn parse_data_source(field: &str) -> Result<DataSource, String> {
    let parts: Vec<&str> = field.split(':').collect();
    if parts.len() != 4 {
        return Err(format!("data source {:?}: expected name:type:min:max", field));
    }

    let source_type = parts[1]
        .parse()
        .map_err(|_| format!("invalid data-source type {:?}", parts[1]))?;

    Ok(DataSource {
        name: parts[0].to_owned(),
        source_type,
        min: parse_bound(parts[2])?,
        max: parse_bound(parts[3])?,
    })
}

fn parse_bound(s: &str) -> Result<Option<f64>, String> {
    if s == "U" || s == "u" {
        return Ok(None);
    }
    s.parse()
        .map(Some)
        .map_err(|_| format!("invalid bound {:?}", s))
}

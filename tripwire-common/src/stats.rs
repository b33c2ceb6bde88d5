//! Aggregated traffic statistics types

use chrono::{DateTime, Duration, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;

/// Facts extracted from one inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub method: String,
    /// Path component of the request URI, query stripped
    pub path: String,
    pub client_ip: String,
    pub country: String,
    pub user_agent: String,
    pub status: u16,
}

/// Key -> occurrence count table that remembers first-insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrequencyTable {
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the count for `key`, inserting it with a count of 1 if absent
    pub fn increment(&mut self, key: &str) {
        self.add(key, 1);
    }

    fn add(&mut self, key: &str, count: u64) {
        match self.index.get(key) {
            Some(&idx) => self.entries[idx].1 += count,
            None => {
                self.index.insert(key.to_string(), self.entries.len());
                self.entries.push((key.to_string(), count));
            }
        }
    }

    pub fn get(&self, key: &str) -> u64 {
        self.index
            .get(key)
            .map(|&idx| self.entries[idx].1)
            .unwrap_or(0)
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, count)| count).sum()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(key, count)| (key.as_str(), *count))
    }

    /// The `n` highest counts, descending. Equal counts keep insertion order.
    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut ranked = self.entries.clone();
        // sort_by is stable, which is what preserves insertion order on ties
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.truncate(n);
        ranked
    }
}

impl Serialize for FrequencyTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, count) in &self.entries {
            map.serialize_entry(key, count)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FrequencyTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = FrequencyTable;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of string keys to non-negative counts")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut table = FrequencyTable::new();
                while let Some((key, count)) = access.next_entry::<String, u64>()? {
                    table.add(&key, count);
                }
                Ok(table)
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

/// Names of the six tables in a [`CounterSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableName {
    Countries,
    Ips,
    UserAgents,
    Paths,
    Methods,
    StatusCodes,
}

impl TableName {
    pub const ALL: [TableName; 6] = [
        TableName::Countries,
        TableName::Ips,
        TableName::UserAgents,
        TableName::Paths,
        TableName::Methods,
        TableName::StatusCodes,
    ];

    /// Field name used in the persisted snapshot
    pub fn as_str(self) -> &'static str {
        match self {
            TableName::Countries => "countries",
            TableName::Ips => "ips",
            TableName::UserAgents => "user_agents",
            TableName::Paths => "paths",
            TableName::Methods => "methods",
            TableName::StatusCodes => "status_codes",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six frequency tables fed by every observation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSet {
    #[serde(default)]
    pub countries: FrequencyTable,
    #[serde(default)]
    pub ips: FrequencyTable,
    #[serde(default)]
    pub user_agents: FrequencyTable,
    #[serde(default)]
    pub paths: FrequencyTable,
    #[serde(default)]
    pub methods: FrequencyTable,
    #[serde(default)]
    pub status_codes: FrequencyTable,
}

impl CounterSet {
    /// Apply one observation: exactly one increment per table
    pub fn record(&mut self, obs: &Observation) {
        self.countries.increment(&obs.country);
        self.ips.increment(&obs.client_ip);
        self.user_agents.increment(&obs.user_agent);
        self.paths.increment(&obs.path);
        self.methods.increment(&obs.method);
        self.status_codes.increment(&obs.status.to_string());
    }

    pub fn table(&self, name: TableName) -> &FrequencyTable {
        match name {
            TableName::Countries => &self.countries,
            TableName::Ips => &self.ips,
            TableName::UserAgents => &self.user_agents,
            TableName::Paths => &self.paths,
            TableName::Methods => &self.methods,
            TableName::StatusCodes => &self.status_codes,
        }
    }
}

/// Point-in-time copy of the aggregated statistics; also the persisted format
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub total_requests: u64,

    #[serde(flatten)]
    pub counters: CounterSet,
}

impl Snapshot {
    pub fn record(&mut self, obs: &Observation) {
        self.total_requests += 1;
        self.counters.record(obs);
    }

    pub fn is_empty(&self) -> bool {
        self.total_requests == 0
    }

    /// Every table must sum to the request total
    pub fn is_consistent(&self) -> bool {
        TableName::ALL
            .iter()
            .all(|&name| self.counters.table(name).total() == self.total_requests)
    }

    pub fn top(&self, table: TableName, n: usize) -> Vec<(String, u64)> {
        self.counters.table(table).top(n)
    }
}

/// Reporting cycle alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Roll over at the top of every hour
    #[default]
    Production,
    /// Roll over at the top of every minute
    Debug,
}

impl Cadence {
    pub fn period(self) -> Duration {
        match self {
            Cadence::Production => Duration::hours(1),
            Cadence::Debug => Duration::minutes(1),
        }
    }

    /// First aligned instant strictly after `now`
    pub fn next_boundary(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let unit = self.period().num_seconds();
        let next = (now.timestamp().div_euclid(unit) + 1) * unit;
        DateTime::from_timestamp(next, 0).unwrap_or_else(|| now + self.period())
    }

    /// Archive file name for a cycle ending at `boundary`
    pub fn archive_name(self, boundary: DateTime<Utc>) -> String {
        let stamp = match self {
            Cadence::Production => boundary.format("%Y%m%dT%HZ"),
            Cadence::Debug => boundary.format("%Y%m%dT%H%MZ"),
        };
        format!("{}.json", stamp)
    }
}

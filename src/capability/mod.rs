//! Table capabilities granted to each handler.
//!
//! Every handler receives an explicit [`CapabilitySet`] at construction and
//! may only perform the store operations it holds a capability for. The
//! grant lists in [`grants`] mirror the table permissions each function was
//! deployed with.

use std::collections::BTreeSet;
use std::fmt;

/// Tables known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Sms,
    Transactions,
    Categories,
    Periods,
}

impl Table {
    pub const ALL: [Table; 4] = [
        Table::Sms,
        Table::Transactions,
        Table::Categories,
        Table::Periods,
    ];

    pub fn read(self) -> Capability {
        Capability::Read(self)
    }

    pub fn write(self) -> Capability {
        Capability::Write(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Table::Sms => "sms",
            Table::Transactions => "transactions",
            Table::Categories => "categories",
            Table::Periods => "periods",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Permission to perform one class of operation on one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Read(Table),
    Write(Table),
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Read(table) => write!(f, "{}:read", table),
            Capability::Write(table) => write!(f, "{}:write", table),
        }
    }
}

/// The set of capabilities held by one handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    granted: BTreeSet<Capability>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a single capability.
    pub fn grant(mut self, capability: Capability) -> Self {
        self.granted.insert(capability);
        self
    }

    /// Grant read access to a table.
    pub fn grant_read(self, table: Table) -> Self {
        self.grant(table.read())
    }

    /// Grant read and write access to a table.
    pub fn grant_read_write(self, table: Table) -> Self {
        self.grant(table.read()).grant(table.write())
    }

    pub fn allows(&self, capability: Capability) -> bool {
        self.granted.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.granted.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.granted.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self {
            granted: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.granted.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}

/// Grant lists per handler.
pub mod grants {
    use super::{CapabilitySet, Table};

    /// Stream-triggered SMS processor: reads and writes sms, transactions and
    /// the category mapping.
    pub fn sms_processor() -> CapabilitySet {
        CapabilitySet::new()
            .grant_read_write(Table::Sms)
            .grant_read_write(Table::Transactions)
            .grant_read_write(Table::Categories)
    }

    /// `GET /transactions`
    pub fn transaction_list() -> CapabilitySet {
        CapabilitySet::new().grant_read_write(Table::Transactions)
    }

    /// `PUT /transactions/category`
    pub fn category_update() -> CapabilitySet {
        CapabilitySet::new()
            .grant_read_write(Table::Transactions)
            .grant_read_write(Table::Categories)
    }

    /// `GET /months/{month}`
    pub fn month_period_list() -> CapabilitySet {
        CapabilitySet::new().grant_read(Table::Periods)
    }

    /// `POST /months`
    pub fn month_period_update() -> CapabilitySet {
        CapabilitySet::new().grant_read_write(Table::Periods)
    }
}

use crate::value::Value;
use std::collections::BTreeMap;

///
/// Entity
///
/// A materialized master object. Identity is whatever the layout tree read
/// from the identity columns; the materializer never derives it.
///

pub trait Entity: Send {
    fn entity_name(&self) -> &str;

    fn identity(&self) -> &Value;

    /// Scalar property lookup, used for map-keyed containers.
    fn property(&self, name: &str) -> Option<&Value>;

    /// Mark this entity (and anything it owns) read-only.
    fn set_read_only(&mut self);
}

///
/// Record
///
/// Dynamic entity built by [`SqlTree`](crate::db::SqlTree): scalar fields,
/// one-to-one children, and at most one many collection.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    entity: String,
    id: Value,
    fields: BTreeMap<String, Value>,
    one: BTreeMap<String, Record>,
    many: Option<(String, Vec<Record>)>,
    read_only: bool,
}

impl Record {
    #[must_use]
    pub fn new(entity: impl Into<String>, id: Value) -> Self {
        Self {
            entity: entity.into(),
            id,
            fields: BTreeMap::new(),
            one: BTreeMap::new(),
            many: None,
            read_only: false,
        }
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value.into());
        self
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn set_one(&mut self, property: impl Into<String>, child: Self) {
        self.one.insert(property.into(), child);
    }

    #[must_use]
    pub fn one(&self, property: &str) -> Option<&Self> {
        self.one.get(property)
    }

    /// Ensure the many collection exists, even while empty.
    pub fn init_many(&mut self, property: &str) {
        if self.many.is_none() {
            self.many = Some((property.to_string(), Vec::new()));
        }
    }

    /// Append one element to the many collection, creating it on demand.
    pub fn push_many(&mut self, property: &str, child: Self) {
        self.init_many(property);
        if let Some((_, children)) = self.many.as_mut() {
            children.push(child);
        }
    }

    /// Elements of the many collection; empty when the property differs or
    /// the collection was never initialised.
    #[must_use]
    pub fn many(&self, property: &str) -> &[Self] {
        match &self.many {
            Some((name, children)) if name == property => children,
            _ => &[],
        }
    }

    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }
}

impl Entity for Record {
    fn entity_name(&self) -> &str {
        &self.entity
    }

    fn identity(&self) -> &Value {
        &self.id
    }

    fn property(&self, name: &str) -> Option<&Value> {
        if name == "id" {
            return Some(&self.id);
        }

        self.fields.get(name)
    }

    fn set_read_only(&mut self) {
        self.read_only = true;
        for child in self.one.values_mut() {
            child.set_read_only();
        }
        if let Some((_, children)) = self.many.as_mut() {
            for child in children {
                child.set_read_only();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_propagates_through_children() {
        let mut order = Record::new("order", Value::Int(1));
        order.set_one("customer", Record::new("customer", Value::Int(9)));
        order.push_many("lines", Record::new("line", Value::Int(100)));

        order.set_read_only();

        assert!(order.is_read_only());
        assert!(order.one("customer").is_some_and(Record::is_read_only));
        assert!(order.many("lines").iter().all(Record::is_read_only));
    }

    #[test]
    fn id_is_addressable_as_a_property() {
        let order = Record::new("order", Value::Int(5)).with_field("status", "open");

        assert_eq!(order.property("id"), Some(&Value::Int(5)));
        assert_eq!(order.property("status"), Some(&Value::text("open")));
        assert_eq!(order.property("missing"), None);
    }
}

use serde_json::{Map, Value as Json};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use uuid::Uuid;

/// Drops sub-microsecond precision. Postgres `timestamptz` keeps microseconds,
/// so every stored and compared instant goes through here.
pub fn stored_time(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_nanosecond(t.nanosecond() / 1_000 * 1_000).unwrap_or(t)
}

/// Scalar operand used in filters and updates.
///
/// Every variant has exactly one JSON representation, which is the one the
/// entity structs produce through serde (uuids as hyphenated strings, times as
/// RFC 3339 strings with at most microsecond precision).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Id(Uuid),
    Time(OffsetDateTime),
    List(Vec<Value>),
}

impl Value {
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => Json::from(*f),
            Value::Text(s) => Json::String(s.clone()),
            Value::Id(id) => Json::String(id.to_string()),
            Value::Time(t) => stored_time(*t).format(&Rfc3339).map(Json::String).unwrap_or(Json::Null),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    /// Text form used for `IN` lists and substring matching.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Id(id) => Some(id.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Id(v)
    }
}

impl From<OffsetDateTime> for Value {
    fn from(v: OffsetDateTime) -> Self {
        Value::Time(stored_time(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<Vec<Uuid>> for Value {
    fn from(v: Vec<Uuid>) -> Self {
        Value::List(v.into_iter().map(Value::Id).collect())
    }
}

impl From<Vec<String>> for Value {
    fn from(v: Vec<String>) -> Self {
        Value::List(v.into_iter().map(Value::Text).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A single condition on a top-level document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Eq(&'static str, Value),
    Ne(&'static str, Value),
    In(&'static str, Vec<Value>),
    Gt(&'static str, Value),
    Gte(&'static str, Value),
    Lt(&'static str, Value),
    Lte(&'static str, Value),
    /// Field is present and not null.
    Exists(&'static str),
    /// Field is absent or null.
    Missing(&'static str),
    /// Array field contains the value.
    Has(&'static str, Value),
    /// Case-insensitive substring match on any of the fields.
    Search(&'static [&'static str], String),
}

/// Conjunction of conditions. Empty means "match everything".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conds: Vec<Cond>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: Uuid) -> Self {
        Self::new().eq("id", id)
    }

    pub fn and(mut self, cond: Cond) -> Self {
        self.conds.push(cond);
        self
    }

    pub fn eq(self, field: &'static str, value: impl Into<Value>) -> Self {
        self.and(Cond::Eq(field, value.into()))
    }

    pub fn ne(self, field: &'static str, value: impl Into<Value>) -> Self {
        self.and(Cond::Ne(field, value.into()))
    }

    pub fn is_in<V: Into<Value>>(self, field: &'static str, values: impl IntoIterator<Item = V>) -> Self {
        self.and(Cond::In(field, values.into_iter().map(Into::into).collect()))
    }

    pub fn gt(self, field: &'static str, value: impl Into<Value>) -> Self {
        self.and(Cond::Gt(field, value.into()))
    }

    pub fn lte(self, field: &'static str, value: impl Into<Value>) -> Self {
        self.and(Cond::Lte(field, value.into()))
    }

    pub fn exists(self, field: &'static str) -> Self {
        self.and(Cond::Exists(field))
    }

    pub fn missing(self, field: &'static str) -> Self {
        self.and(Cond::Missing(field))
    }

    pub fn has(self, field: &'static str, value: impl Into<Value>) -> Self {
        self.and(Cond::Has(field, value.into()))
    }

    /// Adds a search condition only when `term` carries something to search for.
    pub fn search(self, fields: &'static [&'static str], term: Option<&str>) -> Self {
        match term.map(str::trim) {
            Some(t) if !t.is_empty() => self.and(Cond::Search(fields, t.to_string())),
            _ => self,
        }
    }

    pub fn conds(&self) -> &[Cond] {
        &self.conds
    }

    pub fn into_conds(self) -> Vec<Cond> {
        self.conds
    }
}

/// Field-level update: values to set, fields to remove and array edits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    set: Map<String, Json>,
    unset: Vec<String>,
    add_to_set: Vec<(String, Json)>,
    pull: Vec<(String, Json)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set.insert(field.to_string(), value.into().to_json());
        self
    }

    /// Appends `value` to the array field unless it is already there.
    pub fn add_to_set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.add_to_set.push((field.to_string(), value.into().to_json()));
        self
    }

    /// Removes every occurrence of `value` from the array field.
    pub fn pull(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.pull.push((field.to_string(), value.into().to_json()));
        self
    }

    pub fn unset(mut self, field: &str) -> Self {
        self.unset_field(field);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Json> {
        self.set.get(field)
    }

    pub fn take(&mut self, field: &str) -> Option<Json> {
        self.set.remove(field)
    }

    pub fn insert(&mut self, field: &str, value: impl Into<Value>) {
        self.set.insert(field.to_string(), value.into().to_json());
    }

    /// Sets an already encoded JSON value.
    pub(crate) fn insert_raw(&mut self, field: &str, value: Json) {
        self.set.insert(field.to_string(), value);
    }

    pub(crate) fn unset_field(&mut self, field: &str) {
        self.set.remove(field);
        self.unset.push(field.to_string());
    }

    pub fn set_fields(&self) -> &Map<String, Json> {
        &self.set
    }

    pub fn unset_fields(&self) -> &[String] {
        &self.unset
    }

    pub fn added_fields(&self) -> &[(String, Json)] {
        &self.add_to_set
    }

    pub fn pulled_fields(&self) -> &[(String, Json)] {
        &self.pull
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty() && self.add_to_set.is_empty() && self.pull.is_empty()
    }

    /// Applies the update to a JSON document in place.
    pub fn apply(&self, doc: &mut Json) {
        if let Some(obj) = doc.as_object_mut() {
            for field in &self.unset {
                obj.remove(field);
            }
            for (k, v) in &self.set {
                obj.insert(k.clone(), v.clone());
            }
            for (k, v) in &self.add_to_set {
                let slot = obj.entry(k.clone()).or_insert_with(|| Json::Array(Vec::new()));
                if !slot.is_array() {
                    *slot = Json::Array(Vec::new());
                }
                if let Json::Array(items) = slot {
                    if !items.contains(v) {
                        items.push(v.clone());
                    }
                }
            }
            for (k, v) in &self.pull {
                if let Some(Json::Array(items)) = obj.get_mut(k) {
                    items.retain(|item| item != v);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn time_value_uses_rfc3339() {
        let v = Value::from(datetime!(2026-10-19 12:00:00 UTC));
        assert_eq!(v.to_json(), json!("2026-10-19T12:00:00Z"));
    }

    #[test]
    fn times_are_truncated_to_microseconds() {
        let t = datetime!(2026-10-19 12:00:00.123456789 UTC);
        assert_eq!(Value::from(t).to_json(), json!("2026-10-19T12:00:00.123456Z"));
        assert_eq!(Value::Time(t).to_json(), json!("2026-10-19T12:00:00.123456Z"));
        assert_eq!(stored_time(t).nanosecond(), 123_456_000);
        // a stored value parses back to exactly the compared instant
        let stored = Value::from(t).to_json();
        let parsed = OffsetDateTime::parse(stored.as_str().unwrap(), &Rfc3339).unwrap();
        assert_eq!(Value::from(parsed), Value::from(t));
    }

    #[test]
    fn array_edits_keep_set_semantics() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut doc = json!({ "wishlist": [a.to_string()] });
        Update::new().add_to_set("wishlist", a).add_to_set("wishlist", b).apply(&mut doc);
        assert_eq!(doc["wishlist"], json!([a.to_string(), b.to_string()]));

        Update::new().pull("wishlist", a).apply(&mut doc);
        assert_eq!(doc["wishlist"], json!([b.to_string()]));

        let mut empty = json!({});
        Update::new().add_to_set("tags", a).pull("other", a).apply(&mut empty);
        assert_eq!(empty, json!({ "tags": [a.to_string()] }));
    }

    #[test]
    fn search_ignores_blank_terms() {
        let f = Filter::new().search(&["name"], Some("   ")).search(&["name"], None);
        assert!(f.conds().is_empty());
        let f = Filter::new().search(&["name"], Some(" nik "));
        assert_eq!(f.conds(), &[Cond::Search(&["name"], "nik".into())]);
    }

    #[test]
    fn update_apply_sets_and_unsets() {
        let mut doc = json!({"name": "a", "restored_at": "x"});
        Update::new()
            .set("name", "b")
            .set("freezed_at", Value::Null)
            .unset("restored_at")
            .apply(&mut doc);
        assert_eq!(doc, json!({"name": "b", "freezed_at": null}));
    }

    #[test]
    fn unset_wins_over_earlier_set() {
        let u = Update::new().set("x", 1i64).unset("x");
        assert!(u.get("x").is_none());
        assert_eq!(u.unset_fields(), &["x".to_string()]);
    }
}

//! Query filters shared by every document store.
//!
//! Filters arrive from clients as JSON objects in a Mongo-like dialect:
//!
//! ```json
//! { "eventId": "…", "isActive": true, "like": { "$gte": 3 },
//!   "$or": [ { "hall": "A" }, { "hall": "B" } ] }
//! ```
//!
//! A parsed [`Filter`] can be evaluated in memory ([`Filter::matches`]) or
//! rendered as a parameterized SQL predicate over the JSONB `body` column
//! ([`Filter::to_sql`]). Both paths must agree.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use tokio_postgres::types::ToSql;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("filter must be a JSON object")]
    NotAnObject,
    #[error("invalid id {0:?}")]
    InvalidId(String),
    #[error("unsupported operator {0}")]
    UnsupportedOperator(String),
    #[error("{0} expects a non-empty array")]
    ExpectsArray(String),
    #[error("invalid field name {0:?}")]
    InvalidField(String),
    #[error("invalid sort direction for {0}")]
    InvalidSort(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdMatch {
    Eq(Uuid),
    Ne(Uuid),
    In(Vec<Uuid>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    /// JSON containment, the semantics of `jsonb @>`.
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Exists(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Id(IdMatch),
    Field { path: Vec<String>, op: FieldOp },
    Or(Vec<Filter>),
    And(Vec<Filter>),
}

/// Conjunction of conditions. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(id: Uuid) -> Self {
        Self {
            conditions: vec![Condition::Id(IdMatch::Eq(id))],
        }
    }

    pub fn ids(ids: Vec<Uuid>) -> Self {
        Self {
            conditions: vec![Condition::Id(IdMatch::In(ids))],
        }
    }

    /// Parse a client supplied filter. `null` is the empty filter.
    pub fn parse(value: &Value) -> Result<Self, FilterError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => Self::from_map(map),
            _ => Err(FilterError::NotAnObject),
        }
    }

    pub fn from_map(map: &Map<String, Value>) -> Result<Self, FilterError> {
        let mut conditions = Vec::with_capacity(map.len());
        for (key, value) in map {
            match key.as_str() {
                "$or" => conditions.push(Condition::Or(parse_branches(key, value)?)),
                "$and" => conditions.push(Condition::And(parse_branches(key, value)?)),
                k if k.starts_with('$') => {
                    return Err(FilterError::UnsupportedOperator(k.to_string()))
                }
                "id" | "_id" => conditions.push(Condition::Id(parse_id_match(value)?)),
                field => {
                    let path = parse_path(field)?;
                    match operator_object(value) {
                        Some(ops) => {
                            for (op, operand) in ops {
                                conditions.push(Condition::Field {
                                    path: path.clone(),
                                    op: parse_op(op, operand)?,
                                });
                            }
                        }
                        None => conditions.push(Condition::Field {
                            path,
                            op: FieldOp::Eq(value.clone()),
                        }),
                    }
                }
            }
        }
        Ok(Self { conditions })
    }

    /// Add an equality condition on a (possibly dotted) field.
    pub fn eq(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(field, FieldOp::Eq(value.into()))
    }

    pub fn with(mut self, field: &str, op: FieldOp) -> Self {
        self.conditions.push(Condition::Field {
            path: field.split('.').map(str::to_string).collect(),
            op,
        });
        self
    }

    /// Whether any condition, at any depth, constrains the given top-level field.
    pub fn mentions(&self, field: &str) -> bool {
        self.conditions.iter().any(|c| match c {
            Condition::Field { path, .. } => path.first().map(String::as_str) == Some(field),
            Condition::Or(branches) | Condition::And(branches) => {
                branches.iter().any(|f| f.mentions(field))
            }
            Condition::Id(_) => field == "id",
        })
    }

    pub fn matches(&self, id: &Uuid, body: &Map<String, Value>) -> bool {
        self.conditions.iter().all(|c| condition_matches(c, id, body))
    }

    /// Render as a SQL predicate over `id` and `body`, binding values into `w`.
    pub fn to_sql(&self, w: &mut SqlWriter) -> String {
        if self.conditions.is_empty() {
            return "TRUE".to_string();
        }
        self.conditions
            .iter()
            .map(|c| condition_sql(c, w))
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

fn parse_branches(key: &str, value: &Value) -> Result<Vec<Filter>, FilterError> {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().map(Filter::parse).collect(),
        _ => Err(FilterError::ExpectsArray(key.to_string())),
    }
}

fn parse_path(field: &str) -> Result<Vec<String>, FilterError> {
    let path: Vec<String> = field.split('.').map(str::to_string).collect();
    let valid = path.iter().all(|seg| {
        !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    });
    if valid {
        Ok(path)
    } else {
        Err(FilterError::InvalidField(field.to_string()))
    }
}

/// `Some` when the value is an object made only of `$operator` keys.
fn operator_object(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => Some(map),
        _ => None,
    }
}

fn parse_uuid(value: &Value) -> Result<Uuid, FilterError> {
    value
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .ok_or_else(|| FilterError::InvalidId(value.to_string()))
}

fn parse_id_match(value: &Value) -> Result<IdMatch, FilterError> {
    if let Some(ops) = operator_object(value) {
        if ops.len() != 1 {
            return Err(FilterError::UnsupportedOperator(
                ops.keys().cloned().collect::<Vec<_>>().join(","),
            ));
        }
        let (op, operand) = ops.iter().next().ok_or(FilterError::NotAnObject)?;
        return match op.as_str() {
            "$eq" => Ok(IdMatch::Eq(parse_uuid(operand)?)),
            "$ne" => Ok(IdMatch::Ne(parse_uuid(operand)?)),
            "$in" => match operand {
                Value::Array(items) => Ok(IdMatch::In(
                    items.iter().map(parse_uuid).collect::<Result<_, _>>()?,
                )),
                _ => Err(FilterError::ExpectsArray("$in".to_string())),
            },
            other => Err(FilterError::UnsupportedOperator(other.to_string())),
        };
    }
    Ok(IdMatch::Eq(parse_uuid(value)?))
}

fn parse_op(op: &str, operand: &Value) -> Result<FieldOp, FilterError> {
    let array = |name: &str| match operand {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(FilterError::ExpectsArray(name.to_string())),
    };
    Ok(match op {
        "$eq" => FieldOp::Eq(operand.clone()),
        "$ne" => FieldOp::Ne(operand.clone()),
        "$in" => FieldOp::In(array(op)?),
        "$nin" => FieldOp::Nin(array(op)?),
        "$gt" => FieldOp::Gt(operand.clone()),
        "$gte" => FieldOp::Gte(operand.clone()),
        "$lt" => FieldOp::Lt(operand.clone()),
        "$lte" => FieldOp::Lte(operand.clone()),
        "$exists" => FieldOp::Exists(operand.as_bool().unwrap_or(true)),
        other => return Err(FilterError::UnsupportedOperator(other.to_string())),
    })
}

fn lookup<'a>(body: &'a Map<String, Value>, path: &[String]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = body.get(first)?;
    for seg in rest {
        current = current.as_object()?.get(seg)?;
    }
    Some(current)
}

/// Equality that treats `1` and `1.0` alike, as PostgreSQL does for jsonb.
pub(crate) fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs.iter().all(|(k, x)| ys.get(k).map_or(false, |y| json_eq(x, y)))
        }
        _ => a == b,
    }
}

/// `jsonb @>` below the top level.
pub(crate) fn json_contains(doc: &Value, pattern: &Value) -> bool {
    match (doc, pattern) {
        (Value::Object(d), Value::Object(p)) => p
            .iter()
            .all(|(k, pv)| d.get(k).map_or(false, |dv| json_contains(dv, pv))),
        (Value::Array(d), Value::Array(p)) => {
            p.iter().all(|pv| d.iter().any(|dv| json_contains(dv, pv)))
        }
        (Value::Array(_), _) | (_, Value::Array(_)) => false,
        (Value::Object(_), _) | (_, Value::Object(_)) => false,
        _ => json_eq(doc, pattern),
    }
}

/// Ordering between two values of the same JSON type; `None` across types.
fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order used for sorting, following jsonb's cross-type ordering.
pub(crate) fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        // NULLS LAST for ascending order
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => type_rank(x)
            .cmp(&type_rank(y))
            .then_with(|| compare_same_type(x, y).unwrap_or(Ordering::Equal)),
    }
}

fn condition_matches(c: &Condition, id: &Uuid, body: &Map<String, Value>) -> bool {
    match c {
        Condition::Id(IdMatch::Eq(want)) => id == want,
        Condition::Id(IdMatch::Ne(want)) => id != want,
        Condition::Id(IdMatch::In(ids)) => ids.contains(id),
        Condition::Or(branches) => branches.iter().any(|f| f.matches(id, body)),
        Condition::And(branches) => branches.iter().all(|f| f.matches(id, body)),
        Condition::Field { path, op } => {
            let actual = lookup(body, path);
            let contains = |v: &Value| actual.map_or(false, |a| json_contains(a, v));
            let is_in = |vs: &[Value]| actual.map_or(false, |a| vs.iter().any(|v| json_eq(a, v)));
            let cmp = |v: &Value, accept: fn(Ordering) -> bool| {
                actual
                    .and_then(|a| compare_same_type(a, v))
                    .map_or(false, accept)
            };
            match op {
                FieldOp::Eq(v) => contains(v),
                FieldOp::Ne(v) => !contains(v),
                FieldOp::In(vs) => is_in(vs),
                FieldOp::Nin(vs) => !is_in(vs),
                FieldOp::Gt(v) => cmp(v, |o| o == Ordering::Greater),
                FieldOp::Gte(v) => cmp(v, |o| o != Ordering::Less),
                FieldOp::Lt(v) => cmp(v, |o| o == Ordering::Less),
                FieldOp::Lte(v) => cmp(v, |o| o != Ordering::Greater),
                FieldOp::Exists(want) => actual.is_some() == *want,
            }
        }
    }
}

/// Wrap a value so that it sits at `path` inside nested objects.
fn nest(path: &[String], value: &Value) -> Value {
    path.iter().rev().fold(value.clone(), |inner, seg| {
        let mut map = Map::new();
        map.insert(seg.clone(), inner);
        Value::Object(map)
    })
}

fn condition_sql(c: &Condition, w: &mut SqlWriter) -> String {
    match c {
        Condition::Id(IdMatch::Eq(id)) => format!("id = {}", w.bind(*id)),
        Condition::Id(IdMatch::Ne(id)) => format!("id <> {}", w.bind(*id)),
        Condition::Id(IdMatch::In(ids)) => format!("id = ANY({})", w.bind(ids.clone())),
        Condition::Or(branches) => {
            let parts: Vec<String> = branches.iter().map(|f| format!("({})", f.to_sql(w))).collect();
            format!("({})", parts.join(" OR "))
        }
        Condition::And(branches) => {
            let parts: Vec<String> = branches.iter().map(|f| format!("({})", f.to_sql(w))).collect();
            format!("({})", parts.join(" AND "))
        }
        Condition::Field { path, op } => {
            let mut field = || format!("(body #> {}::text[])", w.bind(path.clone()));
            match op {
                FieldOp::Eq(v) => format!("body @> {}::jsonb", w.bind(nest(path, v))),
                FieldOp::Ne(v) => format!("NOT (body @> {}::jsonb)", w.bind(nest(path, v))),
                FieldOp::In(vs) | FieldOp::Nin(vs) => {
                    let f = field();
                    let list = w.bind(Value::Array(vs.clone()));
                    let expr = format!(
                        "COALESCE({f} IN (SELECT jsonb_array_elements({list}::jsonb)), FALSE)"
                    );
                    if matches!(op, FieldOp::Nin(_)) {
                        format!("NOT {expr}")
                    } else {
                        expr
                    }
                }
                FieldOp::Gt(v) | FieldOp::Gte(v) | FieldOp::Lt(v) | FieldOp::Lte(v) => {
                    let sym = match op {
                        FieldOp::Gt(_) => ">",
                        FieldOp::Gte(_) => ">=",
                        FieldOp::Lt(_) => "<",
                        _ => "<=",
                    };
                    let f = field();
                    let operand = w.bind(v.clone());
                    format!(
                        "COALESCE(jsonb_typeof({f}) = jsonb_typeof({operand}::jsonb) AND {f} {sym} {operand}::jsonb, FALSE)"
                    )
                }
                FieldOp::Exists(true) => format!("{} IS NOT NULL", field()),
                FieldOp::Exists(false) => format!("{} IS NULL", field()),
            }
        }
    }
}

/// One `ORDER BY` key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortSpec {
    pub path: Vec<String>,
    pub descending: bool,
}

impl SortSpec {
    pub fn asc(field: &str) -> Self {
        Self {
            path: field.split('.').map(str::to_string).collect(),
            descending: false,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            descending: true,
            ..Self::asc(field)
        }
    }

    /// Accepts `{"name": 1, "createdAt": -1}` or `"name -createdAt"`.
    pub fn parse(value: &Value) -> Result<Vec<Self>, FilterError> {
        match value {
            Value::Null => Ok(Vec::new()),
            Value::String(s) => s
                .split_whitespace()
                .map(|token| match token.strip_prefix('-') {
                    Some(field) => Ok(Self {
                        path: parse_path(field)?,
                        descending: true,
                    }),
                    None => Ok(Self {
                        path: parse_path(token)?,
                        descending: false,
                    }),
                })
                .collect(),
            Value::Object(map) => map
                .iter()
                .map(|(field, dir)| {
                    let descending = match dir {
                        Value::Number(n) if n.as_i64() == Some(1) => false,
                        Value::Number(n) if n.as_i64() == Some(-1) => true,
                        Value::String(s) if s.eq_ignore_ascii_case("asc") => false,
                        Value::String(s) if s.eq_ignore_ascii_case("desc") => true,
                        _ => return Err(FilterError::InvalidSort(field.clone())),
                    };
                    Ok(Self {
                        path: parse_path(field)?,
                        descending,
                    })
                })
                .collect(),
            _ => Err(FilterError::InvalidSort(value.to_string())),
        }
    }

    /// Column name when the key refers to store-managed metadata.
    pub fn column(&self) -> Option<&'static str> {
        match self.path.as_slice() {
            [f] if f == "createdAt" => Some("created_at"),
            [f] if f == "updatedAt" => Some("updated_at"),
            [f] if f == "id" || f == "_id" => Some("id"),
            _ => None,
        }
    }

    /// SQL ordering expression. Path segments were validated by `parse_path`
    /// or come from code, so they are safe to inline.
    pub fn to_sql(&self) -> String {
        let expr = match self.column() {
            Some(col) => col.to_string(),
            None => format!("body #> '{{{}}}'", self.path.join(",").replace('\'', "")),
        };
        format!("{} {}", expr, if self.descending { "DESC" } else { "ASC" })
    }

    pub(crate) fn lookup<'a>(&self, body: &'a Map<String, Value>) -> Option<&'a Value> {
        lookup(body, &self.path)
    }
}

pub type SqlParam = Box<dyn ToSql + Sync + Send>;

/// Accumulates positional parameters while a statement is assembled.
#[derive(Default)]
pub struct SqlWriter {
    params: Vec<SqlParam>,
}

impl SqlWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a value and return its `$n` placeholder.
    pub fn bind<T: ToSql + Sync + Send + 'static>(&mut self, value: T) -> String {
        self.params.push(Box::new(value));
        format!("${}", self.params.len())
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn params(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn equality_and_nested_paths() {
        let doc = body(json!({"hall": "A", "resetPasswordLink": {"code": "123456"}}));
        let id = Uuid::new_v4();
        assert!(Filter::parse(&json!({"hall": "A"})).unwrap().matches(&id, &doc));
        assert!(!Filter::parse(&json!({"hall": "B"})).unwrap().matches(&id, &doc));
        assert!(Filter::parse(&json!({"resetPasswordLink.code": "123456"}))
            .unwrap()
            .matches(&id, &doc));
    }

    #[test]
    fn numbers_compare_across_representations() {
        let doc = body(json!({"like": 3}));
        let id = Uuid::new_v4();
        assert!(Filter::parse(&json!({"like": 3.0})).unwrap().matches(&id, &doc));
        assert!(Filter::parse(&json!({"like": {"$gte": 3, "$lt": 4}}))
            .unwrap()
            .matches(&id, &doc));
        assert!(!Filter::parse(&json!({"like": {"$gt": "2"}})).unwrap().matches(&id, &doc));
    }

    #[test]
    fn ne_and_nin_match_missing_fields() {
        let doc = body(json!({"name": "x"}));
        let id = Uuid::new_v4();
        assert!(Filter::new().with("isDeleted", FieldOp::Ne(json!(true))).matches(&id, &doc));
        assert!(Filter::parse(&json!({"hall": {"$nin": ["A"]}})).unwrap().matches(&id, &doc));
        assert!(!Filter::parse(&json!({"hall": {"$in": ["A"]}})).unwrap().matches(&id, &doc));
        assert!(Filter::parse(&json!({"hall": {"$exists": false}})).unwrap().matches(&id, &doc));
    }

    #[test]
    fn or_branches_and_ids() {
        let id = Uuid::new_v4();
        let doc = body(json!({"email": "a@b.io"}));
        let f = Filter::parse(&json!({"$or": [{"email": "zz"}, {"phone": "zz"}, {"email": "a@b.io"}]}))
            .unwrap();
        assert!(f.matches(&id, &doc));
        let f = Filter::parse(&json!({"_id": {"$in": [id.to_string()]}})).unwrap();
        assert!(f.matches(&id, &doc));
        assert!(!Filter::parse(&json!({"id": {"$ne": id.to_string()}}))
            .unwrap()
            .matches(&id, &doc));
    }

    #[test]
    fn array_containment_requires_array_pattern() {
        let id = Uuid::new_v4();
        let doc = body(json!({"likedBy": ["u1", "u2"]}));
        assert!(Filter::parse(&json!({"likedBy": ["u2"]})).unwrap().matches(&id, &doc));
        assert!(!Filter::parse(&json!({"likedBy": "u2"})).unwrap().matches(&id, &doc));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            Filter::parse(&json!({"$where": "1"})),
            Err(FilterError::UnsupportedOperator("$where".into()))
        );
        assert_eq!(
            Filter::parse(&json!({"id": "nope"})),
            Err(FilterError::InvalidId("\"nope\"".into()))
        );
        assert!(matches!(
            Filter::parse(&json!({"a;drop": 1})),
            Err(FilterError::InvalidField(_))
        ));
        assert!(matches!(Filter::parse(&json!({"$or": []})), Err(FilterError::ExpectsArray(_))));
        assert_eq!(Filter::parse(&json!([1])), Err(FilterError::NotAnObject));
    }

    #[test]
    fn mentions_looks_into_branches() {
        let f = Filter::parse(&json!({"$or": [{"isDeleted": true}, {"name": "x"}]})).unwrap();
        assert!(f.mentions("isDeleted"));
        assert!(!f.mentions("isActive"));
    }

    #[test]
    fn sql_binds_one_param_per_value() {
        let f = Filter::parse(&json!({
            "eventId": "e1",
            "like": {"$gt": 1},
            "hall": {"$in": ["A", "B"]},
            "$or": [{"id": Uuid::nil().to_string()}, {"name": "x"}]
        }))
        .unwrap();
        let mut w = SqlWriter::new();
        let coll = w.bind("session".to_string());
        let sql = f.to_sql(&mut w);
        assert_eq!(coll, "$1");
        // eventId(1) + like(path, operand) + hall(path, list) + or(id, name)
        assert_eq!(w.len(), 1 + 1 + 2 + 2 + 2);
        assert!(sql.contains("body @> $2::jsonb"));
        assert!(sql.contains(" OR "));
        assert!(!sql.contains("e1"));
    }

    #[test]
    fn empty_filter_renders_true() {
        let mut w = SqlWriter::new();
        assert_eq!(Filter::new().to_sql(&mut w), "TRUE");
        assert!(w.is_empty());
    }

    #[test]
    fn sort_parsing_and_sql() {
        let specs = SortSpec::parse(&json!({"createdAt": -1, "hall": "asc"})).unwrap();
        let sql: Vec<String> = specs.iter().map(SortSpec::to_sql).collect();
        assert!(sql.contains(&"created_at DESC".to_string()));
        assert!(sql.contains(&"body #> '{hall}' ASC".to_string()));
        let specs = SortSpec::parse(&json!("-like name")).unwrap();
        assert_eq!(specs[0], SortSpec::desc("like"));
        assert!(SortSpec::parse(&json!({"x": 2})).is_err());
    }

    #[test]
    fn sort_order_puts_missing_last() {
        let a = json!(1);
        let b = json!("z");
        assert_eq!(sort_order(Some(&a), None), Ordering::Less);
        assert_eq!(sort_order(Some(&b), Some(&a)), Ordering::Less);
    }
}

//! Typed row surface shared by both gateway database drivers.
//!
//! Queries never hand open maps to the engine layer; every row comes back as
//! a positional [`SqlRow`] whose columns are read with typed accessors in the
//! order of the SELECT list.

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct SqlRow {
    values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, idx: usize) -> &SqlValue {
        self.values.get(idx).unwrap_or(&SqlValue::Null)
    }

    /// Integer column; NULL reads as 0, decimal/text aggregates are parsed.
    pub fn i64(&self, idx: usize) -> i64 {
        match self.value(idx) {
            SqlValue::Int(v) => *v,
            SqlValue::Float(v) => *v as i64,
            SqlValue::Text(s) => s.parse::<f64>().map(|f| f as i64).unwrap_or(0),
            SqlValue::Null => 0,
        }
    }

    pub fn opt_i64(&self, idx: usize) -> Option<i64> {
        match self.value(idx) {
            SqlValue::Null => None,
            _ => Some(self.i64(idx)),
        }
    }

    pub fn f64(&self, idx: usize) -> f64 {
        match self.value(idx) {
            SqlValue::Int(v) => *v as f64,
            SqlValue::Float(v) => *v,
            SqlValue::Text(s) => s.parse().unwrap_or(0.0),
            SqlValue::Null => 0.0,
        }
    }

    /// Text column; NULL reads as "".
    pub fn text(&self, idx: usize) -> String {
        match self.value(idx) {
            SqlValue::Text(s) => s.clone(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Float(v) => v.to_string(),
            SqlValue::Null => String::new(),
        }
    }

    pub fn opt_text(&self, idx: usize) -> Option<String> {
        match self.value(idx) {
            SqlValue::Null => None,
            _ => Some(self.text(idx)),
        }
    }
}

/// A positional query parameter.
#[derive(Debug, Clone)]
pub enum SqlParam {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for SqlParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for SqlParam {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for SqlParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlParam {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlParam {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&String> for SqlParam {
    fn from(v: &String) -> Self {
        Self::Text(v.clone())
    }
}

// ---------------------------------------------------------------------------
// MySQL conversions
// ---------------------------------------------------------------------------

pub fn mysql_value_to_sql(value: mysql_async::Value) -> SqlValue {
    match value {
        mysql_async::Value::NULL => SqlValue::Null,
        mysql_async::Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => SqlValue::Text(s),
            Err(e) => SqlValue::Text(String::from_utf8_lossy(e.as_bytes()).to_string()),
        },
        mysql_async::Value::Int(i) => SqlValue::Int(i),
        mysql_async::Value::UInt(u) => SqlValue::Int(u as i64),
        mysql_async::Value::Float(f) => SqlValue::Float(f as f64),
        mysql_async::Value::Double(d) => SqlValue::Float(d),
        mysql_async::Value::Date(year, month, day, hour, minute, second, _micro) => {
            SqlValue::Text(format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ))
        }
        mysql_async::Value::Time(_neg, days, hours, minutes, seconds, _micro) => {
            let total_hours = days * 24 + (hours as u32);
            SqlValue::Text(format!("{}:{:02}:{:02}", total_hours, minutes, seconds))
        }
    }
}

pub fn mysql_row_to_sql(row: mysql_async::Row) -> SqlRow {
    let len = row.columns_ref().len();
    let mut values = Vec::with_capacity(len);
    let mut row = row;
    for idx in 0..len {
        let value: mysql_async::Value =
            row.take(idx).unwrap_or(mysql_async::Value::NULL);
        values.push(mysql_value_to_sql(value));
    }
    SqlRow::new(values)
}

pub fn sql_param_to_mysql(param: &SqlParam) -> mysql_async::Value {
    match param {
        SqlParam::Int(v) => mysql_async::Value::Int(*v),
        SqlParam::Float(v) => mysql_async::Value::Double(*v),
        SqlParam::Text(v) => mysql_async::Value::Bytes(v.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decimal_aggregates_parse_as_i64() {
        // MySQL returns SUM()/AVG() as DECIMAL text.
        let row = SqlRow::new(vec![SqlValue::Text("1234".into()), SqlValue::Text("12.5".into())]);
        assert_eq!(row.i64(0), 1234);
        assert_eq!(row.f64(1), 12.5);
    }

    #[test]
    fn null_columns_read_as_zero_values() {
        let row = SqlRow::new(vec![SqlValue::Null]);
        assert_eq!(row.i64(0), 0);
        assert_eq!(row.text(0), "");
        assert_eq!(row.opt_i64(0), None);
    }

    #[test]
    fn out_of_range_index_reads_as_null() {
        let row = SqlRow::new(vec![SqlValue::Int(1)]);
        assert_eq!(row.opt_i64(5), None);
    }

    #[test]
    fn mysql_value_conversion() {
        assert_eq!(mysql_value_to_sql(mysql_async::Value::Int(7)), SqlValue::Int(7));
        assert_eq!(mysql_value_to_sql(mysql_async::Value::UInt(7)), SqlValue::Int(7));
        assert_eq!(
            mysql_value_to_sql(mysql_async::Value::Bytes(b"abc".to_vec())),
            SqlValue::Text("abc".into())
        );
        assert_eq!(mysql_value_to_sql(mysql_async::Value::NULL), SqlValue::Null);
    }
}

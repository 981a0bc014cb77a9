use serde::{Deserialize, Deserializer, Serialize};

/// Title of the column whose text drives categorization.
pub const DEADLINE_COLUMN: &str = "Deadline";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Owner {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Board {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub owners: Vec<Owner>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ColumnValue {
    pub title: String,
    pub text: Option<String>,
    pub value: Option<String>,
}

/// Wire shape of a column value. Older API versions expose `title` directly,
/// newer ones only through the nested `column { title }` object.
#[derive(Deserialize)]
struct RawColumnValue {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    column: Option<RawColumnRef>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

#[derive(Deserialize)]
struct RawColumnRef {
    title: String,
}

impl<'de> Deserialize<'de> for ColumnValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawColumnValue::deserialize(deserializer)?;
        let title = raw
            .title
            .or_else(|| raw.column.map(|c| c.title))
            .unwrap_or_default();
        Ok(Self {
            title,
            text: raw.text,
            value: raw.value,
        })
    }
}

impl ColumnValue {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            text: Some(text.into()),
            value: None,
        }
    }

    /// Visible text, empty when the platform sent none.
    pub fn display_text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    /// Decodes the raw JSON-encoded value. `None` when absent or undecodable.
    pub fn structured_value(&self) -> Option<serde_json::Value> {
        let raw = self.value.as_deref()?;
        match serde_json::from_str(raw) {
            Ok(serde_json::Value::Null) => None,
            Ok(value) => Some(value),
            Err(err) => {
                tracing::debug!(title = %self.title, error = %err, "column value is not valid json");
                None
            }
        }
    }
}

/// Nested item. Same shape as a task but never categorized on its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subtask {
    pub id: String,
    pub name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub column_values: Vec<ColumnValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub name: String,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub column_values: Vec<ColumnValue>,

    #[serde(default, deserialize_with = "null_as_empty")]
    pub subitems: Vec<Subtask>,
}

impl Task {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            column_values: vec![],
            subitems: vec![],
        }
    }

    pub fn with_column(mut self, title: &str, text: &str) -> Self {
        self.column_values.push(ColumnValue::new(title, text));
        self
    }

    pub fn column(&self, title: &str) -> Option<&ColumnValue> {
        self.column_values.iter().find(|c| c.title == title)
    }

    /// Trimmed text of the `Deadline` column, if present and non-empty.
    pub fn deadline_text(&self) -> Option<&str> {
        self.column_values
            .iter()
            .filter(|c| c.title == DEADLINE_COLUMN)
            .filter_map(|c| c.text.as_deref())
            .map(str::trim)
            .find(|text| !text.is_empty())
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

use serde_json::Value;
use tracing::debug;

use crate::bail;
use crate::error::{ErrorKind, TransferResult};
use crate::types::KindDetails;

/// Normalizes a column name so it is accepted by every destination.
///
/// Names are lower-cased, whitespace runs become `__` and a leading digit gets a `col_` prefix.
pub fn escape_name(name: &str) -> String {
    let lowered = name.to_lowercase();

    let mut escaped = String::with_capacity(lowered.len());
    let mut in_whitespace = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                escaped.push_str("__");
            }
            in_whitespace = true;
        } else {
            escaped.push(ch);
            in_whitespace = false;
        }
    }

    if escaped.starts_with(|ch: char| ch.is_ascii_digit()) {
        escaped.insert_str(0, "col_");
    }

    escaped
}

/// A column known to a table buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    kind_details: KindDetails,
    primary_key: bool,
    /// The source sent the TOAST placeholder for this column at least once.
    toasted: bool,
    /// Destination-side: the default value has already been backfilled.
    backfilled: bool,
    default_value: Option<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind_details: KindDetails) -> Self {
        Self {
            name: name.into(),
            kind_details,
            primary_key: false,
            toasted: false,
            backfilled: false,
            default_value: None,
        }
    }

    pub fn with_kind_details(mut self, kind_details: KindDetails) -> Self {
        self.kind_details = kind_details;
        self
    }

    pub fn with_default_value(mut self, default_value: Value) -> Self {
        self.default_value = Some(default_value);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind_details(&self) -> KindDetails {
        self.kind_details
    }

    pub fn primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn toasted(&self) -> bool {
        self.toasted
    }

    pub fn backfilled(&self) -> bool {
        self.backfilled
    }

    pub fn set_backfilled(&mut self, backfilled: bool) {
        self.backfilled = backfilled;
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Returns `true` if the column has no resolved kind and must not be written.
    pub fn should_skip(&self) -> bool {
        self.kind_details.is_invalid()
    }

    /// Returns `true` if the destination still has to backfill the default value.
    pub fn should_backfill(&self) -> bool {
        !self.primary_key && !self.should_skip() && self.default_value.is_some() && !self.backfilled
    }
}

/// Flags applied by [`Columns::upsert_column`]. `None` leaves the flag untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertColumnArgs {
    pub toasted: Option<bool>,
    pub primary_key: Option<bool>,
    pub backfilled: Option<bool>,
}

/// Ordered column registry of a table.
///
/// New columns are always appended, so the order in which columns were first seen is kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Columns {
    columns: Vec<Column>,
}

impl Columns {
    pub fn new(columns: Vec<Column>) -> Self {
        let mut registry = Self::default();
        for column in columns {
            registry.add_column(column);
        }

        registry
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Returns the columns that have a resolved kind.
    pub fn valid_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|column| !column.should_skip())
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Appends `column` unless its name is empty or already registered.
    pub fn add_column(&mut self, column: Column) {
        if column.name.is_empty() || self.get_column(&column.name).is_some() {
            return;
        }

        self.columns.push(column);
    }

    /// Replaces the column with the same name. Unknown columns are ignored.
    pub fn update_column(&mut self, column: Column) {
        if let Some(existing) = self.columns.iter_mut().find(|c| c.name == column.name) {
            *existing = column;
        }
    }

    /// Upgrades an `invalid` column to `kind_details`.
    ///
    /// Resolved kinds are never replaced, and an `invalid` kind is never written.
    pub fn upgrade_kind(&mut self, name: &str, kind_details: KindDetails) -> bool {
        if kind_details.is_invalid() {
            return false;
        }

        match self.columns.iter_mut().find(|column| column.name == name) {
            Some(column) if column.kind_details.is_invalid() => {
                column.kind_details = kind_details;
                true
            }
            _ => false,
        }
    }

    /// Applies `args` to the named column, adding it as `invalid` if it does not exist.
    pub fn upsert_column(&mut self, name: &str, args: UpsertColumnArgs) -> TransferResult<()> {
        if name.is_empty() {
            bail!(ErrorKind::InvalidData, "Column name is empty");
        }

        let index = match self.columns.iter().position(|column| column.name == name) {
            Some(index) => index,
            None => {
                debug!(column = name, "adding a new column");
                self.columns.push(Column::new(name, KindDetails::Invalid));
                self.columns.len() - 1
            }
        };
        let column = &mut self.columns[index];

        if let Some(toasted) = args.toasted {
            column.toasted = toasted;
        }
        if let Some(primary_key) = args.primary_key {
            column.primary_key = primary_key;
        }
        if let Some(backfilled) = args.backfilled {
            column.backfilled = backfilled;
        }

        Ok(())
    }

    pub fn delete_column(&mut self, name: &str) {
        self.columns.retain(|column| column.name != name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_name_normalizes() {
        assert_eq!(escape_name("Name"), "name");
        assert_eq!(escape_name("first name"), "first__name");
        assert_eq!(escape_name("first \t name"), "first__name");
        assert_eq!(escape_name("1st_place"), "col_1st_place");
        assert_eq!(escape_name("__artie_delete"), "__artie_delete");
    }

    #[test]
    fn add_column_appends_and_ignores_duplicates() {
        let mut columns = Columns::default();
        columns.add_column(Column::new("id", KindDetails::Integer));
        columns.add_column(Column::new("name", KindDetails::String));
        columns.add_column(Column::new("id", KindDetails::String));
        columns.add_column(Column::new("", KindDetails::String));

        let names: Vec<_> = columns.columns().iter().map(Column::name).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(
            columns.get_column("id").map(Column::kind_details),
            Some(KindDetails::Integer)
        );
    }

    #[test]
    fn upgrade_kind_only_from_invalid() {
        let mut columns = Columns::new(vec![
            Column::new("a", KindDetails::Invalid),
            Column::new("b", KindDetails::Integer),
        ]);

        assert!(!columns.upgrade_kind("a", KindDetails::Invalid));
        assert!(columns.upgrade_kind("a", KindDetails::String));
        assert!(!columns.upgrade_kind("b", KindDetails::String));
        assert!(!columns.upgrade_kind("missing", KindDetails::String));

        assert_eq!(
            columns.get_column("a").map(Column::kind_details),
            Some(KindDetails::String)
        );
        assert_eq!(
            columns.get_column("b").map(Column::kind_details),
            Some(KindDetails::Integer)
        );
    }

    #[test]
    fn upsert_column_adds_or_updates_flags() {
        let mut columns = Columns::new(vec![Column::new("id", KindDetails::Integer)]);

        columns
            .upsert_column(
                "id",
                UpsertColumnArgs {
                    primary_key: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();
        columns
            .upsert_column(
                "blob",
                UpsertColumnArgs {
                    toasted: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let id = columns.get_column("id").unwrap();
        assert!(id.primary_key());
        assert_eq!(id.kind_details(), KindDetails::Integer);

        let blob = columns.get_column("blob").unwrap();
        assert!(blob.toasted());
        assert!(blob.should_skip());
        assert_eq!(columns.valid_columns().count(), 1);

        assert!(columns.upsert_column("", UpsertColumnArgs::default()).is_err());
    }

    #[test]
    fn should_backfill_requires_default_value() {
        let column = Column::new("status", KindDetails::String);
        assert!(!column.should_backfill());

        let mut column = column.with_default_value(Value::String("active".to_string()));
        assert!(column.should_backfill());

        column.set_backfilled(true);
        assert!(!column.should_backfill());
    }

    #[test]
    fn delete_column_removes_it() {
        let mut columns = Columns::new(vec![
            Column::new("a", KindDetails::String),
            Column::new("b", KindDetails::String),
        ]);
        columns.delete_column("a");
        assert!(columns.get_column("a").is_none());
        assert_eq!(columns.len(), 1);
    }
}

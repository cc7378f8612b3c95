//! Debezium JSON envelopes, with or without the embedded Kafka Connect schema.

use std::collections::HashMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;
use transfer_config::shared::KeyFormat;

use crate::bail;
use crate::constants::DEBEZIUM_PHYSICAL_TABLE_IDENTIFIER;
use crate::error::{ErrorKind, TransferError, TransferResult};
use crate::format::{CdcEvent, FormatAdapter, Operation};
use crate::transfer_error;
use crate::types::{
    Column, Columns, ExtendedTimeKind, KindDetails, OptionalSchema, RowData, escape_name,
};

const STRING_KEY_PREFIX: &str = "Struct{";
const STRING_KEY_SUFFIX: &str = "}";

const DATE: &str = "io.debezium.time.Date";
const TIME: &str = "io.debezium.time.Time";
const MICRO_TIME: &str = "io.debezium.time.MicroTime";
const TIMESTAMP: &str = "io.debezium.time.Timestamp";
const MICRO_TIMESTAMP: &str = "io.debezium.time.MicroTimestamp";
const ZONED_TIMESTAMP: &str = "io.debezium.time.ZonedTimestamp";
const JSON: &str = "io.debezium.data.Json";
const DECIMAL: &str = "org.apache.kafka.connect.data.Decimal";

const DECIMAL_SCALE_PARAMETER: &str = "scale";
const DECIMAL_PRECISION_PARAMETER: &str = "connect.decimal.precision";

/// Adapter for Debezium's JSON converter output.
#[derive(Debug, Clone, Copy, Default)]
pub struct DebeziumJsonFormat;

#[derive(Debug, Deserialize)]
struct SchemaEnvelope {
    #[serde(default)]
    schema: Option<Schema>,
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Schema {
    #[serde(default)]
    fields: Vec<Field>,
}

impl Schema {
    /// Returns the fields of the `after` row image.
    fn after_fields(&self) -> Option<&[Field]> {
        self.fields
            .iter()
            .find(|field| field.name == "after")
            .map(|field| field.fields.as_slice())
    }
}

#[derive(Debug, Deserialize)]
struct Field {
    #[serde(rename = "type", default)]
    field_type: String,
    #[serde(rename = "field", default)]
    name: String,
    /// Debezium or Kafka Connect logical type.
    #[serde(rename = "name", default)]
    logical_type: Option<String>,
    #[serde(default)]
    parameters: HashMap<String, Value>,
    #[serde(default)]
    fields: Vec<Field>,
}

impl Field {
    fn is_integer(&self) -> bool {
        self.logical_type.is_none()
            && matches!(self.field_type.as_str(), "int8" | "int16" | "int32" | "int64")
    }

    fn parameter(&self, name: &str) -> Option<u16> {
        match self.parameters.get(name)? {
            Value::String(value) => value.parse().ok(),
            Value::Number(value) => value.as_u64().and_then(|value| u16::try_from(value).ok()),
            _ => None,
        }
    }

    fn scale(&self) -> u16 {
        self.parameter(DECIMAL_SCALE_PARAMETER).unwrap_or(0)
    }

    fn kind_details(&self) -> KindDetails {
        match self.logical_type.as_deref() {
            Some(DATE) => KindDetails::ExtendedTime(ExtendedTimeKind::Date),
            Some(TIME | MICRO_TIME) => KindDetails::ExtendedTime(ExtendedTimeKind::Time),
            Some(TIMESTAMP | MICRO_TIMESTAMP) => {
                KindDetails::ExtendedTime(ExtendedTimeKind::TimestampNtz)
            }
            Some(ZONED_TIMESTAMP) => KindDetails::ExtendedTime(ExtendedTimeKind::TimestampTz),
            Some(JSON) => KindDetails::Struct,
            Some(DECIMAL) => KindDetails::Decimal {
                precision: self.parameter(DECIMAL_PRECISION_PARAMETER),
                scale: self.scale(),
            },
            _ => match self.field_type.as_str() {
                "int8" | "int16" | "int32" | "int64" => KindDetails::Integer,
                "float" | "float32" | "float64" | "double" => KindDetails::Float,
                "boolean" => KindDetails::Boolean,
                "string" => KindDetails::String,
                "struct" | "map" => KindDetails::Struct,
                "array" => KindDetails::Array,
                _ => KindDetails::Invalid,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct Payload {
    #[serde(default)]
    after: Option<Map<String, Value>>,
    #[serde(default)]
    source: Source,
    #[serde(default)]
    op: String,
}

#[derive(Debug, Default, Deserialize)]
struct Source {
    #[serde(default)]
    ts_ms: i64,
    #[serde(default)]
    table: String,
}

/// Builds the kind hints of the `after` image.
///
/// Plain strings are pinned to `string` so values that look like dates stay strings.
fn optional_schema(fields: &[Field]) -> OptionalSchema {
    fields
        .iter()
        .filter_map(|field| {
            let kind = field.kind_details();
            let is_plain_string = field.field_type == "string" && field.logical_type.is_none();
            (is_plain_string || field.logical_type.is_some() && !kind.is_invalid())
                .then(|| (field.name.clone(), kind))
        })
        .collect()
}

fn columns(fields: &[Field]) -> Columns {
    Columns::new(
        fields
            .iter()
            .map(|field| Column::new(escape_name(&field.name), field.kind_details()))
            .collect(),
    )
}

/// Reads an epoch based value that may arrive as an integer, a float or a numeric string.
fn epoch_value(value: &Value) -> TransferResult<i64> {
    let parsed = match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64)),
        Value::String(value) => Some(value.parse::<f64>()? as i64),
        _ => None,
    };

    parsed.ok_or_else(|| {
        transfer_error!(
            ErrorKind::ConversionError,
            "Temporal value is not numeric",
            value.to_string()
        )
    })
}

fn out_of_range(logical_type: &str, raw: i64) -> TransferError {
    transfer_error!(
        ErrorKind::ConversionError,
        "Temporal value is out of range",
        format!("{logical_type} value {raw} is out of range")
    )
}

fn time_of_day(micros: i64, logical_type: &str) -> TransferResult<NaiveTime> {
    let seconds = u32::try_from(micros.div_euclid(1_000_000))
        .map_err(|_| out_of_range(logical_type, micros))?;
    let nanos = u32::try_from(micros.rem_euclid(1_000_000) * 1_000)
        .map_err(|_| out_of_range(logical_type, micros))?;

    NaiveTime::from_num_seconds_from_midnight_opt(seconds, nanos)
        .ok_or_else(|| out_of_range(logical_type, micros))
}

/// Converts a Debezium epoch based temporal value to its string form.
fn convert_time(logical_type: &str, value: &Value) -> TransferResult<Value> {
    let raw = epoch_value(value)?;

    let converted = match logical_type {
        DATE => NaiveDate::from_ymd_opt(1970, 1, 1)
            .zip(TimeDelta::try_days(raw))
            .and_then(|(epoch, days)| epoch.checked_add_signed(days))
            .ok_or_else(|| out_of_range(logical_type, raw))?
            .format("%Y-%m-%d")
            .to_string(),
        TIME => time_of_day(raw.saturating_mul(1_000), logical_type)?
            .format("%H:%M:%S%.3f")
            .to_string(),
        MICRO_TIME => time_of_day(raw, logical_type)?
            .format("%H:%M:%S%.6f")
            .to_string(),
        TIMESTAMP => DateTime::from_timestamp_millis(raw)
            .ok_or_else(|| out_of_range(logical_type, raw))?
            .naive_utc()
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string(),
        MICRO_TIMESTAMP => DateTime::from_timestamp_micros(raw)
            .ok_or_else(|| out_of_range(logical_type, raw))?
            .naive_utc()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string(),
        other => {
            bail!(
                ErrorKind::ConversionError,
                "Unsupported temporal type",
                other.to_string()
            );
        }
    };

    Ok(Value::String(converted))
}

/// Decodes `org.apache.kafka.connect.data.Decimal`: a base64 big-endian two's complement
/// unscaled integer.
fn decode_decimal(value: &Value, scale: u16) -> TransferResult<Value> {
    let Value::String(encoded) = value else {
        bail!(
            ErrorKind::ConversionError,
            "Decimal value is not a base64 string",
            value.to_string()
        );
    };

    let bytes = STANDARD.decode(encoded)?;
    if bytes.len() > 16 {
        bail!(
            ErrorKind::ConversionError,
            "Decimal value is too large",
            format!("{} bytes do not fit in 128 bits", bytes.len())
        );
    }

    let negative = bytes.first().is_some_and(|byte| byte & 0x80 != 0);
    let mut buffer = if negative { [0xff; 16] } else { [0; 16] };
    buffer[16 - bytes.len()..].copy_from_slice(&bytes);
    let unscaled = i128::from_be_bytes(buffer);

    Ok(Value::String(format_decimal(unscaled, scale)))
}

fn format_decimal(unscaled: i128, scale: u16) -> String {
    let sign = if unscaled < 0 { "-" } else { "" };
    let digits = unscaled.unsigned_abs().to_string();
    let scale = usize::from(scale);

    if scale == 0 {
        return format!("{sign}{digits}");
    }

    let padded = format!("{digits:0>width$}", width = scale + 1);
    let (integer, fraction) = padded.split_at(padded.len() - scale);
    format!("{sign}{integer}.{fraction}")
}

/// Applies the schema driven conversions to the `after` image.
fn convert_fields(row: &mut RowData, fields: &[Field]) {
    for field in fields {
        let Some(value) = row.get_mut(&field.name) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        if field.is_integer() {
            if let Value::Number(number) = value
                && !number.is_i64()
                && !number.is_u64()
                && let Some(float) = number.as_f64()
                && float.fract() == 0.0
            {
                *value = Value::from(float as i64);
            }
            continue;
        }

        let converted = match field.logical_type.as_deref() {
            Some(logical_type @ (DATE | TIME | MICRO_TIME | TIMESTAMP | MICRO_TIMESTAMP)) => {
                convert_time(logical_type, value)
            }
            Some(DECIMAL) => decode_decimal(value, field.scale()),
            _ => continue,
        };

        match converted {
            Ok(converted) => *value = converted,
            Err(err) => {
                debug!(column = %field.name, error = %err, "skipped casting debezium value");
            }
        }
    }
}

fn sanitize_key(key: Map<String, Value>) -> RowData {
    key.into_iter()
        .filter(|(name, _)| name != DEBEZIUM_PHYSICAL_TABLE_IDENTIFIER)
        .map(|(name, value)| (escape_name(&name), value))
        .collect()
}

fn parse_json_key(key: &[u8]) -> TransferResult<RowData> {
    let Value::Object(mut key) = serde_json::from_slice::<Value>(key)? else {
        bail!(ErrorKind::DeserializationError, "Message key is not a JSON object");
    };

    if key.is_empty() {
        bail!(ErrorKind::DeserializationError, "Message key is empty");
    }

    if let Some(payload) = key.remove("payload") {
        let Value::Object(payload) = payload else {
            bail!(
                ErrorKind::DeserializationError,
                "Message key payload is malformed",
                payload.to_string()
            );
        };
        key = payload;
    }

    Ok(sanitize_key(key))
}

/// Parses Kafka's `StringConverter` rendering of a struct, `Struct{k=v,k1=v1}`.
///
/// Separators are not escaped by Kafka: pairs split on `,` and a pair splits on its first `=`.
fn parse_string_key(key: &[u8]) -> TransferResult<RowData> {
    let key = std::str::from_utf8(key)?;

    if key.len() <= STRING_KEY_PREFIX.len() + STRING_KEY_SUFFIX.len() {
        bail!(ErrorKind::DeserializationError, "Message key is too short", key.to_string());
    }

    let Some(inner) = key
        .strip_prefix(STRING_KEY_PREFIX)
        .and_then(|key| key.strip_suffix(STRING_KEY_SUFFIX))
    else {
        bail!(
            ErrorKind::DeserializationError,
            "Message key has an incorrect structure",
            key.to_string()
        );
    };

    let mut parsed = Map::new();
    for pair in inner.split(',') {
        let Some((name, value)) = pair.split_once('=') else {
            bail!(
                ErrorKind::DeserializationError,
                "Message key has a malformed key value pair",
                pair.to_string()
            );
        };
        parsed.insert(name.to_string(), Value::String(value.to_string()));
    }

    Ok(sanitize_key(parsed))
}

impl FormatAdapter for DebeziumJsonFormat {
    fn primary_key(&self, key: &[u8], key_format: KeyFormat) -> TransferResult<RowData> {
        if key.is_empty() {
            bail!(ErrorKind::DeserializationError, "Message key is empty");
        }

        match key_format {
            KeyFormat::Json => parse_json_key(key),
            KeyFormat::String => parse_string_key(key),
        }
    }

    fn event_from_bytes(&self, value: &[u8]) -> TransferResult<CdcEvent> {
        let raw: Value = serde_json::from_slice(value)?;
        let (schema, payload) = if raw.get("payload").is_some() {
            let envelope: SchemaEnvelope = serde_json::from_value(raw)?;
            (envelope.schema, envelope.payload)
        } else {
            (None, serde_json::from_value::<Payload>(raw)?)
        };

        let Some(operation) = Operation::from_code(&payload.op) else {
            bail!(
                ErrorKind::DeserializationError,
                "Unsupported change operation",
                format!("operation '{}' is not supported", payload.op)
            );
        };

        if payload.source.table.is_empty() {
            bail!(ErrorKind::DeserializationError, "Change event has no source table");
        }

        let Some(execution_time) = DateTime::from_timestamp_millis(payload.source.ts_ms) else {
            bail!(
                ErrorKind::DeserializationError,
                "Change event has an invalid source timestamp",
                payload.source.ts_ms.to_string()
            );
        };

        let after_fields = schema.as_ref().and_then(Schema::after_fields);
        let after = payload
            .after
            .filter(|after| !after.is_empty())
            .map(|after| {
                let mut row: RowData = after.into_iter().collect();
                if let Some(fields) = after_fields {
                    convert_fields(&mut row, fields);
                }
                row
            });

        Ok(CdcEvent {
            table_name: payload.source.table,
            operation,
            execution_time,
            after,
            optional_schema: after_fields.map(optional_schema),
            columns: after_fields.map(columns),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema_event(after: Value, op: &str) -> Vec<u8> {
        json!({
            "schema": {
                "type": "struct",
                "fields": [
                    {"type": "struct", "field": "before", "fields": []},
                    {
                        "type": "struct",
                        "field": "after",
                        "fields": [
                            {"type": "int32", "optional": false, "field": "id"},
                            {"type": "string", "optional": true, "field": "Created At"},
                            {"type": "int32", "optional": true, "name": "io.debezium.time.Date", "field": "birthday"},
                            {"type": "int64", "optional": true, "name": "io.debezium.time.Timestamp", "field": "signed_up"},
                            {
                                "type": "bytes",
                                "optional": true,
                                "name": "org.apache.kafka.connect.data.Decimal",
                                "parameters": {"scale": "2", "connect.decimal.precision": "5"},
                                "field": "balance"
                            }
                        ]
                    }
                ]
            },
            "payload": {
                "before": null,
                "after": after,
                "source": {"connector": "postgresql", "ts_ms": 1_700_000_000_000i64, "table": "customers"},
                "op": op
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn schema_envelope_is_converted() {
        let event = DebeziumJsonFormat
            .event_from_bytes(&schema_event(
                json!({
                    "id": 1.0,
                    "Created At": "2023-01-01",
                    "birthday": 19000,
                    "signed_up": 1_700_000_000_000i64,
                    "balance": "MDk="
                }),
                "c",
            ))
            .unwrap();

        assert_eq!(event.table_name, "customers");
        assert_eq!(event.operation, Operation::Create);
        assert_eq!(event.execution_time.timestamp_millis(), 1_700_000_000_000);

        let after = event.after.as_ref().unwrap();
        assert_eq!(after["id"], json!(1));
        assert!(after["id"].is_i64());
        assert_eq!(after["birthday"], json!("2022-01-08"));
        assert_eq!(after["signed_up"], json!("2023-11-14T22:13:20.000"));
        assert_eq!(after["balance"], json!("123.45"));

        let optional_schema = event.optional_schema.as_ref().unwrap();
        assert_eq!(optional_schema["Created At"], KindDetails::String);
        assert!(!optional_schema.contains_key("id"));

        let columns = event.columns.as_ref().unwrap();
        let names: Vec<_> = columns.columns().iter().map(Column::name).collect();
        assert_eq!(
            names,
            vec!["id", "created__at", "birthday", "signed_up", "balance"]
        );
        assert_eq!(
            columns.get_column("balance").map(Column::kind_details),
            Some(KindDetails::Decimal {
                precision: Some(5),
                scale: 2
            })
        );
    }

    #[test]
    fn deletes_have_no_row_image() {
        let event = DebeziumJsonFormat
            .event_from_bytes(&schema_event(Value::Null, "d"))
            .unwrap();

        assert_eq!(event.operation, Operation::Delete);
        assert!(event.is_delete());
    }

    #[test]
    fn schemaless_envelope() {
        let value = json!({
            "before": null,
            "after": {"id": 7, "name": "robin"},
            "source": {"ts_ms": 1_700_000_000_000i64, "table": "orders"},
            "op": "u"
        });

        let event = DebeziumJsonFormat
            .event_from_bytes(value.to_string().as_bytes())
            .unwrap();

        assert_eq!(event.operation, Operation::Update);
        assert_eq!(event.after.unwrap()["name"], json!("robin"));
        assert!(event.optional_schema.is_none());
        assert!(event.columns.is_none());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = DebeziumJsonFormat.event_from_bytes(b"not json").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeserializationError);

        let unknown_op = json!({"after": {"id": 1}, "source": {"ts_ms": 0, "table": "t"}, "op": "x"});
        assert!(
            DebeziumJsonFormat
                .event_from_bytes(unknown_op.to_string().as_bytes())
                .is_err()
        );

        let no_table = json!({"after": {"id": 1}, "source": {"ts_ms": 0}, "op": "c"});
        assert!(
            DebeziumJsonFormat
                .event_from_bytes(no_table.to_string().as_bytes())
                .is_err()
        );
    }

    #[test]
    fn decimals_are_decoded() {
        assert_eq!(decode_decimal(&json!("MDk="), 2).unwrap(), json!("123.45"));
        assert_eq!(decode_decimal(&json!("/5w="), 2).unwrap(), json!("-1.00"));
        assert_eq!(decode_decimal(&json!("MDk="), 0).unwrap(), json!("12345"));
        assert_eq!(decode_decimal(&json!("MDk="), 6).unwrap(), json!("0.012345"));
        assert!(decode_decimal(&json!(12), 2).is_err());
    }

    #[test]
    fn times_are_converted() {
        assert_eq!(convert_time(TIME, &json!(3_600_500)).unwrap(), json!("01:00:00.500"));
        assert_eq!(
            convert_time(MICRO_TIME, &json!(1_000_001)).unwrap(),
            json!("00:00:01.000001")
        );
        assert_eq!(
            convert_time(MICRO_TIMESTAMP, &json!(1_700_000_000_000_001i64)).unwrap(),
            json!("2023-11-14T22:13:20.000001")
        );
        assert_eq!(convert_time(DATE, &json!("19000")).unwrap(), json!("2022-01-08"));
        assert!(convert_time(TIME, &json!(true)).is_err());
    }

    #[test]
    fn json_keys_with_and_without_payload() {
        let key = DebeziumJsonFormat
            .primary_key(
                br#"{"schema": {"type": "struct"}, "payload": {"ID": 1, "__dbz__physicalTableIdentifier": "t"}}"#,
                KeyFormat::Json,
            )
            .unwrap();
        assert_eq!(key, RowData::from([("id".to_string(), json!(1))]));

        let key = DebeziumJsonFormat
            .primary_key(br#"{"id": 1, "tenant id": "acme"}"#, KeyFormat::Json)
            .unwrap();
        assert_eq!(key.len(), 2);
        assert_eq!(key["tenant__id"], json!("acme"));

        assert!(DebeziumJsonFormat.primary_key(b"{}", KeyFormat::Json).is_err());
        assert!(DebeziumJsonFormat.primary_key(b"", KeyFormat::Json).is_err());
        assert!(
            DebeziumJsonFormat
                .primary_key(br#"{"payload": 1}"#, KeyFormat::Json)
                .is_err()
        );
    }

    #[test]
    fn string_keys() {
        let key = DebeziumJsonFormat
            .primary_key(b"Struct{id=1,course=a=b}", KeyFormat::String)
            .unwrap();
        assert_eq!(key["id"], json!("1"));
        assert_eq!(key["course"], json!("a=b"));

        for malformed in [&b"Struct{}"[..], b"id=1", b"Struct{id}"] {
            assert!(
                DebeziumJsonFormat
                    .primary_key(malformed, KeyFormat::String)
                    .is_err()
            );
        }
    }
}

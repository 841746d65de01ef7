//! Value coercion from field values to cell payloads

use crate::error::{ExcelError, Result};
use crate::types::{CellValue, FieldValue, ScalarKind, TEXT_FORMAT};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default label written for `true`
pub const DEFAULT_TRUE_LABEL: &str = "Y";
/// Default label written for `false`
pub const DEFAULT_FALSE_LABEL: &str = "N";

/// Text labels substituted for boolean values
///
/// A missing label makes that value fall back to a native boolean cell.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BooleanLabels {
    pub true_label: Option<String>,
    pub false_label: Option<String>,
}

impl Default for BooleanLabels {
    fn default() -> Self {
        BooleanLabels {
            true_label: Some(DEFAULT_TRUE_LABEL.to_string()),
            false_label: Some(DEFAULT_FALSE_LABEL.to_string()),
        }
    }
}

impl BooleanLabels {
    /// No labels: booleans are always written natively
    pub fn none() -> Self {
        BooleanLabels {
            true_label: None,
            false_label: None,
        }
    }

    pub fn new(true_label: impl Into<String>, false_label: impl Into<String>) -> Self {
        BooleanLabels {
            true_label: Some(true_label.into()),
            false_label: Some(false_label.into()),
        }
    }

    pub fn label(&self, value: bool) -> Option<&str> {
        if value {
            self.true_label.as_deref()
        } else {
            self.false_label.as_deref()
        }
    }

    /// Reverse lookup used when reading sheets back
    pub fn parse(&self, text: &str) -> Option<bool> {
        if self.true_label.as_deref() == Some(text) {
            Some(true)
        } else if self.false_label.as_deref() == Some(text) {
            Some(false)
        } else {
            None
        }
    }
}

/// Cell payload plus the format code it must be displayed with
///
/// `format` is `None` when the caller gave no format and the payload does
/// not force one; the row template's default then applies before the
/// kind's default.
#[derive(Debug, Clone, PartialEq)]
pub struct CoercedCell {
    pub payload: CellValue,
    pub format: Option<String>,
}

impl CoercedCell {
    fn text(payload: String) -> Self {
        CoercedCell {
            payload: CellValue::String(payload),
            format: Some(TEXT_FORMAT.to_string()),
        }
    }

    /// Format shown for this cell when no template default intervenes
    pub fn effective_format(&self, kind: ScalarKind) -> &str {
        match &self.format {
            Some(format) => format,
            None if matches!(self.payload, CellValue::String(_)) => TEXT_FORMAT,
            None => kind.default_format(),
        }
    }
}

/// Decide the payload and effective format of one field value
///
/// Rules in priority order: null becomes empty text, booleans use their
/// label when one exists, numbers are parsed as `f64` from their textual
/// form, dates keep their value, everything else is text. Text payloads
/// always carry the text format `@`.
pub fn coerce(
    field: &str,
    value: &FieldValue,
    kind: ScalarKind,
    format: Option<&str>,
    labels: Option<&BooleanLabels>,
) -> Result<CoercedCell> {
    if value.is_null() {
        return Ok(CoercedCell::text(String::new()));
    }

    let caller_format = || format.filter(|f| !f.is_empty()).map(str::to_string);

    match kind {
        ScalarKind::Boolean => {
            let flag = as_boolean(value).ok_or_else(|| mismatch(field, value, kind))?;
            if let Some(label) = labels.and_then(|l| l.label(flag)) {
                return Ok(CoercedCell::text(label.to_string()));
            }
            Ok(CoercedCell {
                payload: CellValue::Bool(flag),
                format: caller_format(),
            })
        }
        ScalarKind::Number => {
            let number = as_number(value).ok_or_else(|| mismatch(field, value, kind))?;
            Ok(CoercedCell {
                payload: CellValue::Number(number),
                format: caller_format(),
            })
        }
        ScalarKind::Date => match value {
            FieldValue::Date(dt) => Ok(CoercedCell {
                payload: CellValue::DateTime(*dt),
                format: caller_format(),
            }),
            other => Err(mismatch(field, other, kind)),
        },
        ScalarKind::String => Ok(CoercedCell::text(value.as_text())),
    }
}

fn as_boolean(value: &FieldValue) -> Option<bool> {
    match value {
        FieldValue::Bool(b) => Some(*b),
        FieldValue::Text(s) if s.trim().eq_ignore_ascii_case("true") => Some(true),
        FieldValue::Text(s) if s.trim().eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

fn as_number(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Int(i) => Some(*i as f64),
        FieldValue::UInt(u) => Some(*u as f64),
        FieldValue::Float(f) => Some(*f),
        FieldValue::Text(s) => s.trim().parse::<f64>().ok(),
        FieldValue::Bool(_) | FieldValue::Date(_) | FieldValue::Null => None,
    }
}

fn mismatch(field: &str, value: &FieldValue, kind: ScalarKind) -> ExcelError {
    ExcelError::ValueCoercion {
        field: field.to_string(),
        value: value.as_text(),
        kind,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DATE_TIME_FORMAT, GENERAL_FORMAT};
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn run(value: FieldValue, kind: ScalarKind, format: Option<&str>) -> Result<CoercedCell> {
        coerce("field", &value, kind, format, Some(&BooleanLabels::default()))
    }

    #[test]
    fn test_null_is_empty_text_for_every_kind() {
        for kind in [
            ScalarKind::String,
            ScalarKind::Boolean,
            ScalarKind::Number,
            ScalarKind::Date,
        ] {
            let cell = run(FieldValue::Null, kind, Some("0.00")).unwrap();
            assert_eq!(cell.payload, CellValue::String(String::new()));
            assert_eq!(cell.format.as_deref(), Some(TEXT_FORMAT));
        }
    }

    #[test]
    fn test_boolean_labels() {
        let yes = run(FieldValue::Bool(true), ScalarKind::Boolean, None).unwrap();
        assert_eq!(yes.payload, CellValue::String("Y".into()));
        assert_eq!(yes.format.as_deref(), Some(TEXT_FORMAT));

        let no = run(FieldValue::Text("FALSE".into()), ScalarKind::Boolean, None).unwrap();
        assert_eq!(no.payload, CellValue::String("N".into()));
    }

    #[test]
    fn test_boolean_without_label_is_native() {
        let labels = BooleanLabels {
            true_label: Some("yes".into()),
            false_label: None,
        };
        let cell = coerce(
            "flag",
            &FieldValue::Bool(false),
            ScalarKind::Boolean,
            None,
            Some(&labels),
        )
        .unwrap();
        assert_eq!(cell.payload, CellValue::Bool(false));
        assert_eq!(cell.format, None);
        assert_eq!(cell.effective_format(ScalarKind::Boolean), GENERAL_FORMAT);

        let cell = coerce(
            "flag",
            &FieldValue::Bool(true),
            ScalarKind::Boolean,
            Some("\"on\";;\"off\""),
            None,
        )
        .unwrap();
        assert_eq!(cell.payload, CellValue::Bool(true));
        assert_eq!(cell.format.as_deref(), Some("\"on\";;\"off\""));
    }

    #[test]
    fn test_non_boolean_for_boolean_field_fails() {
        let err = run(FieldValue::Int(1), ScalarKind::Boolean, None).unwrap_err();
        assert!(err.is_coercion_error());
    }

    #[test]
    fn test_number_keeps_caller_format() {
        let cell = run(FieldValue::Int(42), ScalarKind::Number, Some("#,##0")).unwrap();
        assert_eq!(cell.payload, CellValue::Number(42.0));
        assert_eq!(cell.format.as_deref(), Some("#,##0"));

        let cell = run(FieldValue::Text(" 3.25 ".into()), ScalarKind::Number, Some("")).unwrap();
        assert_eq!(cell.payload, CellValue::Number(3.25));
        assert_eq!(cell.format, None);
        assert_eq!(cell.effective_format(ScalarKind::Number), GENERAL_FORMAT);
    }

    #[test]
    fn test_unparseable_number_fails() {
        let err = coerce(
            "amount",
            &FieldValue::Text("12abc".into()),
            ScalarKind::Number,
            None,
            None,
        )
        .unwrap_err();
        match err {
            ExcelError::ValueCoercion { field, value, kind } => {
                assert_eq!(field, "amount");
                assert_eq!(value, "12abc");
                assert_eq!(kind, ScalarKind::Number);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_date_default_format() {
        let dt = NaiveDate::from_ymd_opt(2023, 7, 14)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap();
        let cell = run(FieldValue::Date(dt), ScalarKind::Date, None).unwrap();
        assert_eq!(cell.payload, CellValue::DateTime(dt));
        assert_eq!(cell.format, None);
        assert_eq!(cell.effective_format(ScalarKind::Date), DATE_TIME_FORMAT);

        assert!(run(FieldValue::Int(5), ScalarKind::Date, None).is_err());
    }

    #[test]
    fn test_string_forces_text_format() {
        let cell = run(FieldValue::Float(1.5), ScalarKind::String, Some("0.00")).unwrap();
        assert_eq!(cell.payload, CellValue::String("1.5".into()));
        assert_eq!(cell.format.as_deref(), Some(TEXT_FORMAT));
    }

    proptest! {
        #[test]
        fn prop_integer_numbers_match_text_parse(v in any::<i64>()) {
            let cell = run(FieldValue::Int(v), ScalarKind::Number, None).unwrap();
            let expected: f64 = v.to_string().parse().unwrap();
            prop_assert_eq!(cell.payload, CellValue::Number(expected));
        }

        #[test]
        fn prop_numeric_text_parses(v in -1.0e12f64..1.0e12f64) {
            let text = v.to_string();
            let cell = run(FieldValue::Text(text.clone()), ScalarKind::Number, None).unwrap();
            prop_assert_eq!(cell.payload, CellValue::Number(text.parse().unwrap()));
        }

        #[test]
        fn prop_labels_always_win(b in any::<bool>(), t in "[A-Za-z]{1,8}", f in "[A-Za-z]{1,8}") {
            let labels = BooleanLabels::new(t.clone(), f.clone());
            let cell = coerce("flag", &FieldValue::Bool(b), ScalarKind::Boolean, Some("0"), Some(&labels)).unwrap();
            let expected = if b { t } else { f };
            prop_assert_eq!(cell.payload, CellValue::String(expected));
            prop_assert_eq!(cell.format.as_deref(), Some(TEXT_FORMAT));
        }

        #[test]
        fn prop_alphabetic_text_is_not_a_number(s in "[g-z]{1,10}") {
            prop_assume!(!["inf", "infinity", "nan"].contains(&s.as_str()));
            prop_assert!(run(FieldValue::Text(s), ScalarKind::Number, None).is_err());
        }
    }
}

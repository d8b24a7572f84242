//! Turns a loosely-typed product description into a [`ProductRecord`] or a
//! list of reasons it was refused. Nothing here touches the platform.

use super::IngestError;
use crate::catalog::slugify;
use crate::models::{
    Attributes, BackorderPolicy, ImageSource, NamedAttribute, ProductDetails, ProductPatch,
    ProductRecord,
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::str::FromStr;

pub const REQUIRED_FIELDS_MESSAGE: &str = "title and price are required";

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid(ProductRecord),
    Invalid(Vec<FieldIssue>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldIssue {
    pub field: &'static str,
    pub kind: IssueKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    Missing,
    Malformed,
}

impl FieldIssue {
    fn missing(field: &'static str) -> Self {
        Self {
            field,
            kind: IssueKind::Missing,
            message: format!("{field} is required"),
        }
    }

    fn malformed(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            kind: IssueKind::Malformed,
            message: message.into(),
        }
    }
}

impl Validation {
    pub fn into_result(self) -> Result<ProductRecord, IngestError> {
        match self {
            Validation::Valid(record) => Ok(record),
            Validation::Invalid(issues) => Err(issues_to_error(&issues)),
        }
    }
}

pub fn issues_to_error(issues: &[FieldIssue]) -> IngestError {
    if issues.iter().any(|issue| issue.kind == IssueKind::Missing) {
        return IngestError::missing_field(REQUIRED_FIELDS_MESSAGE);
    }
    let reasons = issues
        .iter()
        .map(|issue| issue.message.as_str())
        .collect::<Vec<_>>()
        .join("; ");
    IngestError::invalid_field(reasons)
}

/// Validates a record for creation: `title` must be non-empty and `price`
/// must be a number greater than zero.
pub fn validate(raw: &Value) -> Validation {
    let Some(obj) = raw.as_object() else {
        return Validation::Invalid(vec![FieldIssue::malformed(
            "record",
            "record must be a JSON object",
        )]);
    };

    let mut issues = Vec::new();
    let title = match text(obj, &["title"]) {
        Ok(Some(title)) => Some(title),
        Ok(None) => {
            issues.push(FieldIssue::missing("title"));
            None
        }
        Err(issue) => {
            issues.push(issue.with_kind(IssueKind::Missing));
            None
        }
    };
    let price = match decimal(obj, "price", &["price"]) {
        Ok(Some(price)) if price > Decimal::ZERO => Some(price),
        _ => {
            issues.push(FieldIssue::missing("price"));
            None
        }
    };
    let details = details(obj, &mut issues);

    match (title, price) {
        (Some(title), Some(price)) if issues.is_empty() => Validation::Valid(ProductRecord {
            title,
            price,
            details,
        }),
        _ => Validation::Invalid(issues),
    }
}

/// Validates a partial record for an update. Absent fields stay absent;
/// present `title`/`price` obey the same rules as on creation.
pub fn validate_patch(raw: &Value) -> Result<ProductPatch, IngestError> {
    let Some(obj) = raw.as_object() else {
        return Err(IngestError::invalid_field("record must be a JSON object"));
    };
    let mut issues = Vec::new();
    let title = match lookup(obj, &["title"]) {
        None | Some(Value::Null) => None,
        Some(_) => match text(obj, &["title"]) {
            Ok(Some(title)) => Some(title),
            _ => {
                issues.push(FieldIssue::malformed("title", "title must not be empty"));
                None
            }
        },
    };
    let price = match decimal(obj, "price", &["price"]) {
        Ok(None) => None,
        Ok(Some(price)) if price > Decimal::ZERO => Some(price),
        _ => {
            issues.push(FieldIssue::malformed(
                "price",
                "price must be a number greater than zero",
            ));
            None
        }
    };
    let details = details(obj, &mut issues);
    if issues.is_empty() {
        Ok(ProductPatch {
            title,
            price,
            details,
        })
    } else {
        Err(issues_to_error(&issues))
    }
}

impl FieldIssue {
    fn with_kind(mut self, kind: IssueKind) -> Self {
        self.kind = kind;
        self
    }
}

fn details(obj: &Map<String, Value>, issues: &mut Vec<FieldIssue>) -> ProductDetails {
    let sale_price = keep(issues, decimal(obj, "sale_price", &["sale_price", "salePrice"]));
    let description = keep(issues, text(obj, &["description"]));
    let short_description = keep(issues, text(obj, &["short_description", "shortDescription"]));
    let stock = keep(issues, stock(obj));
    let backorders = keep(issues, backorders(obj));
    let category = keep(issues, text(obj, &["category"]));
    let tags = keep(issues, string_list(obj, "tags", &["tags"], true)).unwrap_or_default();
    let size = keep(issues, string_list(obj, "size", &["size"], false)).unwrap_or_default();
    let color = keep(issues, string_list(obj, "color", &["color"], false)).unwrap_or_default();
    let other = keep(issues, named_attributes(obj)).unwrap_or_default();
    let image = keep(issues, image(obj));
    let sku = keep(issues, text(obj, &["sku"]));
    let weight = keep(issues, text(obj, &["weight"]));
    let length = keep(issues, text(obj, &["length"]));
    let width = keep(issues, text(obj, &["width"]));
    let height = keep(issues, text(obj, &["height"]));
    let is_virtual = keep(issues, flag(obj, "virtual"));
    let downloadable = keep(issues, flag(obj, "downloadable"));
    let shipping_class = keep(issues, text(obj, &["shipping_class", "shippingClass"]));
    let submitter_email = keep(issues, email(obj));

    ProductDetails {
        sale_price,
        description,
        short_description,
        stock,
        backorders,
        category,
        tags,
        attributes: Attributes { size, color, other },
        image,
        sku,
        weight,
        length,
        width,
        height,
        is_virtual,
        downloadable,
        shipping_class,
        submitter_email,
    }
}

fn keep<T>(issues: &mut Vec<FieldIssue>, result: Result<Option<T>, FieldIssue>) -> Option<T> {
    result.unwrap_or_else(|issue| {
        issues.push(issue);
        None
    })
}

fn lookup<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}

fn field_name(keys: &[&'static str]) -> &'static str {
    keys.first().copied().unwrap_or("field")
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn text(obj: &Map<String, Value>, keys: &[&'static str]) -> Result<Option<String>, FieldIssue> {
    match lookup(obj, keys) {
        None | Some(Value::Null) => Ok(None),
        Some(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
            Ok(scalar_text(value))
        }
        Some(_) => {
            let field = field_name(keys);
            Err(FieldIssue::malformed(field, format!("{field} must be text")))
        }
    }
}

pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let raw = raw.trim();
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .ok()
}

fn decimal(
    obj: &Map<String, Value>,
    field: &'static str,
    keys: &[&str],
) -> Result<Option<Decimal>, FieldIssue> {
    let raw = match lookup(obj, keys) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => String::new(),
    };
    parse_decimal(&raw)
        .map(Some)
        .ok_or_else(|| FieldIssue::malformed(field, format!("{field} must be a number")))
}

fn stock(obj: &Map<String, Value>) -> Result<Option<i64>, FieldIssue> {
    let malformed = || FieldIssue::malformed("stock", "stock must be an integer");
    match obj.get("stock") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse::<i64>().map(Some).map_err(|_| malformed()),
        Some(Value::Number(n)) => {
            if let Some(v) = n.as_i64() {
                Ok(Some(v))
            } else {
                match n.as_f64() {
                    Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                        Ok(Some(v as i64))
                    }
                    _ => Err(malformed()),
                }
            }
        }
        Some(_) => Err(malformed()),
    }
}

fn backorders(obj: &Map<String, Value>) -> Result<Option<BackorderPolicy>, FieldIssue> {
    match text(obj, &["backorders", "backorder_policy"])? {
        None => Ok(None),
        Some(raw) => BackorderPolicy::parse(&raw).map(Some).ok_or_else(|| {
            FieldIssue::malformed("backorders", "backorders must be one of no, notify, yes")
        }),
    }
}

fn string_list(
    obj: &Map<String, Value>,
    field: &'static str,
    keys: &[&str],
    split_commas: bool,
) -> Result<Option<Vec<String>>, FieldIssue> {
    let values = match lookup(obj, keys) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if split_commas => s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Null => {}
                    other => match scalar_text(other) {
                        Some(value) => values.push(value),
                        None if other.is_string() => {}
                        None => {
                            return Err(FieldIssue::malformed(
                                field,
                                format!("{field} must be a list of text values"),
                            ));
                        }
                    },
                }
            }
            values
        }
        Some(value) => match scalar_text(value) {
            Some(value) => vec![value],
            None if value.is_string() => Vec::new(),
            None => {
                return Err(FieldIssue::malformed(
                    field,
                    format!("{field} must be text or a list of text values"),
                ));
            }
        },
    };
    Ok(Some(values))
}

fn named_attributes(obj: &Map<String, Value>) -> Result<Option<Vec<NamedAttribute>>, FieldIssue> {
    let malformed = |message: &str| FieldIssue::malformed("attributes", message);
    let parsed;
    let items = match obj.get("attributes") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        // Spreadsheet cells and form fields carry the list as JSON text.
        Some(Value::String(s)) => {
            parsed = serde_json::from_str::<Value>(s)
                .map_err(|_| malformed("attributes must be a list of {name, value} objects"))?;
            match &parsed {
                Value::Array(items) => items,
                _ => return Err(malformed("attributes must be a list of {name, value} objects")),
            }
        }
        Some(Value::Array(items)) => items,
        Some(_) => return Err(malformed("attributes must be a list of {name, value} objects")),
    };

    let mut attributes = Vec::new();
    for item in items {
        let Some(entry) = item.as_object() else {
            return Err(malformed("attributes must be a list of {name, value} objects"));
        };
        let name = entry.get("name").and_then(scalar_text);
        let values = string_list(entry, "attributes", &["value", "values"], false)?;
        let (Some(name), Some(values)) = (name, values) else {
            continue;
        };
        if values.is_empty() {
            continue;
        }
        if slugify(&name).is_empty() {
            return Err(malformed(&format!(
                "attribute name `{name}` has no usable characters"
            )));
        }
        attributes.push(NamedAttribute { name, values });
    }
    Ok(Some(attributes))
}

fn image(obj: &Map<String, Value>) -> Result<Option<ImageSource>, FieldIssue> {
    if let Some(Value::Object(upload)) = obj.get("image") {
        let encoded = upload
            .get("data")
            .or_else(|| upload.get("bytes"))
            .and_then(Value::as_str)
            .ok_or_else(|| FieldIssue::malformed("image", "image.data must be base64 text"))?;
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|_| FieldIssue::malformed("image", "image.data is not valid base64"))?;
        let filename = upload
            .get("filename")
            .and_then(scalar_text)
            .unwrap_or_else(|| "upload".to_string());
        return Ok(Some(ImageSource::Upload { bytes, filename }));
    }
    Ok(text(obj, &["image_url", "imageUrl"])?.map(ImageSource::Url))
}

fn flag(obj: &Map<String, Value>, field: &'static str) -> Result<Option<bool>, FieldIssue> {
    let malformed = || FieldIssue::malformed(field, format!("{field} must be true or false"));
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(0) => Ok(Some(false)),
            Some(1) => Ok(Some(true)),
            _ => Err(malformed()),
        },
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "true" | "yes" | "1" | "on" => Ok(Some(true)),
            "false" | "no" | "0" | "off" => Ok(Some(false)),
            _ => Err(malformed()),
        },
        Some(_) => Err(malformed()),
    }
}

fn email(obj: &Map<String, Value>) -> Result<Option<String>, FieldIssue> {
    match text(obj, &["user_email", "userEmail"])? {
        None => Ok(None),
        Some(email) if email.contains('@') && !email.contains(char::is_whitespace) => {
            Ok(Some(email))
        }
        Some(_) => Err(FieldIssue::malformed(
            "user_email",
            "user_email is not a valid address",
        )),
    }
}

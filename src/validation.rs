//! Input validation module
//!
//! Oracle Health rejects many parameter combinations that plain FHIR allows,
//! so searches are checked here before they are forwarded. Each resource type
//! has a rule table naming its supported parameters, the anchor parameters
//! of which at least one is required, and parameters that only work next to
//! certain companions.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::fhir::ResourceType;

/// Search constraints for one resource type
#[derive(Debug)]
pub struct SearchRules {
    /// Every parameter the tenant accepts
    pub allowed: &'static [&'static str],
    /// At least one of these must be present
    pub anchors: &'static [&'static str],
    /// `(param, companions)`: `param` needs at least one of `companions`
    pub dependencies: &'static [(&'static str, &'static [&'static str])],
    /// Parameters holding FHIR dates; only these may repeat
    pub date_params: &'static [&'static str],
}

static PATIENT_RULES: SearchRules = SearchRules {
    allowed: &[
        "_id",
        "identifier",
        "name",
        "family",
        "given",
        "birthdate",
        "phone",
        "email",
        "address-postalcode",
        "gender",
        "_count",
    ],
    anchors: &[
        "_id",
        "identifier",
        "name",
        "family",
        "given",
        "birthdate",
        "phone",
        "email",
        "address-postalcode",
    ],
    dependencies: &[
        (
            "gender",
            &[
                "identifier",
                "name",
                "family",
                "given",
                "birthdate",
                "phone",
                "email",
                "address-postalcode",
            ],
        ),
    ],
    date_params: &["birthdate"],
};

static APPOINTMENT_RULES: SearchRules = SearchRules {
    allowed: &[
        "_id",
        "patient",
        "practitioner",
        "location",
        "date",
        "status",
        "service-category",
        "_count",
    ],
    anchors: &["_id", "patient", "practitioner", "location"],
    dependencies: &[
        ("patient", &["date"]),
        ("practitioner", &["date"]),
        ("location", &["date"]),
        ("status", &["patient", "practitioner", "location"]),
        ("service-category", &["patient", "practitioner", "location"]),
    ],
    date_params: &["date"],
};

static PRACTITIONER_RULES: SearchRules = SearchRules {
    allowed: &["_id", "identifier", "name", "family", "given", "active", "_count"],
    anchors: &["_id", "identifier", "name", "family", "given"],
    dependencies: &[("active", &["identifier", "name", "family", "given"])],
    date_params: &[],
};

static ORGANIZATION_RULES: SearchRules = SearchRules {
    allowed: &["_id", "identifier", "name", "address", "type", "active", "_count"],
    anchors: &["_id", "identifier", "name", "address"],
    dependencies: &[
        ("type", &["identifier", "name", "address"]),
        ("active", &["identifier", "name", "address"]),
    ],
    date_params: &[],
};

static LOCATION_RULES: SearchRules = SearchRules {
    allowed: &["_id", "identifier", "-physicalType", "partof", "address", "_count"],
    anchors: &["_id", "identifier", "-physicalType", "address"],
    dependencies: &[("partof", &["-physicalType"])],
    date_params: &[],
};

static ACCOUNT_RULES: SearchRules = SearchRules {
    allowed: &["_id", "identifier", "patient", "type", "_count"],
    anchors: &["_id", "identifier", "patient"],
    dependencies: &[("patient", &["type"])],
    date_params: &[],
};

static ALLERGY_INTOLERANCE_RULES: SearchRules = SearchRules {
    allowed: &["_id", "patient", "clinical-status", "_count"],
    anchors: &["_id", "patient"],
    dependencies: &[("clinical-status", &["patient"])],
    date_params: &[],
};

static DIAGNOSTIC_REPORT_RULES: SearchRules = SearchRules {
    allowed: &[
        "_id",
        "patient",
        "subject",
        "encounter",
        "category",
        "code",
        "date",
        "_lastUpdated",
        "_count",
    ],
    anchors: &["_id", "patient", "subject", "encounter"],
    dependencies: &[
        ("category", &["patient", "subject"]),
        ("code", &["patient", "subject"]),
        ("date", &["patient", "subject"]),
        ("_lastUpdated", &["patient", "subject"]),
    ],
    date_params: &["date", "_lastUpdated"],
};

static MEDICATION_REQUEST_RULES: SearchRules = SearchRules {
    allowed: &[
        "_id",
        "patient",
        "status",
        "intent",
        "_lastUpdated",
        "timing-boundsPeriod",
        "_count",
    ],
    anchors: &["_id", "patient"],
    dependencies: &[
        ("status", &["patient"]),
        ("intent", &["patient"]),
        ("_lastUpdated", &["patient"]),
        ("timing-boundsPeriod", &["patient"]),
    ],
    date_params: &["_lastUpdated", "timing-boundsPeriod"],
};

static MEDICATION_STATEMENT_RULES: SearchRules = SearchRules {
    allowed: &["_id", "patient", "status", "_count"],
    anchors: &["_id", "patient"],
    dependencies: &[("status", &["patient"])],
    date_params: &[],
};

/// Rule table for a resource type
pub fn search_rules(resource_type: ResourceType) -> &'static SearchRules {
    match resource_type {
        ResourceType::Patient => &PATIENT_RULES,
        ResourceType::Appointment => &APPOINTMENT_RULES,
        ResourceType::Practitioner => &PRACTITIONER_RULES,
        ResourceType::Organization => &ORGANIZATION_RULES,
        ResourceType::Location => &LOCATION_RULES,
        ResourceType::Account => &ACCOUNT_RULES,
        ResourceType::AllergyIntolerance => &ALLERGY_INTOLERANCE_RULES,
        ResourceType::DiagnosticReport => &DIAGNOSTIC_REPORT_RULES,
        ResourceType::MedicationRequest => &MEDICATION_REQUEST_RULES,
        ResourceType::MedicationStatement => &MEDICATION_STATEMENT_RULES,
    }
}

/// Page size accepted by the tenant
#[derive(Debug, Validate)]
struct PageSize {
    #[validate(range(min = 1, max = 100, message = "_count must be between 1 and 100"))]
    count: u32,
}

/// FHIR search prefixes accepted on date parameters
const DATE_PREFIXES: [&str; 9] = ["eq", "ne", "gt", "lt", "ge", "le", "sa", "eb", "ap"];

/// Validate search parameters against the resource type's rule table
pub fn validate_search(resource_type: ResourceType, params: &[(String, String)]) -> AppResult<()> {
    let rules = search_rules(resource_type);

    let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, value) in params {
        grouped.entry(name.as_str()).or_default().push(value.as_str());
    }

    let result = check_search(resource_type, rules, &grouped);
    if let Err(AppError::Validation(msg)) = &result {
        warn!(resource_type = %resource_type, error = %msg, "Search validation failed");
    } else {
        debug!(resource_type = %resource_type, "Search validation passed");
    }
    result
}

fn check_search(
    resource_type: ResourceType,
    rules: &SearchRules,
    grouped: &BTreeMap<&str, Vec<&str>>,
) -> AppResult<()> {
    if let Some(name) = grouped.keys().find(|name| !rules.allowed.contains(*name)) {
        return Err(AppError::Validation(format!(
            "Unsupported search parameter '{}' for {}",
            name, resource_type
        )));
    }

    for (name, values) in grouped {
        if values.iter().any(|v| v.trim().is_empty()) {
            return Err(AppError::Validation(format!(
                "Search parameter '{}' must not be empty",
                name
            )));
        }

        let is_date = rules.date_params.contains(name);
        match values.len() {
            1 => {}
            2 if is_date => validate_date_range(name, values[0], values[1])?,
            _ if is_date => {
                return Err(AppError::Validation(format!(
                    "Search parameter '{}' may be given at most twice",
                    name
                )))
            }
            _ => {
                return Err(AppError::Validation(format!(
                    "Search parameter '{}' may only be given once",
                    name
                )))
            }
        }

        if is_date {
            for value in values {
                validate_date_value(name, value)?;
            }
        }
    }

    if grouped.contains_key("_id") {
        if let Some(other) = grouped
            .keys()
            .find(|name| !matches!(**name, "_id" | "_count"))
        {
            return Err(AppError::Validation(format!(
                "'_id' cannot be combined with '{}'",
                other
            )));
        }
    }

    if !rules.anchors.iter().any(|a| grouped.contains_key(a)) {
        return Err(AppError::Validation(format!(
            "{} search requires one of: {}",
            resource_type,
            rules.anchors.join(", ")
        )));
    }

    for (param, companions) in rules.dependencies {
        if grouped.contains_key(param) && !companions.iter().any(|c| grouped.contains_key(c)) {
            return Err(AppError::Validation(format!(
                "'{}' requires one of: {}",
                param,
                companions.join(", ")
            )));
        }
    }

    if let Some(values) = grouped.get("_count") {
        validate_page_size(values[0])?;
    }

    Ok(())
}

fn validate_page_size(raw: &str) -> AppResult<()> {
    let count: u32 = raw
        .parse()
        .map_err(|_| {
            AppError::Validation(format!("_count must be a positive integer, got '{raw}'"))
        })?;

    PageSize { count }.validate().map_err(|errors| {
        let messages: Vec<String> = errors
            .field_errors()
            .values()
            .flat_map(|errs| errs.iter())
            .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .collect();
        AppError::Validation(messages.join("; "))
    })
}

/// Split a leading search prefix (`ge2024-01-01` -> `ge`, `2024-01-01`)
fn split_prefix(value: &str) -> (Option<&str>, &str) {
    match value.get(..2) {
        Some(prefix) if DATE_PREFIXES.contains(&prefix) => (Some(prefix), &value[2..]),
        _ => (None, value),
    }
}

/// `YYYY`, `YYYY-MM`, `YYYY-MM-DD` or an RFC 3339 date-time
fn is_fhir_date(value: &str) -> bool {
    match value.len() {
        4 => value.chars().all(|c| c.is_ascii_digit()),
        7 => NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").is_ok(),
        10 => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        _ => DateTime::parse_from_rfc3339(value).is_ok(),
    }
}

fn validate_date_value(name: &str, value: &str) -> AppResult<()> {
    let (_, date) = split_prefix(value);
    if is_fhir_date(date) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Search parameter '{}' has an invalid date '{}'",
            name, value
        )))
    }
}

/// A repeated date parameter must describe a lower and an upper bound.
fn validate_date_range(name: &str, first: &str, second: &str) -> AppResult<()> {
    let lower = |p: Option<&str>| matches!(p, Some("ge") | Some("gt"));
    let upper = |p: Option<&str>| matches!(p, Some("le") | Some("lt"));

    let (a, _) = split_prefix(first);
    let (b, _) = split_prefix(second);

    if (lower(a) && upper(b)) || (upper(a) && lower(b)) {
        Ok(())
    } else {
        Err(AppError::Validation(format!(
            "Repeated '{}' must give one lower bound (ge/gt) and one upper bound (le/lt)",
            name
        )))
    }
}

/// Validate a logical resource id (`[A-Za-z0-9\-\.]{1,64}`)
pub fn validate_resource_id(id: &str) -> AppResult<()> {
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');

    if valid {
        Ok(())
    } else {
        Err(AppError::Validation(format!("Invalid resource id '{}'", id)))
    }
}

/// Validate a create (`path_id == None`) or update body
pub fn validate_resource_body(
    resource_type: ResourceType,
    body: &Value,
    path_id: Option<&str>,
) -> AppResult<()> {
    let object = body.as_object().ok_or_else(|| {
        AppError::Validation("Request body must be a FHIR resource object".to_string())
    })?;

    match object.get("resourceType").and_then(Value::as_str) {
        Some(found) if found == resource_type.as_str() => {}
        Some(found) => {
            return Err(AppError::Validation(format!(
                "Body resourceType '{}' does not match {}",
                found, resource_type
            )))
        }
        None => {
            return Err(AppError::Validation(
                "Body is missing resourceType".to_string(),
            ))
        }
    }

    if let Some(path_id) = path_id {
        match object.get("id").and_then(Value::as_str) {
            Some(id) if id == path_id => {}
            Some(id) => {
                return Err(AppError::Validation(format!(
                    "Body id '{}' does not match path id '{}'",
                    id, path_id
                )))
            }
            None => {
                return Err(AppError::Validation(
                    "Update body must carry the resource id".to_string(),
                ))
            }
        }
    }

    Ok(())
}

/// Updates must name the version they replace
pub fn validate_if_match(header: Option<&str>) -> AppResult<&str> {
    match header.map(str::trim) {
        Some(version) if !version.is_empty() => Ok(version),
        _ => Err(AppError::Validation(
            "If-Match header with the current resource version is required".to_string(),
        )),
    }
}

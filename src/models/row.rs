//! Flat tabular rows derived from raw patent documents.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::RawRecord;

const NOT_AVAILABLE: &str = "N/A";
const LIST_SEPARATOR: &str = "; ";

/// One patent flattened into scalar columns.
///
/// Field order here is the column order of the output file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    pub title: Option<String>,
    pub r#abstract: Option<String>,
    pub applicants: String,
    pub inventors: String,

    pub application_date: Option<String>,
    pub publication_date: Option<String>,
    pub grant_date: Option<String>,
    pub application_year: String,

    pub publication_number: Option<String>,
    pub application_number: Option<String>,
    pub jurisdiction: Option<String>,
    pub applicant_nationality: String,
    #[serde(rename = "SOURCE_applicant_residence")]
    pub source_applicant_residence: Option<String>,
    #[serde(rename = "SOURCE_priority_country")]
    pub source_priority_country: Option<String>,
    pub main_ipc_field: String,
    pub ipc_classifications: String,
    pub cpc_classifications: String,
    pub lens_id: Option<String>,

    pub is_granted: Option<bool>,
    pub patent_status: Option<String>,
    pub cited_by_patent_count: u64,
    pub citation_patent_count: u64,
    pub citation_npl_count: u64,
    pub total_citations: u64,
    pub citations_per_year: f64,
    pub science_linkage_ratio: f64,
    pub time_to_grant_days: Option<i64>,
    pub num_applicants: usize,
    pub is_co_owned: bool,
    pub simple_family_size: Option<u64>,

    /// Full source document, kept for audit
    pub raw_json: Option<String>,
}

impl FlatRow {
    /// Column names in output order
    pub const COLUMNS: &'static [&'static str] = &[
        "title",
        "abstract",
        "applicants",
        "inventors",
        "application_date",
        "publication_date",
        "grant_date",
        "application_year",
        "publication_number",
        "application_number",
        "jurisdiction",
        "applicant_nationality",
        "SOURCE_applicant_residence",
        "SOURCE_priority_country",
        "main_ipc_field",
        "ipc_classifications",
        "cpc_classifications",
        "lens_id",
        "is_granted",
        "patent_status",
        "cited_by_patent_count",
        "citation_patent_count",
        "citation_npl_count",
        "total_citations",
        "citations_per_year",
        "science_linkage_ratio",
        "time_to_grant_days",
        "num_applicants",
        "is_co_owned",
        "simple_family_size",
        "raw_json",
    ];

    /// Flatten a record using the current calendar year for time-based metrics
    pub fn from_record(record: &RawRecord) -> Self {
        Self::from_record_in_year(record, chrono::Local::now().year())
    }

    /// Flatten a record as of `current_year`.
    ///
    /// Never fails: every missing or malformed field has a fallback.
    pub fn from_record_in_year(record: &RawRecord, current_year: i32) -> Self {
        let applicants = record.array_at("/biblio/parties/applicants");
        let inventors = record.array_at("/biblio/parties/inventors");
        let ipc = record.array_at("/biblio/classifications_ipcr/classifications");
        let cpc = record.array_at("/biblio/classifications_cpc/classifications");
        let priority_claims = record.array_at("/biblio/priority_claims/claims");

        let application_date = owned(record.str_at("/biblio/application_reference/date"));
        let publication_date = owned(record.str_at("/date_published"));
        let grant_date = owned(record.str_at("/legal_status/grant_date"));

        let applicant_residence = applicants
            .first()
            .and_then(|a| a.get("residence"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let priority_country = priority_claims
            .first()
            .and_then(|c| c.get("jurisdiction"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let applicant_nationality = applicant_residence
            .clone()
            .filter(|s| !s.is_empty())
            .or_else(|| priority_country.clone().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let application_year = application_date
            .as_deref()
            .filter(|d| !d.is_empty())
            .map(|d| prefix(d, 4))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let main_ipc_field = ipc
            .first()
            .and_then(|c| c.get("symbol"))
            .and_then(Value::as_str)
            .map(|s| prefix(s, 4))
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let num_applicants = applicants.len();

        let time_to_grant_days = match (grant_date.as_deref(), application_date.as_deref()) {
            (Some(grant), Some(application)) => days_between(application, grant),
            _ => None,
        };

        let cited_by_patent_count = record.u64_at("/biblio/cited_by/patent_count").unwrap_or(0);
        let citations_per_year = publication_date
            .as_deref()
            .filter(|_| cited_by_patent_count > 0)
            .and_then(|d| d.get(..4))
            .and_then(|y| y.parse::<i32>().ok())
            .map(|year| i64::from(current_year) - i64::from(year) + 1)
            .filter(|span| *span > 0)
            .map(|span| round2(cited_by_patent_count as f64 / span as f64))
            .unwrap_or(0.0);

        let citation_patent_count = record
            .u64_at("/biblio/references_cited/patent_count")
            .unwrap_or(0);
        let citation_npl_count = record
            .u64_at("/biblio/references_cited/npl_count")
            .unwrap_or(0);
        let total_citations = citation_patent_count.saturating_add(citation_npl_count);
        let science_linkage_ratio = if total_citations > 0 {
            round2(citation_npl_count as f64 / (citation_patent_count as f64 + citation_npl_count as f64))
        } else {
            0.0
        };

        FlatRow {
            title: first_text(record, "/biblio/invention_title"),
            r#abstract: first_text(record, "/abstract"),
            applicants: join_names(applicants),
            inventors: join_names(inventors),
            application_date,
            publication_date,
            grant_date,
            application_year,
            publication_number: owned(record.str_at("/doc_number")),
            application_number: owned(record.str_at("/biblio/application_reference/doc_number")),
            jurisdiction: owned(record.str_at("/jurisdiction")),
            applicant_nationality,
            source_applicant_residence: applicant_residence,
            source_priority_country: priority_country,
            main_ipc_field,
            ipc_classifications: join_symbols(ipc),
            cpc_classifications: join_symbols(cpc),
            lens_id: owned(record.str_at("/lens_id")),
            is_granted: record.bool_at("/legal_status/granted"),
            patent_status: owned(record.str_at("/legal_status/patent_status")),
            cited_by_patent_count,
            citation_patent_count,
            citation_npl_count,
            total_citations,
            citations_per_year,
            science_linkage_ratio,
            time_to_grant_days,
            num_applicants,
            is_co_owned: num_applicants > 1,
            simple_family_size: record.u64_at("/families/simple_family/size"),
            raw_json: Some(record.to_json_string()),
        }
    }

    /// Drop the raw document column value
    pub fn without_raw_json(mut self) -> Self {
        self.raw_json = None;
        self
    }
}

fn owned(value: Option<&str>) -> Option<String> {
    value.map(str::to_string)
}

/// First `n` characters, or the whole string when shorter
fn prefix(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn days_between(start: &str, end: &str) -> Option<i64> {
    let start = NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?;
    Some((end - start).num_days())
}

/// `text` of the first element of the array at `pointer`
fn first_text(record: &RawRecord, pointer: &str) -> Option<String> {
    record
        .array_at(pointer)
        .first()
        .and_then(|item| item.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn join_names(parties: &[Value]) -> String {
    parties
        .iter()
        .map(|p| {
            p.pointer("/extracted_name/value")
                .and_then(Value::as_str)
                .unwrap_or("")
        })
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

fn join_symbols(classifications: &[Value]) -> String {
    classifications
        .iter()
        .filter_map(|c| c.get("symbol").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(LIST_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_record() -> RawRecord {
        RawRecord::new(json!({
            "lens_id": "123-456-789",
            "jurisdiction": "US",
            "doc_number": "11223344",
            "date_published": "2019-06-04",
            "abstract": [{ "text": "A solid electrolyte.", "lang": "en" }],
            "biblio": {
                "invention_title": [{ "text": "Battery cell", "lang": "en" }],
                "application_reference": { "doc_number": "16/123456", "date": "2017-03-01" },
                "parties": {
                    "applicants": [
                        { "residence": "KR", "extracted_name": { "value": "SAMSUNG SDI CO LTD" } },
                        { "residence": "US", "extracted_name": { "value": "ACME CORP" } }
                    ],
                    "inventors": [
                        { "extracted_name": { "value": "KIM MINJI" } }
                    ]
                },
                "classifications_ipcr": { "classifications": [
                    { "symbol": "H01M10/0562" }, { "symbol": "H01M10/052" }
                ] },
                "classifications_cpc": { "classifications": [ { "symbol": "Y02E60/10" } ] },
                "priority_claims": { "claims": [ { "jurisdiction": "JP" } ] },
                "references_cited": { "patent_count": 6, "npl_count": 2 },
                "cited_by": { "patent_count": 10 }
            },
            "legal_status": { "granted": true, "grant_date": "2019-06-04", "patent_status": "ACTIVE" },
            "families": { "simple_family": { "size": 3 } }
        }))
    }

    #[test]
    fn test_flatten_full_record() {
        let row = FlatRow::from_record_in_year(&sample_record(), 2023);

        assert_eq!(row.title.as_deref(), Some("Battery cell"));
        assert_eq!(row.r#abstract.as_deref(), Some("A solid electrolyte."));
        assert_eq!(row.applicants, "SAMSUNG SDI CO LTD; ACME CORP");
        assert_eq!(row.inventors, "KIM MINJI");
        assert_eq!(row.application_year, "2017");
        assert_eq!(row.applicant_nationality, "KR");
        assert_eq!(row.source_priority_country.as_deref(), Some("JP"));
        assert_eq!(row.main_ipc_field, "H01M");
        assert_eq!(row.ipc_classifications, "H01M10/0562; H01M10/052");
        assert_eq!(row.cpc_classifications, "Y02E60/10");
        assert_eq!(row.num_applicants, 2);
        assert!(row.is_co_owned);
        assert_eq!(row.is_granted, Some(true));
        assert_eq!(row.total_citations, 8);
        assert_eq!(row.science_linkage_ratio, 0.25);
        assert_eq!(row.time_to_grant_days, Some(825));
        assert_eq!(row.simple_family_size, Some(3));
        // 10 / (2023 - 2019 + 1)
        assert_eq!(row.citations_per_year, 2.0);
    }

    #[test]
    fn test_citations_per_year_relative_to_current_year() {
        let current_year = chrono::Local::now().year();
        let record = RawRecord::new(json!({
            "date_published": format!("{}-01-15", current_year - 4),
            "biblio": { "cited_by": { "patent_count": 10 } }
        }));

        let row = FlatRow::from_record(&record);
        assert_eq!(row.citations_per_year, 2.0);
    }

    #[test]
    fn test_empty_record_uses_fallbacks() {
        let row = FlatRow::from_record_in_year(&RawRecord::new(json!({})), 2024);

        assert_eq!(row.title, None);
        assert_eq!(row.r#abstract, None);
        assert_eq!(row.applicants, "");
        assert_eq!(row.inventors, "");
        assert_eq!(row.application_year, "N/A");
        assert_eq!(row.applicant_nationality, "N/A");
        assert_eq!(row.main_ipc_field, "N/A");
        assert_eq!(row.ipc_classifications, "");
        assert_eq!(row.num_applicants, 0);
        assert!(!row.is_co_owned);
        assert_eq!(row.time_to_grant_days, None);
        assert_eq!(row.cited_by_patent_count, 0);
        assert_eq!(row.citations_per_year, 0.0);
        assert_eq!(row.science_linkage_ratio, 0.0);
        assert_eq!(row.simple_family_size, None);
        assert_eq!(row.is_granted, None);
        assert_eq!(row.raw_json.as_deref(), Some("{}"));
    }

    #[test]
    fn test_nationality_falls_back_to_priority_claim() {
        let record = RawRecord::new(json!({
            "biblio": {
                "parties": { "applicants": [ { "extracted_name": { "value": "SOLO INC" } } ] },
                "priority_claims": { "claims": [ { "jurisdiction": "DE" } ] }
            }
        }));
        let row = FlatRow::from_record_in_year(&record, 2024);

        assert_eq!(row.applicant_nationality, "DE");
        assert_eq!(row.source_applicant_residence, None);
        assert!(!row.is_co_owned);
    }

    #[test]
    fn test_unparseable_dates_leave_grant_latency_absent() {
        let record = RawRecord::new(json!({
            "date_published": "unknown",
            "biblio": {
                "application_reference": { "date": "2017" },
                "cited_by": { "patent_count": 5 }
            },
            "legal_status": { "grant_date": "2019-06-04" }
        }));
        let row = FlatRow::from_record_in_year(&record, 2024);

        assert_eq!(row.time_to_grant_days, None);
        assert_eq!(row.application_year, "2017");
        assert_eq!(row.citations_per_year, 0.0);
    }

    #[test]
    fn test_future_publication_year_does_not_divide_by_zero() {
        let record = RawRecord::new(json!({
            "date_published": "2031-01-01",
            "biblio": { "cited_by": { "patent_count": 5 } }
        }));
        let row = FlatRow::from_record_in_year(&record, 2024);
        assert_eq!(row.citations_per_year, 0.0);
    }

    #[test]
    fn test_ratios_are_rounded() {
        let record = RawRecord::new(json!({
            "date_published": "2022-01-01",
            "biblio": {
                "cited_by": { "patent_count": 7 },
                "references_cited": { "patent_count": 2, "npl_count": 1 }
            }
        }));
        let row = FlatRow::from_record_in_year(&record, 2024);

        assert_eq!(row.citations_per_year, 2.33);
        assert_eq!(row.science_linkage_ratio, 0.33);
    }

    #[test]
    fn test_huge_citation_counts_do_not_overflow() {
        let record = RawRecord::new(json!({
            "biblio": {
                "references_cited": { "patent_count": u64::MAX, "npl_count": 1 }
            }
        }));
        let row = FlatRow::from_record_in_year(&record, 2024);

        assert_eq!(row.citation_patent_count, u64::MAX);
        assert_eq!(row.total_citations, u64::MAX);
        assert_eq!(row.science_linkage_ratio, 0.0);

        let record = RawRecord::new(json!({
            "biblio": {
                "references_cited": { "patent_count": u64::MAX, "npl_count": u64::MAX }
            }
        }));
        let row = FlatRow::from_record_in_year(&record, 2024);
        assert_eq!(row.total_citations, u64::MAX);
        assert_eq!(row.science_linkage_ratio, 0.5);
    }

    #[test]
    fn test_source_columns_keep_upper_case_prefix() {
        let row = FlatRow::from_record_in_year(&sample_record(), 2023);
        let value = serde_json::to_value(&row).unwrap();

        assert_eq!(value["SOURCE_applicant_residence"], json!("KR"));
        assert_eq!(value["SOURCE_priority_country"], json!("JP"));
        assert!(value.get("source_priority_country").is_none());
    }

    #[test]
    fn test_columns_match_serialized_field_order() {
        let row = FlatRow::from_record_in_year(&sample_record(), 2023);
        let value = serde_json::to_value(&row).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();

        // serde_json maps are sorted unless preserve_order is on, so compare as sets
        let mut expected: Vec<_> = FlatRow::COLUMNS.iter().map(|c| c.to_string()).collect();
        let mut actual = keys;
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);
    }
}

//! Search filters and the structured query sent to the patent search API.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Fields that free-text search can be scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchField {
    Title,
    Abstract,
    Claim,
}

impl SearchField {
    /// Field name as understood by the remote API
    pub fn api_name(&self) -> &'static str {
        match self {
            SearchField::Title => "title",
            SearchField::Abstract => "abstract",
            SearchField::Claim => "claim",
        }
    }
}

/// Which date a year range applies to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateType {
    #[default]
    Application,
    Grant,
}

impl DateType {
    fn api_field(&self) -> &'static str {
        match self {
            DateType::Application => "application_reference.date",
            DateType::Grant => "legal_status.grant_date",
        }
    }
}

/// Legal status filter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Granted,
}

/// How the filters are interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Simple,
    /// Pass `raw_expression` through verbatim
    Raw,
}

/// User-facing filter fields collected by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(default)]
    pub mode: QueryMode,

    /// Free text; double-quoted segments are kept together as phrases
    #[serde(default)]
    pub text: String,

    /// Fields the free text is matched against
    #[serde(default = "default_search_fields")]
    pub search_fields: Vec<SearchField>,

    #[serde(default)]
    pub applicant: String,

    /// Space-separated IPC/CPC codes
    #[serde(default)]
    pub classification: String,

    #[serde(default)]
    pub date_type: DateType,

    #[serde(default)]
    pub start_year: String,

    #[serde(default)]
    pub end_year: String,

    #[serde(default)]
    pub status: StatusFilter,

    /// Query expression used in [`QueryMode::Raw`]
    #[serde(default)]
    pub raw_expression: String,
}

fn default_search_fields() -> Vec<SearchField> {
    vec![SearchField::Title, SearchField::Abstract]
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            mode: QueryMode::Simple,
            text: String::new(),
            search_fields: default_search_fields(),
            applicant: String::new(),
            classification: String::new(),
            date_type: DateType::Application,
            start_year: String::new(),
            end_year: String::new(),
            status: StatusFilter::All,
            raw_expression: String::new(),
        }
    }
}

impl SearchFilters {
    /// Create empty filters (resolves to `match_all`)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create filters for a raw query expression
    pub fn raw(expression: impl Into<String>) -> Self {
        Self {
            mode: QueryMode::Raw,
            raw_expression: expression.into(),
            ..Default::default()
        }
    }

    /// Set the free text
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the fields the free text applies to
    pub fn search_fields(mut self, fields: Vec<SearchField>) -> Self {
        self.search_fields = fields;
        self
    }

    /// Set the applicant name
    pub fn applicant(mut self, applicant: impl Into<String>) -> Self {
        self.applicant = applicant.into();
        self
    }

    /// Set classification codes
    pub fn classification(mut self, codes: impl Into<String>) -> Self {
        self.classification = codes.into();
        self
    }

    /// Set a year range on the given date
    pub fn years(
        mut self,
        date_type: DateType,
        start: impl Into<String>,
        end: impl Into<String>,
    ) -> Self {
        self.date_type = date_type;
        self.start_year = start.into();
        self.end_year = end.into();
        self
    }

    /// Restrict to granted patents
    pub fn granted_only(mut self) -> Self {
        self.status = StatusFilter::Granted;
        self
    }

    /// Translate the filters into the structured query.
    ///
    /// Never yields an empty conjunction: with no usable filter the result is
    /// `match_all`.
    pub fn build(&self) -> SearchQuery {
        if self.mode == QueryMode::Raw {
            let expression = self.raw_expression.trim();
            if !expression.is_empty() {
                return SearchQuery(Clause::QueryString {
                    query: expression.to_string(),
                    fields: Vec::new(),
                });
            }
        }

        let mut must = Vec::new();

        let text = self.text.trim();
        if !text.is_empty() && !self.search_fields.is_empty() {
            if let Some(expression) = join_terms(tokenize(text)) {
                must.push(Clause::QueryString {
                    query: format!("({})", expression),
                    fields: self
                        .search_fields
                        .iter()
                        .map(|f| f.api_name().to_string())
                        .collect(),
                });
            }
        }

        let applicant = self.applicant.trim();
        if !applicant.is_empty() {
            must.push(Clause::Match {
                field: "applicant.name".to_string(),
                value: applicant.to_string(),
            });
        }

        let codes = self
            .classification
            .to_uppercase()
            .split_whitespace()
            .map(str::to_string)
            .collect::<Vec<_>>();
        if !codes.is_empty() {
            must.push(Clause::QueryString {
                query: format!("({})", codes.join(" OR ")),
                fields: vec![
                    "class_cpc.symbol".to_string(),
                    "class_ipcr.symbol".to_string(),
                ],
            });
        }

        let gte = valid_year(&self.start_year).map(|y| format!("{}-01-01", y));
        let lte = valid_year(&self.end_year).map(|y| format!("{}-12-31", y));
        if gte.is_some() || lte.is_some() {
            must.push(Clause::Range {
                field: self.date_type.api_field().to_string(),
                gte,
                lte,
            });
        }

        if self.status == StatusFilter::Granted {
            must.push(Clause::Term {
                field: "legal_status.granted".to_string(),
                value: Value::Bool(true),
            });
        }

        if must.is_empty() {
            SearchQuery(Clause::MatchAll)
        } else {
            SearchQuery(Clause::Bool { must })
        }
    }
}

/// Year bounds are only used when they are plain non-negative integers.
fn valid_year(year: &str) -> Option<&str> {
    let year = year.trim();
    if !year.is_empty() && year.bytes().all(|b| b.is_ascii_digit()) {
        Some(year)
    } else {
        if !year.is_empty() {
            tracing::debug!("Ignoring non-numeric year bound {:?}", year);
        }
        None
    }
}

/// A free-text token; quoted tokens are never read as operators
#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    text: String,
    quoted: bool,
}

impl Token {
    fn word(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: false,
        }
    }

    fn phrase(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quoted: true,
        }
    }

    fn operator(&self) -> Option<&'static str> {
        if self.quoted {
            return None;
        }
        match self.text.as_str() {
            "AND" => Some("AND"),
            "OR" => Some("OR"),
            "NOT" => Some("NOT"),
            _ => None,
        }
    }

    fn render(&self) -> String {
        if self.quoted {
            format!("\"{}\"", self.text)
        } else {
            self.text.clone()
        }
    }
}

/// Split on whitespace, keeping double-quoted segments as single tokens.
fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in text.chars() {
        match c {
            '"' => {
                if in_quotes {
                    let phrase = current.trim();
                    if !phrase.is_empty() {
                        tokens.push(Token::phrase(phrase));
                    }
                    current.clear();
                } else if !current.is_empty() {
                    tokens.push(Token::word(std::mem::take(&mut current)));
                }
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(Token::word(std::mem::take(&mut current)));
                }
            }
            c => current.push(c),
        }
    }

    // An unterminated quote keeps whatever followed it as one token
    let rest = current.trim();
    if !rest.is_empty() {
        if in_quotes {
            tokens.push(Token::phrase(rest));
        } else {
            tokens.push(Token::word(rest));
        }
    }

    tokens
}

/// Join terms into one boolean expression.
///
/// Adjacent terms are OR-ed. Bare `AND`/`OR` between two terms replace that
/// connector and `NOT` negates the following term (joined with `AND` unless an
/// explicit operator precedes it). Operators with no term on one side are dropped.
/// Returns `None` when no term remains.
fn join_terms(tokens: Vec<Token>) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut connector: Option<&'static str> = None;
    let mut negate = false;

    for token in &tokens {
        match token.operator() {
            Some("NOT") => negate = true,
            Some(op) => connector = Some(op),
            None => {
                if !parts.is_empty() {
                    let op = connector.unwrap_or(if negate { "AND" } else { "OR" });
                    parts.push(op.to_string());
                }
                if negate {
                    parts.push(format!("NOT {}", token.render()));
                } else {
                    parts.push(token.render());
                }
                connector = None;
                negate = false;
            }
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// One node of the boolean query tree
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    MatchAll,
    QueryString { query: String, fields: Vec<String> },
    Match { field: String, value: String },
    Term { field: String, value: Value },
    Range {
        field: String,
        gte: Option<String>,
        lte: Option<String>,
    },
    Bool { must: Vec<Clause> },
}

impl Clause {
    /// Render the clause in the API's JSON query DSL
    pub fn to_json(&self) -> Value {
        match self {
            Clause::MatchAll => json!({ "match_all": {} }),
            Clause::QueryString { query, fields } => {
                let mut body = Map::new();
                body.insert("query".to_string(), Value::String(query.clone()));
                if !fields.is_empty() {
                    body.insert("fields".to_string(), json!(fields));
                }
                json!({ "query_string": body })
            }
            Clause::Match { field, value } => json!({ "match": { field: value } }),
            Clause::Term { field, value } => json!({ "term": { field: value } }),
            Clause::Range { field, gte, lte } => {
                let mut bounds = Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".to_string(), Value::String(gte.clone()));
                }
                if let Some(lte) = lte {
                    bounds.insert("lte".to_string(), Value::String(lte.clone()));
                }
                json!({ "range": { field: bounds } })
            }
            Clause::Bool { must } => {
                let must = must.iter().map(Clause::to_json).collect::<Vec<_>>();
                json!({ "bool": { "must": must } })
            }
        }
    }
}

/// Immutable query built from [`SearchFilters`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery(Clause);

impl SearchQuery {
    /// The root clause
    pub fn root(&self) -> &Clause {
        &self.0
    }

    /// Render the query in the API's JSON query DSL
    pub fn to_json(&self) -> Value {
        self.0.to_json()
    }
}

impl Serialize for SearchQuery {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<&SearchFilters> for SearchQuery {
    fn from(filters: &SearchFilters) -> Self {
        filters.build()
    }
}

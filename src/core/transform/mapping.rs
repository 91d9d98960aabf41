//! Declarative mapping rules
//!
//! A [`RowMapping`] describes a 1:1 source row to target record mapping; an
//! [`AttributeMapping`] describes the EAV fan-out of one wide source row into
//! one record per non-null attribute column. Both are plain data, validated
//! against the source projection and target columns before a job starts.

use super::{ConceptPrecedence, TransformContext};
use crate::adapters::store::SourceQuery;
use crate::core::concept::ConceptDomain;
use crate::domain::{ConceptId, EtlError, Result, Row, Value};
use std::collections::{BTreeSet, HashSet};

/// Where a lookup takes its source code from
#[derive(Debug, Clone, PartialEq)]
pub enum CodeSource {
    /// The attribute's source-value label (EAV only)
    Label,
    /// A source column
    Column(String),
    /// A fixed code
    Literal(String),
}

/// Lookup half of a [`ConceptRule`]
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRule {
    pub domain: ConceptDomain,
    pub code: CodeSource,
}

/// How a concept id is produced: a constant, a lookup, or both
///
/// With both present, [`ConceptPrecedence`] decides which one wins. When
/// neither yields a value the concept is [`ConceptId::UNMAPPED`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConceptRule {
    pub constant: Option<ConceptId>,
    pub lookup: Option<LookupRule>,
}

impl ConceptRule {
    pub fn constant(id: i64) -> Self {
        Self {
            constant: Some(ConceptId::new(id)),
            lookup: None,
        }
    }

    pub fn lookup(domain: ConceptDomain, code: CodeSource) -> Self {
        Self {
            constant: None,
            lookup: Some(LookupRule { domain, code }),
        }
    }

    /// Adds a lookup alongside the constant
    pub fn or_lookup(mut self, domain: ConceptDomain, code: CodeSource) -> Self {
        self.lookup = Some(LookupRule { domain, code });
        self
    }

    /// Resolves the concept for one record
    pub fn resolve(&self, row: &Row, label: Option<&str>, ctx: &TransformContext<'_>) -> ConceptId {
        let looked_up = || {
            let lookup = self.lookup.as_ref()?;
            let code = match &lookup.code {
                CodeSource::Label => label.map(str::to_string),
                CodeSource::Column(c) => row.get(c).as_text(),
                CodeSource::Literal(code) => Some(code.clone()),
            }?;
            ctx.lookups.get(lookup.domain, &code)
        };

        let resolved = match ctx.precedence {
            ConceptPrecedence::HardcodedFirst => self.constant.or_else(looked_up),
            ConceptPrecedence::LookupFirst => looked_up().or(self.constant),
        };
        resolved.unwrap_or(ConceptId::UNMAPPED)
    }

    fn source_column(&self) -> Option<&str> {
        match self.lookup.as_ref().map(|l| &l.code) {
            Some(CodeSource::Column(c)) => Some(c.as_str()),
            _ => None,
        }
    }

    fn uses_label(&self) -> bool {
        matches!(
            self.lookup,
            Some(LookupRule {
                code: CodeSource::Label,
                ..
            })
        )
    }
}

/// Value of one target field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRule {
    /// Copy a source column
    Column(String),
    /// Date part of a date or timestamp column
    DateOf(String),
    /// Fixed value
    Constant(Value),
    /// `person_id` resolved from the mapping's subject column
    Person,
    /// `visit_occurrence_id` resolved from the mapping's visit column
    Visit,
    /// Concept id
    Concept(ConceptRule),
    /// Numeric reading of the attribute cell, NULL when not numeric (EAV only)
    AttributeNumber,
    /// Text of the attribute cell (EAV only)
    AttributeText,
    /// The attribute's source-value label (EAV only)
    AttributeLabel,
    /// The attribute's concept (EAV only)
    AttributeConcept,
    /// Date of the attribute's event column (EAV only)
    EventDate,
    /// Timestamp of the attribute's event column (EAV only)
    EventDateTime,
}

impl FieldRule {
    fn is_attribute_only(&self) -> bool {
        matches!(
            self,
            FieldRule::AttributeNumber
                | FieldRule::AttributeText
                | FieldRule::AttributeLabel
                | FieldRule::AttributeConcept
                | FieldRule::EventDate
                | FieldRule::EventDateTime
        ) || matches!(self, FieldRule::Concept(rule) if rule.uses_label())
    }

    fn source_column(&self) -> Option<&str> {
        match self {
            FieldRule::Column(c) | FieldRule::DateOf(c) => Some(c.as_str()),
            FieldRule::Concept(rule) => rule.source_column(),
            _ => None,
        }
    }

    fn domain(&self) -> Option<ConceptDomain> {
        match self {
            FieldRule::Concept(rule) => rule.lookup.as_ref().map(|l| l.domain),
            _ => None,
        }
    }
}

/// Where an attribute's source-value label comes from
#[derive(Debug, Clone, PartialEq)]
pub enum LabelSource {
    Static(String),
    Column(String),
}

/// One attribute column of an EAV source
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeRule {
    /// Column holding the attribute value
    pub column: String,
    pub label: LabelSource,
    pub concept: ConceptRule,
    /// Event timestamp column overriding the mapping's event column
    pub datetime_column: Option<String>,
}

impl AttributeRule {
    /// An attribute labelled with its own column name and no concept
    pub fn new(column: impl Into<String>) -> Self {
        let column = column.into();
        Self {
            label: LabelSource::Static(column.clone()),
            column,
            concept: ConceptRule::default(),
            datetime_column: None,
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = LabelSource::Static(label.into());
        self
    }

    pub fn label_column(mut self, column: impl Into<String>) -> Self {
        self.label = LabelSource::Column(column.into());
        self
    }

    pub fn concept(mut self, concept: ConceptRule) -> Self {
        self.concept = concept;
        self
    }

    pub fn at(mut self, datetime_column: impl Into<String>) -> Self {
        self.datetime_column = Some(datetime_column.into());
        self
    }

    /// Label of this attribute for `row`; `None` when a label column is blank
    pub fn label_for(&self, row: &Row) -> Option<String> {
        match &self.label {
            LabelSource::Static(label) => Some(label.clone()),
            LabelSource::Column(c) => row.get(c).as_text(),
        }
    }

    fn source_columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.column.as_str())
            .chain(match &self.label {
                LabelSource::Column(c) => Some(c.as_str()),
                LabelSource::Static(_) => None,
            })
            .chain(self.datetime_column.as_deref())
            .chain(self.concept.source_column())
    }
}

/// Everything a field rule may read while one record is being built
pub(crate) struct RecordScope<'a> {
    pub row: &'a Row,
    pub person_id: Option<i64>,
    pub visit_id: Option<i64>,
    pub attribute: Option<&'a AttributeRule>,
    pub label: Option<&'a str>,
    pub event_column: Option<&'a str>,
}

fn date_of(row: &Row, column: &str) -> Result<Value> {
    let cell = row.get(column);
    if cell.is_blank() {
        return Ok(Value::Null);
    }
    cell.as_date()
        .map(Value::Date)
        .ok_or_else(|| EtlError::Transform(format!("column '{column}' is not a date: {cell}")))
}

fn datetime_of(row: &Row, column: &str) -> Result<Value> {
    let cell = row.get(column);
    if cell.is_blank() {
        return Ok(Value::Null);
    }
    cell.as_datetime().map(Value::DateTime).ok_or_else(|| {
        EtlError::Transform(format!("column '{column}' is not a timestamp: {cell}"))
    })
}

impl FieldRule {
    pub(crate) fn evaluate(&self, scope: &RecordScope<'_>, ctx: &TransformContext<'_>) -> Result<Value> {
        let attribute_cell = || scope.attribute.map(|a| scope.row.get(&a.column));
        let event_column = || {
            scope
                .attribute
                .and_then(|a| a.datetime_column.as_deref())
                .or(scope.event_column)
        };

        Ok(match self {
            FieldRule::Column(c) => scope.row.get(c).clone(),
            FieldRule::DateOf(c) => date_of(scope.row, c)?,
            FieldRule::Constant(v) => v.clone(),
            FieldRule::Person => scope.person_id.into(),
            FieldRule::Visit => scope.visit_id.into(),
            FieldRule::Concept(rule) => rule.resolve(scope.row, scope.label, ctx).get().into(),
            FieldRule::AttributeNumber => attribute_cell()
                .and_then(Value::as_f64)
                .into(),
            FieldRule::AttributeText => attribute_cell().and_then(Value::as_text).into(),
            FieldRule::AttributeLabel => scope.label.map(str::to_string).into(),
            FieldRule::AttributeConcept => match scope.attribute {
                Some(a) => a.concept.resolve(scope.row, scope.label, ctx).get().into(),
                None => Value::Null,
            },
            FieldRule::EventDate => match event_column() {
                Some(c) => date_of(scope.row, c)?,
                None => Value::Null,
            },
            FieldRule::EventDateTime => match event_column() {
                Some(c) => datetime_of(scope.row, c)?,
                None => Value::Null,
            },
        })
    }
}

fn check_fields(
    fields: &[(String, FieldRule)],
    linkage: &Linkage,
    target_columns: &[String],
) -> Result<()> {
    let mut seen = HashSet::new();
    for (target, rule) in fields {
        if !seen.insert(target.as_str()) {
            return Err(EtlError::Configuration(format!(
                "target field '{target}' is mapped twice"
            )));
        }
        if !target_columns.iter().any(|c| c == target) {
            return Err(EtlError::Configuration(format!(
                "target field '{target}' is not a column of the target"
            )));
        }
        if *rule == FieldRule::Person && linkage.subject_column.is_none() {
            return Err(EtlError::Configuration(format!(
                "field '{target}' needs a person but the mapping has no subject column"
            )));
        }
        if *rule == FieldRule::Visit && linkage.visit_column.is_none() {
            return Err(EtlError::Configuration(format!(
                "field '{target}' needs a visit but the mapping has no visit column"
            )));
        }
    }
    Ok(())
}

/// Joins a source row must satisfy before it is transformed
///
/// Rows whose subject or session has no match are excluded, never defaulted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Linkage {
    /// Source column identifying the patient
    pub subject_column: Option<String>,
    /// Source column holding the surgical session id
    pub visit_column: Option<String>,
}

impl Linkage {
    fn columns(&self) -> impl Iterator<Item = &str> {
        self.subject_column
            .as_deref()
            .into_iter()
            .chain(self.visit_column.as_deref())
    }
}

fn check_source_columns<'a>(
    query: &SourceQuery,
    columns: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    for column in columns {
        if query.column_type(column).is_none() {
            return Err(EtlError::Configuration(format!(
                "column '{column}' is not read from {}",
                query.relation
            )));
        }
    }
    Ok(())
}

/// 1:1 mapping of a source row onto a target record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMapping {
    pub linkage: Linkage,
    pub fields: Vec<(String, FieldRule)>,
}

impl RowMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, column: impl Into<String>) -> Self {
        self.linkage.subject_column = Some(column.into());
        self
    }

    pub fn visit(mut self, column: impl Into<String>) -> Self {
        self.linkage.visit_column = Some(column.into());
        self
    }

    pub fn field(mut self, target: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push((target.into(), rule));
        self
    }

    pub(crate) fn domains(&self) -> BTreeSet<ConceptDomain> {
        self.fields.iter().filter_map(|(_, r)| r.domain()).collect()
    }

    /// Checks every rule against the source projection and target columns
    pub fn validate(&self, query: &SourceQuery, target_columns: &[String]) -> Result<()> {
        check_fields(&self.fields, &self.linkage, target_columns)?;
        if let Some((target, _)) = self.fields.iter().find(|(_, r)| r.is_attribute_only()) {
            return Err(EtlError::Configuration(format!(
                "field '{target}' uses an attribute rule in a row mapping"
            )));
        }
        check_source_columns(
            query,
            self.linkage
                .columns()
                .chain(self.fields.iter().filter_map(|(_, r)| r.source_column())),
        )
    }
}

/// EAV mapping: shared fields plus one record per non-null attribute
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMapping {
    pub linkage: Linkage,
    /// Default event timestamp column for attributes without their own
    pub event_column: Option<String>,
    pub fields: Vec<(String, FieldRule)>,
    pub attributes: Vec<AttributeRule>,
}

impl AttributeMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, column: impl Into<String>) -> Self {
        self.linkage.subject_column = Some(column.into());
        self
    }

    pub fn visit(mut self, column: impl Into<String>) -> Self {
        self.linkage.visit_column = Some(column.into());
        self
    }

    pub fn event(mut self, column: impl Into<String>) -> Self {
        self.event_column = Some(column.into());
        self
    }

    pub fn field(mut self, target: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.push((target.into(), rule));
        self
    }

    pub fn attribute(mut self, attribute: AttributeRule) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Attribute columns, in rule order, without duplicates
    pub fn attribute_columns(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.attributes
            .iter()
            .map(|a| a.column.as_str())
            .filter(|c| seen.insert(*c))
            .collect()
    }

    pub(crate) fn domains(&self) -> BTreeSet<ConceptDomain> {
        self.fields
            .iter()
            .filter_map(|(_, r)| r.domain())
            .chain(
                self.attributes
                    .iter()
                    .filter_map(|a| a.concept.lookup.as_ref().map(|l| l.domain)),
            )
            .collect()
    }

    /// Checks every rule against the source projection and target columns
    pub fn validate(&self, query: &SourceQuery, target_columns: &[String]) -> Result<()> {
        if self.attributes.is_empty() {
            return Err(EtlError::Configuration(format!(
                "attribute mapping for {} has no attributes",
                query.relation
            )));
        }
        check_fields(&self.fields, &self.linkage, target_columns)?;

        let needs_event = self
            .fields
            .iter()
            .any(|(_, r)| matches!(r, FieldRule::EventDate | FieldRule::EventDateTime));
        if needs_event
            && self.event_column.is_none()
            && self.attributes.iter().any(|a| a.datetime_column.is_none())
        {
            return Err(EtlError::Configuration(format!(
                "attribute mapping for {} maps an event date but has no event column",
                query.relation
            )));
        }

        check_source_columns(
            query,
            self.linkage
                .columns()
                .chain(self.event_column.as_deref())
                .chain(self.fields.iter().filter_map(|(_, r)| r.source_column()))
                .chain(self.attributes.iter().flat_map(AttributeRule::source_columns)),
        )
    }
}

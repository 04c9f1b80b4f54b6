use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Highest wire-encoding version this model can be populated for.
pub const MAX_ENCODING_VERSION: u8 = 2;

const DECISECOND_NANOS: i128 = 100_000_000;
const LETTER_OFFSET: u8 = b'a' - 1;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ConsentError {
    #[error("invalid value `{value}` for field `{field}`{}", detail_suffix(.detail))]
    InvalidField { field: &'static str, value: String, detail: Option<String> },
    #[error("field `{field}` is already bound and may only be set once")]
    AlreadyBound { field: &'static str },
}

impl ConsentError {
    fn invalid(field: &'static str, value: impl Display) -> Self {
        Self::InvalidField { field, value: value.to_string(), detail: None }
    }

    fn invalid_with(field: &'static str, value: impl Display, detail: impl Into<String>) -> Self {
        Self::InvalidField { field, value: value.to_string(), detail: Some(detail.into()) }
    }
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(detail) => format!(": {detail}"),
        None => String::new(),
    }
}

/// The three identifier spaces a catalog defines.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Purposes,
    Vendors,
    SpecialFeatures,
}

impl Dimension {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purposes => "purposes",
            Self::Vendors => "vendors",
            Self::SpecialFeatures => "special_features",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "purposes" => Some(Self::Purposes),
            "vendors" => Some(Self::Vendors),
            "special_features" => Some(Self::SpecialFeatures),
            _ => None,
        }
    }
}

/// In-memory snapshot of the vendor/purpose reference dataset.
///
/// Produced by an external loader; this crate only reads the version numbers
/// and the cardinality of each identifier dimension.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Catalog {
    pub list_version: u16,
    pub policy_version: u8,
    pub purpose_count: u16,
    pub vendor_count: u16,
    pub special_feature_count: u16,
}

impl Catalog {
    #[must_use]
    pub fn dimension_size(&self, dimension: Dimension) -> u16 {
        match dimension {
            Dimension::Purposes => self.purpose_count,
            Dimension::Vendors => self.vendor_count,
            Dimension::SpecialFeatures => self.special_feature_count,
        }
    }
}

/// Fixed-domain key/value container scoped to one catalog dimension.
///
/// Valid ids are `1..=capacity`, where the capacity is the dimension size of
/// the catalog supplied at construction. Ids without an explicit entry read
/// as the default value, and writing the default clears the explicit entry,
/// so [`CatalogContainer::entries`] yields exactly the ids that differ from
/// the default.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CatalogContainer<V> {
    dimension: Dimension,
    capacity: u16,
    default: V,
    #[serde(default)]
    entries: BTreeMap<u16, V>,
}

impl<V: Clone + PartialEq> CatalogContainer<V> {
    #[must_use]
    pub fn new(catalog: &Catalog, dimension: Dimension, default: V) -> Self {
        Self {
            dimension,
            capacity: catalog.dimension_size(dimension),
            default,
            entries: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> Dimension {
        self.dimension
    }

    #[must_use]
    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Reads never validate: any id without an explicit entry, in or out of
    /// the domain, reads as the default.
    #[must_use]
    pub fn get(&self, id: u16) -> &V {
        self.entries.get(&id).unwrap_or(&self.default)
    }

    /// Store a value for one catalog-assigned id.
    ///
    /// # Errors
    /// Returns [`ConsentError::InvalidField`] naming the dimension when `id`
    /// is zero or above the catalog capacity. The container is unchanged on
    /// failure.
    pub fn set(&mut self, id: u16, value: V) -> Result<(), ConsentError> {
        if id == 0 || id > self.capacity {
            return Err(ConsentError::invalid_with(
                self.dimension.as_str(),
                id,
                format!("id must be in 1..={}", self.capacity),
            ));
        }

        if value == self.default {
            self.entries.remove(&id);
        } else {
            self.entries.insert(id, value);
        }
        Ok(())
    }

    /// Ids holding a value that differs from the default, in ascending order.
    pub fn entries(&self) -> impl Iterator<Item = (u16, &V)> {
        self.entries.iter().map(|(id, value)| (*id, value))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RestrictionKind {
    NotAllowed,
    RequireConsent,
    RequireLegitimateInterest,
}

impl RestrictionKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAllowed => "not_allowed",
            Self::RequireConsent => "require_consent",
            Self::RequireLegitimateInterest => "require_legitimate_interest",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_allowed" => Some(Self::NotAllowed),
            "require_consent" => Some(Self::RequireConsent),
            "require_legitimate_interest" => Some(Self::RequireLegitimateInterest),
            _ => None,
        }
    }
}

/// Per-vendor publisher restriction set: which purposes a publisher narrows
/// for that vendor, and how. Opaque to the record — the record stores these
/// without imposing any constraint on their content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct RestrictionEntry {
    #[serde(default)]
    purposes: BTreeMap<u16, RestrictionKind>,
}

impl RestrictionEntry {
    pub fn restrict(&mut self, purpose_id: u16, kind: RestrictionKind) {
        self.purposes.insert(purpose_id, kind);
    }

    pub fn lift(&mut self, purpose_id: u16) {
        self.purposes.remove(&purpose_id);
    }

    #[must_use]
    pub fn kind_for(&self, purpose_id: u16) -> Option<RestrictionKind> {
        self.purposes.get(&purpose_id).copied()
    }

    pub fn restrictions(&self) -> impl Iterator<Item = (u16, RestrictionKind)> + '_ {
        self.purposes.iter().map(|(purpose_id, kind)| (*purpose_id, *kind))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.purposes.is_empty()
    }
}

/// Catalog-bound state of a [`ConsentRecord`].
///
/// The record holds this as one optional value, so the attached catalog and
/// every catalog-scoped container exist together or not at all.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct CatalogBinding {
    catalog: Catalog,
    pub special_feature_opt_ins: CatalogContainer<bool>,
    pub purpose_consents: CatalogContainer<bool>,
    pub purpose_legitimate_interests: CatalogContainer<bool>,
    pub vendor_consents: CatalogContainer<bool>,
    pub vendor_legitimate_interests: CatalogContainer<bool>,
    pub publisher_restrictions: CatalogContainer<RestrictionEntry>,
}

impl CatalogBinding {
    fn new(catalog: Catalog) -> Self {
        Self {
            special_feature_opt_ins: CatalogContainer::new(
                &catalog,
                Dimension::SpecialFeatures,
                false,
            ),
            purpose_consents: CatalogContainer::new(&catalog, Dimension::Purposes, false),
            purpose_legitimate_interests: CatalogContainer::new(
                &catalog,
                Dimension::Purposes,
                false,
            ),
            vendor_consents: CatalogContainer::new(&catalog, Dimension::Vendors, false),
            vendor_legitimate_interests: CatalogContainer::new(&catalog, Dimension::Vendors, false),
            publisher_restrictions: CatalogContainer::new(
                &catalog,
                Dimension::Vendors,
                RestrictionEntry::default(),
            ),
            catalog,
        }
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

/// Normalize a timestamp to decisecond (100 ms) resolution.
///
/// Rounding is half-up: a value landing exactly between two ticks rounds
/// toward positive infinity. Already-normalized values are fixed points.
#[must_use]
pub fn round_to_decisecond(value: OffsetDateTime) -> OffsetDateTime {
    let nanos = value.unix_timestamp_nanos();
    let rounded = (nanos + DECISECOND_NANOS / 2).div_euclid(DECISECOND_NANOS) * DECISECOND_NANOS;
    OffsetDateTime::from_unix_timestamp_nanos(rounded).unwrap_or(value)
}

fn is_two_lowercase_letters(code: &str) -> bool {
    let bytes = code.as_bytes();
    bytes.len() == 2
        && bytes.iter().all(|byte| (1..=26).contains(&byte.wrapping_sub(LETTER_OFFSET)))
}

/// Mutable in-memory consent state for one user, as accumulated by a
/// consent-management platform before wire encoding.
///
/// Every scalar is validated at assignment time; reads never validate.
/// Constraints the type system already enforces (unsigned ranges) have
/// infallible setters. Catalog-derived state lives behind
/// [`ConsentRecord::binding`] and is absent until a catalog is attached.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ConsentRecord {
    encoding_version: u8,
    #[serde(with = "time::serde::rfc3339")]
    created: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    last_updated: OffsetDateTime,
    cmp_id: u16,
    cmp_version: u16,
    consent_screen: u8,
    consent_language: String,
    publisher_country_code: String,
    is_service_specific: bool,
    uses_non_standard_stacks: bool,
    purpose_one_treatment: bool,
    supports_out_of_band: bool,
    #[serde(default)]
    binding: Option<CatalogBinding>,
}

impl ConsentRecord {
    /// Create an empty record. Both timestamps start at the current instant,
    /// normalized to deciseconds; no catalog is attached.
    #[must_use]
    pub fn new() -> Self {
        let now = round_to_decisecond(OffsetDateTime::now_utc());
        Self {
            encoding_version: MAX_ENCODING_VERSION,
            created: now,
            last_updated: now,
            cmp_id: 0,
            cmp_version: 0,
            consent_screen: 0,
            consent_language: String::new(),
            publisher_country_code: String::new(),
            is_service_specific: false,
            uses_non_standard_stacks: false,
            purpose_one_treatment: false,
            supports_out_of_band: true,
            binding: None,
        }
    }

    /// Create a record with the catalog already attached.
    #[must_use]
    pub fn with_catalog(catalog: Catalog) -> Self {
        let mut record = Self::new();
        record.binding = Some(CatalogBinding::new(catalog));
        record
    }

    /// Attach the reference catalog and build every catalog-scoped container
    /// in one step.
    ///
    /// # Errors
    /// Returns [`ConsentError::AlreadyBound`] when a catalog is already
    /// attached. The first binding is untouched; attaching is one-shot for
    /// the lifetime of the record.
    pub fn attach_catalog(&mut self, catalog: Catalog) -> Result<(), ConsentError> {
        if self.binding.is_some() {
            return Err(ConsentError::AlreadyBound { field: "catalog" });
        }
        self.binding = Some(CatalogBinding::new(catalog));
        Ok(())
    }

    #[must_use]
    pub fn catalog(&self) -> Option<&Catalog> {
        self.binding.as_ref().map(CatalogBinding::catalog)
    }

    #[must_use]
    pub fn binding(&self) -> Option<&CatalogBinding> {
        self.binding.as_ref()
    }

    pub fn binding_mut(&mut self) -> Option<&mut CatalogBinding> {
        self.binding.as_mut()
    }

    /// List version of the attached catalog; `None` until attach.
    #[must_use]
    pub fn catalog_list_version(&self) -> Option<u16> {
        self.binding.as_ref().map(|binding| binding.catalog.list_version)
    }

    /// Policy version of the attached catalog; `None` until attach.
    #[must_use]
    pub fn policy_version(&self) -> Option<u8> {
        self.binding.as_ref().map(|binding| binding.catalog.policy_version)
    }

    #[must_use]
    pub fn encoding_version(&self) -> u8 {
        self.encoding_version
    }

    /// # Errors
    /// Returns [`ConsentError::InvalidField`] when `version` is zero or above
    /// [`MAX_ENCODING_VERSION`].
    pub fn set_encoding_version(&mut self, version: u8) -> Result<(), ConsentError> {
        if version == 0 || version > MAX_ENCODING_VERSION {
            return Err(ConsentError::invalid_with(
                "encoding_version",
                version,
                format!("max supported version is {MAX_ENCODING_VERSION}"),
            ));
        }
        self.encoding_version = version;
        Ok(())
    }

    #[must_use]
    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    /// Any timestamp is accepted; it is stored decisecond-normalized.
    pub fn set_created(&mut self, at: OffsetDateTime) {
        self.created = round_to_decisecond(at);
    }

    #[must_use]
    pub fn last_updated(&self) -> OffsetDateTime {
        self.last_updated
    }

    pub fn set_last_updated(&mut self, at: OffsetDateTime) {
        self.last_updated = round_to_decisecond(at);
    }

    /// Stamp `last_updated` with the current instant.
    pub fn mark_updated(&mut self) {
        self.last_updated = round_to_decisecond(OffsetDateTime::now_utc());
    }

    #[must_use]
    pub fn cmp_id(&self) -> u16 {
        self.cmp_id
    }

    /// # Errors
    /// Returns [`ConsentError::InvalidField`] unless `value > 1`. The stored
    /// id is unchanged on failure.
    pub fn set_cmp_id(&mut self, value: u16) -> Result<(), ConsentError> {
        if value <= 1 {
            return Err(ConsentError::invalid("cmp_id", value));
        }
        self.cmp_id = value;
        Ok(())
    }

    #[must_use]
    pub fn cmp_version(&self) -> u16 {
        self.cmp_version
    }

    /// Non-negativity is carried by the unsigned type.
    pub fn set_cmp_version(&mut self, value: u16) {
        self.cmp_version = value;
    }

    #[must_use]
    pub fn consent_screen(&self) -> u8 {
        self.consent_screen
    }

    pub fn set_consent_screen(&mut self, value: u8) {
        self.consent_screen = value;
    }

    #[must_use]
    pub fn consent_language(&self) -> &str {
        &self.consent_language
    }

    /// # Errors
    /// Returns [`ConsentError::InvalidField`] unless `code` is exactly two
    /// lowercase ASCII letters. The check is a raw byte-offset range test,
    /// not a language-code table lookup.
    pub fn set_consent_language(&mut self, code: &str) -> Result<(), ConsentError> {
        if !is_two_lowercase_letters(code) {
            return Err(ConsentError::invalid("consent_language", code));
        }
        self.consent_language = code.to_string();
        Ok(())
    }

    #[must_use]
    pub fn publisher_country_code(&self) -> &str {
        &self.publisher_country_code
    }

    /// # Errors
    /// Returns [`ConsentError::InvalidField`] unless `code` is exactly two
    /// lowercase ASCII letters.
    pub fn set_publisher_country_code(&mut self, code: &str) -> Result<(), ConsentError> {
        if !is_two_lowercase_letters(code) {
            return Err(ConsentError::invalid("publisher_country_code", code));
        }
        self.publisher_country_code = code.to_string();
        Ok(())
    }

    #[must_use]
    pub fn is_service_specific(&self) -> bool {
        self.is_service_specific
    }

    pub fn set_service_specific(&mut self, value: bool) {
        self.is_service_specific = value;
    }

    #[must_use]
    pub fn uses_non_standard_stacks(&self) -> bool {
        self.uses_non_standard_stacks
    }

    pub fn set_uses_non_standard_stacks(&mut self, value: bool) {
        self.uses_non_standard_stacks = value;
    }

    #[must_use]
    pub fn purpose_one_treatment(&self) -> bool {
        self.purpose_one_treatment
    }

    pub fn set_purpose_one_treatment(&mut self, value: bool) {
        self.purpose_one_treatment = value;
    }

    #[must_use]
    pub fn supports_out_of_band(&self) -> bool {
        self.supports_out_of_band
    }

    pub fn set_supports_out_of_band(&mut self, value: bool) {
        self.supports_out_of_band = value;
    }
}

impl Default for ConsentRecord {
    fn default() -> Self {
        Self::new()
    }
}

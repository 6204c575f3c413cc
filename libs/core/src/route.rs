//! Route codec
//!
//! A route addresses a backend handler. Protocols often split it over several
//! header fields (`cmd` + `act`, say); the codec packs those named sub-fields
//! into one `u32` and back, big-endian in declaration order.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Widest route, in bytes, that fits the packed `u32`.
pub const MAX_ROUTE_BYTES: u32 = 4;

/// Named sub-field values of a route, keyed by field name.
pub type RouteValues = BTreeMap<String, u32>;

/// One fixed-width component of a frame header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteField {
    pub name: String,
    pub bytes: u8,
    #[serde(default)]
    pub is_route: bool,
    #[serde(default)]
    pub is_seq: bool,
}

impl RouteField {
    /// A header field that belongs to neither the route nor the sequence key
    pub fn plain(name: impl Into<String>, bytes: u8) -> Self {
        Self {
            name: name.into(),
            bytes,
            is_route: false,
            is_seq: false,
        }
    }

    /// A field that is part of the route key
    pub fn route(name: impl Into<String>, bytes: u8) -> Self {
        Self {
            is_route: true,
            ..Self::plain(name, bytes)
        }
    }

    /// A field that is part of the sequence key
    pub fn seq(name: impl Into<String>, bytes: u8) -> Self {
        Self {
            is_seq: true,
            ..Self::plain(name, bytes)
        }
    }

    fn bits(&self) -> u32 {
        u32::from(self.bytes) * 8
    }

    fn mask(&self) -> u64 {
        (1u64 << self.bits()) - 1
    }
}

/// Ordered header description.
///
/// Construction validates the layout, so every `RouteLayout` in existence has
/// field widths of 1 to 4 bytes, unique field names, and route fields that
/// fit in 32 bits. Deserialization goes through the same checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RouteField>", into = "Vec<RouteField>")]
pub struct RouteLayout {
    fields: Vec<RouteField>,
}

impl RouteLayout {
    pub fn new(fields: Vec<RouteField>) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut route_bytes = 0u32;

        for field in &fields {
            if !(1..=4).contains(&field.bytes) {
                return Err(Error::InvalidFieldWidth {
                    name: field.name.clone(),
                    bytes: field.bytes,
                });
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::DuplicateField(field.name.clone()));
            }
            if field.is_route {
                route_bytes += u32::from(field.bytes);
            }
        }

        if route_bytes > MAX_ROUTE_BYTES {
            return Err(Error::RouteTooWide {
                bits: route_bytes * 8,
            });
        }

        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[RouteField] {
        &self.fields
    }

    /// Route-flagged fields in declaration order
    pub fn route_fields(&self) -> impl DoubleEndedIterator<Item = &RouteField> {
        self.fields.iter().filter(|f| f.is_route)
    }

    /// Sequence-flagged fields in declaration order
    pub fn seq_fields(&self) -> impl Iterator<Item = &RouteField> {
        self.fields.iter().filter(|f| f.is_seq)
    }

    /// Total width of the route key in bits
    pub fn route_bits(&self) -> u32 {
        self.route_fields().map(RouteField::bits).sum()
    }

    /// Total header size in bytes
    pub fn header_size(&self) -> usize {
        self.fields.iter().map(|f| usize::from(f.bytes)).sum()
    }

    /// Pack named values into a route. See [`combine`].
    pub fn combine(&self, values: &RouteValues) -> u32 {
        combine(values, self)
    }

    /// Unpack a route into named values. See [`split`].
    pub fn split(&self, combined: u32) -> RouteValues {
        split(combined, self)
    }

    /// Compact human-readable form, e.g. `size(4B) + *route(2B) + ^seq(2B)`.
    ///
    /// Route fields are prefixed with `*`, sequence fields with `^`.
    pub fn preview(&self) -> String {
        self.fields
            .iter()
            .map(|f| {
                let prefix = if f.is_route {
                    "*"
                } else if f.is_seq {
                    "^"
                } else {
                    ""
                };
                format!("{}{}({}B)", prefix, f.name, f.bytes)
            })
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

impl TryFrom<Vec<RouteField>> for RouteLayout {
    type Error = Error;

    fn try_from(fields: Vec<RouteField>) -> Result<Self> {
        Self::new(fields)
    }
}

impl From<RouteLayout> for Vec<RouteField> {
    fn from(layout: RouteLayout) -> Self {
        layout.fields
    }
}

/// Pack the route-flagged fields of `layout` into a single integer.
///
/// Fields are taken in declaration order, each value masked to its width and
/// shifted in from the right. Missing values count as zero.
pub fn combine(values: &RouteValues, layout: &RouteLayout) -> u32 {
    let mut result = 0u64;
    for field in layout.route_fields() {
        let value = values.get(&field.name).copied().unwrap_or(0);
        result = (result << field.bits()) | (u64::from(value) & field.mask());
    }
    // Truncation is the packing scheme's wrap-around; validated layouts never exceed 32 bits.
    result as u32
}

/// Inverse of [`combine`]: peel route fields off the low end, last field first.
pub fn split(combined: u32, layout: &RouteLayout) -> RouteValues {
    let mut remaining = u64::from(combined);
    let mut values = RouteValues::new();
    for field in layout.route_fields().rev() {
        values.insert(field.name.clone(), (remaining & field.mask()) as u32);
        remaining >>= field.bits();
    }
    values
}

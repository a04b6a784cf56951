use serde::{Deserialize, Deserializer, Serialize};

/// The catalog encodes "not deleted" as either SQL null or an empty string,
/// depending on which write path touched the row. Accept both here so the
/// rest of the crate only ever sees [`CatalogItem::is_deleted`].
fn deserialize_deleted_at<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNull {
        String(String),
        Null,
    }

    match Option::<StringOrNull>::deserialize(deserializer)? {
        Some(StringOrNull::String(s)) => Ok(Some(s)),
        _ => Ok(None),
    }
}

fn deserialize_optional_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrInt {
        String(String),
        Int(i64),
        Null,
    }

    match Option::<StringOrInt>::deserialize(deserializer)? {
        Some(StringOrInt::String(s)) if !s.is_empty() => {
            s.parse().map(Some).map_err(serde::de::Error::custom)
        }
        Some(StringOrInt::Int(i)) => Ok(Some(i)),
        _ => Ok(None),
    }
}

/// One catalog book row. Immutable from this crate's point of view except
/// for the soft-delete marker, which the store owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub title: String,
    /// Genealogy link used for grouping variant records, never for ranking.
    #[serde(default, deserialize_with = "deserialize_optional_i64")]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub is_variant_spelling: bool,
    #[serde(default, deserialize_with = "deserialize_deleted_at")]
    pub deleted_at: Option<String>,
}

impl CatalogItem {
    /// Normalized deletion signal. Null and `""` both mean the row is live;
    /// only a non-empty marker counts as deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}

/// One precomputed embedding row, unique per (item, model) pair. Written by
/// the offline backfill job, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub item_id: i64,
    pub model_name: String,
    pub vector: Vec<f32>,
}

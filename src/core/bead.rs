use chrono::{DateTime, Utc};

use crate::core::meta::{BeadName, ContentId, InputSpec};
use crate::error::Result;
use crate::tech::timestamp;

/// Immutable metadata view of a bead.
///
/// This is what queries return and what the provenance web consumes. An
/// `Archive` is the same metadata backed by an openable file; it materializes
/// one of these via `Archive::bead()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bead {
    pub name: BeadName,
    pub kind: String,
    pub content_id: ContentId,
    pub freeze_time_str: String,
    /// Parsed eagerly at construction; no hidden caching.
    pub freeze_time: DateTime<Utc>,
    pub inputs: Vec<InputSpec>,
    pub box_name: String,
}

impl Bead {
    pub fn new(
        name: BeadName,
        kind: String,
        content_id: ContentId,
        freeze_time_str: String,
        inputs: Vec<InputSpec>,
        box_name: String,
    ) -> Result<Self> {
        let freeze_time = timestamp::parse_timestamp(&freeze_time_str)?;
        Ok(Bead {
            name,
            kind,
            content_id,
            freeze_time_str,
            freeze_time,
            inputs,
            box_name,
        })
    }

    /// Microseconds since epoch, the representation time predicates use.
    pub fn freeze_time_unix(&self) -> i64 {
        timestamp::unix_micros(&self.freeze_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bead_parses_freeze_time_eagerly() {
        let bead = Bead::new(
            BeadName::new("test-bead").unwrap(),
            "test-kind".to_string(),
            ContentId::new("abc123"),
            "20240115T120000000000+0000".to_string(),
            vec![],
            "test-box".to_string(),
        )
        .unwrap();

        assert_eq!(bead.name.as_str(), "test-bead");
        assert_eq!(
            bead.freeze_time,
            timestamp::parse_timestamp("20240115T120000000000+0000").unwrap()
        );
    }

    #[test]
    fn test_bead_rejects_bad_freeze_time() {
        let result = Bead::new(
            BeadName::new("test-bead").unwrap(),
            "test-kind".to_string(),
            ContentId::new("abc123"),
            "not-a-timestamp".to_string(),
            vec![],
            "test-box".to_string(),
        );
        assert!(result.is_err());
    }
}

//! Picks the canonical tag id for a scan.
//!
//! Lookup order: embedded id, then hardware id. A tag matching neither is
//! unknown and is created under its embedded id if it has one, else its
//! hardware id. Tags written before ids were embedded only match on the
//! hardware id, which is why that second lookup exists.

use crate::error::Result;
use crate::models::{ScanEvent, ScanOrigin, TagRecord};
use crate::store::TagStore;
use nfc::{Namespaces, PhysicalTagSession};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    EmbeddedId,
    HardwareId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Known {
        record: TagRecord,
        matched_by: MatchedBy,
    },
    /// No record; `provisional_id` is the id to create one under.
    Unknown { provisional_id: String },
    /// The event carried no usable identifier.
    NoCandidate,
}

impl Resolution {
    pub fn tag_id(&self) -> Option<&str> {
        match self {
            Resolution::Known { record, .. } => Some(&record.tag_id),
            Resolution::Unknown { provisional_id } => Some(provisional_id),
            Resolution::NoCandidate => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TagIdentityResolver {
    check_conflicts: bool,
}

impl TagIdentityResolver {
    /// With `check_conflicts`, an embedded-id hit also looks up the hardware id
    /// and logs when it belongs to a different record. The result is unaffected.
    pub fn new(check_conflicts: bool) -> Self {
        Self { check_conflicts }
    }

    pub async fn resolve_event(
        &self,
        store: &dyn TagStore,
        event: &ScanEvent,
    ) -> Result<Resolution> {
        self.resolve(store, event.embedded(), event.hardware()).await
    }

    pub async fn resolve(
        &self,
        store: &dyn TagStore,
        embedded_id: Option<&str>,
        hardware_id: Option<&str>,
    ) -> Result<Resolution> {
        let embedded_id = embedded_id.filter(|s| !s.is_empty());
        let hardware_id = hardware_id.filter(|s| !s.is_empty());

        if let Some(id) = embedded_id {
            if let Some(record) = store.get(id).await? {
                debug!(tag_id = %id, "resolved by embedded id");
                if self.check_conflicts {
                    self.report_conflict(store, id, hardware_id).await;
                }
                return Ok(Resolution::Known {
                    record,
                    matched_by: MatchedBy::EmbeddedId,
                });
            }
        }

        if let Some(id) = hardware_id {
            if embedded_id != Some(id) {
                if let Some(record) = store.get(id).await? {
                    debug!(tag_id = %id, embedded = ?embedded_id, "resolved by hardware id");
                    return Ok(Resolution::Known {
                        record,
                        matched_by: MatchedBy::HardwareId,
                    });
                }
            }
        }

        match embedded_id.or(hardware_id) {
            Some(id) => {
                debug!(tag_id = %id, "unknown tag");
                Ok(Resolution::Unknown {
                    provisional_id: id.to_string(),
                })
            }
            None => Ok(Resolution::NoCandidate),
        }
    }

    async fn report_conflict(
        &self,
        store: &dyn TagStore,
        embedded_id: &str,
        hardware_id: Option<&str>,
    ) {
        let Some(hw) = hardware_id.filter(|hw| *hw != embedded_id) else {
            return;
        };
        match store.get(hw).await {
            Ok(Some(_)) => warn!(
                embedded_id,
                hardware_id = hw,
                "tag matches two records; using the embedded id record"
            ),
            Ok(None) => {}
            Err(e) => debug!(error = %e, "conflict check lookup failed"),
        }
    }
}

/// Builds a scan event from the tag currently held against the reader.
pub async fn scan_event_from_session(
    session: &dyn PhysicalTagSession,
    namespaces: &Namespaces,
    origin: ScanOrigin,
) -> ScanEvent {
    ScanEvent::from_reading(nfc::read_identifiers(session, namespaces).await, origin)
}

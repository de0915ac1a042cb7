use chrono::{DateTime, Utc};
use common::{PatientId, PrescriberId, PrescriptionId};

use crate::{CaptureMetadata, PrescribedMedication, PrescriptionCreatedData};

/// What happened to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    PrescriptionCreated,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::PrescriptionCreated => "prescription_created",
        }
    }
}

/// Strategy-independent input to the projector.
///
/// Carries foreign keys only; reference data is resolved by the projector.
/// CDC-sourced notifications also carry the capture metadata of the row that
/// triggered them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNotification {
    pub kind: ChangeKind,
    pub prescription_id: PrescriptionId,
    pub prescriber_id: PrescriberId,
    pub patient_id: PatientId,
    pub prescribed_at: DateTime<Utc>,
    pub medications: Vec<PrescribedMedication>,
    pub capture: Option<CaptureMetadata>,
}

impl ChangeNotification {
    /// Attaches CDC capture metadata.
    pub fn with_capture(mut self, capture: CaptureMetadata) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Notifications without capture metadata always project; captured ones
    /// only for live creates and snapshot reads.
    pub fn is_projectable(&self) -> bool {
        self.capture.is_none_or(|capture| capture.is_projectable())
    }
}

impl From<PrescriptionCreatedData> for ChangeNotification {
    fn from(data: PrescriptionCreatedData) -> Self {
        Self {
            kind: ChangeKind::PrescriptionCreated,
            prescription_id: data.prescription_id,
            prescriber_id: data.prescriber_id,
            patient_id: data.patient_id,
            prescribed_at: data.prescribed_at,
            medications: data.medications,
            capture: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Operation;
    use chrono::TimeZone;
    use common::MedicationId;

    fn notification() -> ChangeNotification {
        ChangeNotification::from(PrescriptionCreatedData {
            prescription_id: PrescriptionId::new(100),
            prescriber_id: PrescriberId::new(1),
            patient_id: PatientId::new(2),
            prescribed_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            medications: vec![PrescribedMedication::new(MedicationId::new(10), "08:00", "500mg")],
        })
    }

    #[test]
    fn event_sourced_notifications_are_projectable() {
        let n = notification();
        assert_eq!(n.kind, ChangeKind::PrescriptionCreated);
        assert!(n.capture.is_none());
        assert!(n.is_projectable());
    }

    #[test]
    fn capture_metadata_controls_projection() {
        let update = notification().with_capture(CaptureMetadata {
            operation: Operation::Update,
            deleted: false,
            source_ts: None,
        });
        assert!(!update.is_projectable());

        let snapshot = notification().with_capture(CaptureMetadata {
            operation: Operation::Read,
            deleted: false,
            source_ts: None,
        });
        assert!(snapshot.is_projectable());
    }
}

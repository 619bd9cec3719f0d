use crate::chrono::{DateTime, Utc};
use crate::ids::{EventId, LibraryId, ScanIdentity, StageId};
use crate::progress::ScanProgress;

/// Metadata envelope attached to every scan event.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EventMeta {
    pub version: u16,
    pub event_id: EventId,
    pub identity: ScanIdentity,
    pub occurred_at: DateTime<Utc>,
}

impl EventMeta {
    pub const VERSION: u16 = 1;

    pub fn new(identity: ScanIdentity) -> Self {
        Self {
            version: Self::VERSION,
            event_id: EventId::new(),
            identity,
            occurred_at: Utc::now(),
        }
    }
}

/// The library could not be resolved or a job hit a terminal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFailed {
    pub meta: EventMeta,
    pub library_id: LibraryId,
    /// `None` when the scan failed before any job ran.
    pub stage: Option<StageId>,
    pub reason: String,
}

/// Fine-grained heartbeat while a job is working.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobProgressChanged {
    pub meta: EventMeta,
    pub library_id: LibraryId,
    pub progress: ScanProgress,
}

/// One job of the graph finished its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanProgressChanged {
    pub meta: EventMeta,
    pub library_id: LibraryId,
    pub stage: StageId,
}

/// The terminal job completed; the scan run is over.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanFinished {
    pub meta: EventMeta,
}

/// Domain events published while a scan run executes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "payload"))]
pub enum ScanEvent {
    ScanFailed(ScanFailed),
    JobProgressChanged(JobProgressChanged),
    ScanProgressChanged(ScanProgressChanged),
    ScanFinished(ScanFinished),
}

impl ScanEvent {
    pub fn failed(
        identity: ScanIdentity,
        library_id: LibraryId,
        stage: Option<StageId>,
        reason: impl Into<String>,
    ) -> Self {
        ScanEvent::ScanFailed(ScanFailed {
            meta: EventMeta::new(identity),
            library_id,
            stage,
            reason: reason.into(),
        })
    }

    pub fn job_progress(
        identity: ScanIdentity,
        library_id: LibraryId,
        progress: ScanProgress,
    ) -> Self {
        ScanEvent::JobProgressChanged(JobProgressChanged {
            meta: EventMeta::new(identity),
            library_id,
            progress,
        })
    }

    pub fn stage_completed(
        identity: ScanIdentity,
        library_id: LibraryId,
        stage: StageId,
    ) -> Self {
        ScanEvent::ScanProgressChanged(ScanProgressChanged {
            meta: EventMeta::new(identity),
            library_id,
            stage,
        })
    }

    pub fn finished(identity: ScanIdentity) -> Self {
        ScanEvent::ScanFinished(ScanFinished {
            meta: EventMeta::new(identity),
        })
    }

    pub fn meta(&self) -> &EventMeta {
        match self {
            ScanEvent::ScanFailed(event) => &event.meta,
            ScanEvent::JobProgressChanged(event) => &event.meta,
            ScanEvent::ScanProgressChanged(event) => &event.meta,
            ScanEvent::ScanFinished(event) => &event.meta,
        }
    }

    pub fn identity(&self) -> ScanIdentity {
        self.meta().identity
    }

    /// Dotted name used by log lines and external sinks.
    pub fn event_name(&self) -> &'static str {
        match self {
            ScanEvent::ScanFailed(_) => "scan.failed",
            ScanEvent::JobProgressChanged(_) => "scan.job_progress",
            ScanEvent::ScanProgressChanged(_) => "scan.progress",
            ScanEvent::ScanFinished(_) => "scan.finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;

    #[test]
    fn constructors_share_identity() {
        let identity = ScanIdentity::for_user(UserId::new());
        let library_id = LibraryId::new();

        let events = [
            ScanEvent::failed(identity, library_id, None, "missing"),
            ScanEvent::job_progress(
                identity,
                library_id,
                ScanProgress::zero("discovery"),
            ),
            ScanEvent::stage_completed(identity, library_id, StageId::DISCOVERY),
            ScanEvent::finished(identity),
        ];

        for event in &events {
            assert_eq!(event.identity(), identity);
            assert_eq!(event.meta().version, EventMeta::VERSION);
        }
        assert_ne!(events[0].meta().event_id, events[1].meta().event_id);
    }

    #[test]
    fn event_names_are_distinct() {
        let identity = ScanIdentity::for_user(UserId::new());
        let library_id = LibraryId::new();
        assert_eq!(
            ScanEvent::failed(identity, library_id, None, "x").event_name(),
            "scan.failed"
        );
        assert_eq!(ScanEvent::finished(identity).event_name(), "scan.finished");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serializes_with_type_tag() {
        let identity = ScanIdentity::for_user(UserId::new());
        let event = ScanEvent::stage_completed(
            identity,
            LibraryId::new(),
            StageId::COMPARISON,
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ScanProgressChanged");
        assert_eq!(json["payload"]["stage"], "comparison");
    }
}

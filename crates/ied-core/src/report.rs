//! ---
//! ied_section: "01-core-functionality"
//! ied_subsection: "module"
//! ied_type: "source"
//! ied_scope: "code"
//! ied_description: "Report decoding and fan-out."
//! ied_version: "v0.0.0-prealpha"
//! ied_owner: "tbd"
//! ---
use ied_metrics::BridgeMetrics;
use ied_model::stack::{ReasonForInclusion, Report, ReportHandler};
use ied_model::{decode, DataSetMember, ReportInfo};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One data-set member carried by a report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedEntry {
    pub path: String,
    pub reason: String,
    /// `None` when the engine value could not be decoded.
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedReport {
    pub rcb_reference: String,
    pub report_id: String,
    pub timestamp_ms: Option<u64>,
    pub entries: Vec<DecodedEntry>,
}

/// Publishes decoded reports to any number of subscribers.
#[derive(Clone, Debug)]
pub struct ReportBridge {
    sink: broadcast::Sender<DecodedReport>,
    metrics: Option<BridgeMetrics>,
}

impl ReportBridge {
    pub fn new(capacity: usize, metrics: Option<BridgeMetrics>) -> Self {
        let (sink, _) = broadcast::channel(capacity.max(1));
        Self { sink, metrics }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DecodedReport> {
        self.sink.subscribe()
    }

    /// Handler for the control block described by `info`.
    pub fn route(&self, info: &ReportInfo) -> ReportRoute {
        ReportRoute {
            members: info.members.clone(),
            bridge: self.clone(),
        }
    }

    fn publish(&self, report: DecodedReport) {
        if let Some(metrics) = &self.metrics {
            metrics.inc_reports();
        }
        debug!(
            rcb = %report.rcb_reference,
            entries = report.entries.len(),
            "report decoded"
        );
        // No subscribers is not an error.
        let _ = self.sink.send(report);
    }
}

/// Decode `report` against the ordered members of its data set.
///
/// Positions marked not-included are skipped. A value of a type the codec
/// does not handle is logged and kept as an entry without a value.
pub fn decode_report(members: &[DataSetMember], report: &Report) -> DecodedReport {
    let mut entries = Vec::new();
    for (position, entry) in report.entries.iter().enumerate() {
        if entry.reason == ReasonForInclusion::NotIncluded {
            continue;
        }
        let Some(member) = members.get(position) else {
            warn!(rcb = %report.rcb_reference, position, "report entry beyond data set");
            continue;
        };
        let value = entry
            .value
            .as_ref()
            .and_then(|raw| match decode(member.data_type, raw) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(
                        rcb = %report.rcb_reference,
                        path = %member.path,
                        error = %err,
                        "report value not decoded"
                    );
                    None
                }
            });
        entries.push(DecodedEntry {
            path: member.path.clone(),
            reason: entry.reason.to_string(),
            value,
        });
    }
    DecodedReport {
        rcb_reference: report.rcb_reference.clone(),
        report_id: report.report_id.clone(),
        timestamp_ms: report.timestamp,
        entries,
    }
}

/// Report handler installed on one control block.
pub struct ReportRoute {
    members: Vec<DataSetMember>,
    bridge: ReportBridge,
}

impl ReportHandler for ReportRoute {
    fn handle_report(&self, report: &Report) {
        self.bridge.publish(decode_report(&self.members, report));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ied_model::stack::ReportEntry;
    use ied_model::{DataType, MmsValue};

    fn members() -> Vec<DataSetMember> {
        vec![
            DataSetMember {
                variable: "TTMP1$MX$TmpSv$instMag$f".into(),
                path: "SENSORS.TTMP1.TmpSv.instMag.f".into(),
                data_type: Some(DataType::Float),
            },
            DataSetMember {
                variable: "TTMP1$ST$Alm$stVal".into(),
                path: "SENSORS.TTMP1.Alm.stVal".into(),
                data_type: Some(DataType::Boolean),
            },
        ]
    }

    #[test]
    fn not_included_members_are_skipped() {
        let report = Report {
            rcb_reference: "SENSORS/TTMP1.RP.rcb01".into(),
            report_id: "rcb01".into(),
            timestamp: Some(1_700_000_000_000),
            entries: vec![
                ReportEntry {
                    reason: ReasonForInclusion::DataChange,
                    value: Some(MmsValue::Float(21.5)),
                },
                ReportEntry {
                    reason: ReasonForInclusion::NotIncluded,
                    value: None,
                },
            ],
        };
        let decoded = decode_report(&members(), &report);
        assert_eq!(decoded.entries.len(), 1);
        assert_eq!(decoded.entries[0].path, "SENSORS.TTMP1.TmpSv.instMag.f");
        assert_eq!(decoded.entries[0].reason, "data_change");
        assert_eq!(decoded.entries[0].value, Some(serde_json::json!(21.5)));
        assert_eq!(decoded.timestamp_ms, Some(1_700_000_000_000));
    }

    #[test]
    fn empty_reports_keep_their_metadata() {
        let report = Report {
            rcb_reference: "SENSORS/TTMP1.BR.brcb01".into(),
            report_id: "brcb01".into(),
            timestamp: None,
            entries: vec![
                ReportEntry {
                    reason: ReasonForInclusion::NotIncluded,
                    value: None,
                };
                2
            ],
        };
        let decoded = decode_report(&members(), &report);
        assert!(decoded.entries.is_empty());
        assert_eq!(decoded.rcb_reference, "SENSORS/TTMP1.BR.brcb01");
        assert_eq!(decoded.report_id, "brcb01");
    }

    #[test]
    fn undecodable_values_keep_their_entry() {
        let report = Report {
            rcb_reference: "SENSORS/TTMP1.RP.rcb01".into(),
            report_id: "rcb01".into(),
            timestamp: None,
            entries: vec![
                ReportEntry {
                    reason: ReasonForInclusion::Integrity,
                    value: Some(MmsValue::VisibleString("x".into())),
                },
                ReportEntry {
                    reason: ReasonForInclusion::Integrity,
                    value: Some(MmsValue::Boolean(true)),
                },
            ],
        };
        let decoded = decode_report(&members(), &report);
        assert_eq!(decoded.entries.len(), 2);
        assert_eq!(decoded.entries[0].value, None);
        assert_eq!(decoded.entries[1].value, Some(Value::Bool(true)));
    }
}

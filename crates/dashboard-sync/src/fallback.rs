//! Demo payloads shown when the backend cannot be reached.
//!
//! Each payload carries `isDemo: true` so views can label it. The summary is
//! consistent with the application list so the reconciler starts from a
//! coherent status index.

use serde_json::{Value, json};

use crate::api::Resource;

pub fn demo_payload(resource: Resource) -> Value {
    match resource {
        Resource::Summary => json!({
            "totalApplications": 4,
            "statusBreakdown": {
                "pending": 2,
                "underReview": 1,
                "approved": 1,
                "rejected": 0,
                "funded": 0
            },
            "approvalRate": 25.0,
            "totalLoanAmount": 185000.0,
            "isDemo": true
        }),
        Resource::Applications => json!({
            "items": [
                {"id": "demo-1001", "applicantName": "Avery Lopez", "loanAmount": 185000, "status": "approved", "assignedTo": "j.chen"},
                {"id": "demo-1002", "applicantName": "Jordan Patel", "loanAmount": 92000, "status": "under_review", "assignedTo": "m.ortiz"},
                {"id": "demo-1003", "applicantName": "Riley Nguyen", "loanAmount": 240000, "status": "pending", "assignedTo": null},
                {"id": "demo-1004", "applicantName": "Casey Morgan", "loanAmount": 61000, "status": "pending", "assignedTo": null}
            ],
            "isDemo": true
        }),
        Resource::Queue => json!({
            "items": [
                {"applicationId": "demo-1003", "priority": "high", "waitingHours": 30},
                {"applicationId": "demo-1004", "priority": "normal", "waitingHours": 4}
            ],
            "isDemo": true
        }),
        Resource::SlaAnalytics => json!({
            "onTrack": 3,
            "atRisk": 1,
            "breached": 0,
            "averageHoursToDecision": 41.5,
            "isDemo": true
        }),
        Resource::InvestorMetrics => json!({
            "fundedVolume": 0.0,
            "pipelineVolume": 578000.0,
            "averageLoanSize": 144500.0,
            "isDemo": true
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dashboard_state::{DashboardSummary, StatusBucket};

    #[test]
    fn every_payload_is_flagged_demo() {
        for resource in Resource::ALL {
            assert_eq!(demo_payload(resource)["isDemo"], json!(true), "{resource:?}");
        }
    }

    #[test]
    fn demo_summary_matches_demo_applications() {
        let summary: DashboardSummary =
            serde_json::from_value(demo_payload(Resource::Summary)).unwrap();
        let apps = demo_payload(Resource::Applications);
        let items = apps["items"].as_array().unwrap();
        assert_eq!(summary.total_applications as usize, items.len());

        let pending = items
            .iter()
            .filter(|app| {
                app["status"]
                    .as_str()
                    .and_then(StatusBucket::from_status)
                    == Some(StatusBucket::Pending)
            })
            .count();
        assert_eq!(summary.count(StatusBucket::Pending) as usize, pending);
    }
}

use serde::{Deserialize, Serialize};

/// The fixed workflow taxonomy emails are classified into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowType {
    OrderManagement,
    QuoteProcessing,
    CustomerSupport,
    ShippingLogistics,
    DealRegistration,
    Approval,
    Renewal,
    VendorManagement,
    #[default]
    General,
}

impl WorkflowType {
    /// All taxonomy members, in default tie-break priority order.
    ///
    /// When triage scoring ties, the earlier entry wins. The order is
    /// configurable at the triage layer; this is the default.
    pub const TIE_ORDER: [WorkflowType; 9] = [
        WorkflowType::OrderManagement,
        WorkflowType::QuoteProcessing,
        WorkflowType::Approval,
        WorkflowType::CustomerSupport,
        WorkflowType::ShippingLogistics,
        WorkflowType::DealRegistration,
        WorkflowType::Renewal,
        WorkflowType::VendorManagement,
        WorkflowType::General,
    ];

    /// Human-readable label, as shown on dashboards.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::OrderManagement => "Order Management",
            Self::QuoteProcessing => "Quote Processing",
            Self::CustomerSupport => "Customer Support",
            Self::ShippingLogistics => "Shipping/Logistics",
            Self::DealRegistration => "Deal Registration",
            Self::Approval => "Approval",
            Self::Renewal => "Renewal",
            Self::VendorManagement => "Vendor Management",
            Self::General => "General",
        }
    }
}

impl std::fmt::Display for WorkflowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Where in a workflow lifecycle a single message sits, judged from its
/// own text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleMarker {
    Start,
    Progress,
    Completion,
    #[default]
    None,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tie_order_covers_taxonomy() {
        assert_eq!(WorkflowType::TIE_ORDER.len(), 9);
        // General must come last so any scored hint beats it.
        assert_eq!(WorkflowType::TIE_ORDER[8], WorkflowType::General);
    }

    #[test]
    fn labels_match_dashboard_names() {
        assert_eq!(WorkflowType::ShippingLogistics.label(), "Shipping/Logistics");
        assert_eq!(WorkflowType::QuoteProcessing.to_string(), "Quote Processing");
    }

    #[test]
    fn serde_snake_case() {
        let json = serde_json::to_string(&WorkflowType::OrderManagement).unwrap();
        assert_eq!(json, "\"order_management\"");
        let marker = serde_json::to_string(&LifecycleMarker::Completion).unwrap();
        assert_eq!(marker, "\"completion\"");
    }

    #[test]
    fn defaults() {
        assert_eq!(WorkflowType::default(), WorkflowType::General);
        assert_eq!(LifecycleMarker::default(), LifecycleMarker::None);
    }
}

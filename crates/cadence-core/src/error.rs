use crate::id::ClusterId;

/// Errors raised while planning. Data errors abort the unit being planned
/// (a demand, or a cluster when raised outside of any demand).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlanError {
    #[error("demand {0} has no delivery operation")]
    MissingDeliveryOperation(String),
    #[error("operation {operation} has no flow producing into buffer {buffer}")]
    MissingProducingFlow { operation: String, buffer: String },
    #[error("no resource in {resource} carries skill {skill} for operation {operation}")]
    SkillUnsatisfiable {
        operation: String,
        resource: String,
        skill: String,
    },
    #[error("operation {0} mixes fixed and proportional flows with its suboperations")]
    MixedFlowTypes(String),
    #[error("operation {0} has no effective suboperations")]
    MissingSuboperations(String),
    #[error("recursion depth exceeded: more than {0} nested asks")]
    RecursionDepthExceeded(usize),
    #[error("operationplan is not part of the plan")]
    UnknownOperationPlan,
    #[error("demand {0:?} is not part of the network")]
    UnknownDemand(crate::id::DemandId),
    #[error("cluster {0:?} is not part of the plan")]
    UnknownCluster(ClusterId),
    #[error("cluster {cluster:?} failed: {reason}")]
    ClusterFailure { cluster: ClusterId, reason: String },
    #[error("failed to start worker pool: {0}")]
    ThreadPool(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_entity() {
        let e = PlanError::MissingProducingFlow {
            operation: "make".into(),
            buffer: "widget@plant".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("make"), "got: {msg}");
        assert!(msg.contains("widget@plant"), "got: {msg}");
        assert!(PlanError::RecursionDepthExceeded(256).to_string().contains("256"));
    }
}
